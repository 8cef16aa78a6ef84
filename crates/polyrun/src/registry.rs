//! Language registry
//!
//! Read-only lookup from a language identifier to its toolchain profile.
//! Built once from [`Config`] at startup and shared across requests.

use std::collections::HashMap;

use thiserror::Error;

use crate::config::{Config, LanguageProfile};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unsupported language '{0}'")]
    UnsupportedLanguage(String),
}

/// Immutable table of language profiles keyed by lowercase identifier
#[derive(Debug, Clone, Default)]
pub struct LanguageRegistry {
    profiles: HashMap<String, LanguageProfile>,
}

impl LanguageRegistry {
    /// Build the registry from the configured language table
    pub fn from_config(config: &Config) -> Self {
        Self::from_profiles(
            config
                .languages
                .iter()
                .map(|(id, profile)| (id.clone(), profile.clone())),
        )
    }

    /// Build the registry from `(id, profile)` pairs
    pub fn from_profiles(profiles: impl IntoIterator<Item = (String, LanguageProfile)>) -> Self {
        Self {
            profiles: profiles
                .into_iter()
                .map(|(id, profile)| (normalize_id(&id), profile))
                .collect(),
        }
    }

    /// Resolve a language identifier, ignoring case and surrounding whitespace
    pub fn resolve(&self, id: &str) -> Result<&LanguageProfile, RegistryError> {
        self.profiles
            .get(&normalize_id(id))
            .ok_or_else(|| RegistryError::UnsupportedLanguage(id.to_owned()))
    }

    /// Check whether an identifier resolves
    pub fn contains(&self, id: &str) -> bool {
        self.profiles.contains_key(&normalize_id(id))
    }

    /// All identifiers, sorted
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// All `(id, profile)` pairs, sorted by id
    pub fn iter(&self) -> impl Iterator<Item = (&str, &LanguageProfile)> {
        let mut entries: Vec<_> = self
            .profiles
            .iter()
            .map(|(id, profile)| (id.as_str(), profile))
            .collect();
        entries.sort_unstable_by_key(|(id, _)| *id);
        entries.into_iter()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

fn normalize_id(id: &str) -> String {
    id.trim().to_ascii_lowercase()
}

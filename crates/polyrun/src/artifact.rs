//! Artifact store
//!
//! Manages the on-disk lifetime of one submission. Every request gets a fresh
//! directory `<root>/<uuid>/`; the directory is removed exactly once, either by
//! an explicit [`Workspace::release`] or, on any path that skips it (early
//! return, panic, cancelled future), by `Drop`.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::config::LanguageProfile;

/// Neutral name the uploaded bytes are staged under before normalization
const STAGED_NAME: &str = "upload";

/// Longest extension hint that is recorded
const MAX_EXTENSION_HINT: usize = 16;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to prepare staging directory {path}: {source}")]
    Prepare {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to stage artifact: {0}")]
    Stage(#[source] std::io::Error),

    #[error("failed to normalize artifact: {0}")]
    Normalize(#[source] std::io::Error),

    #[error("invalid path: {0}")]
    InvalidPath(String),
}

/// Allocates per-request directories under one root
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    owner_uid: Option<u32>,
    owner_gid: Option<u32>,
}

impl ArtifactStore {
    /// Create a store rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            owner_uid: None,
            owner_gid: None,
        }
    }

    /// Hand request directories to this uid/gid (for privilege-dropped children)
    pub fn with_owner(mut self, uid: Option<u32>, gid: Option<u32>) -> Self {
        self.owner_uid = uid;
        self.owner_gid = gid;
        self
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root directory if it does not exist
    pub async fn prepare(&self) -> Result<(), ArtifactError> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|source| ArtifactError::Prepare {
                path: self.root.clone(),
                source,
            })
    }

    /// Allocate an empty private directory for one request
    #[instrument(skip(self))]
    pub async fn scratch(&self) -> Result<Workspace, ArtifactError> {
        self.prepare().await?;

        let id = Uuid::new_v4();
        let dir = self.root.join(id.simple().to_string());

        // create_dir (not create_dir_all) fails if the path already exists,
        // so a directory is never shared between requests
        let mut builder = fs::DirBuilder::new();
        builder.mode(0o700);
        builder.create(&dir).await.map_err(ArtifactError::Stage)?;

        let workspace = Workspace { id, dir };
        self.hand_over(workspace.path()).await?;

        debug!(%id, dir = %workspace.path().display(), "allocated workspace");
        Ok(workspace)
    }

    /// Persist the submitted bytes into a fresh request directory
    ///
    /// `suggested_name` is the client-supplied file name. It is only used to
    /// record an extension hint and never becomes part of a path.
    #[instrument(skip(self, bytes), fields(len = bytes.len()))]
    pub async fn stage(
        &self,
        bytes: &[u8],
        suggested_name: Option<&str>,
    ) -> Result<Artifact, ArtifactError> {
        let workspace = self.scratch().await?;
        let source = workspace.file_path(STAGED_NAME)?;

        fs::write(&source, bytes)
            .await
            .map_err(ArtifactError::Stage)?;
        self.hand_over(&source).await?;

        Ok(Artifact {
            workspace,
            source,
            extension_hint: suggested_name.and_then(extension_hint),
        })
    }

    /// Rename the staged file to `<stem>.<extension>` from the resolved profile
    ///
    /// The client's claimed extension is ignored; toolchains dispatch on the
    /// extension, so it must come from the language that was resolved.
    #[instrument(skip(self, artifact, profile), fields(id = %artifact.id()))]
    pub async fn normalize(
        &self,
        artifact: &mut Artifact,
        profile: &LanguageProfile,
    ) -> Result<(), ArtifactError> {
        let target = artifact.workspace.file_path(&profile.source_name())?;

        if let Some(ref hint) = artifact.extension_hint
            && hint != profile.extension.as_str()
        {
            debug!(
                claimed = %hint,
                expected = %profile.extension,
                "client extension differs from language extension"
            );
        }

        if target != artifact.source {
            fs::rename(&artifact.source, &target)
                .await
                .map_err(ArtifactError::Normalize)?;
            artifact.source = target;
        }
        Ok(())
    }

    /// Number of entries currently under the root
    pub async fn residual_entries(&self) -> Result<usize, ArtifactError> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(source) => {
                return Err(ArtifactError::Prepare {
                    path: self.root.clone(),
                    source,
                });
            }
        };
        let mut count = 0;
        while entries
            .next_entry()
            .await
            .map_err(|source| ArtifactError::Prepare {
                path: self.root.clone(),
                source,
            })?
            .is_some()
        {
            count += 1;
        }
        Ok(count)
    }

    async fn hand_over(&self, path: &Path) -> Result<(), ArtifactError> {
        if self.owner_uid.is_none() && self.owner_gid.is_none() {
            return Ok(());
        }
        let path = path.to_path_buf();
        let (uid, gid) = (self.owner_uid, self.owner_gid);
        tokio::task::spawn_blocking(move || std::os::unix::fs::chown(&path, uid, gid))
            .await
            .map_err(|e| ArtifactError::Stage(std::io::Error::other(e)))?
            .map_err(ArtifactError::Stage)
    }
}

/// One request's private directory
///
/// Removed by [`release`](Self::release), or by `Drop` if the handle is
/// discarded without it. An empty `dir` marks a handle already released.
#[derive(Debug)]
pub struct Workspace {
    id: Uuid,
    dir: PathBuf,
}

impl Workspace {
    /// Request identifier the directory is named after
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Path to the request directory
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Get the host path to a file inside the directory
    ///
    /// Returns an error if the name contains path traversal attempts.
    pub fn file_path(&self, name: &str) -> Result<PathBuf, ArtifactError> {
        if name.is_empty() || name.contains("..") || name.contains('/') {
            return Err(ArtifactError::InvalidPath(format!(
                "path traversal not allowed: {name}"
            )));
        }
        Ok(self.dir.join(name))
    }

    /// Delete the directory and everything in it
    ///
    /// Failures are logged and swallowed; they never reach the client.
    #[instrument(skip(self), fields(id = %self.id))]
    pub async fn release(mut self) {
        let dir = std::mem::take(&mut self.dir);
        drop(self);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => debug!("workspace released"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("workspace already gone")
            }
            Err(e) => warn!(dir = %dir.display(), error = %e, "failed to release workspace"),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.dir.as_os_str().is_empty() {
            return;
        }
        warn!(
            id = %self.id,
            dir = %self.dir.display(),
            "workspace dropped without explicit release, removing synchronously"
        );
        if let Err(e) = std::fs::remove_dir_all(&self.dir)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(dir = %self.dir.display(), error = %e, "drop cleanup failed");
        }
    }
}

/// A staged source file inside its request directory
#[derive(Debug)]
pub struct Artifact {
    workspace: Workspace,
    source: PathBuf,
    extension_hint: Option<String>,
}

impl Artifact {
    /// Request identifier
    pub fn id(&self) -> Uuid {
        self.workspace.id()
    }

    /// Request directory that holds the source and any compiler output
    pub fn dir(&self) -> &Path {
        self.workspace.path()
    }

    /// Current path of the source file
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// File name stem of the source (the Java class name after normalization)
    pub fn stem(&self) -> Option<&str> {
        self.source.file_stem().and_then(|stem| stem.to_str())
    }

    /// Extension the client claimed, if any
    pub fn extension_hint(&self) -> Option<&str> {
        self.extension_hint.as_deref()
    }

    /// Sibling path for a compiled output
    pub fn output_path(&self, name: &str) -> Result<PathBuf, ArtifactError> {
        self.workspace.file_path(name)
    }

    /// Delete the artifact and its request directory
    pub async fn release(self) {
        self.workspace.release().await;
    }
}

fn extension_hint(name: &str) -> Option<String> {
    let file_name = Path::new(name).file_name()?;
    let ext = Path::new(file_name).extension()?.to_str()?;
    let valid = !ext.is_empty()
        && ext.len() <= MAX_EXTENSION_HINT
        && ext.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then(|| ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn store() -> (tempfile::TempDir, ArtifactStore) {
        let root = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(root.path().join("staging"));
        (root, store)
    }

    #[tokio::test]
    async fn stage_writes_bytes_into_a_private_directory() {
        let (_root, store) = store();
        let artifact = store
            .stage(b"print('hi')", Some("hello.py"))
            .await
            .unwrap();

        assert!(artifact.dir().starts_with(store.root()));
        assert_eq!(std::fs::read(artifact.source()).unwrap(), b"print('hi')");
        assert_eq!(artifact.extension_hint(), Some("py"));

        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(artifact.dir()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);

        artifact.release().await;
    }

    #[tokio::test]
    async fn stage_ignores_path_components_in_suggested_name() {
        let (_root, store) = store();
        let artifact = store
            .stage(b"x", Some("../../etc/passwd.sh"))
            .await
            .unwrap();

        assert!(artifact.source().starts_with(artifact.dir()));
        assert_eq!(artifact.extension_hint(), Some("sh"));
        artifact.release().await;
    }

    #[tokio::test]
    async fn stage_twice_yields_distinct_directories() {
        let (_root, store) = store();
        let first = store.stage(b"a", Some("main.c")).await.unwrap();
        let second = store.stage(b"a", Some("main.c")).await.unwrap();

        assert_ne!(first.id(), second.id());
        assert_ne!(first.dir(), second.dir());

        first.release().await;
        second.release().await;
        assert_eq!(store.residual_entries().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn normalize_uses_profile_extension_not_client_extension() {
        let (_root, store) = store();
        let config = Config::default();
        let mut artifact = store.stage(b"class Main {}", Some("evil.sh")).await.unwrap();

        store
            .normalize(&mut artifact, &config.languages["java"])
            .await
            .unwrap();

        assert_eq!(artifact.source().file_name().unwrap(), "Main.java");
        assert_eq!(artifact.stem(), Some("Main"));
        assert!(artifact.source().exists());
        artifact.release().await;
    }

    #[tokio::test]
    async fn release_removes_directory() {
        let (_root, store) = store();
        let artifact = store.stage(b"x", None).await.unwrap();
        let dir = artifact.dir().to_path_buf();

        artifact.release().await;
        assert!(!dir.exists());
        assert_eq!(store.residual_entries().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn drop_without_release_still_removes_directory() {
        let (_root, store) = store();
        let artifact = store.stage(b"x", None).await.unwrap();
        let dir = artifact.dir().to_path_buf();

        drop(artifact);
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn release_survives_directory_removed_externally() {
        let (_root, store) = store();
        let workspace = store.scratch().await.unwrap();
        std::fs::remove_dir_all(workspace.path()).unwrap();
        workspace.release().await;
    }

    #[tokio::test]
    async fn residual_entries_of_missing_root_is_zero() {
        let (_root, store) = store();
        assert_eq!(store.residual_entries().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn release_removes_only_its_own_directory() {
        let (_root, store) = store();
        let released = store.scratch().await.unwrap();
        let kept = store.scratch().await.unwrap();
        let (released_dir, kept_dir) = (released.path().to_path_buf(), kept.path().to_path_buf());

        released.release().await;
        assert!(!released_dir.exists());
        assert!(kept_dir.exists());
        assert!(store.root().exists());

        kept.release().await;
        assert_eq!(store.residual_entries().await.unwrap(), 0);
    }

    #[test]
    fn test_file_path_validation() {
        let workspace = Workspace {
            id: Uuid::nil(),
            dir: PathBuf::new(),
        };

        assert!(workspace.file_path("main.cpp").is_ok_and(|path| path.ends_with("main.cpp")));
        assert!(workspace.file_path("../escape").is_err());
        assert!(workspace.file_path("foo/bar").is_err());
        assert!(workspace.file_path("/absolute/path").is_err());
        assert!(workspace.file_path("").is_err());
    }

    #[test]
    fn extension_hint_sanitizes() {
        assert_eq!(extension_hint("main.CPP"), Some("cpp".to_owned()));
        assert_eq!(extension_hint("noext"), None);
        assert_eq!(extension_hint("a.b;rm"), None);
        assert_eq!(extension_hint("dir.d/file"), None);
        assert_eq!(extension_hint(""), None);
    }
}

use polyrun::config::Config;

use super::FIXTURES_PATH;

#[test]
fn test_load_valid_config() {
    let path = format!("{}/configs/valid_full.toml", FIXTURES_PATH);
    let config = Config::from_file(&path).expect("Failed to load config");

    assert!(config.languages.contains_key("c"));
    assert!(config.languages.contains_key("python"));
    assert!(config.languages["python"].is_installable());
    assert_eq!(config.default_limits.time_limit, Some(2.0));
    assert_eq!(config.max_concurrent, 2);
}

#[test]
fn test_load_minimal_config() {
    let path = format!("{}/configs/valid_minimal.toml", FIXTURES_PATH);
    let config = Config::from_file(&path).expect("Failed to load config");

    assert!(config.languages.contains_key("test"));
    assert!(!config.languages["test"].is_compiled());
}

#[test]
fn test_layered_load_keeps_builtin_languages() {
    let path = format!("{}/configs/valid_minimal.toml", FIXTURES_PATH);
    let config =
        Config::load(Some(std::path::Path::new(&path))).expect("Failed to load config");

    assert!(config.languages.contains_key("test"));
    assert!(config.languages.contains_key("java"));
}

#[test]
fn test_load_invalid_configs() {
    for name in [
        "invalid_empty_name.toml",
        "invalid_empty_run_command.toml",
        "invalid_placeholder.toml",
        "invalid_output_name.toml",
        "invalid_duplicate_id.toml",
    ] {
        let path = format!("{FIXTURES_PATH}/configs/{name}");
        assert!(Config::from_file(&path).is_err(), "{name} should be rejected");
    }
}

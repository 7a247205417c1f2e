//! Config module tests

use crate::config::Config;

#[test]
fn test_config_default() {
    let config = Config::default();

    assert!(config.store.path.is_none());
    assert_eq!(config.store.max_connections, 5);

    assert!(config.graph.random_seed.is_none());

    assert!(config.generation.api_key.is_none());
    assert_eq!(config.generation.model, "dialogue-writer");
    assert_eq!(config.generation.timeout_secs, 60);
    assert_eq!(config.generation.max_count, 10);

    assert_eq!(config.projection.channel_capacity, 256);
    assert!(config.projection.outbox_path.is_none());
}

#[test]
fn test_config_default_validates() {
    Config::default().validate().expect("defaults should be valid");
}

#[test]
fn test_config_rejects_stored_api_key() {
    let mut config = Config::default();
    config.generation.api_key = Some("sk-test".to_string());

    assert!(config.validate().is_err());
}

#[test]
fn test_set_and_get_roundtrip() {
    let mut config = Config::default();

    config.set("store.max_connections", "8").unwrap();
    config.set("graph.random_seed", "42").unwrap();
    config.set("generation.base_url", "https://gen.example.com/v1/").unwrap();
    config.set("generation.max_count", "3").unwrap();
    config.set("projection.outbox_path", "/tmp/outbox.jsonl").unwrap();

    assert_eq!(config.get("store.max_connections").unwrap(), "8");
    assert_eq!(config.get("graph.random_seed").unwrap(), "42");
    assert_eq!(
        config.get("generation.base_url").unwrap(),
        "https://gen.example.com/v1"
    );
    assert_eq!(config.get("generation.max_count").unwrap(), "3");
    assert_eq!(
        config.get("projection.outbox_path").unwrap(),
        "/tmp/outbox.jsonl"
    );

    config.set("graph.random_seed", "none").unwrap();
    assert_eq!(config.get("graph.random_seed").unwrap(), "(entropy)");
}

#[test]
fn test_set_rejects_invalid_values() {
    let mut config = Config::default();

    assert!(config.set("store.max_connections", "0").is_err());
    assert!(config.set("store.max_connections", "many").is_err());
    assert!(config.set("generation.max_count", "0").is_err());
    assert!(config.set("generation.base_url", "ftp://nope").is_err());
    assert!(config.set("generation.api_key", "sk-secret").is_err());
    assert!(config.set("projection.channel_capacity", "0").is_err());
    assert!(config.set("nope.key", "1").is_err());
}

#[test]
fn test_unknown_key_get() {
    let config = Config::default();
    let err = config.get("graph.depth").unwrap_err();
    assert!(err.to_string().contains("Unknown configuration key"));
}

#[test]
fn test_list_covers_all_keys() {
    let config = Config::default();
    let listed = config.list().unwrap();

    assert_eq!(listed.len(), Config::keys().len());
    assert!(listed.iter().any(|(k, _)| k == "graph.random_seed"));
}

#[test]
fn test_save_and_load_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut config = Config::default();
    config.set("graph.random_seed", "7").unwrap();
    config.set("generation.model", "bard-large").unwrap();
    config.save_to(&path).unwrap();

    let loaded = Config::load_from(&path).unwrap();
    assert_eq!(loaded.graph.random_seed, Some(7));
    assert_eq!(loaded.generation.model, "bard-large");
}

#[test]
fn test_load_missing_file_gives_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let loaded = Config::load_from(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(loaded.generation.max_count, 10);
}

#[test]
fn test_load_rejects_invalid_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "this is = = not toml").unwrap();

    assert!(Config::load_from(&path).is_err());
}

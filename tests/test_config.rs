use std::collections::HashMap;

use nx::config::Config;
use tracing::Level;

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

#[test]
fn test_config_default_address() {
    let cfg = Config::load_with(env(&[])).unwrap();
    assert_eq!(cfg.listen_addr, "127.0.0.1:8080");
    assert_eq!(cfg.collection, "persons");
    assert_eq!(cfg.level(), Level::INFO);
}

#[test]
fn test_config_custom_address_from_env() {
    let cfg = Config::load_with(env(&[("LISTEN", "0.0.0.0:3000")])).unwrap();
    assert_eq!(cfg.listen_addr, "0.0.0.0:3000");
}

#[test]
fn test_config_clone() {
    let cfg1 = Config::default();
    let cfg2 = cfg1.clone();
    assert_eq!(cfg1, cfg2);
}

#[test]
fn test_config_from_yaml_keeps_missing_defaults() {
    let cfg = Config::from_yaml("listen_addr: 0.0.0.0:5000\nlog_level: debug\n").unwrap();
    assert!(cfg.listen_addr.starts_with("0.0.0.0"));
    assert_eq!(cfg.collection, "persons");
    assert_eq!(cfg.level(), Level::DEBUG);
}

#[test]
fn test_config_rejects_bad_yaml() {
    assert!(Config::from_yaml("listen_addr: [1, 2").is_err());
}

#[test]
fn test_config_env_overrides_file() {
    let path = std::env::temp_dir().join(format!("nx-config-{}.yaml", std::process::id()));
    std::fs::write(&path, "listen_addr: 127.0.0.1:9000\ncollection: people\n").unwrap();

    let file = path.to_string_lossy().into_owned();
    let cfg = Config::load_with(env(&[("NX_CONFIG", &file), ("NX_COLLECTION", "cats")])).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(cfg.listen_addr, "127.0.0.1:9000");
    assert_eq!(cfg.collection, "cats");
}

#[test]
fn test_config_missing_file_is_an_error() {
    let cfg = Config::load_with(env(&[("NX_CONFIG", "/nonexistent/nx.yaml")]));
    assert!(cfg.is_err());
}

#[test]
fn test_config_unknown_level_falls_back() {
    let cfg = Config::load_with(env(&[("NX_LOG", "chatty")])).unwrap();
    assert_eq!(cfg.level(), Level::INFO);
}

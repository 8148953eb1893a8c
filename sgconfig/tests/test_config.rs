use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_yaml::Value;
use sgconfig::Config;
use tempfile::TempDir;

fn create_test_config() -> (TempDir, Config) {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = Config::load_config(temp_dir.path().to_str().unwrap()).unwrap();
    (temp_dir, config)
}

#[test]
fn test_defaults_loaded_without_file() {
    let (temp_dir, config) = create_test_config();

    // Les défauts intégrés sont visibles
    assert_eq!(config.get_http_port(), 8792);
    let interval = config.get_value(&["preview", "interval"]).unwrap();
    assert_eq!(interval, Value::Number(250.into()));

    // La configuration par défaut est matérialisée au premier lancement
    assert!(temp_dir.path().join("config.yaml").exists());
}

#[test]
fn test_file_overlay_keeps_sibling_defaults() {
    let temp_dir = tempfile::tempdir().unwrap();
    std::fs::write(
        temp_dir.path().join("config.yaml"),
        "host:\n  http_port: 9999\n",
    )
    .unwrap();

    let config = Config::load_config(temp_dir.path().to_str().unwrap()).unwrap();

    // La valeur du fichier remplace le défaut
    assert_eq!(config.get_http_port(), 9999);
    // Les clés absentes du fichier gardent leur défaut
    let timeout = config.get_value(&["preview", "timeout"]).unwrap();
    assert_eq!(timeout, Value::Number(10000.into()));
}

#[test]
fn test_set_value_roundtrip_and_lowercasing() {
    let (_temp_dir, config) = create_test_config();

    config
        .set_value(&["Preview", "TITLE"], Value::String("abc".to_string()))
        .unwrap();

    // Les chemins sont insensibles à la casse
    let value = config.get_value(&["preview", "title"]).unwrap();
    assert_eq!(value, Value::String("abc".to_string()));
}

#[test]
fn test_env_override() {
    // Chemin dédié à ce test pour ne pas interférer avec les autres
    unsafe {
        std::env::set_var("SPYGLASS_CONFIG__TESTSECTION__FLAG", "42");
    }
    let (_temp_dir, config) = create_test_config();

    let value = config.get_value(&["testsection", "flag"]).unwrap();
    assert_eq!(value, Value::Number(42.into()));
    unsafe {
        std::env::remove_var("SPYGLASS_CONFIG__TESTSECTION__FLAG");
    }
}

#[test]
fn test_get_managed_dir_creates_directory() {
    let (temp_dir, config) = create_test_config();

    let dir = config
        .get_managed_dir(&["preview", "temp_dir"], "tmp")
        .unwrap();

    assert!(std::path::Path::new(&dir).is_dir());
    assert!(dir.starts_with(temp_dir.path().to_str().unwrap()));
}

#[test]
fn test_unknown_path_is_an_error() {
    let (_temp_dir, config) = create_test_config();
    assert!(config.get_value(&["no", "such", "path"]).is_err());
}

#[test]
fn test_reload_fires_callbacks() {
    let (temp_dir, config) = create_test_config();

    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(std::sync::Mutex::new(String::new()));
    {
        let count = count.clone();
        let seen = seen.clone();
        config.register_callback(move |event| {
            count.fetch_add(1, Ordering::SeqCst);
            *seen.lock().unwrap() = event.to_string();
        });
    }

    // Modifier le fichier puis recharger
    std::fs::write(
        temp_dir.path().join("config.yaml"),
        "host:\n  http_port: 9000\n",
    )
    .unwrap();
    config.reload().unwrap();

    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(seen.lock().unwrap().as_str(), "reload");
    assert_eq!(config.get_http_port(), 9000);
}

#[test]
fn test_default_rules_present() {
    let (_temp_dir, config) = create_test_config();

    let rules = config.get_value(&["rules", "default"]).unwrap();
    match rules {
        Value::Sequence(seq) => assert!(!seq.is_empty()),
        other => panic!("rules.default should be a sequence, got {:?}", other),
    }
}

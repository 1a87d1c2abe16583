use std::io::Write;

use config::Map;
use eavault::EavaultError;
use eavault::config::EngineConfig;
use eavault::connection::Dialect;
use eavault::load::DEFAULT_MAX_DEPTH;

#[test]
fn defaults_apply_without_a_file() {
    let config = EngineConfig::from_toml("").expect("empty config");
    assert_eq!(config.database.dialect, Dialect::Sqlite);
    assert!(config.database.path.is_none());
    assert!(!config.audit.enabled);
    assert_eq!(config.batch.save_batch_size, 500);
    assert_eq!(config.batch.load_chunk_size, 1000);
    assert_eq!(config.batch.load_workers, 1);
    assert_eq!(config.max_depth, DEFAULT_MAX_DEPTH);
}

#[test]
fn toml_sections_override_defaults() {
    let config = EngineConfig::from_toml(
        r#"
max_depth = 12

[database]
dialect = "tsql"

[audit]
enabled = true

[batch]
save_batch_size = 5000
load_chunk_size = 250
"#,
    )
    .expect("config");
    assert_eq!(config.database.dialect, Dialect::Tsql);
    assert!(config.audit.enabled);
    assert_eq!(config.max_depth, 12);
    assert_eq!(config.batch.load_workers, 1);
    // tsql takes at most 2100 parameters
    assert_eq!(config.effective_save_batch(Dialect::Tsql), 2_099);
    assert_eq!(config.effective_load_chunk(Dialect::Tsql), 250);
    assert_eq!(config.effective_save_batch(Dialect::Sqlite), 998);
    assert_eq!(config.effective_save_batch(Dialect::Postgres), 5_000);
}

#[test]
fn invalid_values_are_rejected() {
    for text in [
        "[batch]\nsave_batch_size = 0",
        "[batch]\nload_workers = 0",
        "max_depth = 0",
    ] {
        let err = EngineConfig::from_toml(text).unwrap_err();
        assert!(matches!(err, EavaultError::Config(_)), "{}", text);
    }
    assert!(EngineConfig::from_toml("[database]\ndialect = \"db2\"").is_err());
}

#[test]
fn file_then_environment() {
    let path = std::env::temp_dir().join(format!("eavault_config_{}.toml", std::process::id()));
    {
        let mut file = std::fs::File::create(&path).expect("create");
        writeln!(file, "[batch]\nload_chunk_size = 64\nload_workers = 2").expect("write");
    }
    let mut vars = Map::new();
    vars.insert("EAVAULT__BATCH__LOAD_WORKERS".to_string(), "3".to_string());
    vars.insert("EAVAULT__AUDIT__ENABLED".to_string(), "true".to_string());
    let config = EngineConfig::load_with_vars(Some(&path), vars);
    let _ = std::fs::remove_file(&path);
    let config = config.expect("config");
    assert_eq!(config.batch.load_chunk_size, 64);
    assert_eq!(config.batch.load_workers, 3);
    assert!(config.audit.enabled);
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let path = std::env::temp_dir().join("eavault_config_absent.toml");
    let config = EngineConfig::load_with_vars(Some(&path), Map::new()).expect("config");
    assert_eq!(config.batch.load_chunk_size, 1000);
}

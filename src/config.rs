use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat, Map};
use serde::Deserialize;

use crate::connection::Dialect;
use crate::error::{EavaultError, Result};
use crate::load::DEFAULT_MAX_DEPTH;

pub const ENV_PREFIX: &str = "EAVAULT";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub dialect: Dialect,
    /// SQLite database file; the database lives in memory when absent.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub save_batch_size: usize,
    pub load_chunk_size: usize,
    pub load_workers: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            save_batch_size: 500,
            load_chunk_size: 1000,
            load_workers: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub database: DatabaseConfig,
    pub audit: AuditConfig,
    pub batch: BatchConfig,
    pub max_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            audit: AuditConfig::default(),
            batch: BatchConfig::default(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl EngineConfig {
    /// Defaults, then the optional TOML file, then `EAVAULT__*` variables
    /// (for example `EAVAULT__AUDIT__ENABLED=true`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::layered(path, None)
    }

    /// Like [`EngineConfig::load`], reading variables from `vars` instead of
    /// the process environment.
    pub fn load_with_vars(path: Option<&Path>, vars: Map<String, String>) -> Result<Self> {
        Self::layered(path, Some(vars))
    }

    fn layered(path: Option<&Path>, vars: Option<Map<String, String>>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(false));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .source(vars),
            )
            .build()?;
        let config: EngineConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parses configuration text without consulting the environment.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: EngineConfig = Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch.save_batch_size == 0 || self.batch.load_chunk_size == 0 {
            return Err(EavaultError::Config(
                "batch sizes must be at least 1".to_string(),
            ));
        }
        if self.batch.load_workers == 0 {
            return Err(EavaultError::Config(
                "load_workers must be at least 1".to_string(),
            ));
        }
        if self.max_depth == 0 {
            return Err(EavaultError::Config("max_depth must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn effective_save_batch(&self, dialect: Dialect) -> usize {
        dialect.clamp(self.batch.save_batch_size)
    }

    pub fn effective_load_chunk(&self, dialect: Dialect) -> usize {
        dialect.clamp(self.batch.load_chunk_size)
    }
}

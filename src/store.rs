use std::sync::Arc;

use tracing::info;

use crate::config::EngineConfig;
use crate::connection::{ConnectionProvider, Dialect, SqliteProvider};
use crate::error::{EavaultError, Result};
use crate::filter::Filter;
use crate::instance::EntityInstance;
use crate::interface::CancelToken;
use crate::load::LoadEngine;
use crate::registry::{EntityTypeId, Registry};
use crate::save::{SaveEngine, SaveReport};
use crate::schema;

/// A registry, a connection provider and the engines configured for them.
pub struct Store {
    registry: Arc<Registry>,
    provider: Arc<dyn ConnectionProvider>,
    config: EngineConfig,
    saver: SaveEngine,
    loader: LoadEngine,
}

impl Store {
    pub fn new(
        registry: Arc<Registry>,
        provider: Arc<dyn ConnectionProvider>,
        config: EngineConfig,
    ) -> Self {
        let dialect = provider.dialect();
        let saver = SaveEngine::new(config.audit.enabled, config.effective_save_batch(dialect));
        let loader = LoadEngine::new(
            config.effective_load_chunk(dialect),
            config.batch.load_workers,
            config.max_depth,
        );
        Self {
            registry,
            provider,
            config,
            saver,
            loader,
        }
    }

    /// Opens the SQLite database named by the configuration (in memory when
    /// no path is set) and creates the EAV tables.
    pub fn open(config: EngineConfig, registry: Arc<Registry>) -> Result<Self> {
        if config.database.dialect != Dialect::Sqlite {
            return Err(EavaultError::Config(format!(
                "no bundled provider for {:?}, use Store::new with your own",
                config.database.dialect
            )));
        }
        let provider = match &config.database.path {
            Some(path) => SqliteProvider::open(path)?,
            None => SqliteProvider::open_in_memory()?,
        };
        let store = Self::new(registry, Arc::new(provider), config);
        store.bootstrap()?;
        info!(path = ?store.config.database.path, audit = store.config.audit.enabled, "store opened");
        Ok(store)
    }

    pub fn bootstrap(&self) -> Result<()> {
        let mut conn = self.provider.acquire()?;
        schema::bootstrap(conn.as_mut(), self.provider.dialect())
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn provider(&self) -> &Arc<dyn ConnectionProvider> {
        &self.provider
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn save(&self, instances: &[EntityInstance]) -> Result<SaveReport> {
        self.save_with(instances, &CancelToken::new())
    }

    pub fn save_with(&self, instances: &[EntityInstance], cancel: &CancelToken) -> Result<SaveReport> {
        self.saver
            .save(&self.registry, self.provider.as_ref(), instances, cancel)
    }

    pub fn load(&self, type_id: EntityTypeId, guids: Option<&[String]>) -> Result<Vec<EntityInstance>> {
        self.load_with(type_id, guids, &CancelToken::new())
    }

    pub fn load_with(
        &self,
        type_id: EntityTypeId,
        guids: Option<&[String]>,
        cancel: &CancelToken,
    ) -> Result<Vec<EntityInstance>> {
        self.loader
            .load(&self.registry, self.provider.as_ref(), type_id, guids, cancel)
    }

    pub fn filter(&self) -> Filter<'_> {
        Filter::new(&self.registry)
    }

    /// Runs a filter and loads the matching instances.
    pub fn find(&self, filter: &Filter<'_>, type_id: EntityTypeId) -> Result<Vec<EntityInstance>> {
        let guids = {
            let mut conn = self.provider.acquire()?;
            filter.find_guids(conn.as_mut(), type_id)?
        };
        self.load(type_id, Some(&guids))
    }
}

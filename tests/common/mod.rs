#![allow(dead_code)]

use std::sync::{Arc, Mutex, Once};

use eavault::Result;
use eavault::config::EngineConfig;
use eavault::connection::{Connection, ConnectionProvider, Dialect, Row, SqliteProvider};
use eavault::datatype::{ScalarKind, SqlValue};
use eavault::registry::{EntityTypeDef, EntityTypeId, FieldId, FieldKind, Registry};
use eavault::store::Store;
use tracing_subscriber::EnvFilter;

// fields
pub const NAME: FieldId = 1;
pub const AGE: FieldId = 2;
pub const BORN: FieldId = 3;
pub const SCORE: FieldId = 4;
pub const ACTIVE: FieldId = 5;
pub const PHOTO: FieldId = 6;
pub const NICKNAMES: FieldId = 7;
pub const LUCKY: FieldId = 8;
pub const COLOURS: FieldId = 9;
pub const ADDRESS: FieldId = 10;
pub const PETS: FieldId = 11;
pub const STREET: FieldId = 12;
pub const TOWN: FieldId = 13;
pub const SPECIES: FieldId = 14;
pub const WEIGHT: FieldId = 15;
pub const MET: FieldId = 16;
pub const HEIGHT: FieldId = 17;
pub const NEXT: FieldId = 18;

// entity types
pub const PERSON: EntityTypeId = 100;
pub const PLACE: EntityTypeId = 200;
pub const PET: EntityTypeId = 300;
pub const DOG: EntityTypeId = 301;
pub const NODE: EntityTypeId = 400;

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn registry() -> Arc<Registry> {
    init_tracing();
    let registry = Registry::new();
    let scalar = |kind| FieldKind::Scalar(kind);
    registry.register_field(NAME, "name", scalar(ScalarKind::Text)).expect("name");
    registry.register_field(AGE, "age", scalar(ScalarKind::Integer)).expect("age");
    registry.register_field(BORN, "born", scalar(ScalarKind::DateTime)).expect("born");
    registry.register_field(SCORE, "score", scalar(ScalarKind::Double)).expect("score");
    registry.register_field(ACTIVE, "active", scalar(ScalarKind::Boolean)).expect("active");
    registry.register_field(PHOTO, "photo", scalar(ScalarKind::Blob)).expect("photo");
    registry
        .register_field(NICKNAMES, "nicknames", FieldKind::Array(ScalarKind::Text))
        .expect("nicknames");
    registry
        .register_field(LUCKY, "lucky", FieldKind::Array(ScalarKind::Long))
        .expect("lucky");
    registry
        .register_enum_field(COLOURS, "colours", &["red", "green", "blue"])
        .expect("colours");
    registry.register_field(ADDRESS, "address", FieldKind::Child).expect("address");
    registry.register_field(PETS, "pets", FieldKind::Children).expect("pets");
    registry.register_field(STREET, "street", scalar(ScalarKind::Text)).expect("street");
    registry.register_field(TOWN, "town", scalar(ScalarKind::Text)).expect("town");
    registry.register_field(SPECIES, "species", scalar(ScalarKind::Text)).expect("species");
    registry.register_field(WEIGHT, "weight", scalar(ScalarKind::Float)).expect("weight");
    registry.register_field(MET, "met", scalar(ScalarKind::ZonedDateTime)).expect("met");
    registry.register_field(HEIGHT, "height", scalar(ScalarKind::Long)).expect("height");
    registry.register_field(NEXT, "next", FieldKind::Child).expect("next");

    registry
        .register_entity_type(
            EntityTypeDef::new(PERSON, "Person")
                .field(NAME)
                .field(AGE)
                .field(BORN)
                .field(SCORE)
                .field(ACTIVE)
                .field(PHOTO)
                .field(MET)
                .field(HEIGHT)
                .field(NICKNAMES)
                .field(LUCKY)
                .field(ADDRESS)
                .field(PETS)
                .enum_field(COLOURS),
        )
        .expect("person");
    registry
        .register_entity_type(EntityTypeDef::new(PLACE, "Place").field(STREET).field(TOWN))
        .expect("place");
    registry
        .register_entity_type(EntityTypeDef::new(PET, "Pet").field(NAME).field(SPECIES).field(WEIGHT))
        .expect("pet");
    registry
        .register_entity_type(EntityTypeDef::new(DOG, "Dog").extends(PET).enum_field(COLOURS))
        .expect("dog");
    registry
        .register_entity_type(EntityTypeDef::new(NODE, "Node").field(NAME).field(NEXT))
        .expect("node");
    Arc::new(registry)
}

pub fn store() -> (Arc<Registry>, Store) {
    store_with(EngineConfig::default())
}

pub fn store_with(config: EngineConfig) -> (Arc<Registry>, Store) {
    let registry = registry();
    let store = Store::open(config, Arc::clone(&registry)).expect("store");
    (registry, store)
}

pub fn count_rows(store: &Store, table: &str) -> i64 {
    let mut conn = store.provider().acquire().expect("connection");
    let rows = conn
        .query(&format!("select count(*) from {}", table), &[])
        .expect("count");
    rows[0].integer(0).expect("count value")
}

pub fn execute(store: &Store, sql: &str, params: &[SqlValue]) -> usize {
    let mut conn = store.provider().acquire().expect("connection");
    conn.execute(sql, params).expect("execute")
}

// ------------- recording provider -------------
#[derive(Debug, Clone, PartialEq)]
pub struct Recorded {
    pub sql: String,
    pub params: usize,
}

/// An in-memory SQLite provider that remembers every statement it ran.
pub struct RecordingProvider {
    inner: SqliteProvider,
    log: Mutex<Vec<Recorded>>,
}

impl RecordingProvider {
    pub fn new() -> Self {
        Self {
            inner: SqliteProvider::open_in_memory().expect("sqlite"),
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn recorded(&self) -> Vec<Recorded> {
        self.log.lock().expect("log").clone()
    }

    /// Parameter counts of the recorded statements starting with `prefix`.
    pub fn params_of(&self, prefix: &str) -> Vec<usize> {
        self.recorded()
            .into_iter()
            .filter(|r| r.sql.starts_with(prefix))
            .map(|r| r.params)
            .collect()
    }

    pub fn clear(&self) {
        self.log.lock().expect("log").clear();
    }
}

impl ConnectionProvider for RecordingProvider {
    fn acquire(&self) -> Result<Box<dyn Connection + '_>> {
        Ok(Box::new(RecordingConnection {
            inner: self.inner.acquire()?,
            log: &self.log,
        }))
    }

    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }
}

struct RecordingConnection<'a> {
    inner: Box<dyn Connection + 'a>,
    log: &'a Mutex<Vec<Recorded>>,
}

impl RecordingConnection<'_> {
    fn record(&self, sql: &str, params: usize) {
        if let Ok(mut log) = self.log.lock() {
            log.push(Recorded {
                sql: sql.to_string(),
                params,
            });
        }
    }
}

impl Connection for RecordingConnection<'_> {
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<usize> {
        self.record(sql, params.len());
        self.inner.execute(sql, params)
    }

    fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        self.record(sql, params.len());
        self.inner.query(sql, params)
    }

    fn execute_batch(&mut self, sql: &str) -> Result<()> {
        self.record(sql, 0);
        self.inner.execute_batch(sql)
    }
}

pub fn recording_store(config: EngineConfig) -> (Arc<Registry>, Arc<RecordingProvider>, Store) {
    let registry = registry();
    let provider = Arc::new(RecordingProvider::new());
    let store = Store::new(Arc::clone(&registry), provider.clone(), config);
    store.bootstrap().expect("bootstrap");
    (registry, provider, store)
}

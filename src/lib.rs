//! Eavault: object graph persistence over an entity-attribute-value schema.
//!
//! Instead of one table per class, every value an object holds is stored as
//! its own row keyed by `(guid, field id)`:
//! * A [`registry::Field`] is a process-unique numeric id with a name and a
//!   [`registry::FieldKind`] (a scalar kind, an array of one, an enum
//!   selection, a single child or a child collection).
//! * An [`registry::EnumField`] adds the ordered literals an enum field accepts.
//! * An [`registry::EntityType`] is the set of fields an instance may populate,
//!   with the fields of every type it extends unioned in.
//! * An [`instance::EntityInstance`] is one object: a guid, timestamps and a
//!   typed slot per declared field.
//!
//! Metadata lives in an injectable [`registry::Registry`] that only grows.
//! Lookups read an immutable snapshot; registrations are serialised.
//!
//! ## Modules
//! * [`datatype`] - scalar kinds, typed values and the [`datatype::DataType`] trait.
//! * [`registry`] - fields, enum fields, entity types and their registry.
//! * [`instance`] - entity instances and their slots.
//! * [`named`] - rewriting `:name` markers to positional ones.
//! * [`filter`] - parameterized predicates over registered fields.
//! * [`connection`] - the connection collaborator and the SQLite provider.
//! * [`schema`] - EAV table names and DDL.
//! * [`save`] / [`load`] - the batched save and load pipelines.
//! * [`store`] - a registry, a provider and configured engines in one place.
//! * [`config`] - layered configuration.
//! * [`interface`] - background save and load with cooperative cancellation.
//!
//! ## Quick Start
//! ```
//! use std::sync::Arc;
//! use eavault::config::EngineConfig;
//! use eavault::datatype::ScalarKind;
//! use eavault::registry::{EntityTypeDef, FieldKind, Registry};
//! use eavault::store::Store;
//!
//! let registry = Arc::new(Registry::new());
//! registry.register_field(1, "name", FieldKind::Scalar(ScalarKind::Text)).unwrap();
//! registry.register_entity_type(EntityTypeDef::new(10, "Person").field(1)).unwrap();
//! let store = Store::open(EngineConfig::default(), Arc::clone(&registry)).unwrap();
//!
//! let mut alice = registry.instantiate(10).unwrap();
//! alice.set(1, "Alice".to_string()).unwrap();
//! store.save(&[alice.clone()]).unwrap();
//!
//! let loaded = store.load(10, Some(&[alice.guid().to_string()])).unwrap();
//! assert_eq!(loaded[0].get::<String>(1).unwrap(), "Alice");
//! ```
//!
//! ## Storage
//! Storage failures abort a save or load with the phase and key that failed.
//! Nothing is rolled back across phases; wrap a call in a transaction at the
//! provider level when atomicity matters.

pub mod config;
pub mod connection;
pub mod datatype;
pub mod error;
pub mod filter;
pub mod instance;
pub mod interface;
pub mod load;
pub mod named;
pub mod registry;
pub mod save;
pub mod schema;
pub mod store;

pub use error::{EavaultError, Result};

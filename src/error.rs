use std::fmt;

use thiserror::Error;

use crate::datatype::ScalarKind;

/// The step of a save or load call in which a storage failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Catalogue,
    Overview,
    Scalar(ScalarKind),
    Array(ScalarKind),
    Enum,
    Audit,
    SingleChild,
    ChildCollection,
    Resolve,
    LoadOverview,
    LoadScalar(ScalarKind),
    LoadArray(ScalarKind),
    LoadEnum,
    LoadBinding,
    Query,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Phase::Catalogue => write!(f, "catalogue upsert"),
            Phase::Overview => write!(f, "overview upsert"),
            Phase::Scalar(kind) => write!(f, "{} upsert", kind),
            Phase::Array(kind) => write!(f, "{} array upsert", kind),
            Phase::Enum => write!(f, "enum selection upsert"),
            Phase::Audit => write!(f, "audit append"),
            Phase::SingleChild => write!(f, "single child binding"),
            Phase::ChildCollection => write!(f, "child collection binding"),
            Phase::Resolve => write!(f, "guid resolution"),
            Phase::LoadOverview => write!(f, "overview load"),
            Phase::LoadScalar(kind) => write!(f, "{} load", kind),
            Phase::LoadArray(kind) => write!(f, "{} array load", kind),
            Phase::LoadEnum => write!(f, "enum selection load"),
            Phase::LoadBinding => write!(f, "binding load"),
            Phase::Query => write!(f, "filter query"),
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum EavaultError {
    #[error("Metadata conflict: {0}")]
    MetadataConflict(String),
    #[error("Unknown metadata: {0}")]
    UnknownMetadata(String),
    #[error("Unknown field {field} for entity type '{entity_type}'")]
    UnknownField { field: u32, entity_type: String },
    #[error("Type mismatch for field {field}: expected {expected}, found {found}")]
    KindMismatch {
        field: u32,
        expected: String,
        found: String,
    },
    #[error("Unknown literal '{literal}' for enum field {field}")]
    UnknownLiteral { field: u32, literal: String },
    #[error("Invalid definition: {0}")]
    InvalidDefinition(String),
    #[error("Invalid identifier: '{0}'")]
    InvalidIdentifier(String),
    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),
    #[error("Unbound parameter at position {0}")]
    UnboundParameter(usize),
    #[error("Storage error during {phase} for {key}: {message}")]
    StorageIo {
        phase: Phase,
        key: String,
        message: String,
    },
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("Data corruption: {message}")]
    DataCorruption { message: String },
    #[error("Nesting depth limit of {0} exceeded")]
    DepthExceeded(usize),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Config error: {0}")]
    Config(String),
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, EavaultError>;

impl EavaultError {
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::DataCorruption {
            message: message.into(),
        }
    }
}

// Helper conversions
impl From<rusqlite::Error> for EavaultError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

impl From<config::ConfigError> for EavaultError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for EavaultError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Lock(e.to_string())
    }
}

/// A (guid, field id) pair as reported in storage errors.
pub struct SlotKey<'a>(pub &'a str, pub u32);

impl fmt::Display for SlotKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.0, self.1)
    }
}

/// Attaches the phase and key of a statement to a failure coming back from
/// a connection, so callers can tell which write or read broke.
pub trait StorageContext<T> {
    fn context(self, phase: Phase, key: impl fmt::Display) -> Result<T>;
}

impl<T> StorageContext<T> for Result<T> {
    fn context(self, phase: Phase, key: impl fmt::Display) -> Result<T> {
        self.map_err(|e| match e {
            // already carries its own context, or is not a storage failure
            EavaultError::StorageIo { .. }
            | EavaultError::Cancelled
            | EavaultError::DepthExceeded(_)
            | EavaultError::MetadataConflict(_)
            | EavaultError::UnknownMetadata(_) => e,
            other => EavaultError::StorageIo {
                phase,
                key: key.to_string(),
                message: other.to_string(),
            },
        })
    }
}

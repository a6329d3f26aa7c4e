// ⚠️ Error Types - Config, Payload and Store failures
// ConfigError aborts a run; PayloadError and StoreError are per-item.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Malformed, cyclic or conflicting profile definitions.
///
/// Detected at load time, before any item is touched.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Profiles directory not found: {0}")]
    MissingDirectory(String),

    #[error("Failed to read {path}: {message}")]
    Read { path: String, message: String },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Profile {profile}: missing required field '{field}'")]
    MissingField { profile: String, field: String },

    #[error("Duplicate profile id: {0}")]
    DuplicateProfile(String),

    #[error("Profile id '{0}' is reserved for the fallback profile")]
    ReservedProfile(String),

    #[error("Profile {profile}: extends unknown profile '{parent}'")]
    UnknownAncestor { profile: String, parent: String },

    #[error("Profile {profile}: parent chain is cyclic ({chain})")]
    CyclicChain { profile: String, chain: String },

    #[error("Match token '{token}' is claimed by both {first} and {second} without distinct priorities")]
    ConflictingToken {
        token: String,
        first: String,
        second: String,
    },

    #[error("Profile {profile}: invalid pattern '{pattern}': {message}")]
    InvalidPattern {
        profile: String,
        pattern: String,
        message: String,
    },

    #[error("Manifest lists unknown profile '{0}'")]
    UnknownManifestEntry(String),

    #[error("No profiles loaded from {0}")]
    Empty(String),
}

/// A stored raw payload that cannot be interpreted.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PayloadError {
    #[error("Payload is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Payload must be a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("Malformed field '{field}': {message}")]
    Malformed { field: String, message: String },
}

/// Storage failures. `WriteConflict` is per-item; the rest bubble up.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Write conflict on item {item_id}: row changed since it was read")]
    WriteConflict { item_id: i64 },

    #[error("Corrupt stored column '{column}' on item {item_id}: {message}")]
    CorruptColumn {
        item_id: i64,
        column: String,
        message: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Payload error: {0}")]
    Payload(#[from] PayloadError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Worker pool error: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Store(StoreError::Database(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Store(StoreError::Serialization(err))
    }
}

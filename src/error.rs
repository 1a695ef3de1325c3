//! Error types for model construction, training and persistence.

use std::path::PathBuf;

use thiserror::Error;

/// Which side of the rating matrix an id belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    User,
    Item,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::User => f.write_str("user"),
            EntityKind::Item => f.write_str("item"),
        }
    }
}

/// Errors surfaced by the model and its collaborators.
#[derive(Debug, Error)]
pub enum ModelError {
    /// A hyper-parameter is out of its legal range.
    #[error("Invalid config: {message}")]
    InvalidConfig { message: String },

    /// Initialization needs at least one observation.
    #[error("Training set is empty")]
    EmptyTrainingSet,

    /// Parameters were requested before `init` or `load`.
    #[error("Model is not initialized")]
    NotInitialized,

    /// Record file length is not a whole number of records.
    #[error("Malformed record file {path:?}: {len} bytes is not a multiple of the record size")]
    MalformedRecordFile { path: PathBuf, len: u64 },

    /// A single observation violates the data model.
    #[error("Invalid record #{index}: {message}")]
    InvalidRecord { index: usize, message: String },

    /// An id points past the allocated parameter columns.
    #[error("{kind} id {id} is outside the fitted range 1..={count}")]
    EntityOutOfRange {
        kind: EntityKind,
        id: u32,
        count: usize,
    },

    /// Artifact belongs to a different model family.
    #[error("Model id mismatch: expected {expected}, found {found}")]
    ModelIdMismatch { expected: i32, found: i32 },

    /// Artifact matrix shape disagrees with the rest of the artifact.
    #[error("Dimension mismatch for {what}: expected {expected}, found {found}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    /// Parameter allocation failed.
    #[error("Failed to allocate {bytes} bytes for {what}")]
    Allocation { what: &'static str, bytes: usize },

    #[error("Worker pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Config(#[from] serde_json::Error),
}

impl ModelError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    pub fn invalid_record(index: usize, message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            index,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ModelError>;

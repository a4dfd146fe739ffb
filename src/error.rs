//! Error taxonomy for vigia
//!
//! Configuration problems fail fast at construction time. Unknown event
//! labels are never errors (they map to the reserved unknown token), and
//! anomaly signals travel through [`crate::detector::AnomalyHandler`], not
//! through this type.

use crate::model_persistence::ModelPersistenceError;
use thiserror::Error;

/// Errors raised by the generator, dataset, training, and session layers
#[derive(Error, Debug)]
pub enum VigiaError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("State machine has no states")]
    EmptyStateMachine,

    #[error("State '{state}' is referenced by '{referenced_by}' but never declared")]
    UnknownState {
        state: String,
        referenced_by: String,
    },

    #[error("State '{0}' is declared more than once")]
    DuplicateState(String),

    #[error("State '{0}' has no outgoing transitions and is not marked terminal")]
    DeadlockState(String),

    #[error("Generator requires at least one entity")]
    NoEntities,

    #[error("Window length must be greater than zero")]
    ZeroWindowLength,

    #[error("Insufficient data for {purpose}: need at least {needed} tokens, got {available}")]
    InsufficientData {
        purpose: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("No trained model in session - train or load one first")]
    ModelNotTrained,

    #[error("Anomaly handler aborted detection: {0}")]
    HandlerAborted(String),

    #[error(transparent)]
    Persistence(#[from] ModelPersistenceError),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, VigiaError>;

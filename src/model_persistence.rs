//! Model persistence for trained next-token detectors
//!
//! A trained predictor is only meaningful together with the vocabulary it
//! was trained on, so both travel in one [`ModelArtifact`]. On disk the
//! artifact is a MessagePack envelope:
//!
//! ```text
//! { format_version, checksum, payload }
//! ```
//!
//! where `payload` is the MessagePack encoding of the artifact and
//! `checksum` is the hex SHA-256 of `payload`. Loading rejects unknown
//! versions and corrupted payloads before any weights are decoded.
//!
//! Reusing a persisted model skips retraining on every run of the learning
//! loop.

use crate::predictor::{NextTokenModel, SequencePredictor};
use crate::state_machine::StateSpec;
use crate::vocabulary::Vocabulary;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

/// Bumped whenever the payload layout changes
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// Errors that can occur during model persistence operations
#[derive(Error, Debug)]
pub enum ModelPersistenceError {
    #[error("Failed to save model: {0}")]
    SaveError(String),

    #[error("Failed to load model: {0}")]
    LoadError(String),

    #[error("Model file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid model format: {0}")]
    InvalidFormat(String),

    #[error("Model version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: String, found: String },

    #[error("Model checksum mismatch: expected {expected}, computed {computed}")]
    ChecksumMismatch { expected: String, computed: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for model persistence operations
pub type Result<T> = std::result::Result<T, ModelPersistenceError>;

/// Metadata for a persisted model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Vigia version that created this model
    pub vigia_version: String,
    /// Seconds since the Unix epoch at training time
    pub trained_at: String,
    /// Number of tokens in the training corpus
    pub training_tokens: usize,
    /// Model and training hyperparameters
    pub hyperparameters: BTreeMap<String, String>,
    /// Digest of the transition table the training corpus was drawn from
    #[serde(default)]
    pub transition_table: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
}

impl ModelMetadata {
    /// Create new metadata with current timestamp
    pub fn new(training_tokens: usize) -> Self {
        Self {
            vigia_version: env!("CARGO_PKG_VERSION").to_string(),
            trained_at: unix_timestamp(),
            training_tokens,
            hyperparameters: BTreeMap::new(),
            transition_table: None,
            name: None,
            description: None,
        }
    }

    pub fn with_hyperparameter(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.hyperparameters.insert(key.into(), value.to_string());
        self
    }

    pub fn with_transition_table(mut self, specs: &[StateSpec]) -> Self {
        self.transition_table = Some(transition_table_digest(specs));
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }
}

/// Hex SHA-256 over a canonical rendering of a transition table
///
/// Successor order is significant, matching the order in which the
/// generator samples successors.
pub fn transition_table_digest(specs: &[StateSpec]) -> String {
    let mut canonical = String::new();
    for spec in specs {
        canonical.push_str(&spec.name);
        canonical.push('\u{1f}');
        canonical.push_str(&spec.next.join("\u{1f}"));
        canonical.push('\u{1e}');
        canonical.push(if spec.terminal { 'T' } else { 'N' });
        canonical.push('\n');
    }
    sha256_hex(canonical.as_bytes())
}

fn unix_timestamp() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}", duration.as_secs())
}

/// Everything needed to run detection after a restart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub vocabulary: Vocabulary,
    pub predictor: SequencePredictor,
    pub metadata: ModelMetadata,
}

impl ModelArtifact {
    pub fn new(vocabulary: Vocabulary, predictor: SequencePredictor, metadata: ModelMetadata) -> Self {
        Self {
            vocabulary,
            predictor,
            metadata,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    format_version: u32,
    checksum: String,
    payload: Vec<u8>,
}

/// Options for saving models
#[derive(Debug, Clone, Default)]
pub struct PersistenceOptions {
    /// Model name, stored in the metadata
    pub name: Option<String>,
    /// Model description, overrides the metadata description when set
    pub description: Option<String>,
}

impl PersistenceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// True when a file exists at `path`; says nothing about its validity
pub fn model_exists(path: impl AsRef<Path>) -> bool {
    path.as_ref().is_file()
}

/// Save an artifact, replacing any existing file atomically
pub fn save_model(
    artifact: &ModelArtifact,
    path: impl AsRef<Path>,
    options: PersistenceOptions,
) -> Result<()> {
    let path = path.as_ref();

    let mut artifact = artifact.clone();
    if let Some(name) = options.name {
        artifact.metadata.name = Some(name);
    }
    if let Some(desc) = options.description {
        artifact.metadata.description = Some(desc);
    }

    let payload = rmp_serde::to_vec_named(&artifact)
        .map_err(|e| ModelPersistenceError::SaveError(e.to_string()))?;
    let envelope = Envelope {
        format_version: ARTIFACT_FORMAT_VERSION,
        checksum: sha256_hex(&payload),
        payload,
    };
    let bytes = rmp_serde::to_vec_named(&envelope)
        .map_err(|e| ModelPersistenceError::SaveError(e.to_string()))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    std::fs::write(&tmp, &bytes)?;
    std::fs::rename(&tmp, path)?;

    info!(
        path = %path.display(),
        bytes = bytes.len(),
        vocab_size = artifact.vocabulary.size(),
        "Saved model"
    );
    Ok(())
}

/// Load and verify an artifact
pub fn load_model(path: impl AsRef<Path>) -> Result<ModelArtifact> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ModelPersistenceError::FileNotFound(
            path.display().to_string(),
        ));
    }

    let bytes = std::fs::read(path)?;
    let envelope: Envelope = rmp_serde::from_slice(&bytes)
        .map_err(|e| ModelPersistenceError::InvalidFormat(e.to_string()))?;

    if envelope.format_version != ARTIFACT_FORMAT_VERSION {
        return Err(ModelPersistenceError::VersionMismatch {
            expected: ARTIFACT_FORMAT_VERSION.to_string(),
            found: envelope.format_version.to_string(),
        });
    }

    let computed = sha256_hex(&envelope.payload);
    if computed != envelope.checksum {
        return Err(ModelPersistenceError::ChecksumMismatch {
            expected: envelope.checksum,
            computed,
        });
    }

    let artifact: ModelArtifact = rmp_serde::from_slice(&envelope.payload)
        .map_err(|e| ModelPersistenceError::LoadError(e.to_string()))?;

    if artifact.predictor.vocab_size() != artifact.vocabulary.size() {
        return Err(ModelPersistenceError::InvalidFormat(format!(
            "predictor covers {} tokens but vocabulary has {}",
            artifact.predictor.vocab_size(),
            artifact.vocabulary.size()
        )));
    }
    artifact
        .predictor
        .validate_shapes()
        .map_err(ModelPersistenceError::InvalidFormat)?;

    debug!(path = %path.display(), "Loaded model");
    Ok(artifact)
}

/// Generate a status line for model information
pub fn model_status_line(metadata: &ModelMetadata) -> String {
    format!(
        "model: vigia v{}, trained on {} tokens",
        metadata.vigia_version, metadata.training_tokens
    )
}

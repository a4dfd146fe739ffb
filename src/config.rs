// Run configuration for the generate/train/detect loop
//
// Every field has a default, so an empty TOML file is a valid configuration.

use crate::bluetooth;
use crate::dataset::WindowedDatasetBuilder;
use crate::error::{Result, VigiaError};
use crate::state_machine::{LabelFormat, StateMachine, StateSpec};
use crate::trainer::TrainerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Complete vigia configuration
///
/// # Example
/// ```
/// use vigia::config::VigiaConfig;
///
/// let config = VigiaConfig::from_toml_str(
///     r#"
///     [detection]
///     threshold = 0.1
///
///     [generator]
///     seed = 7
///     "#,
/// )
/// .unwrap();
/// assert_eq!(config.detection.threshold, 0.1);
/// assert_eq!(config.generator.seed, 7);
/// assert_eq!(config.dataset.window_length, 32); // untouched default
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VigiaConfig {
    pub generator: GeneratorConfig,
    pub dataset: DatasetConfig,
    pub model: ModelConfig,
    pub training: TrainerConfig,
    pub detection: DetectionConfig,
    pub persistence: PersistenceConfig,
    pub state_machine: StateMachineConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeneratorConfig {
    /// Seeds the generator, the shuffle and weight initialization
    pub seed: u64,
    pub entity_count: usize,
    /// Number of events generated per corpus (after the priming prefix)
    pub log_size: usize,
    pub label_format: LabelFormat,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            entity_count: 1,
            log_size: 5000,
            label_format: LabelFormat::State,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatasetConfig {
    pub window_length: usize,
    /// Trailing tokens held out for validation
    pub validation_holdout: usize,
    pub batch_size: usize,
    pub shuffle: bool,
    pub shuffle_buffer: usize,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            window_length: 32,
            validation_holdout: 500,
            batch_size: 8,
            shuffle: true,
            shuffle_buffer: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    pub embedding_dim: usize,
    pub hidden_dim: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            embedding_dim: 8,
            hidden_dim: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectionConfig {
    /// Minimum probability for a token to count as predicted
    pub threshold: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self { threshold: 0.05 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PersistenceConfig {
    pub model_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("vigia-model.vgm"),
        }
    }
}

/// Transition table; defaults to the Bluetooth headset life cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StateMachineConfig {
    pub states: Vec<StateSpec>,
}

impl Default for StateMachineConfig {
    fn default() -> Self {
        Self {
            states: bluetooth::device_specs(),
        }
    }
}

impl VigiaConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Serialize back to TOML, e.g. to print the effective configuration
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| VigiaError::InvalidConfig(e.to_string()))
    }

    /// Fail fast on values that could never produce a training run
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(VigiaError::InvalidConfig(msg));

        if self.generator.entity_count == 0 {
            return Err(VigiaError::NoEntities);
        }
        if self.dataset.window_length == 0 {
            return Err(VigiaError::ZeroWindowLength);
        }
        if self.dataset.batch_size == 0 {
            return invalid("batch_size must be > 0".to_string());
        }
        if self.dataset.shuffle && self.dataset.shuffle_buffer == 0 {
            return invalid("shuffle_buffer must be > 0 when shuffling".to_string());
        }

        let block = self.dataset.window_length + 1;
        if self.dataset.validation_holdout < block {
            return invalid(format!(
                "validation_holdout ({}) must cover at least one window of {} tokens",
                self.dataset.validation_holdout, block
            ));
        }
        if self.generator.log_size < self.dataset.validation_holdout + block {
            return invalid(format!(
                "log_size ({}) must exceed validation_holdout + one window ({})",
                self.generator.log_size,
                self.dataset.validation_holdout + block
            ));
        }

        if self.model.embedding_dim == 0 || self.model.hidden_dim == 0 {
            return invalid("embedding_dim and hidden_dim must be > 0".to_string());
        }
        self.training.validate().map_err(VigiaError::InvalidConfig)?;

        let threshold = self.detection.threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return invalid(format!("threshold must be in (0, 1], got {}", threshold));
        }

        self.state_machine()?;
        Ok(())
    }

    pub fn state_machine(&self) -> Result<StateMachine> {
        StateMachine::new(&self.state_machine.states)
    }

    pub fn dataset_builder(&self) -> Result<WindowedDatasetBuilder> {
        let builder =
            WindowedDatasetBuilder::new(self.dataset.window_length, self.dataset.batch_size)?;
        if self.dataset.shuffle {
            builder.with_shuffle(self.generator.seed, self.dataset.shuffle_buffer)
        } else {
            Ok(builder)
        }
    }
}

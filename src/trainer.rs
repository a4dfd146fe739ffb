//! Training loop with early stopping
//!
//! Each pass performs one Adam update per batch over the full training set,
//! then scores the held-out windows. The best validation loss is tracked;
//! after `patience` passes without improvement training stops and the
//! parameters from the best pass are restored. Hitting `max_passes` is not an
//! error: the best weights observed are restored and a warning is logged.

use crate::dataset::{Batch, TrainingWindow};
use crate::error::{Result, VigiaError};
use crate::predictor::{Gradients, SequencePredictor};
use serde::{Deserialize, Serialize};

/// Optimizer and stopping settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainerConfig {
    pub learning_rate: f64,
    pub max_passes: usize,
    /// Passes without validation improvement before stopping
    pub patience: usize,
    /// Global gradient-norm clip (0 disables clipping)
    pub grad_clip: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            max_passes: 30,
            patience: 3,
            grad_clip: 5.0,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        }
    }
}

impl TrainerConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            ));
        }
        if self.max_passes == 0 {
            return Err("max_passes must be >= 1".to_string());
        }
        if self.patience == 0 {
            return Err("patience must be >= 1".to_string());
        }
        if self.grad_clip < 0.0 {
            return Err(format!(
                "grad_clip must be non-negative, got {}",
                self.grad_clip
            ));
        }
        if !(0.0..1.0).contains(&self.beta1) || !(0.0..1.0).contains(&self.beta2) {
            return Err("beta1 and beta2 must be in [0, 1)".to_string());
        }
        Ok(())
    }
}

/// Loss figures for one pass
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PassRecord {
    pub pass: usize,
    pub train_loss: f64,
    pub validation_loss: f64,
}

/// Why training ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    /// Validation loss stalled for `patience` passes
    EarlyStopped,
    /// Pass cap reached without triggering early stopping
    MaxPasses,
}

/// Outcome of a training run
#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub history: Vec<PassRecord>,
    /// 1-based pass whose weights were kept
    pub best_pass: usize,
    pub best_validation_loss: f64,
    pub stop_reason: StopReason,
}

impl TrainingReport {
    pub fn passes_run(&self) -> usize {
        self.history.len()
    }
}

/// Adam moment estimates, one buffer per parameter tensor
struct AdamState {
    m: Vec<Vec<f64>>,
    v: Vec<Vec<f64>>,
    t: i32,
}

impl AdamState {
    fn new(model: &SequencePredictor) -> Self {
        let zeros: Vec<Vec<f64>> = model.tensors().iter().map(|t| vec![0.0; t.len()]).collect();
        Self {
            m: zeros.clone(),
            v: zeros,
            t: 0,
        }
    }

    fn apply(&mut self, model: &mut SequencePredictor, grads: &Gradients, cfg: &TrainerConfig) {
        self.t += 1;
        let b1c = 1.0 - cfg.beta1.powi(self.t);
        let b2c = 1.0 - cfg.beta2.powi(self.t);

        let params = model.tensors_mut();
        let grad_tensors = grads.tensors();
        for (k, param) in params.into_iter().enumerate() {
            let (m, v) = (&mut self.m[k], &mut self.v[k]);
            for (i, (x, &g)) in param.iter_mut().zip(grad_tensors[k]).enumerate() {
                m[i] = cfg.beta1 * m[i] + (1.0 - cfg.beta1) * g;
                v[i] = cfg.beta2 * v[i] + (1.0 - cfg.beta2) * g * g;
                let m_hat = m[i] / b1c;
                let v_hat = v[i] / b2c;
                *x -= cfg.learning_rate * m_hat / (v_hat.sqrt() + cfg.epsilon);
            }
        }
    }
}

/// Gradient-based trainer for [`SequencePredictor`]
#[derive(Debug, Clone, Default)]
pub struct Trainer {
    config: TrainerConfig,
}

impl Trainer {
    pub fn new(config: TrainerConfig) -> Result<Self> {
        config.validate().map_err(VigiaError::InvalidConfig)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Optimize `predictor` in place
    ///
    /// On return `predictor` holds the parameters of the pass with the lowest
    /// validation loss.
    pub fn train(
        &self,
        predictor: &mut SequencePredictor,
        train_batches: &[Batch],
        valid_windows: &[TrainingWindow],
    ) -> Result<TrainingReport> {
        let train_windows: usize = train_batches.iter().map(Vec::len).sum();
        if train_windows == 0 {
            return Err(VigiaError::InsufficientData {
                purpose: "training windows",
                needed: 1,
                available: 0,
            });
        }
        if valid_windows.is_empty() {
            return Err(VigiaError::InsufficientData {
                purpose: "validation windows",
                needed: 1,
                available: 0,
            });
        }

        tracing::info!(
            batches = train_batches.len(),
            windows = train_windows,
            validation_windows = valid_windows.len(),
            parameters = predictor.num_parameters(),
            "Starting training"
        );

        let cfg = &self.config;
        let mut adam = AdamState::new(predictor);
        let mut best = predictor.clone();
        let mut best_loss = f64::INFINITY;
        let mut best_pass = 0;
        let mut stale = 0;
        let mut history = Vec::new();
        let mut stop_reason = StopReason::MaxPasses;

        for pass in 1..=cfg.max_passes {
            let mut loss_sum = 0.0;
            for batch in train_batches.iter().filter(|b| !b.is_empty()) {
                let mut grads = predictor.zeros_like();
                let scale = 1.0 / batch.len() as f64;
                for window in batch {
                    loss_sum += predictor.accumulate_gradients(window, &mut grads, scale);
                }
                clip_gradients(&mut grads, cfg.grad_clip);
                adam.apply(predictor, &grads, cfg);
            }

            let record = PassRecord {
                pass,
                train_loss: loss_sum / train_windows as f64,
                validation_loss: predictor.mean_loss(valid_windows),
            };
            tracing::debug!(
                pass,
                train_loss = record.train_loss,
                validation_loss = record.validation_loss,
                "Training pass complete"
            );
            history.push(record);

            if record.validation_loss < best_loss {
                best_loss = record.validation_loss;
                best_pass = pass;
                best = predictor.clone();
                stale = 0;
            } else {
                stale += 1;
                if stale >= cfg.patience {
                    stop_reason = StopReason::EarlyStopped;
                    break;
                }
            }
        }

        *predictor = best;

        match stop_reason {
            StopReason::EarlyStopped => tracing::info!(
                best_pass,
                best_validation_loss = best_loss,
                passes = history.len(),
                "Early stopping, restored best weights"
            ),
            StopReason::MaxPasses => tracing::warn!(
                best_pass,
                best_validation_loss = best_loss,
                max_passes = cfg.max_passes,
                "Reached pass cap without early stopping, keeping best weights observed"
            ),
        }

        Ok(TrainingReport {
            history,
            best_pass,
            best_validation_loss: best_loss,
            stop_reason,
        })
    }
}

/// Rescale gradients so their global norm does not exceed `max_norm`
fn clip_gradients(grads: &mut Gradients, max_norm: f64) {
    if max_norm <= 0.0 {
        return;
    }
    let norm = grads.l2_norm();
    if norm > max_norm {
        grads.scale(max_norm / norm);
    }
}

// Shared helpers for integration tests

#![allow(dead_code)]

use std::cell::Cell;
use std::path::Path;
use vigia::config::VigiaConfig;
use vigia::predictor::NextTokenModel;
use vigia::state_machine::StateSpec;
use vigia::vocabulary::TokenId;

/// Small but well-converging training setup
pub fn scenario_config(model_path: &Path) -> VigiaConfig {
    let mut config = VigiaConfig::default();
    config.generator.seed = 17;
    config.generator.log_size = 4000;
    config.dataset.window_length = 16;
    config.dataset.validation_holdout = 400;
    config.dataset.batch_size = 8;
    config.model.embedding_dim = 8;
    config.model.hidden_dim = 16;
    config.training.learning_rate = 0.02;
    config.training.max_passes = 30;
    config.training.patience = 5;
    config.persistence.model_path = model_path.to_path_buf();
    config
}

/// Fast, barely trained setup for CLI and plumbing tests
pub fn quick_config(model_path: &Path) -> VigiaConfig {
    let mut config = VigiaConfig::default();
    config.generator.log_size = 400;
    config.dataset.window_length = 8;
    config.dataset.validation_holdout = 90;
    config.dataset.batch_size = 4;
    config.model.embedding_dim = 4;
    config.model.hidden_dim = 8;
    config.training.max_passes = 2;
    config.persistence.model_path = model_path.to_path_buf();
    config
}

pub fn with_states(mut config: VigiaConfig, states: Vec<StateSpec>) -> VigiaConfig {
    config.state_machine.states = states;
    config
}

/// Wraps a model and counts `step` invocations
pub struct CountingModel<'m, M> {
    pub inner: &'m M,
    pub calls: Cell<usize>,
}

impl<'m, M> CountingModel<'m, M> {
    pub fn new(inner: &'m M) -> Self {
        Self {
            inner,
            calls: Cell::new(0),
        }
    }
}

impl<M: NextTokenModel> NextTokenModel for CountingModel<'_, M> {
    type State = M::State;

    fn vocab_size(&self) -> usize {
        self.inner.vocab_size()
    }

    fn step(&self, token: TokenId, state: Option<&M::State>) -> (Vec<f64>, M::State) {
        self.calls.set(self.calls.get() + 1);
        self.inner.step(token, state)
    }
}

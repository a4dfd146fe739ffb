//! Recurrent next-token predictor
//!
//! A single-layer Elman network:
//!
//! ```text
//! e_t = E[x_t]                                  (embedding lookup)
//! h_t = tanh(W_xh · e_t + W_hh · h_{t-1} + b_h)  (recurrent transition)
//! p_t = softmax(W_hy · h_t + b_y)               (classification head)
//! ```
//!
//! The predictor keeps no mutable state between calls. Streaming callers
//! thread the [`HiddenState`] returned by [`SequencePredictor::step`] into the
//! next call, which keeps detection linear in sequence length and makes every
//! scan restartable from a zero state.
//!
//! Training uses truncated backpropagation through time over one window at a
//! time (see [`SequencePredictor::accumulate_gradients`]).

use crate::dataset::TrainingWindow;
use crate::error::{Result, VigiaError};
use crate::vocabulary::{TokenId, UNKNOWN_ID};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Anything that can score the next token given an explicitly carried state
///
/// The detector depends only on this trait, so ground-truth models and
/// instrumented wrappers can stand in for the trained network.
pub trait NextTokenModel {
    /// Carried history; opaque to callers
    type State: Clone;

    /// Size of the distribution returned by [`NextTokenModel::step`]
    fn vocab_size(&self) -> usize;

    /// Consume one token; `None` means "start of sequence"
    fn step(&self, token: TokenId, state: Option<&Self::State>) -> (Vec<f64>, Self::State);
}

/// Recurrent hidden state vector
#[derive(Debug, Clone, PartialEq)]
pub struct HiddenState(Vec<f64>);

impl HiddenState {
    pub fn zeros(dim: usize) -> Self {
        Self(vec![0.0; dim])
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }
}

/// Dense row-major matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Xavier-uniform initialization
    fn xavier(rows: usize, cols: usize, rng: &mut StdRng) -> Self {
        let scale = (6.0 / (rows as f64 + cols as f64)).sqrt();
        Self {
            rows,
            cols,
            data: (0..rows * cols)
                .map(|_| rng.gen_range(-scale..scale))
                .collect(),
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    fn check(&self, name: &str, rows: usize, cols: usize) -> std::result::Result<(), String> {
        if self.data.len() != self.rows * self.cols {
            return Err(format!(
                "{} holds {} values for a {}x{} matrix",
                name,
                self.data.len(),
                self.rows,
                self.cols
            ));
        }
        if (self.rows, self.cols) != (rows, cols) {
            return Err(format!(
                "{} is {}x{}, expected {}x{}",
                name, self.rows, self.cols, rows, cols
            ));
        }
        Ok(())
    }

    #[inline]
    pub fn row(&self, r: usize) -> &[f64] {
        &self.data[r * self.cols..(r + 1) * self.cols]
    }

    #[inline]
    fn row_mut(&mut self, r: usize) -> &mut [f64] {
        &mut self.data[r * self.cols..(r + 1) * self.cols]
    }

    /// `out += self · v`
    fn mul_vec_add(&self, v: &[f64], out: &mut [f64]) {
        for (r, o) in out.iter_mut().enumerate() {
            *o += dot(self.row(r), v);
        }
    }

    /// `out += selfᵀ · v`
    fn mul_t_vec_add(&self, v: &[f64], out: &mut [f64]) {
        for (r, &scale) in v.iter().enumerate() {
            if scale == 0.0 {
                continue;
            }
            for (o, &w) in out.iter_mut().zip(self.row(r)) {
                *o += w * scale;
            }
        }
    }

    /// `self += a ⊗ b`
    fn add_outer(&mut self, a: &[f64], b: &[f64]) {
        for (r, &ar) in a.iter().enumerate() {
            if ar == 0.0 {
                continue;
            }
            for (w, &bc) in self.row_mut(r).iter_mut().zip(b) {
                *w += ar * bc;
            }
        }
    }
}

#[inline]
fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Numerically stable softmax
pub fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|&z| (z - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Model parameters; also the gradient accumulator layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencePredictor {
    embedding: Matrix,
    w_xh: Matrix,
    w_hh: Matrix,
    b_h: Vec<f64>,
    w_hy: Matrix,
    b_y: Vec<f64>,
}

/// Gradients with the same shapes as a [`SequencePredictor`]
pub type Gradients = SequencePredictor;

/// Activations cached by the forward pass for backpropagation
struct ForwardTrace {
    tokens: Vec<TokenId>,
    hidden: Vec<Vec<f64>>,
    probs: Vec<Vec<f64>>,
}

impl SequencePredictor {
    /// Create a predictor with seeded Xavier-uniform weights
    pub fn new(
        vocab_size: usize,
        embedding_dim: usize,
        hidden_dim: usize,
        seed: u64,
    ) -> Result<Self> {
        if vocab_size == 0 || embedding_dim == 0 || hidden_dim == 0 {
            return Err(VigiaError::InvalidConfig(format!(
                "predictor dimensions must be > 0 (vocab={}, embedding={}, hidden={})",
                vocab_size, embedding_dim, hidden_dim
            )));
        }

        let mut rng = StdRng::seed_from_u64(seed);
        Ok(Self {
            embedding: Matrix::xavier(vocab_size, embedding_dim, &mut rng),
            w_xh: Matrix::xavier(hidden_dim, embedding_dim, &mut rng),
            w_hh: Matrix::xavier(hidden_dim, hidden_dim, &mut rng),
            b_h: vec![0.0; hidden_dim],
            w_hy: Matrix::xavier(vocab_size, hidden_dim, &mut rng),
            b_y: vec![0.0; vocab_size],
        })
    }

    /// All-zero parameters shaped like `self` (gradient accumulator)
    pub fn zeros_like(&self) -> Gradients {
        Self {
            embedding: Matrix::zeros(self.embedding.rows, self.embedding.cols),
            w_xh: Matrix::zeros(self.w_xh.rows, self.w_xh.cols),
            w_hh: Matrix::zeros(self.w_hh.rows, self.w_hh.cols),
            b_h: vec![0.0; self.b_h.len()],
            w_hy: Matrix::zeros(self.w_hy.rows, self.w_hy.cols),
            b_y: vec![0.0; self.b_y.len()],
        }
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding.cols
    }

    pub fn hidden_dim(&self) -> usize {
        self.w_hh.rows
    }

    /// Check that every tensor agrees with the embedding and hidden sizes
    ///
    /// Deserialized predictors are not checked on decode; call this before
    /// stepping a predictor read from outside the process.
    pub fn validate_shapes(&self) -> std::result::Result<(), String> {
        let vocab = self.embedding.rows;
        let embedding = self.embedding.cols;
        let hidden = self.w_xh.rows;
        if vocab == 0 || embedding == 0 || hidden == 0 {
            return Err(format!(
                "empty dimension (vocab={}, embedding={}, hidden={})",
                vocab, embedding, hidden
            ));
        }

        self.embedding.check("embedding", vocab, embedding)?;
        self.w_xh.check("w_xh", hidden, embedding)?;
        self.w_hh.check("w_hh", hidden, hidden)?;
        self.w_hy.check("w_hy", vocab, hidden)?;
        if self.b_h.len() != hidden {
            return Err(format!("b_h has {} values, expected {}", self.b_h.len(), hidden));
        }
        if self.b_y.len() != vocab {
            return Err(format!("b_y has {} values, expected {}", self.b_y.len(), vocab));
        }
        Ok(())
    }

    pub fn num_parameters(&self) -> usize {
        self.tensors().iter().map(|t| t.len()).sum()
    }

    /// Flat parameter views in a fixed order
    pub fn tensors(&self) -> [&[f64]; 6] {
        [
            self.embedding.data.as_slice(),
            self.w_xh.data.as_slice(),
            self.w_hh.data.as_slice(),
            self.b_h.as_slice(),
            self.w_hy.data.as_slice(),
            self.b_y.as_slice(),
        ]
    }

    /// Mutable flat parameter views, same order as [`Self::tensors`]
    pub fn tensors_mut(&mut self) -> [&mut [f64]; 6] {
        [
            self.embedding.data.as_mut_slice(),
            self.w_xh.data.as_mut_slice(),
            self.w_hh.data.as_mut_slice(),
            self.b_h.as_mut_slice(),
            self.w_hy.data.as_mut_slice(),
            self.b_y.as_mut_slice(),
        ]
    }

    /// Euclidean norm over every parameter
    pub fn l2_norm(&self) -> f64 {
        self.tensors()
            .iter()
            .flat_map(|t| t.iter())
            .map(|v| v * v)
            .sum::<f64>()
            .sqrt()
    }

    /// Multiply every parameter by `factor`
    pub fn scale(&mut self, factor: f64) {
        for tensor in self.tensors_mut() {
            tensor.iter_mut().for_each(|v| *v *= factor);
        }
    }

    #[inline]
    fn clamp_token(&self, token: TokenId) -> TokenId {
        if token < self.embedding.rows {
            token
        } else {
            UNKNOWN_ID
        }
    }

    /// Recurrent transition for one token
    fn transition(&self, token: TokenId, prev: &[f64]) -> Vec<f64> {
        let mut pre = self.b_h.clone();
        self.w_xh.mul_vec_add(self.embedding.row(token), &mut pre);
        self.w_hh.mul_vec_add(prev, &mut pre);
        pre.into_iter().map(f64::tanh).collect()
    }

    /// Classification head
    fn head(&self, hidden: &[f64]) -> Vec<f64> {
        let mut logits = self.b_y.clone();
        self.w_hy.mul_vec_add(hidden, &mut logits);
        softmax(&logits)
    }

    /// Consume one token and return `(distribution, new_state)`
    ///
    /// A `None` state starts from zeros. Token ids outside the vocabulary are
    /// read as the unknown token. A supplied state must come from a predictor
    /// with the same hidden size.
    pub fn step(&self, token: TokenId, state: Option<&HiddenState>) -> (Vec<f64>, HiddenState) {
        let token = self.clamp_token(token);
        let zeros;
        let prev: &[f64] = match state {
            Some(s) => {
                debug_assert_eq!(s.dim(), self.hidden_dim(), "hidden state size mismatch");
                &s.0
            }
            None => {
                zeros = vec![0.0; self.hidden_dim()];
                &zeros
            }
        };

        let hidden = self.transition(token, prev);
        let probs = self.head(&hidden);
        (probs, HiddenState(hidden))
    }

    /// Apply [`Self::step`] across `tokens`, one distribution per position
    pub fn predict_window(
        &self,
        tokens: &[TokenId],
        state: Option<&HiddenState>,
    ) -> (Vec<Vec<f64>>, HiddenState) {
        let mut current = state.cloned().unwrap_or_else(|| HiddenState::zeros(self.hidden_dim()));
        let mut outputs = Vec::with_capacity(tokens.len());
        for &token in tokens {
            let (probs, next) = self.step(token, Some(&current));
            outputs.push(probs);
            current = next;
        }
        (outputs, current)
    }

    fn forward_trace(&self, tokens: &[TokenId]) -> ForwardTrace {
        let mut hidden = Vec::with_capacity(tokens.len() + 1);
        hidden.push(vec![0.0; self.hidden_dim()]);
        let mut probs = Vec::with_capacity(tokens.len());
        let tokens: Vec<TokenId> = tokens.iter().map(|&t| self.clamp_token(t)).collect();

        for &token in &tokens {
            let h = self.transition(token, &hidden[hidden.len() - 1]);
            probs.push(self.head(&h));
            hidden.push(h);
        }

        ForwardTrace {
            tokens,
            hidden,
            probs,
        }
    }

    /// Mean categorical cross-entropy of a window, starting from a zero state
    pub fn window_loss(&self, window: &TrainingWindow) -> f64 {
        if window.is_empty() {
            return 0.0;
        }
        let (probs, _) = self.predict_window(&window.input, None);
        let total: f64 = probs
            .iter()
            .zip(&window.target)
            .map(|(p, &y)| cross_entropy(p, self.clamp_token(y)))
            .sum();
        total / window.len() as f64
    }

    /// Mean window loss over a set of windows
    pub fn mean_loss(&self, windows: &[TrainingWindow]) -> f64 {
        if windows.is_empty() {
            return 0.0;
        }
        windows.iter().map(|w| self.window_loss(w)).sum::<f64>() / windows.len() as f64
    }

    /// Backpropagate one window's mean cross-entropy into `grads`
    ///
    /// Gradients are multiplied by `scale` before accumulation (use
    /// `1 / batch_len` to average over a batch). Returns the window's mean
    /// loss.
    pub fn accumulate_gradients(
        &self,
        window: &TrainingWindow,
        grads: &mut Gradients,
        scale: f64,
    ) -> f64 {
        let steps = window.len();
        if steps == 0 {
            return 0.0;
        }

        let trace = self.forward_trace(&window.input);
        let norm = scale / steps as f64;
        let hidden_dim = self.hidden_dim();
        let mut dh_next = vec![0.0; hidden_dim];
        let mut loss = 0.0;

        for t in (0..steps).rev() {
            let target = self.clamp_token(window.target[t]);
            let probs = &trace.probs[t];
            let h = &trace.hidden[t + 1];
            let h_prev = &trace.hidden[t];
            loss += cross_entropy(probs, target);

            // Softmax + cross-entropy: dz = p - onehot(y)
            let mut dz: Vec<f64> = probs.iter().map(|p| p * norm).collect();
            dz[target] -= norm;

            grads.w_hy.add_outer(&dz, h);
            for (g, d) in grads.b_y.iter_mut().zip(&dz) {
                *g += d;
            }

            let mut dh = dh_next.clone();
            self.w_hy.mul_t_vec_add(&dz, &mut dh);

            // tanh'(a) = 1 - h²
            let da: Vec<f64> = dh
                .iter()
                .zip(h)
                .map(|(d, hv)| d * (1.0 - hv * hv))
                .collect();

            let token = trace.tokens[t];
            grads.w_xh.add_outer(&da, self.embedding.row(token));
            grads.w_hh.add_outer(&da, h_prev);
            for (g, d) in grads.b_h.iter_mut().zip(&da) {
                *g += d;
            }

            let mut de = vec![0.0; self.embedding_dim()];
            self.w_xh.mul_t_vec_add(&da, &mut de);
            for (g, d) in grads.embedding.row_mut(token).iter_mut().zip(&de) {
                *g += d;
            }

            dh_next.iter_mut().for_each(|v| *v = 0.0);
            self.w_hh.mul_t_vec_add(&da, &mut dh_next);
        }

        loss / steps as f64
    }
}

impl NextTokenModel for SequencePredictor {
    type State = HiddenState;

    fn vocab_size(&self) -> usize {
        self.embedding.rows
    }

    fn step(&self, token: TokenId, state: Option<&HiddenState>) -> (Vec<f64>, HiddenState) {
        SequencePredictor::step(self, token, state)
    }
}

#[inline]
fn cross_entropy(probs: &[f64], target: TokenId) -> f64 {
    -probs[target].max(1e-12).ln()
}

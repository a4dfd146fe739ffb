//! Windowed next-token datasets
//!
//! A token sequence is cut into consecutive, non-overlapping blocks of
//! `window_length + 1` tokens. Each block yields one training window whose
//! target is the input shifted by one position. Shuffling permutes whole
//! windows, never the tokens inside them.

use crate::error::{Result, VigiaError};
use crate::vocabulary::TokenId;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// One supervised example: `target[i] == input[i + 1]` over the source block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingWindow {
    pub input: Vec<TokenId>,
    pub target: Vec<TokenId>,
}

impl TrainingWindow {
    /// Split a block of `L + 1` tokens into its shifted input/target pair
    pub fn from_block(block: &[TokenId]) -> Self {
        debug_assert!(block.len() >= 2, "block must hold at least two tokens");
        Self {
            input: block[..block.len() - 1].to_vec(),
            target: block[1..].to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.input.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input.is_empty()
    }
}

/// Windows grouped for one optimizer update
pub type Batch = Vec<TrainingWindow>;

/// Training and held-out validation token sequences
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetSplit {
    pub train: Vec<TokenId>,
    pub validation: Vec<TokenId>,
}

/// Hold out the last `holdout` tokens as a separate validation sequence
///
/// The split happens before windowing, so no window straddles the boundary.
pub fn split_holdout(tokens: &[TokenId], holdout: usize) -> Result<DatasetSplit> {
    if holdout >= tokens.len() {
        return Err(VigiaError::InsufficientData {
            purpose: "train/validation split",
            needed: holdout + 1,
            available: tokens.len(),
        });
    }

    let (train, validation) = tokens.split_at(tokens.len() - holdout);
    Ok(DatasetSplit {
        train: train.to_vec(),
        validation: validation.to_vec(),
    })
}

/// Seeded shuffle settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShuffleOptions {
    pub seed: u64,
    /// Number of windows held in the shuffle buffer
    pub buffer_size: usize,
}

/// Builds windowed, optionally shuffled, batched datasets
#[derive(Debug, Clone)]
pub struct WindowedDatasetBuilder {
    window_length: usize,
    batch_size: usize,
    shuffle: Option<ShuffleOptions>,
}

impl WindowedDatasetBuilder {
    pub fn new(window_length: usize, batch_size: usize) -> Result<Self> {
        if window_length == 0 {
            return Err(VigiaError::ZeroWindowLength);
        }
        if batch_size == 0 {
            return Err(VigiaError::InvalidConfig(
                "batch_size must be > 0".to_string(),
            ));
        }

        Ok(Self {
            window_length,
            batch_size,
            shuffle: None,
        })
    }

    pub fn with_shuffle(mut self, seed: u64, buffer_size: usize) -> Result<Self> {
        if buffer_size == 0 {
            return Err(VigiaError::InvalidConfig(
                "shuffle_buffer must be > 0 when shuffling".to_string(),
            ));
        }
        self.shuffle = Some(ShuffleOptions { seed, buffer_size });
        Ok(self)
    }

    pub fn window_length(&self) -> usize {
        self.window_length
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Minimum number of tokens that yields one window
    pub fn block_length(&self) -> usize {
        self.window_length + 1
    }

    /// Cut `tokens` into windows in sequence order, dropping the partial tail
    pub fn windows(&self, tokens: &[TokenId]) -> Vec<TrainingWindow> {
        tokens
            .chunks_exact(self.block_length())
            .map(TrainingWindow::from_block)
            .collect()
    }

    /// Windows, shuffled when configured, grouped into batches
    pub fn build(&self, tokens: &[TokenId]) -> Vec<Batch> {
        let mut windows = self.windows(tokens);
        if let Some(options) = self.shuffle {
            windows = buffered_shuffle(windows, options);
        }

        let mut batches = Vec::with_capacity(windows.len().div_ceil(self.batch_size));
        let mut iter = windows.into_iter().peekable();
        while iter.peek().is_some() {
            batches.push(iter.by_ref().take(self.batch_size).collect());
        }
        batches
    }
}

/// One-shot helper: `build(tokens, window_length, shuffle, seed)`
///
/// Uses a shuffle buffer covering the whole sequence and a batch size of one,
/// so each returned batch holds a single window.
pub fn build(
    tokens: &[TokenId],
    window_length: usize,
    shuffle: bool,
    seed: u64,
) -> Result<Vec<TrainingWindow>> {
    let mut builder = WindowedDatasetBuilder::new(window_length, 1)?;
    if shuffle {
        let blocks = (tokens.len() / (window_length + 1)).max(1);
        builder = builder.with_shuffle(seed, blocks)?;
    }
    Ok(builder.build(tokens).into_iter().flatten().collect())
}

/// Streaming shuffle with a bounded buffer
///
/// The buffer is filled with the first `buffer_size` items; each output is a
/// uniformly drawn buffer slot, which is then refilled from the input. A
/// buffer at least as large as the input is a uniform full shuffle.
fn buffered_shuffle<T>(items: Vec<T>, options: ShuffleOptions) -> Vec<T> {
    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut source = items.into_iter();
    let mut buffer: Vec<T> = source.by_ref().take(options.buffer_size).collect();
    let mut out = Vec::with_capacity(buffer.len() + source.len());

    while !buffer.is_empty() {
        let slot = rng.gen_range(0..buffer.len());
        match source.next() {
            Some(next) => out.push(std::mem::replace(&mut buffer[slot], next)),
            None => out.push(buffer.swap_remove(slot)),
        }
    }

    out
}

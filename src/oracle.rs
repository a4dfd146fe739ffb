//! Ground-truth next-token model
//!
//! [`TransitionOracle`] derives the exact next-event distribution of a single
//! entity's random walk from the state machine itself. It implements the
//! same [`NextTokenModel`] seam as the trained predictor, so detector
//! behavior can be checked against ground truth (a perfectly trained model)
//! and thresholds can be swept without any training noise.

use crate::predictor::NextTokenModel;
use crate::state_machine::StateMachine;
use crate::vocabulary::{TokenId, Vocabulary};

/// Exact `P(next | current)` for a single-entity, bare-state-label stream
#[derive(Debug, Clone)]
pub struct TransitionOracle {
    /// Per token id: the successor distribution
    rows: Vec<Vec<f64>>,
}

impl TransitionOracle {
    pub fn new(machine: &StateMachine, vocabulary: &Vocabulary) -> Self {
        let size = vocabulary.size();
        let uniform = vec![1.0 / size as f64; size];

        let rows = vocabulary
            .labels()
            .iter()
            .map(|label| {
                let Some(state) = machine.index_of(label) else {
                    return uniform.clone();
                };
                let targets: Vec<TokenId> = machine
                    .successors(state)
                    .iter()
                    .filter_map(|&s| vocabulary.id_of(machine.state_name(s)))
                    .collect();
                if targets.is_empty() {
                    return uniform.clone();
                }

                let mut row = vec![0.0; size];
                let p = 1.0 / targets.len() as f64;
                for id in targets {
                    row[id] = p;
                }
                row
            })
            .collect();

        Self { rows }
    }
}

impl NextTokenModel for TransitionOracle {
    type State = ();

    fn vocab_size(&self) -> usize {
        self.rows.len()
    }

    fn step(&self, token: TokenId, _state: Option<&()>) -> (Vec<f64>, ()) {
        let row = self.rows.get(token).unwrap_or(&self.rows[0]);
        (row.clone(), ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> StateMachine {
        StateMachine::from_table(&[
            ("off", &["on"]),
            ("on", &["off", "standby"]),
            ("standby", &["on"]),
        ])
        .unwrap()
    }

    #[test]
    fn test_rows_are_uniform_over_successors() {
        let vocab = Vocabulary::adapt(["off\non\nstandby"]);
        let oracle = TransitionOracle::new(&machine(), &vocab);

        let (probs, ()) = oracle.step(vocab.id_of("on").unwrap(), None);
        assert_eq!(probs[vocab.id_of("off").unwrap()], 0.5);
        assert_eq!(probs[vocab.id_of("standby").unwrap()], 0.5);
        assert_eq!(probs[vocab.id_of("on").unwrap()], 0.0);
    }

    #[test]
    fn test_unknown_token_is_uniform() {
        let vocab = Vocabulary::adapt(["off\non"]);
        let oracle = TransitionOracle::new(&machine(), &vocab);
        let (probs, ()) = oracle.step(0, None);
        assert!(probs.iter().all(|&p| (p - 1.0 / 3.0).abs() < 1e-12));
        assert_eq!(oracle.step(42, None), oracle.step(0, None));
    }

    #[test]
    fn test_unobserved_successors_are_ignored() {
        // "standby" never appeared in the corpus
        let vocab = Vocabulary::adapt(["off\non"]);
        let oracle = TransitionOracle::new(&machine(), &vocab);
        let (probs, ()) = oracle.step(vocab.id_of("on").unwrap(), None);
        assert_eq!(probs[vocab.id_of("off").unwrap()], 1.0);
    }
}

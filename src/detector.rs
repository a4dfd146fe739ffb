//! Streaming next-token anomaly detection
//!
//! The detector walks a token sequence once, carrying the model state
//! explicitly from token to token. After each token it records the set of
//! ids whose predicted probability reaches the threshold; the next token is
//! anomalous when it falls outside that set. The first token of a scan is
//! never checked because no prediction exists yet.
//!
//! ```text
//!  AwaitingFirstToken --token--> Steady --token--> Steady ...
//!         (no check)               (check against previous prediction set)
//! ```
//!
//! Anomalies are delivered synchronously through an [`AnomalyHandler`]. A
//! handler error aborts the scan and is returned unchanged to the caller.

use crate::predictor::NextTokenModel;
use crate::vocabulary::{TokenId, Vocabulary};
use serde::Serialize;
use std::collections::BTreeSet;
use std::convert::Infallible;

/// Snapshot produced once per offending token
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnomalyReport {
    /// Every token consumed so far, including the offending one
    pub sequence: Vec<TokenId>,
    pub offending_token: TokenId,
    /// Ids the model considered plausible before the offending token
    pub predicted_tokens: BTreeSet<TokenId>,
}

impl AnomalyReport {
    /// Position of the offending token within the scanned sequence
    pub fn position(&self) -> usize {
        self.sequence.len() - 1
    }

    /// Label of the token immediately before the offending one
    pub fn previous_label<'v>(&self, vocabulary: &'v Vocabulary) -> Option<&'v str> {
        let prev = self.sequence.len().checked_sub(2)?;
        vocabulary.label(self.sequence[prev])
    }

    pub fn offending_label<'v>(&self, vocabulary: &'v Vocabulary) -> Option<&'v str> {
        vocabulary.label(self.offending_token)
    }

    /// Human-readable description
    pub fn render(&self, vocabulary: &Vocabulary) -> String {
        let expected: Vec<&str> = self
            .predicted_tokens
            .iter()
            .map(|&id| vocabulary.label(id).unwrap_or("?"))
            .collect();
        format!(
            "ANOMALY at position {}: {} -> {}\n  Expected one of: [{}]",
            self.position(),
            self.previous_label(vocabulary).unwrap_or("<start>"),
            self.offending_label(vocabulary).unwrap_or("?"),
            expected.join(", ")
        )
    }
}

/// Receives anomaly reports during a scan
///
/// Closures of the form `FnMut(AnomalyReport) -> Result<(), E>` implement
/// this trait directly.
pub trait AnomalyHandler {
    type Error;

    fn on_anomaly(&mut self, report: AnomalyReport) -> Result<(), Self::Error>;
}

impl<F, E> AnomalyHandler for F
where
    F: FnMut(AnomalyReport) -> Result<(), E>,
{
    type Error = E;

    fn on_anomaly(&mut self, report: AnomalyReport) -> Result<(), E> {
        self(report)
    }
}

/// Keeps every report in arrival order
#[derive(Debug, Default, Clone)]
pub struct AnomalyCollector {
    pub reports: Vec<AnomalyReport>,
}

impl AnomalyCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    pub fn into_reports(self) -> Vec<AnomalyReport> {
        self.reports
    }
}

impl AnomalyHandler for AnomalyCollector {
    type Error = Infallible;

    fn on_anomaly(&mut self, report: AnomalyReport) -> Result<(), Infallible> {
        self.reports.push(report);
        Ok(())
    }
}

/// Emits each report as a `tracing` warning and counts them
#[derive(Debug)]
pub struct LoggingHandler<'v> {
    vocabulary: &'v Vocabulary,
    pub count: usize,
}

impl<'v> LoggingHandler<'v> {
    pub fn new(vocabulary: &'v Vocabulary) -> Self {
        Self {
            vocabulary,
            count: 0,
        }
    }
}

impl AnomalyHandler for LoggingHandler<'_> {
    type Error = Infallible;

    fn on_anomaly(&mut self, report: AnomalyReport) -> Result<(), Infallible> {
        self.count += 1;
        tracing::warn!(
            position = report.position(),
            previous = report.previous_label(self.vocabulary).unwrap_or("<start>"),
            offending = report.offending_label(self.vocabulary).unwrap_or("?"),
            expected = report.predicted_tokens.len(),
            "Implausible next event"
        );
        Ok(())
    }
}

/// Scan phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorPhase {
    /// No token consumed, nothing to check against
    AwaitingFirstToken,
    /// Every token is checked against the previous prediction set
    Steady,
}

/// Token-at-a-time detection state for one scan
///
/// Holds the running sequence, the prediction set from the last step, and
/// the model state. Drop it to end the scan; create a new one to restart.
pub struct StreamingScan<'m, M: NextTokenModel> {
    model: &'m M,
    threshold: f64,
    sequence: Vec<TokenId>,
    predicted: BTreeSet<TokenId>,
    state: Option<M::State>,
}

impl<'m, M: NextTokenModel> StreamingScan<'m, M> {
    pub fn new(model: &'m M, threshold: f64) -> Self {
        Self {
            model,
            threshold,
            sequence: Vec::new(),
            predicted: BTreeSet::new(),
            state: None,
        }
    }

    pub fn phase(&self) -> DetectorPhase {
        if self.state.is_none() {
            DetectorPhase::AwaitingFirstToken
        } else {
            DetectorPhase::Steady
        }
    }

    /// Tokens consumed so far
    pub fn sequence(&self) -> &[TokenId] {
        &self.sequence
    }

    /// Ids considered plausible for the next token
    pub fn predicted(&self) -> &BTreeSet<TokenId> {
        &self.predicted
    }

    /// Consume one token, returning a report when it was not predicted
    ///
    /// The model is advanced regardless of the outcome.
    pub fn push(&mut self, token: TokenId) -> Option<AnomalyReport> {
        self.sequence.push(token);

        let report = match self.phase() {
            DetectorPhase::Steady if !self.predicted.contains(&token) => Some(AnomalyReport {
                sequence: self.sequence.clone(),
                offending_token: token,
                predicted_tokens: self.predicted.clone(),
            }),
            _ => None,
        };

        let (probs, next_state) = self.model.step(token, self.state.as_ref());
        self.predicted = prediction_set(&probs, self.threshold);
        self.state = Some(next_state);

        report
    }
}

/// Ids whose probability is at least `threshold`
pub fn prediction_set(probs: &[f64], threshold: f64) -> BTreeSet<TokenId> {
    probs
        .iter()
        .enumerate()
        .filter(|&(_, &p)| p >= threshold)
        .map(|(id, _)| id)
        .collect()
}

/// Anomaly count at one threshold
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SweepPoint {
    pub threshold: f64,
    pub anomalies: usize,
}

/// Tokenizes text and runs streaming scans against a model
pub struct AnomalyDetector<'a, M: NextTokenModel> {
    vocabulary: &'a Vocabulary,
    model: &'a M,
    threshold: f64,
}

impl<'a, M: NextTokenModel> AnomalyDetector<'a, M> {
    pub fn new(vocabulary: &'a Vocabulary, model: &'a M, threshold: f64) -> Self {
        Self {
            vocabulary,
            model,
            threshold,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn vocabulary(&self) -> &'a Vocabulary {
        self.vocabulary
    }

    /// Start a fresh token-at-a-time scan
    pub fn scan(&self) -> StreamingScan<'a, M> {
        StreamingScan::new(self.model, self.threshold)
    }

    /// Scan `text`, invoking `handler` once per offending token
    ///
    /// Each call starts from an empty history, so repeated calls over the
    /// same text report identical anomalies.
    pub fn detect_anomalies<H: AnomalyHandler>(
        &self,
        text: &str,
        handler: &mut H,
    ) -> Result<(), H::Error> {
        self.detect_tokens(&self.vocabulary.tokenize(text), handler)
    }

    /// Same as [`Self::detect_anomalies`] for an already tokenized sequence
    pub fn detect_tokens<H: AnomalyHandler>(
        &self,
        tokens: &[TokenId],
        handler: &mut H,
    ) -> Result<(), H::Error> {
        let mut scan = self.scan();
        for &token in tokens {
            if let Some(report) = scan.push(token) {
                handler.on_anomaly(report)?;
            }
        }
        Ok(())
    }

    /// Convenience wrapper collecting every report
    pub fn collect(&self, text: &str) -> Vec<AnomalyReport> {
        let mut collector = AnomalyCollector::new();
        match self.detect_anomalies(text, &mut collector) {
            Ok(()) => collector.into_reports(),
            Err(never) => match never {},
        }
    }

    /// Count anomalies in `text` at each threshold
    pub fn sweep(&self, text: &str, thresholds: &[f64]) -> Vec<SweepPoint> {
        let tokens = self.vocabulary.tokenize(text);
        thresholds
            .iter()
            .map(|&threshold| {
                let mut scan = StreamingScan::new(self.model, threshold);
                let anomalies = tokens.iter().filter_map(|&t| scan.push(t)).count();
                SweepPoint {
                    threshold,
                    anomalies,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Always predicts "previous token + 1" with certainty
    struct Successor {
        vocab: usize,
    }

    impl NextTokenModel for Successor {
        type State = usize;

        fn vocab_size(&self) -> usize {
            self.vocab
        }

        fn step(&self, token: TokenId, _state: Option<&usize>) -> (Vec<f64>, usize) {
            let mut probs = vec![0.0; self.vocab];
            probs[(token + 1) % self.vocab] = 1.0;
            (probs, token)
        }
    }

    fn vocab() -> Vocabulary {
        Vocabulary::adapt(["a\nb\nc\nd"])
    }

    #[test]
    fn test_clean_sequence_has_no_anomalies() {
        let vocab = vocab();
        let model = Successor { vocab: 5 };
        let detector = AnomalyDetector::new(&vocab, &model, 0.5);
        assert!(detector.collect("a\nb\nc\nd").is_empty());
    }

    #[test]
    fn test_first_token_is_never_checked() {
        let vocab = vocab();
        let model = Successor { vocab: 5 };
        let detector = AnomalyDetector::new(&vocab, &model, 0.5);
        assert!(detector.collect("d").is_empty());
        assert!(detector.collect("[UNK]").is_empty());
    }

    #[test]
    fn test_report_contents() {
        let vocab = vocab();
        let model = Successor { vocab: 5 };
        let detector = AnomalyDetector::new(&vocab, &model, 0.5);
        let reports = detector.collect("a\nb\nd\nc");

        // b -> d breaks the chain, then d -> c breaks it again
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].sequence, vec![1, 2, 4]);
        assert_eq!(reports[0].offending_token, 4);
        assert_eq!(reports[0].predicted_tokens, BTreeSet::from([3]));
        assert_eq!(reports[0].position(), 2);
        assert_eq!(reports[1].sequence, vec![1, 2, 4, 3]);

        let text = reports[0].render(&vocab);
        assert!(text.contains("b -> d"));
        assert!(text.contains("Expected one of: [c]"));
    }

    #[test]
    fn test_handler_error_aborts_scan() {
        let vocab = vocab();
        let model = Successor { vocab: 5 };
        let detector = AnomalyDetector::new(&vocab, &model, 0.5);

        let mut seen = 0;
        let result = detector.detect_anomalies("a\nc\na\nc", &mut |_r: AnomalyReport| -> Result<(), &str> {
            seen += 1;
            Err("escalated")
        });
        assert_eq!(result, Err("escalated"));
        assert_eq!(seen, 1);
    }

    #[test]
    fn test_empty_prediction_set_flags_everything() {
        let vocab = vocab();
        let model = Successor { vocab: 5 };
        let detector = AnomalyDetector::new(&vocab, &model, 1.5);
        assert_eq!(detector.collect("a\nb\nc\nd").len(), 3);
    }

    #[test]
    fn test_streaming_scan_phases() {
        let model = Successor { vocab: 5 };
        let mut scan = StreamingScan::new(&model, 0.5);
        assert_eq!(scan.phase(), DetectorPhase::AwaitingFirstToken);
        assert!(scan.push(1).is_none());
        assert_eq!(scan.phase(), DetectorPhase::Steady);
        assert_eq!(scan.predicted(), &BTreeSet::from([2]));
        assert!(scan.push(3).is_some());
        assert_eq!(scan.sequence(), &[1, 3]);
    }

    #[test]
    fn test_prediction_set_threshold_is_inclusive() {
        let set = prediction_set(&[0.1, 0.25, 0.65], 0.25);
        assert_eq!(set, BTreeSet::from([1, 2]));
    }

    #[test]
    fn test_sweep_is_monotonic() {
        let vocab = vocab();
        let model = Successor { vocab: 5 };
        let detector = AnomalyDetector::new(&vocab, &model, 0.5);
        let points = detector.sweep("a\nb\nd\nc\nd", &[0.0, 0.5, 2.0]);
        let counts: Vec<usize> = points.iter().map(|p| p.anomalies).collect();
        assert_eq!(counts, vec![0, 2, 4]);
    }

    #[test]
    fn test_logging_handler_counts() {
        let vocab = vocab();
        let model = Successor { vocab: 5 };
        let detector = AnomalyDetector::new(&vocab, &model, 0.5);
        let mut handler = LoggingHandler::new(&vocab);
        detector.detect_anomalies("a\nc\nb", &mut handler).unwrap();
        assert_eq!(handler.count, 2);
    }
}

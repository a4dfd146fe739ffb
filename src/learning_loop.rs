//! Incremental learning loop
//!
//! A [`LearningSession`] owns everything one run needs: the configuration,
//! the log generator (whose entities keep their state between cycles), and
//! the current trained model. One cycle is
//!
//! 1. generate a corpus and train, or load a persisted model,
//! 2. scan freshly generated normal data and the probe sequences,
//! 3. report what was flagged.
//!
//! Between cycles the caller may [`legalize`](LearningSession::legalize) a
//! transition that turned out to be normal; the next cycle then retrains on
//! data that includes it. The loop never decides on its own when to stop.

use crate::bluetooth::Probe;
use crate::config::VigiaConfig;
use crate::dataset::split_holdout;
use crate::detector::{AnomalyCollector, AnomalyDetector, AnomalyHandler, AnomalyReport};
use crate::error::{Result, VigiaError};
use crate::model_persistence::{
    load_model, model_exists, save_model, transition_table_digest, ModelArtifact, ModelMetadata,
    PersistenceOptions,
};
use crate::predictor::SequencePredictor;
use crate::state_machine::{render_corpus, LogGenerator};
use crate::trainer::{Trainer, TrainingReport};
use crate::vocabulary::Vocabulary;
use serde::Serialize;
use tracing::{info, warn};

/// Vocabulary and predictor trained together
#[derive(Debug, Clone)]
pub struct TrainedModel {
    pub vocabulary: Vocabulary,
    pub predictor: SequencePredictor,
    pub training_tokens: usize,
}

/// Where the session's current model came from
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelSource {
    Trained { report: TrainingReport, warm_start: bool },
    Loaded,
}

/// Detection results for one probe sequence
#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub name: String,
    pub transition: (String, String),
    pub anomalies: Vec<AnomalyReport>,
    /// True when some report sits exactly on the probe's transition
    pub transition_flagged: bool,
}

/// Outcome of one generate/train/detect cycle
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle: usize,
    pub model: ModelSource,
    pub normal_events: usize,
    pub normal_anomalies: Vec<AnomalyReport>,
    pub probes: Vec<ProbeResult>,
}

impl CycleReport {
    pub fn total_anomalies(&self) -> usize {
        self.normal_anomalies.len() + self.probes.iter().map(|p| p.anomalies.len()).sum::<usize>()
    }
}

/// Explicit context for a sequence of learning cycles
#[derive(Debug)]
pub struct LearningSession {
    config: VigiaConfig,
    generator: LogGenerator,
    model: Option<TrainedModel>,
    cycles: usize,
}

impl LearningSession {
    pub fn new(config: VigiaConfig) -> Result<Self> {
        config.validate()?;
        let generator = LogGenerator::new(
            config.state_machine()?,
            config.generator.entity_count,
            config.generator.seed,
        )?;

        Ok(Self {
            config,
            generator,
            model: None,
            cycles: 0,
        })
    }

    pub fn config(&self) -> &VigiaConfig {
        &self.config
    }

    pub fn generator(&self) -> &LogGenerator {
        &self.generator
    }

    pub fn model(&self) -> Option<&TrainedModel> {
        self.model.as_ref()
    }

    pub fn cycles_run(&self) -> usize {
        self.cycles
    }

    /// Generate `log_size` events (plus the priming prefix) as corpus text
    pub fn generate_corpus(&mut self) -> String {
        self.generate_text(self.config.generator.log_size)
    }

    pub fn generate_text(&mut self, count: usize) -> String {
        let events = self.generator.generate(count);
        render_corpus(&events, self.config.generator.label_format)
    }

    /// Fit a vocabulary and predictor to `corpus`
    ///
    /// When the corpus yields exactly the vocabulary of the current model the
    /// existing weights are the starting point; otherwise training starts
    /// from a fresh initialization.
    pub fn train_on(&mut self, corpus: &str) -> Result<(TrainingReport, bool)> {
        let vocabulary = Vocabulary::adapt([corpus]);
        let tokens = vocabulary.tokenize(corpus);
        let split = split_holdout(&tokens, self.config.dataset.validation_holdout)?;

        let builder = self.config.dataset_builder()?;
        let batches = builder.build(&split.train);
        let validation = builder.windows(&split.validation);
        if batches.is_empty() {
            return Err(VigiaError::InsufficientData {
                purpose: "training windows",
                needed: builder.block_length(),
                available: split.train.len(),
            });
        }
        if validation.is_empty() {
            return Err(VigiaError::InsufficientData {
                purpose: "validation windows",
                needed: builder.block_length(),
                available: split.validation.len(),
            });
        }

        let (mut predictor, warm_start) = match &self.model {
            Some(previous) if previous.vocabulary == vocabulary => {
                (previous.predictor.clone(), true)
            }
            _ => (
                SequencePredictor::new(
                    vocabulary.size(),
                    self.config.model.embedding_dim,
                    self.config.model.hidden_dim,
                    self.config.generator.seed,
                )?,
                false,
            ),
        };

        info!(
            tokens = tokens.len(),
            vocab_size = vocabulary.size(),
            warm_start,
            "Training next-token model"
        );

        let trainer = Trainer::new(self.config.training.clone())?;
        let report = trainer.train(&mut predictor, &batches, &validation)?;

        self.model = Some(TrainedModel {
            vocabulary,
            predictor,
            training_tokens: tokens.len(),
        });
        Ok((report, warm_start))
    }

    /// Persist the current model to the configured path
    pub fn save(&self) -> Result<()> {
        let model = self.model.as_ref().ok_or(VigiaError::ModelNotTrained)?;
        let cfg = &self.config;
        let metadata = ModelMetadata::new(model.training_tokens)
            .with_hyperparameter("embedding_dim", cfg.model.embedding_dim)
            .with_hyperparameter("hidden_dim", cfg.model.hidden_dim)
            .with_hyperparameter("window_length", cfg.dataset.window_length)
            .with_hyperparameter("learning_rate", cfg.training.learning_rate)
            .with_hyperparameter("threshold", cfg.detection.threshold)
            .with_transition_table(&self.generator.machine().to_specs());
        let artifact =
            ModelArtifact::new(model.vocabulary.clone(), model.predictor.clone(), metadata);

        save_model(
            &artifact,
            &cfg.persistence.model_path,
            PersistenceOptions::new().with_name("vigia"),
        )?;
        Ok(())
    }

    /// Replace the current model with the persisted one
    pub fn load(&mut self) -> Result<()> {
        let artifact = load_model(&self.config.persistence.model_path)?;
        self.install(artifact);
        Ok(())
    }

    fn install(&mut self, artifact: ModelArtifact) {
        info!(
            path = %self.config.persistence.model_path.display(),
            vocab_size = artifact.vocabulary.size(),
            "Loaded persisted model"
        );
        self.model = Some(TrainedModel {
            vocabulary: artifact.vocabulary,
            predictor: artifact.predictor,
            training_tokens: artifact.metadata.training_tokens,
        });
    }

    /// Load the persisted model unless retraining is forced or required
    ///
    /// Retraining is required when no model file exists or the persisted
    /// model was trained on a different transition table.
    pub fn train_or_load(&mut self, force_retrain: bool) -> Result<ModelSource> {
        let path = self.config.persistence.model_path.clone();
        if !force_retrain && model_exists(&path) {
            let artifact = load_model(&path)?;
            let current = transition_table_digest(&self.generator.machine().to_specs());
            if artifact.metadata.transition_table.as_deref() == Some(current.as_str()) {
                self.install(artifact);
                return Ok(ModelSource::Loaded);
            }
            info!(
                path = %path.display(),
                "Persisted model was trained on another transition table, retraining"
            );
        }

        let corpus = self.generate_corpus();
        let (report, warm_start) = self.train_on(&corpus)?;
        self.save()?;
        Ok(ModelSource::Trained { report, warm_start })
    }

    pub fn detector(&self) -> Result<AnomalyDetector<'_, SequencePredictor>> {
        let model = self.model.as_ref().ok_or(VigiaError::ModelNotTrained)?;
        Ok(AnomalyDetector::new(
            &model.vocabulary,
            &model.predictor,
            self.config.detection.threshold,
        ))
    }

    /// Scan `text` with the current model
    pub fn detect<H>(&self, text: &str, handler: &mut H) -> Result<()>
    where
        H: AnomalyHandler,
        H::Error: std::fmt::Display,
    {
        self.detector()?
            .detect_anomalies(text, handler)
            .map_err(|e| VigiaError::HandlerAborted(e.to_string()))
    }

    pub fn collect_anomalies(&self, text: &str) -> Result<Vec<AnomalyReport>> {
        let mut collector = AnomalyCollector::new();
        self.detect(text, &mut collector)?;
        Ok(collector.into_reports())
    }

    /// Accept `from -> to` as normal from now on
    pub fn legalize(&mut self, from: &str, to: &str) -> Result<bool> {
        let added = self.generator.legalize(from, to)?;
        if added {
            info!(from, to, "Legalized transition");
        }
        Ok(added)
    }

    /// Run one generate/train/detect cycle
    pub fn run_cycle(&mut self, probes: &[Probe], force_retrain: bool) -> Result<CycleReport> {
        self.cycles += 1;
        let model = self.train_or_load(force_retrain)?;

        let events = self.generator.generate(self.config.generator.log_size);
        let normal = render_corpus(&events, self.config.generator.label_format);
        let normal_anomalies = self.collect_anomalies(&normal)?;
        if !normal_anomalies.is_empty() {
            warn!(
                count = normal_anomalies.len(),
                "Anomalies flagged in generated normal data"
            );
        }

        let vocabulary = match &self.model {
            Some(m) => &m.vocabulary,
            None => return Err(VigiaError::ModelNotTrained),
        };
        let mut results = Vec::with_capacity(probes.len());
        for probe in probes {
            let anomalies = self.collect_anomalies(&probe.text())?;
            let (from, to) = probe.transition;
            let transition_flagged = anomalies.iter().any(|r| {
                r.previous_label(vocabulary) == Some(from)
                    && r.offending_label(vocabulary) == Some(to)
            });
            results.push(ProbeResult {
                name: probe.name.to_string(),
                transition: (from.to_string(), to.to_string()),
                anomalies,
                transition_flagged,
            });
        }

        info!(
            cycle = self.cycles,
            normal_anomalies = normal_anomalies.len(),
            flagged_probes = results.iter().filter(|r| r.transition_flagged).count(),
            "Cycle complete"
        );

        Ok(CycleReport {
            cycle: self.cycles,
            model,
            normal_events: events.len(),
            normal_anomalies,
            probes: results,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::{CALL_APP, DISCONNECTED};
    use tempfile::TempDir;

    fn small_config(dir: &TempDir) -> VigiaConfig {
        let mut config = VigiaConfig::default();
        config.generator.log_size = 400;
        config.dataset.window_length = 8;
        config.dataset.validation_holdout = 90;
        config.dataset.batch_size = 4;
        config.model.embedding_dim = 4;
        config.model.hidden_dim = 8;
        config.training.max_passes = 2;
        config.persistence.model_path = dir.path().join("model.vgm");
        config
    }

    #[test]
    fn test_detect_before_training_fails() {
        let dir = TempDir::new().unwrap();
        let session = LearningSession::new(small_config(&dir)).unwrap();
        assert!(matches!(
            session.collect_anomalies("unknown\ndiscovery"),
            Err(VigiaError::ModelNotTrained)
        ));
        assert!(matches!(session.save(), Err(VigiaError::ModelNotTrained)));
    }

    #[test]
    fn test_train_or_load_persists_then_loads() {
        let dir = TempDir::new().unwrap();
        let config = small_config(&dir);

        let mut first = LearningSession::new(config.clone()).unwrap();
        assert!(matches!(
            first.train_or_load(false).unwrap(),
            ModelSource::Trained { .. }
        ));
        assert!(model_exists(&config.persistence.model_path));

        let mut second = LearningSession::new(config).unwrap();
        assert!(matches!(second.train_or_load(false).unwrap(), ModelSource::Loaded));
        assert_eq!(
            first.model().unwrap().predictor,
            second.model().unwrap().predictor
        );
    }

    #[test]
    fn test_legalize_forces_retraining() {
        let dir = TempDir::new().unwrap();
        let mut session = LearningSession::new(small_config(&dir)).unwrap();
        session.train_or_load(false).unwrap();

        assert!(session.legalize(CALL_APP, DISCONNECTED).unwrap());
        assert!(!session.legalize(CALL_APP, DISCONNECTED).unwrap());
        assert!(matches!(
            session.train_or_load(false).unwrap(),
            ModelSource::Trained { .. }
        ));
        assert!(session.generator().machine().allows(CALL_APP, DISCONNECTED));
    }

    #[test]
    fn test_changed_table_between_sessions_retrains() {
        let dir = TempDir::new().unwrap();
        let config = small_config(&dir);
        LearningSession::new(config.clone())
            .unwrap()
            .train_or_load(false)
            .unwrap();

        let mut widened = config;
        let call_app = widened
            .state_machine
            .states
            .iter_mut()
            .find(|s| s.name == CALL_APP)
            .unwrap();
        call_app.next.push(DISCONNECTED.to_string());

        let mut second = LearningSession::new(widened.clone()).unwrap();
        assert!(matches!(
            second.train_or_load(false).unwrap(),
            ModelSource::Trained { .. }
        ));

        // The retrained model is now current for the widened table
        let mut third = LearningSession::new(widened).unwrap();
        assert!(matches!(third.train_or_load(false).unwrap(), ModelSource::Loaded));
    }

    #[test]
    fn test_model_without_table_digest_is_retrained() {
        let dir = TempDir::new().unwrap();
        let config = small_config(&dir);
        let mut session = LearningSession::new(config.clone()).unwrap();
        session.train_or_load(false).unwrap();

        let mut artifact = load_model(&config.persistence.model_path).unwrap();
        artifact.metadata.transition_table = None;
        save_model(&artifact, &config.persistence.model_path, PersistenceOptions::new()).unwrap();

        let mut next = LearningSession::new(config).unwrap();
        assert!(matches!(
            next.train_or_load(false).unwrap(),
            ModelSource::Trained { .. }
        ));
    }

    #[test]
    fn test_cycle_counts_priming_events() {
        let dir = TempDir::new().unwrap();
        let mut config = small_config(&dir);
        config.generator.entity_count = 3;
        config.generator.label_format = crate::state_machine::LabelFormat::Qualified;
        let mut session = LearningSession::new(config.clone()).unwrap();

        let report = session.run_cycle(&[], false).unwrap();
        assert_eq!(report.normal_events, config.generator.log_size + 3);
    }

    #[test]
    fn test_small_corpus_reports_insufficient_data() {
        let dir = TempDir::new().unwrap();
        let mut session = LearningSession::new(small_config(&dir)).unwrap();
        let err = session.train_on("unknown\ndiscovery\npairing").unwrap_err();
        assert!(matches!(err, VigiaError::InsufficientData { .. }));
    }

    #[test]
    fn test_handler_error_aborts_detection() {
        let dir = TempDir::new().unwrap();
        let mut config = small_config(&dir);
        // No softmax output reaches 1.0, so every checked token is anomalous
        config.detection.threshold = 1.0;
        let mut session = LearningSession::new(config).unwrap();
        session.train_or_load(true).unwrap();

        let mut calls = 0;
        let mut failing = |_report: AnomalyReport| -> std::result::Result<(), String> {
            calls += 1;
            Err("stop".to_string())
        };
        let err = session
            .detect("unknown\ndiscovery\npairing\nconnected", &mut failing)
            .unwrap_err();
        assert!(matches!(err, VigiaError::HandlerAborted(ref m) if m == "stop"));
        assert_eq!(calls, 1);
    }
}

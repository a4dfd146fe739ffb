// Saved artifacts reproduce the trained model exactly

mod utils;

use tempfile::TempDir;
use utils::quick_config;
use vigia::bluetooth::CALL_DROP_PROBE;
use vigia::detector::AnomalyDetector;
use vigia::learning_loop::LearningSession;
use vigia::model_persistence::{load_model, model_status_line};

#[test]
fn test_saved_model_reproduces_distributions() {
    let tmp_dir = TempDir::new().unwrap();
    let model_path = tmp_dir.path().join("model.vgm");
    let mut session = LearningSession::new(quick_config(&model_path)).unwrap();
    session.train_or_load(true).unwrap();

    let artifact = load_model(&model_path).unwrap();
    let trained = session.model().unwrap();
    assert_eq!(artifact.vocabulary, trained.vocabulary);
    assert_eq!(artifact.metadata.training_tokens, trained.training_tokens);
    assert_eq!(artifact.metadata.name.as_deref(), Some("vigia"));
    assert!(model_status_line(&artifact.metadata).contains("tokens"));

    let tokens = trained.vocabulary.tokenize(&CALL_DROP_PROBE.text());
    let original = trained.predictor.predict_window(&tokens, None);
    let restored = artifact.predictor.predict_window(&tokens, None);
    assert_eq!(original, restored);
}

#[test]
fn test_saved_model_gives_identical_reports() {
    let tmp_dir = TempDir::new().unwrap();
    let model_path = tmp_dir.path().join("model.vgm");
    let mut session = LearningSession::new(quick_config(&model_path)).unwrap();
    session.train_or_load(true).unwrap();
    let text = session.generate_text(300);

    let artifact = load_model(&model_path).unwrap();
    let restored = AnomalyDetector::new(&artifact.vocabulary, &artifact.predictor, 0.3);
    let trained = session.model().unwrap();
    let original = AnomalyDetector::new(&trained.vocabulary, &trained.predictor, 0.3);

    assert_eq!(original.collect(&text), restored.collect(&text));
}

// Bluetooth scenarios with a trained recurrent model
//
// A: normal pairing traffic passes clean
// B: an unseen call drop is flagged
// C: once legalized and retrained, the call drop passes
// D: a never-legal call -> discovery jump stays flagged through retraining

mod utils;

use tempfile::TempDir;
use utils::{scenario_config, with_states};
use vigia::bluetooth::{self, standard_probes, CALL_APP, DISCONNECTED, DISCOVERY};
use vigia::learning_loop::{CycleReport, LearningSession, ModelSource, ProbeResult};

fn probe<'r>(report: &'r CycleReport, name: &str) -> &'r ProbeResult {
    report.probes.iter().find(|p| p.name == name).unwrap()
}

#[test]
fn test_scenario_a_normal_pairing_traffic_is_clean() {
    let dir = TempDir::new().unwrap();
    let config = with_states(
        scenario_config(&dir.path().join("pairing.vgm")),
        bluetooth::pairing_specs(),
    );
    let mut session = LearningSession::new(config).unwrap();
    let corpus = session.generate_corpus();
    session.train_on(&corpus).unwrap();

    let fresh = session.generate_text(100);
    assert_eq!(fresh.lines().count(), 101);
    let anomalies = session.collect_anomalies(&fresh).unwrap();
    assert!(anomalies.is_empty(), "unexpected anomalies: {:?}", anomalies);
}

#[test]
fn test_scenarios_b_c_d_across_learning_cycles() {
    let dir = TempDir::new().unwrap();
    let config = scenario_config(&dir.path().join("device.vgm"));
    let mut session = LearningSession::new(config).unwrap();
    let probes = standard_probes();

    // Cycle 1: trained on the original table
    let first = session.run_cycle(&probes, false).unwrap();
    assert!(matches!(first.model, ModelSource::Trained { .. }));

    // B
    let drop = probe(&first, "call-drop");
    assert!(drop.transition_flagged);
    let vocab = &session.model().unwrap().vocabulary;
    assert!(drop
        .anomalies
        .iter()
        .any(|r| r.offending_label(vocab) == Some(DISCONNECTED)));

    // D, first run
    assert!(probe(&first, "call-rediscovery").transition_flagged);

    // C: legalize, regenerate, retrain
    assert!(session.legalize(CALL_APP, DISCONNECTED).unwrap());
    let second = session.run_cycle(&probes, false).unwrap();
    assert!(matches!(second.model, ModelSource::Trained { .. }));
    let drop = probe(&second, "call-drop");
    assert!(!drop.transition_flagged);
    assert!(drop.anomalies.is_empty(), "{:?}", drop.anomalies);

    // D after retraining on the corrected table
    let rediscovery = probe(&second, "call-rediscovery");
    assert!(rediscovery.transition_flagged);
    let vocab = &session.model().unwrap().vocabulary;
    assert!(rediscovery
        .anomalies
        .iter()
        .any(|r| r.previous_label(vocab) == Some(CALL_APP)
            && r.offending_label(vocab) == Some(DISCOVERY)));

    // D on a forced rerun
    let third = session.run_cycle(&probes, true).unwrap();
    assert!(probe(&third, "call-rediscovery").transition_flagged);
    assert!(!probe(&third, "call-drop").transition_flagged);
    assert_eq!(session.cycles_run(), 3);
}

#[test]
fn test_persisted_model_is_reused_by_next_session() {
    let dir = TempDir::new().unwrap();
    let config = scenario_config(&dir.path().join("reuse.vgm"));

    let mut first = LearningSession::new(config.clone()).unwrap();
    let trained = first.run_cycle(&standard_probes(), false).unwrap();
    assert!(matches!(trained.model, ModelSource::Trained { .. }));

    let mut second = LearningSession::new(config).unwrap();
    let loaded = second.run_cycle(&standard_probes(), false).unwrap();
    assert!(matches!(loaded.model, ModelSource::Loaded));

    // Same model, same probe verdicts
    for (a, b) in trained.probes.iter().zip(&loaded.probes) {
        assert_eq!(a.anomalies, b.anomalies);
    }
}

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::Path;
use tracing_subscriber::EnvFilter;
use vigia::bluetooth::standard_probes;
use vigia::cli::{Cli, Command, OutputFormat};
use vigia::config::VigiaConfig;
use vigia::detector::AnomalyReport;
use vigia::learning_loop::{CycleReport, LearningSession, ModelSource};
use vigia::model_persistence::model_exists;
use vigia::vocabulary::Vocabulary;

/// Initialize tracing subscriber; `--debug` turns on TRACE level
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<VigiaConfig> {
    match path {
        Some(path) => VigiaConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(VigiaConfig::default()),
    }
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Anomaly with labels resolved, for JSON output
#[derive(Serialize)]
struct LabeledAnomaly<'a> {
    position: usize,
    previous: Option<&'a str>,
    offending: &'a str,
    expected: Vec<&'a str>,
}

impl<'a> LabeledAnomaly<'a> {
    fn new(report: &AnomalyReport, vocabulary: &'a Vocabulary) -> Self {
        Self {
            position: report.position(),
            previous: report.previous_label(vocabulary),
            offending: report.offending_label(vocabulary).unwrap_or("?"),
            expected: report
                .predicted_tokens
                .iter()
                .filter_map(|&id| vocabulary.label(id))
                .collect(),
        }
    }
}

fn print_anomalies(
    reports: &[AnomalyReport],
    vocabulary: &Vocabulary,
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Text => {
            for report in reports {
                println!("{}", report.render(vocabulary));
            }
            println!("{} anomalies", reports.len());
        }
        OutputFormat::Json => {
            let labeled: Vec<LabeledAnomaly> = reports
                .iter()
                .map(|r| LabeledAnomaly::new(r, vocabulary))
                .collect();
            println!("{}", serde_json::to_string_pretty(&labeled)?);
        }
    }
    Ok(())
}

fn print_cycle(report: &CycleReport, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    match &report.model {
        ModelSource::Loaded => println!("cycle {}: loaded persisted model", report.cycle),
        ModelSource::Trained { report: training, warm_start } => println!(
            "cycle {}: trained {} passes (best pass {}, validation loss {:.4}{})",
            report.cycle,
            training.passes_run(),
            training.best_pass,
            training.best_validation_loss,
            if *warm_start { ", warm start" } else { "" }
        ),
    }
    println!(
        "normal data: {} anomalies in {} events",
        report.normal_anomalies.len(),
        report.normal_events
    );
    for probe in &report.probes {
        println!(
            "probe {} ({} -> {}): {} anomalies, transition {}",
            probe.name,
            probe.transition.0,
            probe.transition.1,
            probe.anomalies.len(),
            if probe.transition_flagged { "flagged" } else { "accepted" }
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.debug);

    let mut config = load_config(args.config.as_deref())?;

    match args.command {
        Command::Generate { count, output } => {
            let mut session = LearningSession::new(config)?;
            let text = match count {
                Some(n) => session.generate_text(n),
                None => session.generate_corpus(),
            };
            match output {
                Some(path) => std::fs::write(&path, text + "\n")
                    .with_context(|| format!("Failed to write {}", path.display()))?,
                None => println!("{}", text),
            }
        }

        Command::Train { corpus, force } => {
            let model_path = config.persistence.model_path.clone();
            if model_exists(&model_path) && !force {
                anyhow::bail!(
                    "Model {} already exists. Use --force to overwrite.",
                    model_path.display()
                );
            }
            let text = read_text(&corpus)?;
            let mut session = LearningSession::new(config)?;
            let (report, _) = session.train_on(&text)?;
            session.save()?;
            println!(
                "trained {} passes, best validation loss {:.4} (pass {}), saved to {}",
                report.passes_run(),
                report.best_validation_loss,
                report.best_pass,
                model_path.display()
            );
        }

        Command::Detect {
            input,
            format,
            threshold,
        } => {
            if let Some(t) = threshold {
                config.detection.threshold = t;
            }
            let text = read_text(&input)?;
            let mut session = LearningSession::new(config)?;
            session.load()?;
            let reports = session.collect_anomalies(&text)?;
            let detector = session.detector()?;
            print_anomalies(&reports, detector.vocabulary(), format)?;
        }

        Command::Sweep { input, thresholds } => {
            let text = read_text(&input)?;
            let mut session = LearningSession::new(config)?;
            session.load()?;
            for point in session.detector()?.sweep(&text, &thresholds) {
                println!("{}\t{}", point.threshold, point.anomalies);
            }
        }

        Command::Cycle {
            legalize,
            force,
            format,
        } => {
            let mut session = LearningSession::new(config)?;
            for (from, to) in &legalize {
                session.legalize(from, to)?;
            }
            let report = session.run_cycle(&standard_probes(), force)?;
            print_cycle(&report, format)?;
        }
    }

    Ok(())
}

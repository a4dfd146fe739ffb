//! CLI argument parsing for vigia

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Output format for anomaly reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format (default)
    Text,
    /// JSON format for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "vigia")]
#[command(version)]
#[command(
    about = "Next-event anomaly detection for device state-change logs",
    long_about = None
)]
pub struct Cli {
    /// TOML configuration file (defaults apply when omitted)
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug tracing output (to stderr)
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate a synthetic log from the configured state machine
    Generate {
        /// Number of events after the priming prefix (defaults to log_size)
        #[arg(short = 'n', long)]
        count: Option<usize>,

        /// Write the log to FILE instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Train a model on a corpus file and persist it
    Train {
        /// Newline-separated event log
        #[arg(long, value_name = "FILE")]
        corpus: PathBuf,

        /// Overwrite an existing model file
        #[arg(long)]
        force: bool,
    },

    /// Scan a log with the persisted model and report anomalies
    Detect {
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Override the configured prediction threshold
        #[arg(short, long)]
        threshold: Option<f64>,
    },

    /// Count anomalies at several thresholds
    Sweep {
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Comma-separated thresholds, e.g. 0.01,0.05,0.1
        #[arg(long, value_delimiter = ',', required = true)]
        thresholds: Vec<f64>,
    },

    /// Run one generate/train/detect cycle against the standard probes
    Cycle {
        /// Accept a transition as normal before the cycle, as FROM:TO
        #[arg(long, value_name = "FROM:TO", value_parser = parse_transition)]
        legalize: Vec<(String, String)>,

        /// Retrain even when a persisted model exists
        #[arg(long)]
        force: bool,

        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

/// Parse `FROM:TO` into a transition pair
pub fn parse_transition(s: &str) -> Result<(String, String), String> {
    match s.split_once(':') {
        Some((from, to)) if !from.trim().is_empty() && !to.trim().is_empty() => {
            Ok((from.trim().to_string(), to.trim().to_string()))
        }
        _ => Err(format!("expected FROM:TO, got '{}'", s)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_transition() {
        assert_eq!(
            parse_transition("call_app:disconnected"),
            Ok(("call_app".to_string(), "disconnected".to_string()))
        );
        assert!(parse_transition("call_app").is_err());
        assert!(parse_transition(":disconnected").is_err());
    }

    #[test]
    fn test_cli_detect_args() {
        let cli = Cli::parse_from([
            "vigia", "detect", "--input", "log.txt", "--format", "json", "-t", "0.2",
        ]);
        match cli.command {
            Command::Detect {
                input,
                format,
                threshold,
            } => {
                assert_eq!(input, PathBuf::from("log.txt"));
                assert_eq!(format, OutputFormat::Json);
                assert_eq!(threshold, Some(0.2));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["vigia", "generate", "--config", "v.toml", "--debug"]);
        assert!(cli.debug);
        assert_eq!(cli.config, Some(PathBuf::from("v.toml")));
    }

    #[test]
    fn test_cli_sweep_thresholds() {
        let cli = Cli::parse_from(["vigia", "sweep", "-i", "x", "--thresholds", "0.01,0.5"]);
        match cli.command {
            Command::Sweep { thresholds, .. } => assert_eq!(thresholds, vec![0.01, 0.5]),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_repeated_legalize() {
        let cli = Cli::parse_from([
            "vigia",
            "cycle",
            "--legalize",
            "call_app:disconnected",
            "--legalize",
            "music_app:disconnected",
        ]);
        match cli.command {
            Command::Cycle { legalize, force, .. } => {
                assert_eq!(legalize.len(), 2);
                assert!(!force);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_verify() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}

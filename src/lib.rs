//! Vigia - next-event anomaly detection for device state-change logs
//!
//! A recurrent model learns which event usually follows which in "normal"
//! streams of state labels. The detector then walks a stream one event at a
//! time and flags every event the model did not consider plausible.
//!
//! The pieces, leaves first:
//!
//! - [`state_machine`]: synthetic log generation from a transition table
//! - [`bluetooth`]: the reference headset state machines and probe sequences
//! - [`vocabulary`]: label <-> dense id mapping
//! - [`dataset`]: non-overlapping next-token training windows
//! - [`predictor`]: Elman recurrent next-token model
//! - [`trainer`]: Adam optimization with early stopping
//! - [`detector`]: streaming anomaly detection with a callback
//! - [`oracle`]: exact next-token model derived from a state machine
//! - [`model_persistence`]: checksummed vocabulary + predictor artifacts
//! - [`learning_loop`]: generate, train, detect, legalize, retrain
//!
//! # Example
//! ```
//! use vigia::bluetooth;
//! use vigia::detector::AnomalyDetector;
//! use vigia::oracle::TransitionOracle;
//! use vigia::vocabulary::Vocabulary;
//!
//! let machine = bluetooth::device_machine().unwrap();
//! let vocab = Vocabulary::adapt(["unknown\ndiscovery\npairing\nconnected\ncall_app\nmusic_app\ndisconnected"]);
//! let oracle = TransitionOracle::new(&machine, &vocab);
//! let detector = AnomalyDetector::new(&vocab, &oracle, 0.05);
//!
//! let reports = detector.collect(&bluetooth::CALL_REDISCOVERY_PROBE.text());
//! assert_eq!(reports.len(), 1);
//! assert_eq!(reports[0].offending_label(&vocab), Some("discovery"));
//! ```

pub mod bluetooth;
pub mod cli;
pub mod config;
pub mod dataset;
pub mod detector;
pub mod error;
pub mod learning_loop;
pub mod model_persistence;
pub mod oracle;
pub mod predictor;
pub mod state_machine;
pub mod trainer;
pub mod vocabulary;

pub use error::{Result, VigiaError};

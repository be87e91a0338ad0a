//! # atc-core
//!
//! Voice/surveillance fusion engine: per-channel segment recording, a bounded
//! transcription worker pool, an ADS-B surveillance poller, and an LLM-based
//! correlator that associates transmissions with tracked aircraft.
//!
//! ## Architecture
//!
//! ```text
//! AudioStream ──► SegmentRecorder ──►┐
//!                                    ├──► TranscriptionPool ──► Transcript
//! AudioStream ──► SegmentRecorder ──►┘                              │
//!                                                                   ▼
//! ADSBProvider ──► SurveillancePoller ──► ContactSet ──► Correlator ──► Events ──► EventBus
//! ```
//!
//! This crate provides the pipeline's building blocks; `atc-monitor` wires
//! them into a running process.

// Unlike the teacher (which forbids unsafe code outright), the segment
// recorder needs a raw SIGTERM to ask the decoder subprocess to exit before
// escalating to SIGKILL — `tokio::process::Child` only exposes a hard kill.
#![warn(clippy::all)]

pub mod audio;
pub mod config;
pub mod correlator;
pub mod error;
pub mod events;
pub mod models;
pub mod surveillance;
pub mod transcription;
pub mod vad;

pub use config::{ChannelConfig, MonitorConfig, SurveillanceSource};
pub use error::{AtcError, Result};
pub use events::{EventBus, MonitorEvent, TransmissionBatcher};
pub use models::{Contact, TranscriptSegment, Transmission};

//! Placeholder speech-to-text backend.
//!
//! The real model is an external collaborator (§1: "out of scope... the
//! speech-to-text model itself") — this stands in for it the way
//! `dictum_core::inference::stub::StubModel` stands in for ONNX Whisper
//! before that backend is wired up, so the pool/monitor wiring can run and
//! be exercised end-to-end without a model download.

use std::path::Path;

use atc_core::error::Result;
use atc_core::models::TranscriptSegment;
use atc_core::transcription::{TranscriptionModel, TranscriptionOutput};
use tracing::debug;

/// Echoes the segment's filename back as "transcribed" text so downstream
/// wiring (worker pool, ring buffer, correlator) has something to push
/// through.
#[derive(Default)]
pub struct StubTranscriptionModel;

impl TranscriptionModel for StubTranscriptionModel {
    fn warm_up(&mut self) -> Result<()> {
        debug!("stub transcription model warm-up — no-op");
        Ok(())
    }

    fn transcribe(&mut self, path: &Path) -> Result<TranscriptionOutput> {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(TranscriptionOutput {
            text: format!("[stub transcript for {stem}]"),
            segments: vec![TranscriptSegment {
                start: 0.0,
                end: 1.0,
                text: format!("[stub transcript for {stem}]"),
            }],
        })
    }
}

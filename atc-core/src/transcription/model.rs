//! Speech-to-text model abstraction.
//!
//! Unlike `dictum-core`'s `SpeechModel` (one model instance shared behind a
//! `parking_lot::Mutex` across callers), each [`TranscriptionPool`] worker
//! owns its model directly — §4.2 requires one loaded instance per worker,
//! so there is no cross-worker sharing to synchronize.
//!
//! [`TranscriptionPool`]: super::pool::TranscriptionPool

use std::path::Path;

use crate::error::Result;
use crate::models::TranscriptSegment;

/// Output of one successful transcription call.
#[derive(Debug, Clone, Default)]
pub struct TranscriptionOutput {
    pub text: String,
    pub segments: Vec<TranscriptSegment>,
}

/// Contract for speech recognition backends.
///
/// `&mut self` expresses that decoders are stateful (beam search caches,
/// KV caches); because each worker owns its model exclusively, no
/// additional synchronization is required around mutation.
pub trait TranscriptionModel: Send + 'static {
    /// One-time warm-up: load weights, run a dummy inference to populate
    /// caches. Called once per worker during `Start`.
    ///
    /// # Errors
    /// A fatal error here aborts the whole pool's `Start` (§4.2).
    fn warm_up(&mut self) -> Result<()>;

    /// Transcribe the WAV file at `path`.
    ///
    /// Must surface model failures as `Err`, never panic — the worker loop
    /// treats a per-job error as a log-and-continue event, not a crash.
    fn transcribe(&mut self, path: &Path) -> Result<TranscriptionOutput>;
}

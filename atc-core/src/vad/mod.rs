//! Voice Activity Detection (VAD) abstraction.
//!
//! The `VoiceActivityDetector` trait is the extensibility point: swap in
//! `EnergyVad` (the only implementation this spec requires) for any future
//! detector without touching the segment recorder's state machine, which
//! owns hysteresis (silence-duration hangover) on top of this per-chunk
//! decision.

pub mod energy;

/// Whether a given audio chunk contains speech or silence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadDecision {
    /// RMS energy of the chunk is above threshold.
    Speech,
    /// RMS energy of the chunk is at or below threshold.
    Silence,
}

impl VadDecision {
    pub fn is_speech(self) -> bool {
        self == VadDecision::Speech
    }
}

/// Trait for all VAD implementations.
pub trait VoiceActivityDetector: Send + 'static {
    /// Analyse a chunk of 16-bit PCM samples and return a speech/silence
    /// decision. Stateless per call — any hysteresis is the caller's
    /// responsibility.
    fn classify(&mut self, samples: &[i16]) -> VadDecision;
}

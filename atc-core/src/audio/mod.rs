//! Segment recorder: decodes a compressed audio stream via an external
//! process and slices the resulting PCM into discrete transmission segments
//! using an energy-based VAD.
//!
//! # Design constraints
//!
//! Unlike the teacher's `cpal`-backed capture (a live local audio device),
//! this recorder's source is an external decoder subprocess (ffmpeg by
//! default) piping raw `s16le` PCM over stdout — see
//! `original_source/audio/recorders.py`'s `capture_stream_audio`. The
//! `tokio::process::Child` read loop plays the role cpal's input callback
//! played in the teacher: it owns the hot loop that classifies chunks and
//! drives the IDLE/RECORDING state machine. There is no audio-thread
//! real-time constraint here (stdout reads already block), so, unlike the
//! teacher, this loop is free to allocate and do file I/O directly.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{AtcError, Result};
use crate::vad::{VadDecision, VoiceActivityDetector};

/// Number of PCM samples read per chunk, per §4.1.
pub const CHUNK_SAMPLES: usize = 1024;

/// Parameters controlling one recorder instance.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// URL of the compressed audio stream fed to the decoder.
    pub stream_url: String,
    /// Decoder executable (e.g. `"ffmpeg"`).
    pub decoder_command: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub vad_threshold: f32,
    pub silence_duration_secs: f32,
    pub min_transmission_length_secs: f32,
    /// Directory segment WAV files are written to. Created if missing.
    pub output_dir: PathBuf,
}

/// One finalized transmission segment, handed to the recorder's callback.
#[derive(Debug, Clone)]
pub struct RecordedSegment {
    pub path: PathBuf,
    pub channel_id: String,
    pub recorded_timestamp: DateTime<Utc>,
}

/// Builds the default ffmpeg-style decoder invocation: decode `stream_url`
/// to raw interleaved 16-bit little-endian PCM on stdout.
fn build_decoder_command(cfg: &RecorderConfig) -> Command {
    let mut cmd = Command::new(&cfg.decoder_command);
    cmd.args([
        "-i",
        cfg.stream_url.as_str(),
        "-f",
        "s16le",
        "-acodec",
        "pcm_s16le",
        "-ar",
        &cfg.sample_rate.to_string(),
        "-ac",
        &cfg.channels.to_string(),
        "-",
    ])
    .stdout(Stdio::piped())
    .stderr(Stdio::null())
    .stdin(Stdio::null());
    cmd
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn wav_filename(frequency: &str, when: DateTime<Utc>) -> String {
    let ts = when.format("%Y%m%d_%H%M%S_%3f");
    let freq = sanitize(&frequency.replace('.', "p"));
    format!("transmission_{ts}_{freq}.wav")
}

/// Write an accumulated `i16` PCM buffer out as a mono WAV file.
fn write_wav(path: &Path, samples: &[i16], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| AtcError::Invariant(format!("failed to create wav writer: {e}")))?;
    for &s in samples {
        writer
            .write_sample(s)
            .map_err(|e| AtcError::Invariant(format!("wav write failed: {e}")))?;
    }
    writer
        .finalize()
        .map_err(|e| AtcError::Invariant(format!("wav finalize failed: {e}")))?;
    Ok(())
}

/// Drives one channel's decode → VAD → segment-finalize loop.
///
/// Runs until the stream ends, the decoder fails, or the cancellation token
/// handed to [`run`](Self::run) fires.
pub struct SegmentRecorder<V: VoiceActivityDetector> {
    channel_id: String,
    frequency: String,
    config: RecorderConfig,
    vad: V,
}

impl<V: VoiceActivityDetector> SegmentRecorder<V> {
    pub fn new(
        channel_id: impl Into<String>,
        frequency: impl Into<String>,
        config: RecorderConfig,
        vad: V,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            frequency: frequency.into(),
            config,
            vad,
        }
    }

    /// Run the recorder loop, invoking `on_segment` for each finalized
    /// transmission. Returns once the stream ends or is cancelled.
    pub async fn run<F>(mut self, token: CancellationToken, mut on_segment: F) -> Result<()>
    where
        F: FnMut(RecordedSegment) + Send,
    {
        std::fs::create_dir_all(&self.config.output_dir)?;

        let mut child = spawn_decoder(&self.config)?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| AtcError::Decoder("decoder produced no stdout".into()))?;
        let mut reader = BufReader::new(&mut stdout);

        let chunks_per_second = self.config.sample_rate as f32 / CHUNK_SAMPLES as f32;
        let silence_chunks_threshold =
            (self.config.silence_duration_secs * chunks_per_second).ceil() as u32;
        let min_samples =
            (self.config.min_transmission_length_secs * self.config.sample_rate as f32) as usize;

        let mut state = SegmentState::new(silence_chunks_threshold);
        let mut byte_buf = [0u8; CHUNK_SAMPLES * 2];

        info!(channel = %self.channel_id, "segment recorder listening for transmissions");

        let result = loop {
            let read_result = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    break Ok(());
                }
                r = read_exact_or_eof(&mut reader, &mut byte_buf) => r,
            };

            let n = match read_result {
                Ok(0) => {
                    info!(channel = %self.channel_id, "decoder stream ended");
                    break Ok(());
                }
                Ok(n) => n,
                Err(e) => {
                    error!(channel = %self.channel_id, error = %e, "decoder read failed");
                    break Err(AtcError::Decoder(e.to_string()));
                }
            };

            let samples = bytes_to_i16(&byte_buf[..n]);
            let decision = self.vad.classify(&samples);
            let was_recording = state.recording;

            if let Some(finalized) = state.push(decision, &samples) {
                self.finalize_segment(&finalized, min_samples, &mut on_segment);
                info!(channel = %self.channel_id, "listening for transmissions");
            } else if !was_recording && state.recording {
                info!(channel = %self.channel_id, "transmission detected, recording");
            }
        };

        if let Some(finalized) = state.flush() {
            info!(channel = %self.channel_id, "flushing in-flight segment on shutdown");
            self.finalize_segment(&finalized, min_samples, &mut on_segment);
        }

        terminate_decoder(&mut child).await;
        result
    }

    fn finalize_segment<F: FnMut(RecordedSegment)>(
        &self,
        buffer: &[i16],
        min_samples: usize,
        on_segment: &mut F,
    ) {
        if buffer.len() < min_samples {
            warn!(
                channel = %self.channel_id,
                samples = buffer.len(),
                min = min_samples,
                "discarding transmission shorter than minimum length"
            );
            return;
        }

        let recorded_timestamp = Utc::now();
        let filename = wav_filename(&self.frequency, recorded_timestamp);
        let path = self.config.output_dir.join(filename);

        match write_wav(&path, buffer, self.config.sample_rate) {
            Ok(()) => {
                info!(channel = %self.channel_id, path = %path.display(), "saved transmission");
                on_segment(RecordedSegment {
                    path,
                    channel_id: self.channel_id.clone(),
                    recorded_timestamp,
                });
            }
            Err(e) => {
                error!(channel = %self.channel_id, error = %e, "failed to save transmission, discarding");
            }
        }
    }
}

/// The VAD hysteresis state machine (§4.1), pulled out of the decoder I/O
/// loop so it can be exercised directly without spawning a subprocess: feed
/// it classified chunks one at a time, get back a finalized buffer whenever
/// a transmission closes.
struct SegmentState {
    recording: bool,
    buffer: Vec<i16>,
    silence_count: u32,
    silence_chunks_threshold: u32,
}

impl SegmentState {
    fn new(silence_chunks_threshold: u32) -> Self {
        Self {
            recording: false,
            buffer: Vec::new(),
            silence_count: 0,
            silence_chunks_threshold,
        }
    }

    /// Feed one classified chunk. Returns the finalized buffer if this chunk
    /// closed out a transmission (silence counter reached the threshold).
    fn push(&mut self, decision: VadDecision, samples: &[i16]) -> Option<Vec<i16>> {
        match decision {
            VadDecision::Speech => {
                if !self.recording {
                    self.recording = true;
                    self.buffer.clear();
                }
                self.buffer.extend_from_slice(samples);
                self.silence_count = 0;
                None
            }
            VadDecision::Silence if self.recording => {
                self.buffer.extend_from_slice(samples);
                self.silence_count += 1;
                if self.silence_count >= self.silence_chunks_threshold {
                    self.recording = false;
                    self.silence_count = 0;
                    Some(std::mem::take(&mut self.buffer))
                } else {
                    None
                }
            }
            VadDecision::Silence => None,
        }
    }

    /// Finalize any in-flight segment on stream end/cancellation.
    fn flush(&mut self) -> Option<Vec<i16>> {
        if self.recording && !self.buffer.is_empty() {
            self.recording = false;
            Some(std::mem::take(&mut self.buffer))
        } else {
            None
        }
    }
}

fn spawn_decoder(cfg: &RecorderConfig) -> Result<Child> {
    build_decoder_command(cfg).spawn().map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            AtcError::DecoderNotFound(cfg.decoder_command.clone())
        } else {
            AtcError::Decoder(e.to_string())
        }
    })
}

/// SIGTERM then SIGKILL after 2s, per §5 (cancellation).
#[cfg(unix)]
async fn terminate_decoder(child: &mut Child) {
    if let Some(id) = child.id() {
        // SAFETY: `id` is this child's own pid, fetched from `Child::id()`
        // just above; sending it a signal has no memory-safety implications.
        unsafe {
            libc::kill(id as libc::pid_t, libc::SIGTERM);
        }
    }
    let wait = tokio::time::timeout(Duration::from_secs(2), child.wait()).await;
    if wait.is_err() {
        warn!("decoder did not exit after SIGTERM, killing");
        let _ = child.kill().await;
    }
}

#[cfg(not(unix))]
async fn terminate_decoder(child: &mut Child) {
    let wait = tokio::time::timeout(Duration::from_secs(2), child.wait()).await;
    if wait.is_err() {
        let _ = child.kill().await;
    }
}

async fn read_exact_or_eof<R: tokio::io::AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        let n = reader.read(&mut buf[total..]).await?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}

fn bytes_to_i16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_to_i16_round_trips_little_endian() {
        let samples: Vec<i16> = vec![0, 1, -1, 32767, -32768];
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        assert_eq!(bytes_to_i16(&bytes), samples);
    }

    #[test]
    fn wav_filename_embeds_frequency_and_timestamp() {
        let when = DateTime::parse_from_rfc3339("2026-07-26T10:20:30.456Z")
            .unwrap()
            .with_timezone(&Utc);
        let name = wav_filename("118.7", when);
        assert!(name.starts_with("transmission_20260726_102030"));
        assert!(name.contains("118p7"));
        assert!(name.ends_with(".wav"));
    }

    #[test]
    fn silence_chunks_threshold_matches_spec_formula() {
        let sample_rate = 16_000f32;
        let chunks_per_second = sample_rate / CHUNK_SAMPLES as f32;
        let silence_duration = 3.0f32;
        let threshold = (silence_duration * chunks_per_second).ceil() as u32;
        // 16000 / 1024 ≈ 15.625 chunks/sec * 3s ≈ 46.875 -> 47
        assert_eq!(threshold, 47);
    }

    // §8 boundary behaviors: the VAD hysteresis state machine, exercised
    // directly without a decoder subprocess.

    #[test]
    fn constant_silence_never_emits_a_segment() {
        let mut state = SegmentState::new(3);
        for _ in 0..20 {
            assert!(state.push(VadDecision::Silence, &[0i16; 4]).is_none());
        }
        assert!(state.flush().is_none());
    }

    #[test]
    fn constant_noise_opens_exactly_one_segment_closed_only_at_eof() {
        let mut state = SegmentState::new(3);
        for _ in 0..50 {
            assert!(state.push(VadDecision::Speech, &[9000i16; 4]).is_none());
        }
        // Still recording: nothing finalized mid-stream.
        assert!(state.recording);
        let finalized = state.flush().expect("flush should finalize the open segment");
        assert_eq!(finalized.len(), 50 * 4);
    }

    #[test]
    fn silence_gap_shorter_than_threshold_does_not_split_the_segment() {
        // S6: 2s voice, 1s silence, 2s voice, with a 3s silence threshold —
        // expected: one single segment spanning all 5s, never finalized
        // mid-stream.
        let chunks_per_second = 5u32; // arbitrary unit: 5 chunks == 1s
        let silence_threshold = 3 * chunks_per_second; // 3s
        let mut state = SegmentState::new(silence_threshold);

        let mut total_chunks = 0;
        for _ in 0..(2 * chunks_per_second) {
            assert!(state.push(VadDecision::Speech, &[8000i16; 4]).is_none());
            total_chunks += 1;
        }
        for _ in 0..(1 * chunks_per_second) {
            assert!(state.push(VadDecision::Silence, &[0i16; 4]).is_none());
            total_chunks += 1;
        }
        for _ in 0..(2 * chunks_per_second) {
            assert!(state.push(VadDecision::Speech, &[8000i16; 4]).is_none());
            total_chunks += 1;
        }

        assert!(state.recording, "segment must still be open after a sub-threshold silence gap");
        let finalized = state.flush().expect("flush should finalize the single spanning segment");
        assert_eq!(finalized.len(), total_chunks * 4);
    }

    #[test]
    fn silence_gap_reaching_threshold_finalizes_then_reopens() {
        let silence_threshold = 3;
        let mut state = SegmentState::new(silence_threshold);

        for _ in 0..5 {
            assert!(state.push(VadDecision::Speech, &[8000i16; 4]).is_none());
        }
        assert!(state.push(VadDecision::Silence, &[0i16; 4]).is_none());
        assert!(state.push(VadDecision::Silence, &[0i16; 4]).is_none());
        let finalized = state
            .push(VadDecision::Silence, &[0i16; 4])
            .expect("threshold reached, segment should finalize");
        assert_eq!(finalized.len(), 5 * 4);
        assert!(!state.recording);

        // A subsequent speech chunk opens a fresh segment.
        assert!(state.push(VadDecision::Speech, &[8000i16; 4]).is_none());
        assert!(state.recording);
    }

    #[test]
    fn flush_with_nothing_recording_is_a_no_op() {
        let mut state = SegmentState::new(3);
        assert!(state.flush().is_none());
    }
}

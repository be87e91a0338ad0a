//! Runtime configuration for the monitor and its components.
//!
//! Loading this from a config file or environment is out of scope for
//! `atc-core` (see spec non-goals) — the binary crate is responsible for
//! populating a [`MonitorConfig`] from CLI flags or its own config loader.
//! This module only owns the struct shape, its defaults, and normalization.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One radio channel to monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfig {
    /// Stable channel name (e.g. "PDX Tower").
    pub name: String,
    /// Frequency string (e.g. "118.7").
    pub frequency: String,
    /// HTTP(S) URL of the compressed audio stream.
    pub stream_url: String,
    /// Display color for UI consumers, `#RRGGBB`.
    #[serde(default = "default_channel_color")]
    pub color: String,
}

fn default_channel_color() -> String {
    "#00FF00".to_string()
}

/// Which surveillance provider backs the `SurveillancePoller`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SurveillanceSource {
    OpenSky,
    AdsbExchange,
    Local,
}

impl Default for SurveillanceSource {
    fn default() -> Self {
        SurveillanceSource::OpenSky
    }
}

/// All recognized configuration options (§6 of the specification).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct MonitorConfig {
    // -- audio / VAD --
    pub sample_rate: u32,
    pub channels: u16,
    pub vad_threshold: f32,
    pub silence_duration_secs: f32,
    pub min_transmission_length_secs: f32,
    /// Command used to spawn the external decoder process (e.g. `ffmpeg`).
    pub decoder_command: String,

    // -- transcription --
    pub model_size: String,
    pub num_transcription_workers: usize,

    // -- surveillance --
    pub enable_adsb: bool,
    pub adsb_source: SurveillanceSource,
    pub opensky_credentials_file: Option<String>,
    pub airport_lat: f64,
    pub airport_lon: f64,
    pub search_radius_nm: f64,

    // -- LLM correlation --
    pub enable_llm_correlation: bool,
    pub ollama_model: String,
    pub ollama_base_url: String,
    pub ollama_request_timeout_secs: u64,
    pub llm_max_adsb_contacts: usize,
    pub llm_max_transmissions: usize,
    pub correlation_window: usize,
    pub altitude_tolerance_ft: i32,
    pub position_tolerance_nm: f64,

    // -- channels --
    pub channels_config: Vec<ChannelConfig>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            channels: 1,
            vad_threshold: 0.1,
            silence_duration_secs: 3.0,
            min_transmission_length_secs: 1.0,
            decoder_command: "ffmpeg".to_string(),

            model_size: "large".to_string(),
            num_transcription_workers: 3,

            enable_adsb: true,
            adsb_source: SurveillanceSource::OpenSky,
            opensky_credentials_file: None,
            airport_lat: 0.0,
            airport_lon: 0.0,
            search_radius_nm: 40.0,

            enable_llm_correlation: true,
            ollama_model: "gpt-oss:20b".to_string(),
            ollama_base_url: "http://localhost:11434".to_string(),
            ollama_request_timeout_secs: 220,
            llm_max_adsb_contacts: 100,
            llm_max_transmissions: 25,
            correlation_window: 25,
            altitude_tolerance_ft: 500,
            position_tolerance_nm: 5.0,

            channels_config: Vec::new(),
        }
    }
}

impl MonitorConfig {
    /// Clamp/normalize fields to sane ranges, the way
    /// `AppSettings::normalize` does for the desktop app's settings.
    pub fn normalize(&mut self) {
        self.vad_threshold = self.vad_threshold.clamp(0.001, 0.999);
        self.silence_duration_secs = self.silence_duration_secs.max(0.1);
        self.min_transmission_length_secs = self.min_transmission_length_secs.max(0.0);
        self.num_transcription_workers = self.num_transcription_workers.max(1);
        self.search_radius_nm = self.search_radius_nm.max(1.0);
        self.llm_max_transmissions = self.llm_max_transmissions.min(10).max(0);
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.ollama_request_timeout_secs)
    }

    /// Rolling history length per channel: at least 3x the correlator batch size.
    pub fn channel_history_len(&self) -> usize {
        (self.correlation_window * 3).max(self.llm_max_transmissions * 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = MonitorConfig::default();
        assert_eq!(cfg.sample_rate, 16_000);
        assert_eq!(cfg.channels, 1);
        assert!((cfg.vad_threshold - 0.1).abs() < f32::EPSILON);
        assert!((cfg.silence_duration_secs - 3.0).abs() < f32::EPSILON);
    }

    #[test]
    fn normalize_clamps_out_of_range_threshold() {
        let mut cfg = MonitorConfig {
            vad_threshold: 5.0,
            num_transcription_workers: 0,
            llm_max_transmissions: 99,
            ..MonitorConfig::default()
        };
        cfg.normalize();
        assert!(cfg.vad_threshold < 1.0);
        assert_eq!(cfg.num_transcription_workers, 1);
        assert_eq!(cfg.llm_max_transmissions, 10);
    }

    #[test]
    fn channel_history_len_is_at_least_3x_batch_size() {
        let cfg = MonitorConfig {
            correlation_window: 25,
            ..MonitorConfig::default()
        };
        assert!(cfg.channel_history_len() >= 3 * 25);
    }
}

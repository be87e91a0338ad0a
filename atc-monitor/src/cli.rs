//! Command-line surface (§6): a single entry point with the flags the
//! specification names, merged onto [`atc_core::config::MonitorConfig`]'s
//! defaults. Loading a config *file* remains out of scope — see §6.1.

use clap::Parser;

use atc_core::config::MonitorConfig;

/// ATC voice/surveillance fusion monitor.
#[derive(Debug, Parser)]
#[command(name = "atc-monitor", about = "ATC voice/surveillance fusion monitor")]
pub struct Cli {
    /// Start continuous monitoring.
    #[arg(long)]
    pub monitor: bool,

    /// Monitoring duration in seconds. Runs until interrupted if omitted.
    #[arg(long)]
    pub duration: Option<u64>,

    /// Override the VAD RMS threshold.
    #[arg(long)]
    pub vad_threshold: Option<f32>,

    /// Override the silence duration (seconds) that finalizes a segment.
    #[arg(long)]
    pub silence_duration: Option<f32>,

    /// Audio stream URL for a single ad-hoc channel (used when no channel
    /// list is configured elsewhere).
    #[arg(long)]
    pub stream_url: Option<String>,

    /// Capture system audio instead of a remote stream. Out of scope for
    /// this core (§1): recognized and logged, not wired to a capture path.
    #[arg(long)]
    pub system_audio: bool,
}

impl Cli {
    /// Merge the flags this CLI recognizes onto `MonitorConfig::default()`.
    pub fn into_config(self) -> MonitorConfig {
        let mut config = MonitorConfig::default();

        if let Some(threshold) = self.vad_threshold {
            config.vad_threshold = threshold;
        }
        if let Some(silence) = self.silence_duration {
            config.silence_duration_secs = silence;
        }
        if let Some(url) = self.stream_url {
            config.channels_config.push(atc_core::config::ChannelConfig {
                name: "Ad-hoc".to_string(),
                frequency: "0.0".to_string(),
                stream_url: url,
                color: "#00FF00".to_string(),
            });
        }

        config.normalize();
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_url_flag_adds_an_ad_hoc_channel() {
        let cli = Cli {
            monitor: true,
            duration: None,
            vad_threshold: None,
            silence_duration: None,
            stream_url: Some("http://example.com/stream".to_string()),
            system_audio: false,
        };
        let config = cli.into_config();
        assert_eq!(config.channels_config.len(), 1);
        assert_eq!(config.channels_config[0].stream_url, "http://example.com/stream");
    }

    #[test]
    fn overrides_apply_and_then_normalize() {
        let cli = Cli {
            monitor: true,
            duration: None,
            vad_threshold: Some(5.0),
            silence_duration: Some(2.5),
            stream_url: None,
            system_audio: false,
        };
        let config = cli.into_config();
        assert!(config.vad_threshold < 1.0);
        assert!((config.silence_duration_secs - 2.5).abs() < f32::EPSILON);
    }
}

//! Per-channel runtime state owned exclusively by the [`crate::monitor::Monitor`]
//! (§3, "Ownership"): config, statistics, and a bounded rolling history of
//! recent transmissions.
//!
//! Grounded in `original_source/core/multi_channel_monitor.py`'s
//! `MultiChannelATCMonitor.channels`/`stats['channels']` dicts, translated
//! from two parallel untyped dicts under the GIL into one `ChannelState`
//! struct guarded by the monitor's single `parking_lot::Mutex`.

use chrono::{DateTime, Utc};

use atc_core::config::ChannelConfig;
use atc_core::models::Transmission;

/// Running counters for one channel, surfaced in `stats_update` events.
#[derive(Debug, Clone, Default)]
pub struct ChannelStats {
    pub recorded_count: u64,
    pub transcribed_count: u64,
    pub alert_count: u64,
    pub last_transmission: Option<DateTime<Utc>>,
}

/// One monitored channel: its static config, live stats, and a bounded
/// ring buffer of the last `history_len` transmissions (§3: `H >= 3 *`
/// the correlator batch size).
pub struct ChannelState {
    pub config: ChannelConfig,
    pub stats: ChannelStats,
    history: Vec<Transmission>,
    history_len: usize,
}

impl ChannelState {
    pub fn new(config: ChannelConfig, history_len: usize) -> Self {
        Self {
            config,
            stats: ChannelStats::default(),
            history: Vec::with_capacity(history_len),
            history_len: history_len.max(1),
        }
    }

    /// Append a newly-transcribed transmission, evicting the oldest entry
    /// once the ring buffer is at capacity (§3, §4.5).
    pub fn push_transmission(&mut self, tx: Transmission) {
        if self.history.len() >= self.history_len {
            self.history.remove(0);
        }
        self.history.push(tx);
    }

    /// The most recent `n` transmissions, oldest first — the view the
    /// correlator batches into a prompt.
    pub fn recent(&self, n: usize) -> Vec<Transmission> {
        let start = self.history.len().saturating_sub(n);
        self.history[start..].to_vec()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ChannelConfig {
        ChannelConfig {
            name: "PDX Tower".to_string(),
            frequency: "118.7".to_string(),
            stream_url: "http://example.com/stream".to_string(),
            color: "#00FF00".to_string(),
        }
    }

    fn tx(id: u64) -> Transmission {
        Transmission {
            id,
            channel_id: "PDX Tower".to_string(),
            frequency: "118.7".to_string(),
            timestamp: Utc::now(),
            segments: Vec::new(),
            text: format!("tx {id}"),
            audio_duration_secs: 1.0,
            transcription_delay_secs: 0.1,
        }
    }

    #[test]
    fn ring_buffer_evicts_oldest_past_capacity() {
        let mut ch = ChannelState::new(config(), 3);
        for i in 0..5 {
            ch.push_transmission(tx(i));
        }
        assert_eq!(ch.history_len(), 3);
        let recent = ch.recent(10);
        assert_eq!(recent.iter().map(|t| t.id).collect::<Vec<_>>(), vec![2, 3, 4]);
    }

    #[test]
    fn recent_caps_at_requested_count() {
        let mut ch = ChannelState::new(config(), 10);
        for i in 0..5 {
            ch.push_transmission(tx(i));
        }
        let recent = ch.recent(2);
        assert_eq!(recent.iter().map(|t| t.id).collect::<Vec<_>>(), vec![3, 4]);
    }
}

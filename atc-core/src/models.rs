//! Shared data model: surveillance contacts and voice transmissions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single surveillance observation of one aircraft at one instant.
///
/// `distance_nm`/`bearing_deg` are derived from a configured reference point
/// and are recomputed by the poller on every refresh — see
/// [`crate::surveillance::geo`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    /// 24-bit hex transponder address, uppercase (e.g. `"A1B2C3"`).
    pub icao24: String,
    /// Spoken identifier, if broadcast (e.g. `"DAL2617"`).
    pub callsign: Option<String>,
    /// Altitude in feet.
    pub altitude_ft: i32,
    /// Track/heading in degrees, `0..360`.
    pub track_deg: u16,
    /// Ground speed in knots.
    pub ground_speed_kt: i32,
    /// Vertical rate in feet/minute.
    pub vertical_rate_fpm: i32,
    pub latitude: f64,
    pub longitude: f64,
    pub on_ground: bool,
    /// 4-digit transponder squawk code, when the source exposes one.
    pub squawk: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Great-circle distance from the reference point, nautical miles.
    pub distance_nm: f64,
    /// Initial bearing from the reference point, degrees `0..360`.
    pub bearing_deg: f64,
}

/// A single recognised speech segment within a transmission, in seconds
/// relative to the start of the audio file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// A bounded voice utterance on one channel, transcribed to text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transmission {
    /// Monotonically generated id, unique within a monitor run.
    pub id: u64,
    pub channel_id: String,
    /// Frequency string, e.g. `"118.7"`.
    pub frequency: String,
    /// Wall-clock timestamp of transcription (not of recording).
    pub timestamp: DateTime<Utc>,
    /// Segments sorted by `start`.
    pub segments: Vec<TranscriptSegment>,
    pub text: String,
    pub audio_duration_secs: f64,
    /// `max(0, transcription_time - recorded_timestamp)`.
    pub transcription_delay_secs: f64,
}

impl Transmission {
    /// Audio duration derived from segment bounds: `max(end) - min(start)`.
    ///
    /// Returns `0.0` for an empty segment list.
    pub fn audio_duration_from_segments(segments: &[TranscriptSegment]) -> f64 {
        if segments.is_empty() {
            return 0.0;
        }
        let min_start = segments
            .iter()
            .map(|s| s.start)
            .fold(f64::INFINITY, f64::min);
        let max_end = segments
            .iter()
            .map(|s| s.end)
            .fold(f64::NEG_INFINITY, f64::max);
        (max_end - min_start).max(0.0)
    }

    /// `true` if every segment satisfies `end >= start` and segments are
    /// sorted by `start` — the invariant required by §3.
    pub fn segments_well_formed(&self) -> bool {
        let mut last_start = f64::NEG_INFINITY;
        for seg in &self.segments {
            if seg.end < seg.start {
                return false;
            }
            if seg.start < last_start {
                return false;
            }
            last_start = seg.start;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(start: f64, end: f64) -> TranscriptSegment {
        TranscriptSegment {
            start,
            end,
            text: String::new(),
        }
    }

    #[test]
    fn audio_duration_spans_min_start_to_max_end() {
        let segments = vec![seg(1.0, 2.0), seg(2.5, 4.0), seg(0.5, 1.0)];
        assert_eq!(
            Transmission::audio_duration_from_segments(&segments),
            3.5
        );
    }

    #[test]
    fn audio_duration_of_empty_segments_is_zero() {
        assert_eq!(Transmission::audio_duration_from_segments(&[]), 0.0);
    }

    #[test]
    fn well_formed_rejects_end_before_start() {
        let tx = Transmission {
            id: 0,
            channel_id: "a".into(),
            frequency: "118.7".into(),
            timestamp: Utc::now(),
            segments: vec![seg(1.0, 0.5)],
            text: String::new(),
            audio_duration_secs: 0.0,
            transcription_delay_secs: 0.0,
        };
        assert!(!tx.segments_well_formed());
    }

    #[test]
    fn well_formed_rejects_out_of_order_segments() {
        let tx = Transmission {
            id: 0,
            channel_id: "a".into(),
            frequency: "118.7".into(),
            timestamp: Utc::now(),
            segments: vec![seg(2.0, 3.0), seg(0.0, 1.0)],
            text: String::new(),
            audio_duration_secs: 0.0,
            transcription_delay_secs: 0.0,
        };
        assert!(!tx.segments_well_formed());
    }

    #[test]
    fn well_formed_accepts_sorted_segments() {
        let tx = Transmission {
            id: 0,
            channel_id: "a".into(),
            frequency: "118.7".into(),
            timestamp: Utc::now(),
            segments: vec![seg(0.0, 1.0), seg(1.0, 2.5)],
            text: String::new(),
            audio_duration_secs: 0.0,
            transcription_delay_secs: 0.0,
        };
        assert!(tx.segments_well_formed());
    }
}

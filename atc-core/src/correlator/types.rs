//! Data types exchanged with the LLM correlator.

use serde::{Deserialize, Serialize};

/// A single ADS-B contact, summarized for the prompt (not the full
/// [`crate::models::Contact`] — the LLM only needs identity/kinematics).
#[derive(Debug, Clone)]
pub struct ContactSummary {
    pub icao: String,
    pub callsign: Option<String>,
    pub altitude_ft: i32,
    pub heading_deg: u16,
    pub speed_kt: i32,
    pub squawk: Option<String>,
    /// Seconds since this contact was last observed, for prompt "age" text.
    pub age_secs: i64,
}

/// A single transmission, summarized for the prompt.
#[derive(Debug, Clone)]
pub struct TransmissionSummary {
    pub channel_name: String,
    pub text: String,
    pub age_secs: i64,
}

/// One correlation decision from the LLM (§4.4, correlation record fields).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Correlation {
    pub transmission_id: i64,
    pub extracted_identifier: String,
    pub extraction_confidence: f32,
    pub matched_icao: String,
    pub matched_callsign: Option<String>,
    pub match_confidence: f32,
    pub reasoning: String,
    #[serde(default)]
    pub flags: Vec<String>,
}

/// Alert severity, per §4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    High,
    Medium,
    Low,
}

/// An alert record (§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    #[serde(rename = "type")]
    pub kind: String,
    pub callsign: Option<String>,
    pub details: String,
    pub severity: Severity,
    pub confidence: f32,
}

/// Successful (or best-effort-repaired) correlator response.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CorrelatorResult {
    #[serde(default)]
    pub correlations: Vec<Correlation>,
    #[serde(default)]
    pub alerts: Vec<Alert>,
    #[serde(default)]
    pub summary: String,
}

/// Outcome of one `correlate` call: either a parsed result or a failure
/// record carrying the raw response text, per §4.4's failure semantics.
#[derive(Debug, Clone)]
pub enum CorrelatorOutcome {
    Ok(CorrelatorResult),
    Error { message: String, raw: String },
}

/// Rolling statistics, mirroring `OllamaCorrelator.stats`.
#[derive(Debug, Clone, Default)]
pub struct CorrelatorStats {
    pub api_calls: u64,
    pub total_tokens: u64,
    pub errors: u64,
    pub last_prompt_tokens: usize,
    response_times_secs: Vec<f64>,
}

impl CorrelatorStats {
    /// Number of samples kept for the moving average, per §4.4 (default 100).
    const WINDOW: usize = 100;

    pub fn record_response_time(&mut self, secs: f64) {
        self.response_times_secs.push(secs);
        if self.response_times_secs.len() > Self::WINDOW {
            self.response_times_secs.remove(0);
        }
    }

    pub fn average_response_time_secs(&self) -> f64 {
        if self.response_times_secs.is_empty() {
            return 0.0;
        }
        self.response_times_secs.iter().sum::<f64>() / self.response_times_secs.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moving_average_window_caps_at_100_samples() {
        let mut stats = CorrelatorStats::default();
        for i in 0..150 {
            stats.record_response_time(i as f64);
        }
        assert_eq!(stats.response_times_secs.len(), 100);
        // oldest 50 samples (0..50) were evicted, average is over 50..150
        let expected: f64 = (50..150).sum::<i32>() as f64 / 100.0;
        assert!((stats.average_response_time_secs() - expected).abs() < 1e-6);
    }
}

//! HTTP client for the correlator's generation endpoint, grounded in
//! `OllamaCorrelator.correlate`/`_parse_response`
//! (`original_source/analysis/ollama_correlator.py`): same request shape
//! (`{model, prompt, stream:false, options:{...}}`), same find-first-`{`/
//! find-last-`}` extraction, same timeout/connection-error failure
//! semantics. The best-effort repair step is new — see
//! [`super::repair`].

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use super::prompt::{build_prompt, PromptBudget};
use super::repair::{extract_json_span, repair_truncated_json};
use super::types::{
    Alert, ContactSummary, CorrelatorOutcome, CorrelatorResult, CorrelatorStats,
    TransmissionSummary,
};
use crate::error::{AtcError, Result};

/// Minimum alert confidence to survive the post-filter (§4.4, default 0.7).
const ALERT_CONFIDENCE_THRESHOLD: f32 = 0.7;
/// How close `eval_count` must be to `max_response_tokens` to flag a
/// response as likely truncated (§4.4).
const TRUNCATION_SAFETY_MARGIN: u32 = 16;

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
    top_p: f32,
    num_ctx: u32,
    repeat_penalty: f32,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

/// Parsed `/api/generate` response: the generated text plus the provider's
/// own token counts, when it reports them (§4.4, §6).
struct GenerateResponse {
    text: String,
    eval_count: Option<u32>,
    prompt_eval_count: Option<u32>,
}

/// `true` if `eval_count` is within [`TRUNCATION_SAFETY_MARGIN`] of
/// `max_response_tokens` — the response likely hit the model's output cap
/// rather than ending naturally (§4.4).
fn is_likely_truncated(eval_count: Option<u32>, max_response_tokens: u32) -> bool {
    eval_count.is_some_and(|eval| eval + TRUNCATION_SAFETY_MARGIN >= max_response_tokens)
}

/// Queries an Ollama-compatible `/api/generate` endpoint to correlate
/// transmissions against the current ADS-B contact set.
pub struct CorrelatorClient {
    client: Client,
    base_url: String,
    model: String,
    budget: PromptBudget,
    request_timeout: Duration,
    stats: Mutex<CorrelatorStats>,
}

impl CorrelatorClient {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        model: impl Into<String>,
        budget: PromptBudget,
        request_timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
            budget,
            request_timeout,
            stats: Mutex::new(CorrelatorStats::default()),
        }
    }

    pub fn stats_snapshot(&self) -> CorrelatorStats {
        self.stats.lock().clone()
    }

    /// Correlate `transmissions` against `contacts`. Returns
    /// `CorrelatorOutcome::Ok` with empty lists immediately if there are no
    /// transmissions to analyze (§4.4).
    pub async fn correlate(
        &self,
        contacts: &[ContactSummary],
        transmissions: &[TransmissionSummary],
    ) -> CorrelatorOutcome {
        if transmissions.is_empty() {
            return CorrelatorOutcome::Ok(CorrelatorResult {
                correlations: Vec::new(),
                alerts: Vec::new(),
                summary: "No transmissions".to_string(),
            });
        }

        let built = build_prompt(self.budget, contacts, transmissions);
        {
            let mut stats = self.stats.lock();
            stats.api_calls += 1;
            stats.last_prompt_tokens = built.estimated_tokens;
        }

        if built.estimated_tokens > self.budget.max_prompt_tokens() {
            warn!(
                estimated = built.estimated_tokens,
                max = self.budget.max_prompt_tokens(),
                "correlator prompt exceeds budget, sending anyway"
            );
        }

        info!(
            contacts = built.contacts_included,
            transmissions = built.transmissions_included,
            tokens = built.estimated_tokens,
            "querying correlator"
        );

        let start = Instant::now();
        let outcome = self.call_generate(&built.prompt).await;
        self.stats.lock().record_response_time(start.elapsed().as_secs_f64());

        match outcome {
            Ok(response) => {
                // Prefer the provider's own counts over the chars/4 estimate
                // once the call has actually happened; fall back to the
                // estimate if the provider didn't report them (§4.4).
                if let (Some(eval), Some(prompt_eval)) =
                    (response.eval_count, response.prompt_eval_count)
                {
                    let mut stats = self.stats.lock();
                    stats.total_tokens += (eval + prompt_eval) as u64;
                } else {
                    self.stats.lock().total_tokens += built.estimated_tokens as u64;
                }

                let likely_truncated = is_likely_truncated(
                    response.eval_count,
                    self.budget.max_response_tokens as u32,
                );
                if likely_truncated {
                    warn!(eval_count = ?response.eval_count, "correlator response likely truncated");
                }

                self.parse_and_repair(&response.text)
            }
            Err(e) => {
                self.stats.lock().errors += 1;
                CorrelatorOutcome::Error {
                    message: e.to_string(),
                    raw: String::new(),
                }
            }
        }
    }

    async fn call_generate(&self, prompt: &str) -> Result<GenerateResponse> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: 0.4,
                num_predict: self.budget.max_response_tokens as u32,
                top_p: 0.9,
                num_ctx: self.budget.context_window as u32,
                repeat_penalty: 1.1,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url.trim_end_matches('/')))
            .json(&request)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AtcError::Timeout
                } else {
                    AtcError::Http(e.to_string())
                }
            })?
            .error_for_status()
            .map_err(|e| AtcError::Http(e.to_string()))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| AtcError::Http(format!("invalid generate response: {e}")))?;

        Ok(GenerateResponse {
            text: body
                .get("response")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            eval_count: body.get("eval_count").and_then(|v| v.as_u64()).map(|n| n as u32),
            prompt_eval_count: body
                .get("prompt_eval_count")
                .and_then(|v| v.as_u64())
                .map(|n| n as u32),
        })
    }

    fn parse_and_repair(&self, response_text: &str) -> CorrelatorOutcome {
        let Some(span) = extract_json_span(response_text) else {
            return CorrelatorOutcome::Error {
                message: "no JSON object found in response".to_string(),
                raw: response_text.to_string(),
            };
        };

        if let Ok(parsed) = serde_json::from_str::<CorrelatorResult>(span) {
            return CorrelatorOutcome::Ok(self.post_filter(parsed));
        }

        if let Some(repaired) = repair_truncated_json(span) {
            if let Ok(parsed) = serde_json::from_str::<CorrelatorResult>(&repaired) {
                info!("recovered truncated correlator response via best-effort repair");
                return CorrelatorOutcome::Ok(self.post_filter(parsed));
            }
        }

        self.stats.lock().errors += 1;
        CorrelatorOutcome::Error {
            message: "failed to parse correlator response".to_string(),
            raw: response_text.to_string(),
        }
    }

    fn post_filter(&self, mut result: CorrelatorResult) -> CorrelatorResult {
        let before = result.alerts.len();
        result.alerts.retain(|a: &Alert| a.confidence >= ALERT_CONFIDENCE_THRESHOLD);
        let filtered = before - result.alerts.len();
        if filtered > 0 {
            info!(filtered, "dropped low-confidence alerts");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> CorrelatorClient {
        CorrelatorClient::new(
            Client::new(),
            "http://localhost:11434",
            "gpt-oss:20b",
            PromptBudget::default(),
            Duration::from_secs(220),
        )
    }

    #[test]
    fn well_formed_response_parses_directly() {
        let c = client();
        let text = r#"chatter: {"correlations": [], "alerts": [], "summary": "ok"}"#;
        match c.parse_and_repair(text) {
            CorrelatorOutcome::Ok(result) => assert_eq!(result.summary, "ok"),
            CorrelatorOutcome::Error { .. } => panic!("expected Ok"),
        }
    }

    #[test]
    fn truncated_response_is_repaired() {
        let c = client();
        let text = r#"{"correlations": [{"transmissionId": 0, "extractedIdentifier": "delta 26 17", "extractionConfidence": 0.9, "matchedIcao": "A1B2C3", "matchedCallsign": "DAL2617", "matchConfidence": 0.9, "reasoning": "matched", "flags": []}], "alerts": [], "summ"#;
        match c.parse_and_repair(text) {
            CorrelatorOutcome::Ok(result) => assert_eq!(result.correlations.len(), 1),
            CorrelatorOutcome::Error { message, .. } => {
                panic!("expected repair to succeed, got error: {message}")
            }
        }
    }

    #[test]
    fn unparseable_response_returns_error_with_raw_text() {
        let c = client();
        let text = "the model said something with no json at all";
        match c.parse_and_repair(text) {
            CorrelatorOutcome::Ok(_) => panic!("expected Error"),
            CorrelatorOutcome::Error { raw, .. } => assert_eq!(raw, text),
        }
    }

    #[test]
    fn eval_count_near_cap_is_flagged_truncated() {
        assert!(is_likely_truncated(Some(2040), 2048));
        assert!(!is_likely_truncated(Some(500), 2048));
        assert!(!is_likely_truncated(None, 2048));
    }

    #[test]
    fn low_confidence_alerts_are_filtered_out() {
        let c = client();
        let result = CorrelatorResult {
            correlations: vec![],
            alerts: vec![
                Alert {
                    kind: "MILITARY".to_string(),
                    callsign: Some("RCH123".to_string()),
                    details: "military callsign".to_string(),
                    severity: super::super::types::Severity::High,
                    confidence: 0.9,
                },
                Alert {
                    kind: "NON_TRANSPONDER".to_string(),
                    callsign: Some("N123AB".to_string()),
                    details: "low confidence".to_string(),
                    severity: super::super::types::Severity::Low,
                    confidence: 0.5,
                },
            ],
            summary: "two alerts".to_string(),
        };
        let filtered = c.post_filter(result);
        assert_eq!(filtered.alerts.len(), 1);
        assert_eq!(filtered.alerts[0].kind, "MILITARY");
    }
}

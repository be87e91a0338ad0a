//! Token-budgeted prompt assembly, grounded in
//! `original_source/analysis/ollama_correlator.py`'s `RollingContextManager`
//! (token-budget split, newest-first greedy fill) and `ContextBuilder`
//! (system-prompt vocabulary, analysis-template formatting).
//!
//! The 70/30 contact/transmission split and the hard cap of 10 on
//! `max_tx` are this crate's redesign target — the original Python splits
//! 60/40 with no hard cap on transmission count beyond the context window.

use super::types::{ContactSummary, TransmissionSummary};

/// Characters-per-token heuristic, per §4.4 (default ≈4.0 — deliberately a
/// slight overestimate of token count so the budget errs conservative).
const CHARS_PER_TOKEN: f64 = 4.0;
/// Constant safety buffer added to every token estimate.
const TOKEN_ESTIMATE_BUFFER: usize = 10;
/// Rough per-correlation JSON overhead used to size `max_tx`.
const TOKENS_PER_CORRELATION: usize = 60;
/// Fixed overhead for the JSON envelope (`correlations`/`alerts`/`summary`).
const JSON_OVERHEAD_TOKENS: usize = 40;
/// Hard cap on transmissions included regardless of remaining budget.
const MAX_TX_HARD_CAP: usize = 10;

/// Estimate the token count of `text` using the chars-per-token heuristic
/// plus a constant buffer — deliberately conservative (over-, not
/// under-estimates) so the prompt never silently exceeds the context
/// window.
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() as f64 / CHARS_PER_TOKEN) as usize + TOKEN_ESTIMATE_BUFFER
}

/// Parameters controlling prompt assembly (§4.4).
#[derive(Debug, Clone, Copy)]
pub struct PromptBudget {
    pub context_window: usize,
    pub max_response_tokens: usize,
}

impl Default for PromptBudget {
    fn default() -> Self {
        Self {
            context_window: 8192,
            max_response_tokens: 2048,
        }
    }
}

impl PromptBudget {
    pub fn max_prompt_tokens(&self) -> usize {
        self.context_window.saturating_sub(self.max_response_tokens)
    }

    /// `max_tx = floor((max_response - json_overhead) / tokens_per_correlation)`,
    /// hard-capped at 10.
    pub fn max_transmissions_by_response_budget(&self) -> usize {
        let numerator = self
            .max_response_tokens
            .saturating_sub(JSON_OVERHEAD_TOKENS);
        (numerator / TOKENS_PER_CORRELATION).min(MAX_TX_HARD_CAP)
    }
}

/// The fixed vocabulary/rules prompt describing the correlation task.
///
/// Grounded verbatim (in content, not code) in
/// `ContextBuilder.build_system_prompt`: airline ICAO↔phonetic table,
/// number-matching guidance, general-aviation N-number pattern, military
/// callsign list, and the required JSON output shape.
pub fn system_prompt() -> &'static str {
    r#"You are an aviation ATC correlation analyst matching radio transmissions to ADS-B data.

CRITICAL: FLEXIBLE CALLSIGN MATCHING
Airlines use ICAO codes in ADS-B but phonetic names on radio:
- DAL/DL = "Delta" (e.g., DAL2617 = "Delta 26 17" or "Delta 2617")
- UAL/UA = "United"
- AAL/AA = "American"
- SWA/WN = "Southwest"
- JBU/B6 = "JetBlue"
- SKW = "SkyWest"
- ENY = "Envoy"
- RPA = "Republic"
- ASA/AS = "Alaska"
- FFT = "Frontier"
- NKS = "Spirit"
- VIR = "Virgin"

NUMBER MATCHING - BE FLEXIBLE:
- "Delta 26 17" = DAL2617
- "Delta twenty-six seventeen" = DAL2617
- "Delta 2 6 1 7" = DAL2617
- Numbers might be spoken with pauses or grouped differently

GENERAL AVIATION:
- N-numbers: "November 1 2 3 Alpha Bravo" = N123AB
- Cessna/Piper/etc followed by tail number

TRANSCRIPTION QUALITY:
- Expect errors: "data" might be "delta", numbers may be wrong
- Use context clues: altitude, location mentioned
- Partial matches are valuable - note them

ALERTING RULES:
- Match aircraft when reasonably confident (>60%)
- Flag NON_TRANSPONDER only when:
  1. Callsign clearly extracted (not garbled)
  2. Definitely not in ADS-B list (check carefully!)
  3. Confidence > 70%
- Flag MILITARY for: REACH/RCH, VIPER, EAGLE, HAMMER, KING, RESCUE, EVAC, DUKE

OUTPUT FORMAT:
{
  "correlations": [
    {
      "transmissionId": <index>,
      "extractedIdentifier": "<what you heard>",
      "extractionConfidence": <0.0-1.0>,
      "matchedIcao": "<ICAO or NO_MATCH or UNCLEAR>",
      "matchedCallsign": "<ADS-B callsign if matched>",
      "matchConfidence": <0.0-1.0>,
      "reasoning": "<explanation including airline code matching>",
      "flags": []
    }
  ],
  "alerts": [
    {
      "type": "<MILITARY|NON_TRANSPONDER>",
      "callsign": "<extracted>",
      "details": "<why alerting>",
      "severity": "<HIGH|MEDIUM|LOW>",
      "confidence": <must be >0.7>
    }
  ],
  "summary": "<brief assessment>"
}"#
}

fn analysis_template(adsb_text: &str, tx_text: &str) -> String {
    format!(
        "CURRENT ADS-B CONTACTS:\n{adsb_text}\n\nRECENT ATC TRANSMISSIONS TO ANALYZE:\n{tx_text}\n\n\
Analyze each transmission and respond with JSON matching the specified format.\n\
Remember: Match callsigns flexibly (DAL2617=\"delta 26 17\", UAL=\"united\", AAL=\"american\", SWA=\"southwest\").\n\
Only alert for NON_TRANSPONDER if callsign is CLEARLY extracted AND confirmed absent from ADS-B data."
    )
}

fn format_contact(c: &ContactSummary) -> String {
    let callsign = c.callsign.as_deref().unwrap_or("--------");
    let squawk = c.squawk.as_deref().unwrap_or("----");
    let age = if c.age_secs < 120 {
        format!("{}s", c.age_secs)
    } else {
        format!("{}m", c.age_secs / 60)
    };
    format!(
        "{} {:8} {:5}ft {:03}\u{b0} {:3}kt {} ({})",
        c.icao, callsign, c.altitude_ft, c.heading_deg, c.speed_kt, squawk, age
    )
}

fn format_transmission(idx: usize, tx: &TransmissionSummary) -> String {
    let text = if tx.text.chars().count() > 200 {
        let truncated: String = tx.text.chars().take(200).collect();
        format!("{truncated}...")
    } else {
        tx.text.clone()
    };
    format!("[{idx}] ({}s) {}: \"{text}\"", tx.age_secs, tx.channel_name)
}

fn format_contacts(contacts: &[ContactSummary]) -> String {
    if contacts.is_empty() {
        return "(no contacts)".to_string();
    }
    contacts
        .iter()
        .map(format_contact)
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_transmissions(transmissions: &[TransmissionSummary]) -> String {
    if transmissions.is_empty() {
        return "(no transmissions)".to_string();
    }
    transmissions
        .iter()
        .enumerate()
        .map(|(idx, tx)| format_transmission(idx, tx))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Result of [`build_prompt`]: the assembled prompt plus how much of each
/// input list actually made it in.
pub struct BuiltPrompt {
    pub prompt: String,
    pub contacts_included: usize,
    pub transmissions_included: usize,
    pub estimated_tokens: usize,
}

/// Assemble the full prompt (system prompt + analysis template + data),
/// greedily admitting the newest contacts and transmissions first until
/// their respective budgets (70% contacts / 30% transmissions of the
/// remaining token budget) are exhausted.
pub fn build_prompt(
    budget: PromptBudget,
    contacts: &[ContactSummary],
    transmissions: &[TransmissionSummary],
) -> BuiltPrompt {
    let system = system_prompt();
    let system_tokens = estimate_tokens(system);

    let empty_template = analysis_template("", "");
    let template_tokens = estimate_tokens(&empty_template);

    let available = budget
        .max_prompt_tokens()
        .saturating_sub(system_tokens)
        .saturating_sub(template_tokens);

    let contact_budget = (available as f64 * 0.7) as usize;
    let tx_budget = available.saturating_sub(contact_budget);

    let max_tx_by_response = budget.max_transmissions_by_response_budget();

    let mut included_contacts: Vec<&ContactSummary> = Vec::new();
    let mut contact_tokens = 0usize;
    for contact in contacts.iter().rev() {
        let tokens = estimate_tokens(&format_contact(contact));
        if contact_tokens + tokens <= contact_budget {
            included_contacts.insert(0, contact);
            contact_tokens += tokens;
        } else {
            break;
        }
    }

    let mut included_tx: Vec<&TransmissionSummary> = Vec::new();
    let mut tx_tokens = 0usize;
    for tx in transmissions.iter().rev() {
        if included_tx.len() >= max_tx_by_response {
            break;
        }
        let tokens = estimate_tokens(&format_transmission(0, tx));
        if tx_tokens + tokens <= tx_budget {
            included_tx.insert(0, tx);
            tx_tokens += tokens;
        } else {
            break;
        }
    }

    let contacts_owned: Vec<ContactSummary> = included_contacts.into_iter().cloned().collect();
    let tx_owned: Vec<TransmissionSummary> = included_tx.into_iter().cloned().collect();

    let adsb_text = format_contacts(&contacts_owned);
    let tx_text = format_transmissions(&tx_owned);
    let template = analysis_template(&adsb_text, &tx_text);

    let prompt = format!("{system}\n\n{template}");
    let estimated_tokens = estimate_tokens(&prompt);

    BuiltPrompt {
        prompt,
        contacts_included: contacts_owned.len(),
        transmissions_included: tx_owned.len(),
        estimated_tokens,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(icao: &str, callsign: Option<&str>) -> ContactSummary {
        ContactSummary {
            icao: icao.to_string(),
            callsign: callsign.map(|s| s.to_string()),
            altitude_ft: 5000,
            heading_deg: 90,
            speed_kt: 250,
            squawk: None,
            age_secs: 5,
        }
    }

    fn tx(text: &str) -> TransmissionSummary {
        TransmissionSummary {
            channel_name: "PDX Tower".to_string(),
            text: text.to_string(),
            age_secs: 1,
        }
    }

    #[test]
    fn max_tx_by_response_budget_is_hard_capped_at_10() {
        let budget = PromptBudget {
            context_window: 1_000_000,
            max_response_tokens: 1_000_000,
        };
        assert_eq!(budget.max_transmissions_by_response_budget(), 10);
    }

    #[test]
    fn empty_inputs_produce_placeholder_text() {
        let built = build_prompt(PromptBudget::default(), &[], &[]);
        assert!(built.prompt.contains("(no contacts)"));
        assert!(built.prompt.contains("(no transmissions)"));
        assert_eq!(built.contacts_included, 0);
        assert_eq!(built.transmissions_included, 0);
    }

    #[test]
    fn newest_items_are_preferred_under_a_tight_budget() {
        let budget = PromptBudget {
            context_window: 600,
            max_response_tokens: 100,
        };
        let contacts: Vec<ContactSummary> = (0..50)
            .map(|i| contact(&format!("ICAO{i:02}"), Some(&format!("CS{i:02}"))))
            .collect();
        let built = build_prompt(budget, &contacts, &[]);
        assert!(built.contacts_included < contacts.len());
        assert!(built.prompt.contains(&format!("ICAO{:02}", contacts.len() - 1)));
    }

    #[test]
    fn transmission_count_never_exceeds_hard_cap() {
        let txs: Vec<TransmissionSummary> = (0..30).map(|i| tx(&format!("msg {i}"))).collect();
        let built = build_prompt(PromptBudget::default(), &[], &txs);
        assert!(built.transmissions_included <= MAX_TX_HARD_CAP);
    }

    #[test]
    fn long_transmission_text_is_truncated_in_output() {
        let long_text = "a".repeat(400);
        let built = build_prompt(PromptBudget::default(), &[], &[tx(&long_text)]);
        assert!(built.prompt.contains("..."));
    }
}

//! LLM-based transmission-to-contact correlator (§4.4).

pub mod client;
pub mod prompt;
pub mod repair;
pub mod types;

pub use client::CorrelatorClient;
pub use prompt::{build_prompt, system_prompt, BuiltPrompt, PromptBudget};
pub use repair::{extract_json_span, repair_truncated_json};
pub use types::{
    Alert, Correlation, CorrelatorOutcome, CorrelatorResult, CorrelatorStats, ContactSummary,
    Severity, TransmissionSummary,
};

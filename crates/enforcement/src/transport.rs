//! LLM transport contract.
//!
//! Two operations: `generate` returns the model's text for a prompt, and
//! `invoke_json` returns parsed JSON for structured calls (classification,
//! judging, fact extraction). Implementations return whole responses (no
//! streams) and raise on transport failure; callers treat failure as the
//! documented per-verifier fallback. Timeouts are the implementation's
//! responsibility and surface as [`TransportError::Timeout`].

use serde_json::Value as JsonValue;
use thiserror::Error;

/// Transport failures. Callers never propagate these past the scorer.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport failure: {0}")]
    Failed(String),
    #[error("transport timed out after {0} ms")]
    Timeout(u64),
    #[error("transport returned invalid json: {0}")]
    InvalidJson(String),
}

/// A system/user prompt pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    /// Collapse into a single text block (system first, when present).
    #[must_use]
    pub fn flattened(&self) -> String {
        if self.system.is_empty() {
            self.user.clone()
        } else {
            format!("{}\n\n{}", self.system, self.user)
        }
    }
}

/// Blocking LLM transport used for generation, classification, judging, and
/// the fact-extraction fallback.
pub trait LlmTransport: Send + Sync {
    /// Generate free text for a prompt.
    fn generate(&self, prompt: &Prompt) -> Result<String, TransportError>;

    /// Invoke the model expecting a JSON object back.
    fn invoke_json(&self, prompt: &str) -> Result<JsonValue, TransportError>;
}

/// Canned transport: returns a fixed response for every call. Used when the
/// caller supplies a pre-generated response and in tests.
#[derive(Debug, Clone)]
pub struct StaticTransport {
    response: String,
}

impl StaticTransport {
    #[must_use]
    pub fn new(response: impl Into<String>) -> Self {
        Self { response: response.into() }
    }
}

impl LlmTransport for StaticTransport {
    fn generate(&self, _prompt: &Prompt) -> Result<String, TransportError> {
        Ok(self.response.clone())
    }

    fn invoke_json(&self, _prompt: &str) -> Result<JsonValue, TransportError> {
        serde_json::from_str(&self.response)
            .map_err(|e| TransportError::InvalidJson(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattened_orders_system_first() {
        let p = Prompt { system: "sys".into(), user: "usr".into() };
        assert_eq!(p.flattened(), "sys\n\nusr");
        let p = Prompt { system: String::new(), user: "usr".into() };
        assert_eq!(p.flattened(), "usr");
    }

    #[test]
    fn static_transport_round_trips() {
        let t = StaticTransport::new(r#"{"score": 0.9}"#);
        let v = t.invoke_json("ignored").unwrap();
        assert_eq!(v["score"], 0.9);
        let t2 = StaticTransport::new("not json");
        assert!(matches!(t2.invoke_json("x"), Err(TransportError::InvalidJson(_))));
    }
}

use crate::llm::Provider;
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone)]
pub struct LlmDiagnosticsError {
    pub provider: Provider,
    pub stage: &'static str,
    pub model: String,
    pub detail: String,
    pub raw_output: Option<String>,
    pub raw_response_json: Option<Value>,
}

impl LlmDiagnosticsError {
    /// HTTP status carried in `detail`, when the failure came from the transport.
    pub fn status(&self) -> Option<u16> {
        self.detail
            .strip_prefix("status=")
            .and_then(|s| s.split_whitespace().next())
            .and_then(|s| s.parse().ok())
    }
}

impl fmt::Display for LlmDiagnosticsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LLM error (provider={:?}, stage={}, model={}): {}",
            self.provider, self.stage, self.model, self.detail
        )
    }
}

impl std::error::Error for LlmDiagnosticsError {}

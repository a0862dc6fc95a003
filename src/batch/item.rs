use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One row of input to classify.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub input: String,
}

impl WorkItem {
    pub fn new(id: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            input: input.into(),
        }
    }
}

/// A ranked alternative at one token position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopLogprob {
    pub token: String,
    pub logprob: f64,
}

/// One generated token with its log-probability and the top-k alternatives
/// returned for the same position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenLogprob {
    pub token: String,
    pub logprob: f64,
    #[serde(default)]
    pub top_logprobs: Vec<TopLogprob>,
}

impl TokenLogprob {
    #[cfg(test)]
    pub fn new(token: impl Into<String>, logprob: f64, top_logprobs: Vec<TopLogprob>) -> Self {
        Self {
            token: token.into(),
            logprob,
            top_logprobs,
        }
    }
}

/// Token accounting reported by the service for a single call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

/// Outcome of classifying one [`WorkItem`]. One record per id; a retry
/// replaces the previous record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub id: String,
    pub success: bool,
    #[serde(default)]
    pub input: String,
    #[serde(alias = "duration", default)]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<Vec<TokenLogprob>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(
        alias = "system_fingerprint",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub model_fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

impl ClassificationResult {
    /// Successful classification with a parsed (or raw-text) output.
    pub fn success(
        id: impl Into<String>,
        input: impl Into<String>,
        duration_ms: u64,
        output: Value,
    ) -> Self {
        Self {
            id: id.into(),
            success: true,
            input: input.into(),
            duration_ms,
            output: Some(output),
            error: None,
            logprobs: None,
            usage: None,
            model_fingerprint: None,
            model: None,
            cost: None,
        }
    }

    pub fn failure(
        id: impl Into<String>,
        input: impl Into<String>,
        duration_ms: u64,
        error: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            success: false,
            input: input.into(),
            duration_ms,
            output: None,
            error: Some(error.into()),
            logprobs: None,
            usage: None,
            model_fingerprint: None,
            model: None,
            cost: None,
        }
    }

    /// Whether this failure was a rejection for exceeding the request-rate quota.
    /// Detection is textual: the error message mentions HTTP 429.
    pub fn is_rate_limited(&self) -> bool {
        !self.success && self.error.as_deref().is_some_and(|e| e.contains("429"))
    }
}

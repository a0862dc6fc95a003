use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::debug;

use super::error::OpenAiError;
use super::types::{ChatMessage, ChatRequest, ChatResponse, ErrorBody};
use crate::batch::{ClassificationResult, WorkItem};
use crate::dispatcher::Classifier;
use crate::pricing;

pub const API_URL: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAiClient {
    api_key: String,
    client: Client,
    base_url: String,
}

impl OpenAiClient {
    /// Create a client for `base_url`, normally [`API_URL`].
    pub fn with_base_url(
        api_key: String,
        base_url: String,
        timeout: Duration,
    ) -> Result<Self, OpenAiError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            api_key,
            client,
            base_url,
        })
    }

    pub async fn send_chat(&self, req: &ChatRequest) -> Result<ChatResponse, OpenAiError> {
        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(req)
            .send()
            .await?;

        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let message = error_message(response, status).await;
            return Err(OpenAiError::RateLimited { message });
        }

        if !status.is_success() {
            let message = error_message(response, status).await;
            return Err(OpenAiError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.text().await?;
        serde_json::from_str::<ChatResponse>(&body)
            .map_err(|e| OpenAiError::ParseError(e.to_string()))
    }
}

// `error.message` from the body when present, otherwise `HTTP <status>`.
async fn error_message(response: reqwest::Response, status: StatusCode) -> String {
    let fallback = format!("HTTP {}", status.as_u16());
    match response.json::<ErrorBody>().await {
        Ok(body) => body
            .error
            .message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(fallback),
        Err(_) => fallback,
    }
}

/// Per-run request settings shared by every call.
#[derive(Debug, Clone)]
pub struct ClassifyOptions {
    pub model: String,
    pub temperature: f32,
    pub seed: Option<i64>,
    pub top_logprobs: Option<u8>,
    pub system_prompt: String,
    /// Normalized `response_format` document.
    pub response_format: Value,
}

/// Classifies items through the Chat Completions API with structured output.
pub struct OpenAiClassifier {
    client: OpenAiClient,
    options: ClassifyOptions,
}

impl OpenAiClassifier {
    pub fn new(client: OpenAiClient, options: ClassifyOptions) -> Self {
        Self { client, options }
    }

    fn build_request(&self, input: &str) -> ChatRequest {
        let opts = &self.options;
        ChatRequest {
            model: opts.model.clone(),
            messages: vec![
                ChatMessage::system(opts.system_prompt.clone()),
                ChatMessage::user(input),
            ],
            temperature: opts.temperature,
            response_format: opts.response_format.clone(),
            seed: opts.seed,
            logprobs: opts.top_logprobs.map(|_| true),
            top_logprobs: opts.top_logprobs,
        }
    }

    fn build_result(
        &self,
        item: &WorkItem,
        duration_ms: u64,
        response: ChatResponse,
    ) -> ClassificationResult {
        let Some(choice) = response.choices.into_iter().next() else {
            let err = OpenAiError::ParseError("response contained no choices".into());
            return ClassificationResult::failure(
                &item.id,
                &item.input,
                duration_ms,
                err.to_string(),
            );
        };

        // Unparseable content is kept as raw text; the call still succeeded.
        let output = match choice.message.content {
            Some(content) => serde_json::from_str(&content).unwrap_or(Value::String(content)),
            None => Value::Null,
        };

        let model = self.options.model.clone();
        let mut result = ClassificationResult::success(&item.id, &item.input, duration_ms, output);
        result.logprobs = choice.logprobs.and_then(|l| l.content);
        result.cost = response
            .usage
            .as_ref()
            .and_then(|usage| pricing::cost_from_usage(&model, usage));
        result.usage = response.usage;
        result.model_fingerprint = response.system_fingerprint;
        result.model = Some(model);
        result
    }
}

impl Classifier for OpenAiClassifier {
    async fn classify(&self, item: &WorkItem) -> ClassificationResult {
        let req = self.build_request(&item.input);
        let started = Instant::now();
        let outcome = self.client.send_chat(&req).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(response) => {
                debug!(id = %item.id, duration_ms, "classification call succeeded");
                self.build_result(item, duration_ms, response)
            }
            Err(e) => {
                debug!(id = %item.id, duration_ms, "classification call failed: {e}");
                ClassificationResult::failure(&item.id, &item.input, duration_ms, e.to_string())
            }
        }
    }
}

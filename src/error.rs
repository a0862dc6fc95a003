use thiserror::Error;

use crate::openai::OpenAiError;

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Missing API key. Provide --key or set OPENAI_API_KEY.")]
    MissingApiKey,

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Input error: {0}")]
    Input(String),

    #[error("{kind} column not found in CSV headers: {name}")]
    ColumnNotFound { kind: &'static str, name: String },

    #[error("OpenAI error: {0}")]
    OpenAi(#[from] OpenAiError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

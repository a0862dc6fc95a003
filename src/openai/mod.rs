pub mod client;
pub mod error;
pub mod types;

pub use client::{ClassifyOptions, OpenAiClassifier, OpenAiClient};
pub use error::OpenAiError;

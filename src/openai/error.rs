//! Tipos de erro para o cliente da API OpenAI.
//!
//! Define [`OpenAiError`] com variantes para rate limiting, erros da API,
//! erros de rede e respostas malformadas. A mensagem de
//! [`RateLimited`](OpenAiError::RateLimited) sempre contém `HTTP 429`, que é
//! como o dispatcher reconhece o sinal de rate limit a partir do texto do erro.

use thiserror::Error;

/// Erros que podem ocorrer ao interagir com a API da OpenAI.
#[derive(Debug, Error)]
pub enum OpenAiError {
    /// O servidor retornou HTTP 429 (rate limit).
    #[error("HTTP 429: {message}")]
    RateLimited { message: String },

    /// Erro retornado pela API (ex.: 401 chave inválida, 500 erro interno).
    /// A mensagem vem de `error.message` no corpo, ou `HTTP <status>` se ausente.
    #[error("{message}")]
    ApiError { status: u16, message: String },

    /// Falha de rede subjacente (DNS, conexão recusada, timeout).
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// A resposta não tinha o formato esperado (ex.: sem `choices`).
    #[error("failed to parse API response: {0}")]
    ParseError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_display_mentions_429() {
        let err = OpenAiError::RateLimited {
            message: "Rate limit reached for gpt-4o".into(),
        };
        assert_eq!(err.to_string(), "HTTP 429: Rate limit reached for gpt-4o");
    }

    #[test]
    fn api_error_display_is_message() {
        let err = OpenAiError::ApiError {
            status: 401,
            message: "Incorrect API key provided".into(),
        };
        assert_eq!(err.to_string(), "Incorrect API key provided");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<OpenAiError>();
    }
}

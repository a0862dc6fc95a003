//! Tipos de dados para requisições e respostas do endpoint Chat Completions.
//!
//! Todas as structs derivam `Serialize` e `Deserialize` para conversão JSON
//! conforme o formato esperado por `v1/chat/completions`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::batch::{TokenLogprob, Usage};

/// Corpo da requisição para `/v1/chat/completions`.
///
/// `response_format` carrega o schema de saída estruturada já normalizado.
/// `seed`, `logprobs` e `top_logprobs` só são enviados quando definidos.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Identificador do modelo (ex.: "gpt-4o").
    pub model: String,
    /// Mensagens de sistema e usuário.
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub response_format: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<bool>,
    /// Quantidade de alternativas por posição de token (top-k).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_logprobs: Option<u8>,
}

/// Uma mensagem da conversa.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Papel do remetente: "system", "user" ou "assistant".
    pub role: String,
    /// Conteúdo textual. `None` em respostas sem texto (ex.: recusa).
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: Some(content.into()),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: Some(content.into()),
        }
    }
}

/// Resposta de `/v1/chat/completions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub id: String,
    /// Modelo que gerou a resposta.
    #[serde(default)]
    pub model: String,
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<Usage>,
    /// Identifica a configuração de backend que atendeu a chamada.
    #[serde(default)]
    pub system_fingerprint: Option<String>,
}

/// Uma das alternativas geradas; usamos sempre a primeira.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,
    pub message: ChatMessage,
    #[serde(default)]
    pub logprobs: Option<ChoiceLogprobs>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Log-probabilidades por token do conteúdo gerado.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoiceLogprobs {
    #[serde(default)]
    pub content: Option<Vec<TokenLogprob>>,
}

/// Corpo de erro padrão da API: `{"error": {"message": ...}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub message: Option<String>,
}

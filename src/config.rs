//! Configuração do batch-classify carregada a partir de `batch-classify.toml`.
//!
//! A struct [`AppConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `OPENAI_API_KEY` tem precedência sobre o arquivo,
//! e um arquivo passado com `--key` tem precedência sobre ambos.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::ClassifyError;
use crate::openai::OpenAiClient;
use crate::openai::client::API_URL;
use crate::pricing;

/// Nome do arquivo de configuração procurado no diretório atual.
pub const CONFIG_FILE: &str = "batch-classify.toml";

/// RPM usado quando nem o arquivo nem a tabela de modelos definem um valor.
pub const FALLBACK_RPM: f64 = 60.0;

/// Configuração de nível superior carregada de `batch-classify.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Chave da API OpenAI.
    #[serde(default)]
    pub api_key: String,

    /// Modelo padrão quando não especificado via CLI.
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default)]
    pub temperature: f32,

    /// Semente para amostragem reprodutível.
    #[serde(default)]
    pub seed: Option<i64>,

    /// Quantidade de alternativas por token; ausente desliga logprobs.
    #[serde(default)]
    pub top_logprobs: Option<u8>,

    /// Requisições por minuto desejadas.
    #[serde(default)]
    pub rpm: Option<f64>,

    /// Endpoint de Chat Completions.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Timeout por requisição HTTP, em segundos.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

// Valor padrão para o modelo: "gpt-4o".
fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_base_url() -> String {
    API_URL.to_string()
}

// Valor padrão para o timeout: 120s.
fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            temperature: 0.0,
            seed: None,
            top_logprobs: None,
            rpm: None,
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl AppConfig {
    /// Carrega a configuração de `batch-classify.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load() -> Result<Self, ClassifyError> {
        let mut config = Self::load_from(Path::new(CONFIG_FILE))?;

        // Variável de ambiente tem precedência sobre o arquivo de configuração para a chave API.
        config.apply_env_key(std::env::var("OPENAI_API_KEY").ok());
        Ok(config)
    }

    /// Lê um arquivo específico, sem consultar o ambiente.
    pub fn load_from(path: &Path) -> Result<Self, ClassifyError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config = toml::from_str::<AppConfig>(&contents)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_key(&mut self, key: Option<String>) {
        if let Some(key) = key
            && !key.trim().is_empty()
        {
            self.api_key = key.trim().to_string();
        }
    }

    fn validate(&self) -> Result<(), ClassifyError> {
        if let Some(rpm) = self.rpm
            && !(rpm.is_finite() && rpm > 0.0)
        {
            return Err(ClassifyError::Config(format!("rpm must be positive, got {rpm}")));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ClassifyError::Config(format!(
                "temperature must be between 0 and 2, got {}",
                self.temperature
            )));
        }
        if self.top_logprobs.is_some_and(|k| k > 20) {
            return Err(ClassifyError::Config("top_logprobs must be at most 20".into()));
        }
        Ok(())
    }

    /// Resolve a chave final: arquivo `--key` > ambiente > arquivo de configuração.
    pub fn resolve_api_key(&self, key_file: Option<&Path>) -> Result<String, ClassifyError> {
        if let Some(path) = key_file {
            let key = std::fs::read_to_string(path)?.trim().to_string();
            if key.is_empty() {
                return Err(ClassifyError::Config(format!("key file {} is empty", path.display())));
            }
            return Ok(key);
        }
        if self.api_key.is_empty() {
            return Err(ClassifyError::MissingApiKey);
        }
        Ok(self.api_key.clone())
    }

    /// Cria o cliente HTTP com o endpoint e o timeout configurados.
    pub fn client(&self, api_key: String) -> Result<OpenAiClient, ClassifyError> {
        let timeout = Duration::from_secs(self.request_timeout_secs);
        Ok(OpenAiClient::with_base_url(api_key, self.base_url.clone(), timeout)?)
    }

    /// RPM alvo para `model`: valor explícito, depois o limite do modelo, depois 60.
    pub fn resolve_rpm(&self, model: &str, cli_rpm: Option<f64>) -> f64 {
        cli_rpm
            .or(self.rpm)
            .or_else(|| pricing::default_rpm(model))
            .unwrap_or(FALLBACK_RPM)
    }
}

//! Interface de linha de comando do batch-classify baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, status, estimate)
//! e a flag global --verbose.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Classificador de textos em lote com concorrência adaptativa e confiança por token.
#[derive(Debug, Parser)]
#[command(name = "batch-classify", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Classifica todas as linhas de um CSV.
    Run(RunArgs),

    /// Resume um arquivo de resultados JSONL.
    Status {
        /// Arquivo JSONL produzido por `run`.
        results: PathBuf,

        /// Schema usado no run, para localizar o token da classificação.
        #[arg(long)]
        schema: Option<PathBuf>,

        /// Lista cada linha com sua classificação e confiança.
        #[arg(long, default_value_t = false)]
        rows: bool,
    },

    /// Estima tokens e custo antes de executar.
    Estimate {
        /// Arquivo com o prompt de sistema.
        #[arg(long)]
        prompt: PathBuf,

        /// CSV de entrada.
        #[arg(long)]
        csv: PathBuf,

        #[arg(long)]
        text_col: Option<String>,

        #[arg(long)]
        model: Option<String>,

        /// Tokens de saída assumidos por requisição.
        #[arg(long)]
        output_tokens: Option<u64>,
    },
}

/// Argumentos do subcomando `run`.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Arquivo com o prompt de sistema.
    #[arg(long)]
    pub prompt: PathBuf,

    /// Arquivo JSON com o response_format (ou um JSON schema puro).
    #[arg(long)]
    pub schema: PathBuf,

    /// CSV de entrada.
    #[arg(long)]
    pub csv: PathBuf,

    /// Coluna de identificador; inferida quando ausente.
    #[arg(long)]
    pub id_col: Option<String>,

    /// Coluna de texto; inferida quando ausente.
    #[arg(long)]
    pub text_col: Option<String>,

    #[arg(long)]
    pub model: Option<String>,

    #[arg(long)]
    pub temperature: Option<f32>,

    #[arg(long)]
    pub seed: Option<i64>,

    /// Pede logprobs com este número de alternativas por token (0-20).
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=20))]
    pub top_logprobs: Option<u8>,

    /// Requisições por minuto desejadas.
    #[arg(long)]
    pub rpm: Option<f64>,

    /// Processa apenas as primeiras N linhas.
    #[arg(long)]
    pub limit: Option<usize>,

    /// Arquivo JSONL de saída.
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Resultados anteriores; linhas bem-sucedidas são puladas.
    #[arg(long)]
    pub resume: Option<PathBuf>,

    /// Arquivo contendo a chave da API.
    #[arg(long)]
    pub key: Option<PathBuf>,
}

use reqwest::Url;
use serde::Deserialize;
use std::env;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

use crate::processing::tokens::EstimatorKind;

const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_POSTGRES_PORT: u16 = 5432;
const DEFAULT_OLLAMA_MODEL: &str = "gemma:2b";
const DEFAULT_OPENAI_MODEL: &str = "gpt-3.5-turbo";

/// System instruction used for chunk summaries when the prompt store is empty.
pub const DEFAULT_MAP_INSTRUCTION: &str = "You are a medical language model. Summarize the following text so that its key statements are preserved. Omit general explanations.";
/// System instruction used for the final merge when the prompt store is empty.
pub const DEFAULT_FINAL_INSTRUCTION: &str = "Summarize the following medical text precisely. Keep every relevant detail but remove unnecessary repetition.";

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the summarization worker.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Connection string of the document store.
    pub database_url: String,
    /// Backend used for every summarization request.
    pub summarization_provider: SummarizationProvider,
    /// Base URL of the local Ollama runtime.
    pub ollama_url: String,
    /// Base URL of the OpenAI-compatible chat completions API.
    pub openai_base_url: String,
    /// Bearer token for the OpenAI-compatible API.
    pub openai_api_key: Option<String>,
    /// Model used to summarize individual chunks.
    pub map_model: String,
    /// Model used for the final merge.
    pub final_model: String,
    /// Maximum characters per chunk.
    pub chunk_size: usize,
    /// Characters shared between adjacent chunks.
    pub chunk_overlap: usize,
    /// Token budget above which a merged result is reduced again.
    pub max_final_tokens: usize,
    /// Maximum number of re-reduction rounds.
    pub max_reduction_depth: usize,
    /// Strategy used to estimate token counts.
    pub token_estimator: EstimatorKind,
    /// Characters per token assumed by the heuristic estimator.
    pub chars_per_token: usize,
    /// Attempts per backend request, including the first.
    pub max_retries: u32,
    /// Fixed delay between attempts in milliseconds.
    pub retry_delay_ms: u64,
    /// Per-request HTTP timeout in seconds.
    pub request_timeout_secs: u64,
    /// Number of chunks summarized concurrently.
    pub map_concurrency: usize,
    /// Claim cycles after which a document is marked failed (`0` disables the limit).
    pub max_document_attempts: u32,
    /// Age in seconds after which an in-progress claim may be taken over.
    pub claim_timeout_secs: u64,
}

/// Supported text-generation backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummarizationProvider {
    /// Local Ollama runtime.
    Ollama,
    /// Hosted OpenAI-compatible chat completions API.
    OpenAI,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let summarization_provider = match load_env_optional("SUMMARIZATION_PROVIDER") {
            Some(value) => value
                .parse()
                .map_err(|()| ConfigError::InvalidValue("SUMMARIZATION_PROVIDER".into()))?,
            None => SummarizationProvider::Ollama,
        };
        let openai_api_key = load_env_optional("OPENAI_API_KEY");
        if summarization_provider == SummarizationProvider::OpenAI && openai_api_key.is_none() {
            return Err(ConfigError::MissingVariable("OPENAI_API_KEY".into()));
        }

        let default_model = match summarization_provider {
            SummarizationProvider::Ollama => DEFAULT_OLLAMA_MODEL,
            SummarizationProvider::OpenAI => DEFAULT_OPENAI_MODEL,
        };
        let map_model = load_env_optional("MAP_MODEL").unwrap_or_else(|| default_model.into());
        let final_model = load_env_optional("FINAL_MODEL").unwrap_or_else(|| map_model.clone());

        let chunk_size = parse_or("CHUNK_SIZE", 4000)?;
        if chunk_size == 0 {
            return Err(ConfigError::InvalidValue("CHUNK_SIZE".into()));
        }

        let token_estimator = match load_env_optional("TOKEN_ESTIMATOR") {
            Some(value) => value
                .parse()
                .map_err(|()| ConfigError::InvalidValue("TOKEN_ESTIMATOR".into()))?,
            None => EstimatorKind::Heuristic,
        };

        Ok(Self {
            database_url: database_url_from_env()?,
            summarization_provider,
            ollama_url: load_env_optional("OLLAMA_URL")
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            openai_base_url: load_env_optional("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            openai_api_key,
            map_model,
            final_model,
            chunk_size,
            chunk_overlap: parse_or("CHUNK_OVERLAP", 200)?,
            max_final_tokens: parse_or("MAX_FINAL_TOKENS", 12_000)?,
            max_reduction_depth: parse_or("MAX_REDUCTION_DEPTH", 10)?,
            token_estimator,
            chars_per_token: parse_or::<usize>("CHARS_PER_TOKEN", 4)?.max(1),
            max_retries: parse_or::<u32>("MAX_RETRIES", 3)?.max(1),
            retry_delay_ms: parse_or("RETRY_DELAY_MS", 5_000)?,
            request_timeout_secs: parse_or("REQUEST_TIMEOUT_SECS", 300)?,
            map_concurrency: parse_or::<usize>("MAP_CONCURRENCY", default_map_concurrency())?
                .max(1),
            max_document_attempts: parse_or("MAX_DOCUMENT_ATTEMPTS", 3)?,
            claim_timeout_secs: parse_or("CLAIM_TIMEOUT_SECS", 3_600)?,
        })
    }

    /// Delay inserted between two attempts of the same backend request.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Timeout applied to each backend HTTP request.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// One worker per available core, keeping one core for the driving loop.
fn default_map_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|cores| cores.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

/// `DATABASE_URL`, or a PostgreSQL URL assembled from the `DB_*` variables shared with the
/// extraction step.
fn database_url_from_env() -> Result<String, ConfigError> {
    if let Some(url) = load_env_optional("DATABASE_URL") {
        return Ok(url);
    }
    let Some(host) = load_env_optional("DB_HOST") else {
        return Err(ConfigError::MissingVariable("DATABASE_URL".into()));
    };
    postgres_url(
        &host,
        parse_or("DB_PORT", DEFAULT_POSTGRES_PORT)?,
        &load_env("DB_NAME")?,
        &load_env("DB_USER")?,
        load_env_optional("DB_PASSWORD").as_deref(),
    )
}

fn postgres_url(
    host: &str,
    port: u16,
    database: &str,
    user: &str,
    password: Option<&str>,
) -> Result<String, ConfigError> {
    let invalid = |key: &str| ConfigError::InvalidValue(key.to_string());
    let mut url = Url::parse(&format!("postgres://{}:{port}/", host.trim()))
        .map_err(|_| invalid("DB_HOST"))?;
    url.set_username(user).map_err(|()| invalid("DB_USER"))?;
    url.set_password(password).map_err(|()| invalid("DB_PASSWORD"))?;
    url.path_segments_mut()
        .map_err(|()| invalid("DB_NAME"))?
        .clear()
        .push(database);
    Ok(url.to_string())
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    load_env_optional(key).ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
        .map(|value| value.unwrap_or(default))
}

impl std::str::FromStr for SummarizationProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            _ => Err(()),
        }
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, if [`init_config`] has run.
pub fn get_config() -> Option<&'static Config> {
    CONFIG.get()
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() -> Result<&'static Config, ConfigError> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(
        provider = ?config.summarization_provider,
        map_model = %config.map_model,
        final_model = %config.final_model,
        chunk_size = config.chunk_size,
        chunk_overlap = config.chunk_overlap,
        map_concurrency = config.map_concurrency,
        "Loaded configuration"
    );
    Ok(CONFIG.get_or_init(|| config))
}

use std::env;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are YawlAI, a friendly and knowledgeable assistant. \
Answer clearly and concisely, use Markdown where it helps readability, and say so when you are unsure.";

#[derive(Debug, Clone)]
pub struct Config {
    pub api_host: String,
    pub api_port: u16,
    pub database_path: PathBuf,
    pub history_dir: PathBuf,
    pub llm_base_url: String,
    pub llm_api_key: Option<String>,
    pub llm_model: String,
    pub system_instruction: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub keyword_cache_ttl_seconds: u64,
    pub import_batch_size: usize,
    pub max_chat_sessions: usize,
    pub request_timeout_seconds: u64,
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("Failed to load .env file: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from an arbitrary variable source; unset or blank values take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let or = |name: &str, default: &str| get(name).unwrap_or_else(|| default.to_string());

        let config = Self {
            api_host: or("API_HOST", "127.0.0.1"),
            api_port: parse_var(&get, "API_PORT", 8000)?,
            database_path: PathBuf::from(or("DATABASE_PATH", "./data/yawlai.db")),
            history_dir: PathBuf::from(or("HISTORY_DIR", "./data/history")),
            llm_base_url: or("LLM_BASE_URL", "https://api.openai.com/v1")
                .trim_end_matches('/')
                .to_string(),
            llm_api_key: get("LLM_API_KEY"),
            llm_model: or("LLM_MODEL", "gpt-4o-mini"),
            system_instruction: or("SYSTEM_INSTRUCTION", DEFAULT_SYSTEM_INSTRUCTION),
            temperature: parse_var(&get, "TEMPERATURE", 0.7)?,
            max_tokens: parse_var(&get, "MAX_TOKENS", 2048)?,
            keyword_cache_ttl_seconds: parse_var(&get, "KEYWORD_CACHE_TTL_SECONDS", 300)?,
            import_batch_size: parse_var(&get, "IMPORT_BATCH_SIZE", 100)?,
            max_chat_sessions: parse_var(&get, "MAX_CHAT_SESSIONS", 100)?,
            request_timeout_seconds: parse_var(&get, "REQUEST_TIMEOUT_SECONDS", 600)?,
            max_upload_bytes: parse_var(&get, "MAX_UPLOAD_BYTES", 10 * 1024 * 1024)?,
        };

        if !(0.0..=2.0).contains(&config.temperature) {
            anyhow::bail!("TEMPERATURE must be between 0.0 and 2.0, got {}", config.temperature);
        }
        if config.import_batch_size == 0 {
            anyhow::bail!("IMPORT_BATCH_SIZE must be at least 1");
        }
        if config.llm_api_key.is_none() {
            warn!("LLM_API_KEY is not set; chat requests will fail until it is configured");
        }
        Ok(config)
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- API: {}:{}", self.api_host, self.api_port);
        info!("- Database: {}", self.database_path.display());
        info!("- History Dir: {}", self.history_dir.display());
        info!("- LLM Endpoint: {}", self.llm_base_url);
        info!("- LLM Model: {}", self.llm_model);
        info!("- LLM API Key: {}", if self.llm_api_key.is_some() { "[set]" } else { "[missing]" });
        info!("- Temperature: {}", self.temperature);
        info!("- Max Tokens: {}", self.max_tokens);
        info!("- Keyword Cache TTL: {}s", self.keyword_cache_ttl_seconds);
        info!("- Import Batch Size: {}", self.import_batch_size);
        info!("- Max Chat Sessions: {}", self.max_chat_sessions);
        info!("- Request Timeout: {}s", self.request_timeout_seconds);
        info!("- Max Upload: {} bytes", self.max_upload_bytes);
    }

    pub fn api_addr(&self) -> Result<SocketAddr> {
        (self.api_host.as_str(), self.api_port)
            .to_socket_addrs()
            .with_context(|| format!("Invalid API address {}:{}", self.api_host, self.api_port))?
            .next()
            .with_context(|| format!("API host {} did not resolve", self.api_host))
    }

    pub fn keyword_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.keyword_cache_ttl_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

fn parse_var<T, G>(get: &G, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid value '{}' for {}: {}", raw, name, e)),
        None => Ok(default),
    }
}

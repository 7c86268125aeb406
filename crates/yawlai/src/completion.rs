//! Streaming client for an OpenAI-compatible `/chat/completions` endpoint.
//!
//! The provider's SSE body is split into lines, `data:` payloads are decoded
//! and surfaced as [`CompletionChunk`]s. Failures are classified into
//! [`CompletionError`] variants that each carry a message safe to show to
//! end users.

use std::pin::Pin;
use std::time::Duration;

use axum::http::StatusCode;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::history::Role;

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("LLM API key is not configured")]
    MissingCredential,

    #[error("LLM provider rejected the credentials ({status}): {body}")]
    InvalidCredential { status: u16, body: String },

    #[error("LLM provider quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("LLM provider rate limit reached: {0}")]
    RateLimited(String),

    #[error("LLM provider returned {status}: {body}")]
    Backend { status: u16, body: String },

    #[error("LLM provider request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl CompletionError {
    /// Map a non-success provider response onto the taxonomy.
    pub fn classify(status: u16, body: &str) -> Self {
        let lowered = body.to_lowercase();
        let body = body.to_string();
        match status {
            401 | 403 => Self::InvalidCredential { status, body },
            400 if lowered.contains("api key") || lowered.contains("api_key") => {
                Self::InvalidCredential { status, body }
            }
            429 if lowered.contains("quota") || lowered.contains("billing") => Self::QuotaExceeded(body),
            429 => Self::RateLimited(body),
            _ => Self::Backend { status, body },
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingCredential => StatusCode::INTERNAL_SERVER_ERROR,
            Self::QuotaExceeded(_) | Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::InvalidCredential { .. } | Self::Backend { .. } | Self::Transport(_) => {
                StatusCode::BAD_GATEWAY
            }
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::MissingCredential => {
                "The assistant is not configured yet. Please contact the site administrator."
            }
            Self::InvalidCredential { .. } => {
                "The assistant could not authenticate with its AI provider. Please contact the site administrator."
            }
            Self::QuotaExceeded(_) => "The assistant has reached its usage quota. Please try again later.",
            Self::RateLimited(_) => "Too many requests right now. Please wait a moment and try again.",
            Self::Backend { .. } | Self::Transport(_) => {
                "The AI provider is unavailable right now. Please try again."
            }
        }
    }
}

/// One conversation turn as sent by the chat UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
}

impl TokenUsage {
    pub fn total(&self) -> i64 {
        self.prompt_tokens + self.completion_tokens
    }

    /// Rough count at one token per four characters.
    pub fn estimate(prompt_chars: usize, completion_chars: usize) -> Self {
        Self {
            prompt_tokens: prompt_chars.div_ceil(4) as i64,
            completion_tokens: completion_chars.div_ceil(4) as i64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionChunk {
    Delta(String),
    Usage(TokenUsage),
}

pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<CompletionChunk, CompletionError>> + Send>>;

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
    stream_options: StreamOptions,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<TokenUsage>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<ChatDelta>,
}

#[derive(Debug, Deserialize)]
struct ChatDelta {
    content: Option<String>,
}

/// Decode one `data:` payload.
fn parse_data(data: &str) -> Result<Vec<CompletionChunk>, CompletionError> {
    let chunk: StreamChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            debug!("Ignoring unparseable stream chunk: {}", e);
            return Ok(Vec::new());
        }
    };
    if let Some(error) = chunk.error {
        return Err(CompletionError::Backend { status: 200, body: error.to_string() });
    }

    let mut out: Vec<CompletionChunk> = chunk
        .choices
        .into_iter()
        .filter_map(|c| c.delta.and_then(|d| d.content))
        .filter(|text| !text.is_empty())
        .map(CompletionChunk::Delta)
        .collect();
    if let Some(usage) = chunk.usage {
        out.push(CompletionChunk::Usage(usage));
    }
    Ok(out)
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

pub struct CompletionClient {
    base_url: String,
    api_key: Option<String>,
    model: String,
    system_instruction: String,
    temperature: f32,
    max_tokens: u32,
    http_client: reqwest::Client,
}

impl CompletionClient {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        info!("Completion client using {} ({})", config.llm_base_url, config.llm_model);
        Ok(Self {
            base_url: config.llm_base_url.clone(),
            api_key: config.llm_api_key.clone(),
            model: config.llm_model.clone(),
            system_instruction: config.system_instruction.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.request_timeout_seconds))
                .build()?,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Start a streamed completion. Errors before the first byte (missing
    /// key, rejected request) are returned directly; later failures arrive
    /// as stream items.
    pub async fn stream_chat(&self, messages: &[PromptMessage]) -> Result<CompletionStream, CompletionError> {
        let api_key = self.api_key.as_deref().ok_or(CompletionError::MissingCredential)?;

        let mut wire = Vec::with_capacity(messages.len() + 1);
        if !self.system_instruction.is_empty() {
            wire.push(WireMessage { role: "system", content: &self.system_instruction });
        }
        wire.extend(messages.iter().map(|m| WireMessage { role: role_name(m.role), content: &m.content }));

        let request = ChatCompletionRequest {
            model: &self.model,
            messages: wire,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream: true,
            stream_options: StreamOptions { include_usage: true },
        };

        let response = self
            .http_client
            .post(self.completions_url())
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            let error = CompletionError::classify(status, &body);
            warn!("Completion request rejected: {}", error);
            return Err(error);
        }

        let byte_stream = response.bytes_stream();
        let stream = async_stream::stream! {
            let mut lines = LineBuffer::default();
            futures_util::pin_mut!(byte_stream);

            while let Some(chunk_result) = byte_stream.next().await {
                let chunk = match chunk_result {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(CompletionError::Transport(e));
                        return;
                    }
                };
                lines.extend(&chunk);

                while let Some(line) = lines.next_line() {
                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();
                    if data == "[DONE]" {
                        return;
                    }
                    match parse_data(data) {
                        Ok(chunks) => {
                            for chunk in chunks {
                                yield Ok::<CompletionChunk, CompletionError>(chunk);
                            }
                        }
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

/// Accumulates raw response bytes and hands out complete, trimmed lines.
/// Decoding waits for the newline so a multi-byte character split across
/// network chunks is never torn.
#[derive(Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    fn next_line(&mut self) -> Option<String> {
        let newline_pos = self.pending.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.pending.drain(..=newline_pos).collect();
        Some(String::from_utf8_lossy(&line).trim().to_string())
    }
}

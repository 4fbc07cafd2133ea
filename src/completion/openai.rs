//! OpenAI-compatible Chat Completions client
//!
//! Posts to `{base_url}/chat/completions` with a bearer key. Supports both the
//! plain JSON response and the SSE stream (`stream: true`); streamed deltas
//! can be forwarded to a channel while the full reply is collected.

use super::{ChatCompletion, CompletionRequest};
use crate::config::AppConfig;
use crate::{ChatError, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const RETRY_BASE_DELAY_MS: u64 = 200;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_ERROR_DETAIL_CHARS: usize = 500;

// ─── Wire types ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

/// Splits a byte stream into lines, decoding each complete line as UTF-8.
///
/// Bytes are held until a newline arrives, so a character split across
/// network chunks is decoded whole.
#[derive(Debug, Default)]
struct SseLineBuffer {
    buf: Vec<u8>,
    finished: bool,
}

impl SseLineBuffer {
    fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Mark end of input; a trailing line without newline becomes available
    fn finish(&mut self) {
        self.finished = true;
    }

    fn next_line(&mut self) -> Result<Option<String>> {
        let end = match self.buf.iter().position(|&b| b == b'\n') {
            Some(pos) => pos + 1,
            None if self.finished && !self.buf.is_empty() => self.buf.len(),
            None => return Ok(None),
        };
        let line: Vec<u8> = self.buf.drain(..end).collect();
        String::from_utf8(line)
            .map(Some)
            .map_err(|e| ChatError::MalformedResponse(format!("invalid UTF-8 in stream: {e}")))
    }
}

// ─── Client ─────────────────────────────────────────────────────────

/// Chat Completions client for OpenAI and compatible servers
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    max_retries: u32,
    delta_tx: Option<mpsc::Sender<String>>,
}

impl OpenAiClient {
    /// Create a client for `base_url` (e.g. `https://api.openai.com/v1`)
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("memochat/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ChatError::Transport(e.to_string()))?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        let api_key = api_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());

        Ok(Self {
            client,
            base_url,
            api_key,
            max_retries: 0,
            delta_tx: None,
        })
    }

    /// Create a client from config, reading the key from `api_key_env`
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).ok();
        if api_key.is_none() {
            warn!(
                "{} is not set, requests will be sent without authorization",
                config.api_key_env
            );
        }

        info!(
            "Completion client: base_url={}, model={}, retries={}",
            config.base_url, config.model, config.max_retries
        );

        Ok(Self::new(config.base_url.clone(), api_key)?.with_max_retries(config.max_retries))
    }

    /// Retry transport errors and 5xx responses up to `retries` extra times
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Forward streamed reply fragments to `tx` as they arrive
    pub fn with_delta_sink(mut self, tx: mpsc::Sender<String>) -> Self {
        self.delta_tx = Some(tx);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Compute exponential backoff for the given retry attempt (1-based)
    fn retry_backoff(attempt: u32) -> Duration {
        let exp = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(RETRY_BASE_DELAY_MS.saturating_mul(exp))
    }

    async fn send_once(&self, request: &CompletionRequest) -> Result<String> {
        let mut req_builder = self
            .client
            .post(self.url())
            .header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            req_builder = req_builder.bearer_auth(key);
        }

        let response = req_builder
            .json(request)
            .send()
            .await
            .map_err(Self::map_reqwest_error)?;
        let response = Self::check_response_status(response).await?;

        if request.stream {
            self.collect_stream(response).await
        } else {
            Self::first_choice(response).await
        }
    }

    async fn first_choice(response: reqwest::Response) -> Result<String> {
        let body = response.text().await.map_err(Self::map_reqwest_error)?;
        let chat_response: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| ChatError::MalformedResponse(e.to_string()))?;

        chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.unwrap_or_default())
            .ok_or_else(|| ChatError::MalformedResponse("no choices in response".to_string()))
    }

    /// Collect a Chat Completions SSE stream into the full reply.
    ///
    /// A stream that finishes without any choice is malformed; one that is cut
    /// off before `[DONE]` or a `finish_reason` is a transport failure.
    async fn collect_stream(&self, response: reqwest::Response) -> Result<String> {
        let mut stream = response.bytes_stream();
        let mut lines = SseLineBuffer::default();
        let mut result_text = String::new();
        let mut saw_choice = false;

        loop {
            let next = stream.next().await;
            let ended = next.is_none();
            match next {
                Some(chunk_result) => {
                    let bytes = chunk_result
                        .map_err(|e| ChatError::Transport(format!("stream error: {e}")))?;
                    lines.push(&bytes);
                }
                None => lines.finish(),
            }

            while let Some(line) = lines.next_line()? {
                let Some(data) = line.trim().strip_prefix("data:") else {
                    continue;
                };
                let data = data.trim();
                if data == "[DONE]" {
                    if !saw_choice {
                        return Err(ChatError::MalformedResponse(
                            "no choices in stream".to_string(),
                        ));
                    }
                    return Ok(result_text);
                }

                let chunk = match serde_json::from_str::<StreamChunk>(data) {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        debug!("Skipping unparseable stream chunk: {}", e);
                        continue;
                    }
                };
                if let Some(choice) = chunk.choices.first() {
                    saw_choice = true;
                    if let Some(content) = &choice.delta.content {
                        result_text.push_str(content);
                        if let Some(tx) = &self.delta_tx {
                            let _ = tx.send(content.clone()).await;
                        }
                    }
                    if choice.finish_reason.is_some() {
                        return Ok(result_text);
                    }
                }
            }

            if ended {
                return Err(ChatError::Transport(
                    "stream ended before completion".to_string(),
                ));
            }
        }
    }

    async fn check_response_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let detail = truncate_error_detail(&extract_error_detail(&body), MAX_ERROR_DETAIL_CHARS);
        Err(ChatError::Api {
            status: status.as_u16(),
            detail,
        })
    }

    fn map_reqwest_error(e: reqwest::Error) -> ChatError {
        if e.is_timeout() {
            ChatError::Transport(format!("timeout: {e}"))
        } else if e.is_connect() {
            ChatError::Transport(format!("network: {e}"))
        } else {
            ChatError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl ChatCompletion for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let mut attempt = 0;
        loop {
            match self.send_once(request).await {
                Ok(reply) => {
                    debug!("Completion reply length: {}", reply.len());
                    return Ok(reply);
                }
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = Self::retry_backoff(attempt);
                    warn!(
                        "Completion request failed ({}), retry {}/{} in {:?}",
                        e, attempt, self.max_retries, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn extract_error_detail(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(msg) = value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
        {
            return msg.to_string();
        }
        if let Some(msg) = value.get("message").and_then(|m| m.as_str()) {
            return msg.to_string();
        }
    }

    trimmed.to_string()
}

fn truncate_error_detail(detail: &str, max_chars: usize) -> String {
    if detail.chars().count() <= max_chars {
        return detail.to_string();
    }

    let mut truncated = detail.chars().take(max_chars).collect::<String>();
    truncated.push_str("... [truncated]");
    truncated
}

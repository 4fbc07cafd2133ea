//! Completion request assembly
//!
//! Turns the conversation log plus fixed parameters into a chat-completion
//! request and hands it to a backend that returns the first choice's text.

mod openai;

pub use openai::OpenAiClient;

use crate::memory::{ConversationLog, Message};
use crate::Result;
use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

/// Fixed parameters applied to every request of a session
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionParams {
    pub model: String,
    pub temperature: f32,
    /// Cap on generated tokens; omitted from the request when unset
    pub max_tokens: Option<u32>,
    /// Budget for the messages sent; the whole log is sent when unset
    pub context_token_limit: Option<usize>,
    pub stream: bool,
}

impl Default for CompletionParams {
    fn default() -> Self {
        Self {
            model: crate::config::DEFAULT_MODEL.to_string(),
            temperature: 0.0,
            max_tokens: None,
            context_token_limit: None,
            stream: false,
        }
    }
}

/// Chat Completions request body
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub stream: bool,
}

impl CompletionRequest {
    /// Build a request from the log, windowed to the token limit if one is set
    pub fn from_log(log: &ConversationLog, params: &CompletionParams) -> Self {
        let messages = match params.context_token_limit {
            Some(limit) => log.window(limit),
            None => log.messages().to_vec(),
        };

        if messages.len() < log.len() {
            debug!(
                "Windowed request to {} of {} messages (limit {:?} tokens)",
                messages.len(),
                log.len(),
                params.context_token_limit
            );
        }

        Self {
            model: params.model.clone(),
            messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            stream: params.stream,
        }
    }
}

/// A service that turns a message list into a single reply
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Return the text of the first choice
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

/// Assemble a request from the log and send it.
///
/// Does not touch the log; appending the reply is the caller's job.
pub async fn ask<B>(backend: &B, log: &ConversationLog, params: &CompletionParams) -> Result<String>
where
    B: ChatCompletion + ?Sized,
{
    let request = CompletionRequest::from_log(log, params);
    debug!(
        "Requesting completion: model={}, messages={}",
        request.model,
        request.messages.len()
    );
    backend.complete(&request).await
}

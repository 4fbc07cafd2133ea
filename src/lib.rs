//! Memochat - terminal chat assistant with persisted memory
//!
//! Wires a hosted chat-completion API to a terminal front-end:
//! - Keeps an append-only conversation log seeded with a system instruction
//! - Mirrors every completed turn to a JSON history file
//! - Windows the request to a token budget before sending

pub mod auth;
pub mod completion;
pub mod config;
pub mod memory;
pub mod session;

pub use completion::{ChatCompletion, CompletionParams, CompletionRequest, OpenAiClient};
pub use config::AppConfig;
pub use memory::{ConversationLog, HistoryStore, Message, Role};
pub use session::{ChatSession, ConversationHandle};

/// Result type for Memochat operations
pub type Result<T> = std::result::Result<T, ChatError>;

/// Errors that can occur in Memochat
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("API error {status}: {detail}")]
    Api { status: u16, detail: String },

    #[error("Malformed completion response: {0}")]
    MalformedResponse(String),

    #[error("Authentication error: {0}")]
    Auth(String),
}

impl ChatError {
    /// Transport failures and 5xx responses may succeed on a later attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

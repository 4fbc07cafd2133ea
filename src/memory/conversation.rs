//! Conversation log for Memochat
//!
//! Holds the ordered message history sent to the completion API. The first
//! message is always the fixed system instruction; everything after it is
//! appended in chronological order and never edited.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Approximate bytes per token for context estimation
const APPROX_BYTES_PER_TOKEN: usize = 4;

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Wire name of the role
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single role/content pair. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    role: Role,
    content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Estimate token count for this message
    pub fn estimate_tokens(&self) -> usize {
        self.content.len() / APPROX_BYTES_PER_TOKEN
    }
}

/// Append-only conversation log seeded with a system instruction
#[derive(Debug, Clone)]
pub struct ConversationLog {
    /// Messages, oldest first. Index 0 is the system instruction.
    messages: Vec<Message>,
}

impl ConversationLog {
    /// Create a log holding only the system instruction
    pub fn new(system_instruction: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system_instruction)],
        }
    }

    /// Append a message. No validation, no deduplication, no cap.
    pub fn append(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(Message::new(role, content));
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.append(Role::User, content);
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.append(Role::Assistant, content);
    }

    /// The whole sequence, system instruction first
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// The seeded system instruction
    pub fn system(&self) -> &Message {
        &self.messages[0]
    }

    /// The most recent message (the system instruction on a fresh log)
    pub fn last(&self) -> &Message {
        &self.messages[self.messages.len() - 1]
    }

    /// Estimate total token count
    pub fn estimate_tokens(&self) -> usize {
        self.messages.iter().map(Message::estimate_tokens).sum()
    }

    /// Messages to send under a token budget.
    ///
    /// Keeps the system instruction plus the newest messages that fit. The
    /// newest message is always kept, even when it alone is over budget.
    pub fn window(&self, token_limit: usize) -> Vec<Message> {
        let (system, rest) = self.messages.split_at(1);
        let mut remaining = token_limit.saturating_sub(system[0].estimate_tokens());

        let mut kept = 0;
        for message in rest.iter().rev() {
            let tokens = message.estimate_tokens();
            if kept > 0 && tokens > remaining {
                break;
            }
            remaining = remaining.saturating_sub(tokens);
            kept += 1;
        }

        let mut result = Vec::with_capacity(kept + 1);
        result.push(system[0].clone());
        result.extend_from_slice(&rest[rest.len() - kept..]);
        result
    }

    /// Number of messages, including the system instruction
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Always false: the system instruction is never removed
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_estimation() {
        let msg = Message::user("hello world"); // 11 bytes = ~2 tokens
        assert_eq!(msg.estimate_tokens(), 2);
    }

    #[test]
    fn test_seeded_with_system() {
        let log = ConversationLog::new("be brief");
        assert_eq!(log.len(), 1);
        assert!(!log.is_empty());
        assert_eq!(log.system().role(), Role::System);
        assert_eq!(log.system().content(), "be brief");
    }

    #[test]
    fn test_append_keeps_order() {
        let mut log = ConversationLog::new("sys");
        log.push_user("Hello");
        log.push_assistant("Hi there");
        log.push_user("Hello");

        let roles: Vec<Role> = log.messages().iter().map(Message::role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::User]
        );
        assert_eq!(log.last().content(), "Hello");
    }

    #[test]
    fn test_window_drops_oldest() {
        let mut log = ConversationLog::new("sys!"); // 1 token
        log.push_user("a".repeat(40)); // 10 tokens
        log.push_assistant("b".repeat(40)); // 10 tokens
        log.push_user("c".repeat(40)); // 10 tokens

        let window = log.window(21);
        assert_eq!(window.len(), 3);
        assert_eq!(window[0].role(), Role::System);
        assert!(window[1].content().starts_with('b'));
        assert!(window[2].content().starts_with('c'));

        // The log itself is untouched
        assert_eq!(log.len(), 4);
    }

    #[test]
    fn test_window_keeps_newest_even_if_oversized() {
        let mut log = ConversationLog::new("sys");
        log.push_user("short");
        log.push_user("x".repeat(400));

        let window = log.window(10);
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].role(), Role::System);
        assert_eq!(window[1].content().len(), 400);
    }

    #[test]
    fn test_window_large_budget_is_whole_log() {
        let mut log = ConversationLog::new("sys");
        log.push_user("one");
        log.push_assistant("two");
        assert_eq!(log.window(10_000), log.messages().to_vec());
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&Message::assistant("ok")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"ok"}"#);
    }
}

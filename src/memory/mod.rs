//! Memory module for Memochat
//!
//! The in-process conversation log and the persisted history file.

mod conversation;
mod history_store;

pub use conversation::{ConversationLog, Message, Role};
pub use history_store::{HistoryStore, DEFAULT_MEMORY_FILE};

//! Per-conversation session state.
//!
//! A session owns the conversation log sent to the model and the persisted
//! history mirrored to disk. The two are independent copies: each completed
//! turn appends the same user/assistant pair to both. A failed turn leaves the
//! user message in the log and does not touch the history file.

use crate::completion::{self, ChatCompletion, CompletionParams};
use crate::config::AppConfig;
use crate::memory::{ConversationLog, HistoryStore, Message};
use crate::Result;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// One conversation: log, persisted history and request parameters
#[derive(Debug)]
pub struct ChatSession {
    log: ConversationLog,
    store: HistoryStore,
    history: Vec<Message>,
    params: CompletionParams,
}

impl ChatSession {
    /// Open a session from config, loading the history file once
    pub async fn open(config: &AppConfig) -> Result<Self> {
        Self::open_with(
            config.system_instruction.clone(),
            HistoryStore::new(config.memory_file.clone()),
            config.completion_params(),
        )
        .await
    }

    /// Open a session from explicit parts
    pub async fn open_with(
        system_instruction: impl Into<String>,
        store: HistoryStore,
        params: CompletionParams,
    ) -> Result<Self> {
        let history = store.load().await?;
        info!(
            "Opened session: {} persisted records in {}",
            history.len(),
            store.path().display()
        );
        Ok(Self {
            log: ConversationLog::new(system_instruction),
            store,
            history,
            params,
        })
    }

    /// Run one turn and return the assistant's reply
    pub async fn send<B>(&mut self, backend: &B, text: impl Into<String>) -> Result<String>
    where
        B: ChatCompletion + ?Sized,
    {
        let text = text.into();
        self.log.push_user(text.clone());

        let reply = match completion::ask(backend, &self.log, &self.params).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Turn failed, history left unchanged: {}", e);
                return Err(e);
            }
        };

        self.log.push_assistant(reply.clone());

        // Records become part of the history only once they are on disk
        let committed = self.history.len();
        self.history.push(Message::user(text));
        self.history.push(Message::assistant(reply.clone()));
        if let Err(e) = self.store.save(&self.history).await {
            warn!("Saving history failed, turn not recorded: {}", e);
            self.history.truncate(committed);
            return Err(e);
        }

        debug!(
            "Turn complete: log={} messages, history={} records",
            self.log.len(),
            self.history.len()
        );
        Ok(reply)
    }

    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    /// Records loaded at open plus every completed turn since
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn params(&self) -> &CompletionParams {
        &self.params
    }

    pub fn store(&self) -> &HistoryStore {
        &self.store
    }
}

/// Shared handle to a session.
///
/// Each `send` holds the session lock for the whole turn, so concurrent
/// callers on the same conversation run one after another.
#[derive(Debug, Clone)]
pub struct ConversationHandle {
    inner: Arc<Mutex<ChatSession>>,
}

impl ConversationHandle {
    pub fn new(session: ChatSession) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
        }
    }

    pub async fn send<B>(&self, backend: &B, text: impl Into<String>) -> Result<String>
    where
        B: ChatCompletion + ?Sized,
    {
        let mut session = self.inner.lock().await;
        session.send(backend, text).await
    }

    /// Lock the session for inspection
    pub async fn lock(&self) -> MutexGuard<'_, ChatSession> {
        self.inner.lock().await
    }

    /// Copy of the persisted history
    pub async fn history(&self) -> Vec<Message> {
        self.inner.lock().await.history().to_vec()
    }
}

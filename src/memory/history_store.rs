//! Persisted conversation history.
//!
//! The history file is a JSON array of `{role, content}` records. It is read
//! once when a session opens and rewritten in full after every completed turn.
//! Writes go through a sibling temp file and an atomic rename, so an
//! interrupted save leaves the previous file intact.

use super::conversation::Message;
use crate::Result;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Default history file, relative to the working directory
pub const DEFAULT_MEMORY_FILE: &str = "memory.json";

/// Reads and writes the history file at a fixed path.
///
/// There is no locking across processes: two stores that both load and then
/// save overwrite each other, last writer wins.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load every record. A missing file yields an empty history; a file that
    /// does not parse is an error.
    pub async fn load(&self) -> Result<Vec<Message>> {
        if !self.path.exists() {
            debug!("No history file at {}", self.path.display());
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path).await?;
        let records: Vec<Message> = serde_json::from_str(&content)?;
        info!(
            "Loaded {} history records from {}",
            records.len(),
            self.path.display()
        );
        Ok(records)
    }

    /// Replace the file with the given records.
    pub async fn save(&self, records: &[Message]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let content = Self::to_json(records)?;
        let tmp = self.tmp_path();
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)
            .await?;
        file.write_all(&content).await?;
        file.flush().await?;
        if let Err(e) = file.sync_all().await {
            warn!("Failed to sync {}: {}", tmp.display(), e);
        }
        drop(file);

        fs::rename(&tmp, &self.path).await?;

        debug!(
            "Saved {} history records to {}",
            records.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Four-space indented JSON array
    fn to_json(records: &[Message]) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        records.serialize(&mut ser)?;
        Ok(buf)
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| DEFAULT_MEMORY_FILE.into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_FILE)
    }
}

//! Configuration for Memochat
//!
//! Resolution order, lowest to highest:
//!   1. built-in defaults
//!   2. `config.toml` (explicit `--config`, else `<config_dir>/memochat/config.toml`)
//!   3. environment (`MEMOCHAT_MODEL`, `OPENAI_BASE_URL`, `MEMOCHAT_MEMORY_FILE`)
//!   4. command-line flags, applied by the binary

use crate::completion::CompletionParams;
use crate::memory::DEFAULT_MEMORY_FILE;
use crate::{ChatError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";
/// Conversation memory budget, in estimated tokens
pub const DEFAULT_CONTEXT_TOKEN_LIMIT: usize = 3000;
pub const DEFAULT_SYSTEM_INSTRUCTION: &str =
    "You are a friendly and helpful assistant. Answer clearly and concisely, and ask a \
     follow-up question when the request is ambiguous.";

/// A canned opening prompt offered by the front-end
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Starter {
    pub label: String,
    pub message: String,
}

impl Starter {
    fn new(label: &str, message: &str) -> Self {
        Self {
            label: label.to_string(),
            message: message.to_string(),
        }
    }
}

pub fn default_starters() -> Vec<Starter> {
    vec![
        Starter::new(
            "Morning routine ideation",
            "Can you help me create a personalized morning routine that would help increase my \
             productivity throughout the day? Start by asking me about my current habits and what \
             activities energize me in the morning.",
        ),
        Starter::new(
            "Explain superconductors",
            "Explain superconductors like I'm five years old.",
        ),
        Starter::new(
            "Python script for daily email reports",
            "Write a script to automate sending daily email reports in Python, and walk me \
             through how I would set it up.",
        ),
        Starter::new(
            "Text inviting friend to wedding",
            "Write a text asking a friend to be my plus-one at a wedding next month. I want to \
             keep it super short and casual, and offer an out.",
        ),
    ]
}

/// Resolved configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Token budget for the messages sent per request; `None` sends everything
    pub context_token_limit: Option<usize>,
    pub stream: bool,
    pub max_retries: u32,
    pub base_url: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub memory_file: PathBuf,
    pub system_instruction: String,
    pub starters: Vec<Starter>,
    /// Username to password; empty means no login
    pub users: BTreeMap<String, String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.0,
            max_tokens: None,
            context_token_limit: Some(DEFAULT_CONTEXT_TOKEN_LIMIT),
            stream: false,
            max_retries: 0,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            memory_file: PathBuf::from(DEFAULT_MEMORY_FILE),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            starters: default_starters(),
            users: BTreeMap::new(),
        }
    }
}

/// On-disk config; every field optional
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigToml {
    model: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    /// `0` disables windowing
    context_token_limit: Option<usize>,
    stream: Option<bool>,
    max_retries: Option<u32>,
    base_url: Option<String>,
    api_key_env: Option<String>,
    memory_file: Option<PathBuf>,
    system_instruction: Option<String>,
    starters: Option<Vec<Starter>>,
    users: Option<BTreeMap<String, String>>,
}

impl AppConfig {
    /// Default location of the config file, if a config dir exists
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("memochat").join("config.toml"))
    }

    /// Resolve config from file and process environment.
    ///
    /// An explicit `path` must exist; the default location is optional.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        let file = match path {
            Some(p) => {
                if !p.exists() {
                    return Err(ChatError::Config(format!(
                        "config file not found: {}",
                        p.display()
                    )));
                }
                Some(p.to_path_buf())
            }
            None => Self::default_path().filter(|p| p.exists()),
        };

        if let Some(file) = file {
            let content = tokio::fs::read_to_string(&file).await?;
            config.merge_toml(&content)?;
            info!("Loaded config from {}", file.display());
        } else {
            debug!("No config file, using defaults");
        }

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Overlay values from TOML text
    pub fn merge_toml(&mut self, content: &str) -> Result<()> {
        let file: ConfigToml =
            toml::from_str(content).map_err(|e| ChatError::Config(e.to_string()))?;

        if let Some(model) = file.model {
            self.model = model;
        }
        if let Some(temperature) = file.temperature {
            self.temperature = temperature;
        }
        if let Some(max_tokens) = file.max_tokens {
            self.max_tokens = Some(max_tokens);
        }
        if let Some(limit) = file.context_token_limit {
            self.context_token_limit = (limit > 0).then_some(limit);
        }
        if let Some(stream) = file.stream {
            self.stream = stream;
        }
        if let Some(retries) = file.max_retries {
            self.max_retries = retries;
        }
        if let Some(base_url) = file.base_url {
            self.base_url = base_url;
        }
        if let Some(api_key_env) = file.api_key_env {
            self.api_key_env = api_key_env;
        }
        if let Some(memory_file) = file.memory_file {
            self.memory_file = memory_file;
        }
        if let Some(instruction) = file.system_instruction {
            self.system_instruction = instruction;
        }
        if let Some(starters) = file.starters {
            self.starters = starters;
        }
        if let Some(users) = file.users {
            self.users = users;
        }
        Ok(())
    }

    /// Overlay values from environment variables, looked up through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(model) = non_empty("MEMOCHAT_MODEL") {
            self.model = model;
        }
        if let Some(base_url) = non_empty("OPENAI_BASE_URL") {
            self.base_url = base_url;
        }
        if let Some(memory_file) = non_empty("MEMOCHAT_MEMORY_FILE") {
            self.memory_file = PathBuf::from(memory_file);
        }
    }

    /// Request parameters for a session
    pub fn completion_params(&self) -> CompletionParams {
        CompletionParams {
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            context_token_limit: self.context_token_limit,
            stream: self.stream,
        }
    }

    pub fn with_memory_file(mut self, path: PathBuf) -> Self {
        self.memory_file = path;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = instruction.into();
        self
    }

    pub fn with_context_token_limit(mut self, limit: Option<usize>) -> Self {
        self.context_token_limit = limit;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.temperature, 0.0);
        assert_eq!(config.memory_file, PathBuf::from("memory.json"));
        assert_eq!(config.context_token_limit, Some(3000));
        assert_eq!(config.starters.len(), 4);
        assert!(config.users.is_empty());
    }

    #[test]
    fn test_email_starter_asks_for_python() {
        let starters = default_starters();
        assert_eq!(starters[2].label, "Python script for daily email reports");
        assert!(starters[2]
            .message
            .contains("sending daily email reports in Python"));
    }

    #[test]
    fn test_merge_toml() {
        let mut config = AppConfig::default();
        config
            .merge_toml(
                r#"
model = "gpt-4o"
temperature = 0.7
max_tokens = 512
context_token_limit = 0
memory_file = "chats/memory.json"

[[starters]]
label = "Greet"
message = "Say hi"

[users]
sake = "123"
"#,
            )
            .unwrap();

        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.temperature, 0.7);
        assert_eq!(config.max_tokens, Some(512));
        assert_eq!(config.context_token_limit, None);
        assert_eq!(config.memory_file, PathBuf::from("chats/memory.json"));
        assert_eq!(config.starters, vec![Starter::new("Greet", "Say hi")]);
        assert_eq!(config.users.get("sake").map(String::as_str), Some("123"));
    }

    #[test]
    fn test_merge_toml_rejects_garbage() {
        let mut config = AppConfig::default();
        let err = config.merge_toml("model = [").unwrap_err();
        assert!(matches!(err, ChatError::Config(_)));

        let err = config.merge_toml("modle = \"typo\"").unwrap_err();
        assert!(matches!(err, ChatError::Config(_)));
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = AppConfig::default();
        config.merge_toml(r#"model = "from-file""#).unwrap();

        let env: HashMap<&str, &str> = HashMap::from([
            ("MEMOCHAT_MODEL", "from-env"),
            ("OPENAI_BASE_URL", "http://localhost:11434/v1"),
            ("MEMOCHAT_MEMORY_FILE", "  "),
        ]);
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.model, "from-env");
        assert_eq!(config.base_url, "http://localhost:11434/v1");
        assert_eq!(config.memory_file, PathBuf::from("memory.json"));
    }

    #[test]
    fn test_completion_params() {
        let config = AppConfig::default().with_model("m").with_context_token_limit(None);
        let params = config.completion_params();
        assert_eq!(params.model, "m");
        assert_eq!(params.context_token_limit, None);
        assert!(!params.stream);
    }

    #[tokio::test]
    async fn test_load_explicit_missing_is_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = AppConfig::load(Some(dir.path().join("nope.toml").as_path()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}

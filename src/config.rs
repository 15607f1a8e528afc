//! Configuration loading and persistence.
//!
//! Reads `config.json` from the config directory, falls back to defaults,
//! then applies `SUPPORT_HUB_*` environment overrides. The provider API key
//! is never written to disk; it only comes from `SUPPORT_HUB_AI_API_KEY`.

// Rust guideline compliant 2026-02

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::fs;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::connection::pumps::PumpSettings;
use crate::constants::{
    HISTORY_LIMIT, LLM_REQUEST_TIMEOUT, MAX_MESSAGE_SIZE, OUTBOUND_QUEUE_CAPACITY, PING_PERIOD,
    PONG_WAIT, WRITE_WAIT,
};
use crate::responder::ResponderSettings;
use crate::server::ConnectionSettings;
use crate::store::UserId;

/// File name inside the config directory.
pub const CONFIG_FILE: &str = "config.json";

/// Provider name that enables the chat-completion client.
pub const OPENAI_PROVIDER: &str = "openai";

/// Top-level configuration.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Listen address of the WebSocket server.
    pub bind_addr: String,
    /// LLM provider settings.
    pub ai: AiConfig,
    /// Per-connection tuning.
    pub connection: ConnectionConfig,
    /// Prior messages sent to the LLM.
    pub history_limit: usize,
    /// Static credential table (token → user id).
    pub access_tokens: HashMap<String, UserId>,
    /// Optional JSON file of FAQ entries loaded at startup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub faq_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            ai: AiConfig::default(),
            connection: ConnectionConfig::default(),
            history_limit: HISTORY_LIMIT,
            access_tokens: HashMap::new(),
            faq_file: None,
        }
    }
}

/// Chat-completion provider settings.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AiConfig {
    /// Provider name; only `"openai"` (any OpenAI-compatible API) is supported.
    pub provider: Option<String>,
    /// API key - NOT serialized to disk (read from the environment).
    #[serde(skip)]
    pub api_key: String,
    /// Model name.
    pub model: String,
    /// API root, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    /// Completion length cap.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Whole-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: Some(OPENAI_PROVIDER.to_string()),
            api_key: String::new(),
            model: "gpt-3.5-turbo".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            max_tokens: 1000,
            temperature: 0.7,
            request_timeout_secs: LLM_REQUEST_TIMEOUT.as_secs(),
        }
    }
}

impl AiConfig {
    /// Whether the LLM fallback should be wired in.
    pub fn is_enabled(&self) -> bool {
        let supported = self
            .provider
            .as_deref()
            .is_some_and(|p| p.eq_ignore_ascii_case(OPENAI_PROVIDER));
        supported && !self.api_key.is_empty()
    }

    /// Request timeout as a `Duration`.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// Per-connection sizing and liveness.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Outbound queue capacity.
    pub queue_capacity: usize,
    /// Read deadline in seconds.
    pub pong_wait_secs: u64,
    /// Ping cadence in seconds.
    pub ping_period_secs: u64,
    /// Write deadline in seconds.
    pub write_wait_secs: u64,
    /// Largest inbound message in bytes.
    pub max_message_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: OUTBOUND_QUEUE_CAPACITY,
            pong_wait_secs: PONG_WAIT.as_secs(),
            ping_period_secs: PING_PERIOD.as_secs(),
            write_wait_secs: WRITE_WAIT.as_secs(),
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// `SUPPORT_HUB_CONFIG_DIR` overrides the platform config directory
    /// (Linux: `~/.config/support-hub`).
    ///
    /// # Errors
    ///
    /// Returns an error if no config directory can be determined or created.
    pub fn config_dir() -> Result<PathBuf> {
        let dir = match std::env::var("SUPPORT_HUB_CONFIG_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => dirs::config_dir()
                .context("Could not determine config directory")?
                .join("support-hub"),
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        Ok(dir)
    }

    /// Loads configuration from file, with environment variable overrides.
    ///
    /// A missing file means defaults; an unreadable or invalid file is an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let path = Self::config_dir()?.join(CONFIG_FILE);
        let mut config = if path.exists() {
            Self::load_from_file(&path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse a config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config: {}", path.display()))
    }

    /// Apply `SUPPORT_HUB_*` environment variables.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(bind) = var("SUPPORT_HUB_BIND") {
            self.bind_addr = bind;
        }
        if let Some(provider) = var("SUPPORT_HUB_AI_PROVIDER") {
            self.ai.provider = (!provider.is_empty()).then_some(provider);
        }
        if let Some(model) = var("SUPPORT_HUB_AI_MODEL") {
            self.ai.model = model;
        }
        if let Some(base_url) = var("SUPPORT_HUB_AI_BASE_URL") {
            self.ai.base_url = base_url;
        }
        if let Some(api_key) = var("SUPPORT_HUB_AI_API_KEY") {
            self.ai.api_key = api_key;
        }
        if let Some(faq_file) = var("SUPPORT_HUB_FAQ_FILE") {
            self.faq_file = Some(PathBuf::from(faq_file));
        }
    }

    /// Persists the current configuration to the config directory.
    /// Note: the API key is NOT saved.
    ///
    /// # Errors
    ///
    /// Returns an error if the config directory or file cannot be written.
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_dir()?.join(CONFIG_FILE);
        self.save_to(&path)?;
        Ok(path)
    }

    /// Persists the configuration to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or its mode set.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    /// Responder parameters derived from this config.
    pub fn responder_settings(&self) -> ResponderSettings {
        ResponderSettings {
            model: self.ai.model.clone(),
            max_tokens: self.ai.max_tokens,
            temperature: self.ai.temperature,
            history_limit: self.history_limit,
        }
    }

    /// Connection parameters derived from this config.
    ///
    /// A ping period that does not fit inside the read deadline is replaced
    /// by 9/10 of the deadline.
    pub fn connection_settings(&self) -> ConnectionSettings {
        let c = &self.connection;
        let pong_wait = Duration::from_secs(c.pong_wait_secs.max(1));
        let mut ping_period = Duration::from_secs(c.ping_period_secs);
        if ping_period.is_zero() || ping_period >= pong_wait {
            ping_period = pong_wait * 9 / 10;
        }
        ConnectionSettings {
            queue_capacity: c.queue_capacity.max(1),
            pumps: PumpSettings {
                pong_wait,
                ping_period,
                write_wait: Duration::from_secs(c.write_wait_secs.max(1)),
            },
            max_message_size: c.max_message_size,
        }
    }
}

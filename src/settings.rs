use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf};

use crate::capture::CaptureConfig;
use crate::ingest::{Credential, DEFAULT_PARAM_CEILING};
use crate::models::MAX_BATCH_SESSIONS;

pub const TOKEN_ENV: &str = "FOCUSTRACK_TOKEN";
pub const ENDPOINT_ENV: &str = "FOCUSTRACK_ENDPOINT";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct AgentSettings {
    /// Base URL of the ingest server, e.g. `http://127.0.0.1:8787`.
    pub endpoint: String,
    pub token: String,
    pub db_path: PathBuf,
    pub sync_interval_secs: u64,
    pub batch_size: usize,
    pub request_timeout_secs: u64,
    /// Helper that prints one context snapshot as JSON, argv form.
    pub sampler_command: Vec<String>,
    pub capture: CaptureConfig,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8787".into(),
            token: String::new(),
            db_path: PathBuf::from("focustrack-agent.db"),
            sync_interval_secs: 30,
            batch_size: 500,
            request_timeout_secs: 15,
            sampler_command: Vec::new(),
            capture: CaptureConfig::default(),
        }
    }
}

impl AgentSettings {
    /// Reads the file (defaults when it doesn't exist), then applies the
    /// `FOCUSTRACK_*` environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut settings: Self = load_json(path)?;
        settings.apply_overrides(|key| std::env::var(key).ok());
        settings.batch_size = settings.batch_size.clamp(1, MAX_BATCH_SESSIONS);
        settings.capture = settings.capture.sanitized();
        Ok(settings)
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup(TOKEN_ENV).filter(|value| !value.is_empty()) {
            self.token = token;
        }
        if let Some(endpoint) = lookup(ENDPOINT_ENV).filter(|value| !value.is_empty()) {
            self.endpoint = endpoint;
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        persist(path, self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerSettings {
    pub bind: String,
    pub db_path: PathBuf,
    pub drain_interval_ms: u64,
    pub param_ceiling: usize,
    pub max_request_sessions: usize,
    /// Pending count at which an ingest request kicks off a drain without
    /// waiting for the next tick.
    pub eager_drain_threshold: u64,
    pub credentials: Vec<Credential>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8787".into(),
            db_path: PathBuf::from("focustrack-ingest.db"),
            drain_interval_ms: 2_000,
            param_ceiling: DEFAULT_PARAM_CEILING,
            max_request_sessions: MAX_BATCH_SESSIONS,
            eager_drain_threshold: 200,
            credentials: Vec::new(),
        }
    }
}

impl ServerSettings {
    pub fn load(path: &Path) -> Result<Self> {
        load_json(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        persist(path, self)
    }
}

fn load_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings from {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse settings in {}", path.display()))
}

fn persist<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let serialized = serde_json::to_string_pretty(data)?;
    fs::write(path, serialized)
        .with_context(|| format!("Failed to write settings to {}", path.display()))
}

use std::path::{Path, PathBuf};

use anyhow::Result;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::naming::DEFAULT_IGNORED_FOLDERS;
use crate::remote::{DEFAULT_CHALLENGE_PATTERNS, RemoteRef};
use crate::transfer::{DEFAULT_MIN_STAGED_BYTES, PipelineOptions};

pub const ENV_SOURCE_URL: &str = "MIRROR_SOURCE_URL";
pub const ENV_DEST_PATH: &str = "MIRROR_DEST_PATH";
pub const ENV_DEST_HOST: &str = "MIRROR_DEST_HOST";
pub const ENV_DEST_CREDENTIAL: &str = "MIRROR_DEST_CREDENTIAL";

/// Tunables persisted in `~/.sharemirror/config.json`. Missing fields take
/// their defaults, so older files keep working.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub cache_dir: PathBuf,
    pub manifest_path: PathBuf,
    pub min_staged_bytes: u64,
    pub challenge_recheck_every: usize,
    pub challenge_patterns: Vec<String>,
    pub ignored_folders: Vec<String>,
    pub http_timeout_secs: u64,
    pub sftp_timeout_secs: u64,
    pub retries: usize,
    pub backoff_ms: u64,
    pub user_agent: String,
    pub extension_workaround: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("videos"),
            manifest_path: PathBuf::from("tree.md"),
            min_staged_bytes: DEFAULT_MIN_STAGED_BYTES,
            challenge_recheck_every: 5,
            challenge_patterns: DEFAULT_CHALLENGE_PATTERNS.iter().map(|s| s.to_string()).collect(),
            ignored_folders: DEFAULT_IGNORED_FOLDERS.iter().map(|s| s.to_string()).collect(),
            http_timeout_secs: 300,
            sftp_timeout_secs: 120,
            retries: 3,
            backoff_ms: 500,
            user_agent: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            extension_workaround: false,
        }
    }
}

impl Settings {
    /// `~/.sharemirror`, also home of the log file.
    pub fn config_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".".to_owned() + env!("CARGO_PKG_NAME")))
    }

    /// Read the settings file, writing one with defaults on first use.
    pub fn init() -> Result<Self, ConfigError> {
        match Self::config_dir() {
            Some(dir) => Self::load_or_create(&dir.join("config.json")),
            None => {
                tracing::warn!("cannot find the home directory; using default settings");
                Ok(Self::default())
            }
        }
    }

    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        let err = |e: String| ConfigError::Settings(path.to_path_buf(), e);
        if !path.exists() {
            let settings = Self::default();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| err(e.to_string()))?;
            }
            let json = serde_json::to_string_pretty(&settings).map_err(|e| err(e.to_string()))?;
            std::fs::write(path, json).map_err(|e| err(e.to_string()))?;
            tracing::debug!("wrote default settings to {}", path.display());
            return Ok(settings);
        }
        let text = std::fs::read_to_string(path).map_err(|e| err(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| err(e.to_string()))
    }

    pub fn pipeline_options(&self, dest_root: &str) -> PipelineOptions {
        let mut o = PipelineOptions::new(&self.cache_dir, dest_root);
        o.min_staged_bytes = self.min_staged_bytes;
        o
    }
}

/// Locators and credentials from the environment (and `.env`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Locations {
    pub source: Option<String>,
    pub dest_path: Option<String>,
    pub dest_host: Option<String>,
    pub credential: Option<String>,
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl Locations {
    pub fn from_env() -> Self {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!("loaded environment from {}", path.display());
        }
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            source: non_empty(get(ENV_SOURCE_URL)),
            dest_path: non_empty(get(ENV_DEST_PATH)),
            dest_host: non_empty(get(ENV_DEST_HOST)),
            credential: get(ENV_DEST_CREDENTIAL).filter(|s| !s.is_empty()),
        }
    }

    /// Command-line values win over the environment.
    pub fn with_overrides(mut self, source: Option<String>, dest_path: Option<String>) -> Self {
        if let Some(s) = non_empty(source) {
            self.source = Some(s);
        }
        if let Some(d) = non_empty(dest_path) {
            self.dest_path = Some(d);
        }
        self
    }

    pub fn require_source(&self) -> Result<RemoteRef, ConfigError> {
        let raw = self.source.as_deref().ok_or(ConfigError::Missing(ENV_SOURCE_URL))?;
        validate_source(raw)
    }

    pub fn require_dest_path(&self) -> Result<String, ConfigError> {
        let raw = self.dest_path.as_deref().ok_or(ConfigError::Missing(ENV_DEST_PATH))?;
        validate_destination(raw)
    }

    pub fn require_dest_host(&self) -> Result<String, ConfigError> {
        let raw = self.dest_host.as_deref().ok_or(ConfigError::Missing(ENV_DEST_HOST))?;
        parse_remote_host(raw).map_err(|_| ConfigError::InvalidHost(raw.to_string()))?;
        Ok(raw.to_string())
    }
}

pub fn validate_source(raw: &str) -> Result<RemoteRef, ConfigError> {
    match Url::parse(raw) {
        Ok(u) if (u.scheme() == "http" || u.scheme() == "https") && u.host_str().is_some() => {
            Ok(RemoteRef::new(u.as_str()))
        }
        _ => Err(ConfigError::InvalidSource(raw.to_string())),
    }
}

/// Destination paths are absolute and name something below the root.
pub fn validate_destination(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim();
    if !trimmed.starts_with('/') || trimmed.trim_end_matches('/').is_empty() {
        return Err(ConfigError::InvalidDestination(raw.to_string()));
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

/// Split `user@host[:port]`; the port defaults to 22.
pub fn parse_remote_host(input: &str) -> Result<(String, String, u16)> {
    let (user, host_port) =
        input.split_once('@').ok_or_else(|| anyhow::anyhow!("missing user name, e.g. user@host[:port]"))?;
    let user = user.trim();
    let host_port = host_port.trim();
    if user.is_empty() || host_port.is_empty() {
        return Err(anyhow::anyhow!("empty user or host"));
    }

    let (host, port) = if let Some((h, p_str)) = host_port.rsplit_once(':') {
        let p: u16 = p_str.parse().map_err(|_| anyhow::anyhow!("invalid port: {}", p_str))?;
        (h.to_string(), p)
    } else {
        (host_port.to_string(), 22)
    };
    if host.is_empty() {
        return Err(anyhow::anyhow!("empty host"));
    }

    Ok((user.to_string(), host, port))
}

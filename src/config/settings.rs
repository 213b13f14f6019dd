//! Runtime settings for the announcement poller and state store
//!
//! Loaded once at startup from TOML. Every field carries a serde default so a
//! partial file still loads; unknown keys are ignored.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::constants::{config, env, feed};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Announcement feed queried by the poller
    #[serde(default = "default_feed_url")]
    pub feed_url: String,

    /// Seconds between polls
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Directory holding persisted state (platform data dir when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,

    /// Fire a tick even while the previous request is still outstanding
    #[serde(default)]
    pub allow_overlapping_fetches: bool,
}

fn default_feed_url() -> String {
    feed::DEFAULT_URL.to_string()
}

fn default_poll_interval_secs() -> u64 {
    feed::DEFAULT_POLL_INTERVAL_SECS
}

fn default_request_timeout_secs() -> u64 {
    feed::DEFAULT_TIMEOUT_SECS
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            feed_url: default_feed_url(),
            poll_interval_secs: default_poll_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            state_dir: None,
            allow_overlapping_fetches: false,
        }
    }
}

impl Settings {
    pub fn path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(config::APP_DIR);
        path.push(config::FILENAME);
        path
    }

    /// Load settings from disk, falling back to defaults on any failure.
    /// Writes a default file on first run so operators have something to edit.
    pub fn load() -> Self {
        let path = Self::path();
        let mut settings = if !path.exists() {
            info!(path = %path.display(), "Settings file not found, writing defaults");
            let settings = Self::default();
            if let Err(e) = settings.save() {
                warn!(error = ?e, "Failed to write default settings");
            }
            settings
        } else {
            match fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))
                .and_then(|contents| Self::from_toml_str(&contents))
            {
                Ok(settings) => {
                    info!(path = %path.display(), "Loaded settings");
                    settings
                }
                Err(e) => {
                    error!(error = ?e, "Invalid settings file, using defaults");
                    Self::default()
                }
            }
        };

        settings.apply_overrides(|var| std::env::var(var).ok());
        settings
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Failed to parse settings TOML")
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {}", parent.display()))?;
        }
        let contents = toml::to_string_pretty(self).context("Failed to serialize settings to TOML")?;
        fs::write(&path, contents)
            .with_context(|| format!("Failed to write settings to {}", path.display()))?;
        Ok(())
    }

    /// Apply `MEDIA_AUDIT_*` overrides. `lookup` resolves a variable name to its value.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(env::FEED_URL).filter(|s| !s.trim().is_empty()) {
            self.feed_url = url.trim().to_string();
        }
        if let Some(secs) = parse_num(&lookup, env::POLL_INTERVAL_SECS) {
            self.poll_interval_secs = secs;
        }
        if let Some(secs) = parse_num(&lookup, env::TIMEOUT_SECS) {
            self.request_timeout_secs = secs;
        }
        if let Some(dir) = lookup(env::STATE_DIR).filter(|s| !s.trim().is_empty()) {
            self.state_dir = Some(PathBuf::from(dir));
        }
    }

    /// Poll interval; zero is not a valid period and falls back to the default
    pub fn poll_interval(&self) -> Duration {
        if self.poll_interval_secs == 0 {
            warn!("poll_interval_secs is 0, using default");
            return Duration::from_secs(feed::DEFAULT_POLL_INTERVAL_SECS);
        }
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        if self.request_timeout_secs == 0 {
            warn!("request_timeout_secs is 0, using default");
            return Duration::from_secs(feed::DEFAULT_TIMEOUT_SECS);
        }
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Directory for the file-backed state store
    pub fn resolved_state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| {
            let mut path = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
            path.push(config::APP_DIR);
            path
        })
    }
}

fn parse_num(lookup: &impl Fn(&str) -> Option<String>, var: &str) -> Option<u64> {
    let raw = lookup(var)?;
    raw.trim()
        .parse::<u64>()
        .inspect_err(|e| error!(var = %var, value = %raw, error = ?e, "failed to parse env var"))
        .ok()
}

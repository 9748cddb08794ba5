//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! Queue tuning lives in [`TrackerSettings`]: defaults, then an optional
//! TOML file named by `TRACKER_CONFIG`, then individual env overrides.

pub mod secrets;

use crate::error::{Error, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    pub tracker: TrackerSettings,
}

/// Queue tuning shared by every category.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackerSettings {
    /// Failures after which an item is permanently failed.
    pub max_retries: u32,
    /// Minutes an item may stay in progress before the reaper resets it.
    pub stale_timeout_minutes: u32,
    /// Compare-and-swap attempts per claim before giving up.
    pub claim_attempts: u32,
    /// Bounded wait for the store's write lock and for pool checkout.
    pub busy_timeout_secs: u64,
    pub max_connections: u32,
    /// Completions listed in stats snapshots.
    pub recent_completions: u32,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            stale_timeout_minutes: 30,
            claim_attempts: 5,
            busy_timeout_secs: 30,
            max_connections: 4,
            recent_completions: 10,
        }
    }
}

impl TrackerSettings {
    pub fn stale_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.stale_timeout_minutes) * 60)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_secs(self.busy_timeout_secs)
    }

    /// Parse a TOML document with an optional `[tracker]` table.
    pub fn from_toml(text: &str) -> Result<Self> {
        #[derive(Deserialize)]
        struct File {
            #[serde(default)]
            tracker: TrackerSettings,
        }

        let file: File =
            toml::from_str(text).map_err(|e| Error::Config(format!("invalid tracker config: {e}")))?;
        file.tracker.validate()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    fn validate(self) -> Result<Self> {
        if self.max_retries == 0 {
            return Err(Error::Config("max_retries must be at least 1".to_string()));
        }
        if self.claim_attempts == 0 {
            return Err(Error::Config("claim_attempts must be at least 1".to_string()));
        }
        if self.max_connections == 0 {
            return Err(Error::Config("max_connections must be at least 1".to_string()));
        }
        Ok(self)
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// In production, systemd EnvironmentFile provides the vars.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut tracker = match lookup("TRACKER_CONFIG") {
            Some(path) => TrackerSettings::load(Path::new(&path))?,
            None => TrackerSettings::default(),
        };

        if let Some(v) = parsed(&lookup, "TRACKER_MAX_RETRIES")? {
            tracker.max_retries = v;
        }
        if let Some(v) = parsed(&lookup, "TRACKER_STALE_TIMEOUT_MINUTES")? {
            tracker.stale_timeout_minutes = v;
        }
        if let Some(v) = parsed(&lookup, "TRACKER_CLAIM_ATTEMPTS")? {
            tracker.claim_attempts = v;
        }
        if let Some(v) = parsed(&lookup, "TRACKER_BUSY_TIMEOUT_SECS")? {
            tracker.busy_timeout_secs = v;
        }

        Ok(Self {
            database_url: SecretString::from(required_var(&lookup, "DATABASE_URL")?),
            otel_endpoint: lookup("OTEL_ENDPOINT"),
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            tracker: tracker.validate()?,
        })
    }
}

fn required_var(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<String> {
    lookup(name)
        .ok_or_else(|| Error::Config(format!("required environment variable {name} is not set")))
}

fn parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| Error::Config(format!("{name}={raw}: {e}")))
        })
        .transpose()
}

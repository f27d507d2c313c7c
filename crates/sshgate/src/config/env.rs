//! Environment-based configuration overrides.

use std::collections::HashMap;
use std::time::Duration;

use super::ServerConfig;
use crate::error::{Result, ServerError};

/// Environment configuration prefix.
pub const DEFAULT_PREFIX: &str = "SSHGATE";

/// Environment variable reader.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    /// Prefix for environment variables.
    prefix: String,
    /// Fixed values used instead of the process environment.
    source: Option<HashMap<String, String>>,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

impl EnvConfig {
    /// Create a reader for the process environment.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            source: None,
        }
    }

    /// Create a reader over fixed values, keyed by full variable name.
    #[must_use]
    pub fn from_map(prefix: impl Into<String>, values: HashMap<String, String>) -> Self {
        Self {
            prefix: prefix.into(),
            source: Some(values),
        }
    }

    /// Build the full environment variable name.
    fn var_name(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_uppercase()
        } else {
            format!("{}_{}", self.prefix, name.to_uppercase())
        }
    }

    /// Get a string value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<String> {
        let var_name = self.var_name(name);
        match &self.source {
            Some(values) => values.get(&var_name).cloned(),
            None => std::env::var(&var_name).ok(),
        }
    }

    /// Get a parsed value.
    pub fn parse<T: std::str::FromStr>(&self, name: &str) -> Result<Option<T>> {
        self.get(name)
            .map(|v| {
                v.parse().map_err(|_| {
                    ServerError::config(format!("{}: cannot parse {v:?}", self.var_name(name)))
                })
            })
            .transpose()
    }

    /// Get a boolean value.
    #[must_use]
    pub fn bool(&self, name: &str) -> Option<bool> {
        self.get(name).map(|v| {
            matches!(
                v.to_lowercase().as_str(),
                "1" | "true" | "yes" | "on" | "enabled"
            )
        })
    }

    /// Get a duration in seconds.
    pub fn duration_secs(&self, name: &str) -> Result<Option<Duration>> {
        Ok(self.parse::<u64>(name)?.map(Duration::from_secs))
    }

    /// Check if a variable is set.
    #[must_use]
    pub fn is_set(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Apply every override that is set to `config`.
    pub fn apply(&self, config: &mut ServerConfig) -> Result<()> {
        if let Some(listen) = self.get("LISTEN") {
            config.listen = listen;
        }
        if let Some(version) = self.get("SERVER_VERSION") {
            config.server_version = version;
        }
        if let Some(banner) = self.get("BANNER") {
            config.banner = banner;
        }
        if let Some(interval) = self.duration_secs("KEEPALIVE_INTERVAL")? {
            config.keepalive.interval = interval;
        }
        if let Some(max) = self.parse("KEEPALIVE_MAX_MISSED")? {
            config.keepalive.max_missed = max;
        }
        if let Some(timeout) = self.duration_secs("SHUTDOWN_TIMEOUT")? {
            config.shutdown_timeout = timeout;
        }
        if let Some(forwarding) = self.bool("FORWARDING") {
            config.forwarding = forwarding;
        }
        Ok(())
    }
}

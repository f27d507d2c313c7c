//! SSH keepalive configuration.
//!
//! The server periodically sends `keepalive@openssh.com` global requests with
//! want-reply set. Any reply, success or failure, counts as a sign of life. A
//! connection that leaves [`KeepaliveConfig::max_missed`] consecutive probes
//! unanswered is closed and goes through normal teardown.
//!
//! # Example
//!
//! ```
//! use sshgate::KeepaliveConfig;
//! use std::time::Duration;
//!
//! let config = KeepaliveConfig::new()
//!     .interval(Duration::from_secs(10))
//!     .max_missed(5);
//! assert!(config.validate().is_ok());
//! assert_eq!(config.dead_after(), Some(Duration::from_secs(50)));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ServerError};

/// Keepalive configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct KeepaliveConfig {
    /// Enable keepalive probes.
    pub enabled: bool,
    /// Interval between probes.
    #[serde(with = "crate::config::duration_secs")]
    pub interval: Duration,
    /// Unanswered probes tolerated before the connection is closed.
    pub max_missed: u32,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(30),
            max_missed: 3,
        }
    }
}

impl KeepaliveConfig {
    /// Create new config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set interval between probes.
    #[must_use]
    pub const fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set maximum missed probes before the connection is considered dead.
    #[must_use]
    pub const fn max_missed(mut self, max: u32) -> Self {
        self.max_missed = max;
        self
    }

    /// Enable or disable keepalive.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Create a disabled keepalive config.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// How long a silent peer survives after the first probe.
    #[must_use]
    pub fn dead_after(&self) -> Option<Duration> {
        self.enabled.then(|| self.interval * self.max_missed)
    }

    /// Check the bounds: an interval of at least one second and at least one
    /// tolerated miss.
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.interval < Duration::from_secs(1) {
            return Err(ServerError::config(format!(
                "keepalive interval must be at least 1s, got {:?}",
                self.interval
            )));
        }
        if self.max_missed == 0 {
            return Err(ServerError::config("keepalive maxMissed must be at least 1"));
        }
        Ok(())
    }

    /// Copy these settings onto the transport configuration.
    pub(crate) fn apply(&self, config: &mut russh::server::Config) {
        if self.enabled {
            config.keepalive_interval = Some(self.interval);
            config.keepalive_max = self.max_missed as usize;
        } else {
            config.keepalive_interval = None;
        }
    }
}

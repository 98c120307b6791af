//! Client configuration loaded from environment variables.
//!
//! Every setting has a default so the client can start against a local
//! service with zero configuration.

use std::time::Duration;

use parley_shared::constants::{DEFAULT_POLL_INTERVAL_SECS, DEFAULT_SERVER_URL};
use parley_shared::types::Username;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the remote message log service.
    /// Env: `PARLEY_SERVER_URL`
    /// Default: `http://127.0.0.1:4000`
    pub server_url: String,

    /// Interval between delta fetches while a channel is polled.
    /// Env: `PARLEY_POLL_INTERVAL_SECS`
    /// Default: `10`
    pub poll_interval: Duration,

    /// User to sign in as. The engine itself never reads this; the binary
    /// turns it into a session.
    /// Env: `PARLEY_USER`
    pub user: Option<Username>,

    /// Whether the view starts out hidden (no polling until shown).
    /// Env: `PARLEY_START_HIDDEN` (true/false)
    /// Default: `false`
    pub start_hidden: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            user: None,
            start_hidden: false,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("PARLEY_SERVER_URL") {
            let url = url.trim().trim_end_matches('/');
            if url.is_empty() {
                tracing::warn!("Empty PARLEY_SERVER_URL, using default");
            } else {
                config.server_url = url.to_string();
            }
        }

        if let Some(val) = lookup("PARLEY_POLL_INTERVAL_SECS") {
            match val.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => config.poll_interval = Duration::from_secs(secs),
                _ => {
                    tracing::warn!(
                        value = %val,
                        "Invalid PARLEY_POLL_INTERVAL_SECS, using default"
                    );
                }
            }
        }

        if let Some(name) = lookup("PARLEY_USER") {
            match Username::new(&name) {
                Ok(user) => config.user = Some(user),
                Err(e) => tracing::warn!(error = %e, "Ignoring PARLEY_USER"),
            }
        }

        if let Some(val) = lookup("PARLEY_START_HIDDEN") {
            config.start_hidden = val == "true" || val == "1";
        }

        config
    }
}

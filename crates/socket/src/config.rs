//! TOML settings.
//!
//! ```toml
//! [app]
//! backend = "http"
//!
//! [socket]
//! queue_capacity = 128
//! poll_interval_ms = 2000
//!
//! [backend.http]
//! base_url = "https://chat.example.com/api"
//! channel = "1029384756"
//!
//! [backend.http.socket]
//! poll_interval_ms = 5000
//! ```
//!
//! Socket keys are looked up in the selected backend's `socket` table first,
//! then in the shared `[socket]` table, then fall back to defaults.

use crate::{ConfigError, SendPolicy, SocketOptions};

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;

/// Application-level keys.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppSettings {
    /// Name of the backend to use.
    pub backend: Option<String>,
}

/// Socket keys. Unset keys defer to the next layer.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
#[allow(missing_docs)]
pub struct SocketSettings {
    pub queue_capacity: Option<usize>,
    pub inbound_capacity: Option<usize>,
    pub reorder_window: Option<u64>,
    pub gap_timeout_ms: Option<u64>,
    pub sender_idle_timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_base_delay_ms: Option<u64>,
    pub retry_max_delay_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub max_poll_interval_ms: Option<u64>,
    pub send_policy: Option<SendPolicy>,
    pub close_timeout_ms: Option<u64>,
}

impl SocketSettings {
    /// Keys set here win; unset keys come from `fallback`.
    #[must_use]
    pub fn or(self, fallback: Self) -> Self {
        Self {
            queue_capacity: self.queue_capacity.or(fallback.queue_capacity),
            inbound_capacity: self.inbound_capacity.or(fallback.inbound_capacity),
            reorder_window: self.reorder_window.or(fallback.reorder_window),
            gap_timeout_ms: self.gap_timeout_ms.or(fallback.gap_timeout_ms),
            sender_idle_timeout_ms: self
                .sender_idle_timeout_ms
                .or(fallback.sender_idle_timeout_ms),
            max_retries: self.max_retries.or(fallback.max_retries),
            retry_base_delay_ms: self.retry_base_delay_ms.or(fallback.retry_base_delay_ms),
            retry_max_delay_ms: self.retry_max_delay_ms.or(fallback.retry_max_delay_ms),
            poll_interval_ms: self.poll_interval_ms.or(fallback.poll_interval_ms),
            max_poll_interval_ms: self.max_poll_interval_ms.or(fallback.max_poll_interval_ms),
            send_policy: self.send_policy.or(fallback.send_policy),
            close_timeout_ms: self.close_timeout_ms.or(fallback.close_timeout_ms),
        }
    }

    /// Overlay these keys on `options`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for zero capacities or windows and
    /// for a maximum below its base.
    pub fn apply(&self, mut options: SocketOptions) -> Result<SocketOptions, ConfigError> {
        let ms = Duration::from_millis;

        if let Some(capacity) = self.queue_capacity {
            options.queue_capacity = positive("queue_capacity", capacity)?;
        }
        if let Some(capacity) = self.inbound_capacity {
            options.inbound_capacity = positive("inbound_capacity", capacity)?;
        }
        if let Some(window) = self.reorder_window {
            if window == 0 {
                return Err(invalid("reorder_window", "must be at least 1"));
            }
            options.reorder_window = window;
        }
        if let Some(timeout) = self.gap_timeout_ms {
            options.gap_timeout = ms(timeout);
        }
        if let Some(timeout) = self.sender_idle_timeout_ms {
            options.sender_idle_timeout = ms(timeout);
        }
        if let Some(retries) = self.max_retries {
            options.max_retries = retries;
        }
        if let Some(delay) = self.retry_base_delay_ms {
            options.retry_base_delay = ms(delay);
        }
        if let Some(delay) = self.retry_max_delay_ms {
            options.retry_max_delay = ms(delay);
        }
        if let Some(interval) = self.poll_interval_ms {
            options.poll_interval = ms(interval);
        }
        if let Some(interval) = self.max_poll_interval_ms {
            options.max_poll_interval = ms(interval);
        }
        if let Some(policy) = self.send_policy {
            options.send_policy = policy;
        }
        if let Some(timeout) = self.close_timeout_ms {
            options.close_timeout = ms(timeout);
        }

        if options.retry_max_delay < options.retry_base_delay {
            return Err(invalid(
                "retry_max_delay_ms",
                "must not be below retry_base_delay_ms",
            ));
        }
        if options.max_poll_interval < options.poll_interval {
            return Err(invalid(
                "max_poll_interval_ms",
                "must not be below poll_interval_ms",
            ));
        }

        Ok(options)
    }
}

/// Parsed settings file.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// `[app]`
    pub app: AppSettings,
    /// `[socket]`
    pub socket: SocketSettings,
    /// `[backend.<name>]` tables, kept raw until a backend claims one.
    pub backend: BTreeMap<String, toml::Table>,
}

impl Settings {
    /// Load from a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        contents.parse()
    }

    /// Backend chosen in `[app]`.
    #[must_use]
    pub fn backend_name(&self) -> Option<&str> {
        self.app.backend.as_deref()
    }

    /// Options from the shared `[socket]` table.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for out-of-range values.
    pub fn socket_options(&self) -> Result<SocketOptions, ConfigError> {
        self.socket.apply(SocketOptions::default())
    }

    /// Options for a backend: its own `socket` table over the shared one.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend's `socket` table is malformed or a
    /// value is out of range.
    pub fn socket_options_for(&self, backend: &str) -> Result<SocketOptions, ConfigError> {
        let own = match self.backend.get(backend).and_then(|table| table.get("socket")) {
            Some(value) => value
                .clone()
                .try_into::<SocketSettings>()
                .map_err(|source| ConfigError::Backend {
                    backend: backend.to_string(),
                    source,
                })?,
            None => SocketSettings::default(),
        };

        own.or(self.socket.clone()).apply(SocketOptions::default())
    }

    /// Deserialize a backend's section, without its `socket` table. A
    /// missing section deserializes from an empty table.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Backend`] if the section does not fit `T`.
    pub fn backend_section<T: DeserializeOwned>(&self, backend: &str) -> Result<T, ConfigError> {
        let mut table = self.backend.get(backend).cloned().unwrap_or_default();
        table.remove("socket");

        toml::Value::Table(table)
            .try_into()
            .map_err(|source| ConfigError::Backend {
                backend: backend.to_string(),
                source,
            })
    }
}

impl FromStr for Settings {
    type Err = ConfigError;

    fn from_str(contents: &str) -> Result<Self, Self::Err> {
        Ok(toml::from_str(contents)?)
    }
}

fn positive(key: &'static str, value: usize) -> Result<usize, ConfigError> {
    if value == 0 {
        Err(invalid(key, "must be at least 1"))
    } else {
        Ok(value)
    }
}

fn invalid(key: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.to_string(),
    }
}

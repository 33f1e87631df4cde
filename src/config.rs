//! Connection configuration for the MongoDB adapter.
//!
//! This module turns the generic connection parameters (host, credentials,
//! database name and a free-form option map) into a MongoDB connection URI and
//! into the typed driver options the adapter sets explicitly.

use crate::error::{AdapterError, AdapterResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::time::Duration;

pub const URI_SCHEME: &str = "mongodb://";

/// Option key translated into the driver's server selection timeout (milliseconds).
pub const OPTION_SERVER_SELECTION_TIMEOUT: &str = "serverselectiontimeout";

/// Option key translated into the driver's replica set name.
pub const OPTION_REPLICA_SET: &str = "replicaset";

/// Option keys that are applied as typed driver options.
const TRANSLATED_OPTION_KEYS: &[&str] = &[OPTION_SERVER_SELECTION_TIMEOUT, OPTION_REPLICA_SET];

/// Configuration for a single MongoDB connection.
///
/// Empty `user`/`password` strings mean "no credentials"; credentials are only
/// placed in the URI when both are non-empty.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,
    #[serde(default)]
    pub user: String,
    /// Contains sensitive data - never log
    #[serde(default, skip_serializing)]
    pub password: String,
    /// Database to resolve after connecting. Empty means none.
    #[serde(default)]
    pub database: String,
    /// Free-form options. Every entry is rendered into the URI query string.
    #[serde(default)]
    pub options: BTreeMap<String, Value>,
}

impl ConnectionConfig {
    /// Create a configuration for the given host with no credentials, database or options.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Add or replace a free-form option.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// True when both user and password are non-empty.
    pub fn has_credentials(&self) -> bool {
        !self.user.is_empty() && !self.password.is_empty()
    }

    /// Database name to resolve after connecting, if any.
    pub fn database_name(&self) -> Option<&str> {
        Some(self.database.as_str()).filter(|name| !name.is_empty())
    }

    /// Assemble the connection URI.
    ///
    /// Shape: `mongodb://[user:password@]host/?k1=v1&k2=v2&`. Every option is
    /// emitted once, in key order, each followed by `&`.
    pub fn connection_uri(&self) -> String {
        let mut uri = self.authority(&self.password);
        uri.push_str(&self.query_string());
        uri
    }

    /// URI handed to the driver.
    ///
    /// The Rust driver rejects empty option pairs and option names it does not
    /// know, so the translated keys are left out (they are set through
    /// [`DriverOptions`]) and no trailing separator is emitted.
    pub(crate) fn driver_uri(&self) -> String {
        let mut uri = self.authority(&self.password);
        let pairs: Vec<String> = self
            .options
            .iter()
            .filter(|(key, _)| !is_translated_key(key))
            .map(|(key, value)| format!("{}={}", key, render_value(value)))
            .collect();
        if !pairs.is_empty() {
            uri.push('?');
            uri.push_str(&pairs.join("&"));
        }
        uri
    }

    /// Get a display-safe version of the connection URI (password masked).
    pub fn masked_uri(&self) -> String {
        let mut uri = self.authority("****");
        uri.push_str(&self.query_string());
        uri
    }

    /// `?k1=v1&k2=v2&`
    fn query_string(&self) -> String {
        let mut query = String::from("?");
        for (key, value) in &self.options {
            query.push_str(key);
            query.push('=');
            query.push_str(&render_value(value));
            query.push('&');
        }
        query
    }

    /// `mongodb://[user:password@]host/`
    fn authority(&self, password: &str) -> String {
        let mut uri = String::from(URI_SCHEME);
        if self.has_credentials() {
            uri.push_str(&self.user);
            uri.push(':');
            uri.push_str(password);
            uri.push('@');
        }
        uri.push_str(&self.host);
        uri.push('/');
        uri
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &if self.password.is_empty() { "" } else { "****" })
            .field("database", &self.database)
            .field("options", &self.options)
            .finish()
    }
}

/// Driver-level options translated from the recognized configuration keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverOptions {
    pub server_selection_timeout: Option<Duration>,
    pub replica_set: Option<String>,
}

impl DriverOptions {
    /// Translate the recognized option keys (matched case-insensitively).
    ///
    /// A recognized key given under two spellings is rejected. Other keys are
    /// ignored here; they only travel in the URI. Malformed values fail with
    /// [`AdapterError::Config`] instead of falling back to a default.
    pub fn from_options(options: &BTreeMap<String, Value>) -> AdapterResult<Self> {
        let mut translated = Self::default();
        // Recognized key (lowercase) -> spelling that set it.
        let mut seen: BTreeMap<&str, &str> = BTreeMap::new();
        for (key, value) in options {
            let canonical = key.to_ascii_lowercase();
            let known = TRANSLATED_OPTION_KEYS
                .iter()
                .copied()
                .find(|known| *known == canonical);
            if let Some(known) = known {
                if let Some(first) = seen.insert(known, key.as_str()) {
                    return Err(AdapterError::config(
                        key.as_str(),
                        format!("conflicts with option '{}', set it only once", first),
                    ));
                }
            }

            match canonical.as_str() {
                OPTION_SERVER_SELECTION_TIMEOUT => {
                    let millis = parse_millis(key, value)?;
                    translated.server_selection_timeout = Some(Duration::from_millis(millis));
                }
                OPTION_REPLICA_SET => match value {
                    Value::String(name) if !name.is_empty() => {
                        translated.replica_set = Some(name.clone());
                    }
                    other => {
                        return Err(AdapterError::config(
                            key.as_str(),
                            format!("expected a non-empty replica set name, got {}", other),
                        ));
                    }
                },
                _ => {}
            }
        }
        Ok(translated)
    }
}

fn is_translated_key(key: &str) -> bool {
    TRANSLATED_OPTION_KEYS
        .iter()
        .any(|known| key.eq_ignore_ascii_case(known))
}

fn render_value(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(s) => Cow::Borrowed(s),
        Value::Null => Cow::Borrowed(""),
        other => Cow::Owned(other.to_string()),
    }
}

/// Interpret a value as whole milliseconds, rounding half away from zero.
fn parse_millis(key: &str, value: &Value) -> AdapterResult<u64> {
    let raw = match value {
        Value::Number(n) => {
            if let Some(millis) = n.as_u64() {
                return Ok(millis);
            }
            n.as_f64()
        }
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    let raw = raw.ok_or_else(|| {
        AdapterError::config(key, format!("expected a number of milliseconds, got {}", value))
    })?;

    let rounded = raw.round();
    if !rounded.is_finite() || rounded < 0.0 || rounded > u64::MAX as f64 {
        return Err(AdapterError::config(
            key,
            format!("{} is not a valid number of milliseconds", raw),
        ));
    }
    Ok(rounded as u64)
}

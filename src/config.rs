//! Client configuration: programmatic settings and the TOML file read by the CLI.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::Path;

use crate::transport::ProxyConfig;

/// Base URL of the hosted gateway.
pub const DEFAULT_BASE_URL: &str = "https://chimeragpt.adventblocks.cc/v1";

/// Environment variable consulted when the config file has no `api_key`.
pub const API_KEY_ENV_VAR: &str = "CHIMERA_API_KEY";

/// Gateway API key. Formatting and serialization print `[REDACTED]`; the
/// backing buffer is wiped when dropped.
#[derive(Clone)]
pub struct ApiKey(SecretString);

impl ApiKey {
    /// The key as sent in the `Authorization` header.
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().is_empty()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl Serialize for ApiKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> Deserialize<'de> for ApiKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(ApiKey::from)
    }
}

impl From<String> for ApiKey {
    fn from(s: String) -> Self {
        ApiKey(SecretString::from(s))
    }
}

impl From<&str> for ApiKey {
    fn from(s: &str) -> Self {
        ApiKey(SecretString::from(s))
    }
}

/// Settings for one [`ChimeraClient`](crate::ChimeraClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_key: ApiKey,
    pub base_url: String,
    pub proxy: Option<ProxyConfig>,
    /// Report proxy fallbacks at info level instead of debug.
    pub debug_logging: bool,
}

impl ClientConfig {
    pub fn new(api_key: impl Into<ApiKey>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            proxy: None,
            debug_logging: false,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn with_debug_logging(mut self, enabled: bool) -> Self {
        self.debug_logging = enabled;
        self
    }
}

/// Where `Config` found the API key; shown by `chimera check`.
#[derive(Debug, Clone, PartialEq)]
pub enum KeySource {
    /// `client.api_key` written out in the file.
    Literal,
    /// `client.api_key` built from `${NAME}` references.
    EnvExpanded,
    /// No `client.api_key`; taken from this variable instead.
    Convention(String),
}

impl std::fmt::Display for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::Literal => write!(f, "config file"),
            KeySource::EnvExpanded => write!(f, "config file, interpolated"),
            KeySource::Convention(var) => write!(f, "${}", var),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Contents of a `chimera.toml` file after env expansion.
#[derive(Debug, Clone)]
pub struct Config {
    pub client: ClientConfig,
    pub key_source: KeySource,
    pub logging: LoggingConfig,
}

/// `[client]` table as written; `api_key` may hold `${VAR}` references.
#[derive(Deserialize)]
struct RawClientConfig {
    api_key: Option<String>,
    #[serde(default = "default_base_url")]
    base_url: String,
    #[serde(default)]
    debug_logging: bool,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

impl Default for RawClientConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            debug_logging: false,
        }
    }
}

/// Configuration as deserialized, before env expansion.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default)]
    client: RawClientConfig,
    proxy: Option<ProxyConfig>,
    #[serde(default)]
    logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file, expanding env references.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::parse_str(&content)
    }

    /// Parse configuration from a TOML string, expanding env references.
    pub fn parse_str(content: &str) -> Result<Self, ConfigError> {
        Self::parse_str_with(content, |name| std::env::var(name).ok())
    }

    /// Parse configuration, resolving variables through `lookup`.
    pub fn parse_str_with<F>(content: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw: RawConfig = toml::from_str(content)?;
        Self::from_raw(raw, lookup)
    }

    fn from_raw<F>(raw: RawConfig, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let (api_key, key_source) = match raw.client.api_key {
            Some(value) if value.contains("${") => (
                interpolate(&value, "client.api_key", &lookup)?,
                KeySource::EnvExpanded,
            ),
            Some(value) => (value, KeySource::Literal),
            None => match lookup(API_KEY_ENV_VAR) {
                Some(value) => (value, KeySource::Convention(API_KEY_ENV_VAR.to_string())),
                None => return Err(ConfigError::MissingApiKey),
            },
        };

        if api_key.is_empty() {
            return Err(ConfigError::MissingApiKey);
        }

        if raw.client.base_url.is_empty() {
            return Err(ConfigError::Validation("client.base_url is empty".to_string()));
        }

        let proxy = raw
            .proxy
            .map(|mut proxy| -> Result<ProxyConfig, ConfigError> {
                if let Some(host) = proxy.host.take() {
                    proxy.host = Some(interpolate(&host, "proxy.host", &lookup)?);
                }
                if let Some(auth) = proxy.auth.as_mut() {
                    if let Some(password) = auth.password.take() {
                        auth.password = Some(interpolate(
                            &password,
                            "proxy.auth.password",
                            &lookup,
                        )?);
                    }
                }
                Ok(proxy)
            })
            .transpose()?;

        if let Some(report) = proxy.as_ref().map(ProxyConfig::validate) {
            if !report.is_valid {
                tracing::warn!(
                    fields = %report.invalid_fields.join(", "),
                    "Proxy section is invalid; requests will use a direct connection"
                );
            }
        }

        Ok(Config {
            client: ClientConfig {
                api_key: ApiKey::from(api_key),
                base_url: raw.client.base_url,
                proxy,
                debug_logging: raw.client.debug_logging,
            },
            key_source,
            logging: raw.logging,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Cannot resolve ${{{var}}} in {field}: {message}")]
    EnvVar {
        var: String,
        field: String,
        message: String,
    },

    #[error("No Chimera API key was provided")]
    MissingApiKey,
}

/// Replace every `${NAME}` in `value` with `lookup(NAME)`.
///
/// `field` is the dotted config path, carried into the error so a bad
/// reference points at the line that holds it.
fn interpolate<F>(value: &str, field: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let unresolved = |var: &str, message: &str| ConfigError::EnvVar {
        var: var.to_string(),
        field: field.to_string(),
        message: message.to_string(),
    };

    let mut out = String::with_capacity(value.len());
    let mut remaining = value;
    while let Some((literal, reference)) = remaining.split_once("${") {
        out.push_str(literal);
        let Some((name, tail)) = reference.split_once('}') else {
            return Err(unresolved(reference, "reference has no closing brace"));
        };
        if name.is_empty() {
            return Err(unresolved(name, "reference names no variable"));
        }
        match lookup(name) {
            Some(resolved) => out.push_str(&resolved),
            None => return Err(unresolved(name, "variable is not set")),
        }
        remaining = tail;
    }
    out.push_str(remaining);
    Ok(out)
}

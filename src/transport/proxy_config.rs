//! Forward-proxy descriptors and their validation.
//!
//! A [`ProxyConfig`] is whatever the caller handed us: every field is optional
//! so that a half-filled descriptor can still be inspected and reported on.
//! [`ProxyConfig::validate`] produces a [`ProxyValidation`] report, and
//! [`ProxyConfig::to_target`] turns a valid descriptor into an immutable
//! [`ProxyTarget`] that the builder and prober work with.

use serde::{Deserialize, Serialize};

const HOST: &str = "host";
const PORT: &str = "port";
const AUTH: &str = "auth";
const PROTOCOL: &str = "protocol";

/// Protocol spoken to the forward proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    /// Plain HTTP proxy; HTTPS traffic is tunneled with CONNECT.
    Http,
    /// Proxy reached over TLS, configured through the client's native proxy support.
    Https,
}

impl ProxyProtocol {
    /// Parse one of the two accepted literals.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "http" => Some(ProxyProtocol::Http),
            "https" => Some(ProxyProtocol::Https),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyProtocol::Http => "http",
            ProxyProtocol::Https => "https",
        }
    }
}

impl std::fmt::Display for ProxyProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Proxy credentials as supplied; either half may be missing.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyAuthConfig {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for ProxyAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyAuthConfig")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// A user-supplied forward-proxy descriptor.
///
/// Deserializes permissively (`port` is any integer, `protocol` any string) so
/// that bad values are reported by [`ProxyConfig::validate`] rather than
/// rejected by the parser.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub host: Option<String>,
    pub port: Option<i64>,
    pub protocol: Option<String>,
    pub auth: Option<ProxyAuthConfig>,
    /// Skip upstream certificate verification on the native (`https`) proxy path.
    #[serde(default)]
    pub danger_accept_invalid_certs: bool,
}

impl ProxyConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: Some(host.into()),
            port: Some(i64::from(port)),
            ..Default::default()
        }
    }

    pub fn with_protocol(mut self, protocol: ProxyProtocol) -> Self {
        self.protocol = Some(protocol.as_str().to_string());
        self
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = Some(ProxyAuthConfig {
            username: Some(username.into()),
            password: Some(password.into()),
        });
        self
    }

    /// Opt out of certificate verification for the `https` proxy path.
    pub fn danger_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.danger_accept_invalid_certs = accept;
        self
    }

    /// Check the descriptor field by field.
    ///
    /// `host` and `port` are required. `auth`, when present, needs both a
    /// username and a password; `protocol`, when present, must be `http` or
    /// `https`. Missing fields are listed before malformed ones, each group in
    /// `host`, `port`, `auth`, `protocol` order.
    pub fn validate(&self) -> ProxyValidation {
        let mut missing = Vec::new();
        let mut invalid = Vec::new();

        match self.host.as_deref() {
            None | Some("") => missing.push(HOST),
            Some(_) => {}
        }

        match self.port {
            None => missing.push(PORT),
            Some(port) if u16::try_from(port).map_or(true, |p| p == 0) => invalid.push(PORT),
            Some(_) => {}
        }

        if let Some(auth) = &self.auth {
            if auth.username.is_none() || auth.password.is_none() {
                invalid.push(AUTH);
            }
        }

        if let Some(protocol) = self.protocol.as_deref() {
            if ProxyProtocol::parse(protocol).is_none() {
                invalid.push(PROTOCOL);
            }
        }

        missing.extend(invalid);
        ProxyValidation {
            is_valid: missing.is_empty(),
            invalid_fields: missing,
        }
    }

    /// Validate and freeze into a [`ProxyTarget`].
    pub fn to_target(&self) -> Result<ProxyTarget, ProxyValidation> {
        let report = self.validate();
        if !report.is_valid {
            return Err(report);
        }

        let (Some(host), Some(port)) = (self.host.clone(), self.port) else {
            return Err(report);
        };
        let port = u16::try_from(port).map_err(|_| ProxyValidation::invalid(PORT))?;

        let credentials = self.auth.as_ref().and_then(|auth| {
            match (auth.username.as_deref(), auth.password.as_deref()) {
                (Some(username), Some(password))
                    if !username.is_empty() && !password.is_empty() =>
                {
                    Some(ProxyCredentials {
                        username: username.to_string(),
                        password: password.to_string(),
                    })
                }
                _ => None,
            }
        });

        Ok(ProxyTarget {
            host,
            port,
            protocol: self.protocol.as_deref().and_then(ProxyProtocol::parse),
            credentials,
            accept_invalid_certs: self.danger_accept_invalid_certs,
        })
    }
}

/// Outcome of [`ProxyConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyValidation {
    pub is_valid: bool,
    /// Offending field names, missing ones first. Empty when valid.
    pub invalid_fields: Vec<&'static str>,
}

impl ProxyValidation {
    fn invalid(field: &'static str) -> Self {
        Self {
            is_valid: false,
            invalid_fields: vec![field],
        }
    }
}

impl std::fmt::Display for ProxyValidation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid {
            write!(f, "valid")
        } else {
            write!(f, "invalid fields: {}", self.invalid_fields.join(", "))
        }
    }
}

/// Username and password for the proxy, both non-empty.
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for ProxyCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyCredentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// A validated, immutable forward-proxy configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyTarget {
    host: String,
    port: u16,
    protocol: Option<ProxyProtocol>,
    credentials: Option<ProxyCredentials>,
    accept_invalid_certs: bool,
}

impl ProxyTarget {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Declared protocol; `None` when the descriptor left it out.
    pub fn protocol(&self) -> Option<ProxyProtocol> {
        self.protocol
    }

    pub fn credentials(&self) -> Option<&ProxyCredentials> {
        self.credentials.as_ref()
    }

    pub fn accepts_invalid_certs(&self) -> bool {
        self.accept_invalid_certs
    }

    /// URL scheme used to reach the proxy itself.
    pub fn scheme(&self) -> &'static str {
        self.protocol.unwrap_or(ProxyProtocol::Http).as_str()
    }
}

/// Renders `scheme://host:port`, never the credentials.
impl std::fmt::Display for ProxyTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}:{}", self.scheme(), self.host, self.port)
    }
}

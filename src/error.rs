//! Error types for chimera.

/// Result type alias for chimera operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for chimera.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// The gateway answered with a non-success status. Displays as the
    /// response body, verbatim.
    #[error("{message}")]
    Api { status: u16, message: String },

    /// No usable response: connection, TLS, timeout or body decoding failure.
    #[error("{0}")]
    Upstream(#[from] reqwest::Error),

    #[error("Proxy setup failed: {0}")]
    Proxy(String),
}

impl Error {
    /// HTTP status of the failed call, when the gateway answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Api { status, .. } => Some(*status),
            Error::Upstream(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

//! Error types for the census pipeline

use thiserror::Error;

/// Result type alias for census operations
pub type Result<T> = std::result::Result<T, Error>;

/// Census pipeline errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A source could not be reached or answered with a failure status
    #[error("Source '{source_name}' unavailable: {message}")]
    SourceUnavailable {
        source_name: String,
        message: String,
        /// Timeouts, connection failures, HTTP 5xx and 429 are worth retrying
        transient: bool,
    },

    /// Two sources claim the same catalog id for different bodies
    #[error("Identity conflict on catalog id {catalog_id}: '{kept}' vs '{rekeyed}'")]
    IdentityConflict {
        catalog_id: u64,
        kept: String,
        rekeyed: String,
    },

    /// Not enough complete feature vectors for an analysis stage
    #[error("Insufficient data for {stage}: {available} usable points, {required} required")]
    InsufficientData {
        stage: String,
        available: usize,
        required: usize,
    },

    /// Cached payload could not be decoded
    #[error("Corrupt cache entry {key}: {message}")]
    CorruptCacheEntry { key: String, message: String },

    /// Source payload did not have the expected shape
    #[error("Malformed payload from '{source_name}': {message}")]
    MalformedPayload { source_name: String, message: String },

    /// Fetch exceeded the global per-fetch timeout
    #[error("Timed out after {secs}s: {operation}")]
    Timeout { operation: String, secs: u64 },

    /// Result store error
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML config parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a source unavailable error
    pub fn source_unavailable(
        source_name: impl Into<String>,
        message: impl Into<String>,
        transient: bool,
    ) -> Self {
        Self::SourceUnavailable {
            source_name: source_name.into(),
            message: message.into(),
            transient,
        }
    }

    /// Create a malformed payload error
    pub fn malformed(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedPayload {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Create a corrupt cache entry error
    pub fn corrupt_cache(key: impl std::fmt::Display, message: impl Into<String>) -> Self {
        Self::CorruptCacheEntry {
            key: key.to_string(),
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether a retry has a chance of succeeding
    pub fn is_transient(&self) -> bool {
        match self {
            Error::SourceUnavailable { transient, .. } => *transient,
            Error::Timeout { .. } => true,
            Error::Http(err) => {
                err.is_timeout()
                    || err.is_connect()
                    || err
                        .status()
                        .map(|s| s.is_server_error() || s.as_u16() == 429)
                        .unwrap_or(false)
            }
            _ => false,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::source_unavailable("elements", "HTTP 503", true).is_transient());
        assert!(!Error::source_unavailable("elements", "HTTP 404", false).is_transient());
        assert!(Error::Timeout { operation: "fetch".into(), secs: 30 }.is_transient());
        assert!(!Error::config("bad").is_transient());
    }
}

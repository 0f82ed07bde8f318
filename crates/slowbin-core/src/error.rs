//! Error types for Slowbin.
//!
//! Admission and origin-metadata failures are terminal and surface before any
//! byte is streamed. Each carries a machine-readable reason code and the HTTP
//! status the server responds with.

use thiserror::Error;

/// Main error type for Slowbin.
#[derive(Debug, Error)]
pub enum SlowbinError {
    // Admission errors
    #[error("Bad URL")]
    BadUrl,

    #[error("URL scheme not specified")]
    SchemeNotSpecified,

    #[error("Could not resolve hostname")]
    BadHostname,

    #[error("Local URLs are not allowed")]
    LocalUrl,

    // Origin metadata errors
    #[error("Origin responded with status {status}")]
    OriginStatus { status: u16 },

    #[error("Content-Length header missing")]
    ContentHeaderMissing,

    #[error("Content-Length header is not an integer")]
    ContentHeaderNotInteger,

    #[error("Content-Length exceeds the limit of {limit}")]
    ContentTooLarge { limit: String },

    // Transport and storage errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("Cache store error: {message}")]
    Store {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias for Slowbin operations.
pub type Result<T> = std::result::Result<T, SlowbinError>;

impl From<std::io::Error> for SlowbinError {
    fn from(err: std::io::Error) -> Self {
        SlowbinError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for SlowbinError {
    fn from(err: rusqlite::Error) -> Self {
        SlowbinError::Store {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for SlowbinError {
    fn from(err: reqwest::Error) -> Self {
        SlowbinError::Network {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl SlowbinError {
    /// Machine-readable reason code included in error responses.
    pub fn reason_code(&self) -> &'static str {
        match self {
            SlowbinError::BadUrl => "bad_url",
            SlowbinError::SchemeNotSpecified => "scheme_not_specified",
            SlowbinError::BadHostname => "bad_hostname",
            SlowbinError::LocalUrl => "local_url",
            SlowbinError::OriginStatus { .. } => "origin_status",
            SlowbinError::ContentHeaderMissing => "content_header_missing",
            SlowbinError::ContentHeaderNotInteger => "content_header_not_integer",
            SlowbinError::ContentTooLarge { .. } => "content_too_large",
            SlowbinError::Network { .. } => "network_error",
            SlowbinError::Store { .. } => "store_error",
            SlowbinError::Io { .. } => "io_error",
            SlowbinError::Config { .. } => "config_error",
        }
    }

    /// HTTP status code for this error.
    ///
    /// Origin failures propagate the origin's own status. A status outside the
    /// valid HTTP range is reported as 502.
    pub fn status_code(&self) -> u16 {
        match self {
            SlowbinError::BadUrl
            | SlowbinError::SchemeNotSpecified
            | SlowbinError::BadHostname
            | SlowbinError::LocalUrl
            | SlowbinError::ContentHeaderMissing
            | SlowbinError::ContentHeaderNotInteger
            | SlowbinError::ContentTooLarge { .. } => 400,

            SlowbinError::OriginStatus { status } if (100..=999).contains(status) => *status,
            SlowbinError::OriginStatus { .. } | SlowbinError::Network { .. } => 502,

            _ => 500,
        }
    }

    /// Whether the failure was caused by the request rather than the service.
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }
}

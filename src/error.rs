//! Error types for the Mailbucket client.

use reqwest::StatusCode;
use thiserror::Error;

/// Errors that can occur during Mailbucket operations.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed before a response was received.
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend answered with a non-success status.
    ///
    /// `detail` holds the server-supplied `detail` field when the body was JSON.
    #[error("backend returned HTTP {}{}", .status.as_u16(), detail_suffix(.detail))]
    Api {
        status: StatusCode,
        detail: Option<String>,
    },

    /// JSON parsing error.
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// The configured base URL cannot carry path segments.
    #[error("invalid base URL: {0}")]
    BaseUrl(String),

    /// Reading or writing the persisted address failed.
    #[error("address store I/O error: {0}")]
    Storage(#[from] std::io::Error),

    /// The persisted address record exists but cannot be decoded.
    #[error("persisted address is malformed: {0}")]
    CorruptState(#[source] serde_json::Error),

    /// The configuration file cannot be parsed.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An operation needed an active address and there was none.
    #[error("no active address")]
    NoAddress,

    /// The backend created the address, but another address was made active
    /// while the request was in flight.
    #[error("address {0} was superseded before it became active")]
    Superseded(String),
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail.as_deref().map(|d| format!(": {d}")).unwrap_or_default()
}

impl Error {
    /// HTTP status of an [`Error::Api`] failure.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Api { status, .. } => Some(*status),
            Error::Request(err) => err.status(),
            _ => None,
        }
    }

    /// Server-supplied detail string, if one was parsed.
    pub fn detail(&self) -> Option<&str> {
        match self {
            Error::Api { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }

    /// The address behind the token has expired on the backend.
    ///
    /// The backend reports this as a 404 whose detail mentions expiry
    /// (`"Address has expired"`).
    pub fn is_expired(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
            && self
                .detail()
                .is_some_and(|d| d.to_ascii_lowercase().contains("expired"))
    }

    /// The requested username is already taken.
    pub fn is_conflict(&self) -> bool {
        self.status() == Some(StatusCode::CONFLICT)
    }
}

//! Error types for the Gradewatch client.
//!
//! This module defines the error hierarchy for configuration loading and for
//! the HTTP calls made against the feedback backend. The poller and the retry
//! controller never hand these errors to their consumers directly; they turn
//! them into the human-readable messages stored in a [`JobSnapshot`].
//!
//! [`JobSnapshot`]: crate::JobSnapshot

use std::path::PathBuf;

/// A specialized `Result` type for Gradewatch operations.
pub type Result<T> = std::result::Result<T, GradewatchError>;

/// Message shown to users whenever a request could not reach the backend.
pub const NETWORK_ERROR_MESSAGE: &str = "Network error. Please check your internet connection.";

/// Errors that can occur while talking to the feedback backend.
#[derive(Debug, thiserror::Error)]
pub enum GradewatchError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your gradewatch.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // Request Errors
    // ========================================================================
    /// An operation was attempted without an answer id.
    #[error("Answer id must not be empty")]
    EmptyAnswerId,

    /// The backend answered with a non-success HTTP status.
    #[error("HTTP {status} {reason}{}", detail_suffix(.detail))]
    HttpStatus {
        /// Numeric HTTP status code.
        status: u16,
        /// Canonical reason phrase for the status code.
        reason: String,
        /// Free-text `detail` from the error body, if any.
        detail: Option<String>,
        /// Structured error `code` from the error body, if any.
        code: Option<String>,
    },

    /// The request never produced an HTTP response (DNS, refused, reset).
    #[error("Network error: {message}\n\nSuggestion: Check your internet connection and the configured apiUrl")]
    Network {
        /// Description of the transport failure.
        message: String,
    },

    /// The response body could not be decoded.
    #[error("Malformed response from {endpoint}: {message}")]
    Decode {
        /// Which endpoint produced the body.
        endpoint: String,
        /// Description of the decoding failure.
        message: String,
    },

    // ========================================================================
    // General Errors
    // ========================================================================
    /// General I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail.as_deref().map(|d| format!(": {d}")).unwrap_or_default()
}

impl From<reqwest::Error> for GradewatchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            let endpoint = err
                .url()
                .map_or_else(|| "<unknown>".to_string(), |u| u.path().to_string());
            return Self::Decode {
                endpoint,
                message: err.to_string(),
            };
        }
        if let Some(status) = err.status() {
            return Self::http_status(status.as_u16(), None, None);
        }
        Self::network(err.to_string())
    }
}

impl GradewatchError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `HttpStatus` error, filling in the canonical reason phrase.
    #[must_use]
    pub fn http_status(status: u16, detail: Option<String>, code: Option<String>) -> Self {
        let reason = reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("Unknown Status")
            .to_string();
        Self::HttpStatus {
            status,
            reason,
            detail,
            code,
        }
    }

    /// Creates a new `Network` error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates a new `Decode` error.
    #[must_use]
    pub fn decode(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Returns the HTTP status code if the backend produced a response.
    #[must_use]
    pub const fn status_code(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns `true` if the request failed before any HTTP response arrived.
    #[must_use]
    pub const fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. })
    }

    /// Returns `true` if this error is transient and the request may be repeated.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Network { .. } => true,
            Self::HttpStatus { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Message stored in a snapshot when a status fetch fails.
    #[must_use]
    pub fn fetch_message(&self) -> String {
        match self {
            Self::Network { .. } => NETWORK_ERROR_MESSAGE.to_string(),
            Self::HttpStatus { reason, .. } => {
                format!("Failed to fetch feedback status: {reason}")
            }
            other => other.to_string(),
        }
    }
}

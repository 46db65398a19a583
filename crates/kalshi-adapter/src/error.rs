//! Error taxonomy for the adapter
//!
//! Nothing here retries: signature failures are fatal, HTTP failures carry
//! the raw response body for diagnostics and leave the retry decision to the
//! caller, and stream failures are delivered to the caller's error handler.

use reqwest::StatusCode;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, KalshiError>;

/// All failure modes surfaced by the adapter.
#[derive(Debug, Error)]
pub enum KalshiError {
    /// The RSA-PSS primitive rejected the signing operation. Not retryable.
    #[error("request signing failed: {0}")]
    Signature(#[from] rsa::signature::Error),

    /// The private key material could not be parsed.
    #[error("failed to load private key: {0}")]
    Key(String),

    /// Reading key material from disk failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Non-success HTTP status. The body is the raw response text.
    #[error("HTTP {status}: {body}")]
    Http { status: StatusCode, body: String },

    /// Transport-level HTTP failure (connect, TLS, body read).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Transport-level WebSocket failure.
    #[error("stream error: {0}")]
    Stream(#[from] tokio_tungstenite::tungstenite::Error),

    /// A frame or response that should be JSON did not decode.
    #[error("malformed message: {0}")]
    Decode(#[from] serde_json::Error),

    /// Malformed configuration or a response missing a required field.
    #[error("{0}")]
    Validation(String),
}

impl KalshiError {
    /// Status code for HTTP failures, `None` otherwise.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            KalshiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_error_display_carries_status_and_body() {
        let err = KalshiError::Http {
            status: StatusCode::NOT_FOUND,
            body: "market not found".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("404"));
        assert!(text.contains("market not found"));
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
    }

    #[test]
    fn test_validation_error_display() {
        let err = KalshiError::Validation("invalid environment: staging".to_string());
        assert_eq!(err.to_string(), "invalid environment: staging");
        assert_eq!(err.status(), None);
    }
}

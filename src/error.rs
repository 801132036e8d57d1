//! Unified error type for the Qernel client.
//!
//! Every failure surfaced to callers is a `QernelError` carrying a human
//! message, the HTTP status and body where one exists, and — for failures
//! that happen mid-stream — the partial [`AlgorithmTranscript`] collected so
//! far, so callers can inspect what was learned before the failure.
//!
//! Malformed individual stream events are deliberately *not* errors: they
//! degrade to raw passthrough lines (see [`crate::events`]). A missing API
//! key is a logged warning, not an error, unless
//! [`QernelConfig::validate`](crate::config::QernelConfig::validate) is
//! called explicitly.

use thiserror::Error;

use crate::models::AlgorithmTranscript;

/// Errors returned by [`QernelClient`](crate::client::QernelClient) calls.
#[derive(Debug, Error)]
pub enum QernelError {
    /// Connection-level failure: DNS, refused/reset connections, or a
    /// transport error on an already-open stream.
    #[error("transport error: {message}")]
    Transport {
        message: String,
        /// Partial transcript when the failure happened mid-stream.
        transcript: Option<Box<AlgorithmTranscript>>,
    },

    /// The retry deadline elapsed before a connection was established.
    #[error("{operation} timed out after {budget_secs}s")]
    Timeout {
        operation: String,
        budget_secs: u64,
        transcript: Option<Box<AlgorithmTranscript>>,
    },

    /// Non-retryable HTTP status from the server.
    #[error("server returned HTTP {status}: {body}")]
    Status {
        status: u16,
        body: String,
        transcript: Option<Box<AlgorithmTranscript>>,
    },

    /// The server reported an `error` event on the stream. Always carries
    /// the partial transcript.
    #[error("stream error: {message}")]
    Stream {
        /// Short machine-readable code from the event, when present.
        code: Option<String>,
        message: String,
        transcript: Box<AlgorithmTranscript>,
    },

    /// The algorithm payload could not be encoded for transport. Raised
    /// before any network activity.
    #[error("failed to encode algorithm payload: {message}")]
    Encode { message: String },

    /// A downloaded artifact blob could not be decompressed or decoded.
    #[error("artifact '{name}' could not be decoded: {message}")]
    Artifact { name: String, message: String },

    /// Configuration problem (currently only a missing API key, and only
    /// when validated explicitly).
    #[error("configuration error: {0}")]
    Config(String),
}

impl QernelError {
    /// The partial transcript attached to this error, if any.
    pub fn transcript(&self) -> Option<&AlgorithmTranscript> {
        match self {
            QernelError::Transport { transcript, .. }
            | QernelError::Timeout { transcript, .. }
            | QernelError::Status { transcript, .. } => transcript.as_deref(),
            QernelError::Stream { transcript, .. } => Some(transcript),
            _ => None,
        }
    }

    /// HTTP status associated with this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            QernelError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether retrying the whole call might succeed. Transport and timeout
    /// failures are transient by nature; everything else is not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            QernelError::Transport { .. } | QernelError::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AlgorithmTranscript;

    #[test]
    fn test_transcript_accessor() {
        let err = QernelError::Stream {
            code: Some("boom".to_string()),
            message: "it broke".to_string(),
            transcript: Box::new(AlgorithmTranscript::new()),
        };
        assert!(err.transcript().is_some());

        let err = QernelError::Encode {
            message: "bad".to_string(),
        };
        assert!(err.transcript().is_none());
    }

    #[test]
    fn test_status_accessor() {
        let err = QernelError::Status {
            status: 403,
            body: "forbidden".to_string(),
            transcript: None,
        };
        assert_eq!(err.status(), Some(403));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retryable_classification() {
        let transport = QernelError::Transport {
            message: "connection reset".to_string(),
            transcript: None,
        };
        assert!(transport.is_retryable());

        let timeout = QernelError::Timeout {
            operation: "stream connect".to_string(),
            budget_secs: 120,
            transcript: None,
        };
        assert!(timeout.is_retryable());

        let encode = QernelError::Encode {
            message: "oops".to_string(),
        };
        assert!(!encode.is_retryable());
    }

    #[test]
    fn test_display() {
        let err = QernelError::Status {
            status: 418,
            body: "teapot".to_string(),
            transcript: None,
        };
        let text = err.to_string();
        assert!(text.contains("418"));
        assert!(text.contains("teapot"));
    }
}

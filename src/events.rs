//! Streaming event model and SSE line decoding.
//!
//! The server pushes `data: <json>` lines over a `text/event-stream`
//! response. Each JSON object is one [`StreamEvent`], a tagged union on its
//! `type` field. Decoding is deliberately tolerant: a line without the
//! `data:` prefix is passed through as opaque text (proxy keep-alives,
//! comments), and a `data:` line whose JSON fails to parse or validate
//! degrades to raw passthrough — a malformed event must never kill an
//! otherwise-healthy stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::AlgorithmResponse;

/// One message from the server's event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Stream opened; the run has been accepted.
    Start {
        message: Option<String>,
        stage: Option<String>,
        timestamp: Option<DateTime<Utc>>,
    },
    /// Progress update for a named pipeline step. `stage` follows the
    /// `<name>:<suffix>` convention with suffixes `start`, `ok`, `err`.
    Status {
        message: Option<String>,
        stage: Option<String>,
        /// Opaque per-step result (e.g. the value returned by `get_name`).
        result: Option<Value>,
        /// Opaque structured payload (e.g. a circuit rendering, or the
        /// aggregate metrics attached to `pipeline:done`).
        summary: Option<Value>,
        /// Runtime type name of a produced object.
        obj_type: Option<String>,
        timestamp: Option<DateTime<Utc>>,
    },
    /// Server-reported failure. Always fatal to the current run.
    Error {
        /// Short machine-readable code.
        error: Option<String>,
        message: Option<String>,
        stage: Option<String>,
        timestamp: Option<DateTime<Utc>>,
    },
    /// The aggregated response for the run. At most one per stream.
    Result {
        response: AlgorithmResponse,
        message: Option<String>,
        timestamp: Option<DateTime<Utc>>,
    },
    /// Successful stream termination. No payload.
    Done {
        message: Option<String>,
        timestamp: Option<DateTime<Utc>>,
    },
}

impl StreamEvent {
    /// The wire name of this event's type.
    pub fn event_type_name(&self) -> &'static str {
        match self {
            StreamEvent::Start { .. } => "start",
            StreamEvent::Status { .. } => "status",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Result { .. } => "result",
            StreamEvent::Done { .. } => "done",
        }
    }

    /// Whether this event terminates the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done { .. } | StreamEvent::Error { .. })
    }
}

/// Severity derived from a stage identifier's suffix. This suffix is the
/// sole signal used to colorize and route status lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageSeverity {
    Info,
    Success,
    Error,
}

impl StageSeverity {
    /// Classify a stage string by its `:suffix`. `:ok` is success;
    /// `:err` and its longer spellings are errors; anything else is info.
    pub fn of(stage: &str) -> Self {
        let lower = stage.trim().to_ascii_lowercase();
        if lower.ends_with(":ok") {
            StageSeverity::Success
        } else if lower.ends_with(":err")
            || lower.ends_with(":error")
            || lower.ends_with(":fail")
            || lower.ends_with(":failed")
        {
            StageSeverity::Error
        } else {
            StageSeverity::Info
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StageSeverity::Info => "info",
            StageSeverity::Success => "success",
            StageSeverity::Error => "error",
        }
    }
}

/// A raw line from the SSE body, classified.
#[derive(Debug, Clone, PartialEq)]
pub enum SseLine {
    /// `data: <payload>` — candidate event JSON.
    Data(String),
    /// Anything else non-empty: comments, keep-alives, proxy noise.
    Passthrough(String),
    /// Blank separator line.
    Empty,
}

/// Classify one line of the SSE body.
pub fn parse_sse_line(line: &str) -> SseLine {
    if line.trim().is_empty() {
        return SseLine::Empty;
    }
    if let Some(rest) = line.strip_prefix("data:") {
        return SseLine::Data(rest.trim().to_string());
    }
    SseLine::Passthrough(line.to_string())
}

/// Outcome of decoding one line into the event model.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedLine {
    /// A schema-valid event.
    Event(Box<StreamEvent>),
    /// Opaque text to print, never folded into the transcript.
    Raw(String),
    /// Nothing to do (blank line).
    Skip,
}

/// Decode a line tolerantly. JSON or schema failures degrade to
/// [`DecodedLine::Raw`]; this function never errors.
pub fn decode_line(line: &str) -> DecodedLine {
    match parse_sse_line(line) {
        SseLine::Empty => DecodedLine::Skip,
        SseLine::Passthrough(text) => DecodedLine::Raw(text),
        SseLine::Data(payload) => match serde_json::from_str::<StreamEvent>(&payload) {
            Ok(event) => DecodedLine::Event(Box::new(event)),
            Err(err) => {
                tracing::debug!(error = %err, "unparseable data line, passing through");
                DecodedLine::Raw(payload)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sse_line_variants() {
        assert_eq!(parse_sse_line(""), SseLine::Empty);
        assert_eq!(parse_sse_line("   "), SseLine::Empty);
        assert_eq!(
            parse_sse_line(r#"data: {"type":"done"}"#),
            SseLine::Data(r#"{"type":"done"}"#.to_string())
        );
        assert_eq!(
            parse_sse_line(": keep-alive"),
            SseLine::Passthrough(": keep-alive".to_string())
        );
        assert_eq!(
            parse_sse_line("retry: 5000"),
            SseLine::Passthrough("retry: 5000".to_string())
        );
    }

    #[test]
    fn test_decode_done_event() {
        let decoded = decode_line(r#"data: {"type": "done"}"#);
        match decoded {
            DecodedLine::Event(event) => {
                assert_eq!(event.event_type_name(), "done");
                assert!(event.is_terminal());
            }
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_status_event_fields() {
        let decoded = decode_line(
            r#"data: {"type":"status","stage":"get_name:ok","result":"Bell","message":"named"}"#,
        );
        match decoded {
            DecodedLine::Event(event) => match *event {
                StreamEvent::Status { stage, result, .. } => {
                    assert_eq!(stage.as_deref(), Some("get_name:ok"));
                    assert_eq!(result, Some(serde_json::json!("Bell")));
                }
                other => panic!("expected status, got {:?}", other),
            },
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_invalid_json_degrades_to_raw() {
        let decoded = decode_line("data: {not json");
        assert_eq!(decoded, DecodedLine::Raw("{not json".to_string()));
    }

    #[test]
    fn test_decode_unknown_type_degrades_to_raw() {
        // Schema-invalid but well-formed JSON: unknown tag value.
        let decoded = decode_line(r#"data: {"type": "telemetry", "cpu": 0.4}"#);
        assert!(matches!(decoded, DecodedLine::Raw(_)));
    }

    #[test]
    fn test_decode_result_requires_response() {
        // A result event without a response payload is schema-invalid and
        // must degrade rather than error.
        let decoded = decode_line(r#"data: {"type": "result"}"#);
        assert!(matches!(decoded, DecodedLine::Raw(_)));
    }

    #[test]
    fn test_stage_severity_suffixes() {
        assert_eq!(StageSeverity::of("build_circuit:ok"), StageSeverity::Success);
        assert_eq!(StageSeverity::of("build_circuit:err"), StageSeverity::Error);
        assert_eq!(StageSeverity::of("validate:error"), StageSeverity::Error);
        assert_eq!(StageSeverity::of("validate:failed"), StageSeverity::Error);
        assert_eq!(StageSeverity::of("pipeline:start"), StageSeverity::Info);
        assert_eq!(StageSeverity::of("pipeline:done"), StageSeverity::Info);
        assert_eq!(StageSeverity::of(""), StageSeverity::Info);
    }

    #[test]
    fn test_event_serialization_roundtrip() {
        let event = StreamEvent::Status {
            message: Some("working".to_string()),
            stage: Some("pipeline:start".to_string()),
            result: None,
            summary: None,
            obj_type: None,
            timestamp: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: StreamEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }
}

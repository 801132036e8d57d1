//! Aggregated data model for one streaming run.
//!
//! [`AlgorithmTranscript`] is the client-side record of everything a stream
//! produced: the ordered raw event log (append-only, for replay and
//! debugging), the latest [`AlgorithmResponse`], and the incrementally
//! populated [`MethodsPayload`]. It is owned and mutated exclusively by the
//! orchestrator during a call and returned to the caller as a snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::events::StreamEvent;

/// Aggregated outcomes of the four callback methods the server invokes on
/// the user's algorithm. Fields fill in as matching `:ok` status events
/// arrive and are never cleared once set (last write wins per field).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MethodsPayload {
    // Docstrings
    pub get_name_doc: String,
    pub get_type_doc: String,
    pub build_circuit_doc: String,
    pub validate_params_doc: String,

    // Results
    pub get_name_result: Option<String>,
    pub get_type_result: Option<String>,
    /// Textual rendering of the produced circuit.
    pub build_circuit_summary: Option<String>,
    /// Runtime type name of the produced circuit object.
    pub build_circuit_type: Option<String>,

    // Errors
    pub get_name_error: Option<String>,
    pub get_type_error: Option<String>,
    pub build_circuit_error: Option<String>,
    pub validate_params_error: Option<String>,
}

/// The server's aggregated response, delivered in the single `result` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmResponse {
    #[serde(rename = "class")]
    pub class_name: String,
    #[serde(default)]
    pub class_doc: String,
    #[serde(default)]
    pub methods: MethodsPayload,
    /// Free-form analysis payload as provided by the server. Kept as an
    /// open map for forward compatibility; well-known entries are
    /// `pipeline` (ordered step records) and `summary` (aggregate metrics).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<Map<String, Value>>,
}

/// Why a transcript stopped collecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Done,
    Error,
    /// The consumer unwound before a terminal event (transport failure,
    /// premature EOF, caller cancellation).
    ClientAbort,
}

/// Aggregated transcript for one streaming run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgorithmTranscript {
    /// Every schema-valid event received, in arrival order.
    pub events: Vec<StreamEvent>,
    pub response: Option<AlgorithmResponse>,
    pub methods: MethodsPayload,
    pub class_name: Option<String>,
    pub class_doc: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub ended_reason: Option<EndReason>,
}

impl Default for AlgorithmTranscript {
    fn default() -> Self {
        Self::new()
    }
}

impl AlgorithmTranscript {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            response: None,
            methods: MethodsPayload::default(),
            class_name: None,
            class_doc: None,
            started_at: Utc::now(),
            ended_at: None,
            ended_reason: None,
        }
    }

    /// Append an event to the log. A `result` event also syncs the
    /// top-level response, methods and class fields.
    pub fn record(&mut self, event: StreamEvent) {
        if let StreamEvent::Result { response, .. } = &event {
            self.response = Some(response.clone());
            self.methods = response.methods.clone();
            self.class_name = Some(response.class_name.clone());
            self.class_doc = Some(response.class_doc.clone());
        }
        self.events.push(event);
    }

    /// Set the terminal state. Only the first call takes effect; the end
    /// timestamp and reason are never overwritten.
    pub fn mark_ended(&mut self, reason: EndReason) {
        if self.ended_at.is_none() {
            self.ended_at = Some(Utc::now());
            self.ended_reason = Some(reason);
        }
    }

    /// Whether a terminal condition has been reached.
    pub fn is_ended(&self) -> bool {
        self.ended_at.is_some()
    }

    /// JSON-serializable snapshot of the whole transcript.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

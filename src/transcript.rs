//! Transcript aggregator: folds the event stream into an
//! [`AlgorithmTranscript`] and fans presentation out to the attached sinks.
//!
//! The aggregator is a small state machine: it collects until the first
//! terminal event, then refuses further transitions. An `error` event fails
//! the run immediately — the partial transcript travels with the failure.
//! A `pipeline:done` status may arrive before the `result` event carrying
//! aggregate metrics; its summary is stashed and merged into the result's
//! `analysis.summary` when the result lands, with the result's own keys
//! winning on conflict.
//!
//! Sink dispatch is best-effort by construction: sinks are infallible from
//! the caller's side, so presentation can never abort data collection.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Map, Value};

use crate::events::{StageSeverity, StreamEvent};
use crate::models::{AlgorithmTranscript, EndReason};
use crate::sinks::{TerminalSink, VisualSink};
use crate::tasks::summarize_tasks;

/// Outcome of folding one event.
#[derive(Debug, Clone, PartialEq)]
pub enum Folded {
    /// Keep consuming the stream.
    Continue,
    /// `done` received; the stream ended successfully.
    Done,
    /// `error` received; the run failed server-side.
    Failed {
        code: Option<String>,
        message: String,
    },
}

/// Folds stream events into a transcript and drives the attached sinks.
pub struct TranscriptAggregator {
    transcript: AlgorithmTranscript,
    /// `pipeline:done` summary awaiting the `result` event. Repeated stash
    /// events extend this map, last write per key.
    pending_summary: Option<Map<String, Value>>,
    terminal: Option<Arc<dyn TerminalSink>>,
    visual: Option<Arc<dyn VisualSink>>,
}

impl Default for TranscriptAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscriptAggregator {
    pub fn new() -> Self {
        Self {
            transcript: AlgorithmTranscript::new(),
            pending_summary: None,
            terminal: None,
            visual: None,
        }
    }

    pub fn with_terminal(mut self, terminal: Arc<dyn TerminalSink>) -> Self {
        self.terminal = Some(terminal);
        self
    }

    pub fn with_visual(mut self, visual: Arc<dyn VisualSink>) -> Self {
        self.visual = Some(visual);
        self
    }

    pub fn transcript(&self) -> &AlgorithmTranscript {
        &self.transcript
    }

    pub fn into_transcript(self) -> AlgorithmTranscript {
        self.transcript
    }

    /// Number of schema-valid events folded so far. Raw passthrough lines
    /// are never counted.
    pub fn event_count(&self) -> usize {
        self.transcript.events.len()
    }

    /// Print an opaque passthrough line. Not recorded in the transcript.
    pub fn handle_raw(&self, line: &str) {
        if let Some(terminal) = &self.terminal {
            terminal.print_raw(line);
        }
    }

    /// End the transcript on behalf of the consumer (EOF without a terminal
    /// event, transport failure, cancellation).
    pub fn abort(&mut self) {
        self.transcript.mark_ended(EndReason::ClientAbort);
    }

    /// Fold one event. After a terminal event every further call is a
    /// recorded-but-ignored no-op returning `Continue`.
    pub fn fold(&mut self, event: StreamEvent) -> Folded {
        if self.transcript.is_ended() {
            tracing::debug!(
                event_type = event.event_type_name(),
                "event after terminal state, ignoring"
            );
            return Folded::Continue;
        }

        match event {
            StreamEvent::Start {
                message,
                stage,
                timestamp,
            } => {
                let text = message.clone().unwrap_or_else(|| "stream started".to_string());
                self.emit_status(stage.as_deref().unwrap_or(""), &text, StageSeverity::Info);
                self.transcript.record(StreamEvent::Start {
                    message,
                    stage,
                    timestamp,
                });
                Folded::Continue
            }

            StreamEvent::Status {
                message,
                stage,
                result,
                summary,
                obj_type,
                timestamp,
            } => {
                let stage_str = stage.clone().unwrap_or_default();
                self.apply_status(
                    &stage_str,
                    message.as_deref(),
                    result.as_ref(),
                    summary.as_ref(),
                    obj_type.as_deref(),
                );
                let severity = StageSeverity::of(&stage_str);
                self.emit_status(&stage_str, message.as_deref().unwrap_or(""), severity);
                self.transcript.record(StreamEvent::Status {
                    message,
                    stage,
                    result,
                    summary,
                    obj_type,
                    timestamp,
                });
                Folded::Continue
            }

            StreamEvent::Result {
                mut response,
                message,
                timestamp,
            } => {
                self.merge_pending_summary(response.analysis.as_mut());
                if let Some(analysis) = response.analysis.as_mut() {
                    decode_circuit_artifact(analysis);
                }

                let entries = {
                    let doc = &response.methods.build_circuit_doc;
                    let doc = (!doc.is_empty()).then_some(doc.as_str());
                    summarize_tasks(doc, response.analysis.as_ref())
                };

                if let Some(terminal) = &self.terminal {
                    terminal.print_result_summary(
                        Some(&response.class_name),
                        Some(&response.class_doc),
                        &response.methods,
                    );
                    terminal.print_task_summary(&entries);
                }
                if let Some(visual) = &self.visual {
                    visual.update_with_results(json!({
                        "response": response,
                        "tasks": entries,
                    }));
                }

                self.transcript.record(StreamEvent::Result {
                    response,
                    message,
                    timestamp,
                });
                Folded::Continue
            }

            StreamEvent::Error {
                error,
                message,
                stage,
                timestamp,
            } => {
                let text = message
                    .clone()
                    .or_else(|| error.clone())
                    .unwrap_or_else(|| "server reported an error".to_string());
                self.emit_status(
                    stage.as_deref().unwrap_or(""),
                    &text,
                    StageSeverity::Error,
                );
                let code = error.clone();
                self.transcript.record(StreamEvent::Error {
                    error,
                    message,
                    stage,
                    timestamp,
                });
                self.transcript.mark_ended(EndReason::Error);
                if let Some(terminal) = &self.terminal {
                    terminal.finish();
                }
                Folded::Failed {
                    code,
                    message: text,
                }
            }

            StreamEvent::Done { message, timestamp } => {
                self.transcript.record(StreamEvent::Done { message, timestamp });
                self.transcript.mark_ended(EndReason::Done);
                if let Some(terminal) = &self.terminal {
                    terminal.finish();
                }
                Folded::Done
            }
        }
    }

    fn emit_status(&self, stage: &str, message: &str, level: StageSeverity) {
        if let Some(terminal) = &self.terminal {
            terminal.print_status(stage, message, level);
        }
        if let Some(visual) = &self.visual {
            let text = if stage.is_empty() {
                message.to_string()
            } else if message.is_empty() {
                stage.to_string()
            } else {
                format!("{} {}", stage, message)
            };
            visual.update_status(&text, level);
        }
    }

    /// Route one status event's payload: method-callback stages update the
    /// incremental methods payload, `pipeline:done` stashes its summary.
    fn apply_status(
        &mut self,
        stage: &str,
        message: Option<&str>,
        result: Option<&Value>,
        summary: Option<&Value>,
        obj_type: Option<&str>,
    ) {
        let Some((name, suffix)) = stage.split_once(':') else {
            return;
        };
        let suffix = suffix.to_ascii_lowercase();

        if name == "pipeline" && suffix == "done" {
            if let Some(Value::Object(map)) = summary {
                let stash = self.pending_summary.get_or_insert_with(Map::new);
                for (key, value) in map {
                    stash.insert(key.clone(), value.clone());
                }
            }
            return;
        }

        let methods = &mut self.transcript.methods;
        let failed = matches!(suffix.as_str(), "err" | "error" | "fail" | "failed");
        match (name, suffix.as_str()) {
            ("get_name", "ok") => methods.get_name_result = result.map(value_as_text),
            ("get_type", "ok") => methods.get_type_result = result.map(value_as_text),
            ("build_circuit", "ok") => {
                methods.build_circuit_summary = summary.map(value_as_text);
                if obj_type.is_some() {
                    methods.build_circuit_type = obj_type.map(str::to_string);
                }
            }
            ("get_name", _) if failed => {
                methods.get_name_error = status_error_text(message, result)
            }
            ("get_type", _) if failed => {
                methods.get_type_error = status_error_text(message, result)
            }
            ("build_circuit", _) if failed => {
                methods.build_circuit_error = status_error_text(message, result)
            }
            ("validate_params", _) if failed => {
                methods.validate_params_error = status_error_text(message, result)
            }
            _ => {}
        }
    }

    /// Merge the stashed `pipeline:done` summary into `analysis.summary`.
    /// Keys already present in the result's summary win.
    fn merge_pending_summary(&mut self, analysis: Option<&mut Map<String, Value>>) {
        let Some(stash) = self.pending_summary.take() else {
            return;
        };
        match analysis {
            Some(analysis) => {
                let mut merged = stash;
                if let Some(Value::Object(existing)) = analysis.get("summary") {
                    for (key, value) in existing {
                        merged.insert(key.clone(), value.clone());
                    }
                }
                analysis.insert("summary".to_string(), Value::Object(merged));
            }
            None => {
                // No analysis map to merge into; the stash is dropped rather
                // than fabricating one the server never sent.
                tracing::debug!("pipeline summary stashed but result carries no analysis");
            }
        }
    }
}

fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn status_error_text(message: Option<&str>, result: Option<&Value>) -> Option<String> {
    message
        .map(str::to_string)
        .or_else(|| result.map(value_as_text))
        .or_else(|| Some("unknown error".to_string()))
}

/// Decode `analysis.artifacts.circuit_json_b64` (base64 of circuit JSON)
/// into `analysis.circuit_json`. Tolerant: any decode failure leaves the
/// analysis untouched.
fn decode_circuit_artifact(analysis: &mut Map<String, Value>) {
    let encoded = analysis
        .get("artifacts")
        .and_then(Value::as_object)
        .and_then(|a| a.get("circuit_json_b64"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let Some(encoded) = encoded else {
        return;
    };
    let bytes = match BASE64.decode(encoded.as_bytes()) {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::debug!(error = %err, "circuit artifact is not valid base64");
            return;
        }
    };
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(circuit) => {
            analysis.insert("circuit_json".to_string(), circuit);
        }
        Err(err) => {
            tracing::debug!(error = %err, "circuit artifact is not valid JSON");
        }
    }
}

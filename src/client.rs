//! High-level client: streaming orchestration plus artifact loading.
//!
//! [`QernelClient`] owns one `reqwest::Client` and the terminal printer.
//! `run_stream` submits an algorithm, consumes the SSE response line by
//! line through the transcript aggregator, and returns the complete
//! transcript — or a structured error carrying the partial one. The caller
//! either gets a transcript whose `ended_reason` is `done`, or an error;
//! never a silently-incomplete success.

use std::io::Read;
use std::sync::Arc;

use flate2::read::GzDecoder;
use futures_util::StreamExt;
use reqwest::Method;
use serde_json::{json, Value};

use crate::config::{QernelConfig, API_KEY_ENV};
use crate::error::QernelError;
use crate::events::{decode_line, DecodedLine, StageSeverity};
use crate::models::AlgorithmTranscript;
use crate::payload::AlgorithmSource;
use crate::retry::{send_with_retry, RetryContext, RetryPolicy, WarmupGuard};
use crate::sinks::{NullIndicator, TerminalSink, VisualSink};
use crate::terminal::TerminalPrinter;
use crate::transcript::{Folded, TranscriptAggregator};

/// Artifact names produced by a standard estimation run.
pub const DEFAULT_ARTIFACTS: &[&str] = &["trial_result", "simulator_state"];

/// How one consumed stream ended.
enum StreamOutcome {
    Done,
    Failed { code: Option<String>, message: String },
    Transport(String),
    Eof,
}

/// Client for the Qernel remote estimation service.
pub struct QernelClient {
    config: QernelConfig,
    http: reqwest::Client,
    printer: Arc<TerminalPrinter>,
}

impl Default for QernelClient {
    fn default() -> Self {
        Self::new(QernelConfig::default())
    }
}

impl QernelClient {
    pub fn new(config: QernelConfig) -> Self {
        if config.api_key.is_none() {
            tracing::warn!(
                "no API key configured ({} unset); requests will go out unauthenticated",
                API_KEY_ENV
            );
        }
        tracing::debug!(
            api_url = %config.api_url,
            api_key = %config.masked_api_key(),
            "client configured"
        );
        Self {
            config,
            http: reqwest::Client::new(),
            printer: Arc::new(TerminalPrinter::new()),
        }
    }

    /// Replace the terminal printer (e.g. [`TerminalPrinter::plain`] for
    /// logs-only environments).
    pub fn with_printer(mut self, printer: TerminalPrinter) -> Self {
        self.printer = Arc::new(printer);
        self
    }

    pub fn config(&self) -> &QernelConfig {
        &self.config
    }

    fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        let mut request = self.http.request(method, url);
        for (name, value) in self.config.headers() {
            request = request.header(name, value);
        }
        request
    }

    /// Probe connectivity: GET the base URL, any 200 succeeds. Returns the
    /// response body. Retries cold-start statuses within the plain timeout.
    pub async fn test_connection(&self) -> Result<String, QernelError> {
        let url = format!("{}/", self.config.api_url);
        let mut ctx = RetryContext::new(RetryPolicy::download(), self.config.timeout);
        let mut warmup = WarmupGuard::start(self.printer.as_ref(), "qernel: connecting");
        let response = send_with_retry(
            || self.request(Method::GET, &url),
            &mut ctx,
            &mut warmup,
            "connectivity probe",
        )
        .await?;
        response.text().await.map_err(|e| QernelError::Transport {
            message: e.to_string(),
            transcript: None,
        })
    }

    /// Submit an algorithm and stream the run to completion, rendering to
    /// the terminal only.
    pub async fn run_stream(
        &self,
        algorithm: &AlgorithmSource,
        params: Option<Value>,
    ) -> Result<AlgorithmTranscript, QernelError> {
        self.run_stream_with_handler(algorithm, params, None).await
    }

    /// Submit an algorithm and stream the run to completion, additionally
    /// forwarding status and results to `visual` when given.
    ///
    /// Cold-start retries re-POST the payload, so a run interrupted after
    /// partial server-side processing may be re-submitted; at-most-once
    /// submission is not supported by the protocol.
    pub async fn run_stream_with_handler(
        &self,
        algorithm: &AlgorithmSource,
        params: Option<Value>,
        visual: Option<Arc<dyn VisualSink>>,
    ) -> Result<AlgorithmTranscript, QernelError> {
        // Encoding failures surface before any network activity.
        let encoded = algorithm.encode()?;
        let mut body = json!({ "algorithm_pickle": encoded });
        if let Some(params) = params {
            body["params"] = params;
        }

        let mut aggregator = TranscriptAggregator::new()
            .with_terminal(self.printer.clone() as Arc<dyn TerminalSink>);
        if let Some(visual) = visual.clone() {
            aggregator = aggregator.with_visual(visual);
        }

        let url = format!("{}/stream", self.config.api_url);
        let mut ctx = RetryContext::new(RetryPolicy::streaming(), self.config.stream_timeout);
        let mut warmup = WarmupGuard::start(self.printer.as_ref(), "qernel: server warm-up");

        tracing::debug!(url = %url, class = %algorithm.class_name, "opening event stream");
        let response = send_with_retry(
            || {
                self.request(Method::POST, &url)
                    .header("Accept", "text/event-stream")
                    .json(&body)
            },
            &mut ctx,
            &mut warmup,
            "stream connect",
        )
        .await
        .map_err(|err| {
            self.print_final_failure(&err.to_string(), &visual);
            err
        })?;
        drop(warmup);

        let outcome = self.consume_stream(response, &mut aggregator).await;
        self.finish_stream(outcome, aggregator, &visual)
    }

    /// Drain the SSE body line by line into the aggregator until a terminal
    /// event, transport failure, or EOF.
    async fn consume_stream(
        &self,
        response: reqwest::Response,
        aggregator: &mut TranscriptAggregator,
    ) -> StreamOutcome {
        let mut stream = response.bytes_stream();
        let mut buffer = String::new();

        loop {
            // Drain complete lines before pulling more bytes.
            if let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].trim_end_matches('\r').to_string();
                buffer.drain(..=newline);
                if let Some(outcome) = Self::handle_line(aggregator, &line) {
                    return outcome;
                }
                continue;
            }

            match stream.next().await {
                Some(Ok(chunk)) => buffer.push_str(&String::from_utf8_lossy(&chunk)),
                Some(Err(err)) => return StreamOutcome::Transport(err.to_string()),
                None => {
                    let line = buffer.trim_end_matches('\r').to_string();
                    buffer.clear();
                    if !line.is_empty() {
                        if let Some(outcome) = Self::handle_line(aggregator, &line) {
                            return outcome;
                        }
                    }
                    return StreamOutcome::Eof;
                }
            }
        }
    }

    fn handle_line(aggregator: &mut TranscriptAggregator, line: &str) -> Option<StreamOutcome> {
        match decode_line(line) {
            DecodedLine::Skip => None,
            DecodedLine::Raw(text) => {
                aggregator.handle_raw(&text);
                None
            }
            DecodedLine::Event(event) => match aggregator.fold(*event) {
                Folded::Continue => None,
                Folded::Done => Some(StreamOutcome::Done),
                Folded::Failed { code, message } => {
                    Some(StreamOutcome::Failed { code, message })
                }
            },
        }
    }

    fn finish_stream(
        &self,
        outcome: StreamOutcome,
        mut aggregator: TranscriptAggregator,
        visual: &Option<Arc<dyn VisualSink>>,
    ) -> Result<AlgorithmTranscript, QernelError> {
        match outcome {
            StreamOutcome::Done => {
                self.printer.print_status(
                    "",
                    &format!("stream complete ({} events)", aggregator.event_count()),
                    StageSeverity::Success,
                );
                self.printer.finish();
                Ok(aggregator.into_transcript())
            }
            StreamOutcome::Failed { code, message } => {
                // The aggregator already marked the transcript ended and
                // notified the sinks when it folded the error event.
                self.print_final_failure(&message, visual);
                Err(QernelError::Stream {
                    code,
                    message,
                    transcript: Box::new(aggregator.into_transcript()),
                })
            }
            StreamOutcome::Transport(message) => {
                aggregator.abort();
                self.print_final_failure(&message, visual);
                Err(QernelError::Transport {
                    message,
                    transcript: Some(Box::new(aggregator.into_transcript())),
                })
            }
            StreamOutcome::Eof => {
                aggregator.abort();
                let message = "stream ended without a terminal event".to_string();
                self.print_final_failure(&message, visual);
                Err(QernelError::Transport {
                    message,
                    transcript: Some(Box::new(aggregator.into_transcript())),
                })
            }
        }
    }

    fn print_final_failure(&self, message: &str, visual: &Option<Arc<dyn VisualSink>>) {
        self.printer
            .print_status("", &format!("stream failed: {}", message), StageSeverity::Error);
        self.printer.finish();
        if let Some(visual) = visual {
            visual.update_status(message, StageSeverity::Error);
        }
    }

    /// List artifact names available for a finished job. Accepts either a
    /// bare array or `{"artifacts": [...]}` from the server.
    pub async fn list_artifacts(&self, job_id: &str) -> Result<Vec<String>, QernelError> {
        let url = format!("{}/artifacts/jobs/{}/artifacts", self.config.api_url, job_id);
        let mut ctx = RetryContext::new(RetryPolicy::download(), self.config.timeout);
        let indicator = NullIndicator;
        let mut warmup = WarmupGuard::start(&indicator, "");
        let response = send_with_retry(
            || self.request(Method::GET, &url),
            &mut ctx,
            &mut warmup,
            "artifact list",
        )
        .await?;

        let value: Value = response.json().await.map_err(|e| QernelError::Transport {
            message: e.to_string(),
            transcript: None,
        })?;
        let names = match &value {
            Value::Array(items) => items,
            Value::Object(map) => match map.get("artifacts").and_then(Value::as_array) {
                Some(items) => items,
                None => {
                    return Err(QernelError::Artifact {
                        name: "(list)".to_string(),
                        message: "unexpected artifact list shape".to_string(),
                    })
                }
            },
            _ => {
                return Err(QernelError::Artifact {
                    name: "(list)".to_string(),
                    message: "unexpected artifact list shape".to_string(),
                })
            }
        };
        Ok(names
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect())
    }

    /// Download one named artifact blob and decode it: gunzip then JSON.
    /// Downloaded blobs are trusted as data only — they are parsed as JSON,
    /// never executed.
    pub async fn load_artifact(&self, job_id: &str, name: &str) -> Result<Value, QernelError> {
        let mut ctx = RetryContext::new(RetryPolicy::download(), self.config.timeout);
        let mut warmup = WarmupGuard::start(self.printer.as_ref(), "qernel: server warm-up");
        self.fetch_artifact(job_id, name, &mut ctx, &mut warmup).await
    }

    /// Download several artifacts in order, sharing one deadline and one
    /// warm-up indicator across the batch. Later artifacts print plain
    /// progress lines rather than re-showing warm-up. The first failure
    /// aborts the batch.
    pub async fn load_artifacts_sequential(
        &self,
        job_id: &str,
        names: Option<&[&str]>,
    ) -> Result<Vec<(String, Value)>, QernelError> {
        let names = names.unwrap_or(DEFAULT_ARTIFACTS);
        let mut ctx = RetryContext::new(RetryPolicy::download(), self.config.timeout);
        let mut warmup = WarmupGuard::start(self.printer.as_ref(), "qernel: server warm-up");

        let mut loaded = Vec::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            if i > 0 {
                self.printer.print_status(
                    "",
                    &format!("downloading {}", name),
                    StageSeverity::Info,
                );
            }
            let value = self.fetch_artifact(job_id, name, &mut ctx, &mut warmup).await?;
            self.printer
                .print_status("", &format!("{} loaded", name), StageSeverity::Success);
            loaded.push((name.to_string(), value));
        }
        self.printer.finish();
        Ok(loaded)
    }

    async fn fetch_artifact(
        &self,
        job_id: &str,
        name: &str,
        ctx: &mut RetryContext,
        warmup: &mut WarmupGuard<'_>,
    ) -> Result<Value, QernelError> {
        let url = format!(
            "{}/artifacts/jobs/{}/artifacts/download/{}",
            self.config.api_url, job_id, name
        );
        let response = send_with_retry(
            || {
                self.request(Method::GET, &url)
                    .header("Accept", "application/octet-stream")
            },
            ctx,
            warmup,
            "artifact download",
        )
        .await?;
        let bytes = response.bytes().await.map_err(|e| QernelError::Transport {
            message: e.to_string(),
            transcript: None,
        })?;
        decode_artifact(name, &bytes)
    }
}

/// Gunzip then JSON-decode an artifact blob. A blob that is not gzipped is
/// tried as plain JSON before giving up.
fn decode_artifact(name: &str, bytes: &[u8]) -> Result<Value, QernelError> {
    let mut decoder = GzDecoder::new(bytes);
    let mut decompressed = Vec::new();
    let payload: &[u8] = match decoder.read_to_end(&mut decompressed) {
        Ok(_) => &decompressed,
        Err(err) => {
            tracing::debug!(artifact = name, error = %err, "blob is not gzip, trying plain JSON");
            bytes
        }
    };
    serde_json::from_slice(payload).map_err(|e| QernelError::Artifact {
        name: name.to_string(),
        message: e.to_string(),
    })
}

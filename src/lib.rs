//! Qernel client - a streaming client for the Qernel remote quantum
//! resource-estimation service.
//!
//! Submits a user algorithm to the hosted backend, consumes the run as a
//! Server-Sent Events stream, aggregates everything into an
//! [`AlgorithmTranscript`], and renders progress to the terminal (and
//! optionally an HTML report). Also downloads gzip'd result artifacts for
//! finished jobs.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod html;
pub mod models;
pub mod payload;
pub mod retry;
pub mod sinks;
pub mod tasks;
pub mod terminal;
pub mod transcript;

pub use client::{QernelClient, DEFAULT_ARTIFACTS};
pub use config::{QernelConfig, API_KEY_ENV, DEFAULT_API_URL};
pub use error::QernelError;
pub use events::{decode_line, parse_sse_line, DecodedLine, SseLine, StageSeverity, StreamEvent};
pub use html::HtmlReportSink;
pub use models::{AlgorithmResponse, AlgorithmTranscript, EndReason, MethodsPayload};
pub use payload::{AlgorithmSource, SOURCE_FORMAT};
pub use sinks::{NullIndicator, TerminalSink, VisualSink, WarmupIndicator};
pub use tasks::{summarize_tasks, TaskStatus, TaskSummaryEntry};
pub use terminal::TerminalPrinter;
pub use transcript::{Folded, TranscriptAggregator};

//! Presentation sink contracts.
//!
//! Sinks are passive consumers of aggregator output, injected into the
//! orchestrator rather than reached through globals. They are contracts
//! only: the aggregator never depends on what a sink does with the data,
//! and a sink failure must never abort data collection — implementations
//! swallow and trace their own IO errors, so every method here is
//! infallible from the caller's side.

use serde_json::Value;

use crate::events::StageSeverity;
use crate::models::MethodsPayload;
use crate::tasks::TaskSummaryEntry;

/// Terminal output contract.
pub trait TerminalSink: Send + Sync {
    /// Render one status line. `stage` may be empty; `level` follows the
    /// stage-suffix severity rule.
    fn print_status(&self, stage: &str, message: &str, level: StageSeverity);

    /// Render the final result summary block.
    fn print_result_summary(
        &self,
        class_name: Option<&str>,
        class_doc: Option<&str>,
        methods: &MethodsPayload,
    );

    /// Render the derived task summary.
    fn print_task_summary(&self, entries: &[TaskSummaryEntry]);

    /// Print an opaque passthrough line verbatim.
    fn print_raw(&self, line: &str);

    /// Flush and clear any in-progress spinner. Must be safe to call when
    /// no spinner is active, and more than once.
    fn finish(&self);
}

/// Warm-up indicator contract. Whoever starts the indicator is responsible
/// for finalizing it exactly once on every exit path (see
/// [`WarmupGuard`](crate::retry::WarmupGuard)).
pub trait WarmupIndicator: Send + Sync {
    fn warmup_started(&self, label: &str);
    fn warmup_connected(&self);
    fn warmup_failed(&self);
}

/// Indicator that renders nothing. Used where warm-up feedback is
/// unwanted (e.g. the artifact list call).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullIndicator;

impl WarmupIndicator for NullIndicator {
    fn warmup_started(&self, _label: &str) {}
    fn warmup_connected(&self) {}
    fn warmup_failed(&self) {}
}

/// GUI/HTML sink contract. Update methods must be internally synchronized:
/// the streaming consumer may run on a different thread than the sink's
/// owner and communicates only through these calls.
pub trait VisualSink: Send + Sync {
    /// Best-effort status update.
    fn update_status(&self, message: &str, level: StageSeverity);

    /// Deliver the final results payload (arbitrary JSON-serializable map).
    fn update_with_results(&self, payload: Value);

    /// Run the sink's UI loop on the calling thread, invoking `on_start`
    /// once the UI is ready. Sinks without an owned loop (file writers,
    /// test doubles) keep this default, which starts the work immediately.
    fn start_and_run(&self, on_start: Box<dyn FnOnce() + Send>) {
        on_start();
    }
}

//! Terminal pretty-printer for streaming output.
//!
//! Renders progress to stderr so stdout stays pipeable. Stage strings of
//! the form `<name>:<suffix>` drive an ephemeral spinner: `start`/`call`
//! begins a step, `ok` replaces the spinner with `✓ name: ok`, `err` (and
//! spellings) with `✗ name: failed`. The warm-up indicator is a spinner
//! with elapsed seconds that finalizes to `connected` or `failed`.
//!
//! Spinners only render on a real TTY outside CI; colors respect
//! `NO_COLOR` via `console`'s own detection.

use std::sync::Mutex;
use std::time::Duration;

use console::{style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::events::StageSeverity;
use crate::models::MethodsPayload;
use crate::sinks::{TerminalSink, WarmupIndicator};
use crate::tasks::{TaskStatus, TaskSummaryEntry};

static STEP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(?P<name>.+):(?P<suffix>start|call|ok|err(?:or)?|fail(?:ed)?|skipped)\b[:\s]*(?P<rest>.*)$",
    )
    .expect("step pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepOutcome {
    Begin,
    Ok,
    Failed,
    Skipped,
}

/// A `<name>:<suffix>` step line, parsed.
#[derive(Debug, Clone, PartialEq)]
struct Step {
    name: String,
    suffix: String,
    rest: String,
    outcome: StepOutcome,
}

fn parse_step(text: &str) -> Option<Step> {
    let caps = STEP_RE.captures(text)?;
    let suffix = caps["suffix"].to_lowercase();
    let outcome = match suffix.as_str() {
        "start" | "call" => StepOutcome::Begin,
        "ok" => StepOutcome::Ok,
        "err" | "error" | "fail" | "failed" => StepOutcome::Failed,
        "skipped" => StepOutcome::Skipped,
        _ => return None,
    };
    Some(Step {
        name: caps["name"].to_string(),
        suffix,
        rest: caps.name("rest").map(|m| m.as_str().trim().to_string()).unwrap_or_default(),
        outcome,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActiveKind {
    Step,
    Warmup,
}

struct Active {
    label: String,
    kind: ActiveKind,
    bar: Option<ProgressBar>,
}

#[derive(Default)]
struct PrinterState {
    active: Option<Active>,
}

/// Terminal implementation of [`TerminalSink`] and [`WarmupIndicator`].
pub struct TerminalPrinter {
    ephemeral: bool,
    state: Mutex<PrinterState>,
}

impl Default for TerminalPrinter {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalPrinter {
    pub fn new() -> Self {
        let ephemeral = Term::stderr().is_term() && std::env::var_os("CI").is_none();
        Self {
            ephemeral,
            state: Mutex::new(PrinterState::default()),
        }
    }

    /// Printer that never draws spinners, regardless of TTY state.
    pub fn plain() -> Self {
        Self {
            ephemeral: false,
            state: Mutex::new(PrinterState::default()),
        }
    }

    fn mark(level: StageSeverity) -> String {
        match level {
            StageSeverity::Success => style("✓").green().to_string(),
            StageSeverity::Error => style("✗").red().to_string(),
            StageSeverity::Info => style("•").cyan().to_string(),
        }
    }

    fn spinner(template: &str, label: &str) -> ProgressBar {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template(template)
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(label.to_string());
        bar.enable_steady_tick(Duration::from_millis(80));
        bar
    }

    fn clear_active(state: &mut PrinterState) {
        if let Some(active) = state.active.take() {
            if let Some(bar) = active.bar {
                bar.finish_and_clear();
            }
        }
    }

    fn begin_step(&self, state: &mut PrinterState, label: &str) {
        // A step that never concluded just gets cleared, no noise.
        Self::clear_active(state);
        let bar = if self.ephemeral {
            Some(Self::spinner("{spinner:.cyan} {msg}", label))
        } else {
            eprintln!("{}", style(label).cyan());
            None
        };
        state.active = Some(Active {
            label: label.to_string(),
            kind: ActiveKind::Step,
            bar,
        });
    }

    fn end_step(&self, state: &mut PrinterState, level: StageSeverity, name: &str, note: &str) {
        let label = match state.active.take() {
            Some(active) => {
                if let Some(bar) = active.bar {
                    bar.finish_and_clear();
                }
                if name.is_empty() {
                    active.label
                } else {
                    name.to_string()
                }
            }
            None => name.to_string(),
        };
        let note = if note.is_empty() {
            String::new()
        } else {
            format!(" {}", note)
        };
        match level {
            StageSeverity::Success => {
                eprintln!("{} {}: ok{}", Self::mark(level), label, note)
            }
            StageSeverity::Error => {
                eprintln!("{} {}: failed{}", Self::mark(level), label, note)
            }
            StageSeverity::Info => eprintln!("{} {}{}", Self::mark(level), label, note),
        }
    }

    fn print_plain(&self, text: &str, level: StageSeverity) {
        match level {
            StageSeverity::Info => eprintln!("{} {}", Self::mark(StageSeverity::Info), text),
            StageSeverity::Success => {
                eprintln!("{} {}", style("[SUCCESS]").green().bold(), text)
            }
            StageSeverity::Error => eprintln!("{} {}", style("[ERROR]").red().bold(), text),
        }
    }

    fn finish_warmup(&self, success: bool) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let Some(active) = state.active.take() else {
            return;
        };
        if active.kind != ActiveKind::Warmup {
            // Not ours to finalize; put it back.
            state.active = Some(active);
            return;
        }
        if let Some(bar) = &active.bar {
            bar.finish_and_clear();
        }
        let (mark, note) = if success {
            (Self::mark(StageSeverity::Success), "connected")
        } else {
            (Self::mark(StageSeverity::Error), "failed")
        };
        let sep = if active.label.contains(':') { " " } else { ": " };
        eprintln!("{} {}{}{}", mark, active.label, sep, note);
    }
}

impl TerminalSink for TerminalPrinter {
    fn print_status(&self, stage: &str, message: &str, level: StageSeverity) {
        let text = if stage.is_empty() {
            message.trim().to_string()
        } else {
            format!("{} {}", stage, message).trim().to_string()
        };

        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if let Some(step) = parse_step(&text) {
            match step.outcome {
                StepOutcome::Begin => {
                    let label = if step.rest.is_empty() {
                        format!("{}:{}", step.name, step.suffix)
                    } else {
                        format!("{}:{} {}", step.name, step.suffix, step.rest)
                    };
                    self.begin_step(&mut state, &label);
                }
                StepOutcome::Ok => {
                    self.end_step(&mut state, StageSeverity::Success, &step.name, &step.rest)
                }
                StepOutcome::Failed => {
                    self.end_step(&mut state, StageSeverity::Error, &step.name, &step.rest)
                }
                StepOutcome::Skipped => {
                    self.end_step(&mut state, StageSeverity::Info, &step.name, &step.rest)
                }
            }
            return;
        }
        self.print_plain(&text, level);
    }

    fn print_result_summary(
        &self,
        class_name: Option<&str>,
        class_doc: Option<&str>,
        methods: &MethodsPayload,
    ) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        Self::clear_active(&mut state);

        eprintln!();
        match (&methods.get_name_result, &methods.get_type_result) {
            (Some(name), Some(typ)) => eprintln!("{}, {}", style(name).bold(), typ),
            (Some(name), None) => eprintln!("{}", style(name).bold()),
            (None, Some(typ)) => eprintln!("{}", typ),
            (None, None) => {
                if let Some(class_name) = class_name {
                    eprintln!("{}", style(class_name).bold());
                }
            }
        }
        if let Some(doc) = class_doc {
            if !doc.is_empty() {
                eprintln!("{}", style(doc).dim().bold());
            }
        }
        if !methods.build_circuit_doc.is_empty() {
            eprintln!("{}", style(&methods.build_circuit_doc).dim());
        }
        if let Some(circuit) = &methods.build_circuit_summary {
            eprintln!("{}", circuit);
        }
    }

    fn print_task_summary(&self, entries: &[TaskSummaryEntry]) {
        if entries.is_empty() {
            return;
        }
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        Self::clear_active(&mut state);

        eprintln!();
        for entry in entries {
            let tag = match entry.status {
                TaskStatus::Success => style("[OK]").green().bold().to_string(),
                TaskStatus::Info => style("[INFO]").cyan().bold().to_string(),
            };
            eprintln!("{} {}", tag, entry.title);
            for (key, value) in &entry.details {
                eprintln!("  • {}: {}", style(key).bold(), value);
            }
        }
    }

    fn print_raw(&self, line: &str) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        // Raw lines are rare; don't fight an active spinner for the row.
        if let Some(active) = &state.active {
            if let Some(bar) = &active.bar {
                bar.println(line);
                return;
            }
        }
        eprintln!("{}", line);
    }

    fn finish(&self) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        Self::clear_active(&mut state);
    }
}

impl WarmupIndicator for TerminalPrinter {
    fn warmup_started(&self, label: &str) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        Self::clear_active(&mut state);
        let bar = if self.ephemeral {
            Some(Self::spinner("{spinner:.cyan} {msg} {elapsed}", label))
        } else {
            eprintln!("{}", style(label).cyan());
            None
        };
        state.active = Some(Active {
            label: label.to_string(),
            kind: ActiveKind::Warmup,
            bar,
        });
    }

    fn warmup_connected(&self) {
        self.finish_warmup(true);
    }

    fn warmup_failed(&self) {
        self.finish_warmup(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_step_start() {
        let step = parse_step("build_circuit:start").unwrap();
        assert_eq!(step.name, "build_circuit");
        assert_eq!(step.outcome, StepOutcome::Begin);
        assert!(step.rest.is_empty());
    }

    #[test]
    fn test_parse_step_ok_with_note() {
        let step = parse_step("get_name:ok Bell").unwrap();
        assert_eq!(step.name, "get_name");
        assert_eq!(step.outcome, StepOutcome::Ok);
        assert_eq!(step.rest, "Bell");
    }

    #[test]
    fn test_parse_step_error_spellings() {
        for suffix in ["err", "error", "fail", "failed"] {
            let step = parse_step(&format!("validate:{}", suffix)).unwrap();
            assert_eq!(step.outcome, StepOutcome::Failed, "suffix {}", suffix);
        }
    }

    #[test]
    fn test_parse_step_dotted_name() {
        let step = parse_step("resource.qualtran:ok t_count=3").unwrap();
        assert_eq!(step.name, "resource.qualtran");
        assert_eq!(step.rest, "t_count=3");
    }

    #[test]
    fn test_parse_step_rejects_plain_text() {
        assert!(parse_step("just a message").is_none());
        assert!(parse_step("pipeline:done").is_none());
    }

    #[test]
    fn test_printer_lifecycle_does_not_panic() {
        let printer = TerminalPrinter::plain();
        printer.print_status("build_circuit:start", "", StageSeverity::Info);
        printer.print_status("build_circuit:ok", "", StageSeverity::Success);
        printer.print_status("", "plain message", StageSeverity::Info);
        printer.print_raw(": keep-alive");
        printer.print_result_summary(Some("Algo"), Some("doc"), &MethodsPayload::default());
        printer.print_task_summary(&[]);
        printer.finish();
        printer.finish(); // idempotent
    }

    #[test]
    fn test_warmup_lifecycle_does_not_panic() {
        let printer = TerminalPrinter::plain();
        printer.warmup_started("server warm up");
        printer.warmup_connected();
        // Finalizing again is a no-op.
        printer.warmup_failed();
    }
}

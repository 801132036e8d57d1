//! Self-contained HTML report sink.
//!
//! [`HtmlReportSink`] implements [`VisualSink`] by rewriting a single
//! dark-theme HTML page on every update: current status, the last ten
//! status updates, and — once the run finishes — the result summary with
//! task badges and the raw results JSON. Useful for headless runs where a
//! browser tab stands in for a terminal.
//!
//! Writes are best-effort: IO failures are traced and swallowed, never
//! surfaced to the streaming consumer.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::events::StageSeverity;
use crate::sinks::VisualSink;

const HISTORY_LIMIT: usize = 10;

struct StatusLine {
    at: DateTime<Utc>,
    text: String,
    level: StageSeverity,
}

#[derive(Default)]
struct ReportState {
    current: Option<(String, StageSeverity)>,
    history: VecDeque<StatusLine>,
    results: Option<Value>,
}

/// Writes a single-page HTML run report to a fixed path on each update.
pub struct HtmlReportSink {
    path: PathBuf,
    title: String,
    state: Mutex<ReportState>,
}

impl HtmlReportSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            title: "Qernel Run Report".to_string(),
            state: Mutex::new(ReportState::default()),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_report(&self, state: &ReportState) {
        let html = render_report(&self.title, state);
        if let Err(err) = std::fs::write(&self.path, html) {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to write HTML report");
        }
    }
}

impl VisualSink for HtmlReportSink {
    fn update_status(&self, message: &str, level: StageSeverity) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        state.current = Some((message.to_string(), level));
        state.history.push_back(StatusLine {
            at: Utc::now(),
            text: message.to_string(),
            level,
        });
        while state.history.len() > HISTORY_LIMIT {
            state.history.pop_front();
        }
        self.write_report(&state);
    }

    fn update_with_results(&self, payload: Value) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        state.results = Some(payload);
        self.write_report(&state);
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

fn level_color(level: StageSeverity) -> &'static str {
    match level {
        StageSeverity::Success => "#4ade80",
        StageSeverity::Error => "#f87171",
        StageSeverity::Info => "#93c5fd",
    }
}

fn render_report(title: &str, state: &ReportState) -> String {
    let mut page = String::new();
    let _ = write!(
        page,
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>{title}</title>\n<style>\n\
         body {{ background: #0f172a; color: #e2e8f0; font-family: ui-monospace, monospace; margin: 2rem; }}\n\
         h1 {{ font-size: 1.4rem; color: #f1f5f9; }}\n\
         h2 {{ font-size: 1.1rem; color: #94a3b8; margin-top: 1.6rem; }}\n\
         .status {{ padding: .6rem .8rem; border-radius: .4rem; background: #1e293b; }}\n\
         .history li {{ margin: .2rem 0; }}\n\
         .badge {{ display: inline-block; padding: .15rem .5rem; border-radius: .3rem; \
                   background: #1e293b; margin-right: .4rem; }}\n\
         .ts {{ color: #64748b; margin-right: .5rem; }}\n\
         table {{ border-collapse: collapse; margin: .4rem 0; }}\n\
         td {{ border: 1px solid #334155; padding: .25rem .6rem; }}\n\
         pre {{ background: #1e293b; padding: .8rem; border-radius: .4rem; overflow-x: auto; }}\n\
         </style>\n</head>\n<body>\n<h1>{title}</h1>\n",
        title = escape(title),
    );

    if let Some((text, level)) = &state.current {
        let _ = write!(
            page,
            "<h2>Status</h2>\n<div class=\"status\" style=\"color: {}\">{}</div>\n",
            level_color(*level),
            escape(text),
        );
    }

    if !state.history.is_empty() {
        page.push_str("<h2>History</h2>\n<ul class=\"history\">\n");
        for line in state.history.iter().rev() {
            let _ = write!(
                page,
                "<li><span class=\"ts\">{}</span><span style=\"color: {}\">{}</span></li>\n",
                line.at.format("%H:%M:%S"),
                level_color(line.level),
                escape(&line.text),
            );
        }
        page.push_str("</ul>\n");
    }

    if let Some(results) = &state.results {
        render_results(&mut page, results);
    }

    page.push_str("</body>\n</html>\n");
    page
}

fn render_results(page: &mut String, results: &Value) {
    page.push_str("<h2>Results</h2>\n");

    if let Some(response) = results.get("response") {
        if let Some(class_name) = response.get("class").and_then(Value::as_str) {
            let _ = write!(page, "<p><strong>{}</strong></p>\n", escape(class_name));
        }
        if let Some(doc) = response.get("class_doc").and_then(Value::as_str) {
            if !doc.is_empty() {
                let _ = write!(page, "<p>{}</p>\n", escape(doc));
            }
        }
        if let Some(circuit) = response
            .pointer("/methods/build_circuit_summary")
            .and_then(Value::as_str)
        {
            let _ = write!(page, "<pre>{}</pre>\n", escape(circuit));
        }
    }

    if let Some(tasks) = results.get("tasks").and_then(Value::as_array) {
        if !tasks.is_empty() {
            page.push_str("<h2>Tasks</h2>\n");
        }
        for task in tasks {
            let title = task.get("title").and_then(Value::as_str).unwrap_or("task");
            let ok = task.get("status").and_then(Value::as_str) == Some("success");
            let color = if ok { "#4ade80" } else { "#93c5fd" };
            let _ = write!(
                page,
                "<p><span class=\"badge\" style=\"color: {}\">{}</span>{}</p>\n",
                color,
                if ok { "OK" } else { "INFO" },
                escape(title),
            );
            if let Some(details) = task.get("details").and_then(Value::as_object) {
                if !details.is_empty() {
                    page.push_str("<table>\n");
                    for (key, value) in details {
                        let _ = write!(
                            page,
                            "<tr><td>{}</td><td>{}</td></tr>\n",
                            escape(key),
                            escape(&value.to_string()),
                        );
                    }
                    page.push_str("</table>\n");
                }
            }
        }
    }

    match serde_json::to_string_pretty(results) {
        Ok(json) => {
            let _ = write!(page, "<h2>Raw</h2>\n<pre>{}</pre>\n", escape(&json));
        }
        Err(err) => tracing::debug!(error = %err, "results not serializable for raw section"),
    }
}

//! Heuristic task summarizer.
//!
//! Derives named sub-tasks from the `build_circuit` docstring and attributes
//! pipeline-analysis data to them by keyword-matching step names. This is
//! best-effort presentation enrichment with no authority over
//! success/failure: a step whose name happens to match two tasks' keyword
//! sets is attributed to both (known limitation of the heuristic, kept
//! as-is).

use serde::Serialize;
use serde_json::{Map, Value};

/// A task inferred from docstring keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskSpec {
    pub id: &'static str,
    pub title: &'static str,
    /// Substrings matched against lower-cased pipeline step names.
    pub keywords: &'static [&'static str],
}

/// Confidence signal for one summary entry: `Success` means some pipeline
/// data was attributed to the task, `Info` means the task was only detected
/// in the docstring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Info,
    Success,
}

/// One rendered row of the task summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSummaryEntry {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    /// Flat key/value metrics pulled from matching steps.
    pub details: Map<String, Value>,
    /// Filtered slice of the pipeline analysis for this task.
    pub json: Map<String, Value>,
}

const RESOURCE_TASK: TaskSpec = TaskSpec {
    id: "resource_estimation",
    title: "Resource Estimation",
    keywords: &[
        "resource.qualtran",
        "qualtran",
        "resource",
        "estimate",
        "resource_estimation",
    ],
};

const MITIGATION_TASK: TaskSpec = TaskSpec {
    id: "error_mitigation_zne",
    title: "Error Mitigation (Mitiq ZNE)",
    keywords: &["mitigation.mitiq.zne", "mitiq", "zne", "mitigation"],
};

const SIMULATION_TASK: TaskSpec = TaskSpec {
    id: "simulation_histogram",
    title: "Simulation (Histogram)",
    keywords: &[
        "execute.simulator",
        "simulator",
        "execute",
        "histogram",
        "counts",
        "shots",
    ],
};

// Keys lifted from a step's output.summary into details.
const SUMMARY_DETAIL_KEYS: &[&str] = &[
    "t_count",
    "qubit_count",
    "depth",
    "op_counts",
    "mitigated_value",
];

// Keys kept when slicing a single matched step's output.
const OUTPUT_SLICE_KEYS: &[&str] = &["counts", "shots", "mitigated_value", "raw_value", "metrics"];

/// Infer task specs from a build docstring. Detection order is fixed:
/// resource estimation, then error mitigation, then simulation.
pub fn task_specs_from_doc(doc: &str) -> Vec<TaskSpec> {
    let text = doc.to_lowercase();
    let mut specs = Vec::new();
    if text.contains("resource") || text.contains("estimate") {
        specs.push(RESOURCE_TASK);
    }
    if text.contains("mitiq") || text.contains("zne") || text.contains("error mitigation") {
        specs.push(MITIGATION_TASK);
    }
    if text.contains("simulate")
        || text.contains("simulation")
        || text.contains("histogram")
        || text.contains("shots")
    {
        specs.push(SIMULATION_TASK);
    }
    specs
}

fn pipeline_steps(analysis: Option<&Map<String, Value>>) -> &[Value] {
    analysis
        .and_then(|a| a.get("pipeline"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn step_matches(step: &Value, keywords: &[&str]) -> bool {
    let name = step
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_lowercase();
    keywords.iter().any(|kw| name.contains(kw))
}

fn step_output(step: &Value) -> Option<&Map<String, Value>> {
    step.get("output").and_then(Value::as_object)
}

/// Pull known metric fields out of one step's output into a flat map.
fn collect_details_from_output(out: &Map<String, Value>, details: &mut Map<String, Value>) {
    if let Some(Value::Object(summary)) = out.get("summary") {
        for key in SUMMARY_DETAIL_KEYS {
            if let Some(value) = summary.get(*key) {
                details.insert((*key).to_string(), value.clone());
            }
        }
    }
    for key in ["mitigated_value", "raw_value"] {
        if let Some(value) = out.get(key) {
            if !value.is_null() {
                details.insert(key.to_string(), value.clone());
            }
        }
    }
    if let Some(counts @ Value::Object(_)) = out.get("counts") {
        details.insert("counts".to_string(), counts.clone());
    }
    if let Some(shots) = out.get("shots") {
        if !shots.is_null() {
            details.insert("shots".to_string(), shots.clone());
        }
    }
}

/// Compact details for all steps matching the given keywords.
pub fn task_details_from_analysis(
    analysis: Option<&Map<String, Value>>,
    keywords: &[&str],
) -> Map<String, Value> {
    let mut details = Map::new();
    for step in pipeline_steps(analysis) {
        if step_matches(step, keywords) {
            if let Some(out) = step_output(step) {
                collect_details_from_output(out, &mut details);
            }
        }
    }
    details
}

fn slice_known_output_fields(out: &Map<String, Value>) -> Map<String, Value> {
    let mut sliced = Map::new();
    if let Some(summary) = out.get("summary") {
        sliced.insert("summary".to_string(), summary.clone());
    }
    for key in OUTPUT_SLICE_KEYS {
        if let Some(value) = out.get(*key) {
            sliced.insert((*key).to_string(), value.clone());
        }
    }
    sliced
}

/// Compact payload slice for pipeline steps matching the keywords: one match
/// yields `{pipeline: [step], output: <filtered>}`, several matches yield
/// `{pipeline: matched}` unfiltered, none yields an empty map.
pub fn task_payload_slice(
    analysis: Option<&Map<String, Value>>,
    keywords: &[&str],
) -> Map<String, Value> {
    let matched: Vec<&Value> = pipeline_steps(analysis)
        .iter()
        .filter(|step| step_matches(step, keywords))
        .collect();

    let mut payload = Map::new();
    match matched.as_slice() {
        [] => {}
        [step] => {
            payload.insert(
                "pipeline".to_string(),
                Value::Array(vec![(*step).clone()]),
            );
            if let Some(out) = step_output(step) {
                let sliced = slice_known_output_fields(out);
                let output = if sliced.is_empty() { out.clone() } else { sliced };
                payload.insert("output".to_string(), Value::Object(output));
            }
        }
        many => {
            payload.insert(
                "pipeline".to_string(),
                Value::Array(many.iter().map(|s| (*s).clone()).collect()),
            );
        }
    }
    payload
}

/// Summarize likely tasks from docstring hints and the pipeline analysis.
pub fn summarize_tasks(
    build_doc: Option<&str>,
    analysis: Option<&Map<String, Value>>,
) -> Vec<TaskSummaryEntry> {
    let Some(doc) = build_doc else {
        return Vec::new();
    };
    task_specs_from_doc(doc)
        .into_iter()
        .map(|spec| {
            let details = task_details_from_analysis(analysis, spec.keywords);
            let json = task_payload_slice(analysis, spec.keywords);
            let status = if details.is_empty() && json.is_empty() {
                TaskStatus::Info
            } else {
                TaskStatus::Success
            };
            TaskSummaryEntry {
                id: spec.id.to_string(),
                title: spec.title.to_string(),
                status,
                details,
                json,
            }
        })
        .collect()
}

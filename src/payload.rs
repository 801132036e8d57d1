//! Serialization bridge: encoding a user algorithm for transport.
//!
//! The server executes user-authored circuit-building logic. Rather than
//! shipping an opaque serialized object across a runtime boundary, the
//! client sends an explicit, versioned envelope of source text plus a
//! declared entry point. The envelope is JSON, base64-encoded into the
//! `algorithm_pickle` wire field (the field name is fixed by the server
//! protocol).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Serialize;

use crate::error::QernelError;

/// Version tag of the submission envelope format.
pub const SOURCE_FORMAT: &str = "qernel-source/1";

/// A user algorithm described as source text with a declared entry point.
///
/// `source` must define a class implementing the callback contract the
/// server invokes: `get_name`, `get_type`, `build_circuit(params)` and
/// optionally `validate_params`. `entry_point` names that class.
#[derive(Debug, Clone, Serialize)]
pub struct AlgorithmSource {
    /// Class name reported back by the server in result payloads.
    pub class_name: String,
    /// Optional docstring for the class; the server falls back to the one
    /// found in the source when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_doc: Option<String>,
    /// Name of the class the server should instantiate.
    pub entry_point: String,
    /// Full source text of the algorithm definition.
    pub source: String,
}

#[derive(Serialize)]
struct Envelope<'a> {
    format: &'static str,
    #[serde(flatten)]
    algorithm: &'a AlgorithmSource,
}

impl AlgorithmSource {
    pub fn new(
        class_name: impl Into<String>,
        entry_point: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            class_name: class_name.into(),
            class_doc: None,
            entry_point: entry_point.into(),
            source: source.into(),
        }
    }

    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.class_doc = Some(doc.into());
        self
    }

    /// Encode the envelope for the `algorithm_pickle` wire field.
    pub fn encode(&self) -> Result<String, QernelError> {
        let envelope = Envelope {
            format: SOURCE_FORMAT,
            algorithm: self,
        };
        let json = serde_json::to_vec(&envelope).map_err(|e| QernelError::Encode {
            message: e.to_string(),
        })?;
        Ok(BASE64.encode(json))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_roundtrip_shape() {
        let algorithm = AlgorithmSource::new(
            "HelloWorldAlgorithm",
            "HelloWorldAlgorithm",
            "class HelloWorldAlgorithm: ...",
        )
        .with_doc("Hello World quantum algorithm example.");

        let encoded = algorithm.encode().unwrap();
        let decoded = BASE64.decode(encoded).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&decoded).unwrap();

        assert_eq!(value["format"], SOURCE_FORMAT);
        assert_eq!(value["class_name"], "HelloWorldAlgorithm");
        assert_eq!(value["entry_point"], "HelloWorldAlgorithm");
        assert!(value["source"].as_str().unwrap().contains("class"));
        assert_eq!(
            value["class_doc"],
            "Hello World quantum algorithm example."
        );
    }

    #[test]
    fn test_doc_omitted_when_absent() {
        let algorithm = AlgorithmSource::new("A", "A", "class A: ...");
        let encoded = algorithm.encode().unwrap();
        let decoded = BASE64.decode(encoded).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
        assert!(value.get("class_doc").is_none());
    }
}

//! Warm-up retry behavior against a wiremock server: cold-start statuses,
//! deadline bounds, and artifact downloads.

use std::io::Write;
use std::time::{Duration, Instant};

use flate2::write::GzEncoder;
use flate2::Compression;
use qernel_client::{
    AlgorithmSource, QernelClient, QernelConfig, QernelError, TerminalPrinter,
};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_client(server: &MockServer) -> QernelClient {
    let config = QernelConfig::new(server.uri()).with_api_key("test-key-123456");
    QernelClient::new(config).with_printer(TerminalPrinter::plain())
}

fn gzip_json(value: &serde_json::Value) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&serde_json::to_vec(value).unwrap())
        .unwrap();
    encoder.finish().unwrap()
}

#[tokio::test]
async fn test_always_503_fails_at_the_deadline() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/stream"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let config = QernelConfig::new(server.uri())
        .with_api_key("test-key-123456")
        .with_stream_timeout(Duration::from_secs(2));
    let client = QernelClient::new(config).with_printer(TerminalPrinter::plain());
    let algorithm = AlgorithmSource::new("A", "A", "class A: ...");

    let started = Instant::now();
    let err = client.run_stream(&algorithm, None).await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(err.is_retryable(), "timeout-class error expected: {:?}", err);
    assert!(elapsed >= Duration::from_secs(2), "gave up early: {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(8), "kept looping: {:?}", elapsed);
}

#[tokio::test]
async fn test_artifact_download_warms_up_through_503s() {
    // Two cold-start bounces, then the blob: exactly three attempts.
    let server = MockServer::start().await;
    let blob = gzip_json(&json!({"counts": {"00": 51, "11": 49}, "shots": 100}));

    Mock::given(method("GET"))
        .and(path("/artifacts/jobs/job-1/artifacts/download/trial_result"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/artifacts/jobs/job-1/artifacts/download/trial_result"))
        .and(header("Accept", "application/octet-stream"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(blob))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let value = client.load_artifact("job-1", "trial_result").await.unwrap();
    assert_eq!(value["shots"], 100);
    assert_eq!(value["counts"]["00"], 51);
    // Mock expectations (2 + 1 requests) are verified on server drop.
}

#[tokio::test]
async fn test_artifact_download_fails_fast_on_403() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/artifacts/jobs/job-1/artifacts/download/trial_result"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let err = client
        .load_artifact("job-1", "trial_result")
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(403));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_sequential_artifacts_share_one_batch() {
    let server = MockServer::start().await;
    for name in ["trial_result", "simulator_state"] {
        Mock::given(method("GET"))
            .and(path(format!(
                "/artifacts/jobs/job-1/artifacts/download/{}",
                name
            )))
            .respond_with(
                ResponseTemplate::new(200).set_body_bytes(gzip_json(&json!({ "name": name }))),
            )
            .expect(1)
            .mount(&server)
            .await;
    }

    let client = test_client(&server);
    let loaded = client
        .load_artifacts_sequential("job-1", None)
        .await
        .unwrap();

    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[0].0, "trial_result");
    assert_eq!(loaded[0].1["name"], "trial_result");
    assert_eq!(loaded[1].0, "simulator_state");
}

#[tokio::test]
async fn test_sequential_batch_aborts_on_first_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/artifacts/jobs/job-1/artifacts/download/trial_result"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such artifact"))
        .expect(1)
        .mount(&server)
        .await;
    // The second artifact must never be requested.
    Mock::given(method("GET"))
        .and(path("/artifacts/jobs/job-1/artifacts/download/simulator_state"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(gzip_json(&json!({}))))
        .expect(0)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let err = client
        .load_artifacts_sequential("job-1", None)
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(404));
}

#[tokio::test]
async fn test_list_artifacts_bare_array() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/artifacts/jobs/job-1/artifacts"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!(["trial_result", "simulator_state"])),
        )
        .mount(&server)
        .await;

    let client = test_client(&server);
    let names = client.list_artifacts("job-1").await.unwrap();
    assert_eq!(names, vec!["trial_result", "simulator_state"]);
}

#[tokio::test]
async fn test_list_artifacts_wrapped_object() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/artifacts/jobs/job-1/artifacts"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"artifacts": ["trial_result"], "job": "job-1"})),
        )
        .mount(&server)
        .await;

    let client = test_client(&server);
    let names = client.list_artifacts("job-1").await.unwrap();
    assert_eq!(names, vec!["trial_result"]);
}

#[tokio::test]
async fn test_probe_retries_through_cold_start() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    assert_eq!(client.test_connection().await.unwrap(), "ok");
}

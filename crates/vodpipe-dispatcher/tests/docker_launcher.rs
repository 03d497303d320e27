//! Docker launcher against a mocked Engine API.

use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vodpipe_dispatcher::{DispatchError, DockerLauncher, TaskLauncher};
use vodpipe_models::{validate_key, JobSpec};

fn spec() -> JobSpec {
    let identity = validate_key("alice###trip.mp4").unwrap();
    JobSpec::new(&identity, "B", "alice###trip.mp4", "outputs", 1700000000000)
}

fn launcher(server: &MockServer) -> DockerLauncher {
    DockerLauncher::new(
        server.uri(),
        "vodpipe-job:latest",
        None,
        vec![("S3_ENDPOINT_URL".to_string(), "http://minio:9000".to_string())],
    )
    .unwrap()
}

#[tokio::test]
async fn test_create_then_start() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/containers/create"))
        .and(body_partial_json(json!({
            "Image": "vodpipe-job:latest",
            "HostConfig": {"AutoRemove": true}
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"Id": "abc123", "Warnings": []})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/containers/abc123/start"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let task_id = launcher(&server).launch(&spec()).await.unwrap();
    assert_eq!(task_id, "abc123");

    let requests = server.received_requests().await.unwrap();
    let create: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    let env: Vec<&str> = create["Env"].as_array().unwrap().iter().filter_map(|v| v.as_str()).collect();
    assert!(env.contains(&"SOURCE_BUCKET=B"));
    assert!(env.contains(&"DESTINATION_BUCKET=outputs"));
    assert!(env.contains(&"OUTPUT_PREFIX=processed/alice###trip-1700000000000/"));
    assert!(env.contains(&"S3_ENDPOINT_URL=http://minio:9000"));
}

#[tokio::test]
async fn test_missing_image_is_a_launch_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/containers/create"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "No such image"})))
        .mount(&server)
        .await;

    let err = launcher(&server).launch(&spec()).await.unwrap_err();
    assert!(matches!(err, DispatchError::Launch(ref msg) if msg.contains("No such image")));
}

#[tokio::test]
async fn test_start_failure_is_a_launch_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/containers/create"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"Id": "abc123", "Warnings": null})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/containers/abc123/start"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"message": "oci runtime error"})))
        .mount(&server)
        .await;

    let err = launcher(&server).launch(&spec()).await.unwrap_err();
    assert!(err.is_transient());
    assert!(err.to_string().contains("oci runtime error"));
}

#[tokio::test]
async fn test_unreachable_daemon_is_a_launch_error() {
    let launcher = DockerLauncher::new("http://127.0.0.1:1", "img", None, Vec::new()).unwrap();
    assert!(matches!(launcher.launch(&spec()).await, Err(DispatchError::Launch(_))));
}

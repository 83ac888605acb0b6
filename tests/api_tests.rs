//! Tests for the HTTP surface, driven in-process with `tower::ServiceExt::oneshot`.

mod test_harness;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use jobfleet::api::router;
use jobfleet::jobstore::{JobDeclaration, JobDefinition};
use test_harness::TestFleet;

const FLEET: &[(&str, &str)] = &[("host-1", "10.0.0.1:8080"), ("host-2", "10.0.0.2:8080")];

fn app(fleet: &TestFleet, index: usize) -> Router {
    router(fleet.node(index).api_state())
}

async fn send(app: Router, method: &str, uri: &str, body: Body) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(body)
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
    let (status, body) = send(app, "GET", uri, Body::empty()).await;
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

fn definition(declaration: JobDeclaration) -> Vec<u8> {
    JobDefinition::single(declaration).to_bytes().unwrap()
}

#[tokio::test]
async fn test_host_endpoints() {
    let fleet = TestFleet::new(FLEET).await;

    let (status, host) = get_json(app(&fleet, 0), "/api/host").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(host["name"], "host-1");
    assert_eq!(host["port"], 8080);
    assert_eq!(host["ip"], "10.0.0.1");

    let (status, hosts) = get_json(app(&fleet, 0), "/api/hosts").await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = hosts
        .as_array()
        .unwrap()
        .iter()
        .map(|h| h["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["host-1", "host-2"]);
}

#[tokio::test]
async fn test_upload_and_load_job() {
    let fleet = TestFleet::new(FLEET).await;
    let mut etl = JobDeclaration::new("etl");
    etl.cron = Some("0 30 1 * * *".into());

    let (status, _) = send(
        app(&fleet, 1),
        "PUT",
        "/internal/jobs/etl/definition",
        Body::from(definition(etl)),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(
        app(&fleet, 1),
        "PUT",
        "/internal/jobs/etl/dependencies/etl.jar",
        Body::from("jar"),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(app(&fleet, 1), "POST", "/internal/jobs/etl/load", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    let declaration: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(declaration["name"], "etl");

    let (_, jobs) = get_json(app(&fleet, 1), "/api/jobs").await;
    assert_eq!(jobs, serde_json::json!(["etl"]));

    let (status, details) = get_json(app(&fleet, 1), "/api/jobs/etl").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(details["cron_expression"], "0 30 1 * * *");
    assert!(details["next_fire_time"].is_string());
    assert_eq!(details["dependencies"], serde_json::json!(["etl.jar"]));
    assert_eq!(details["hosts"][0]["name"], "host-2");
}

#[tokio::test]
async fn test_load_rejects_mismatched_definition() {
    let fleet = TestFleet::new(FLEET).await;

    let (status, _) = send(
        app(&fleet, 0),
        "PUT",
        "/internal/jobs/etl/definition",
        Body::from(definition(JobDeclaration::new("something-else"))),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(app(&fleet, 0), "POST", "/internal/jobs/etl/load", Body::empty()).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(String::from_utf8_lossy(&body).contains("something-else"));

    let (status, _) = send(app(&fleet, 0), "POST", "/internal/jobs/ghost/load", Body::empty()).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_load_rejects_zero_partitions() {
    let fleet = TestFleet::new(FLEET).await;
    let mut etl = JobDeclaration::new("etl");
    etl.partitions = Some(0);

    let (status, _) = send(
        app(&fleet, 0),
        "PUT",
        "/internal/jobs/etl/definition",
        Body::from(definition(etl)),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(app(&fleet, 0), "POST", "/internal/jobs/etl/load", Body::empty()).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(String::from_utf8_lossy(&body).contains("partition count"));
    assert!(!fleet.has_job(0, "etl").await);
}

#[tokio::test]
async fn test_invalid_names_are_bad_requests() {
    let fleet = TestFleet::new(FLEET).await;

    let (status, _) = send(
        app(&fleet, 0),
        "PUT",
        "/internal/jobs/etl/dependencies/job.json",
        Body::from("x"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        app(&fleet, 0),
        "PUT",
        "/internal/jobs/.hidden/definition",
        Body::from("{}"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let fleet = TestFleet::new(FLEET).await;

    let (status, _) = get_json(app(&fleet, 0), "/api/jobs/ghost").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(app(&fleet, 0), "POST", "/api/jobs/ghost/run", Body::empty()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_run_is_accepted() {
    let fleet = TestFleet::new(FLEET).await;
    let mut job = JobDeclaration::new("touch");
    job.command = Some("touch ran".into());
    fleet.install_job(0, job).await;

    let (status, _) = send(app(&fleet, 0), "POST", "/api/jobs/touch/run", Body::empty()).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let dir = fleet.node(0).store.directory_for("touch").await.unwrap();
    test_harness::assert_eventually(
        || {
            let marker = dir.join("ran");
            async move { marker.exists() }
        },
        std::time::Duration::from_secs(5),
        "job did not run",
    )
    .await;
}

#[tokio::test]
async fn test_deploy_and_sync_report() {
    let fleet = TestFleet::new(FLEET).await;
    fleet.install_job(0, JobDeclaration::new("etl")).await;

    let (status, body) = send(app(&fleet, 0), "POST", "/api/jobs/etl/deploy", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    let report: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(report["pushed"].as_array().unwrap().len(), 1);
    assert_eq!(report["pushed"][0]["host"]["name"], "host-2");
    assert!(report["failures"].as_array().unwrap().is_empty());
    assert!(fleet.has_job(1, "etl").await);

    let (status, body) = send(app(&fleet, 0), "POST", "/api/sync", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    let report: Value = serde_json::from_slice(&body).unwrap();
    assert!(report["pushed"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_push_and_pull_endpoints() {
    let fleet = TestFleet::new(FLEET).await;
    fleet.install_job(0, JobDeclaration::new("etl")).await;
    fleet.install_job(0, JobDeclaration::new("report")).await;

    // host-1 asked to push etl to host-2
    let target = serde_json::to_vec(&fleet.host(1)).unwrap();
    let (status, _) = send(app(&fleet, 0), "POST", "/internal/jobs/etl/push", Body::from(target)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(fleet.has_job(1, "etl").await);
    assert!(!fleet.has_job(1, "report").await);

    // host-2 asks host-1 for everything
    let source = serde_json::to_vec(&fleet.host(0)).unwrap();
    let (status, _) = send(app(&fleet, 1), "POST", "/api/pull", Body::from(source)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(fleet.has_job(1, "report").await);
}

#[tokio::test]
async fn test_coordination_outage_is_service_unavailable() {
    let fleet = TestFleet::new(FLEET).await;
    fleet.coordination.set_available(false);

    let (status, _) = get_json(app(&fleet, 0), "/api/hosts").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

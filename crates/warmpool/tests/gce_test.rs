use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use warmpool::{ComputeApi, Error, GceClient, InstanceStatus, PollSettings, StaticToken};
use warmpool_core::{DiskSpec, Metadata, wait_for_zone_operation};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ZONE_PATH: &str = "/compute/v1/projects/proj/zones/us-central1-a";

async fn client(server: &MockServer) -> GceClient {
    GceClient::new("proj", "us-central1-a", Arc::new(StaticToken::new("tok"))).with_endpoints(
        format!("{}/compute/v1", server.uri()),
        format!("{}/iam/v1", server.uri()),
    )
}

fn instance_json(name: &str) -> serde_json::Value {
    json!({
        "name": name,
        "selfLink": format!("https://compute.googleapis.com{ZONE_PATH}/instances/{name}"),
        "status": "RUNNING",
        "creationTimestamp": "2024-05-01T10:00:00.000-07:00",
        "metadata": {"fingerprint": "fp1", "items": [{"key": "backend-id", "value": "b"}]}
    })
}

fn operation_json(name: &str, status: &str) -> serde_json::Value {
    json!({"name": name, "status": status})
}

#[tokio::test]
async fn get_instance_parses_resource() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{ZONE_PATH}/instances/vm-1")))
        .and(header("authorization", "Bearer tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(instance_json("vm-1")))
        .mount(&server)
        .await;

    let vm = client(&server).await.get_instance("vm-1").await.unwrap();

    assert_eq!(vm.name, "vm-1");
    assert_eq!(vm.status, InstanceStatus::Running);
    assert_eq!(vm.backend_id(), Some("b"));
}

#[tokio::test]
async fn missing_resources_are_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {"code": 404, "message": "The resource was not found"}
        })))
        .mount(&server)
        .await;
    let gce = client(&server).await;

    assert!(gce.get_disk("user-x-disk").await.unwrap_err().is_not_found());
    assert!(gce.get_snapshot("golden").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn other_errors_carry_status_and_message() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": {"code": 403, "message": "Required 'compute.disks.get' permission"}
        })))
        .mount(&server)
        .await;

    let err = client(&server).await.get_disk("d").await.unwrap_err();

    match err {
        Error::Api { status, message } => {
            assert_eq!(status, 403);
            assert_eq!(message, "Required 'compute.disks.get' permission");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn stale_fingerprint_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{ZONE_PATH}/instances/vm-1/setMetadata")))
        .and(body_partial_json(json!({"fingerprint": "old"})))
        .respond_with(ResponseTemplate::new(412))
        .mount(&server)
        .await;
    let mut metadata = Metadata::new().with("for-user", "alice@example.com");
    metadata.fingerprint = Some("old".to_string());

    let err = client(&server)
        .await
        .set_metadata("vm-1", &metadata)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::FingerprintMismatch(_)), "{err}");
}

#[tokio::test]
async fn list_instances_follows_pages() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{ZONE_PATH}/instances")))
        .and(query_param("pageToken", "next"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"items": [instance_json("vm-2")]})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{ZONE_PATH}/instances")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [instance_json("vm-1")],
            "nextPageToken": "next"
        })))
        .mount(&server)
        .await;

    let names: Vec<_> = client(&server)
        .await
        .list_instances()
        .await
        .unwrap()
        .into_iter()
        .map(|vm| vm.name)
        .collect();

    assert_eq!(names, vec!["vm-1", "vm-2"]);
}

#[tokio::test]
async fn insert_disk_sends_snapshot_and_size() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{ZONE_PATH}/disks")))
        .and(body_partial_json(json!({
            "name": "user-x-disk",
            "sizeGb": "200",
            "sourceSnapshot": "global/snapshots/golden"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(operation_json("op-1", "PENDING")))
        .expect(1)
        .mount(&server)
        .await;

    let op = client(&server)
        .await
        .insert_disk(&DiskSpec {
            name: "user-x-disk".to_string(),
            size_gb: Some(200),
            source_snapshot: Some("global/snapshots/golden".to_string()),
        })
        .await
        .unwrap();

    assert_eq!(op.name, "op-1");
}

#[tokio::test]
async fn operation_errors_fail_the_wait() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{ZONE_PATH}/operations/op-1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "op-1",
            "status": "DONE",
            "error": {"errors": [
                {"code": "QUOTA_EXCEEDED", "message": "Quota 'CPUS' exceeded"},
                {"code": "RESOURCE_NOT_READY", "message": "not ready"}
            ]}
        })))
        .mount(&server)
        .await;
    let gce = client(&server).await;

    let err = wait_for_zone_operation(&gce, "op-1", PollSettings::every(Duration::from_millis(1)))
        .await
        .unwrap_err();

    match err {
        Error::OperationFailed { name, errors } => {
            assert_eq!(name, "op-1");
            assert_eq!(errors.len(), 2);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn service_accounts_use_iam_api() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/iam/v1/projects/proj/serviceAccounts"))
        .and(body_partial_json(json!({
            "accountId": "vm-abc",
            "serviceAccount": {"displayName": "Pool VM vm-abc"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "email": "vm-abc@proj.iam.gserviceaccount.com",
            "uniqueId": "123",
            "displayName": "Pool VM vm-abc"
        })))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(
            "/iam/v1/projects/proj/serviceAccounts/vm-abc@proj.iam.gserviceaccount.com",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    let gce = client(&server).await;

    let account = gce
        .create_service_account("vm-abc", "Pool VM vm-abc")
        .await
        .unwrap();
    gce.delete_service_account(&account.email).await.unwrap();

    assert_eq!(account.unique_id, "123");
}

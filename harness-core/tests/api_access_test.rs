mod common;

use common::{ScriptedControlPlane, config, service_key, service_status};
use harness_core::api_access::{KEY_NAME, SERVICE_NAME};
use harness_core::{ApiAccess, CommandOutput, ControlPlaneCommand, HarnessError, PollConfig, ServiceKind, ServiceProvisioner};
use harness_core::provisioner::ServiceConfig;
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn api_access(server: &MockServer, scratch: &std::path::Path) -> (ApiAccess, Arc<ScriptedControlPlane>) {
    let credentials = json!({
        "clientid": "sb-api-access",
        "clientsecret": "s3cr3t",
        "url": server.uri(),
        "apiurl": format!("{}/scim", server.uri()),
    });
    let control_plane = Arc::new(
        ScriptedControlPlane::new()
            .then("service", service_status("create succeeded"))
            .then("service-key", service_key(&credentials.to_string())),
    );

    let mut provisioner = ServiceProvisioner::new(control_plane.clone(), PollConfig::quick());
    provisioner
        .provision(SERVICE_NAME, ServiceKind::AccessDelegation, ServiceConfig::none())
        .await
        .unwrap();
    let key = provisioner.create_key(SERVICE_NAME, KEY_NAME, None).await.unwrap();

    let access = ApiAccess::from_key(provisioner, key, &config(scratch)).unwrap();
    (access, control_plane)
}

async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "admin-token",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn assigns_group_with_one_token() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("GET"))
        .and(path("/scim/Users"))
        .and(query_param("filter", "userName eq \"operator@example.com\""))
        .and(header("Authorization", "Bearer admin-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resources": [{"id": "user-1", "userName": "operator@example.com", "origin": "sap.default"}],
            "totalResults": 1
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/scim/Groups/Viewer/members"))
        .and(body_json(json!({"value": "user-1", "origin": "sap.default", "type": "USER"})))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let scratch = tempfile::tempdir().unwrap();
    let (mut access, _) = api_access(&server, scratch.path()).await;

    access.assign_group("operator@example.com", "Viewer").await.unwrap();
}

#[tokio::test]
async fn existing_membership_is_accepted() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/scim/Groups/Viewer/members"))
        .respond_with(ResponseTemplate::new(409).set_body_string("member already exists"))
        .mount(&server)
        .await;

    let scratch = tempfile::tempdir().unwrap();
    let (mut access, _) = api_access(&server, scratch.path()).await;

    access.add_user_to_group("user-1", "Viewer").await.unwrap();
}

#[tokio::test]
async fn unknown_user_is_not_found() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("GET"))
        .and(path("/scim/Users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"resources": [], "totalResults": 0})))
        .mount(&server)
        .await;

    let scratch = tempfile::tempdir().unwrap();
    let (mut access, _) = api_access(&server, scratch.path()).await;

    let result = access.user_by_username("nobody@example.com").await;
    assert!(matches!(result, Err(HarnessError::NotFound { kind: "user", .. })));
}

#[tokio::test]
async fn forbidden_group_change_is_an_auth_error() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/scim/Groups/Viewer/members"))
        .respond_with(ResponseTemplate::new(403).set_body_string("insufficient_scope"))
        .mount(&server)
        .await;

    let scratch = tempfile::tempdir().unwrap();
    let (mut access, _) = api_access(&server, scratch.path()).await;

    let result = access.add_user_to_group("user-1", "Viewer").await;
    assert!(matches!(result, Err(HarnessError::Auth { status: 403, .. })));
}

#[tokio::test]
async fn delete_removes_key_then_service() {
    let server = MockServer::start().await;
    let scratch = tempfile::tempdir().unwrap();
    let (mut access, control_plane) = api_access(&server, scratch.path()).await;

    access.delete().await.unwrap();

    let verbs = control_plane.verbs();
    let tail: Vec<&str> = verbs[verbs.len() - 2..].to_vec();
    assert_eq!(tail, vec!["delete-service-key", "delete-service"]);
}

#[tokio::test]
async fn failed_key_creation_removes_the_service() {
    let control_plane = Arc::new(
        ScriptedControlPlane::new()
            .then("service", service_status("create succeeded"))
            .then("create-service-key", CommandOutput::failed("FAILED", "Service broker error: quota exceeded")),
    );
    let scratch = tempfile::tempdir().unwrap();

    let result = ApiAccess::provision(control_plane.clone(), &config(scratch.path())).await;

    assert!(matches!(result, Err(HarnessError::Provision { .. })));
    assert_eq!(control_plane.count("delete-service-key"), 0);
    assert_eq!(
        control_plane.calls().last(),
        Some(&ControlPlaneCommand::DeleteService {
            name: SERVICE_NAME.to_string()
        })
    );
}

#[tokio::test]
async fn unreadable_key_is_deleted_before_the_service() {
    let control_plane = Arc::new(
        ScriptedControlPlane::new()
            .then("service", service_status("create succeeded"))
            .then("service-key", CommandOutput::ok("Getting key...\nnot json at all")),
    );
    let scratch = tempfile::tempdir().unwrap();

    let result = ApiAccess::provision(control_plane.clone(), &config(scratch.path())).await;

    assert!(matches!(result, Err(HarnessError::Parse { .. })));
    let calls = control_plane.calls();
    let tail = &calls[calls.len() - 2..];
    assert_eq!(
        tail,
        [
            ControlPlaneCommand::DeleteServiceKey {
                service: SERVICE_NAME.to_string(),
                key: KEY_NAME.to_string(),
            },
            ControlPlaneCommand::DeleteService {
                name: SERVICE_NAME.to_string()
            },
        ]
    );
}

//! Tests for the management service client against a mock HTTP server

use super::*;
use crate::models::{now_utc, Report, ServerVersionMetadata, INVENTORY_TYPE};
use mockito::Matcher;
use std::time::Duration;

fn client_for(url: &str) -> RemoteClient {
    RemoteClient::new(&RemoteConfig {
        url: url.to_string(),
        credentials: Credentials {
            user: "admin".to_string(),
            password: "foobar".to_string(),
            account: "admin".to_string(),
        },
        insecure_skip_verify: false,
        timeout: Duration::from_secs(2),
    })
    .unwrap()
}

fn empty_report() -> Report {
    Report {
        timestamp: now_utc(),
        cluster_name: "test-cluster".to_string(),
        inventory_type: INVENTORY_TYPE.to_string(),
        namespaces: vec![],
        nodes: vec![],
        pods: vec![],
        containers: vec![],
        server_version_metadata: ServerVersionMetadata::default(),
    }
}

#[tokio::test]
async fn test_get_sends_auth_and_account_header() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/version")
        .match_header("authorization", "Basic YWRtaW46Zm9vYmFy")
        .match_header(ACCOUNT_HEADER, "admin")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"service": {"version": "5.11.0"}}"#)
        .create_async()
        .await;

    let body = client_for(&server.url()).get(VERSION_PATH).await.unwrap();
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["service"]["version"], "5.11.0");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_post_substitutes_id() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v2/system/integrations/1234-abcd/health-report")
        .match_header("content-type", "application/json")
        .match_body(Matcher::PartialJsonString(r#"{"hello": "world"}"#.to_string()))
        .with_status(204)
        .create_async()
        .await;

    let body = serde_json::json!({"hello": "world"});
    let response = client_for(&server.url())
        .post(&body, HEALTH_REPORT_PATH, "1234-abcd")
        .await
        .unwrap();
    assert!(response.is_empty());
    mock.assert_async().await;
}

#[tokio::test]
async fn test_non_json_success_body_is_malformed() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/version")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body("<html><body>Please log in</body></html>")
        .create_async()
        .await;

    let err = client_for(&server.url()).get(VERSION_PATH).await.unwrap_err();
    assert!(matches!(err, RemoteError::MalformedResponse { .. }));
    assert!(!server_is_offline(&err));
}

#[tokio::test]
async fn test_api_error_carries_status_and_detail() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/v2/system/integrations/registration")
        .with_status(403)
        .with_body(r#"{"message": "Not authorized. Requires permissions: domain=admin action=registerIntegration", "httpcode": 403, "detail": {}}"#)
        .create_async()
        .await;

    let err = client_for(&server.url())
        .post(&serde_json::json!({}), REGISTRATION_PATH, "")
        .await
        .unwrap_err();

    match &err {
        RemoteError::Api {
            status,
            method,
            path,
            detail,
        } => {
            assert_eq!(*status, 403);
            assert_eq!(method, "POST");
            assert_eq!(path, REGISTRATION_PATH);
            assert!(matches!(detail, Some(ErrorDetail::Api(_))));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(user_lacks_api_privileges(&err));
}

#[tokio::test]
async fn test_gateway_error_is_offline() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/version")
        .with_status(503)
        .create_async()
        .await;

    let err = client_for(&server.url()).get(VERSION_PATH).await.unwrap_err();
    assert!(server_is_offline(&err));
}

#[tokio::test]
async fn test_connection_refused_is_offline() {
    // Grab a free port and release it so nothing is listening there
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let err = client_for(&format!("http://127.0.0.1:{port}"))
        .get(VERSION_PATH)
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::Transport { .. }));
    assert!(server_is_offline(&err));
}

#[tokio::test]
async fn test_inventory_api_version_is_probed_once() {
    let mut server = mockito::Server::new_async().await;
    let probe = server
        .mock("GET", "/v2/version")
        .with_status(200)
        .with_body(r#"{"api": {"version": "2"}}"#)
        .expect(1)
        .create_async()
        .await;
    let inventory = server
        .mock("POST", "/v2/kubernetes-inventory")
        .match_body(Matcher::PartialJsonString(
            r#"{"cluster_name": "test-cluster"}"#.to_string(),
        ))
        .with_status(201)
        .expect(2)
        .create_async()
        .await;

    let client = client_for(&server.url());
    let report = empty_report();
    client.post_inventory(&report).await.unwrap();
    // Account-scoped clones share the cached version
    client
        .for_account(Credentials {
            user: "u".to_string(),
            password: "p".to_string(),
            account: "team-a".to_string(),
        })
        .post_inventory(&report)
        .await
        .unwrap();

    probe.assert_async().await;
    inventory.assert_async().await;
}

#[tokio::test]
async fn test_inventory_api_falls_back_to_v1() {
    let mut server = mockito::Server::new_async().await;
    let _probe = server
        .mock("GET", "/v2/version")
        .with_status(404)
        .with_body(r#"{"detail": "The requested URL was not found on the server.", "status": 404, "title": "Not Found", "type": "about:blank"}"#)
        .create_async()
        .await;
    let inventory = server
        .mock("POST", "/v1/enterprise/kubernetes-inventory")
        .with_status(201)
        .create_async()
        .await;

    let client = client_for(&server.url());
    assert_eq!(
        client.inventory_api_version().await.unwrap(),
        InventoryApiVersion::V1
    );
    client.post_inventory(&empty_report()).await.unwrap();
    inventory.assert_async().await;
}

#[tokio::test]
async fn test_separate_clients_do_not_share_version_cache() {
    let mut v2_server = mockito::Server::new_async().await;
    let _v2 = v2_server
        .mock("GET", "/v2/version")
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;
    let mut v1_server = mockito::Server::new_async().await;
    let _v1 = v1_server
        .mock("GET", "/v2/version")
        .with_status(405)
        .create_async()
        .await;

    let first = client_for(&v2_server.url());
    let second = client_for(&v1_server.url());
    assert_eq!(
        first.inventory_api_version().await.unwrap(),
        InventoryApiVersion::V2
    );
    assert_eq!(
        second.inventory_api_version().await.unwrap(),
        InventoryApiVersion::V1
    );
}

//! Integration tests for `MagentoClient` using wiremock HTTP mocks.

use storepulse_core::DataType;
use storepulse_magento::{MagentoClient, MagentoError, StoreAuth};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_client() -> MagentoClient {
    MagentoClient::new(30, "storepulse-test/0.1").expect("client construction should not fail")
}

fn auth_for(server: &MockServer) -> StoreAuth {
    StoreAuth {
        base_url: server.uri(),
        access_token: "test-token".to_string(),
    }
}

#[tokio::test]
async fn fetch_page_parses_items_and_total_count() {
    let server = MockServer::start().await;

    let body = serde_json::json!({
        "items": [
            { "increment_id": "000000001", "grand_total": 100.0 },
            { "increment_id": "000000002", "grand_total": 25.5 }
        ],
        "total_count": 137
    });

    Mock::given(method("GET"))
        .and(path("/rest/V1/orders"))
        .and(query_param("searchCriteria[pageSize]", "100"))
        .and(query_param("searchCriteria[currentPage]", "1"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .mount(&server)
        .await;

    let client = test_client();
    let page = client
        .fetch_page(&auth_for(&server), DataType::Orders, 1, 100, None)
        .await
        .expect("should parse page");

    assert_eq!(page.items.len(), 2);
    assert_eq!(page.total_count, 137);
    assert_eq!(
        page.items[0].get("increment_id").and_then(|v| v.as_str()),
        Some("000000001")
    );
}

#[tokio::test]
async fn fetch_page_sends_updated_at_filter() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/V1/orders"))
        .and(query_param(
            "searchCriteria[filter_groups][0][filters][0][field]",
            "updated_at",
        ))
        .and(query_param(
            "searchCriteria[filter_groups][0][filters][0][condition_type]",
            "gt",
        ))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "items": [], "total_count": 0 })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let since = chrono::DateTime::parse_from_rfc3339("2025-04-01T00:00:00Z")
        .unwrap()
        .with_timezone(&chrono::Utc);

    let client = test_client();
    let page = client
        .fetch_page(&auth_for(&server), DataType::Orders, 1, 100, Some(since))
        .await
        .expect("should fetch empty page");

    assert!(page.items.is_empty());
}

#[tokio::test]
async fn fetch_page_surfaces_status_and_body_on_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/V1/orders"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_string(r#"{"message":"The consumer isn't authorized."}"#),
        )
        .mount(&server)
        .await;

    let client = test_client();
    let err = client
        .fetch_page(&auth_for(&server), DataType::Orders, 1, 100, None)
        .await
        .expect_err("401 should be an error");

    match err {
        MagentoError::Status { status, body } => {
            assert_eq!(status, 401);
            assert!(body.contains("authorized"), "body: {body}");
        }
        other => panic!("expected Status error, got {other:?}"),
    }
}

#[tokio::test]
async fn oversized_error_body_is_capped_without_splitting_utf8() {
    let server = MockServer::start().await;

    // A body whose 2048th byte falls inside a multi-byte character.
    let body = format!("{}é and plenty more after the cap", "a".repeat(2047));

    Mock::given(method("GET"))
        .and(path("/rest/V1/orders"))
        .respond_with(ResponseTemplate::new(500).set_body_string(body))
        .mount(&server)
        .await;

    let client = test_client();
    let err = client
        .fetch_page(&auth_for(&server), DataType::Orders, 1, 100, None)
        .await
        .expect_err("500 should be an error");

    match err {
        MagentoError::Status { status, body } => {
            assert_eq!(status, 500);
            assert!(body.len() <= 2048, "body not capped: {} bytes", body.len());
            assert!(body.chars().all(|c| c == 'a'), "unexpected body: {body}");
        }
        other => panic!("expected Status error, got {other:?}"),
    }
}

#[tokio::test]
async fn fetch_page_rejects_malformed_body() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/V1/products"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
        .mount(&server)
        .await;

    let client = test_client();
    let err = client
        .fetch_page(&auth_for(&server), DataType::Products, 1, 100, None)
        .await
        .expect_err("html body should fail");

    assert!(matches!(err, MagentoError::Deserialize { .. }));
}

#[tokio::test]
async fn test_connection_returns_store_views() {
    let server = MockServer::start().await;

    let body = serde_json::json!([
        { "code": "default", "name": "Default Store View" },
        { "code": "de", "name": "German Store View" }
    ]);

    Mock::given(method("GET"))
        .and(path("/rest/V1/store/storeViews"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .mount(&server)
        .await;

    let client = test_client();
    let views = client
        .test_connection(&auth_for(&server))
        .await
        .expect("should parse store views");

    assert_eq!(views.len(), 2);
    assert_eq!(views[0].code, "default");
    assert_eq!(views[1].name, "German Store View");
}

#[tokio::test]
async fn test_connection_reports_failure_without_side_effects() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/V1/store/storeViews"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let client = test_client();
    let err = client
        .test_connection(&auth_for(&server))
        .await
        .expect_err("500 should be an error");

    assert!(matches!(err, MagentoError::Status { status: 500, .. }));
}

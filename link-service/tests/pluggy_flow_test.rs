//! Pluggy flow integration tests: one widget token, nothing to exchange.

mod common;

use common::{TEST_USER_ID, TestApp};
use serde_json::json;

#[tokio::test]
async fn create_link_returns_connect_token() {
    let app = TestApp::spawn().await;

    let response = app
        .post(
            "/pluggy/link",
            &json!({ "userId": TEST_USER_ID, "environment": "sandbox" }),
        )
        .await;

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["data"]["access_token"], "pluggy-connect-1");

    // The envelope carries exactly the connect token, nothing else
    let data = body["data"].as_object().expect("data should be an object");
    assert_eq!(data.len(), 1);

    assert_eq!(app.pluggy.connect_count(), 1);
}

#[tokio::test]
async fn create_link_accepts_production_environment() {
    let app = TestApp::spawn().await;

    let response = app
        .post(
            "/pluggy/link",
            &json!({ "userId": TEST_USER_ID, "environment": "production" }),
        )
        .await;

    assert_eq!(response.status(), 200);
    assert_eq!(app.pluggy.connect_count(), 1);
}

#[tokio::test]
async fn create_link_rejects_unknown_environment() {
    let app = TestApp::spawn().await;

    let response = app
        .post(
            "/pluggy/link",
            &json!({ "userId": TEST_USER_ID, "environment": "staging" }),
        )
        .await;

    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["kind"], "validation");
    assert_eq!(body["provider_code"], "request.invalid");
    assert_eq!(app.pluggy.connect_count(), 0);
}

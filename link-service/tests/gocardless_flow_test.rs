//! GoCardless flow integration tests: agreement, consent link, exchange.

mod common;

use common::{TEST_INSTITUTION_ID, TestApp};
use link_service::models::RequisitionStatus;
use serde_json::json;

#[tokio::test]
async fn create_agreement_returns_enveloped_agreement() {
    let app = TestApp::spawn().await;

    let response = app
        .post(
            "/gocardless/agreement",
            &json!({
                "institutionId": TEST_INSTITUTION_ID,
                "transactionTotalDays": 90,
                "reference": "user-1"
            }),
        )
        .await;

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["data"]["provider"], "gocardless");
    assert_eq!(body["data"]["agreement_id"], "AG-1");
    assert_eq!(body["data"]["institution_id"], TEST_INSTITUTION_ID);
    assert_eq!(body["data"]["transaction_total_days"], 90);

    assert_eq!(app.gocardless.agreement_count(), 1);
}

#[tokio::test]
async fn agreement_creation_is_idempotent_per_reference() {
    let app = TestApp::spawn().await;
    let request = json!({
        "institutionId": TEST_INSTITUTION_ID,
        "transactionTotalDays": 90,
        "reference": "user-7"
    });

    let first = app.post("/gocardless/agreement", &request).await;
    assert_eq!(first.status(), 200);
    let first_body: serde_json::Value = first.json().await.expect("Failed to parse response");

    let second = app.post("/gocardless/agreement", &request).await;
    assert_eq!(second.status(), 200);
    let second_body: serde_json::Value = second.json().await.expect("Failed to parse response");

    // Same agreement handed back, provider consulted once
    assert_eq!(
        first_body["data"]["agreement_id"],
        second_body["data"]["agreement_id"]
    );
    assert_eq!(app.gocardless.agreement_count(), 1);

    // A different caller reference gets its own agreement
    let other = app
        .post(
            "/gocardless/agreement",
            &json!({
                "institutionId": TEST_INSTITUTION_ID,
                "transactionTotalDays": 90,
                "reference": "user-8"
            }),
        )
        .await;
    assert_eq!(other.status(), 200);
    assert_eq!(app.gocardless.agreement_count(), 2);
}

#[tokio::test]
async fn agreement_rejects_out_of_range_days() {
    let app = TestApp::spawn().await;

    let response = app
        .post(
            "/gocardless/agreement",
            &json!({
                "institutionId": TEST_INSTITUTION_ID,
                "transactionTotalDays": 731,
                "reference": "user-1"
            }),
        )
        .await;

    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["kind"], "validation");
    assert_eq!(app.gocardless.agreement_count(), 0);
}

#[tokio::test]
async fn consent_link_requires_an_agreement() {
    let app = TestApp::spawn().await;

    let response = app
        .post(
            "/gocardless/link",
            &json!({
                "institutionId": TEST_INSTITUTION_ID,
                "agreement": "AG-99",
                "redirect": "https://app.example.com/callback",
                "reference": "attempt-1"
            }),
        )
        .await;

    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["kind"], "precondition");
    assert_eq!(body["provider_code"], "flow.agreement_required");
    assert_eq!(app.gocardless.requisition_count(), 0);
}

#[tokio::test]
async fn full_consent_journey_pends_then_completes() {
    let app = TestApp::spawn().await;

    let agreement = app
        .post(
            "/gocardless/agreement",
            &json!({
                "institutionId": TEST_INSTITUTION_ID,
                "transactionTotalDays": 180,
                "reference": "user-7"
            }),
        )
        .await;
    assert_eq!(agreement.status(), 200);
    let agreement_body: serde_json::Value =
        agreement.json().await.expect("Failed to parse response");
    let agreement_id = agreement_body["data"]["agreement_id"]
        .as_str()
        .expect("agreement_id missing");

    let link = app
        .post(
            "/gocardless/link",
            &json!({
                "institutionId": TEST_INSTITUTION_ID,
                "agreement": agreement_id,
                "redirect": "https://app.example.com/callback",
                "reference": "attempt-42"
            }),
        )
        .await;
    assert_eq!(link.status(), 200);
    let link_body: serde_json::Value = link.json().await.expect("Failed to parse response");
    assert_eq!(link_body["data"]["provider"], "gocardless");
    assert_eq!(link_body["data"]["reference"], "attempt-42");
    let redirect_url = link_body["data"]["redirect_url"]
        .as_str()
        .expect("redirect_url missing");
    assert!(redirect_url.starts_with("https://"));

    // End user has not walked the consent journey yet
    let pending = app
        .post("/gocardless/exchange", &json!({ "reference": "attempt-42" }))
        .await;
    assert_eq!(pending.status(), 400);
    let pending_body: serde_json::Value = pending.json().await.expect("Failed to parse response");
    assert_eq!(pending_body["kind"], "pending");
    assert_eq!(pending_body["provider_code"], "CR");
    assert_eq!(pending_body["http_status"], 200);

    // Consent completes out of band
    app.gocardless.set_requisition_status(
        "REQ-1",
        RequisitionStatus::Linked,
        vec!["acct-1".to_string(), "acct-2".to_string()],
    );

    let exchanged = app
        .post("/gocardless/exchange", &json!({ "reference": "attempt-42" }))
        .await;
    assert_eq!(exchanged.status(), 200);
    let credential: serde_json::Value = exchanged.json().await.expect("Failed to parse response");
    assert_eq!(credential["data"]["provider"], "gocardless");
    assert_eq!(credential["data"]["access_token"], "REQ-1");
    assert_eq!(
        credential["data"]["item_or_account_ids"],
        json!(["acct-1", "acct-2"])
    );
}

#[tokio::test]
async fn rejected_consent_is_terminal() {
    let app = TestApp::spawn().await;

    app.post(
        "/gocardless/agreement",
        &json!({
            "institutionId": TEST_INSTITUTION_ID,
            "transactionTotalDays": 90,
            "reference": "user-9"
        }),
    )
    .await;

    let link = app
        .post(
            "/gocardless/link",
            &json!({
                "institutionId": TEST_INSTITUTION_ID,
                "agreement": "AG-1",
                "redirect": "https://app.example.com/callback",
                "reference": "attempt-9"
            }),
        )
        .await;
    assert_eq!(link.status(), 200);

    app.gocardless
        .set_requisition_status("REQ-1", RequisitionStatus::Rejected, Vec::new());

    let response = app
        .post("/gocardless/exchange", &json!({ "reference": "attempt-9" }))
        .await;
    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["kind"], "invalid_token");
    assert_eq!(body["provider_code"], "RJ");
}

#[tokio::test]
async fn exchange_with_unknown_reference_is_a_precondition_error() {
    let app = TestApp::spawn().await;

    let response = app
        .post("/gocardless/exchange", &json!({ "reference": "never-issued" }))
        .await;

    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["kind"], "precondition");
    assert_eq!(body["provider_code"], "flow.unknown_reference");
}

#[tokio::test]
async fn duplicate_requisition_reference_is_a_conflict() {
    let app = TestApp::spawn().await;

    app.post(
        "/gocardless/agreement",
        &json!({
            "institutionId": TEST_INSTITUTION_ID,
            "transactionTotalDays": 90,
            "reference": "user-3"
        }),
    )
    .await;

    let link_request = json!({
        "institutionId": TEST_INSTITUTION_ID,
        "agreement": "AG-1",
        "redirect": "https://app.example.com/callback",
        "reference": "dup-1"
    });

    let first = app.post("/gocardless/link", &link_request).await;
    assert_eq!(first.status(), 200);

    let second = app.post("/gocardless/link", &link_request).await;
    assert_eq!(second.status(), 400);
    let body: serde_json::Value = second.json().await.expect("Failed to parse response");
    assert_eq!(body["kind"], "conflict");
    assert_eq!(body["provider_code"], "reference");
    assert_eq!(body["http_status"], 400);
}

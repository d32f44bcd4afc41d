// HTTP surface: routing, auth and error bodies

mod test_helpers;

use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use uuid::Uuid;

use payroll_ledger_api::models::{Currency, PaymentStatus};
use payroll_ledger_api::services::Actor;
use payroll_ledger_api::store::{PayrollStore, WalletLedgerStore};
use test_helpers::*;

fn verif_hash() -> HeaderName {
    HeaderName::from_static("verif-hash")
}

#[tokio::test]
async fn test_health_needs_no_token() {
    let app = test_app();
    let server = test_server(&app);

    let response = server.get("/health").await;
    response.assert_status_ok();
    response.assert_text("OK");
}

#[tokio::test]
async fn test_missing_or_bad_token_is_rejected() {
    let app = test_app();
    let server = test_server(&app);

    server
        .get("/billing/wallets")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
    server
        .get("/billing/wallets")
        .add_header(header::AUTHORIZATION, HeaderValue::from_static("Bearer not-a-jwt"))
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_routes_require_admin_claim() {
    let app = test_app();
    let server = test_server(&app);
    let user = Uuid::new_v4();

    server
        .get("/admin/ledger/audit")
        .add_header(header::AUTHORIZATION, bearer(user, false))
        .await
        .assert_status(StatusCode::FORBIDDEN);

    let response = server
        .get("/admin/ledger/audit")
        .add_header(header::AUTHORIZATION, bearer(user, true))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["message"], "Ledger is consistent");
    assert_eq!(body["data"]["wallets_checked"], 0);
}

#[tokio::test]
async fn test_admin_adjustment_and_insufficient_funds_code() {
    let app = test_app();
    let server = test_server(&app);
    let admin = Uuid::new_v4();
    let user = Uuid::new_v4();

    server
        .post("/admin/wallets/adjust")
        .add_header(header::AUTHORIZATION, bearer(admin, true))
        .json(&json!({"user_id": user, "currency": "NGN", "amount": "5000", "direction": "credit"}))
        .await
        .assert_status_ok();

    let response = server
        .post("/admin/wallets/adjust")
        .add_header(header::AUTHORIZATION, bearer(admin, true))
        .json(&json!({"user_id": user, "currency": "NGN", "amount": "6000", "direction": "debit"}))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["code"], "INSUFFICIENT_FUNDS");

    let response = server
        .get("/billing/wallets/ngn/ledger")
        .add_header(header::AUTHORIZATION, bearer(user, false))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["data"]["wallet"]["available_balance"], "5000");
    assert_eq!(body["data"]["entries"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_adjustment_with_seen_external_id_posts_once() {
    let app = test_app();
    let server = test_server(&app);
    let admin = bearer(Uuid::new_v4(), true);
    let user = Uuid::new_v4();
    let adjustment = json!({
        "user_id": user,
        "currency": "NGN",
        "amount": "750",
        "direction": "credit",
        "external_id": "ops-ticket-42"
    });

    for _ in 0..2 {
        let response = server
            .post("/admin/wallets/adjust")
            .add_header(header::AUTHORIZATION, admin.clone())
            .json(&adjustment)
            .await;
        response.assert_status_ok();
        assert_eq!(response.json::<Value>()["data"]["available_balance"], "750");
    }
    assert_eq!(app.store.ledger_len().await, 2);
}

#[tokio::test]
async fn test_amounts_beyond_four_decimals_are_bad_requests() {
    let app = test_app();
    let server = test_server(&app);
    let admin = bearer(Uuid::new_v4(), true);

    let response = server
        .post("/admin/wallets/adjust")
        .add_header(header::AUTHORIZATION, admin.clone())
        .json(&json!({
            "user_id": Uuid::new_v4(),
            "currency": "NGN",
            "amount": "0.00004",
            "direction": "credit"
        }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(app.store.ledger_len().await, 0);

    server
        .post("/admin/float")
        .add_header(header::AUTHORIZATION, admin)
        .json(&json!({"currency": "NGN", "amount": "10.123456"}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(app.store.admin_balance(Currency::NGN).await.unwrap().balance, dec!(0));
}

#[tokio::test]
async fn test_rebuild_wallet_endpoint() {
    let app = test_app();
    let server = test_server(&app);
    let wallet = app.store.ensure_wallet(Uuid::new_v4(), Currency::USD).await.unwrap();

    server
        .post(&format!("/admin/wallets/{}/rebuild", wallet.id))
        .add_header(header::AUTHORIZATION, bearer(Uuid::new_v4(), true))
        .await
        .assert_status_ok();
    server
        .post("/admin/wallets/not-a-uuid/rebuild")
        .add_header(header::AUTHORIZATION, bearer(Uuid::new_v4(), true))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    server
        .post(&format!("/admin/wallets/{}/rebuild", Uuid::new_v4()))
        .add_header(header::AUTHORIZATION, bearer(Uuid::new_v4(), true))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_payroll_lifecycle_over_http() {
    let app = test_app();
    let server = test_server(&app);
    let fixture = seed_payroll_fixture(&app.store).await;
    let auth = bearer(fixture.payer_id, false);

    server
        .post("/admin/float")
        .add_header(header::AUTHORIZATION, bearer(Uuid::new_v4(), true))
        .json(&json!({"currency": "NGN", "amount": "50000"}))
        .await
        .assert_status_ok();

    let response = server
        .post("/payroll")
        .add_header(header::AUTHORIZATION, auth.clone())
        .json(&due_payroll(&fixture, dec!(12000)))
        .await;
    response.assert_status(StatusCode::CREATED);
    let created: Value = response.json();
    let id = created["data"]["id"].as_str().unwrap().to_string();
    let reference = created["data"]["trx_reference"].as_str().unwrap().to_string();
    assert_eq!(created["data"]["payment_status"], "scheduled");

    let response = server
        .post(&format!("/payroll/trigger/{}", id))
        .add_header(header::AUTHORIZATION, auth.clone())
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["data"]["payment_status"], "initiated");

    let response = server
        .post("/webhook/flutterwave")
        .add_header(verif_hash(), HeaderValue::from_static(WEBHOOK_HASH))
        .json(&json!({"type": "transfer.disburse", "data": {"status": "SUCCESSFUL", "reference": reference}}))
        .await;
    response.assert_status_ok();

    let response = server
        .put(&format!("/payroll/{}", id))
        .add_header(header::AUTHORIZATION, auth.clone())
        .json(&json!({"narration": "changed"}))
        .await;
    response.assert_status(StatusCode::FORBIDDEN);

    let response = server
        .get(&format!("/payroll/{}", id))
        .add_header(header::AUTHORIZATION, auth)
        .await;
    let body: Value = response.json();
    assert_eq!(body["data"]["payment_status"], "completed");
    assert_eq!(body["data"]["narration"], "March salary");

    let response = server
        .get("/admin/float/NGN")
        .add_header(header::AUTHORIZATION, bearer(Uuid::new_v4(), true))
        .await;
    assert_eq!(response.json::<Value>()["data"]["balance"], "38000");
}

#[tokio::test]
async fn test_trigger_error_statuses() {
    let app = test_app();
    let server = test_server(&app);
    let fixture = seed_payroll_fixture(&app.store).await;
    let actor = Actor {
        user_id: fixture.payer_id,
        is_admin: false,
    };
    let auth = bearer(fixture.payer_id, false);

    server
        .post(&format!("/payroll/trigger/{}", Uuid::new_v4()))
        .add_header(header::AUTHORIZATION, auth.clone())
        .await
        .assert_status(StatusCode::NOT_FOUND);

    let mut paystack = due_payroll(&fixture, dec!(10));
    paystack.payment_gateway = "paystack".to_string();
    let paystack = app.state.payroll.create_payroll(&actor, paystack).await.unwrap();
    server
        .post(&format!("/payroll/trigger/{}", paystack.id))
        .add_header(header::AUTHORIZATION, auth.clone())
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);

    let mut later = due_payroll(&fixture, dec!(10));
    later.payment_due = chrono::Utc::now() + chrono::Duration::hours(2);
    let later = app.state.payroll.create_payroll(&actor, later).await.unwrap();
    server
        .post(&format!("/payroll/trigger/{}", later.id))
        .add_header(header::AUTHORIZATION, auth.clone())
        .await
        .assert_status(StatusCode::FORBIDDEN);

    // Float never funded.
    let due = app
        .state
        .payroll
        .create_payroll(&actor, due_payroll(&fixture, dec!(10)))
        .await
        .unwrap();
    let response = server
        .post(&format!("/payroll/trigger/{}", due.id))
        .add_header(header::AUTHORIZATION, auth.clone())
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["code"], "INSUFFICIENT_FLOAT");

    // Gateway refusal surfaces its body and leaves the payroll scheduled.
    app.store.credit_admin_balance(Currency::NGN, dec!(10)).await.unwrap();
    app.gateway.fail_next_transfer(422);
    let response = server
        .post(&format!("/payroll/trigger/{}", due.id))
        .add_header(header::AUTHORIZATION, auth)
        .await;
    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json();
    assert_eq!(body["data"]["message"], "Transfer rejected");
    let stored = app.store.payroll(due.id).await.unwrap().unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Scheduled);
}

#[tokio::test]
async fn test_webhook_signature_and_unknown_events() {
    let app = test_app();
    let server = test_server(&app);
    let event = json!({"type": "transfer.disburse", "data": {"status": "SUCCESSFUL", "reference": "PAY-x"}});

    server
        .post("/webhook/flutterwave")
        .json(&event)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
    server
        .post("/webhook/flutterwave")
        .add_header(verif_hash(), HeaderValue::from_static("wrong"))
        .json(&event)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    // Unknown payroll reference: acknowledged.
    server
        .post("/webhook/flutterwave")
        .add_header(verif_hash(), HeaderValue::from_static(WEBHOOK_HASH))
        .json(&event)
        .await
        .assert_status_ok();

    let response = server
        .post("/webhook/flutterwave")
        .add_header(verif_hash(), HeaderValue::from_static(WEBHOOK_HASH))
        .json(&json!({"type": "refund.completed", "data": {"status": "successful"}}))
        .await;
    response.assert_status_ok();
    assert!(response.json::<Value>()["data"].as_str().unwrap().starts_with("Event ignored"));
}

#[tokio::test]
async fn test_malformed_webhook_body_is_checked_for_signature_first() {
    let app = test_app();
    let server = test_server(&app);
    let garbage = "{\"type\": \"transfer.disburse\", \"data\": ";

    server
        .post("/webhook/flutterwave")
        .text(garbage)
        .content_type("application/json")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    let response = server
        .post("/webhook/flutterwave")
        .add_header(verif_hash(), HeaderValue::from_static(WEBHOOK_HASH))
        .text(garbage)
        .content_type("application/json")
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["message"], "Webhook processed");

    // Well-formed JSON of the wrong shape is acknowledged too.
    server
        .post("/webhook/flutterwave")
        .add_header(verif_hash(), HeaderValue::from_static(WEBHOOK_HASH))
        .json(&json!({"event": "transfer.disburse"}))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn test_billing_routes() {
    let app = test_app();
    let server = test_server(&app);
    let user = seed_user(&app.store, None).await;
    let auth = bearer(user.id, false);

    // No customer yet: profile error.
    let response = server
        .post("/billing/initiate-charge")
        .add_header(header::AUTHORIZATION, auth.clone())
        .json(&json!({"amount": "201", "currency": "NGN"}))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["code"], "PROFILE_INCOMPLETE");

    let response = server
        .post("/billing/initiate-charge")
        .add_header(header::AUTHORIZATION, auth.clone())
        .json(&json!({"amount": "200", "currency": "NGN"}))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["code"], "AMOUNT_TOO_LOW");

    server
        .post("/billing/customer")
        .add_header(header::AUTHORIZATION, auth.clone())
        .json(&json!({}))
        .await
        .assert_status_ok();

    let response = server
        .post("/billing/payment-methods")
        .add_header(header::AUTHORIZATION, auth.clone())
        .json(&json!({
            "type": "bank_account",
            "bank_account": {"account_number": "0123456789", "bank_code": "058"}
        }))
        .await;
    response.assert_status(StatusCode::CREATED);
    let method: Value = response.json();
    assert_eq!(method["data"]["is_default"], true);

    let response = server
        .post("/billing/initiate-charge")
        .add_header(header::AUTHORIZATION, auth.clone())
        .json(&json!({"amount": "1000", "currency": "NGN"}))
        .await;
    response.assert_status_ok();
    let charge: Value = response.json();
    assert_eq!(charge["data"]["next_action"]["type"], "requires_otp");
    let charge_id = charge["data"]["id"].as_str().unwrap().to_string();

    let response = server
        .post(&format!("/billing/charges/{}/authorize", charge_id))
        .add_header(header::AUTHORIZATION, auth.clone())
        .json(&json!({"type": "otp", "code": "123456"}))
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["data"]["status"], "succeeded");

    let response = server
        .get("/billing/wallets")
        .add_header(header::AUTHORIZATION, auth)
        .await;
    let wallets: Value = response.json();
    assert_eq!(wallets["data"][0]["available_balance"], "1000");
}

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Json,
};

use super::{respond, ApiResponse};
use crate::error::ApiError;
use crate::services::flutterwave::{
    verify_webhook_hash, WebhookEvent, EVENT_CHARGE_COMPLETED, EVENT_TRANSFER_DISBURSE,
};
use crate::services::WebhookOutcome;
use crate::AppState;

const SIGNATURE_HEADER: &str = "verif-hash";

/// Processor callbacks. The signature is checked before the body is parsed. Anything
/// the service cannot act on, malformed bodies included, is acknowledged with 200 so
/// the processor stops redelivering it.
pub async fn flutterwave_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ApiResponse<String>>, ApiError> {
    if let Some(secret) = &state.config.gateway.secret_hash {
        let provided = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
        if !verify_webhook_hash(secret, provided) {
            tracing::warn!(body_len = body.len(), "Webhook rejected: bad verif-hash");
            return Err(ApiError::unauthorized("Invalid webhook signature"));
        }
    }

    let event: WebhookEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(body_len = body.len(), "Unparseable webhook body: {}", e);
            let outcome = WebhookOutcome::Ignored("malformed event".to_string());
            return Ok(respond("Webhook processed", outcome.message()));
        }
    };

    tracing::info!(
        event_type = %event.event_type,
        reference = ?event.data.reference,
        status = ?event.data.status,
        "Webhook received"
    );

    let outcome = match event.event_type.as_str() {
        EVENT_TRANSFER_DISBURSE => state.payroll.handle_transfer_event(&event.data).await?,
        EVENT_CHARGE_COMPLETED => state.billing.handle_charge_event(&event.data).await?,
        other => {
            tracing::warn!(event_type = other, "Unhandled webhook event type");
            WebhookOutcome::Ignored(format!("unhandled event type '{}'", other))
        }
    };

    Ok(respond("Webhook processed", outcome.message()))
}

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use super::{path_id, respond, ApiResponse};
use crate::error::ApiError;
use crate::middleware::auth::AuthUser;
use crate::models::{BillingUser, Charge, Currency, LedgerEntry, PaymentMethod, Wallet};
use crate::services::billing::{AuthorizationInput, ChargeInput, CustomerProfile, NewPaymentMethod};
use crate::AppState;

pub async fn sync_customer(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    payload: Option<Json<CustomerProfile>>,
) -> Result<Json<ApiResponse<BillingUser>>, ApiError> {
    let profile = payload.map(|Json(p)| p).unwrap_or_default();
    let user = state.billing.sync_customer(auth_user.user_id, profile).await?;
    Ok(respond("Customer profile synced", user))
}

pub async fn add_payment_method(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(payload): Json<NewPaymentMethod>,
) -> Result<(StatusCode, Json<ApiResponse<PaymentMethod>>), ApiError> {
    let method = state.billing.add_payment_method(auth_user.user_id, payload).await?;
    Ok((StatusCode::CREATED, respond("Payment method added", method)))
}

pub async fn list_payment_methods(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<ApiResponse<Vec<PaymentMethod>>>, ApiError> {
    let methods = state.billing.payment_methods(auth_user.user_id).await?;
    Ok(respond("Payment methods retrieved", methods))
}

pub async fn set_default_payment_method(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(method_id): Path<String>,
) -> Result<Json<ApiResponse<PaymentMethod>>, ApiError> {
    let id = path_id(&method_id, "payment method ID")?;
    let method = state
        .billing
        .set_default_payment_method(auth_user.user_id, id)
        .await?;
    Ok(respond("Default payment method updated", method))
}

pub async fn initiate_charge(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(payload): Json<ChargeInput>,
) -> Result<Json<ApiResponse<Charge>>, ApiError> {
    let charge = state.billing.initiate_charge(auth_user.user_id, payload).await?;
    let message = if charge.next_action.is_some() {
        "Charge requires authorization"
    } else {
        "Charge initiated"
    };
    Ok(respond(message, charge))
}

pub async fn authorize_charge(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(charge_id): Path<String>,
    Json(payload): Json<AuthorizationInput>,
) -> Result<Json<ApiResponse<Charge>>, ApiError> {
    let id = path_id(&charge_id, "charge ID")?;
    let charge = state
        .billing
        .authorize_charge(auth_user.user_id, id, payload)
        .await?;
    Ok(respond("Charge authorization submitted", charge))
}

pub async fn list_wallets(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<ApiResponse<Vec<Wallet>>>, ApiError> {
    let wallets = state.ledger.wallets_for_user(auth_user.user_id).await?;
    Ok(respond("Wallets retrieved", wallets))
}

#[derive(Debug, Serialize)]
pub struct WalletStatement {
    pub wallet: Wallet,
    pub entries: Vec<LedgerEntry>,
}

pub async fn wallet_ledger(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(currency): Path<String>,
) -> Result<Json<ApiResponse<WalletStatement>>, ApiError> {
    let currency: Currency = currency.parse().map_err(ApiError::bad_request)?;
    let (wallet, entries) = state.ledger.statement(auth_user.user_id, currency).await?;
    Ok(respond("Ledger retrieved", WalletStatement { wallet, entries }))
}

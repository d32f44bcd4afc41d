use axum::{
    extract::{Path, State},
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{path_id, respond, ApiResponse};
use crate::error::ApiError;
use crate::models::{
    fits_money_scale, AdminBalance, Currency, EntryType, UserId, Wallet, MONEY_SCALE,
};
use crate::services::{AuditReport, LedgerError, PostingRequest};
use crate::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdjustmentDirection {
    Credit,
    Debit,
}

#[derive(Debug, Deserialize)]
pub struct WalletAdjustment {
    pub user_id: UserId,
    pub currency: Currency,
    pub amount: Decimal,
    pub direction: AdjustmentDirection,
    pub reference: Option<String>,
    /// Operator's key for this adjustment; a resubmission with the same key posts nothing.
    pub external_id: Option<String>,
    pub description: Option<String>,
}

/// Manual credit or debit, posted like any other entry set.
pub async fn adjust_wallet(
    State(state): State<AppState>,
    Json(payload): Json<WalletAdjustment>,
) -> Result<Json<ApiResponse<Wallet>>, ApiError> {
    let reference = payload
        .reference
        .unwrap_or_else(|| format!("adj_{}", uuid::Uuid::new_v4().simple()));
    let mut request = PostingRequest::new(
        payload.user_id,
        payload.currency,
        payload.amount,
        EntryType::Adjustment,
        reference,
    );
    if let Some(external_id) = payload.external_id.filter(|id| !id.trim().is_empty()) {
        request = request.external_id(external_id);
    }
    if let Some(description) = payload.description {
        request = request.description(description);
    }

    let wallet = match payload.direction {
        AdjustmentDirection::Credit => state.ledger.credit_available(request).await?,
        AdjustmentDirection::Debit => state.ledger.debit_available(request).await?,
    };
    Ok(respond("Wallet adjusted", wallet))
}

pub async fn rebuild_wallet(
    State(state): State<AppState>,
    Path(wallet_id): Path<String>,
) -> Result<Json<ApiResponse<Wallet>>, ApiError> {
    let id = path_id(&wallet_id, "wallet ID")?;
    let wallet = state.ledger.rebuild_wallet(id).await?;
    Ok(respond("Wallet rebuilt from ledger", wallet))
}

pub async fn ledger_audit(State(state): State<AppState>) -> Result<Json<ApiResponse<AuditReport>>, ApiError> {
    let report = state.ledger.audit().await?;
    let message = if report.is_clean() {
        "Ledger is consistent"
    } else {
        "Ledger inconsistencies found"
    };
    Ok(respond(message, report))
}

#[derive(Debug, Deserialize, Serialize)]
pub struct FloatFunding {
    pub currency: Currency,
    pub amount: Decimal,
}

pub async fn fund_float(
    State(state): State<AppState>,
    Json(payload): Json<FloatFunding>,
) -> Result<Json<ApiResponse<AdminBalance>>, ApiError> {
    if payload.amount <= Decimal::ZERO {
        return Err(ApiError::bad_request("Amount must be greater than zero"));
    }
    if !fits_money_scale(payload.amount) {
        return Err(LedgerError::AmountPrecision { max: MONEY_SCALE }.into());
    }
    let balance = state
        .payroll_store
        .credit_admin_balance(payload.currency, payload.amount)
        .await?;
    tracing::info!(
        currency = %payload.currency,
        amount = %payload.amount,
        balance = %balance.balance,
        "Admin float funded"
    );
    Ok(respond("Float funded", balance))
}

pub async fn get_float(
    State(state): State<AppState>,
    Path(currency): Path<String>,
) -> Result<Json<ApiResponse<AdminBalance>>, ApiError> {
    let currency: Currency = currency.parse().map_err(ApiError::bad_request)?;
    let balance = state.payroll_store.admin_balance(currency).await?;
    Ok(respond("Float retrieved", balance))
}

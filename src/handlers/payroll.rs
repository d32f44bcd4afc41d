use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};

use super::{path_id, respond, ApiResponse};
use crate::error::ApiError;
use crate::middleware::auth::AuthUser;
use crate::models::{NewPayroll, Payroll, PayrollChanges};
use crate::AppState;

pub async fn create_payroll(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(payload): Json<NewPayroll>,
) -> Result<(StatusCode, Json<ApiResponse<Payroll>>), ApiError> {
    let payroll = state.payroll.create_payroll(&auth_user.actor(), payload).await?;
    Ok((StatusCode::CREATED, respond("Payroll scheduled", payroll)))
}

pub async fn get_payroll(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(payroll_id): Path<String>,
) -> Result<Json<ApiResponse<Payroll>>, ApiError> {
    let id = path_id(&payroll_id, "payroll ID")?;
    let payroll = state.payroll.get_payroll(&auth_user.actor(), id).await?;
    Ok(respond("Payroll retrieved", payroll))
}

pub async fn update_payroll(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(payroll_id): Path<String>,
    Json(changes): Json<PayrollChanges>,
) -> Result<Json<ApiResponse<Payroll>>, ApiError> {
    let id = path_id(&payroll_id, "payroll ID")?;
    let payroll = state
        .payroll
        .update_payroll(&auth_user.actor(), id, changes)
        .await?;
    Ok(respond("Payroll updated", payroll))
}

pub async fn trigger_payment(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(payroll_id): Path<String>,
) -> Result<Json<ApiResponse<Payroll>>, ApiError> {
    let id = path_id(&payroll_id, "payroll ID")?;
    let payroll = state.payroll.trigger_payment(&auth_user.actor(), id).await?;
    Ok(respond("Payment initiated", payroll))
}

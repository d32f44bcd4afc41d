pub mod admin;
pub mod billing;
pub mod payroll;
pub mod webhook;

use axum::Json;
use serde::Serialize;

use crate::error::ApiError;
use crate::models::ids::parse_uuid;

/// Success body: `{message, data?}`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

pub fn respond<T: Serialize>(message: impl Into<String>, data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        message: message.into(),
        data: Some(data),
    })
}

pub(crate) fn path_id(raw: &str, name: &str) -> Result<uuid::Uuid, ApiError> {
    parse_uuid(raw, name).map_err(ApiError::bad_request)
}

pub async fn health_check() -> &'static str {
    "OK"
}

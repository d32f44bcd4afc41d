use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;

use crate::services::{BillingError, GatewayError, LedgerError, PayrollError};
use crate::store::StoreError;

/// Error body: `{message, code?, data?}`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                message: message.into(),
                code: None,
                data: None,
            },
        }
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.body.code = Some(code);
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.body.data = Some(data);
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => ApiError::not_found(format!("{} not found", what)),
            StoreError::InsufficientFunds { available, requested } => {
                ApiError::from(LedgerError::InsufficientFunds { available, requested })
            }
            other => {
                tracing::error!("Database error: {:?}", other);
                ApiError::internal("Database error")
            }
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InvalidAmount | LedgerError::AmountPrecision { .. } => {
                ApiError::bad_request(e.to_string())
            }
            LedgerError::InsufficientFunds { .. } => {
                ApiError::bad_request(e.to_string()).with_code("INSUFFICIENT_FUNDS")
            }
            LedgerError::WalletNotFound => ApiError::not_found(e.to_string()),
            LedgerError::Store(inner) => inner.into(),
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::AmountTooLow { .. } => {
                ApiError::bad_request(e.to_string()).with_code("AMOUNT_TOO_LOW")
            }
            GatewayError::MissingCustomer => {
                ApiError::bad_request(e.to_string()).with_code("PROFILE_INCOMPLETE")
            }
            GatewayError::Api { body, .. } => ApiError::internal("Payment gateway error")
                .with_code("GATEWAY_ERROR")
                .with_data(body),
            other => ApiError::internal(other.to_string()).with_code("GATEWAY_ERROR"),
        }
    }
}

impl From<PayrollError> for ApiError {
    fn from(e: PayrollError) -> Self {
        match e {
            PayrollError::NotFound | PayrollError::BankNotFound | PayrollError::BillingInfoNotFound => {
                ApiError::not_found(e.to_string())
            }
            PayrollError::Forbidden
            | PayrollError::NotYetDue(_)
            | PayrollError::AlreadyResolved(_)
            | PayrollError::NotEditable(_) => ApiError::forbidden(e.to_string()),
            PayrollError::UnsupportedGateway(_) => {
                ApiError::new(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
            }
            PayrollError::InsufficientFloat { .. } => {
                ApiError::bad_request(e.to_string()).with_code("INSUFFICIENT_FLOAT")
            }
            PayrollError::NotDispatched(_)
            | PayrollError::DispatchInProgress(_)
            | PayrollError::ChangedDuringTrigger(_) => {
                ApiError::new(StatusCode::CONFLICT, e.to_string())
            }
            PayrollError::Validation(message) => ApiError::bad_request(message),
            PayrollError::Gateway(inner) => inner.into(),
            PayrollError::Store(inner) => inner.into(),
        }
    }
}

impl From<BillingError> for ApiError {
    fn from(e: BillingError) -> Self {
        match e {
            BillingError::Validation(message) => ApiError::bad_request(message),
            BillingError::UserNotFound
            | BillingError::PaymentMethodNotFound
            | BillingError::ChargeNotFound => ApiError::not_found(e.to_string()),
            BillingError::Gateway(inner) => inner.into(),
            BillingError::Ledger(inner) => inner.into(),
            BillingError::Store(inner) => inner.into(),
        }
    }
}

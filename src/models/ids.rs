//! Type aliases for entity IDs. All are UUIDs; validation happens at parse boundaries (e.g. Uuid::parse_str).

use uuid::Uuid;

pub type UserId = Uuid;
pub type WalletId = Uuid;
pub type EntrySetId = Uuid;
pub type PaymentMethodId = Uuid;
pub type ChargeId = Uuid;
pub type PayrollId = Uuid;
pub type BankId = Uuid;

/// Parse a string into a UUID or return an error message. Use at API boundaries.
pub fn parse_uuid(id: &str, name: &str) -> Result<Uuid, String> {
    Uuid::parse_str(id).map_err(|e| format!("Invalid {}: {}", name, e))
}

/// Trace id and idempotency key of one logical gateway operation.
///
/// Generated once when the operation is first recorded and reused on every retry.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct OperationIds {
    pub trace_id: String,
    pub idempotency_key: String,
}

impl OperationIds {
    pub fn generate() -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string(),
            idempotency_key: Uuid::new_v4().to_string(),
        }
    }
}

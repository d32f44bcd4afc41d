//! Flutterwave payment gateway: wire types, the [`PaymentGateway`] port and its
//! HTTP implementation in [`client`].

pub mod client;
pub mod token;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::models::{ChargeStatus, Currency, NextAction, OperationIds, PaymentMethodType};

pub use client::FlutterwaveClient;

/// Charges at or below this amount are refused before reaching the gateway.
pub const MIN_CHARGE_AMOUNT: Decimal = Decimal::from_parts(200, 0, 0, false, 0);

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Charge amount must be greater than {min}")]
    AmountTooLow { min: Decimal },
    #[error("Please update your profile first: no payment customer is on file")]
    MissingCustomer,
    #[error("Payment gateway request timed out")]
    Timeout,
    #[error("Payment gateway unreachable: {0}")]
    Transport(String),
    #[error("Payment gateway authentication failed: {0}")]
    Auth(String),
    #[error("Payment gateway returned {status}")]
    Api { status: u16, body: serde_json::Value },
    #[error("Unexpected payment gateway response: {0}")]
    Decode(String),
}

impl GatewayError {
    /// Gateway response body, when the gateway answered.
    pub fn body(&self) -> Option<&serde_json::Value> {
        match self {
            GatewayError::Api { body, .. } => Some(body),
            _ => None,
        }
    }

    /// The gateway answered and refused the request; resending it unchanged cannot succeed.
    pub fn is_rejection(&self) -> bool {
        matches!(self, GatewayError::Api { status, .. } if (400..500).contains(status) && *status != 429)
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GatewayError::Timeout
        } else if e.is_decode() {
            GatewayError::Decode(e.to_string())
        } else {
            GatewayError::Transport(e.to_string())
        }
    }
}

/// Refuse charges the gateway would reject anyway, in the order users fix them.
pub fn validate_charge(amount: Decimal, customer_id: Option<&str>) -> Result<(), GatewayError> {
    if amount <= MIN_CHARGE_AMOUNT {
        return Err(GatewayError::AmountTooLow {
            min: MIN_CHARGE_AMOUNT,
        });
    }
    match customer_id {
        Some(id) if !id.trim().is_empty() => Ok(()),
        _ => Err(GatewayError::MissingCustomer),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerName {
    pub first: String,
    pub last: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerRequest {
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<CustomerName>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardDetails {
    pub nonce: String,
    pub encrypted_card_number: String,
    pub encrypted_expiry_month: String,
    pub encrypted_expiry_year: String,
    pub encrypted_cvv: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankAccountDetails {
    pub account_number: String,
    pub bank_code: String,
}

/// Payment method as registered at the gateway. Card fields arrive encrypted by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentMethodDetails {
    Card { card: CardDetails },
    BankAccount { bank_account: BankAccountDetails },
}

impl PaymentMethodDetails {
    pub fn method_type(&self) -> PaymentMethodType {
        match self {
            PaymentMethodDetails::Card { .. } => PaymentMethodType::Card,
            PaymentMethodDetails::BankAccount { .. } => PaymentMethodType::BankAccount,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CardSummary {
    #[serde(default)]
    pub last4: Option<String>,
    #[serde(default)]
    pub network: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayPaymentMethod {
    pub id: String,
    #[serde(rename = "type", default)]
    pub method_type: Option<String>,
    #[serde(default)]
    pub card: Option<CardSummary>,
    #[serde(default)]
    pub bank_account: Option<BankAccountDetails>,
}

impl GatewayPaymentMethod {
    /// Human readable label such as `VISA •••• 4242`.
    pub fn label(&self) -> String {
        if let Some(card) = &self.card {
            let network = card.network.as_deref().unwrap_or("card").to_uppercase();
            return match &card.last4 {
                Some(last4) => format!("{} •••• {}", network, last4),
                None => network,
            };
        }
        if let Some(account) = &self.bank_account {
            let tail: String = account
                .account_number
                .chars()
                .rev()
                .take(4)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            return format!("Bank {} •••• {}", account.bank_code, tail);
        }
        self.method_type.clone().unwrap_or_else(|| "payment method".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChargeRequest {
    pub customer_id: String,
    pub payment_method_id: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub currency: Currency,
    pub reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayCharge {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub next_action: Option<NextAction>,
}

impl GatewayCharge {
    pub fn charge_status(&self) -> ChargeStatus {
        ChargeStatus::from_gateway(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtpCode {
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptedPin {
    pub nonce: String,
    pub encrypted_pin: String,
}

/// Step-up answer submitted through `update_charge`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChargeAuthorization {
    Otp { otp: OtpCode },
    Pin { pin: EncryptedPin },
    #[serde(rename = "external_3ds")]
    External3ds,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferAmount {
    pub applies_to: &'static str,
    #[serde(with = "rust_decimal::serde::float")]
    pub value: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecipientBank {
    pub account_number: String,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recipient {
    pub bank: RecipientBank,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sender {
    pub name: CustomerName,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    pub country: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentInstruction {
    pub source_currency: Currency,
    pub destination_currency: Currency,
    pub amount: TransferAmount,
    pub recipient: Recipient,
    pub sender: Sender,
}

/// Instant bank transfer (`POST /direct-transfers`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferRequest {
    pub action: &'static str,
    #[serde(rename = "type")]
    pub transfer_type: &'static str,
    pub reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub narration: Option<String>,
    pub payment_instruction: PaymentInstruction,
}

impl TransferRequest {
    pub fn bank(
        reference: impl Into<String>,
        narration: Option<String>,
        currency: Currency,
        amount: Decimal,
        recipient: RecipientBank,
        sender: Sender,
    ) -> Self {
        Self {
            action: "instant",
            transfer_type: "bank",
            reference: reference.into(),
            narration,
            payment_instruction: PaymentInstruction {
                source_currency: currency,
                destination_currency: currency,
                amount: TransferAmount {
                    applies_to: "destination_currency",
                    value: amount,
                },
                recipient: Recipient { bank: recipient },
                sender,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayTransfer {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub reference: Option<String>,
}

/// Webhook body: `{type, data: {status, reference, id?}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebhookData {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
}

pub const EVENT_TRANSFER_DISBURSE: &str = "transfer.disburse";
pub const EVENT_CHARGE_COMPLETED: &str = "charge.completed";

/// Compare the `verif-hash` header with the configured secret.
///
/// Both sides are hashed first so the comparison length does not depend on the input.
pub fn verify_webhook_hash(expected: &str, provided: Option<&str>) -> bool {
    let Some(provided) = provided else {
        return false;
    };
    let a = Sha256::digest(expected.as_bytes());
    let b = Sha256::digest(provided.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Outbound port to the payment processor.
///
/// `ids` carries the trace id and idempotency key of the logical operation; the
/// implementation sends the same pair on every retry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a customer. A 409 resolves to the existing customer with that email.
    async fn create_customer(
        &self,
        request: &CustomerRequest,
        ids: &OperationIds,
    ) -> Result<Customer, GatewayError>;
    async fn update_customer(
        &self,
        customer_id: &str,
        request: &CustomerRequest,
        ids: &OperationIds,
    ) -> Result<Customer, GatewayError>;
    async fn search_customer(&self, email: &str) -> Result<Option<Customer>, GatewayError>;
    async fn add_payment_method(
        &self,
        customer_id: &str,
        details: &PaymentMethodDetails,
        ids: &OperationIds,
    ) -> Result<GatewayPaymentMethod, GatewayError>;
    async fn initiate_charge(
        &self,
        request: &ChargeRequest,
        ids: &OperationIds,
    ) -> Result<GatewayCharge, GatewayError>;
    async fn update_charge(
        &self,
        charge_id: &str,
        authorization: &ChargeAuthorization,
        ids: &OperationIds,
    ) -> Result<GatewayCharge, GatewayError>;
    async fn direct_transfer(
        &self,
        request: &TransferRequest,
        ids: &OperationIds,
    ) -> Result<GatewayTransfer, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_charge_validation_order() {
        assert!(matches!(
            validate_charge(dec!(200), Some("cus_1")),
            Err(GatewayError::AmountTooLow { .. })
        ));
        assert!(matches!(
            validate_charge(dec!(200), None),
            Err(GatewayError::AmountTooLow { .. })
        ));
        assert!(matches!(validate_charge(dec!(201), None), Err(GatewayError::MissingCustomer)));
        assert!(matches!(validate_charge(dec!(201), Some(" ")), Err(GatewayError::MissingCustomer)));
        assert!(validate_charge(dec!(200.01), Some("cus_1")).is_ok());
    }

    #[test]
    fn test_payment_method_details_wire_shape() {
        let details = PaymentMethodDetails::BankAccount {
            bank_account: BankAccountDetails {
                account_number: "0123456789".into(),
                bank_code: "044".into(),
            },
        };
        assert_eq!(
            serde_json::to_value(&details).unwrap(),
            json!({"type": "bank_account", "bank_account": {"account_number": "0123456789", "bank_code": "044"}})
        );
    }

    #[test]
    fn test_authorization_wire_shape() {
        let otp = ChargeAuthorization::Otp {
            otp: OtpCode { code: "123456".into() },
        };
        assert_eq!(
            serde_json::to_value(&otp).unwrap(),
            json!({"type": "otp", "otp": {"code": "123456"}})
        );
        assert_eq!(
            serde_json::to_value(ChargeAuthorization::External3ds).unwrap(),
            json!({"type": "external_3ds"})
        );
    }

    #[test]
    fn test_transfer_amount_is_sent_as_number() {
        let request = TransferRequest::bank(
            "PAY-1",
            None,
            Currency::NGN,
            dec!(1500.50),
            RecipientBank {
                account_number: "0690000031".into(),
                code: "044".into(),
            },
            Sender {
                name: CustomerName {
                    first: "Ada".into(),
                    last: "Obi".into(),
                },
                email: "ada@example.com".into(),
                phone_number: None,
                country: "NG".into(),
            },
        );
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["payment_instruction"]["amount"]["value"], json!(1500.5));
        assert_eq!(body["payment_instruction"]["source_currency"], json!("NGN"));
        assert_eq!(body["type"], json!("bank"));
    }

    #[test]
    fn test_payment_method_label() {
        let method = GatewayPaymentMethod {
            id: "pmd_1".into(),
            method_type: Some("card".into()),
            card: Some(CardSummary {
                last4: Some("4242".into()),
                network: Some("visa".into()),
            }),
            bank_account: None,
        };
        assert_eq!(method.label(), "VISA •••• 4242");
    }

    #[test]
    fn test_webhook_hash_comparison() {
        assert!(verify_webhook_hash("s3cret", Some("s3cret")));
        assert!(!verify_webhook_hash("s3cret", Some("s3cre")));
        assert!(!verify_webhook_hash("s3cret", None));
    }

    #[test]
    fn test_webhook_event_tolerates_missing_fields() {
        let event: WebhookEvent =
            serde_json::from_value(json!({"type": "transfer.disburse", "data": {"status": "successful", "reference": "PAY-1"}}))
                .unwrap();
        assert_eq!(event.event_type, EVENT_TRANSFER_DISBURSE);
        assert_eq!(event.data.id, None);
    }
}

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::{ChargeId, Currency, OperationIds, PaymentMethodId, UserId};

/// Columns of the application's user record that the payment path reads or writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingUser {
    pub id: UserId,
    pub email: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub flw_customer_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethodType {
    Card,
    BankAccount,
}

impl PaymentMethodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethodType::Card => "card",
            PaymentMethodType::BankAccount => "bank_account",
        }
    }
}

impl FromStr for PaymentMethodType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "card" => Ok(PaymentMethodType::Card),
            "bank_account" => Ok(PaymentMethodType::BankAccount),
            other => Err(format!("Unknown payment method type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: PaymentMethodId,
    pub user_id: UserId,
    /// Gateway payment-method id.
    pub external_id: String,
    pub method_type: PaymentMethodType,
    /// Display hint such as "visa **** 4242".
    pub label: String,
    pub is_default: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChargeStatus {
    Pending,
    Succeeded,
    Failed,
}

impl ChargeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChargeStatus::Pending => "pending",
            ChargeStatus::Succeeded => "succeeded",
            ChargeStatus::Failed => "failed",
        }
    }

    /// Map a processor status string. Anything not final is still pending.
    pub fn from_gateway(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "succeeded" | "successful" | "success" => ChargeStatus::Succeeded,
            "failed" | "cancelled" | "voided" => ChargeStatus::Failed,
            _ => ChargeStatus::Pending,
        }
    }
}

impl FromStr for ChargeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ChargeStatus::Pending),
            "succeeded" => Ok(ChargeStatus::Succeeded),
            "failed" => Ok(ChargeStatus::Failed),
            other => Err(format!("Unknown charge status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedirectTarget {
    pub url: String,
}

/// Step-up authorization the processor asks for before a charge can complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NextAction {
    RequiresPin,
    RequiresOtp,
    RedirectUrl {
        redirect_url: RedirectTarget,
    },
    RequiresAdditionalFields {
        #[serde(default)]
        requires_additional_fields: serde_json::Value,
    },
    PaymentInstruction {
        #[serde(default)]
        payment_instruction: serde_json::Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Charge {
    pub id: ChargeId,
    pub user_id: UserId,
    pub payment_method_id: PaymentMethodId,
    /// Gateway charge id, known once the processor accepted the charge.
    pub external_id: Option<String>,
    pub reference: String,
    pub operation: OperationIds,
    /// Caller-supplied key; a repeated initiate with the same key resumes this charge.
    pub client_key: Option<String>,
    /// Identity of the authorization request in flight, kept until the gateway answers.
    #[serde(skip)]
    pub authorization: Option<OperationIds>,
    pub amount: Decimal,
    pub currency: Currency,
    pub status: ChargeStatus,
    pub next_action: Option<NextAction>,
    pub settled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Charge {
    pub fn new(
        user_id: UserId,
        payment_method_id: PaymentMethodId,
        amount: Decimal,
        currency: Currency,
    ) -> Self {
        let now = Utc::now();
        let id = uuid::Uuid::new_v4();
        Self {
            id,
            user_id,
            payment_method_id,
            external_id: None,
            reference: format!("chg_{}", id.simple()),
            operation: OperationIds::generate(),
            client_key: None,
            authorization: None,
            amount,
            currency,
            status: ChargeStatus::Pending,
            next_action: None,
            settled_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_client_key(mut self, key: Option<String>) -> Self {
        self.client_key = key;
        self
    }

    /// Same money and method as an earlier request carrying the same client key.
    pub fn matches_request(
        &self,
        payment_method_id: PaymentMethodId,
        amount: Decimal,
        currency: Currency,
    ) -> bool {
        self.payment_method_id == payment_method_id
            && self.amount == amount
            && self.currency == currency
    }
}

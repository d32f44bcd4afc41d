use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::{BankId, Currency, OperationIds, PayrollId, UserId};

/// Only gateway the disbursement path can dispatch through.
pub const FLUTTERWAVE_GATEWAY: &str = "flutterwave";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Scheduled,
    /// Claimed by a trigger while the transfer request is in flight.
    Dispatching,
    Initiated,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Scheduled => "scheduled",
            PaymentStatus::Dispatching => "dispatching",
            PaymentStatus::Initiated => "initiated",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Completed | PaymentStatus::Failed)
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(PaymentStatus::Scheduled),
            "dispatching" => Ok(PaymentStatus::Dispatching),
            "initiated" => Ok(PaymentStatus::Initiated),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(format!("Unknown payment status: {}", other)),
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payroll {
    pub id: PayrollId,
    pub payer_id: UserId,
    pub employee_id: UserId,
    pub bank_id: BankId,
    pub payment_amount: Decimal,
    pub currency: Currency,
    pub payment_due: DateTime<Utc>,
    pub payment_gateway: String,
    pub payment_status: PaymentStatus,
    pub narration: Option<String>,
    pub trace_id: String,
    pub idempotency_key: String,
    pub trx_reference: String,
    pub gateway_transfer_id: Option<String>,
    pub initiated_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payroll {
    pub fn operation_ids(&self) -> OperationIds {
        OperationIds {
            trace_id: self.trace_id.clone(),
            idempotency_key: self.idempotency_key.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPayroll {
    pub employee_id: UserId,
    pub bank_id: BankId,
    pub payment_amount: Decimal,
    pub currency: Currency,
    pub payment_due: DateTime<Utc>,
    #[serde(default = "default_gateway")]
    pub payment_gateway: String,
    pub narration: Option<String>,
}

fn default_gateway() -> String {
    FLUTTERWAVE_GATEWAY.to_string()
}

impl NewPayroll {
    /// Build the record, assigning the operation identity exactly once.
    pub fn into_payroll(self, payer_id: UserId) -> Payroll {
        let now = Utc::now();
        let id = uuid::Uuid::new_v4();
        let ids = OperationIds::generate();
        Payroll {
            id,
            payer_id,
            employee_id: self.employee_id,
            bank_id: self.bank_id,
            payment_amount: self.payment_amount,
            currency: self.currency,
            payment_due: self.payment_due,
            payment_gateway: self.payment_gateway,
            payment_status: PaymentStatus::Scheduled,
            narration: self.narration,
            trace_id: ids.trace_id,
            idempotency_key: ids.idempotency_key,
            trx_reference: format!("PAY-{}", id.simple()),
            gateway_transfer_id: None,
            initiated_at: None,
            resolved_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Editable fields of a scheduled payroll. Operation identity is not among them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PayrollChanges {
    pub bank_id: Option<BankId>,
    pub payment_amount: Option<Decimal>,
    pub currency: Option<Currency>,
    pub payment_due: Option<DateTime<Utc>>,
    pub payment_gateway: Option<String>,
    pub narration: Option<String>,
}

impl PayrollChanges {
    pub fn is_empty(&self) -> bool {
        self.bank_id.is_none()
            && self.payment_amount.is_none()
            && self.currency.is_none()
            && self.payment_due.is_none()
            && self.payment_gateway.is_none()
            && self.narration.is_none()
    }

    pub fn apply(&self, payroll: &mut Payroll) {
        if let Some(bank_id) = self.bank_id {
            payroll.bank_id = bank_id;
        }
        if let Some(amount) = self.payment_amount {
            payroll.payment_amount = amount;
        }
        if let Some(currency) = self.currency {
            payroll.currency = currency;
        }
        if let Some(due) = self.payment_due {
            payroll.payment_due = due;
        }
        if let Some(gateway) = &self.payment_gateway {
            payroll.payment_gateway = gateway.clone();
        }
        if let Some(narration) = &self.narration {
            payroll.narration = Some(narration.clone());
        }
        payroll.updated_at = Utc::now();
    }
}

/// Side effects that accompany a status change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransitionStamp {
    pub gateway_transfer_id: Option<String>,
    pub at: Option<DateTime<Utc>>,
}

/// Destination account of a payroll transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bank {
    pub id: BankId,
    pub user_id: UserId,
    pub account_number: String,
    pub bank_code: String,
    pub account_name: String,
    pub currency: Currency,
}

/// Payer identity sent as the transfer sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingInfo {
    pub user_id: UserId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub country: String,
}

/// Float available to fund outgoing transfers in one currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminBalance {
    pub currency: Currency,
    pub balance: Decimal,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn new_payroll() -> NewPayroll {
        NewPayroll {
            employee_id: uuid::Uuid::new_v4(),
            bank_id: uuid::Uuid::new_v4(),
            payment_amount: dec!(150000),
            currency: Currency::NGN,
            payment_due: Utc::now(),
            payment_gateway: default_gateway(),
            narration: Some("March salary".to_string()),
        }
    }

    #[test]
    fn creation_assigns_distinct_operation_identity() {
        let a = new_payroll().into_payroll(uuid::Uuid::new_v4());
        let b = new_payroll().into_payroll(uuid::Uuid::new_v4());
        assert_eq!(a.payment_status, PaymentStatus::Scheduled);
        assert_ne!(a.trace_id, b.trace_id);
        assert_ne!(a.idempotency_key, b.idempotency_key);
        assert_ne!(a.trx_reference, b.trx_reference);
        assert!(a.trx_reference.starts_with("PAY-"));
    }

    #[test]
    fn changes_leave_identity_untouched() {
        let mut payroll = new_payroll().into_payroll(uuid::Uuid::new_v4());
        let before = payroll.operation_ids();
        let reference = payroll.trx_reference.clone();
        PayrollChanges {
            payment_amount: Some(dec!(175000)),
            narration: Some("March salary + bonus".to_string()),
            ..Default::default()
        }
        .apply(&mut payroll);
        assert_eq!(payroll.payment_amount, dec!(175000));
        assert_eq!(payroll.operation_ids(), before);
        assert_eq!(payroll.trx_reference, reference);
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        assert!(!PaymentStatus::Scheduled.is_terminal());
        assert!(!PaymentStatus::Dispatching.is_terminal());
        assert!(!PaymentStatus::Initiated.is_terminal());
        assert_eq!("dispatching".parse::<PaymentStatus>().unwrap(), PaymentStatus::Dispatching);
        assert!(PaymentStatus::Completed.is_terminal());
        assert!(PaymentStatus::Failed.is_terminal());
    }
}

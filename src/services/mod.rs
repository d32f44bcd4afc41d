pub mod billing;
pub mod flutterwave;
pub mod ledger;
pub mod notifications;
pub mod payroll;
pub mod tasks;

pub use billing::{BillingError, BillingService};
pub use flutterwave::{FlutterwaveClient, GatewayError, PaymentGateway};
pub use ledger::{AuditReport, LedgerError, LedgerService, PostingRequest};
pub use notifications::{LogNotifier, OtpNotifier, SmtpNotifier};
pub use payroll::{PayrollError, PayrollService};
pub use tasks::BestEffort;

use crate::models::UserId;

/// Caller identity as seen by the services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    pub is_admin: bool,
}

impl Actor {
    /// Owners and admins may act on a record.
    pub fn can_access(&self, owner: UserId) -> bool {
        self.is_admin || self.user_id == owner
    }
}

/// What a webhook did. Every variant is acknowledged to the processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Applied(String),
    AlreadyProcessed,
    Ignored(String),
}

impl WebhookOutcome {
    pub fn message(&self) -> String {
        match self {
            WebhookOutcome::Applied(what) => what.clone(),
            WebhookOutcome::AlreadyProcessed => "Event already processed".to_string(),
            WebhookOutcome::Ignored(why) => format!("Event ignored: {}", why),
        }
    }
}

//! Payroll disbursement: `scheduled → dispatching → initiated → completed | failed`.
//!
//! The admin float of the payroll currency is reserved before the payroll is claimed
//! as `dispatching` and kept once it moves to `initiated`. A dispatch error puts it
//! back to `scheduled` and returns the reservation. A transfer that later
//! fails returns the amount to the float on the `initiated → failed` transition.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;

use super::flutterwave::{
    CustomerName, GatewayError, PaymentGateway, RecipientBank, Sender, TransferRequest, WebhookData,
};
use super::{Actor, WebhookOutcome};
use crate::models::{
    fits_money_scale, Currency, NewPayroll, PaymentStatus, Payroll, PayrollChanges, PayrollId,
    TransitionStamp, FLUTTERWAVE_GATEWAY, MONEY_SCALE,
};
use crate::store::{PayrollStore, StoreError};

#[derive(Debug, Error)]
pub enum PayrollError {
    #[error("Payroll not found")]
    NotFound,
    #[error("You do not have access to this payroll")]
    Forbidden,
    #[error("Payment gateway '{0}' is not supported")]
    UnsupportedGateway(String),
    #[error("Payment is not due until {0}")]
    NotYetDue(DateTime<Utc>),
    #[error("Payroll is already {0}")]
    AlreadyResolved(PaymentStatus),
    #[error("Payroll can no longer be edited: status is {0}")]
    NotEditable(PaymentStatus),
    #[error("Destination bank not found")]
    BankNotFound,
    #[error("Billing information for the payer not found")]
    BillingInfoNotFound,
    #[error("Insufficient {currency} float: available {available}, required {required}")]
    InsufficientFloat {
        currency: Currency,
        available: Decimal,
        required: Decimal,
    },
    #[error("Transfer for payroll {0} has not been dispatched yet")]
    NotDispatched(PayrollId),
    #[error("Transfer for payroll {0} is being dispatched")]
    DispatchInProgress(PayrollId),
    #[error("Payroll {0} changed while it was being triggered; retry")]
    ChangedDuringTrigger(PayrollId),
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Map a `transfer.disburse` status onto a final payroll status.
pub fn transfer_outcome(status: &str) -> Option<PaymentStatus> {
    match status.to_ascii_lowercase().as_str() {
        "successful" | "succeeded" | "success" => Some(PaymentStatus::Completed),
        "failed" => Some(PaymentStatus::Failed),
        _ => None,
    }
}

/// How long a `dispatching` claim is honoured before a trigger may take it over.
/// Comfortably longer than the gateway client's timeout times its retries.
const DISPATCH_STALE_AFTER: Duration = Duration::minutes(5);

fn validate_amount(amount: Decimal) -> Result<(), PayrollError> {
    if amount <= Decimal::ZERO {
        return Err(PayrollError::Validation(
            "Payment amount must be greater than zero".to_string(),
        ));
    }
    if !fits_money_scale(amount) {
        return Err(PayrollError::Validation(format!(
            "Payment amount cannot have more than {} decimal places",
            MONEY_SCALE
        )));
    }
    Ok(())
}

fn validate_gateway(gateway: &str) -> Result<(), PayrollError> {
    if gateway.trim().is_empty() {
        return Err(PayrollError::Validation("Payment gateway is required".to_string()));
    }
    Ok(())
}

pub struct PayrollService {
    store: Arc<dyn PayrollStore>,
    gateway: Arc<dyn PaymentGateway>,
}

impl PayrollService {
    pub fn new(store: Arc<dyn PayrollStore>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { store, gateway }
    }

    pub async fn create_payroll(&self, actor: &Actor, input: NewPayroll) -> Result<Payroll, PayrollError> {
        validate_amount(input.payment_amount)?;
        validate_gateway(&input.payment_gateway)?;

        let payroll = self.store.insert_payroll(input.into_payroll(actor.user_id)).await?;
        tracing::info!(
            payroll_id = %payroll.id,
            payer_id = %payroll.payer_id,
            trx_reference = %payroll.trx_reference,
            "Payroll scheduled"
        );
        Ok(payroll)
    }

    pub async fn get_payroll(&self, actor: &Actor, id: PayrollId) -> Result<Payroll, PayrollError> {
        let payroll = self.store.payroll(id).await?.ok_or(PayrollError::NotFound)?;
        if !actor.can_access(payroll.payer_id) {
            return Err(PayrollError::Forbidden);
        }
        Ok(payroll)
    }

    /// Edit a payroll that has not been dispatched yet.
    pub async fn update_payroll(
        &self,
        actor: &Actor,
        id: PayrollId,
        changes: PayrollChanges,
    ) -> Result<Payroll, PayrollError> {
        let payroll = self.get_payroll(actor, id).await?;
        if payroll.payment_status != PaymentStatus::Scheduled {
            return Err(PayrollError::NotEditable(payroll.payment_status));
        }
        if let Some(amount) = changes.payment_amount {
            validate_amount(amount)?;
        }
        if let Some(gateway) = &changes.payment_gateway {
            validate_gateway(gateway)?;
        }
        if changes.is_empty() {
            return Ok(payroll);
        }

        match self.store.update_scheduled_payroll(id, &changes).await? {
            Some(updated) => {
                tracing::info!(payroll_id = %id, "Payroll updated");
                Ok(updated)
            }
            None => {
                // Dispatched between the read and the write.
                let current = self.store.payroll(id).await?.ok_or(PayrollError::NotFound)?;
                Err(PayrollError::NotEditable(current.payment_status))
            }
        }
    }

    /// Dispatch the transfer for a due payroll.
    ///
    /// A `scheduled` payroll reserves the float and is claimed as `dispatching` for the
    /// length of the gateway call, so edits and concurrent triggers are refused until it
    /// is `initiated` or back to `scheduled`. Re-triggering an `initiated` payroll re-sends
    /// the same idempotent request and leaves the float untouched.
    pub async fn trigger_payment(&self, actor: &Actor, id: PayrollId) -> Result<Payroll, PayrollError> {
        let payroll = self.get_payroll(actor, id).await?;

        if payroll.payment_gateway != FLUTTERWAVE_GATEWAY {
            return Err(PayrollError::UnsupportedGateway(payroll.payment_gateway));
        }
        if payroll.payment_status.is_terminal() {
            return Err(PayrollError::AlreadyResolved(payroll.payment_status));
        }
        let now = Utc::now();
        if payroll.payment_due > now {
            return Err(PayrollError::NotYetDue(payroll.payment_due));
        }
        let request = self.transfer_request(&payroll).await?;

        match payroll.payment_status {
            PaymentStatus::Scheduled => self.dispatch_scheduled(payroll, now).await,
            PaymentStatus::Dispatching if now - payroll.updated_at < DISPATCH_STALE_AFTER => {
                Err(PayrollError::DispatchInProgress(id))
            }
            PaymentStatus::Dispatching => {
                // The claiming trigger died mid-call; its reservation is still held.
                tracing::warn!(
                    payroll_id = %id,
                    claimed_at = %payroll.updated_at,
                    "Recovering stale dispatch"
                );
                let transfer_id = self.send_transfer(&payroll, &request).await?;
                self.mark_initiated(&payroll, transfer_id, now).await
            }
            _ => {
                let transfer_id = self.send_transfer(&payroll, &request).await?;
                tracing::info!(payroll_id = %id, transfer_id = %transfer_id, "Transfer re-dispatched");
                Ok(payroll)
            }
        }
    }

    async fn dispatch_scheduled(
        &self,
        payroll: Payroll,
        now: DateTime<Utc>,
    ) -> Result<Payroll, PayrollError> {
        let id = payroll.id;
        self.reserve_float(&payroll).await?;

        let claimed = match self
            .store
            .claim_payroll(id, payroll.payment_amount, payroll.currency)
            .await
        {
            Ok(Some(claimed)) => claimed,
            Ok(None) => {
                // Another trigger claimed it, or an edit changed the amount that was reserved.
                self.release_float(&payroll).await?;
                let current = self.store.payroll(id).await?.ok_or(PayrollError::NotFound)?;
                tracing::info!(payroll_id = %id, status = %current.payment_status, "Payroll claim lost");
                return match current.payment_status {
                    PaymentStatus::Dispatching => Err(PayrollError::DispatchInProgress(id)),
                    PaymentStatus::Scheduled => Err(PayrollError::ChangedDuringTrigger(id)),
                    PaymentStatus::Initiated => Ok(current),
                    status => Err(PayrollError::AlreadyResolved(status)),
                };
            }
            Err(e) => {
                self.release_float(&payroll).await?;
                return Err(e.into());
            }
        };

        // Built from the claimed row: an edit may have landed between the first read and the claim.
        let sent = match self.transfer_request(&claimed).await {
            Ok(request) => self.send_transfer(&claimed, &request).await,
            Err(e) => Err(e),
        };
        let transfer_id = match sent {
            Ok(transfer_id) => transfer_id,
            Err(e) => {
                self.store
                    .transition_payroll(
                        id,
                        &[PaymentStatus::Dispatching],
                        PaymentStatus::Scheduled,
                        TransitionStamp::default(),
                    )
                    .await?;
                self.release_float(&claimed).await?;
                return Err(e);
            }
        };

        self.mark_initiated(&claimed, transfer_id, now).await
    }

    async fn mark_initiated(
        &self,
        payroll: &Payroll,
        transfer_id: String,
        now: DateTime<Utc>,
    ) -> Result<Payroll, PayrollError> {
        let stamp = TransitionStamp {
            gateway_transfer_id: Some(transfer_id.clone()),
            at: Some(now),
        };
        match self
            .store
            .transition_payroll(payroll.id, &[PaymentStatus::Dispatching], PaymentStatus::Initiated, stamp)
            .await?
        {
            Some(updated) => {
                tracing::info!(
                    payroll_id = %payroll.id,
                    transfer_id = %transfer_id,
                    trace_id = %payroll.trace_id,
                    amount = %payroll.payment_amount,
                    currency = %payroll.currency,
                    "Payroll transfer initiated"
                );
                Ok(updated)
            }
            None => {
                // A stale-dispatch recovery recorded the same transfer first.
                tracing::info!(payroll_id = %payroll.id, "Payroll already moved past dispatching");
                self.store.payroll(payroll.id).await?.ok_or(PayrollError::NotFound)
            }
        }
    }

    async fn transfer_request(&self, payroll: &Payroll) -> Result<TransferRequest, PayrollError> {
        let bank = self
            .store
            .bank(payroll.bank_id)
            .await?
            .ok_or(PayrollError::BankNotFound)?;
        let billing = self
            .store
            .billing_info(payroll.payer_id)
            .await?
            .ok_or(PayrollError::BillingInfoNotFound)?;

        let request = TransferRequest::bank(
            payroll.trx_reference.clone(),
            payroll.narration.clone(),
            payroll.currency,
            payroll.payment_amount,
            RecipientBank {
                account_number: bank.account_number,
                code: bank.bank_code,
            },
            Sender {
                name: CustomerName {
                    first: billing.first_name,
                    last: billing.last_name,
                },
                email: billing.email,
                phone_number: billing.phone,
                country: billing.country,
            },
        );
        Ok(request)
    }

    /// Send the transfer and return the gateway transfer id.
    async fn send_transfer(
        &self,
        payroll: &Payroll,
        request: &TransferRequest,
    ) -> Result<String, PayrollError> {
        let ids = payroll.operation_ids();
        match self.gateway.direct_transfer(request, &ids).await {
            Ok(transfer) => Ok(transfer.id),
            Err(e) => {
                tracing::error!(
                    payroll_id = %payroll.id,
                    trace_id = %ids.trace_id,
                    "Transfer dispatch failed: {}",
                    e
                );
                Err(e.into())
            }
        }
    }

    async fn reserve_float(&self, payroll: &Payroll) -> Result<(), PayrollError> {
        if self
            .store
            .debit_admin_balance(payroll.currency, payroll.payment_amount)
            .await?
        {
            return Ok(());
        }
        let float = self.store.admin_balance(payroll.currency).await?;
        tracing::warn!(
            payroll_id = %payroll.id,
            currency = %payroll.currency,
            available = %float.balance,
            required = %payroll.payment_amount,
            "Admin float does not cover payroll"
        );
        Err(PayrollError::InsufficientFloat {
            currency: payroll.currency,
            available: float.balance,
            required: payroll.payment_amount,
        })
    }

    async fn release_float(&self, payroll: &Payroll) -> Result<(), PayrollError> {
        self.store
            .credit_admin_balance(payroll.currency, payroll.payment_amount)
            .await?;
        Ok(())
    }

    /// Apply a `transfer.disburse` event. Replays are no-ops.
    ///
    /// An event for a payroll that is still `scheduled` or `dispatching` is refused so the processor
    /// redelivers it after the dispatch has been recorded.
    pub async fn handle_transfer_event(&self, data: &WebhookData) -> Result<WebhookOutcome, PayrollError> {
        let Some(reference) = data.reference.as_deref() else {
            tracing::warn!("Transfer event without reference");
            return Ok(WebhookOutcome::Ignored("missing reference".to_string()));
        };
        let Some(payroll) = self.store.payroll_by_reference(reference).await? else {
            tracing::warn!(trx_reference = reference, "Transfer event for unknown payroll");
            return Ok(WebhookOutcome::Ignored(format!("unknown payroll {}", reference)));
        };
        let status = data.status.as_deref().unwrap_or_default();
        let Some(target) = transfer_outcome(status) else {
            tracing::info!(payroll_id = %payroll.id, status, "Transfer status is not final");
            return Ok(WebhookOutcome::Ignored(format!("status '{}' is not final", status)));
        };

        match payroll.payment_status {
            PaymentStatus::Scheduled | PaymentStatus::Dispatching => {
                tracing::warn!(payroll_id = %payroll.id, "Transfer event arrived before dispatch was recorded");
                return Err(PayrollError::NotDispatched(payroll.id));
            }
            current if current == target => return Ok(WebhookOutcome::AlreadyProcessed),
            current if current.is_terminal() => {
                tracing::warn!(
                    payroll_id = %payroll.id,
                    current = %current,
                    reported = %target,
                    "Conflicting transfer event for resolved payroll"
                );
                return Ok(WebhookOutcome::AlreadyProcessed);
            }
            _ => {}
        }

        let stamp = TransitionStamp {
            gateway_transfer_id: data.id.clone(),
            at: Some(Utc::now()),
        };
        let Some(updated) = self
            .store
            .transition_payroll(payroll.id, &[PaymentStatus::Initiated], target, stamp)
            .await?
        else {
            return Ok(WebhookOutcome::AlreadyProcessed);
        };

        if target == PaymentStatus::Failed {
            self.release_float(&updated).await?;
        }
        tracing::info!(
            payroll_id = %updated.id,
            trace_id = %updated.trace_id,
            status = %target,
            "Payroll resolved by webhook"
        );
        Ok(WebhookOutcome::Applied(format!("Payroll {}", target)))
    }
}

//! Storage ports for the payment path.
//!
//! Each port is implemented by [`postgres::PgStore`] for production and by
//! [`memory::InMemoryStore`] for tests and local runs. Both implementations apply a
//! [`Posting`] and its wallet update as one atomic unit.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::{
    AdminBalance, Bank, BillingInfo, BillingUser, Charge, ChargeId, ChargeStatus, Currency,
    EntrySetId, LedgerEntry, NextAction, OperationIds, PaymentMethod, PaymentMethodId,
    PaymentStatus, Payroll, PayrollChanges, PayrollId, Posting, TransitionStamp, UserId, Wallet, WalletId,
};

pub use memory::InMemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds { available: Decimal, requested: Decimal },
    #[error("posting legs do not balance")]
    Unbalanced,
    #[error("{0} not found")]
    NotFound(&'static str),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of applying a posting.
#[derive(Debug, Clone, PartialEq)]
pub enum PostOutcome {
    Posted { wallet: Wallet, entries: Vec<LedgerEntry> },
    /// A posting with the same entry type and external id already exists; nothing was written.
    Duplicate { wallet: Wallet },
}

impl PostOutcome {
    pub fn wallet(&self) -> &Wallet {
        match self {
            PostOutcome::Posted { wallet, .. } | PostOutcome::Duplicate { wallet } => wallet,
        }
    }

    pub fn into_wallet(self) -> Wallet {
        match self {
            PostOutcome::Posted { wallet, .. } | PostOutcome::Duplicate { wallet } => wallet,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, PostOutcome::Duplicate { .. })
    }
}

#[async_trait]
pub trait WalletLedgerStore: Send + Sync {
    /// Return the wallet for (user, currency), creating it if absent.
    async fn ensure_wallet(&self, user_id: UserId, currency: Currency) -> StoreResult<Wallet>;
    async fn wallet(&self, id: WalletId) -> StoreResult<Option<Wallet>>;
    async fn wallets_for_user(&self, user_id: UserId) -> StoreResult<Vec<Wallet>>;
    async fn all_wallets(&self) -> StoreResult<Vec<Wallet>>;
    /// Append the posting's legs and update the wallet in one atomic step.
    ///
    /// Fails with [`StoreError::InsufficientFunds`] without writing anything when the
    /// resulting available balance would be negative.
    async fn post(&self, posting: Posting) -> StoreResult<PostOutcome>;
    async fn entries_for_wallet(&self, wallet_id: WalletId) -> StoreResult<Vec<LedgerEntry>>;
    /// The wallet and its legs as of one instant; no posting can land between the two reads.
    async fn wallet_snapshot(
        &self,
        wallet_id: WalletId,
    ) -> StoreResult<Option<(Wallet, Vec<LedgerEntry>)>>;
    async fn entry_set(&self, entry_set: EntrySetId) -> StoreResult<Vec<LedgerEntry>>;
    async fn unbalanced_entry_sets(&self) -> StoreResult<Vec<EntrySetId>>;
    /// Overwrite the wallet projection with the balances replayed from its ledger legs.
    async fn rebuild_wallet(&self, wallet_id: WalletId) -> StoreResult<Wallet>;
}

#[async_trait]
pub trait BillingStore: Send + Sync {
    async fn user(&self, id: UserId) -> StoreResult<Option<BillingUser>>;
    async fn set_customer_id(&self, user_id: UserId, customer_id: &str) -> StoreResult<()>;
    /// Insert a payment method keeping exactly one active default per user.
    async fn insert_payment_method(&self, method: PaymentMethod) -> StoreResult<PaymentMethod>;
    async fn payment_methods(&self, user_id: UserId) -> StoreResult<Vec<PaymentMethod>>;
    async fn set_default_payment_method(
        &self,
        user_id: UserId,
        id: PaymentMethodId,
    ) -> StoreResult<Option<PaymentMethod>>;
    /// Insert a charge. When the user already has a charge under the same client key,
    /// that charge is returned and nothing is written.
    async fn insert_charge(&self, charge: Charge) -> StoreResult<Charge>;
    async fn charge(&self, id: ChargeId) -> StoreResult<Option<Charge>>;
    async fn charge_by_external_id(&self, external_id: &str) -> StoreResult<Option<Charge>>;
    async fn charge_by_reference(&self, reference: &str) -> StoreResult<Option<Charge>>;
    /// Keep `ids` as the identity of the pending authorization unless one is already
    /// recorded; returns the identity to send.
    async fn begin_charge_authorization(
        &self,
        id: ChargeId,
        ids: OperationIds,
    ) -> StoreResult<Option<OperationIds>>;
    /// Store the gateway's answer and clear the pending authorization identity.
    async fn record_charge_response(
        &self,
        id: ChargeId,
        external_id: Option<&str>,
        status: ChargeStatus,
        next_action: Option<&NextAction>,
    ) -> StoreResult<Option<Charge>>;
    /// Set the settlement marker. Returns false when the charge was already settled.
    async fn mark_charge_settled(&self, id: ChargeId) -> StoreResult<bool>;
}

#[async_trait]
pub trait PayrollStore: Send + Sync {
    async fn insert_payroll(&self, payroll: Payroll) -> StoreResult<Payroll>;
    async fn payroll(&self, id: PayrollId) -> StoreResult<Option<Payroll>>;
    async fn payroll_by_reference(&self, trx_reference: &str) -> StoreResult<Option<Payroll>>;
    /// Apply changes only while the payroll is still scheduled. `None` means it was not.
    async fn update_scheduled_payroll(
        &self,
        id: PayrollId,
        changes: &PayrollChanges,
    ) -> StoreResult<Option<Payroll>>;
    /// Move a scheduled payroll to `dispatching` if its amount and currency are still
    /// the ones the float was reserved for. `None` when it is not.
    async fn claim_payroll(
        &self,
        id: PayrollId,
        amount: Decimal,
        currency: Currency,
    ) -> StoreResult<Option<Payroll>>;
    /// Compare-and-set the payment status. `None` means the current status was not in `from`.
    async fn transition_payroll(
        &self,
        id: PayrollId,
        from: &[PaymentStatus],
        to: PaymentStatus,
        stamp: TransitionStamp,
    ) -> StoreResult<Option<Payroll>>;
    async fn bank(&self, id: crate::models::BankId) -> StoreResult<Option<Bank>>;
    async fn billing_info(&self, user_id: UserId) -> StoreResult<Option<BillingInfo>>;
    /// Current float; zero when the currency was never funded.
    async fn admin_balance(&self, currency: Currency) -> StoreResult<AdminBalance>;
    /// Atomically subtract `amount` if the float covers it. Returns false otherwise.
    async fn debit_admin_balance(&self, currency: Currency, amount: Decimal) -> StoreResult<bool>;
    async fn credit_admin_balance(
        &self,
        currency: Currency,
        amount: Decimal,
    ) -> StoreResult<AdminBalance>;
}

//! Accounting engine: every wallet balance change goes through here as a balanced
//! entry set, applied by the store together with the wallet update.

use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::models::ledger::replay_balances;
use crate::models::{
    fits_money_scale, Currency, Direction, EntrySetId, EntryType, LedgerAccount, LedgerEntry,
    Posting, PostingLeg, UserId, Wallet, WalletDrift, WalletId, MONEY_SCALE,
};
use crate::store::{PostOutcome, StoreError, WalletLedgerStore};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Amount must be greater than zero")]
    InvalidAmount,
    #[error("Amount cannot have more than {max} decimal places")]
    AmountPrecision { max: u32 },
    #[error("Insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds { available: Decimal, requested: Decimal },
    #[error("Wallet not found")]
    WalletNotFound,
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for LedgerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InsufficientFunds { available, requested } => {
                LedgerError::InsufficientFunds { available, requested }
            }
            StoreError::NotFound("wallet") => LedgerError::WalletNotFound,
            other => LedgerError::Store(other),
        }
    }
}

/// Input of `credit_available` / `debit_available`.
#[derive(Debug, Clone)]
pub struct PostingRequest {
    pub user_id: UserId,
    pub currency: Currency,
    pub amount: Decimal,
    pub entry_type: EntryType,
    pub reference: String,
    /// Gateway transaction id. Postings sharing (entry_type, external_id) apply once.
    pub external_id: Option<String>,
    pub description: Option<String>,
    pub metadata: serde_json::Value,
}

impl PostingRequest {
    pub fn new(
        user_id: UserId,
        currency: Currency,
        amount: Decimal,
        entry_type: EntryType,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            currency,
            amount,
            entry_type,
            reference: reference.into(),
            external_id: None,
            description: None,
            metadata: serde_json::json!({}),
        }
    }

    pub fn external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Two legs: the user leg in `user_direction` and the offsetting processor leg.
    fn into_posting(self, user_direction: Direction) -> Posting {
        let counter_direction = match user_direction {
            Direction::Credit => Direction::Debit,
            Direction::Debit => Direction::Credit,
        };
        Posting {
            entry_set: Uuid::new_v4(),
            user_id: self.user_id,
            currency: self.currency,
            entry_type: self.entry_type,
            reference: self.reference,
            external_id: self.external_id,
            description: self.description,
            metadata: self.metadata,
            legs: vec![
                PostingLeg {
                    account: LedgerAccount::UserAvailable,
                    direction: user_direction,
                    amount: self.amount,
                },
                PostingLeg {
                    account: self.entry_type.counter_account(),
                    direction: counter_direction,
                    amount: self.amount,
                },
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub wallets_checked: usize,
    pub drift: Vec<WalletDrift>,
    pub unbalanced_entry_sets: Vec<EntrySetId>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.drift.is_empty() && self.unbalanced_entry_sets.is_empty()
    }
}

pub struct LedgerService {
    store: Arc<dyn WalletLedgerStore>,
}

impl LedgerService {
    pub fn new(store: Arc<dyn WalletLedgerStore>) -> Self {
        Self { store }
    }

    pub async fn ensure_wallet(&self, user_id: UserId, currency: Currency) -> Result<Wallet, LedgerError> {
        Ok(self.store.ensure_wallet(user_id, currency).await?)
    }

    /// Increase the available balance and append the matching entry set.
    pub async fn credit_available(&self, request: PostingRequest) -> Result<Wallet, LedgerError> {
        let outcome = self.apply(request, Direction::Credit).await?;
        Ok(outcome.into_wallet())
    }

    /// Decrease the available balance; fails with `InsufficientFunds` and writes nothing
    /// when the balance does not cover `amount`.
    pub async fn debit_available(&self, request: PostingRequest) -> Result<Wallet, LedgerError> {
        let outcome = self.apply(request, Direction::Debit).await?;
        Ok(outcome.into_wallet())
    }

    async fn apply(
        &self,
        request: PostingRequest,
        user_direction: Direction,
    ) -> Result<PostOutcome, LedgerError> {
        if request.amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        if !fits_money_scale(request.amount) {
            return Err(LedgerError::AmountPrecision { max: MONEY_SCALE });
        }

        let amount = request.amount;
        let posting = request.into_posting(user_direction);
        let entry_set = posting.entry_set;
        let (user_id, currency, entry_type) = (posting.user_id, posting.currency, posting.entry_type);

        match self.store.post(posting).await {
            Ok(outcome @ PostOutcome::Posted { .. }) => {
                tracing::info!(
                    %user_id,
                    %currency,
                    %amount,
                    %entry_set,
                    entry_type = entry_type.as_str(),
                    direction = user_direction.as_str(),
                    available = %outcome.wallet().available_balance,
                    "Ledger entry set posted"
                );
                Ok(outcome)
            }
            Ok(outcome) => {
                tracing::info!(%user_id, %currency, entry_type = entry_type.as_str(), "Posting already applied; skipped");
                Ok(outcome)
            }
            Err(e) => {
                if let StoreError::InsufficientFunds { available, requested } = &e {
                    tracing::warn!(%user_id, %currency, %available, %requested, "Debit rejected: insufficient funds");
                } else {
                    tracing::error!(%user_id, %currency, "Error posting ledger entry set: {:?}", e);
                }
                Err(e.into())
            }
        }
    }

    pub async fn wallets_for_user(&self, user_id: UserId) -> Result<Vec<Wallet>, LedgerError> {
        Ok(self.store.wallets_for_user(user_id).await?)
    }

    pub async fn wallet(&self, wallet_id: WalletId) -> Result<Wallet, LedgerError> {
        self.store
            .wallet(wallet_id)
            .await?
            .ok_or(LedgerError::WalletNotFound)
    }

    /// Wallet of (user, currency) with its ledger legs, oldest first.
    pub async fn statement(
        &self,
        user_id: UserId,
        currency: Currency,
    ) -> Result<(Wallet, Vec<LedgerEntry>), LedgerError> {
        let wallet = self
            .store
            .wallets_for_user(user_id)
            .await?
            .into_iter()
            .find(|w| w.currency == currency)
            .ok_or(LedgerError::WalletNotFound)?;
        let entries = self.store.entries_for_wallet(wallet.id).await?;
        Ok((wallet, entries))
    }

    pub async fn entry_set(&self, entry_set: EntrySetId) -> Result<Vec<LedgerEntry>, LedgerError> {
        Ok(self.store.entry_set(entry_set).await?)
    }

    /// Replace the wallet projection with the balances replayed from the ledger.
    pub async fn rebuild_wallet(&self, wallet_id: WalletId) -> Result<Wallet, LedgerError> {
        let before = self.wallet(wallet_id).await?;
        let after = self.store.rebuild_wallet(wallet_id).await?;
        if before.available_balance != after.available_balance
            || before.pending_balance != after.pending_balance
        {
            tracing::warn!(
                %wallet_id,
                projected = %before.available_balance,
                rebuilt = %after.available_balance,
                "Wallet projection corrected from ledger"
            );
        } else {
            tracing::info!(%wallet_id, "Wallet projection matches ledger");
        }
        Ok(after)
    }

    /// Compare every wallet with its ledger replay and list unbalanced entry sets.
    ///
    /// Each wallet is read together with its entries, so postings landing during the
    /// audit never show up as drift.
    pub async fn audit(&self) -> Result<AuditReport, LedgerError> {
        let wallets = self.store.all_wallets().await?;
        let mut drift = Vec::new();
        let mut checked = 0;
        for wallet_id in wallets.iter().map(|w| w.id) {
            let Some((wallet, entries)) = self.store.wallet_snapshot(wallet_id).await? else {
                continue;
            };
            checked += 1;
            let (available, pending) = replay_balances(&entries);
            if available != wallet.available_balance || pending != wallet.pending_balance {
                drift.push(WalletDrift {
                    wallet_id: wallet.id,
                    user_id: wallet.user_id,
                    currency: wallet.currency,
                    projected_available: wallet.available_balance,
                    ledger_available: available,
                    projected_pending: wallet.pending_balance,
                    ledger_pending: pending,
                });
            }
        }
        let unbalanced_entry_sets = self.store.unbalanced_entry_sets().await?;

        Ok(AuditReport {
            wallets_checked: checked,
            drift,
            unbalanced_entry_sets,
        })
    }
}

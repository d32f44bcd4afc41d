use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{
    BillingStore, PayrollStore, PostOutcome, StoreError, StoreResult, WalletLedgerStore,
};
use crate::models::ledger::replay_balances;
use crate::models::{
    AdminBalance, Bank, BankId, BillingInfo, BillingUser, Charge, ChargeId, ChargeStatus,
    Currency, Direction, EntrySetId, LedgerEntry, NextAction, OperationIds, PaymentMethod,
    PaymentMethodId, PaymentStatus, Payroll, PayrollChanges, PayrollId, Posting, TransitionStamp, UserId, Wallet,
    WalletId,
};

#[derive(Default)]
struct MemoryState {
    wallets: HashMap<WalletId, Wallet>,
    wallet_keys: HashMap<(UserId, Currency), WalletId>,
    entries: Vec<LedgerEntry>,
    users: HashMap<UserId, BillingUser>,
    payment_methods: Vec<PaymentMethod>,
    charges: HashMap<ChargeId, Charge>,
    payrolls: HashMap<PayrollId, Payroll>,
    banks: HashMap<BankId, Bank>,
    billing_info: HashMap<UserId, BillingInfo>,
    admin_balances: HashMap<Currency, AdminBalance>,
}

impl MemoryState {
    fn ensure_wallet(&mut self, user_id: UserId, currency: Currency) -> WalletId {
        if let Some(id) = self.wallet_keys.get(&(user_id, currency)) {
            return *id;
        }
        let wallet = Wallet::new(user_id, currency);
        let id = wallet.id;
        self.wallet_keys.insert((user_id, currency), id);
        self.wallets.insert(id, wallet);
        id
    }

    fn wallet(&self, id: WalletId) -> StoreResult<Wallet> {
        self.wallets.get(&id).cloned().ok_or(StoreError::NotFound("wallet"))
    }
}

/// A thread-safe in-memory implementation of every storage port.
///
/// All state sits behind one `RwLock`; a posting holds the write lock for its whole
/// check-and-write, so concurrent debits of the same wallet are serialized.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, user: BillingUser) {
        self.state.write().await.users.insert(user.id, user);
    }

    pub async fn insert_bank(&self, bank: Bank) {
        self.state.write().await.banks.insert(bank.id, bank);
    }

    pub async fn upsert_billing_info(&self, info: BillingInfo) {
        self.state.write().await.billing_info.insert(info.user_id, info);
    }

    pub async fn ledger_len(&self) -> usize {
        self.state.read().await.entries.len()
    }
}

#[async_trait]
impl WalletLedgerStore for InMemoryStore {
    async fn ensure_wallet(&self, user_id: UserId, currency: Currency) -> StoreResult<Wallet> {
        let mut state = self.state.write().await;
        let id = state.ensure_wallet(user_id, currency);
        state.wallet(id)
    }

    async fn wallet(&self, id: WalletId) -> StoreResult<Option<Wallet>> {
        Ok(self.state.read().await.wallets.get(&id).cloned())
    }

    async fn wallets_for_user(&self, user_id: UserId) -> StoreResult<Vec<Wallet>> {
        let state = self.state.read().await;
        let mut wallets: Vec<Wallet> = state
            .wallets
            .values()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect();
        wallets.sort_by_key(|w| w.currency.as_str());
        Ok(wallets)
    }

    async fn all_wallets(&self) -> StoreResult<Vec<Wallet>> {
        Ok(self.state.read().await.wallets.values().cloned().collect())
    }

    async fn post(&self, posting: Posting) -> StoreResult<PostOutcome> {
        if !posting.is_balanced() {
            return Err(StoreError::Unbalanced);
        }

        let mut state = self.state.write().await;
        let wallet_id = state.ensure_wallet(posting.user_id, posting.currency);

        if let Some(external_id) = posting.external_id.as_deref() {
            let seen = state.entries.iter().any(|e| {
                e.entry_type == posting.entry_type && e.external_id.as_deref() == Some(external_id)
            });
            if seen {
                return Ok(PostOutcome::Duplicate { wallet: state.wallet(wallet_id)? });
            }
        }

        let current = state.wallet(wallet_id)?;
        let available_delta = posting.available_delta();
        let available = current.available_balance + available_delta;
        let pending = current.pending_balance + posting.pending_delta();
        if available < Decimal::ZERO {
            return Err(StoreError::InsufficientFunds {
                available: current.available_balance,
                requested: -available_delta,
            });
        }

        let entries = posting.into_entries(wallet_id, available, pending);
        state.entries.extend(entries.iter().cloned());

        let wallet = state
            .wallets
            .get_mut(&wallet_id)
            .ok_or(StoreError::NotFound("wallet"))?;
        wallet.available_balance = available;
        wallet.pending_balance = pending;
        wallet.version += 1;
        wallet.updated_at = Utc::now();

        Ok(PostOutcome::Posted { wallet: wallet.clone(), entries })
    }

    async fn entries_for_wallet(&self, wallet_id: WalletId) -> StoreResult<Vec<LedgerEntry>> {
        let state = self.state.read().await;
        Ok(state
            .entries
            .iter()
            .filter(|e| e.wallet_id == wallet_id)
            .cloned()
            .collect())
    }

    async fn wallet_snapshot(
        &self,
        wallet_id: WalletId,
    ) -> StoreResult<Option<(Wallet, Vec<LedgerEntry>)>> {
        let state = self.state.read().await;
        let Some(wallet) = state.wallets.get(&wallet_id).cloned() else {
            return Ok(None);
        };
        let entries = state
            .entries
            .iter()
            .filter(|e| e.wallet_id == wallet_id)
            .cloned()
            .collect();
        Ok(Some((wallet, entries)))
    }

    async fn entry_set(&self, entry_set: EntrySetId) -> StoreResult<Vec<LedgerEntry>> {
        let state = self.state.read().await;
        Ok(state
            .entries
            .iter()
            .filter(|e| e.entry_set == entry_set)
            .cloned()
            .collect())
    }

    async fn unbalanced_entry_sets(&self) -> StoreResult<Vec<EntrySetId>> {
        let state = self.state.read().await;
        let mut sums: BTreeMap<EntrySetId, Decimal> = BTreeMap::new();
        for entry in &state.entries {
            let signed = match entry.direction {
                Direction::Debit => entry.amount,
                Direction::Credit => -entry.amount,
            };
            *sums.entry(entry.entry_set).or_default() += signed;
        }
        Ok(sums
            .into_iter()
            .filter(|(_, sum)| !sum.is_zero())
            .map(|(id, _)| id)
            .collect())
    }

    async fn rebuild_wallet(&self, wallet_id: WalletId) -> StoreResult<Wallet> {
        let mut state = self.state.write().await;
        let (available, pending) =
            replay_balances(state.entries.iter().filter(|e| e.wallet_id == wallet_id));
        let wallet = state
            .wallets
            .get_mut(&wallet_id)
            .ok_or(StoreError::NotFound("wallet"))?;
        wallet.available_balance = available;
        wallet.pending_balance = pending;
        wallet.version += 1;
        wallet.updated_at = Utc::now();
        Ok(wallet.clone())
    }
}

#[async_trait]
impl BillingStore for InMemoryStore {
    async fn user(&self, id: UserId) -> StoreResult<Option<BillingUser>> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn set_customer_id(&self, user_id: UserId, customer_id: &str) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let user = state.users.get_mut(&user_id).ok_or(StoreError::NotFound("user"))?;
        user.flw_customer_id = Some(customer_id.to_string());
        Ok(())
    }

    async fn insert_payment_method(&self, mut method: PaymentMethod) -> StoreResult<PaymentMethod> {
        let mut state = self.state.write().await;
        let has_active = state
            .payment_methods
            .iter()
            .any(|m| m.user_id == method.user_id && m.is_active);
        if !has_active {
            method.is_default = true;
        }
        if method.is_default {
            for existing in state
                .payment_methods
                .iter_mut()
                .filter(|m| m.user_id == method.user_id)
            {
                existing.is_default = false;
            }
        }
        state.payment_methods.push(method.clone());
        Ok(method)
    }

    async fn payment_methods(&self, user_id: UserId) -> StoreResult<Vec<PaymentMethod>> {
        let state = self.state.read().await;
        Ok(state
            .payment_methods
            .iter()
            .filter(|m| m.user_id == user_id && m.is_active)
            .cloned()
            .collect())
    }

    async fn set_default_payment_method(
        &self,
        user_id: UserId,
        id: PaymentMethodId,
    ) -> StoreResult<Option<PaymentMethod>> {
        let mut state = self.state.write().await;
        let exists = state
            .payment_methods
            .iter()
            .any(|m| m.id == id && m.user_id == user_id && m.is_active);
        if !exists {
            return Ok(None);
        }
        let mut selected = None;
        for method in state.payment_methods.iter_mut().filter(|m| m.user_id == user_id) {
            method.is_default = method.id == id;
            if method.is_default {
                selected = Some(method.clone());
            }
        }
        Ok(selected)
    }

    async fn insert_charge(&self, charge: Charge) -> StoreResult<Charge> {
        let mut state = self.state.write().await;
        if let Some(key) = charge.client_key.as_deref() {
            let existing = state
                .charges
                .values()
                .find(|c| c.user_id == charge.user_id && c.client_key.as_deref() == Some(key));
            if let Some(existing) = existing {
                return Ok(existing.clone());
            }
        }
        state.charges.insert(charge.id, charge.clone());
        Ok(charge)
    }

    async fn charge(&self, id: ChargeId) -> StoreResult<Option<Charge>> {
        Ok(self.state.read().await.charges.get(&id).cloned())
    }

    async fn charge_by_external_id(&self, external_id: &str) -> StoreResult<Option<Charge>> {
        let state = self.state.read().await;
        Ok(state
            .charges
            .values()
            .find(|c| c.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn charge_by_reference(&self, reference: &str) -> StoreResult<Option<Charge>> {
        let state = self.state.read().await;
        Ok(state.charges.values().find(|c| c.reference == reference).cloned())
    }

    async fn begin_charge_authorization(
        &self,
        id: ChargeId,
        ids: OperationIds,
    ) -> StoreResult<Option<OperationIds>> {
        let mut state = self.state.write().await;
        let Some(charge) = state.charges.get_mut(&id) else {
            return Ok(None);
        };
        let ids = charge.authorization.get_or_insert(ids).clone();
        charge.updated_at = Utc::now();
        Ok(Some(ids))
    }

    async fn record_charge_response(
        &self,
        id: ChargeId,
        external_id: Option<&str>,
        status: ChargeStatus,
        next_action: Option<&NextAction>,
    ) -> StoreResult<Option<Charge>> {
        let mut state = self.state.write().await;
        let Some(charge) = state.charges.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(external_id) = external_id {
            charge.external_id = Some(external_id.to_string());
        }
        charge.status = status;
        charge.next_action = next_action.cloned();
        charge.authorization = None;
        charge.updated_at = Utc::now();
        Ok(Some(charge.clone()))
    }

    async fn mark_charge_settled(&self, id: ChargeId) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        let charge = state.charges.get_mut(&id).ok_or(StoreError::NotFound("charge"))?;
        if charge.settled_at.is_some() {
            return Ok(false);
        }
        charge.settled_at = Some(Utc::now());
        Ok(true)
    }
}

#[async_trait]
impl PayrollStore for InMemoryStore {
    async fn insert_payroll(&self, payroll: Payroll) -> StoreResult<Payroll> {
        self.state.write().await.payrolls.insert(payroll.id, payroll.clone());
        Ok(payroll)
    }

    async fn payroll(&self, id: PayrollId) -> StoreResult<Option<Payroll>> {
        Ok(self.state.read().await.payrolls.get(&id).cloned())
    }

    async fn payroll_by_reference(&self, trx_reference: &str) -> StoreResult<Option<Payroll>> {
        let state = self.state.read().await;
        Ok(state
            .payrolls
            .values()
            .find(|p| p.trx_reference == trx_reference)
            .cloned())
    }

    async fn update_scheduled_payroll(
        &self,
        id: PayrollId,
        changes: &PayrollChanges,
    ) -> StoreResult<Option<Payroll>> {
        let mut state = self.state.write().await;
        match state.payrolls.get_mut(&id) {
            Some(payroll) if payroll.payment_status == PaymentStatus::Scheduled => {
                changes.apply(payroll);
                Ok(Some(payroll.clone()))
            }
            Some(_) => Ok(None),
            None => Err(StoreError::NotFound("payroll")),
        }
    }

    async fn claim_payroll(
        &self,
        id: PayrollId,
        amount: Decimal,
        currency: Currency,
    ) -> StoreResult<Option<Payroll>> {
        let mut state = self.state.write().await;
        match state.payrolls.get_mut(&id) {
            Some(payroll)
                if payroll.payment_status == PaymentStatus::Scheduled
                    && payroll.payment_amount == amount
                    && payroll.currency == currency =>
            {
                payroll.payment_status = PaymentStatus::Dispatching;
                payroll.updated_at = Utc::now();
                Ok(Some(payroll.clone()))
            }
            Some(_) => Ok(None),
            None => Err(StoreError::NotFound("payroll")),
        }
    }

    async fn transition_payroll(
        &self,
        id: PayrollId,
        from: &[PaymentStatus],
        to: PaymentStatus,
        stamp: TransitionStamp,
    ) -> StoreResult<Option<Payroll>> {
        let mut state = self.state.write().await;
        let payroll = state.payrolls.get_mut(&id).ok_or(StoreError::NotFound("payroll"))?;
        if !from.contains(&payroll.payment_status) {
            return Ok(None);
        }
        let at = stamp.at.unwrap_or_else(Utc::now);
        payroll.payment_status = to;
        if let Some(transfer_id) = stamp.gateway_transfer_id {
            payroll.gateway_transfer_id = Some(transfer_id);
        }
        match to {
            PaymentStatus::Initiated => {
                payroll.initiated_at.get_or_insert(at);
            }
            PaymentStatus::Completed | PaymentStatus::Failed => payroll.resolved_at = Some(at),
            PaymentStatus::Scheduled | PaymentStatus::Dispatching => {}
        }
        payroll.updated_at = Utc::now();
        Ok(Some(payroll.clone()))
    }

    async fn bank(&self, id: BankId) -> StoreResult<Option<Bank>> {
        Ok(self.state.read().await.banks.get(&id).cloned())
    }

    async fn billing_info(&self, user_id: UserId) -> StoreResult<Option<BillingInfo>> {
        Ok(self.state.read().await.billing_info.get(&user_id).cloned())
    }

    async fn admin_balance(&self, currency: Currency) -> StoreResult<AdminBalance> {
        let state = self.state.read().await;
        Ok(state.admin_balances.get(&currency).cloned().unwrap_or(AdminBalance {
            currency,
            balance: Decimal::ZERO,
            updated_at: Utc::now(),
        }))
    }

    async fn debit_admin_balance(&self, currency: Currency, amount: Decimal) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        match state.admin_balances.get_mut(&currency) {
            Some(float) if float.balance >= amount => {
                float.balance -= amount;
                float.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn credit_admin_balance(
        &self,
        currency: Currency,
        amount: Decimal,
    ) -> StoreResult<AdminBalance> {
        let mut state = self.state.write().await;
        let float = state.admin_balances.entry(currency).or_insert_with(|| AdminBalance {
            currency,
            balance: Decimal::ZERO,
            updated_at: Utc::now(),
        });
        float.balance += amount;
        float.updated_at = Utc::now();
        Ok(float.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntryType, LedgerAccount, PaymentMethodType, PostingLeg};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn transfer(user_id: UserId, amount: Decimal, direction: Direction, external_id: Option<&str>) -> Posting {
        let counter = match direction {
            Direction::Credit => Direction::Debit,
            Direction::Debit => Direction::Credit,
        };
        Posting {
            entry_set: Uuid::new_v4(),
            user_id,
            currency: Currency::NGN,
            entry_type: EntryType::Charge,
            reference: "ref".to_string(),
            external_id: external_id.map(str::to_string),
            description: None,
            metadata: serde_json::json!({}),
            legs: vec![
                PostingLeg { account: LedgerAccount::UserAvailable, direction, amount },
                PostingLeg { account: LedgerAccount::ProcessorClearing, direction: counter, amount },
            ],
        }
    }

    #[tokio::test]
    async fn test_ensure_wallet_is_idempotent() {
        let store = InMemoryStore::new();
        let user = Uuid::new_v4();
        let a = store.ensure_wallet(user, Currency::NGN).await.unwrap();
        let b = store.ensure_wallet(user, Currency::NGN).await.unwrap();
        let c = store.ensure_wallet(user, Currency::USD).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(store.all_wallets().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_post_rejects_overdraft_without_writing() {
        let store = InMemoryStore::new();
        let user = Uuid::new_v4();
        store.post(transfer(user, dec!(100), Direction::Credit, None)).await.unwrap();

        let err = store.post(transfer(user, dec!(101), Direction::Debit, None)).await.unwrap_err();
        assert!(matches!(err, StoreError::InsufficientFunds { available, requested }
            if available == dec!(100) && requested == dec!(101)));
        assert_eq!(store.ledger_len().await, 2);
    }

    #[tokio::test]
    async fn test_post_with_seen_external_id_is_duplicate() {
        let store = InMemoryStore::new();
        let user = Uuid::new_v4();
        let first = store.post(transfer(user, dec!(10), Direction::Credit, Some("flw-1"))).await.unwrap();
        let second = store.post(transfer(user, dec!(10), Direction::Credit, Some("flw-1"))).await.unwrap();
        assert!(!first.is_duplicate());
        assert!(second.is_duplicate());
        assert_eq!(second.wallet().available_balance, dec!(10));
        assert_eq!(store.ledger_len().await, 2);
    }

    #[tokio::test]
    async fn test_rebuild_restores_projection_from_ledger() {
        let store = InMemoryStore::new();
        let user = Uuid::new_v4();
        let wallet = store.post(transfer(user, dec!(70), Direction::Credit, None)).await.unwrap().into_wallet();
        store.post(transfer(user, dec!(20), Direction::Debit, None)).await.unwrap();

        store.state.write().await.wallets.get_mut(&wallet.id).unwrap().available_balance = dec!(999);
        let rebuilt = store.rebuild_wallet(wallet.id).await.unwrap();
        assert_eq!(rebuilt.available_balance, dec!(50));
    }

    #[tokio::test]
    async fn test_first_payment_method_becomes_default() {
        let store = InMemoryStore::new();
        let user = Uuid::new_v4();
        let method = |is_default| PaymentMethod {
            id: Uuid::new_v4(),
            user_id: user,
            external_id: format!("pmd_{}", Uuid::new_v4().simple()),
            method_type: PaymentMethodType::Card,
            label: "visa **** 4242".to_string(),
            is_default,
            is_active: true,
            created_at: Utc::now(),
        };

        let first = store.insert_payment_method(method(false)).await.unwrap();
        assert!(first.is_default);

        let second = store.insert_payment_method(method(true)).await.unwrap();
        let defaults: Vec<_> = store
            .payment_methods(user)
            .await
            .unwrap()
            .into_iter()
            .filter(|m| m.is_default)
            .collect();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].id, second.id);

        store.set_default_payment_method(user, first.id).await.unwrap().unwrap();
        let defaults: Vec<_> = store
            .payment_methods(user)
            .await
            .unwrap()
            .into_iter()
            .filter(|m| m.is_default)
            .map(|m| m.id)
            .collect();
        assert_eq!(defaults, vec![first.id]);
    }

    #[tokio::test]
    async fn test_charge_with_seen_client_key_returns_stored_row() {
        let store = InMemoryStore::new();
        let user = Uuid::new_v4();
        let method = Uuid::new_v4();
        let keyed = |user_id| {
            Charge::new(user_id, method, dec!(500), Currency::NGN).with_client_key(Some("k-1".into()))
        };

        let first = store.insert_charge(keyed(user)).await.unwrap();
        let again = store.insert_charge(keyed(user)).await.unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(again.reference, first.reference);

        let other_user = store.insert_charge(keyed(Uuid::new_v4())).await.unwrap();
        assert_ne!(other_user.id, first.id);
        assert_eq!(store.state.read().await.charges.len(), 2);
    }

    #[tokio::test]
    async fn test_authorization_ids_survive_until_answered() {
        let store = InMemoryStore::new();
        let charge = Charge::new(Uuid::new_v4(), Uuid::new_v4(), dec!(50), Currency::NGN);
        let charge = store.insert_charge(charge).await.unwrap();

        let begin = || store.begin_charge_authorization(charge.id, OperationIds::generate());
        let first = begin().await.unwrap().unwrap();
        let again = begin().await.unwrap().unwrap();
        assert_eq!(first, again);

        store
            .record_charge_response(charge.id, Some("flw-9"), ChargeStatus::Succeeded, None)
            .await
            .unwrap();
        let next = begin().await.unwrap().unwrap();
        assert_ne!(next, first);
    }

    #[tokio::test]
    async fn test_admin_balance_debit_is_conditional() {
        let store = InMemoryStore::new();
        assert!(!store.debit_admin_balance(Currency::NGN, dec!(1)).await.unwrap());
        store.credit_admin_balance(Currency::NGN, dec!(500)).await.unwrap();
        assert!(store.debit_admin_balance(Currency::NGN, dec!(500)).await.unwrap());
        assert!(!store.debit_admin_balance(Currency::NGN, dec!(0.01)).await.unwrap());
        assert_eq!(store.admin_balance(Currency::NGN).await.unwrap().balance, Decimal::ZERO);
    }
}

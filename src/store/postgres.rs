use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, Row};
use std::str::FromStr;

use super::{
    BillingStore, PayrollStore, PostOutcome, StoreError, StoreResult, WalletLedgerStore,
};
use crate::database::DatabasePool;
use crate::models::ledger::replay_balances;
use crate::models::{
    AdminBalance, Bank, BankId, BillingInfo, BillingUser, Charge, ChargeId, ChargeStatus,
    Currency, EntrySetId, LedgerEntry, NextAction, OperationIds, PaymentMethod, PaymentMethodId,
    PaymentStatus, Payroll, PayrollChanges, PayrollId, Posting, TransitionStamp, UserId, Wallet,
    WalletId,
};

const EXTERNAL_LEG_CONSTRAINT: &str = "ledger_entries_external_leg_key";

const WALLET_COLUMNS: &str =
    "id, user_id, currency, available_balance, pending_balance, version, created_at, updated_at";

const LEDGER_COLUMNS: &str = "id, entry_set, user_id, wallet_id, currency, amount, direction, account, \
     entry_type, reference, external_id, description, metadata, balance_after, created_at";

const CHARGE_COLUMNS: &str = "id, user_id, payment_method_id, external_id, reference, trace_id, \
     idempotency_key, client_key, auth_trace_id, auth_idempotency_key, amount, currency, status, \
     next_action, settled_at, created_at, updated_at";

const PAYROLL_COLUMNS: &str = "id, payer_id, employee_id, bank_id, payment_amount, currency, \
     payment_due, payment_gateway, payment_status, narration, trace_id, idempotency_key, \
     trx_reference, gateway_transfer_id, initiated_at, resolved_at, created_at, updated_at";

/// Decode a text column through `FromStr`.
fn parsed<T>(row: &PgRow, column: &str) -> Result<T, sqlx::Error>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|e: String| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: e.into(),
    })
}

impl<'r> FromRow<'r, PgRow> for Wallet {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            currency: parsed(row, "currency")?,
            available_balance: row.try_get("available_balance")?,
            pending_balance: row.try_get("pending_balance")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for LedgerEntry {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            entry_set: row.try_get("entry_set")?,
            user_id: row.try_get("user_id")?,
            wallet_id: row.try_get("wallet_id")?,
            currency: parsed(row, "currency")?,
            amount: row.try_get("amount")?,
            direction: parsed(row, "direction")?,
            account: parsed(row, "account")?,
            entry_type: parsed(row, "entry_type")?,
            reference: row.try_get("reference")?,
            external_id: row.try_get("external_id")?,
            description: row.try_get("description")?,
            metadata: row.try_get("metadata")?,
            balance_after: row.try_get("balance_after")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for BillingUser {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            name: row.try_get("name")?,
            phone: row.try_get("phone")?,
            flw_customer_id: row.try_get("flw_customer_id")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for PaymentMethod {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            external_id: row.try_get("external_id")?,
            method_type: parsed(row, "method_type")?,
            label: row.try_get("label")?,
            is_default: row.try_get("is_default")?,
            is_active: row.try_get("is_active")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for Charge {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let next_action: Option<serde_json::Value> = row.try_get("next_action")?;
        let next_action = next_action
            .map(serde_json::from_value::<NextAction>)
            .transpose()
            .map_err(|e| sqlx::Error::ColumnDecode {
                index: "next_action".to_string(),
                source: Box::new(e),
            })?;
        let auth_trace_id: Option<String> = row.try_get("auth_trace_id")?;
        let auth_idempotency_key: Option<String> = row.try_get("auth_idempotency_key")?;
        let authorization = auth_trace_id
            .zip(auth_idempotency_key)
            .map(|(trace_id, idempotency_key)| OperationIds { trace_id, idempotency_key });
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            payment_method_id: row.try_get("payment_method_id")?,
            external_id: row.try_get("external_id")?,
            reference: row.try_get("reference")?,
            operation: OperationIds {
                trace_id: row.try_get("trace_id")?,
                idempotency_key: row.try_get("idempotency_key")?,
            },
            client_key: row.try_get("client_key")?,
            authorization,
            amount: row.try_get("amount")?,
            currency: parsed(row, "currency")?,
            status: parsed(row, "status")?,
            next_action,
            settled_at: row.try_get("settled_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for Payroll {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            payer_id: row.try_get("payer_id")?,
            employee_id: row.try_get("employee_id")?,
            bank_id: row.try_get("bank_id")?,
            payment_amount: row.try_get("payment_amount")?,
            currency: parsed(row, "currency")?,
            payment_due: row.try_get("payment_due")?,
            payment_gateway: row.try_get("payment_gateway")?,
            payment_status: parsed(row, "payment_status")?,
            narration: row.try_get("narration")?,
            trace_id: row.try_get("trace_id")?,
            idempotency_key: row.try_get("idempotency_key")?,
            trx_reference: row.try_get("trx_reference")?,
            gateway_transfer_id: row.try_get("gateway_transfer_id")?,
            initiated_at: row.try_get("initiated_at")?,
            resolved_at: row.try_get("resolved_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for Bank {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            account_number: row.try_get("account_number")?,
            bank_code: row.try_get("bank_code")?,
            account_name: row.try_get("account_name")?,
            currency: parsed(row, "currency")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for BillingInfo {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            user_id: row.try_get("user_id")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            email: row.try_get("email")?,
            phone: row.try_get("phone")?,
            country: row.try_get("country")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for AdminBalance {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            currency: parsed(row, "currency")?,
            balance: row.try_get("balance")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

fn is_constraint_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db) => db.constraint() == Some(constraint),
        _ => false,
    }
}

/// PostgreSQL implementation of the storage ports.
#[derive(Clone)]
pub struct PgStore {
    pool: DatabasePool,
}

impl PgStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn wallet_for_key(&self, user_id: UserId, currency: Currency) -> StoreResult<Wallet> {
        let wallet = sqlx::query_as::<_, Wallet>(&format!(
            "SELECT {} FROM wallets WHERE user_id = $1 AND currency = $2",
            WALLET_COLUMNS
        ))
        .bind(user_id)
        .bind(currency.as_str())
        .fetch_one(self.pool())
        .await?;
        Ok(wallet)
    }
}

#[async_trait]
impl WalletLedgerStore for PgStore {
    async fn ensure_wallet(&self, user_id: UserId, currency: Currency) -> StoreResult<Wallet> {
        // The (user_id, currency) unique constraint arbitrates concurrent creators.
        sqlx::query(
            r#"
            INSERT INTO wallets (id, user_id, currency)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, currency) DO NOTHING
            "#,
        )
        .bind(uuid::Uuid::new_v4())
        .bind(user_id)
        .bind(currency.as_str())
        .execute(self.pool())
        .await?;

        self.wallet_for_key(user_id, currency).await
    }

    async fn wallet(&self, id: WalletId) -> StoreResult<Option<Wallet>> {
        let wallet = sqlx::query_as::<_, Wallet>(&format!(
            "SELECT {} FROM wallets WHERE id = $1",
            WALLET_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        Ok(wallet)
    }

    async fn wallets_for_user(&self, user_id: UserId) -> StoreResult<Vec<Wallet>> {
        let wallets = sqlx::query_as::<_, Wallet>(&format!(
            "SELECT {} FROM wallets WHERE user_id = $1 ORDER BY currency",
            WALLET_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;
        Ok(wallets)
    }

    async fn all_wallets(&self) -> StoreResult<Vec<Wallet>> {
        let wallets = sqlx::query_as::<_, Wallet>(&format!(
            "SELECT {} FROM wallets ORDER BY created_at",
            WALLET_COLUMNS
        ))
        .fetch_all(self.pool())
        .await?;
        Ok(wallets)
    }

    async fn post(&self, posting: Posting) -> StoreResult<PostOutcome> {
        if !posting.is_balanced() {
            return Err(StoreError::Unbalanced);
        }

        let mut tx = self.pool().begin().await?;

        sqlx::query(
            r#"
            INSERT INTO wallets (id, user_id, currency)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, currency) DO NOTHING
            "#,
        )
        .bind(uuid::Uuid::new_v4())
        .bind(posting.user_id)
        .bind(posting.currency.as_str())
        .execute(&mut *tx)
        .await?;

        // Row lock serializes every posting against this wallet until commit.
        let current = sqlx::query_as::<_, Wallet>(&format!(
            "SELECT {} FROM wallets WHERE user_id = $1 AND currency = $2 FOR UPDATE",
            WALLET_COLUMNS
        ))
        .bind(posting.user_id)
        .bind(posting.currency.as_str())
        .fetch_one(&mut *tx)
        .await?;

        if let Some(external_id) = posting.external_id.as_deref() {
            let seen = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM ledger_entries WHERE entry_type = $1 AND external_id = $2)",
            )
            .bind(posting.entry_type.as_str())
            .bind(external_id)
            .fetch_one(&mut *tx)
            .await?;
            if seen {
                tx.rollback().await?;
                return Ok(PostOutcome::Duplicate { wallet: current });
            }
        }

        let available_delta = posting.available_delta();
        let available = current.available_balance + available_delta;
        let pending = current.pending_balance + posting.pending_delta();
        if available < Decimal::ZERO {
            tx.rollback().await?;
            return Err(StoreError::InsufficientFunds {
                available: current.available_balance,
                requested: -available_delta,
            });
        }

        let entries = posting.into_entries(current.id, available, pending);

        let mut insert = QueryBuilder::<Postgres>::new(format!(
            "INSERT INTO ledger_entries ({}) ",
            LEDGER_COLUMNS
        ));
        insert.push_values(entries.iter(), |mut row, entry| {
            row.push_bind(entry.id)
                .push_bind(entry.entry_set)
                .push_bind(entry.user_id)
                .push_bind(entry.wallet_id)
                .push_bind(entry.currency.as_str())
                .push_bind(entry.amount)
                .push_bind(entry.direction.as_str())
                .push_bind(entry.account.as_str())
                .push_bind(entry.entry_type.as_str())
                .push_bind(entry.reference.clone())
                .push_bind(entry.external_id.clone())
                .push_bind(entry.description.clone())
                .push_bind(entry.metadata.clone())
                .push_bind(entry.balance_after)
                .push_bind(entry.created_at);
        });
        if let Err(e) = insert.build().execute(&mut *tx).await {
            if is_constraint_violation(&e, EXTERNAL_LEG_CONSTRAINT) {
                tx.rollback().await?;
                let wallet = self.wallet_for_key(current.user_id, current.currency).await?;
                return Ok(PostOutcome::Duplicate { wallet });
            }
            return Err(e.into());
        }

        let wallet = sqlx::query_as::<_, Wallet>(&format!(
            r#"
            UPDATE wallets
            SET available_balance = $2, pending_balance = $3, version = version + 1, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            WALLET_COLUMNS
        ))
        .bind(current.id)
        .bind(available)
        .bind(pending)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(PostOutcome::Posted { wallet, entries })
    }

    async fn entries_for_wallet(&self, wallet_id: WalletId) -> StoreResult<Vec<LedgerEntry>> {
        let entries = sqlx::query_as::<_, LedgerEntry>(&format!(
            "SELECT {} FROM ledger_entries WHERE wallet_id = $1 ORDER BY created_at, id",
            LEDGER_COLUMNS
        ))
        .bind(wallet_id)
        .fetch_all(self.pool())
        .await?;
        Ok(entries)
    }

    async fn wallet_snapshot(
        &self,
        wallet_id: WalletId,
    ) -> StoreResult<Option<(Wallet, Vec<LedgerEntry>)>> {
        let mut tx = self.pool().begin().await?;

        // Postings take the wallet row FOR UPDATE, so a share lock keeps them out until commit.
        let wallet = sqlx::query_as::<_, Wallet>(&format!(
            "SELECT {} FROM wallets WHERE id = $1 FOR SHARE",
            WALLET_COLUMNS
        ))
        .bind(wallet_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(wallet) = wallet else {
            tx.rollback().await?;
            return Ok(None);
        };

        let entries = sqlx::query_as::<_, LedgerEntry>(&format!(
            "SELECT {} FROM ledger_entries WHERE wallet_id = $1 ORDER BY created_at, id",
            LEDGER_COLUMNS
        ))
        .bind(wallet_id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some((wallet, entries)))
    }

    async fn entry_set(&self, entry_set: EntrySetId) -> StoreResult<Vec<LedgerEntry>> {
        let entries = sqlx::query_as::<_, LedgerEntry>(&format!(
            "SELECT {} FROM ledger_entries WHERE entry_set = $1 ORDER BY id",
            LEDGER_COLUMNS
        ))
        .bind(entry_set)
        .fetch_all(self.pool())
        .await?;
        Ok(entries)
    }

    async fn unbalanced_entry_sets(&self) -> StoreResult<Vec<EntrySetId>> {
        let ids = sqlx::query_scalar::<_, uuid::Uuid>(
            r#"
            SELECT entry_set
            FROM ledger_entries
            GROUP BY entry_set
            HAVING SUM(CASE WHEN direction = 'debit' THEN amount ELSE -amount END) <> 0
            "#,
        )
        .fetch_all(self.pool())
        .await?;
        Ok(ids)
    }

    async fn rebuild_wallet(&self, wallet_id: WalletId) -> StoreResult<Wallet> {
        let mut tx = self.pool().begin().await?;

        let locked = sqlx::query_scalar::<_, uuid::Uuid>("SELECT id FROM wallets WHERE id = $1 FOR UPDATE")
            .bind(wallet_id)
            .fetch_optional(&mut *tx)
            .await?;
        if locked.is_none() {
            return Err(StoreError::NotFound("wallet"));
        }

        let entries = sqlx::query_as::<_, LedgerEntry>(&format!(
            "SELECT {} FROM ledger_entries WHERE wallet_id = $1",
            LEDGER_COLUMNS
        ))
        .bind(wallet_id)
        .fetch_all(&mut *tx)
        .await?;
        let (available, pending) = replay_balances(&entries);

        let wallet = sqlx::query_as::<_, Wallet>(&format!(
            r#"
            UPDATE wallets
            SET available_balance = $2, pending_balance = $3, version = version + 1, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            WALLET_COLUMNS
        ))
        .bind(wallet_id)
        .bind(available)
        .bind(pending)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(wallet)
    }
}

#[async_trait]
impl BillingStore for PgStore {
    async fn user(&self, id: UserId) -> StoreResult<Option<BillingUser>> {
        let user = sqlx::query_as::<_, BillingUser>(
            "SELECT id, email, name, phone, flw_customer_id FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        Ok(user)
    }

    async fn set_customer_id(&self, user_id: UserId, customer_id: &str) -> StoreResult<()> {
        let result = sqlx::query("UPDATE users SET flw_customer_id = $2, updated_at = NOW() WHERE id = $1")
            .bind(user_id)
            .bind(customer_id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("user"));
        }
        Ok(())
    }

    async fn insert_payment_method(&self, method: PaymentMethod) -> StoreResult<PaymentMethod> {
        let mut tx = self.pool().begin().await?;

        // Serialize default selection per user.
        sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(method.user_id)
            .execute(&mut *tx)
            .await?;

        let has_active = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM payment_methods WHERE user_id = $1 AND is_active)",
        )
        .bind(method.user_id)
        .fetch_one(&mut *tx)
        .await?;
        let is_default = method.is_default || !has_active;

        if is_default {
            sqlx::query("UPDATE payment_methods SET is_default = FALSE WHERE user_id = $1 AND is_default")
                .bind(method.user_id)
                .execute(&mut *tx)
                .await?;
        }

        let inserted = sqlx::query_as::<_, PaymentMethod>(
            r#"
            INSERT INTO payment_methods (id, user_id, external_id, method_type, label, is_default, is_active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, user_id, external_id, method_type, label, is_default, is_active, created_at
            "#,
        )
        .bind(method.id)
        .bind(method.user_id)
        .bind(&method.external_id)
        .bind(method.method_type.as_str())
        .bind(&method.label)
        .bind(is_default)
        .bind(method.is_active)
        .bind(method.created_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(inserted)
    }

    async fn payment_methods(&self, user_id: UserId) -> StoreResult<Vec<PaymentMethod>> {
        let methods = sqlx::query_as::<_, PaymentMethod>(
            r#"
            SELECT id, user_id, external_id, method_type, label, is_default, is_active, created_at
            FROM payment_methods
            WHERE user_id = $1 AND is_active
            ORDER BY created_at
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;
        Ok(methods)
    }

    async fn set_default_payment_method(
        &self,
        user_id: UserId,
        id: PaymentMethodId,
    ) -> StoreResult<Option<PaymentMethod>> {
        let mut tx = self.pool().begin().await?;

        // Serialize default selection per user.
        sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?;

        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM payment_methods WHERE id = $1 AND user_id = $2 AND is_active)",
        )
        .bind(id)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;
        if !exists {
            return Ok(None);
        }

        sqlx::query("UPDATE payment_methods SET is_default = FALSE WHERE user_id = $1 AND is_default")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        let method = sqlx::query_as::<_, PaymentMethod>(
            r#"
            UPDATE payment_methods SET is_default = TRUE
            WHERE id = $1
            RETURNING id, user_id, external_id, method_type, label, is_default, is_active, created_at
            "#,
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(method))
    }

    async fn insert_charge(&self, charge: Charge) -> StoreResult<Charge> {
        let next_action = charge
            .next_action
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| sqlx::Error::Protocol(e.to_string()))?;
        let authorization = charge.authorization.as_ref();
        let inserted = sqlx::query_as::<_, Charge>(&format!(
            r#"
            INSERT INTO charges ({})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT (user_id, client_key) WHERE client_key IS NOT NULL DO NOTHING
            RETURNING {}
            "#,
            CHARGE_COLUMNS, CHARGE_COLUMNS
        ))
        .bind(charge.id)
        .bind(charge.user_id)
        .bind(charge.payment_method_id)
        .bind(&charge.external_id)
        .bind(&charge.reference)
        .bind(&charge.operation.trace_id)
        .bind(&charge.operation.idempotency_key)
        .bind(&charge.client_key)
        .bind(authorization.map(|ids| ids.trace_id.as_str()))
        .bind(authorization.map(|ids| ids.idempotency_key.as_str()))
        .bind(charge.amount)
        .bind(charge.currency.as_str())
        .bind(charge.status.as_str())
        .bind(next_action)
        .bind(charge.settled_at)
        .bind(charge.created_at)
        .bind(charge.updated_at)
        .fetch_optional(self.pool())
        .await?;
        if let Some(inserted) = inserted {
            return Ok(inserted);
        }

        let existing = sqlx::query_as::<_, Charge>(&format!(
            "SELECT {} FROM charges WHERE user_id = $1 AND client_key = $2",
            CHARGE_COLUMNS
        ))
        .bind(charge.user_id)
        .bind(&charge.client_key)
        .fetch_optional(self.pool())
        .await?;
        existing.ok_or(StoreError::NotFound("charge"))
    }

    async fn charge(&self, id: ChargeId) -> StoreResult<Option<Charge>> {
        let charge = sqlx::query_as::<_, Charge>(&format!(
            "SELECT {} FROM charges WHERE id = $1",
            CHARGE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        Ok(charge)
    }

    async fn charge_by_external_id(&self, external_id: &str) -> StoreResult<Option<Charge>> {
        let charge = sqlx::query_as::<_, Charge>(&format!(
            "SELECT {} FROM charges WHERE external_id = $1",
            CHARGE_COLUMNS
        ))
        .bind(external_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(charge)
    }

    async fn charge_by_reference(&self, reference: &str) -> StoreResult<Option<Charge>> {
        let charge = sqlx::query_as::<_, Charge>(&format!(
            "SELECT {} FROM charges WHERE reference = $1",
            CHARGE_COLUMNS
        ))
        .bind(reference)
        .fetch_optional(self.pool())
        .await?;
        Ok(charge)
    }

    async fn begin_charge_authorization(
        &self,
        id: ChargeId,
        ids: OperationIds,
    ) -> StoreResult<Option<OperationIds>> {
        let row = sqlx::query(
            r#"
            UPDATE charges
            SET auth_trace_id = COALESCE(auth_trace_id, $2),
                auth_idempotency_key = COALESCE(auth_idempotency_key, $3),
                updated_at = NOW()
            WHERE id = $1
            RETURNING auth_trace_id, auth_idempotency_key
            "#,
        )
        .bind(id)
        .bind(&ids.trace_id)
        .bind(&ids.idempotency_key)
        .fetch_optional(self.pool())
        .await?;
        row.map(|row| -> Result<OperationIds, sqlx::Error> {
            Ok(OperationIds {
                trace_id: row.try_get("auth_trace_id")?,
                idempotency_key: row.try_get("auth_idempotency_key")?,
            })
        })
        .transpose()
        .map_err(StoreError::Database)
    }

    async fn record_charge_response(
        &self,
        id: ChargeId,
        external_id: Option<&str>,
        status: ChargeStatus,
        next_action: Option<&NextAction>,
    ) -> StoreResult<Option<Charge>> {
        let next_action = next_action
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| sqlx::Error::Protocol(e.to_string()))?;
        let charge = sqlx::query_as::<_, Charge>(&format!(
            r#"
            UPDATE charges
            SET external_id = COALESCE($2, external_id), status = $3, next_action = $4,
                auth_trace_id = NULL, auth_idempotency_key = NULL, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            CHARGE_COLUMNS
        ))
        .bind(id)
        .bind(external_id)
        .bind(status.as_str())
        .bind(next_action)
        .fetch_optional(self.pool())
        .await?;
        Ok(charge)
    }

    async fn mark_charge_settled(&self, id: ChargeId) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE charges SET settled_at = NOW(), updated_at = NOW() WHERE id = $1 AND settled_at IS NULL",
        )
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl PayrollStore for PgStore {
    async fn insert_payroll(&self, payroll: Payroll) -> StoreResult<Payroll> {
        let inserted = sqlx::query_as::<_, Payroll>(&format!(
            r#"
            INSERT INTO payrolls ({})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            RETURNING {}
            "#,
            PAYROLL_COLUMNS, PAYROLL_COLUMNS
        ))
        .bind(payroll.id)
        .bind(payroll.payer_id)
        .bind(payroll.employee_id)
        .bind(payroll.bank_id)
        .bind(payroll.payment_amount)
        .bind(payroll.currency.as_str())
        .bind(payroll.payment_due)
        .bind(&payroll.payment_gateway)
        .bind(payroll.payment_status.as_str())
        .bind(&payroll.narration)
        .bind(&payroll.trace_id)
        .bind(&payroll.idempotency_key)
        .bind(&payroll.trx_reference)
        .bind(&payroll.gateway_transfer_id)
        .bind(payroll.initiated_at)
        .bind(payroll.resolved_at)
        .bind(payroll.created_at)
        .bind(payroll.updated_at)
        .fetch_one(self.pool())
        .await?;
        Ok(inserted)
    }

    async fn payroll(&self, id: PayrollId) -> StoreResult<Option<Payroll>> {
        let payroll = sqlx::query_as::<_, Payroll>(&format!(
            "SELECT {} FROM payrolls WHERE id = $1",
            PAYROLL_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        Ok(payroll)
    }

    async fn payroll_by_reference(&self, trx_reference: &str) -> StoreResult<Option<Payroll>> {
        let payroll = sqlx::query_as::<_, Payroll>(&format!(
            "SELECT {} FROM payrolls WHERE trx_reference = $1",
            PAYROLL_COLUMNS
        ))
        .bind(trx_reference)
        .fetch_optional(self.pool())
        .await?;
        Ok(payroll)
    }

    async fn update_scheduled_payroll(
        &self,
        id: PayrollId,
        changes: &PayrollChanges,
    ) -> StoreResult<Option<Payroll>> {
        let updated = sqlx::query_as::<_, Payroll>(&format!(
            r#"
            UPDATE payrolls
            SET bank_id = COALESCE($2, bank_id),
                payment_amount = COALESCE($3, payment_amount),
                currency = COALESCE($4, currency),
                payment_due = COALESCE($5, payment_due),
                payment_gateway = COALESCE($6, payment_gateway),
                narration = COALESCE($7, narration),
                updated_at = NOW()
            WHERE id = $1 AND payment_status = 'scheduled'
            RETURNING {}
            "#,
            PAYROLL_COLUMNS
        ))
        .bind(id)
        .bind(changes.bank_id)
        .bind(changes.payment_amount)
        .bind(changes.currency.map(|c| c.as_str()))
        .bind(changes.payment_due)
        .bind(changes.payment_gateway.as_deref())
        .bind(changes.narration.as_deref())
        .fetch_optional(self.pool())
        .await?;

        if updated.is_none() && self.payroll(id).await?.is_none() {
            return Err(StoreError::NotFound("payroll"));
        }
        Ok(updated)
    }

    async fn claim_payroll(
        &self,
        id: PayrollId,
        amount: Decimal,
        currency: Currency,
    ) -> StoreResult<Option<Payroll>> {
        let claimed = sqlx::query_as::<_, Payroll>(&format!(
            r#"
            UPDATE payrolls
            SET payment_status = 'dispatching', updated_at = NOW()
            WHERE id = $1 AND payment_status = 'scheduled'
              AND payment_amount = $2 AND currency = $3
            RETURNING {}
            "#,
            PAYROLL_COLUMNS
        ))
        .bind(id)
        .bind(amount)
        .bind(currency.as_str())
        .fetch_optional(self.pool())
        .await?;
        Ok(claimed)
    }

    async fn transition_payroll(
        &self,
        id: PayrollId,
        from: &[PaymentStatus],
        to: PaymentStatus,
        stamp: TransitionStamp,
    ) -> StoreResult<Option<Payroll>> {
        let from: Vec<&str> = from.iter().map(|s| s.as_str()).collect();
        let at = stamp.at.unwrap_or_else(Utc::now);
        let updated = sqlx::query_as::<_, Payroll>(&format!(
            r#"
            UPDATE payrolls
            SET payment_status = $2,
                gateway_transfer_id = COALESCE($3, gateway_transfer_id),
                initiated_at = CASE WHEN $2 = 'initiated' THEN COALESCE(initiated_at, $4) ELSE initiated_at END,
                resolved_at = CASE WHEN $2 IN ('completed', 'failed') THEN $4 ELSE resolved_at END,
                updated_at = NOW()
            WHERE id = $1 AND payment_status = ANY($5)
            RETURNING {}
            "#,
            PAYROLL_COLUMNS
        ))
        .bind(id)
        .bind(to.as_str())
        .bind(stamp.gateway_transfer_id)
        .bind(at)
        .bind(from)
        .fetch_optional(self.pool())
        .await?;
        Ok(updated)
    }

    async fn bank(&self, id: BankId) -> StoreResult<Option<Bank>> {
        let bank = sqlx::query_as::<_, Bank>(
            "SELECT id, user_id, account_number, bank_code, account_name, currency FROM banks WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        Ok(bank)
    }

    async fn billing_info(&self, user_id: UserId) -> StoreResult<Option<BillingInfo>> {
        let info = sqlx::query_as::<_, BillingInfo>(
            "SELECT user_id, first_name, last_name, email, phone, country FROM billing_info WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(info)
    }

    async fn admin_balance(&self, currency: Currency) -> StoreResult<AdminBalance> {
        let balance = sqlx::query_as::<_, AdminBalance>(
            "SELECT currency, balance, updated_at FROM admin_balances WHERE currency = $1",
        )
        .bind(currency.as_str())
        .fetch_optional(self.pool())
        .await?;
        Ok(balance.unwrap_or(AdminBalance {
            currency,
            balance: Decimal::ZERO,
            updated_at: Utc::now(),
        }))
    }

    async fn debit_admin_balance(&self, currency: Currency, amount: Decimal) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE admin_balances
            SET balance = balance - $2, updated_at = NOW()
            WHERE currency = $1 AND balance >= $2
            "#,
        )
        .bind(currency.as_str())
        .bind(amount)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn credit_admin_balance(
        &self,
        currency: Currency,
        amount: Decimal,
    ) -> StoreResult<AdminBalance> {
        let balance = sqlx::query_as::<_, AdminBalance>(
            r#"
            INSERT INTO admin_balances (currency, balance, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (currency) DO UPDATE
            SET balance = admin_balances.balance + EXCLUDED.balance, updated_at = NOW()
            RETURNING currency, balance, updated_at
            "#,
        )
        .bind(currency.as_str())
        .bind(amount)
        .fetch_one(self.pool())
        .await?;
        Ok(balance)
    }
}

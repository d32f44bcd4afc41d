use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Currency, UserId, WalletId};

/// Balance projection for one (user, currency) pair.
///
/// Derived from the ledger: `available_balance` equals credits minus debits on the
/// user's `user_available` legs, `pending_balance` the same on `user_pending`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub user_id: UserId,
    pub currency: Currency,
    pub available_balance: Decimal,
    pub pending_balance: Decimal,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(user_id: UserId, currency: Currency) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4(),
            user_id,
            currency,
            available_balance: Decimal::ZERO,
            pending_balance: Decimal::ZERO,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Difference between a wallet projection and its ledger replay.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalletDrift {
    pub wallet_id: WalletId,
    pub user_id: UserId,
    pub currency: Currency,
    pub projected_available: Decimal,
    pub ledger_available: Decimal,
    pub projected_pending: Decimal,
    pub ledger_pending: Decimal,
}

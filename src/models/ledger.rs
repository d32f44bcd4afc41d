//! Double-entry ledger rows and the postings that produce them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::{Currency, EntrySetId, UserId, WalletId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Debit,
    Credit,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Debit => "debit",
            Direction::Credit => "credit",
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debit" => Ok(Direction::Debit),
            "credit" => Ok(Direction::Credit),
            other => Err(format!("Unknown ledger direction: {}", other)),
        }
    }
}

/// Symbolic ledger accounts. The `user_*` accounts back the wallet projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerAccount {
    UserAvailable,
    UserPending,
    ProcessorClearing,
    ProcessorDisbursement,
}

impl LedgerAccount {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerAccount::UserAvailable => "user_available",
            LedgerAccount::UserPending => "user_pending",
            LedgerAccount::ProcessorClearing => "processor_clearing",
            LedgerAccount::ProcessorDisbursement => "processor_disbursement",
        }
    }
}

impl FromStr for LedgerAccount {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user_available" => Ok(LedgerAccount::UserAvailable),
            "user_pending" => Ok(LedgerAccount::UserPending),
            "processor_clearing" => Ok(LedgerAccount::ProcessorClearing),
            "processor_disbursement" => Ok(LedgerAccount::ProcessorDisbursement),
            other => Err(format!("Unknown ledger account: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Charge,
    Payout,
    Adjustment,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Charge => "charge",
            EntryType::Payout => "payout",
            EntryType::Adjustment => "adjustment",
        }
    }

    /// Processor-side account that offsets the user leg.
    pub fn counter_account(&self) -> LedgerAccount {
        match self {
            EntryType::Payout => LedgerAccount::ProcessorDisbursement,
            EntryType::Charge | EntryType::Adjustment => LedgerAccount::ProcessorClearing,
        }
    }
}

impl FromStr for EntryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "charge" => Ok(EntryType::Charge),
            "payout" => Ok(EntryType::Payout),
            "adjustment" => Ok(EntryType::Adjustment),
            other => Err(format!("Unknown entry type: {}", other)),
        }
    }
}

/// One immutable leg of an entry set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub entry_set: EntrySetId,
    pub user_id: UserId,
    pub wallet_id: WalletId,
    pub currency: Currency,
    pub amount: Decimal,
    pub direction: Direction,
    pub account: LedgerAccount,
    pub entry_type: EntryType,
    pub reference: String,
    pub external_id: Option<String>,
    pub description: Option<String>,
    pub metadata: serde_json::Value,
    pub balance_after: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Contribution of this leg to a user account balance: credits add, debits subtract.
    pub fn signed_amount(&self) -> Decimal {
        match self.direction {
            Direction::Credit => self.amount,
            Direction::Debit => -self.amount,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostingLeg {
    pub account: LedgerAccount,
    pub direction: Direction,
    pub amount: Decimal,
}

/// A balanced set of legs against one wallet, applied atomically by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub entry_set: EntrySetId,
    pub user_id: UserId,
    pub currency: Currency,
    pub entry_type: EntryType,
    pub reference: String,
    pub external_id: Option<String>,
    pub description: Option<String>,
    pub metadata: serde_json::Value,
    pub legs: Vec<PostingLeg>,
}

impl Posting {
    pub fn is_balanced(&self) -> bool {
        let (debits, credits) = self.legs.iter().fold(
            (Decimal::ZERO, Decimal::ZERO),
            |(d, c), leg| match leg.direction {
                Direction::Debit => (d + leg.amount, c),
                Direction::Credit => (d, c + leg.amount),
            },
        );
        !self.legs.is_empty() && debits == credits
    }

    pub fn available_delta(&self) -> Decimal {
        self.account_delta(LedgerAccount::UserAvailable)
    }

    pub fn pending_delta(&self) -> Decimal {
        self.account_delta(LedgerAccount::UserPending)
    }

    fn account_delta(&self, account: LedgerAccount) -> Decimal {
        self.legs
            .iter()
            .filter(|leg| leg.account == account)
            .map(|leg| match leg.direction {
                Direction::Credit => leg.amount,
                Direction::Debit => -leg.amount,
            })
            .sum()
    }

    /// Materialize the legs as ledger rows against `wallet_id`, stamping the post-balance
    /// on user-account legs.
    pub fn into_entries(
        self,
        wallet_id: WalletId,
        available_after: Decimal,
        pending_after: Decimal,
    ) -> Vec<LedgerEntry> {
        let now = Utc::now();
        self.legs
            .iter()
            .map(|leg| LedgerEntry {
                id: Uuid::new_v4(),
                entry_set: self.entry_set,
                user_id: self.user_id,
                wallet_id,
                currency: self.currency,
                amount: leg.amount,
                direction: leg.direction,
                account: leg.account,
                entry_type: self.entry_type,
                reference: self.reference.clone(),
                external_id: self.external_id.clone(),
                description: self.description.clone(),
                metadata: self.metadata.clone(),
                balance_after: match leg.account {
                    LedgerAccount::UserAvailable => Some(available_after),
                    LedgerAccount::UserPending => Some(pending_after),
                    _ => None,
                },
                created_at: now,
            })
            .collect()
    }
}

/// Replay user-account legs into (available, pending) balances.
/// Decimal places kept by every stored money column.
pub const MONEY_SCALE: u32 = 4;

/// True when `amount` is stored without rounding.
pub fn fits_money_scale(amount: Decimal) -> bool {
    amount.normalize().scale() <= MONEY_SCALE
}

pub fn replay_balances<'a, I>(entries: I) -> (Decimal, Decimal)
where
    I: IntoIterator<Item = &'a LedgerEntry>,
{
    entries
        .into_iter()
        .fold((Decimal::ZERO, Decimal::ZERO), |(available, pending), entry| {
            match entry.account {
                LedgerAccount::UserAvailable => (available + entry.signed_amount(), pending),
                LedgerAccount::UserPending => (available, pending + entry.signed_amount()),
                _ => (available, pending),
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn money_scale_ignores_trailing_zeros() {
        assert!(fits_money_scale(Decimal::new(101235, 4)));
        assert!(fits_money_scale(Decimal::new(1010000000, 8)));
        assert!(!fits_money_scale(Decimal::new(10123456, 6)));
        assert!(!fits_money_scale(Decimal::new(4, 5)));
    }
    use rust_decimal_macros::dec;

    fn posting(legs: Vec<PostingLeg>) -> Posting {
        Posting {
            entry_set: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            currency: Currency::NGN,
            entry_type: EntryType::Charge,
            reference: "ref-1".to_string(),
            external_id: None,
            description: None,
            metadata: serde_json::json!({}),
            legs,
        }
    }

    #[test]
    fn balanced_posting_has_equal_debits_and_credits() {
        let p = posting(vec![
            PostingLeg { account: LedgerAccount::UserAvailable, direction: Direction::Credit, amount: dec!(5000) },
            PostingLeg { account: LedgerAccount::ProcessorClearing, direction: Direction::Debit, amount: dec!(5000) },
        ]);
        assert!(p.is_balanced());
        assert_eq!(p.available_delta(), dec!(5000));
        assert_eq!(p.pending_delta(), Decimal::ZERO);
    }

    #[test]
    fn one_sided_or_empty_posting_is_unbalanced() {
        let p = posting(vec![PostingLeg {
            account: LedgerAccount::UserAvailable,
            direction: Direction::Credit,
            amount: dec!(10),
        }]);
        assert!(!p.is_balanced());
        assert!(!posting(vec![]).is_balanced());
    }

    #[test]
    fn entries_carry_snapshot_only_on_user_legs() {
        let p = posting(vec![
            PostingLeg { account: LedgerAccount::UserAvailable, direction: Direction::Debit, amount: dec!(40) },
            PostingLeg { account: LedgerAccount::ProcessorClearing, direction: Direction::Credit, amount: dec!(40) },
        ]);
        let wallet_id = Uuid::new_v4();
        let entries = p.into_entries(wallet_id, dec!(60), Decimal::ZERO);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].balance_after, Some(dec!(60)));
        assert_eq!(entries[1].balance_after, None);
        assert!(entries.iter().all(|e| e.wallet_id == wallet_id));
        assert_eq!(entries[0].entry_set, entries[1].entry_set);

        let (available, pending) = replay_balances(&entries);
        assert_eq!(available, dec!(-40));
        assert_eq!(pending, Decimal::ZERO);
    }

    #[test]
    fn payouts_offset_against_disbursement() {
        assert_eq!(EntryType::Payout.counter_account(), LedgerAccount::ProcessorDisbursement);
        assert_eq!(EntryType::Charge.counter_account(), LedgerAccount::ProcessorClearing);
        assert_eq!("processor_clearing".parse::<LedgerAccount>().unwrap(), LedgerAccount::ProcessorClearing);
    }
}

//! Shared types: currency, ID aliases and the records of the payment path.

pub mod billing;
pub mod currency;
pub mod ids;
pub mod ledger;
pub mod payroll;
pub mod wallet;

pub use billing::{BillingUser, Charge, ChargeStatus, NextAction, PaymentMethod, PaymentMethodType};
pub use currency::Currency;
pub use ids::{
    BankId, ChargeId, EntrySetId, OperationIds, PaymentMethodId, PayrollId, UserId, WalletId,
};
pub use ledger::{
    fits_money_scale, Direction, EntryType, LedgerAccount, LedgerEntry, Posting, PostingLeg,
    MONEY_SCALE,
};
pub use payroll::{
    AdminBalance, Bank, BillingInfo, NewPayroll, PaymentStatus, Payroll, PayrollChanges,
    TransitionStamp, FLUTTERWAVE_GATEWAY,
};
pub use wallet::{Wallet, WalletDrift};

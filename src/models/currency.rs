//! Currencies the payment processor settles in. Stored and sent on the wire as ISO codes.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    #[default]
    NGN,
    USD,
    EUR,
    GBP,
    GHS,
    KES,
    UGX,
    TZS,
    RWF,
    ZAR,
    ZMW,
    XAF,
    XOF,
    EGP,
}

impl Currency {
    pub const ALL: [Currency; 14] = [
        Currency::NGN,
        Currency::USD,
        Currency::EUR,
        Currency::GBP,
        Currency::GHS,
        Currency::KES,
        Currency::UGX,
        Currency::TZS,
        Currency::RWF,
        Currency::ZAR,
        Currency::ZMW,
        Currency::XAF,
        Currency::XOF,
        Currency::EGP,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::NGN => "NGN",
            Currency::USD => "USD",
            Currency::EUR => "EUR",
            Currency::GBP => "GBP",
            Currency::GHS => "GHS",
            Currency::KES => "KES",
            Currency::UGX => "UGX",
            Currency::TZS => "TZS",
            Currency::RWF => "RWF",
            Currency::ZAR => "ZAR",
            Currency::ZMW => "ZMW",
            Currency::XAF => "XAF",
            Currency::XOF => "XOF",
            Currency::EGP => "EGP",
        }
    }
}

impl FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        Currency::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == upper)
            .ok_or_else(|| format!("Unsupported currency: {}", s))
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

//! Core types used throughout the oracle
//!
//! Defines peer addresses, provider quotes and the decimal precision rule
//! every peer applies before a value can reach a ledger transaction.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed precision (decimal places) for every value that may be embedded
/// in a transaction.
pub const PRICE_DECIMALS: u32 = 8;

/// Round to the shared 8-decimal precision and strip trailing zeros so
/// equal values always render to identical strings on every peer.
pub fn fixed8(value: Decimal) -> Decimal {
    value
        .round_dp_with_strategy(PRICE_DECIMALS, RoundingStrategy::MidpointAwayFromZero)
        .normalize()
}

/// Address of a cohort member (its signing account)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerAddress(String);

impl PeerAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerAddress {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One fetch attempt against a named provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub provider: String,
    pub value: Option<Decimal>,
}

impl Quote {
    pub fn present(provider: impl Into<String>, value: Decimal) -> Self {
        Self {
            provider: provider.into(),
            value: Some(value),
        }
    }

    pub fn absent(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            value: None,
        }
    }

    pub fn is_present(&self) -> bool {
        self.value.is_some()
    }
}

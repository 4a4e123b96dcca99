//! Cohort Oracle Library
//!
//! Decentralized price oracle: a fixed cohort of peers samples public price
//! feeds, agrees on one figure and co-signs its publication to the ledger

pub mod config;
pub mod consensus;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod logging;
pub mod oracle;
pub mod persistence;
pub mod types;

//! Oracle module - local price sampling
//!
//! Fetches quotes from every configured provider and reduces them to a
//! filtered median with provenance.

mod aggregator;
mod pool;
pub mod sources;

pub use aggregator::{stdev_epsilon, AggregateResult, RobustAggregator};
pub use pool::ProviderPool;

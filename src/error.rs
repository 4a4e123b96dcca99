//! Cycle-level failures
//!
//! Provider failures never reach this type: they are absorbed into absent
//! quotes by the provider pool.

use thiserror::Error;

use crate::types::PeerAddress;

#[derive(Debug, Error)]
pub enum OracleError {
    /// Every provider was absent, nothing to aggregate
    #[error("no price data available: all providers absent")]
    DataUnavailable,

    /// A round resolved at its deadline without the full cohort
    #[error("insufficient participants in round {round}: {received} < {expected}")]
    InsufficientParticipants {
        round: String,
        received: usize,
        expected: usize,
    },

    /// A peer signed a payload different from ours
    #[error("peer {peer} signed a divergent transaction payload")]
    DivergentPayload { peer: PeerAddress },

    /// A signature share failed verification
    #[error("invalid signature share from {peer}: {reason}")]
    InvalidShare { peer: PeerAddress, reason: String },

    #[error("cohort channel error: {0}")]
    Channel(#[source] anyhow::Error),

    #[error("ledger error: {0}")]
    Ledger(#[source] anyhow::Error),
}

impl OracleError {
    /// Short label used in logs and the cycle journal
    pub fn kind(&self) -> &'static str {
        match self {
            OracleError::DataUnavailable => "data_unavailable",
            OracleError::InsufficientParticipants { .. } => "insufficient_participants",
            OracleError::DivergentPayload { .. } => "divergent_payload",
            OracleError::InvalidShare { .. } => "invalid_share",
            OracleError::Channel(_) => "channel",
            OracleError::Ledger(_) => "ledger",
        }
    }
}

pub type OracleResult<T> = std::result::Result<T, OracleError>;

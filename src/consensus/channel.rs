//! Cohort broadcast channel
//!
//! Best-effort, unordered fan-out to every cohort member. Inbound traffic
//! for all rounds arrives on one stream; collectors filter by round id.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

use crate::types::PeerAddress;

/// Exchange step within one consensus cycle, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    /// Leader proposal plus local aggregate
    Proposal,
    /// Signing addresses
    Signers,
    /// Signature shares
    Signatures,
}

impl fmt::Display for RoundPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundPhase::Proposal => write!(f, "proposal"),
            RoundPhase::Signers => write!(f, "signers"),
            RoundPhase::Signatures => write!(f, "signatures"),
        }
    }
}

/// Cohort-wide round identifier; every peer derives the same one
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RoundId {
    pub cycle: u64,
    pub phase: RoundPhase,
}

impl RoundId {
    pub fn new(cycle: u64, phase: RoundPhase) -> Self {
        Self { cycle, phase }
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cycle-{}/{}", self.cycle, self.phase)
    }
}

/// Wire envelope for one round contribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundMessage {
    pub round: RoundId,
    pub sender: PeerAddress,
    pub payload: serde_json::Value,
}

/// Transport the round coordinator runs over
#[async_trait]
pub trait CohortChannel: Send + Sync {
    /// Send to every cohort member, this peer included. Best effort.
    async fn broadcast(&self, message: &RoundMessage) -> Result<()>;

    /// Start receiving inbound messages from this point on
    fn subscribe(&self) -> broadcast::Receiver<RoundMessage>;
}

/// In-process cohort hub
///
/// Every handle sees every broadcast. A muted peer keeps receiving but its
/// own sends are dropped, which models a peer that never responds.
#[derive(Clone)]
pub struct LocalCohort {
    tx: broadcast::Sender<RoundMessage>,
    muted: Arc<Mutex<HashSet<PeerAddress>>>,
}

impl LocalCohort {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            muted: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Handle for one member
    pub fn join(&self, peer: PeerAddress) -> LocalChannel {
        LocalChannel {
            peer,
            tx: self.tx.clone(),
            muted: Arc::clone(&self.muted),
        }
    }

    pub fn mute(&self, peer: &PeerAddress) {
        if let Ok(mut muted) = self.muted.lock() {
            muted.insert(peer.clone());
        }
    }
}

pub struct LocalChannel {
    peer: PeerAddress,
    tx: broadcast::Sender<RoundMessage>,
    muted: Arc<Mutex<HashSet<PeerAddress>>>,
}

impl LocalChannel {
    fn is_muted(&self) -> bool {
        self.muted
            .lock()
            .map(|m| m.contains(&self.peer))
            .unwrap_or(false)
    }
}

#[async_trait]
impl CohortChannel for LocalChannel {
    async fn broadcast(&self, message: &RoundMessage) -> Result<()> {
        if self.is_muted() {
            tracing::debug!(peer = %self.peer, round = %message.round, "Muted peer, message dropped");
            return Ok(());
        }
        // No live receivers is not an error for a best-effort channel.
        let _ = self.tx.send(message.clone());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<RoundMessage> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(cycle: u64, sender: &str) -> RoundMessage {
        RoundMessage {
            round: RoundId::new(cycle, RoundPhase::Proposal),
            sender: PeerAddress::from(sender),
            payload: serde_json::json!({ "value": 1 }),
        }
    }

    #[test]
    fn round_id_renders_cycle_and_phase() {
        assert_eq!(
            RoundId::new(42, RoundPhase::Signatures).to_string(),
            "cycle-42/signatures"
        );
    }

    #[tokio::test]
    async fn every_member_receives_every_broadcast() {
        let cohort = LocalCohort::new(16);
        let a = cohort.join(PeerAddress::from("a"));
        let b = cohort.join(PeerAddress::from("b"));
        let mut rx_a = a.subscribe();
        let mut rx_b = b.subscribe();

        a.broadcast(&message(1, "a")).await.unwrap();

        assert_eq!(rx_a.recv().await.unwrap().sender.as_str(), "a");
        assert_eq!(rx_b.recv().await.unwrap().sender.as_str(), "a");
    }

    #[tokio::test]
    async fn muted_members_still_listen() {
        let cohort = LocalCohort::new(16);
        let a = cohort.join(PeerAddress::from("a"));
        let b = cohort.join(PeerAddress::from("b"));
        cohort.mute(&PeerAddress::from("b"));
        let mut rx_b = b.subscribe();

        b.broadcast(&message(1, "b")).await.unwrap();
        a.broadcast(&message(1, "a")).await.unwrap();

        assert_eq!(rx_b.recv().await.unwrap().sender.as_str(), "a");
        assert!(rx_b.try_recv().is_err());
    }
}

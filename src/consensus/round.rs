//! Round coordinator - broadcast a value, collect the cohort's values
//!
//! A round resolves exactly once: the moment every cohort member has been
//! heard from, or at its deadline with whatever arrived. The coordinator
//! subscribes to the channel when it is built, so traffic from a fast peer
//! is never missed; messages for rounds this peer has not opened yet are
//! held in per-cycle state until the round opens.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;

use super::channel::{CohortChannel, RoundId, RoundMessage};
use crate::error::{OracleError, OracleResult};
use crate::types::PeerAddress;

/// How a round ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundStatus {
    /// Every cohort member contributed
    Quorum,
    /// The deadline fired first
    DeadlineExpired,
}

/// Collected contributions of one resolved round
#[derive(Debug, Clone)]
pub struct RoundOutcome<T> {
    pub round: RoundId,
    pub status: RoundStatus,
    pub expected: usize,
    pub collected: BTreeMap<PeerAddress, T>,
}

impl<T> RoundOutcome<T> {
    pub fn is_quorum(&self) -> bool {
        self.status == RoundStatus::Quorum
    }

    /// The full-cohort collection, or an insufficient-participants error
    pub fn require_quorum(self) -> OracleResult<BTreeMap<PeerAddress, T>> {
        match self.status {
            RoundStatus::Quorum => Ok(self.collected),
            RoundStatus::DeadlineExpired => Err(OracleError::InsufficientParticipants {
                round: self.round.to_string(),
                received: self.collected.len(),
                expected: self.expected,
            }),
        }
    }
}

/// Live state of an open round
#[derive(Debug)]
pub struct RoundState<T> {
    round: RoundId,
    quorum: usize,
    deadline: Instant,
    received: HashMap<PeerAddress, T>,
    resolved: bool,
}

impl<T> RoundState<T> {
    pub fn new(round: RoundId, quorum: usize, deadline: Instant) -> Self {
        Self {
            round,
            quorum,
            deadline,
            received: HashMap::new(),
            resolved: false,
        }
    }

    /// Record a contribution. A repeat sender overwrites its earlier value.
    /// Returns true once the quorum is met.
    pub fn accept(&mut self, sender: PeerAddress, payload: T) -> bool {
        if self.resolved {
            return false;
        }
        if self.received.len() < self.quorum || self.received.contains_key(&sender) {
            self.received.insert(sender, payload);
        }
        self.has_quorum()
    }

    pub fn has_quorum(&self) -> bool {
        self.received.len() >= self.quorum
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Irreversible transition. Only the first caller gets the outcome.
    pub fn resolve(&mut self, status: RoundStatus) -> Option<RoundOutcome<T>> {
        if self.resolved {
            return None;
        }
        self.resolved = true;
        Some(RoundOutcome {
            round: self.round,
            status,
            expected: self.quorum,
            collected: self.received.drain().collect(),
        })
    }
}

pub struct RoundCoordinator {
    me: PeerAddress,
    channel: Arc<dyn CohortChannel>,
    inbox: broadcast::Receiver<RoundMessage>,
    /// Early arrivals for rounds not opened yet, keyed by round
    pending: HashMap<RoundId, HashMap<PeerAddress, serde_json::Value>>,
    /// Rounds already resolved in the current cycle
    closed: HashSet<RoundId>,
    cycle: u64,
}

impl RoundCoordinator {
    pub fn new(me: PeerAddress, channel: Arc<dyn CohortChannel>) -> Self {
        // Armed before anything is ever sent.
        let inbox = channel.subscribe();
        Self {
            me,
            channel,
            inbox,
            pending: HashMap::new(),
            closed: HashSet::new(),
            cycle: 0,
        }
    }

    pub fn me(&self) -> &PeerAddress {
        &self.me
    }

    /// Enter a new cycle, discarding state left by older ones
    pub fn begin_cycle(&mut self, cycle: u64) {
        self.cycle = cycle;
        self.pending.retain(|round, _| round.cycle >= cycle);
        self.closed.retain(|round| round.cycle >= cycle);
    }

    /// Broadcast `local` for `round` and collect the cohort's payloads until
    /// `cohort_size` distinct senders are in or `deadline` passes.
    pub async fn run_round<T>(
        &mut self,
        round: RoundId,
        local: &T,
        cohort_size: usize,
        deadline: Instant,
    ) -> OracleResult<RoundOutcome<T>>
    where
        T: Serialize + DeserializeOwned + Clone,
    {
        if round.cycle != self.cycle {
            self.begin_cycle(round.cycle);
        }

        let mut state = RoundState::new(round, cohort_size, deadline);

        if let Some(early) = self.pending.remove(&round) {
            for (sender, value) in early {
                if let Some(payload) = decode::<T>(&round, &sender, value) {
                    state.accept(sender, payload);
                }
            }
        }

        // Our own contribution counts whether or not the channel echoes it.
        state.accept(self.me.clone(), local.clone());

        let message = RoundMessage {
            round,
            sender: self.me.clone(),
            payload: serde_json::to_value(local)
                .map_err(|e| OracleError::Channel(anyhow::Error::new(e)))?,
        };
        self.channel
            .broadcast(&message)
            .await
            .map_err(OracleError::Channel)?;

        tracing::debug!(round = %round, cohort = cohort_size, "Round opened");

        let outcome = loop {
            if state.has_quorum() {
                if let Some(outcome) = state.resolve(RoundStatus::Quorum) {
                    break outcome;
                }
            }

            let next = tokio::select! {
                biased;
                received = self.inbox.recv() => Some(received),
                _ = tokio::time::sleep_until(state.deadline()) => None,
            };

            match next {
                Some(Ok(message)) if message.round == round => {
                    if let Some(payload) = decode::<T>(&round, &message.sender, message.payload) {
                        tracing::debug!(round = %round, sender = %message.sender, "Round contribution");
                        state.accept(message.sender, payload);
                    }
                }
                Some(Ok(message)) => self.hold_or_drop(message),
                Some(Err(RecvError::Lagged(skipped))) => {
                    tracing::warn!(round = %round, skipped, "Cohort inbox lagged, messages lost");
                }
                Some(Err(RecvError::Closed)) => {
                    tracing::warn!(round = %round, "Cohort channel closed, waiting out the deadline");
                    tokio::time::sleep_until(state.deadline()).await;
                    if let Some(outcome) = state.resolve(RoundStatus::DeadlineExpired) {
                        break outcome;
                    }
                }
                None => {
                    if let Some(outcome) = state.resolve(RoundStatus::DeadlineExpired) {
                        break outcome;
                    }
                }
            }
        };

        self.closed.insert(round);

        match outcome.status {
            RoundStatus::Quorum => tracing::info!(
                round = %round,
                received = outcome.collected.len(),
                "✅ Round reached quorum"
            ),
            RoundStatus::DeadlineExpired => tracing::warn!(
                round = %round,
                received = outcome.collected.len(),
                expected = cohort_size,
                "Round deadline expired without quorum"
            ),
        }

        Ok(outcome)
    }

    /// Keep traffic for rounds of this or the next cycle that have not run
    /// yet; anything else is stale or already resolved.
    fn hold_or_drop(&mut self, message: RoundMessage) {
        let round = message.round;
        let upcoming = round.cycle >= self.cycle && round.cycle <= self.cycle + 1;
        if upcoming && !self.closed.contains(&round) {
            self.pending
                .entry(round)
                .or_default()
                .insert(message.sender, message.payload);
        } else {
            tracing::debug!(round = %round, sender = %message.sender, "Message for inactive round dropped");
        }
    }
}

fn decode<T: DeserializeOwned>(
    round: &RoundId,
    sender: &PeerAddress,
    value: serde_json::Value,
) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(payload) => Some(payload),
        Err(e) => {
            tracing::warn!(round = %round, sender = %sender, error = %e, "Malformed round payload ignored");
            None
        }
    }
}

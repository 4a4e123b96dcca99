//! Leader selection from the cohort's random proposals
//!
//! Every peer proposes a random index in `[0, cohort_size)`. The largest
//! proposal indexes into the lexicographically sorted proposer addresses, so
//! any peer holding the same proposal set picks the same leader.
//!
//! A peer can bias the result by always proposing the top index; this
//! rule is kept as-is and is not adversary resistant.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::PeerAddress;

/// Uniform random proposal in `[0, cohort_size - 1]`
pub fn propose(cohort_size: usize) -> u32 {
    let upper = cohort_size.max(1) as u32;
    rand::thread_rng().gen_range(0..upper)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderSelection {
    /// Largest proposed value
    pub max_value: u32,
    /// Smallest address among the peers that proposed `max_value`
    pub max_proposer: PeerAddress,
    /// Position of the leader in `ordered`
    pub index: usize,
    /// The active peer for this cycle
    pub leader: PeerAddress,
    /// All proposers, sorted
    pub ordered: Vec<PeerAddress>,
}

impl LeaderSelection {
    pub fn is_leader(&self, peer: &PeerAddress) -> bool {
        &self.leader == peer
    }
}

/// Deterministic over any arrival order. A repeated proposer keeps its last
/// value. Returns None for an empty set.
pub fn select_leader<I>(proposals: I) -> Option<LeaderSelection>
where
    I: IntoIterator<Item = (PeerAddress, u32)>,
{
    let proposals: BTreeMap<PeerAddress, u32> = proposals.into_iter().collect();

    // BTreeMap iterates addresses ascending, so the first max seen wins ties.
    let (max_proposer, max_value) = proposals.iter().fold(None, |best, (peer, value)| {
        match best {
            Some((_, best_value)) if *value <= best_value => best,
            _ => Some((peer, *value)),
        }
    })?;

    let ordered: Vec<PeerAddress> = proposals.keys().cloned().collect();
    // Out-of-range proposals clamp to the last position.
    let index = (max_value as usize).min(ordered.len() - 1);

    Some(LeaderSelection {
        max_value,
        max_proposer: max_proposer.clone(),
        index,
        leader: ordered[index].clone(),
        ordered,
    })
}

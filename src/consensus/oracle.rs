//! Consensus oracle - one full cycle from sampling to submission
//!
//! Rounds run strictly one after another; a round that misses quorum ends
//! the cycle and nothing built so far is kept or submitted.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::channel::{RoundId, RoundPhase};
use super::leader::{propose, select_leader, LeaderSelection};
use super::round::RoundCoordinator;
use crate::error::{OracleError, OracleResult};
use crate::ledger::{
    AgreedValues, Ledger, MultiSignedTransaction, SignatureQuorumCollector, SignerEntry,
    SubmitResult, TransactionAssembler, TransactionPayload, TransactionSigner,
};
use crate::oracle::{AggregateResult, ProviderPool, RobustAggregator};
use crate::types::PeerAddress;

/// Leader-round payload: random proposal plus this peer's local aggregate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderProposal {
    pub value: u32,
    pub aggregate: AggregateResult,
}

#[derive(Debug, Clone)]
pub struct OracleSettings {
    pub cohort_size: usize,
    /// Cohort round time; data rounds get half, the signature round all of it
    pub round_time: Duration,
}

impl OracleSettings {
    pub fn data_round_timeout(&self) -> Duration {
        let half_ms = (self.round_time.as_millis() as u64 + 1) / 2;
        Duration::from_millis(half_ms)
    }

    pub fn signature_round_timeout(&self) -> Duration {
        self.round_time
    }
}

/// Cohort-wide price derived from every peer's filtered median
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CohortFigure {
    pub price: Decimal,
    /// Filtered median reported by each peer
    pub rates: BTreeMap<PeerAddress, Decimal>,
    pub aggregate: AggregateResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Submission {
    Submitted(SubmitResult),
    Failed { error: String },
    /// Another peer is the active submitter this cycle
    NotLeader,
}

/// Everything one successful cycle agreed on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub local: AggregateResult,
    pub proposals: BTreeMap<PeerAddress, u32>,
    pub leader: LeaderSelection,
    pub cohort: CohortFigure,
    pub signers: Vec<SignerEntry>,
    pub payload: TransactionPayload,
    pub bundle: MultiSignedTransaction,
    pub submission: Submission,
}

pub struct ConsensusOracle {
    settings: OracleSettings,
    pool: ProviderPool,
    aggregator: RobustAggregator,
    coordinator: RoundCoordinator,
    assembler: TransactionAssembler,
    signer: Arc<dyn TransactionSigner>,
    ledger: Arc<dyn Ledger>,
    last_report: Option<CycleReport>,
}

impl ConsensusOracle {
    pub fn new(
        settings: OracleSettings,
        pool: ProviderPool,
        coordinator: RoundCoordinator,
        assembler: TransactionAssembler,
        signer: Arc<dyn TransactionSigner>,
        ledger: Arc<dyn Ledger>,
    ) -> Self {
        Self {
            settings,
            pool,
            aggregator: RobustAggregator::new(),
            coordinator,
            assembler,
            signer,
            ledger,
            last_report: None,
        }
    }

    pub fn address(&self) -> &PeerAddress {
        self.signer.address()
    }

    /// Report of the most recent successful cycle
    pub fn last_report(&self) -> Option<&CycleReport> {
        self.last_report.as_ref()
    }

    /// Run one cycle. `&mut self` keeps cycles from overlapping.
    pub async fn run_cycle(&mut self, cycle: u64) -> OracleResult<CycleReport> {
        let cohort_size = self.settings.cohort_size;
        self.coordinator.begin_cycle(cycle);
        tracing::info!(cycle, cohort = cohort_size, peer = %self.address(), "🔄 Oracle cycle started");

        // Local sampling
        let quotes = self.pool.fetch_all().await;
        let local = self.aggregator.aggregate_quotes(&quotes)?;
        tracing::info!(
            cycle,
            filtered_median = %local.filtered_median,
            filtered_mean = %local.filtered_mean,
            kept = local.filtered_values.len(),
            raw = local.raw_values.len(),
            "📊 Local aggregate"
        );

        // Round 1: leader proposals + local aggregates
        let proposal = LeaderProposal {
            value: propose(cohort_size),
            aggregate: local.clone(),
        };
        let deadline = self.deadline(self.settings.data_round_timeout());
        let proposals = self
            .coordinator
            .run_round(
                RoundId::new(cycle, RoundPhase::Proposal),
                &proposal,
                cohort_size,
                deadline,
            )
            .await?
            .require_quorum()?;

        let values: BTreeMap<PeerAddress, u32> = proposals
            .iter()
            .map(|(peer, p)| (peer.clone(), p.value))
            .collect();
        let leader = elect(cycle, cohort_size, &values)?;
        tracing::info!(cycle, leader = %leader.leader, max = leader.max_value, "👑 Leader selected");

        // Cohort-wide figure over every peer's filtered median
        let cohort = self.cohort_figure(&proposals)?;
        tracing::info!(cycle, price = %cohort.price, peers = cohort.rates.len(), "📈 Cohort consensus price");

        // Round 2: signing addresses
        let own_address = self.signer.address().clone();
        let deadline = self.deadline(self.settings.data_round_timeout());
        let addresses = self
            .coordinator
            .run_round(
                RoundId::new(cycle, RoundPhase::Signers),
                &own_address,
                cohort_size,
                deadline,
            )
            .await?
            .require_quorum()?;
        let mut signer_addresses: Vec<PeerAddress> = addresses.into_values().collect();
        signer_addresses.sort();
        signer_addresses.dedup();

        // Only externally sourced input; every peer is assumed to read the same value.
        let sequence = self
            .ledger
            .account_sequence(&self.assembler.settings().source_account)
            .await
            .map_err(OracleError::Ledger)?;

        let payload = self
            .assembler
            .build(&AgreedValues {
                price: cohort.price,
                rates: &cohort.rates,
                signers: &signer_addresses,
                cohort_size,
                sequence,
            })
            .map_err(OracleError::Ledger)?;
        let share = self
            .signer
            .sign_as(&payload, own_address.as_str())
            .map_err(OracleError::Ledger)?;
        tracing::info!(cycle, sequence, fee = %payload.fee, "🧾 Transaction payload built and signed");

        // Round 3: signature shares
        let deadline = self.deadline(self.settings.signature_round_timeout());
        let bundle = SignatureQuorumCollector::new(&mut self.coordinator)
            .collect(
                RoundId::new(cycle, RoundPhase::Signatures),
                &payload,
                &share,
                cohort_size,
                deadline,
            )
            .await?;

        let submission = self.submit(cycle, &leader, &bundle).await;

        let report = CycleReport {
            cycle,
            local,
            proposals: values,
            leader,
            cohort,
            signers: payload
                .signer_entries
                .iter()
                .map(|e| e.signer_entry.clone())
                .collect(),
            payload,
            bundle,
            submission,
        };
        self.last_report = Some(report.clone());
        Ok(report)
    }

    fn deadline(&self, timeout: Duration) -> Instant {
        Instant::now() + timeout
    }

    fn cohort_figure(
        &self,
        proposals: &BTreeMap<PeerAddress, LeaderProposal>,
    ) -> OracleResult<CohortFigure> {
        let rates: BTreeMap<PeerAddress, Decimal> = proposals
            .iter()
            .map(|(peer, p)| (peer.clone(), p.aggregate.filtered_median))
            .collect();
        let values: Vec<Decimal> = rates.values().copied().collect();
        let aggregate = self.aggregator.aggregate_values(&values)?;
        Ok(CohortFigure {
            price: aggregate.filtered_median,
            rates,
            aggregate,
        })
    }

    /// At most one submission per cycle, by the leader only. Failures are
    /// logged and never retried.
    async fn submit(
        &self,
        cycle: u64,
        leader: &LeaderSelection,
        bundle: &MultiSignedTransaction,
    ) -> Submission {
        if !leader.is_leader(self.address()) {
            tracing::info!(cycle, leader = %leader.leader, "Bundle complete, leader submits");
            return Submission::NotLeader;
        }

        match self.ledger.submit(bundle).await {
            Ok(result) => {
                if result.is_accepted() {
                    tracing::info!(cycle, engine_result = %result.engine_result, "🚀 Price update submitted");
                } else {
                    tracing::warn!(
                        cycle,
                        engine_result = %result.engine_result,
                        message = ?result.engine_result_message,
                        "Ledger rejected price update"
                    );
                }
                Submission::Submitted(result)
            }
            Err(e) => {
                tracing::warn!(cycle, error = %e, "Submission failed, not retrying this cycle");
                Submission::Failed {
                    error: e.to_string(),
                }
            }
        }
    }
}

/// Leader of `cycle`; an empty proposal set means nobody took part
fn elect(
    cycle: u64,
    cohort_size: usize,
    proposals: &BTreeMap<PeerAddress, u32>,
) -> OracleResult<LeaderSelection> {
    select_leader(proposals.clone()).ok_or_else(|| OracleError::InsufficientParticipants {
        round: RoundId::new(cycle, RoundPhase::Proposal).to_string(),
        received: 0,
        expected: cohort_size,
    })
}

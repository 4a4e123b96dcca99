//! Full cohort cycles over the in-process channel

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cohort_oracle::consensus::{
    run_schedule, ConsensusOracle, CycleReport, LocalCohort, OracleSettings, RoundCoordinator,
    Submission,
};
use cohort_oracle::error::{OracleError, OracleResult};
use cohort_oracle::identity::PeerIdentity;
use cohort_oracle::ledger::{
    Ledger, MultiSignedTransaction, SubmitResult, TransactionAssembler, TransactionSigner,
    TrustLineSettings,
};
use cohort_oracle::oracle::sources::PriceProvider;
use cohort_oracle::oracle::ProviderPool;
use cohort_oracle::persistence::CycleJournal;
use cohort_oracle::types::PeerAddress;
use tokio::sync::watch;

struct Scripted(Decimal);

#[async_trait]
impl PriceProvider for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn fetch(&self) -> Result<Decimal> {
        Ok(self.0)
    }
}

/// Raises shutdown from inside a running cycle
struct StopDuringFetch {
    price: Decimal,
    stop: watch::Sender<bool>,
}

#[async_trait]
impl PriceProvider for StopDuringFetch {
    fn name(&self) -> &str {
        "stop-during-fetch"
    }

    async fn fetch(&self) -> Result<Decimal> {
        let _ = self.stop.send(true);
        Ok(self.price)
    }
}

#[derive(Default)]
struct RecordingLedger {
    sequence_reads: AtomicUsize,
    submitted: Mutex<Vec<MultiSignedTransaction>>,
}

#[async_trait]
impl Ledger for RecordingLedger {
    async fn account_sequence(&self, _account: &str) -> Result<u32> {
        self.sequence_reads.fetch_add(1, Ordering::SeqCst);
        Ok(77)
    }

    async fn submit(&self, bundle: &MultiSignedTransaction) -> Result<SubmitResult> {
        if let Ok(mut submitted) = self.submitted.lock() {
            submitted.push(bundle.clone());
        }
        Ok(SubmitResult {
            engine_result: "tesSUCCESS".to_string(),
            engine_result_message: None,
            tx_hash: Some("ABC123".to_string()),
        })
    }
}

fn peer_oracle(
    cohort: &LocalCohort,
    cohort_size: usize,
    price: Decimal,
    ledger: Arc<RecordingLedger>,
) -> (PeerAddress, ConsensusOracle) {
    peer_oracle_with(cohort, cohort_size, Arc::new(Scripted(price)), ledger)
}

fn peer_oracle_with(
    cohort: &LocalCohort,
    cohort_size: usize,
    provider: Arc<dyn PriceProvider>,
    ledger: Arc<RecordingLedger>,
) -> (PeerAddress, ConsensusOracle) {
    let identity = Arc::new(PeerIdentity::generate());
    let address = identity.address().clone();
    let coordinator = RoundCoordinator::new(address.clone(), Arc::new(cohort.join(address.clone())));
    let oracle = ConsensusOracle::new(
        OracleSettings {
            cohort_size,
            round_time: Duration::from_secs(4),
        },
        ProviderPool::new(vec![provider], Duration::from_millis(500)),
        coordinator,
        TransactionAssembler::new(TrustLineSettings {
            source_account: "rOracleAccount".to_string(),
            issuer: "rIssuer".to_string(),
            currency: "USD".to_string(),
            base_fee: 12,
        }),
        identity,
        ledger,
    );
    (address, oracle)
}

#[tokio::test(start_paused = true)]
async fn three_peers_agree_and_leader_submits_once() {
    let cohort = LocalCohort::new(256);
    let ledger = Arc::new(RecordingLedger::default());

    let (_, mut a) = peer_oracle(&cohort, 3, dec!(0.50), ledger.clone());
    let (_, mut b) = peer_oracle(&cohort, 3, dec!(0.51), ledger.clone());
    let (_, mut c) = peer_oracle(&cohort, 3, dec!(0.49), ledger.clone());

    let (ra, rb, rc) = tokio::join!(a.run_cycle(42), b.run_cycle(42), c.run_cycle(42));
    let reports: Vec<CycleReport> = vec![ra.unwrap(), rb.unwrap(), rc.unwrap()];

    for report in &reports {
        assert_eq!(report.cohort.price, dec!(0.50));
        assert_eq!(report.payload, reports[0].payload);
        assert_eq!(report.leader.leader, reports[0].leader.leader);
        assert_eq!(report.bundle.shares.len(), 3);
        assert_eq!(report.payload.fee, "48");
        assert_eq!(report.payload.signer_quorum, 3);
        assert_eq!(report.payload.sequence, 77);
    }

    let submitted = reports
        .iter()
        .filter(|r| matches!(r.submission, Submission::Submitted(_)))
        .count();
    let passive = reports
        .iter()
        .filter(|r| r.submission == Submission::NotLeader)
        .count();
    assert_eq!(submitted, 1);
    assert_eq!(passive, 2);

    assert_eq!(ledger.sequence_reads.load(Ordering::SeqCst), 3);
    let bundles = ledger.submitted.lock().unwrap();
    assert_eq!(bundles.len(), 1);
    assert_eq!(bundles[0], reports[0].bundle);
}

#[tokio::test(start_paused = true)]
async fn silent_peer_aborts_cycle_without_touching_ledger() {
    let cohort = LocalCohort::new(256);
    let ledger = Arc::new(RecordingLedger::default());

    let (_, mut a) = peer_oracle(&cohort, 4, dec!(1.00), ledger.clone());
    let (_, mut b) = peer_oracle(&cohort, 4, dec!(1.01), ledger.clone());
    let (_, mut c) = peer_oracle(&cohort, 4, dec!(0.99), ledger.clone());
    let (silent, mut d) = peer_oracle(&cohort, 4, dec!(1.00), ledger.clone());
    cohort.mute(&silent);

    let (ra, rb, rc, rd) = tokio::join!(
        a.run_cycle(7),
        b.run_cycle(7),
        c.run_cycle(7),
        d.run_cycle(7)
    );

    let results: Vec<OracleResult<CycleReport>> = vec![ra, rb, rc, rd];
    for result in &results {
        assert!(matches!(
            result,
            Err(OracleError::InsufficientParticipants { .. })
        ));
    }
    if let Err(OracleError::InsufficientParticipants {
        received, expected, ..
    }) = &results[0]
    {
        assert_eq!(*received, 3);
        assert_eq!(*expected, 4);
    }

    assert_eq!(ledger.sequence_reads.load(Ordering::SeqCst), 0);
    assert!(ledger.submitted.lock().unwrap().is_empty());
    assert!(a.last_report().is_none());
}

#[tokio::test(start_paused = true)]
async fn shutdown_raised_mid_cycle_stops_after_that_cycle() {
    let cohort = LocalCohort::new(64);
    let ledger = Arc::new(RecordingLedger::default());
    let (stop_tx, stop_rx) = watch::channel(false);
    let provider = Arc::new(StopDuringFetch {
        price: dec!(2.5),
        stop: stop_tx,
    });
    let (_, mut oracle) = peer_oracle_with(&cohort, 1, provider, ledger.clone());

    let dir = std::env::temp_dir().join(format!(
        "cohort-schedule-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    let journal = CycleJournal::new(&dir).unwrap();
    let (reports_tx, reports_rx) = watch::channel(None);

    let cycles = run_schedule(&mut oracle, &journal, 60, stop_rx, &reports_tx)
        .await
        .unwrap();

    assert_eq!(cycles, 1);
    assert_eq!(ledger.submitted.lock().unwrap().len(), 1);
    let published = reports_rx.borrow().clone().unwrap();
    assert_eq!(published.cohort.price, dec!(2.5));

    let rows = journal.load_recent(10).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, "ok");
    let _ = std::fs::remove_dir_all(&dir);
}

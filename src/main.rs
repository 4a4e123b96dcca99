use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::sync::watch;

use cohort_oracle::config::AppConfig;
use cohort_oracle::consensus::{
    run_schedule, serve_lines, ConsensusOracle, OracleSettings, RoundCoordinator,
    UdpCohortChannel,
};
use cohort_oracle::identity::PeerIdentity;
use cohort_oracle::ledger::{JsonRpcLedger, TransactionAssembler, TransactionSigner, TrustLineSettings};
use cohort_oracle::logging::init_logging;
use cohort_oracle::oracle::{sources, ProviderPool};
use cohort_oracle::persistence::CycleJournal;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = AppConfig::load()?;

    // Initialize logging
    init_logging(&config.node.log_level, config.node.log_json);

    tracing::info!("🚀 Cohort oracle starting...");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Config: {}", config);

    let identity = Arc::new(PeerIdentity::load_or_generate(
        Path::new(&config.node.key_dir),
        &config.node.public_id,
    )?);

    let channel = UdpCohortChannel::bind(config.bind_addr()?, config.peer_addrs()?).await?;
    tracing::info!(addr = %channel.local_addr()?, peers = config.cohort_size(), "✅ Cohort socket bound");
    let coordinator = RoundCoordinator::new(identity.address().clone(), Arc::new(channel));

    let pool = ProviderPool::new(
        sources::registry(&config.oracle)?,
        Duration::from_millis(config.oracle.provider_timeout_ms),
    );
    let ledger = JsonRpcLedger::new(
        &config.ledger.endpoint,
        Duration::from_millis(config.ledger.submit_timeout_ms),
    )?;
    let assembler = TransactionAssembler::new(TrustLineSettings {
        source_account: config.ledger.source_account.clone(),
        issuer: config.ledger.destination_account.clone(),
        currency: config.ledger.currency.clone(),
        base_fee: config.ledger.base_fee,
    });

    let mut oracle = ConsensusOracle::new(
        OracleSettings {
            cohort_size: config.cohort_size(),
            round_time: config.round_time(),
        },
        pool,
        coordinator,
        assembler,
        identity,
        Arc::new(ledger),
    );
    let journal = CycleJournal::new(Path::new(&config.node.data_dir))?;

    // Ctrl-C flips the flag; the scheduler checks it between cycles.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    });

    // User requests on stdin, answered from the last completed cycle.
    let (reports_tx, reports_rx) = watch::channel(None);
    tokio::spawn(async move {
        let stdin = BufReader::new(tokio::io::stdin());
        if let Err(e) = serve_lines(stdin, tokio::io::stdout(), reports_rx).await {
            tracing::warn!(error = %e, "User request reader stopped");
        }
    });

    run_schedule(
        &mut oracle,
        &journal,
        config.consensus.cycle_interval_secs,
        shutdown_rx,
        &reports_tx,
    )
    .await?;

    tracing::info!("👋 Cohort oracle stopped");
    Ok(())
}

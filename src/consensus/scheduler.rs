//! Cycle scheduler - one cycle per wall-clock interval until shutdown
//!
//! Shutdown is a `watch` flag, checked between cycles; a request raised while
//! a cycle runs takes effect once that cycle ends.

use anyhow::{Context, Result};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::oracle::{ConsensusOracle, CycleReport};
use crate::persistence::{CycleJournal, CycleRecord};

/// Wall-clock cycle id; every peer with the same interval names the same cycle
pub fn current_cycle(interval_secs: u64) -> Result<u64> {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .context("System clock is before the unix epoch")?;
    Ok(now.as_secs() / interval_secs.max(1))
}

/// Run cycles until `shutdown` turns true. Every outcome is journaled and
/// each completed report is published on `reports`. Returns the number of
/// cycles run.
pub async fn run_schedule(
    oracle: &mut ConsensusOracle,
    journal: &CycleJournal,
    interval_secs: u64,
    mut shutdown: watch::Receiver<bool>,
    reports: &watch::Sender<Option<CycleReport>>,
) -> Result<u64> {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_cycle = None;
    let mut cycles_run = 0;
    let mut watching = true;

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            biased;
            changed = shutdown.changed(), if watching => {
                // A dropped sender can never request shutdown; keep running.
                if changed.is_err() {
                    watching = false;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        let cycle = current_cycle(interval_secs)?;
        if last_cycle == Some(cycle) {
            continue;
        }
        last_cycle = Some(cycle);
        cycles_run += 1;

        let record = match oracle.run_cycle(cycle).await {
            Ok(report) => {
                tracing::info!(cycle, price = %report.cohort.price, "✅ Cycle complete");
                let record = CycleRecord::completed(&report);
                reports.send_replace(Some(report));
                record
            }
            Err(e) => {
                tracing::warn!(cycle, kind = e.kind(), error = %e, "Cycle aborted");
                CycleRecord::aborted(cycle, &e)
            }
        };
        if let Err(e) = journal.record(&record).await {
            tracing::warn!(cycle, error = %e, "Failed to journal cycle");
        }
    }

    tracing::info!(cycles_run, "Shutdown requested, scheduler stopped");
    Ok(cycles_run)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_id_is_interval_bucket() {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let cycle = current_cycle(60).unwrap();
        assert!(cycle == now / 60 || cycle == now / 60 + 1);
        assert!(current_cycle(0).is_ok());
    }
}

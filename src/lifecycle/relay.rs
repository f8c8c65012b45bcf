//! Oracle relay task.
//!
//! Drains oracle updates from a channel and feeds them to the controller in
//! arrival order. Rejected updates are counted and logged, never retried:
//! the upstream feed is expected to resubmit with corrected data.

use super::controller::{LifecycleController, PriceUpdateOutcome};
use super::types::{Address, MarketId, PriceSample};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleUpdate {
    pub market_id: MarketId,
    pub sample: PriceSample,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayStats {
    pub received: u64,
    pub settled: u64,
    pub ignored: u64,
    pub rejected: u64,
}

/// Spawn the relay. The task ends when every sender is dropped and returns its stats.
pub fn spawn_oracle_relay(
    controller: Arc<LifecycleController>,
    oracle: Address,
    mut rx: mpsc::Receiver<OracleUpdate>,
) -> JoinHandle<RelayStats> {
    tokio::spawn(async move {
        let mut stats = RelayStats::default();
        info!(oracle = %oracle, "oracle relay started");

        while let Some(update) = rx.recv().await {
            stats.received += 1;
            match controller.process_price_update(
                &oracle,
                update.market_id,
                update.sample.price,
                update.sample.observed_at,
            ) {
                Ok(PriceUpdateOutcome::Settled(report)) => {
                    stats.settled += 1;
                    info!(
                        market_id = %report.market_id,
                        phase = %report.phase,
                        swept = %report.swept,
                        "relay settled market"
                    );
                }
                Ok(PriceUpdateOutcome::Ignored(reason)) => {
                    stats.ignored += 1;
                    debug!(
                        market_id = %update.market_id,
                        reason = reason.as_str(),
                        "relay sample ignored"
                    );
                }
                Err(err) => {
                    stats.rejected += 1;
                    warn!(market_id = %update.market_id, error = %err, "relay sample rejected");
                }
            }
        }

        info!(
            received = stats.received,
            settled = stats.settled,
            ignored = stats.ignored,
            rejected = stats.rejected,
            "oracle relay drained"
        );
        stats
    })
}

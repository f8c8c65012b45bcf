//! Lifecycle Controller
//!
//! Owns the market table and drives each market through
//! `Open -> InProgress -> {Matured | Liquidated}`:
//! - gates pool deposits/withdrawals by phase
//! - starts markets inside their event window
//! - consumes oracle samples and settles exactly once
//!
//! # Concurrency
//!
//! Each market record sits behind its own mutex. Pool operations run their
//! balance mutation while holding that mutex (`gated`), and settlement sweeps
//! under the same mutex, so the phase check and the mutation it authorizes
//! are one critical section. Lock order is always market -> pool -> asset.
//!
//! # Settlement guard
//!
//! `settled` is the authoritative terminal guard. Phase is recorded alongside
//! it, but every settlement path checks `settled` first.

use super::clock::Clock;
use super::errors::{
    LifecycleError, LifecycleResult, PhaseErrorKind, TimingErrorKind, TransferError,
};
use super::factory::PoolPair;
use super::journal::{record_event, EventJournal, LifecycleEvent};
use super::pool::Pool;
use super::types::{Address, Amount, Market, MarketId, Phase, Side, UnixSecs, Window};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Static controller configuration.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Identity the controller presents to pools when sweeping.
    pub address: Address,
    /// The only caller allowed to register markets.
    pub factory: Address,
    /// Callers allowed to submit price samples. Empty means anyone may.
    pub oracle_allowlist: Vec<Address>,
    /// Samples older than this (relative to now) are ignored.
    pub max_sample_age_secs: Option<i64>,
}

/// Which pool gate is being asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolOperation {
    Deposit,
    Withdraw,
}

/// What a settlement actually did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReport {
    pub market_id: MarketId,
    pub phase: Phase,
    pub source: Side,
    pub destination: Side,
    /// Source balance at the moment of settlement.
    pub intended: Amount,
    pub swept: Amount,
    /// Present when the sweep failed; the phase flip committed regardless.
    pub sweep_error: Option<String>,
}

/// Why a price sample changed nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    AlreadySettled,
    NotInProgress,
    /// Inside the window and at or above the trigger.
    NoBreach,
    StaleSample,
}

impl IgnoreReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AlreadySettled => "already_settled",
            Self::NotInProgress => "not_in_progress",
            Self::NoBreach => "no_breach",
            Self::StaleSample => "stale_sample",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PriceUpdateOutcome {
    Settled(SettlementReport),
    Ignored(IgnoreReason),
}

impl PriceUpdateOutcome {
    pub fn report(&self) -> Option<&SettlementReport> {
        match self {
            Self::Settled(report) => Some(report),
            Self::Ignored(_) => None,
        }
    }
}

/// Check window/trigger terms shared by the factory and the controller.
pub fn validate_market_terms(window: Window, trigger_price: u128) -> LifecycleResult<()> {
    if window.end <= window.start {
        return Err(LifecycleError::validation(format!(
            "window end {} must be after window start {}",
            window.end, window.start
        )));
    }
    if trigger_price == 0 {
        return Err(LifecycleError::validation("trigger price must be positive"));
    }
    Ok(())
}

struct PoolHandle {
    address: Address,
    pool: Weak<Pool>,
}

struct MarketEntry {
    market: Market,
    risk: PoolHandle,
    hedge: PoolHandle,
}

impl MarketEntry {
    fn pool(&self, side: Side) -> &PoolHandle {
        match side {
            Side::Risk => &self.risk,
            Side::Hedge => &self.hedge,
        }
    }
}

pub struct LifecycleController {
    config: ControllerConfig,
    oracles: HashSet<Address>,
    clock: Arc<dyn Clock>,
    journal: Arc<dyn EventJournal>,
    markets: RwLock<BTreeMap<MarketId, Arc<Mutex<MarketEntry>>>>,
}

impl LifecycleController {
    pub fn new(
        config: ControllerConfig,
        clock: Arc<dyn Clock>,
        journal: Arc<dyn EventJournal>,
    ) -> Self {
        let oracles: HashSet<Address> = config.oracle_allowlist.iter().cloned().collect();
        if oracles.is_empty() {
            warn!("oracle allow-list is empty: any caller may submit price samples");
        }
        info!(
            controller = %config.address,
            factory = %config.factory,
            oracles = oracles.len(),
            "lifecycle controller ready"
        );
        Self {
            config,
            oracles,
            clock,
            journal,
            markets: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn address(&self) -> &Address {
        &self.config.address
    }

    pub fn factory_address(&self) -> &Address {
        &self.config.factory
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    pub fn journal(&self) -> Arc<dyn EventJournal> {
        Arc::clone(&self.journal)
    }

    pub(crate) fn record(&self, event: LifecycleEvent) {
        record_event(self.journal.as_ref(), self.clock.as_ref(), event);
    }

    fn entry(&self, market_id: MarketId) -> LifecycleResult<Arc<Mutex<MarketEntry>>> {
        self.markets
            .read()
            .get(&market_id)
            .cloned()
            .ok_or(LifecycleError::NotFound { market_id })
    }

    // =====================================================================
    // Registration
    // =====================================================================

    /// Register a freshly created pair. Only the factory may call this.
    pub fn on_market_created(
        &self,
        caller: &Address,
        market_id: MarketId,
        window_start: UnixSecs,
        window_end: UnixSecs,
        trigger_price: u128,
        pair: &PoolPair,
    ) -> LifecycleResult<()> {
        if caller != &self.config.factory {
            return Err(LifecycleError::unauthorized(caller, "register markets"));
        }
        let window = Window {
            start: window_start,
            end: window_end,
        };
        validate_market_terms(window, trigger_price)?;
        if pair.market_id != market_id {
            return Err(LifecycleError::validation(format!(
                "pair belongs to market {}, not {}",
                pair.market_id, market_id
            )));
        }

        let entry = MarketEntry {
            market: Market {
                id: market_id,
                phase: Phase::Open,
                window,
                trigger_price,
                settled: false,
            },
            risk: PoolHandle {
                address: pair.risk.address().clone(),
                pool: Arc::downgrade(&pair.risk),
            },
            hedge: PoolHandle {
                address: pair.hedge.address().clone(),
                pool: Arc::downgrade(&pair.hedge),
            },
        };

        {
            let mut markets = self.markets.write();
            if markets.contains_key(&market_id) {
                return Err(LifecycleError::validation(format!(
                    "market {} is already registered",
                    market_id
                )));
            }
            markets.insert(market_id, Arc::new(Mutex::new(entry)));
        }

        info!(
            market_id = %market_id,
            window_start,
            window_end,
            trigger_price = %trigger_price,
            "market registered"
        );
        self.record(LifecycleEvent::MarketCreated {
            market_id,
            window_start,
            window_end,
            trigger_price,
            risk_pool: pair.risk.address().clone(),
            hedge_pool: pair.hedge.address().clone(),
        });
        Ok(())
    }

    // =====================================================================
    // Transitions
    // =====================================================================

    /// `Open -> InProgress`, only inside the event window.
    pub fn start_market(&self, market_id: MarketId) -> LifecycleResult<()> {
        let entry = self.entry(market_id)?;
        let mut entry = entry.lock();
        let now = self.clock.now();
        let market = &mut entry.market;

        if market.phase != Phase::Open {
            return Err(LifecycleError::Phase {
                market_id,
                phase: market.phase,
                kind: PhaseErrorKind::InvalidTransition,
            });
        }
        if now < market.window.start {
            return Err(LifecycleError::Timing {
                market_id,
                now,
                kind: TimingErrorKind::EventNotStarted,
            });
        }
        if market.window.has_ended(now) {
            return Err(LifecycleError::Timing {
                market_id,
                now,
                kind: TimingErrorKind::EventAlreadyEnded,
            });
        }

        market.phase = Phase::InProgress;
        info!(market_id = %market_id, now, "market started");
        drop(entry);
        self.record(LifecycleEvent::MarketStarted { market_id });
        Ok(())
    }

    /// Consume one oracle sample.
    ///
    /// - in window, `price < trigger`: liquidate (risk -> hedge)
    /// - after window end: settle on this sample, liquidate if
    ///   `price < trigger`, mature (hedge -> risk) otherwise
    /// - anything else, including replays after settlement: ignored
    pub fn process_price_update(
        &self,
        caller: &Address,
        market_id: MarketId,
        price: u128,
        observed_at: UnixSecs,
    ) -> LifecycleResult<PriceUpdateOutcome> {
        if !self.oracles.is_empty() && !self.oracles.contains(caller) {
            return Err(LifecycleError::unauthorized(caller, "submit price samples"));
        }
        let entry = self.entry(market_id)?;
        let mut entry = entry.lock();
        let now = self.clock.now();

        if observed_at > now {
            return Err(LifecycleError::MalformedOracleSample {
                market_id,
                observed_at,
                now,
            });
        }

        let market = &entry.market;
        let breached = price < market.trigger_price;
        let decision = if market.settled {
            Err(IgnoreReason::AlreadySettled)
        } else if market.phase != Phase::InProgress {
            Err(IgnoreReason::NotInProgress)
        } else if self
            .config
            .max_sample_age_secs
            .is_some_and(|max_age| now.saturating_sub(observed_at) > max_age)
        {
            Err(IgnoreReason::StaleSample)
        } else if breached && market.window.contains(now) {
            Ok(Phase::Liquidated)
        } else if market.window.has_ended(now) {
            Ok(if breached { Phase::Liquidated } else { Phase::Matured })
        } else {
            Err(IgnoreReason::NoBreach)
        };

        match decision {
            Ok(target) => {
                info!(
                    market_id = %market_id,
                    price = %price,
                    trigger = %market.trigger_price,
                    observed_at,
                    target = %target,
                    "price sample settles market"
                );
                let report = self.settle(&mut entry, target);
                Ok(PriceUpdateOutcome::Settled(report))
            }
            Err(reason) => {
                debug!(
                    market_id = %market_id,
                    price = %price,
                    observed_at,
                    reason = reason.as_str(),
                    "price sample ignored"
                );
                drop(entry);
                if reason != IgnoreReason::NoBreach {
                    self.record(LifecycleEvent::PriceSampleIgnored {
                        market_id,
                        price,
                        observed_at,
                        reason: reason.as_str().to_string(),
                    });
                }
                Ok(PriceUpdateOutcome::Ignored(reason))
            }
        }
    }

    /// Explicit maturation once the window has closed, without a price sample.
    pub fn mature_market(&self, market_id: MarketId) -> LifecycleResult<SettlementReport> {
        let entry = self.entry(market_id)?;
        let mut entry = entry.lock();
        let now = self.clock.now();
        let market = &entry.market;

        if market.settled {
            return Err(LifecycleError::AlreadySettled { market_id });
        }
        if market.phase != Phase::InProgress {
            return Err(LifecycleError::Phase {
                market_id,
                phase: market.phase,
                kind: PhaseErrorKind::InvalidTransition,
            });
        }
        if now < market.window.end {
            return Err(LifecycleError::Timing {
                market_id,
                now,
                kind: TimingErrorKind::EventNotEnded,
            });
        }

        Ok(self.settle(&mut entry, Phase::Matured))
    }

    /// Sweep the losing pool into its sibling, then commit the terminal phase.
    ///
    /// The sweep is best effort: its failure is logged and reported but the
    /// phase and `settled` are committed unconditionally.
    fn settle(&self, entry: &mut MarketEntry, target: Phase) -> SettlementReport {
        let market_id = entry.market.id;
        debug_assert!(!entry.market.settled);
        debug_assert!(entry.market.phase.can_transition_to(target));

        let source = match target {
            Phase::Liquidated => Side::Risk,
            _ => Side::Hedge,
        };
        let destination = source.opposite();
        let dest_address = entry.pool(destination).address.clone();

        let (intended, result) = self.sweep_full_balance(entry.pool(source), &dest_address);
        let (swept, sweep_error) = match result {
            Ok(moved) => (moved, None),
            // The only place a failure is downgraded: the phase record wins.
            Err(err) => {
                warn!(
                    market_id = %market_id,
                    source = %source,
                    amount = %intended,
                    error = %err,
                    "settlement sweep failed; committing phase anyway"
                );
                self.record(LifecycleEvent::SweepFailed {
                    market_id,
                    source,
                    amount: intended,
                    error: err.to_string(),
                });
                (0, Some(err.to_string()))
            }
        };

        entry.market.phase = target;
        entry.market.settled = true;

        info!(
            market_id = %market_id,
            phase = %target,
            source = %source,
            swept = %swept,
            "market settled"
        );
        self.record(LifecycleEvent::MarketSettled {
            market_id,
            phase: target,
            source,
            intended,
            swept,
        });

        SettlementReport {
            market_id,
            phase: target,
            source,
            destination,
            intended,
            swept,
            sweep_error,
        }
    }

    /// Returns `(balance seen, sweep result)`.
    fn sweep_full_balance(
        &self,
        source: &PoolHandle,
        destination: &Address,
    ) -> (Amount, LifecycleResult<Amount>) {
        let Some(pool) = source.pool.upgrade() else {
            let err = TransferError::PoolUnavailable {
                pool: source.address.clone(),
            };
            return (0, Err(err.into()));
        };
        let balance = pool.total_balance();
        if balance == 0 {
            return (0, Ok(0));
        }
        let result = pool
            .sweep_to(&self.config.address, destination, balance)
            .map(|()| balance);
        (balance, result)
    }

    // =====================================================================
    // Gates
    // =====================================================================

    fn ensure_allowed(market: &Market, op: PoolOperation) -> LifecycleResult<()> {
        if market.phase.allows_pool_activity() {
            return Ok(());
        }
        Err(LifecycleError::Phase {
            market_id: market.id,
            phase: market.phase,
            kind: match op {
                PoolOperation::Deposit => PhaseErrorKind::DepositNotAllowed,
                PoolOperation::Withdraw => PhaseErrorKind::WithdrawNotAllowed,
            },
        })
    }

    pub fn check_deposit_allowed(&self, market_id: MarketId) -> LifecycleResult<()> {
        let entry = self.entry(market_id)?;
        let entry = entry.lock();
        Self::ensure_allowed(&entry.market, PoolOperation::Deposit)
    }

    pub fn check_withdraw_allowed(&self, market_id: MarketId) -> LifecycleResult<()> {
        let entry = self.entry(market_id)?;
        let entry = entry.lock();
        Self::ensure_allowed(&entry.market, PoolOperation::Withdraw)
    }

    pub fn deposit_allowed(&self, market_id: MarketId) -> LifecycleResult<bool> {
        Ok(self.phase(market_id)?.allows_pool_activity())
    }

    pub fn withdraw_allowed(&self, market_id: MarketId) -> LifecycleResult<bool> {
        Ok(self.phase(market_id)?.allows_pool_activity())
    }

    /// Run `f` while holding the market's lock, after the phase gate passes.
    ///
    /// `f` must not call back into the controller for the same market.
    pub(crate) fn gated<T, F>(
        &self,
        market_id: MarketId,
        op: PoolOperation,
        f: F,
    ) -> LifecycleResult<T>
    where
        F: FnOnce() -> LifecycleResult<T>,
    {
        let entry = self.entry(market_id)?;
        let entry = entry.lock();
        Self::ensure_allowed(&entry.market, op)?;
        f()
    }

    // =====================================================================
    // Queries
    // =====================================================================

    pub fn market(&self, market_id: MarketId) -> LifecycleResult<Market> {
        let entry = self.entry(market_id)?;
        let market = entry.lock().market.clone();
        Ok(market)
    }

    pub fn phase(&self, market_id: MarketId) -> LifecycleResult<Phase> {
        Ok(self.market(market_id)?.phase)
    }

    pub fn window(&self, market_id: MarketId) -> LifecycleResult<Window> {
        Ok(self.market(market_id)?.window)
    }

    pub fn trigger_price(&self, market_id: MarketId) -> LifecycleResult<u128> {
        Ok(self.market(market_id)?.trigger_price)
    }

    pub fn is_settled(&self, market_id: MarketId) -> LifecycleResult<bool> {
        Ok(self.market(market_id)?.settled)
    }

    pub fn market_ids(&self) -> Vec<MarketId> {
        self.markets.read().keys().copied().collect()
    }
}

//! Scripted Lifecycle Simulation
//!
//! Replays a TOML script of lifecycle steps against an in-memory asset and a
//! manual clock. All times in a script are offsets (seconds) from the
//! script's `start_time`, so scenarios read like "window opens at T+3600".
//!
//! A failing step does not abort the run: its error is recorded in the
//! report, which is how scripts exercise guard violations.

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::lifecycle::{
    Address, AssetLedger, Clock, InMemoryAsset, LifecycleError, LifecycleResult, ManualClock,
    MarketId, Phase, PriceUpdateOutcome, Side, UnixSecs,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    pub start_time: UnixSecs,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Script {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read script {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("parse script {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    CreatePair {
        window_start: i64,
        window_end: i64,
        trigger_price: u64,
    },
    Fund {
        account: String,
        amount: u64,
    },
    Deposit {
        market_id: u64,
        side: Side,
        account: String,
        amount: u64,
    },
    Withdraw {
        market_id: u64,
        side: Side,
        account: String,
        amount: u64,
    },
    /// Redeem `claims`, or everything the account holds when omitted.
    Redeem {
        market_id: u64,
        side: Side,
        account: String,
        claims: Option<u64>,
    },
    AdvanceTo {
        at: i64,
    },
    Advance {
        secs: i64,
    },
    Start {
        market_id: u64,
    },
    Price {
        market_id: u64,
        price: u64,
        /// Defaults to the current time.
        observed_at: Option<i64>,
        /// Defaults to the first allow-listed oracle.
        oracle: Option<String>,
    },
    Mature {
        market_id: u64,
    },
    PauseAsset {
        paused: bool,
    },
}

impl Step {
    pub fn action(&self) -> &'static str {
        match self {
            Step::CreatePair { .. } => "create_pair",
            Step::Fund { .. } => "fund",
            Step::Deposit { .. } => "deposit",
            Step::Withdraw { .. } => "withdraw",
            Step::Redeem { .. } => "redeem",
            Step::AdvanceTo { .. } => "advance_to",
            Step::Advance { .. } => "advance",
            Step::Start { .. } => "start",
            Step::Price { .. } => "price",
            Step::Mature { .. } => "mature",
            Step::PauseAsset { .. } => "pause_asset",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub index: usize,
    pub action: String,
    pub at: UnixSecs,
    pub ok: bool,
    pub detail: String,
    pub error_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSummary {
    pub market_id: MarketId,
    /// None when the controller never accepted the market.
    pub phase: Option<Phase>,
    pub settled: bool,
    pub risk_balance: u128,
    pub hedge_balance: u128,
    pub risk_claims: u128,
    pub hedge_claims: u128,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationReport {
    pub steps: Vec<StepRecord>,
    pub markets: Vec<MarketSummary>,
    pub journal_entries: usize,
}

impl SimulationReport {
    pub fn failed_steps(&self) -> impl Iterator<Item = &StepRecord> {
        self.steps.iter().filter(|s| !s.ok)
    }
}

pub struct Simulator {
    start: UnixSecs,
    clock: Arc<ManualClock>,
    asset: Arc<InMemoryAsset>,
    engine: Engine,
    default_oracle: Address,
}

impl Simulator {
    pub fn new(config: EngineConfig, start_time: UnixSecs) -> Result<Self> {
        let clock = Arc::new(ManualClock::new(start_time));
        let asset = Arc::new(InMemoryAsset::new(config.asset.symbol.clone()));
        let default_oracle = config
            .controller
            .oracle_allowlist
            .first()
            .map(Address::new)
            .unwrap_or_else(|| Address::new("oracle"));
        let engine = Engine::build(config, clock.clone(), asset.clone())?;
        Ok(Self {
            start: start_time,
            clock,
            asset,
            engine,
            default_oracle,
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn asset(&self) -> &InMemoryAsset {
        &self.asset
    }

    pub fn run(&self, script: &Script) -> SimulationReport {
        let mut steps = Vec::with_capacity(script.steps.len());
        for (index, step) in script.steps.iter().enumerate() {
            let result = self.apply(step);
            let at = self.clock.now();
            let record = match result {
                Ok(detail) => StepRecord {
                    index,
                    action: step.action().to_string(),
                    at,
                    ok: true,
                    detail,
                    error_code: None,
                },
                Err(err) => {
                    warn!(index, action = step.action(), error = %err, "step failed");
                    StepRecord {
                        index,
                        action: step.action().to_string(),
                        at,
                        ok: false,
                        detail: err.to_string(),
                        error_code: Some(err.code().to_string()),
                    }
                }
            };
            steps.push(record);
        }

        let markets = self.market_summaries();
        let journal_entries = self
            .engine
            .journal
            .entries()
            .map(|entries| entries.len())
            .unwrap_or(0);
        info!(steps = steps.len(), markets = markets.len(), "simulation finished");

        SimulationReport {
            steps,
            markets,
            journal_entries,
        }
    }

    /// Current state of every pair the factory has created.
    pub fn market_summaries(&self) -> Vec<MarketSummary> {
        let factory = &self.engine.factory;
        let controller = &self.engine.controller;
        factory
            .market_ids()
            .into_iter()
            .filter_map(|id| factory.get_pair(id).ok())
            .map(|pair| {
                let market = controller.market(pair.market_id).ok();
                MarketSummary {
                    market_id: pair.market_id,
                    phase: market.as_ref().map(|m| m.phase),
                    settled: market.as_ref().map(|m| m.settled).unwrap_or(false),
                    risk_balance: pair.risk.total_balance(),
                    hedge_balance: pair.hedge.total_balance(),
                    risk_claims: pair.risk.total_claims(),
                    hedge_claims: pair.hedge.total_claims(),
                }
            })
            .collect()
    }

    fn apply(&self, step: &Step) -> LifecycleResult<String> {
        let controller = &self.engine.controller;
        let factory = &self.engine.factory;

        match step {
            Step::CreatePair {
                window_start,
                window_end,
                trigger_price,
            } => {
                let pair = factory.create_pair(
                    self.start + window_start,
                    self.start + window_end,
                    u128::from(*trigger_price),
                )?;
                Ok(format!("market {} created", pair.market_id))
            }
            Step::Fund { account, amount } => {
                let account = Address::new(account);
                self.asset.mint(&account, u128::from(*amount))?;
                Ok(format!("{} funded, balance {}", account, self.asset.balance_of(&account)))
            }
            Step::Deposit {
                market_id,
                side,
                account,
                amount,
            } => {
                let pair = factory.get_pair(MarketId(*market_id))?;
                let account = Address::new(account);
                let claims = pair
                    .pool(*side)
                    .deposit(&account, u128::from(*amount), &account)?;
                Ok(format!("{} received {} {} claims", account, claims, side))
            }
            Step::Withdraw {
                market_id,
                side,
                account,
                amount,
            } => {
                let pair = factory.get_pair(MarketId(*market_id))?;
                let account = Address::new(account);
                let burned = pair
                    .pool(*side)
                    .withdraw(&account, u128::from(*amount), &account, &account)?;
                Ok(format!("{} burned {} {} claims", account, burned, side))
            }
            Step::Redeem {
                market_id,
                side,
                account,
                claims,
            } => {
                let pair = factory.get_pair(MarketId(*market_id))?;
                let pool = pair.pool(*side);
                let account = Address::new(account);
                let claims = match claims {
                    Some(c) => u128::from(*c),
                    None => pool.max_redeem(&account),
                };
                let assets = pool.redeem(&account, claims, &account, &account)?;
                Ok(format!("{} redeemed {} {} claims for {}", account, claims, side, assets))
            }
            Step::AdvanceTo { at } => {
                let target = self.start + at;
                if !self.clock.set(target) {
                    return Err(LifecycleError::validation(format!(
                        "clock cannot move back to {}",
                        target
                    )));
                }
                Ok(format!("now {}", target))
            }
            Step::Advance { secs } => Ok(format!("now {}", self.clock.advance(*secs))),
            Step::Start { market_id } => {
                controller.start_market(MarketId(*market_id))?;
                Ok(format!("market {} in progress", market_id))
            }
            Step::Price {
                market_id,
                price,
                observed_at,
                oracle,
            } => {
                let observed_at = observed_at
                    .map(|offset| self.start + offset)
                    .unwrap_or_else(|| self.clock.now());
                let oracle = oracle
                    .as_ref()
                    .map(Address::new)
                    .unwrap_or_else(|| self.default_oracle.clone());
                let outcome = controller.process_price_update(
                    &oracle,
                    MarketId(*market_id),
                    u128::from(*price),
                    observed_at,
                )?;
                Ok(match outcome {
                    PriceUpdateOutcome::Settled(report) => format!(
                        "market {} {} (swept {} of {})",
                        report.market_id, report.phase, report.swept, report.intended
                    ),
                    PriceUpdateOutcome::Ignored(reason) => {
                        format!("sample ignored: {}", reason.as_str())
                    }
                })
            }
            Step::Mature { market_id } => {
                let report = controller.mature_market(MarketId(*market_id))?;
                Ok(format!(
                    "market {} matured (swept {} of {})",
                    report.market_id, report.swept, report.intended
                ))
            }
            Step::PauseAsset { paused } => {
                self.asset.set_paused(*paused);
                Ok(format!("asset paused: {}", paused))
            }
        }
    }
}

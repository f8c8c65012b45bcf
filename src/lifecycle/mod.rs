//! Lifecycle Module - Paired Risk/Hedge Pools
//!
//! This module handles:
//! 1. Pool pair creation with mutual sibling links (factory)
//! 2. Phase-gated deposits and withdrawals (pool)
//! 3. Market phases, oracle samples and one-time settlement (controller)
//!
//! Flow:
//! - The factory creates a pair and registers it with the controller (Open)
//! - Depositors fund either side while the market is Open
//! - An operator starts the market inside its window (InProgress)
//! - A price sample below the trigger liquidates (risk -> hedge); after the
//!   window closes the market settles on the next sample, or matures
//!   (hedge -> risk) when called explicitly
//! - Pools reopen so holders can redeem against the settled balances

pub mod asset;
pub mod clock;
pub mod controller;
pub mod errors;
pub mod factory;
pub mod journal;
pub mod pool;
pub mod relay;
pub mod types;


pub use asset::{AssetLedger, InMemoryAsset};
pub use clock::{Clock, ManualClock, SystemClock};
pub use controller::{
    validate_market_terms, ControllerConfig, IgnoreReason, LifecycleController, PoolOperation,
    PriceUpdateOutcome, SettlementReport,
};
pub use errors::{LifecycleError, LifecycleResult, PhaseErrorKind, TimingErrorKind, TransferError};
pub use factory::{PoolPair, PoolPairFactory};
pub use journal::{
    record_event, EventJournal, JournalEntry, LifecycleEvent, MemoryJournal, SqliteJournal,
};
pub use pool::Pool;
pub use relay::{spawn_oracle_relay, OracleUpdate, RelayStats};
pub use types::{Address, Amount, Market, MarketId, Phase, PriceSample, Side, UnixSecs, Window};

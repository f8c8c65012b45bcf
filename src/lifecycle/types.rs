//! Core lifecycle types: market ids, phases, sides, addresses and oracle samples.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unix timestamp in seconds.
pub type UnixSecs = i64;

/// Asset units (and claim units) are unsigned integers, never floats.
pub type Amount = u128;

/// Sequential market identifier assigned by the factory, starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarketId(pub u64);

impl fmt::Display for MarketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a participant: depositor, pool, factory, controller or oracle.
///
/// Normalized the same way wallet addresses are (trimmed, lowercased) so that
/// identity checks are not defeated by casing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Address {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl From<&str> for Address {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<Address> for String {
    fn from(addr: Address) -> Self {
        addr.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Market lifecycle phase.
///
/// Transitions are monotonic: `Open -> InProgress -> {Matured | Liquidated}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Phase {
    Open = 0,
    InProgress = 1,
    Matured = 2,
    Liquidated = 3,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Matured | Phase::Liquidated)
    }

    /// Pool deposits and withdrawals are frozen only while the event runs.
    pub fn allows_pool_activity(self) -> bool {
        !matches!(self, Phase::InProgress)
    }

    pub fn can_transition_to(self, next: Phase) -> bool {
        matches!(
            (self, next),
            (Phase::Open, Phase::InProgress)
                | (Phase::InProgress, Phase::Matured)
                | (Phase::InProgress, Phase::Liquidated)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Open => "open",
            Phase::InProgress => "in_progress",
            Phase::Matured => "matured",
            Phase::Liquidated => "liquidated",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of a market a pool holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// Loses its balance to the hedge pool when the trigger is breached.
    Risk,
    /// Loses its balance to the risk pool when the market matures.
    Hedge,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Risk => Side::Hedge,
            Side::Hedge => Side::Risk,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Risk => "risk",
            Side::Hedge => "hedge",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event window, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: UnixSecs,
    pub end: UnixSecs,
}

impl Window {
    pub fn contains(&self, t: UnixSecs) -> bool {
        t >= self.start && t <= self.end
    }

    pub fn has_ended(&self, t: UnixSecs) -> bool {
        t > self.end
    }
}

/// Per-market lifecycle record owned by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Market {
    pub id: MarketId,
    pub phase: Phase,
    pub window: Window,
    pub trigger_price: u128,
    /// Sticky terminal guard. Set exactly once, by settlement.
    pub settled: bool,
}

/// One oracle observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSample {
    pub price: u128,
    pub observed_at: UnixSecs,
}

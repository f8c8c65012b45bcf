//! Lifecycle event journal.
//!
//! Every accepted state change is recorded as a `LifecycleEvent`. Journal
//! writes never fail the operation that produced the event: a write error is
//! logged and dropped.

use super::clock::Clock;
use super::types::{Address, Amount, MarketId, Phase, Side, UnixSecs};
use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    MarketCreated {
        market_id: MarketId,
        window_start: UnixSecs,
        window_end: UnixSecs,
        trigger_price: u128,
        risk_pool: Address,
        hedge_pool: Address,
    },
    MarketStarted {
        market_id: MarketId,
    },
    PriceSampleIgnored {
        market_id: MarketId,
        price: u128,
        observed_at: UnixSecs,
        reason: String,
    },
    MarketSettled {
        market_id: MarketId,
        phase: Phase,
        source: Side,
        intended: Amount,
        swept: Amount,
    },
    SweepFailed {
        market_id: MarketId,
        source: Side,
        amount: Amount,
        error: String,
    },
    Deposited {
        market_id: MarketId,
        side: Side,
        caller: Address,
        receiver: Address,
        assets: Amount,
        claims: Amount,
    },
    Withdrawn {
        market_id: MarketId,
        side: Side,
        owner: Address,
        receiver: Address,
        assets: Amount,
        claims: Amount,
    },
}

impl LifecycleEvent {
    pub fn market_id(&self) -> MarketId {
        match self {
            Self::MarketCreated { market_id, .. }
            | Self::MarketStarted { market_id }
            | Self::PriceSampleIgnored { market_id, .. }
            | Self::MarketSettled { market_id, .. }
            | Self::SweepFailed { market_id, .. }
            | Self::Deposited { market_id, .. }
            | Self::Withdrawn { market_id, .. } => *market_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::MarketCreated { .. } => "market_created",
            Self::MarketStarted { .. } => "market_started",
            Self::PriceSampleIgnored { .. } => "price_sample_ignored",
            Self::MarketSettled { .. } => "market_settled",
            Self::SweepFailed { .. } => "sweep_failed",
            Self::Deposited { .. } => "deposited",
            Self::Withdrawn { .. } => "withdrawn",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: String,
    pub ts: UnixSecs,
    pub event: LifecycleEvent,
}

pub trait EventJournal: Send + Sync {
    fn record(&self, entry: &JournalEntry) -> Result<()>;

    /// All entries in insertion order.
    fn entries(&self) -> Result<Vec<JournalEntry>>;
}

/// Stamp `event` with an id and the clock time, then record it. Errors are logged.
pub fn record_event(journal: &dyn EventJournal, clock: &dyn Clock, event: LifecycleEvent) {
    let entry = JournalEntry {
        id: Uuid::new_v4().to_string(),
        ts: clock.now(),
        event,
    };
    if let Err(err) = journal.record(&entry) {
        warn!(
            market_id = %entry.event.market_id(),
            kind = entry.event.kind(),
            error = %err,
            "journal write failed"
        );
    }
}

#[derive(Debug, Default)]
pub struct MemoryJournal {
    entries: RwLock<Vec<JournalEntry>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events_for(&self, market_id: MarketId) -> Vec<LifecycleEvent> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.event.market_id() == market_id)
            .map(|e| e.event.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl EventJournal for MemoryJournal {
    fn record(&self, entry: &JournalEntry) -> Result<()> {
        self.entries.write().push(entry.clone());
        Ok(())
    }

    fn entries(&self) -> Result<Vec<JournalEntry>> {
        Ok(self.entries.read().clone())
    }
}

/// SQLite-backed journal, one row per event.
pub struct SqliteJournal {
    conn: Mutex<Connection>,
}

impl SqliteJournal {
    pub fn open(db_path: &str) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create journal dir {}", parent.display()))?;
            }
        }
        let conn = Connection::open(db_path).context("open lifecycle journal")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS lifecycle_events (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                ts INTEGER NOT NULL,
                market_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_lifecycle_events_market
             ON lifecycle_events(market_id, seq)",
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn count_for(&self, market_id: MarketId) -> Result<u64> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM lifecycle_events WHERE market_id = ?1",
            params![market_id.0 as i64],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }
}

impl EventJournal for SqliteJournal {
    fn record(&self, entry: &JournalEntry) -> Result<()> {
        let payload = serde_json::to_string(&entry.event).context("encode lifecycle event")?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO lifecycle_events (id, ts, market_id, kind, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.id,
                entry.ts,
                entry.event.market_id().0 as i64,
                entry.event.kind(),
                payload
            ],
        )?;
        Ok(())
    }

    fn entries(&self) -> Result<Vec<JournalEntry>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT id, ts, payload FROM lifecycle_events ORDER BY seq ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, ts, payload) = row?;
            let event: LifecycleEvent =
                serde_json::from_str(&payload).context("decode lifecycle event")?;
            out.push(JournalEntry { id, ts, event });
        }
        Ok(out)
    }
}

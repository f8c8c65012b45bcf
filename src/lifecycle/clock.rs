//! Time source for the lifecycle engine.
//!
//! Every window comparison reads the injected clock, never system time
//! directly, so scenarios replay deterministically.

use super::types::UnixSecs;
use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};

pub trait Clock: Send + Sync {
    /// Current time in Unix seconds.
    fn now(&self) -> UnixSecs;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> UnixSecs {
        Utc::now().timestamp()
    }
}

/// Settable clock for tests and scripted simulations. Only moves forward.
#[derive(Debug)]
pub struct ManualClock {
    current: AtomicI64,
}

impl ManualClock {
    pub fn new(start: UnixSecs) -> Self {
        Self {
            current: AtomicI64::new(start),
        }
    }

    /// Move to `t`. Returns false (and leaves the clock alone) if `t` is in the past.
    pub fn set(&self, t: UnixSecs) -> bool {
        let mut cur = self.current.load(Ordering::Acquire);
        loop {
            if t < cur {
                return false;
            }
            match self
                .current
                .compare_exchange(cur, t, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return true,
                Err(actual) => cur = actual,
            }
        }
    }

    /// Advance by `secs` (negative deltas are ignored).
    pub fn advance(&self, secs: i64) -> UnixSecs {
        let delta = secs.max(0);
        self.current.fetch_add(delta, Ordering::AcqRel) + delta
    }
}

impl Clock for ManualClock {
    fn now(&self) -> UnixSecs {
        self.current.load(Ordering::Acquire)
    }
}

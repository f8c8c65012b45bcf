//! Lifecycle error taxonomy.
//!
//! Every guard violation is a typed, synchronous failure. The only error that
//! is ever downgraded is a `Transfer` failure inside the settlement sweep, and
//! that happens at exactly one call site in the controller.

use super::types::{Address, Amount, MarketId, Phase, UnixSecs};

/// Why a phase guard rejected the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseErrorKind {
    DepositNotAllowed,
    WithdrawNotAllowed,
    InvalidTransition,
}

/// Why a timing guard rejected the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingErrorKind {
    EventNotStarted,
    EventAlreadyEnded,
    EventNotEnded,
}

/// Failure of the underlying asset movement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// The asset is paused and refuses all movement.
    Paused,
    InsufficientFunds {
        account: Address,
        available: Amount,
        requested: Amount,
    },
    /// The pool handle no longer exists.
    PoolUnavailable { pool: Address },
}

impl std::fmt::Display for TransferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Paused => write!(f, "asset transfers are paused"),
            Self::InsufficientFunds {
                account,
                available,
                requested,
            } => write!(
                f,
                "insufficient funds in {}: available {}, requested {}",
                account, available, requested
            ),
            Self::PoolUnavailable { pool } => write!(f, "pool {} is no longer available", pool),
        }
    }
}

impl std::error::Error for TransferError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// Rejected input parameters (window, trigger, arithmetic range).
    Validation(String),
    /// Operation not permitted in the market's current phase.
    Phase {
        market_id: MarketId,
        phase: Phase,
        kind: PhaseErrorKind,
    },
    /// Operation outside the market's event window.
    Timing {
        market_id: MarketId,
        now: UnixSecs,
        kind: TimingErrorKind,
    },
    AlreadySettled { market_id: MarketId },
    UnauthorizedCaller { caller: Address, action: &'static str },
    MalformedOracleSample {
        market_id: MarketId,
        observed_at: UnixSecs,
        now: UnixSecs,
    },
    NotFound { market_id: MarketId },
    Transfer(TransferError),
    AlreadyLinked { pool: Address },
    InvalidDestination {
        pool: Address,
        destination: Address,
    },
    InsufficientClaims {
        owner: Address,
        held: Amount,
        requested: Amount,
    },
}

impl LifecycleError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn unauthorized(caller: &Address, action: &'static str) -> Self {
        Self::UnauthorizedCaller {
            caller: caller.clone(),
            action,
        }
    }

    /// Stable short tag, used in journal entries and CLI output.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Phase { .. } => "phase",
            Self::Timing { .. } => "timing",
            Self::AlreadySettled { .. } => "already_settled",
            Self::UnauthorizedCaller { .. } => "unauthorized_caller",
            Self::MalformedOracleSample { .. } => "malformed_oracle_sample",
            Self::NotFound { .. } => "not_found",
            Self::Transfer(_) => "transfer_failure",
            Self::AlreadyLinked { .. } => "already_linked",
            Self::InvalidDestination { .. } => "invalid_destination",
            Self::InsufficientClaims { .. } => "insufficient_claims",
        }
    }
}

impl std::fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(msg) => write!(f, "validation failed: {}", msg),
            Self::Phase {
                market_id,
                phase,
                kind,
            } => write!(f, "{:?} for market {} in phase {}", kind, market_id, phase),
            Self::Timing {
                market_id,
                now,
                kind,
            } => write!(f, "{:?} for market {} at {}", kind, market_id, now),
            Self::AlreadySettled { market_id } => {
                write!(f, "market {} is already settled", market_id)
            }
            Self::UnauthorizedCaller { caller, action } => {
                write!(f, "caller {} is not authorized to {}", caller, action)
            }
            Self::MalformedOracleSample {
                market_id,
                observed_at,
                now,
            } => write!(
                f,
                "oracle sample for market {} observed at {} is in the future (now {})",
                market_id, observed_at, now
            ),
            Self::NotFound { market_id } => write!(f, "market {} not found", market_id),
            Self::Transfer(err) => write!(f, "transfer failed: {}", err),
            Self::AlreadyLinked { pool } => write!(f, "pool {} already has a sibling", pool),
            Self::InvalidDestination { pool, destination } => write!(
                f,
                "pool {} cannot sweep to {}: not its sibling",
                pool, destination
            ),
            Self::InsufficientClaims {
                owner,
                held,
                requested,
            } => write!(
                f,
                "{} holds {} claims, cannot burn {}",
                owner, held, requested
            ),
        }
    }
}

impl std::error::Error for LifecycleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transfer(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TransferError> for LifecycleError {
    fn from(err: TransferError) -> Self {
        Self::Transfer(err)
    }
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

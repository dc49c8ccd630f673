//! Error types
//!
//! Nothing here is fatal: every variant is either returned to the caller of a
//! local precondition check or logged and swallowed at a protocol boundary.

use thiserror::Error as ThisError;

/// Failure to hand an outbound message to the hosting frame.
#[derive(Clone, Debug, ThisError, PartialEq, Eq)]
pub enum TransportError {
    #[error("no parent frame attached")]
    Detached,
    #[error("transport rejected message: {0}")]
    Rejected(String),
    #[error("envelope serialization failed: {0}")]
    Encode(String),
}

/// Local precondition failures of `place_bet`.
#[derive(Clone, Debug, ThisError, PartialEq, Eq)]
pub enum BetError {
    #[error("bet amount must be positive")]
    NotPositive,
    #[error("bet amount {amount} outside [{min}, {max}]")]
    OutOfRange { amount: u64, min: u64, max: u64 },
    #[error("bet amount {amount} exceeds balance {balance}")]
    InsufficientBalance { amount: u64, balance: u64 },
    #[error("a bet of {active} is already active")]
    BetActive { active: u64 },
    #[error("a bet of {pending} is awaiting the host")]
    BetPending { pending: u64 },
}

/// Rejected match engine transitions.
#[derive(Clone, Debug, ThisError, PartialEq, Eq)]
pub enum EngineError {
    #[error("match already started")]
    AlreadyStarted,
    #[error("bet amount must be positive")]
    InvalidBet,
    #[error("host has not acknowledged a bet of {requested} (active: {active:?})")]
    BetNotAcknowledged { requested: u64, active: Option<u64> },
}

/// Invalid configuration values.
#[derive(Clone, Debug, ThisError, PartialEq)]
pub enum ConfigError {
    #[error("min_bet must be positive")]
    ZeroMinBet,
    #[error("min_bet {min} greater than max_bet {max}")]
    InvertedBetRange { min: u64, max: u64 },
    #[error("heartbeat_interval_ms must be positive")]
    ZeroHeartbeat,
    #[error("winning_score must be positive")]
    ZeroWinningScore,
    #[error("exploitation_probability {0} not in [0, 1]")]
    ProbabilityOutOfRange(f64),
    #[error("invalid config json: {0}")]
    Json(String),
}

/// Unrecognized move name.
#[derive(Clone, Debug, ThisError, PartialEq, Eq)]
#[error("unknown move: {0:?}")]
pub struct ParseMoveError(pub String);

/// Umbrella error for callers that do not care which component failed.
#[derive(Clone, Debug, ThisError, PartialEq)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Bet(#[from] BetError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Move(#[from] ParseMoveError),
}

pub type Result<T> = std::result::Result<T, Error>;

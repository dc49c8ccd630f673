//! Core of an embedded rock/paper/scissors game
//!
//! The game runs in an iframe; the hosting platform owns the player's
//! balance. This crate holds everything except presentation:
//! - the match engine (first to five, adaptive opponent, settlement)
//! - the message protocol spoken with the parent frame
//!
//! This crate is compiled to:
//! - Native (tests, headless hosts)
//! - WASM (the in-browser game, feature `wasm`)

mod arena;
mod channel;
mod clock;
mod config;
mod error;
mod events;
mod game;
mod moves;
mod policy;
mod random;
mod session;

#[cfg(feature = "wasm")]
mod wasm;

pub use arena::{Arena, DynPolicy};
pub use channel::{kind, Detached, Envelope, Inbound, MemoryTransport, MessageChannel, Transport};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{GameConfig, MatchRules, SessionConfig};
pub use error::{BetError, ConfigError, EngineError, Error, ParseMoveError, Result, TransportError};
pub use events::{Event, EventBus, ListenerId};
pub use game::{
    MatchEngine, MatchEvent, MatchEventKind, MatchState, Phase, RoundRecord, SessionStats,
    TerminalResult,
};
pub use moves::{Move, Outcome};
pub use policy::{next_move, AdaptivePolicy, OpponentPolicy, ScriptedPolicy, PATTERN_WINDOW};
pub use random::{RandomSource, SeededRng};
pub use session::{
    ConnectionState, HostLink, HostSession, RejectReason, SessionEvent, SessionEventKind,
    SessionState,
};

/// Outcome of a round for the side playing `a`
pub fn resolve(a: Move, b: Move) -> Outcome {
    if a == b {
        Outcome::Draw
    } else if a.beats(b) {
        Outcome::Win
    } else {
        Outcome::Lose
    }
}

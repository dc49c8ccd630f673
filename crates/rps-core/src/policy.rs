//! Opponent move selection

use log::warn;

use crate::game::RoundRecord;
use crate::moves::Move;
use crate::random::{RandomSource, SeededRng};

/// Number of most recent player moves inspected for a pattern.
pub const PATTERN_WINDOW: usize = 3;

/// Chooses the opponent's move for the next round.
pub trait OpponentPolicy {
    /// # Arguments
    /// * `history` - Resolved rounds of the current match, oldest first
    /// * `last_player_move` - The move the player is making this round, if known
    fn next_move(&mut self, history: &[RoundRecord], last_player_move: Option<Move>) -> Move;
}

impl<P: OpponentPolicy + ?Sized> OpponentPolicy for Box<P> {
    fn next_move(&mut self, history: &[RoundRecord], last_player_move: Option<Move>) -> Move {
        (**self).next_move(history, last_player_move)
    }
}

/// Blend of pattern exploitation and uniform play
///
/// With probability `exploitation_probability` (and a non-empty history):
/// counter the move that strictly dominates the player's last
/// `PATTERN_WINDOW` moves, else counter `last_player_move`, else play
/// randomly. Otherwise play randomly.
///
/// A non-finite probability is treated as a fault and yields `Move::Rock`.
pub fn next_move(
    history: &[RoundRecord],
    last_player_move: Option<Move>,
    exploitation_probability: f64,
    rng: &mut impl RandomSource,
) -> Move {
    if !exploitation_probability.is_finite() {
        warn!("exploitation probability {} is not finite, playing rock", exploitation_probability);
        return Move::Rock;
    }
    let p = exploitation_probability.clamp(0.0, 1.0);

    if history.is_empty() || rng.next_unit() >= p {
        return Move::random(rng);
    }

    let recent = &history[history.len().saturating_sub(PATTERN_WINDOW)..];
    if let Some(dominant) = dominant_move(recent) {
        return dominant.counter();
    }
    if let Some(last) = last_player_move {
        return last.counter();
    }
    Move::random(rng)
}

/// The player move that occurs strictly more often than each of the others.
fn dominant_move(records: &[RoundRecord]) -> Option<Move> {
    let mut counts = [0usize; 3];
    for record in records {
        counts[index(record.player_move)] += 1;
    }

    Move::ALL.into_iter().find(|m| {
        let own = counts[index(*m)];
        Move::ALL
            .iter()
            .filter(|other| *other != m)
            .all(|other| own > counts[index(*other)])
    })
}

fn index(m: Move) -> usize {
    match m {
        Move::Rock => 0,
        Move::Paper => 1,
        Move::Scissors => 2,
    }
}

/// The standard opponent: `next_move` over an owned random source
#[derive(Clone, Debug)]
pub struct AdaptivePolicy<R: RandomSource = SeededRng> {
    rng: R,
    exploitation_probability: f64,
}

impl<R: RandomSource> AdaptivePolicy<R> {
    pub fn new(rng: R, exploitation_probability: f64) -> Self {
        Self { rng, exploitation_probability }
    }
}

impl<R: RandomSource> OpponentPolicy for AdaptivePolicy<R> {
    fn next_move(&mut self, history: &[RoundRecord], last_player_move: Option<Move>) -> Move {
        next_move(history, last_player_move, self.exploitation_probability, &mut self.rng)
    }
}

/// Plays a fixed sequence, cycling when it runs out
#[derive(Clone, Debug)]
pub struct ScriptedPolicy {
    moves: Vec<Move>,
    cursor: usize,
}

impl ScriptedPolicy {
    pub fn new(moves: Vec<Move>) -> Self {
        Self { moves, cursor: 0 }
    }
}

impl OpponentPolicy for ScriptedPolicy {
    fn next_move(&mut self, _history: &[RoundRecord], _last_player_move: Option<Move>) -> Move {
        if self.moves.is_empty() {
            return Move::Rock;
        }
        let m = self.moves[self.cursor % self.moves.len()];
        self.cursor += 1;
        m
    }
}

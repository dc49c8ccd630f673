//! Match engine
//!
//! ```text
//! Idle --start_match--> InProgress --winning score--> Terminated
//!   ^                                                     |
//!   +----------------------- reset -----------------------+
//! ```
//!
//! `reset` is accepted in every phase and never notifies the host.
//! Settlement is computed and reported once, on entry to `Terminated`.

use std::rc::Rc;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::config::MatchRules;
use crate::error::EngineError;
use crate::events::Event;
use crate::moves::{Move, Outcome};
use crate::policy::OpponentPolicy;
use crate::resolve;
use crate::session::HostLink;

/// Result of a single round
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundRecord {
    /// 1-based, increases by one per resolved round
    pub round: u32,
    pub player_move: Move,
    pub opponent_move: Move,
    pub outcome: Outcome,
    pub timestamp_ms: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Idle,
    InProgress,
    Terminated,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TerminalResult {
    #[default]
    None,
    PlayerWon,
    OpponentWon,
}

/// Score and settlement of the current match
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchState {
    pub player_score: u32,
    pub opponent_score: u32,
    pub round: u32,
    pub terminated: bool,
    pub result: TerminalResult,
    pub bet_amount: u64,
    /// Signed amount reported to the host; zero until the match ends
    pub settlement: i64,
}

/// Running totals for this page session. Not persisted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub matches_won: u32,
    pub matches_lost: u32,
    pub rounds_won: u32,
    pub rounds_lost: u32,
    pub rounds_drawn: u32,
    pub net_earnings: i64,
}

/// Events the engine queues for the composition root to publish
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum MatchEvent {
    #[serde(rename_all = "camelCase")]
    MatchStarted { bet_amount: u64 },
    RoundResolved { record: RoundRecord, state: MatchState },
    MatchTerminated { result: TerminalResult, settlement: i64, state: MatchState },
    MatchReset,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MatchEventKind {
    MatchStarted,
    RoundResolved,
    MatchTerminated,
    MatchReset,
}

impl MatchEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchEventKind::MatchStarted => "matchStarted",
            MatchEventKind::RoundResolved => "roundResolved",
            MatchEventKind::MatchTerminated => "matchTerminated",
            MatchEventKind::MatchReset => "matchReset",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "matchStarted" => Some(MatchEventKind::MatchStarted),
            "roundResolved" => Some(MatchEventKind::RoundResolved),
            "matchTerminated" => Some(MatchEventKind::MatchTerminated),
            "matchReset" => Some(MatchEventKind::MatchReset),
            _ => None,
        }
    }
}

impl Event for MatchEvent {
    type Kind = MatchEventKind;

    fn kind(&self) -> MatchEventKind {
        match self {
            MatchEvent::MatchStarted { .. } => MatchEventKind::MatchStarted,
            MatchEvent::RoundResolved { .. } => MatchEventKind::RoundResolved,
            MatchEvent::MatchTerminated { .. } => MatchEventKind::MatchTerminated,
            MatchEvent::MatchReset => MatchEventKind::MatchReset,
        }
    }
}

pub struct MatchEngine<P: OpponentPolicy, H: HostLink> {
    rules: MatchRules,
    policy: P,
    host: H,
    clock: Rc<dyn Clock>,
    phase: Phase,
    state: MatchState,
    history: Vec<RoundRecord>,
    stats: SessionStats,
    outbox: Vec<MatchEvent>,
}

impl<P: OpponentPolicy, H: HostLink> MatchEngine<P, H> {
    pub fn new(rules: MatchRules, policy: P, host: H, clock: Rc<dyn Clock>) -> Self {
        let capacity = rules.winning_score.saturating_mul(2) as usize;
        Self {
            rules,
            policy,
            host,
            clock,
            phase: Phase::Idle,
            state: MatchState::default(),
            history: Vec::with_capacity(capacity),
            stats: SessionStats::default(),
            outbox: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> &MatchState {
        &self.state
    }

    pub fn history(&self) -> &[RoundRecord] {
        &self.history
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Events queued since the last drain, oldest first.
    pub fn drain_events(&mut self) -> Vec<MatchEvent> {
        std::mem::take(&mut self.outbox)
    }

    /// Begin a match on a bet the host has already acknowledged.
    pub fn start_match(&mut self, bet_amount: u64) -> Result<(), EngineError> {
        if self.phase != Phase::Idle {
            return Err(EngineError::AlreadyStarted);
        }
        if bet_amount == 0 {
            return Err(EngineError::InvalidBet);
        }
        let active = self.host.active_bet();
        if active != Some(bet_amount) {
            return Err(EngineError::BetNotAcknowledged { requested: bet_amount, active });
        }

        self.state = MatchState { bet_amount, ..MatchState::default() };
        self.history.clear();
        self.phase = Phase::InProgress;
        info!("match started, bet {}", bet_amount);

        self.host.report_game_started();
        self.outbox.push(MatchEvent::MatchStarted { bet_amount });
        Ok(())
    }

    /// Play one round. Returns `None`, changing nothing, unless a match is
    /// in progress.
    pub fn submit_move(&mut self, player_move: Move) -> Option<RoundRecord> {
        if self.phase != Phase::InProgress {
            debug!("ignoring {} in phase {:?}", player_move, self.phase);
            return None;
        }

        let opponent_move = self.policy.next_move(&self.history, Some(player_move));
        let outcome = resolve(player_move, opponent_move);

        self.state.round += 1;
        match outcome {
            Outcome::Win => {
                self.state.player_score += 1;
                self.stats.rounds_won += 1;
            }
            Outcome::Lose => {
                self.state.opponent_score += 1;
                self.stats.rounds_lost += 1;
            }
            Outcome::Draw => self.stats.rounds_drawn += 1,
        }

        let record = RoundRecord {
            round: self.state.round,
            player_move,
            opponent_move,
            outcome,
            timestamp_ms: self.clock.now_ms(),
        };
        self.history.push(record.clone());
        self.outbox.push(MatchEvent::RoundResolved {
            record: record.clone(),
            state: self.state.clone(),
        });

        let target = self.rules.winning_score;
        if outcome != Outcome::Draw
            && (self.state.player_score >= target || self.state.opponent_score >= target)
        {
            self.terminate();
        }

        Some(record)
    }

    fn terminate(&mut self) {
        let bet = self.state.bet_amount;
        let result = if self.state.player_score >= self.rules.winning_score {
            TerminalResult::PlayerWon
        } else {
            TerminalResult::OpponentWon
        };

        self.phase = Phase::Terminated;
        self.state.terminated = true;
        self.state.result = result;

        match result {
            TerminalResult::PlayerWon => {
                let payout = bet.saturating_mul(self.rules.payout_multiplier);
                self.state.settlement = i64::try_from(payout).unwrap_or(i64::MAX);
                self.stats.matches_won += 1;
                self.host.report_win(payout);
            }
            TerminalResult::OpponentWon | TerminalResult::None => {
                self.state.settlement = -i64::try_from(bet).unwrap_or(i64::MAX);
                self.stats.matches_lost += 1;
                self.host.report_lose(bet);
            }
        }
        self.stats.net_earnings = self.stats.net_earnings.saturating_add(self.state.settlement);
        info!(
            "match over after {} rounds: {:?}, settlement {}",
            self.state.round, result, self.state.settlement
        );

        self.outbox.push(MatchEvent::MatchTerminated {
            result,
            settlement: self.state.settlement,
            state: self.state.clone(),
        });
    }

    /// Abandon the current match, if any, and return to `Idle`.
    pub fn reset(&mut self) {
        if self.phase == Phase::InProgress {
            debug!("aborting match at round {}", self.state.round);
        }
        self.phase = Phase::Idle;
        self.state = MatchState::default();
        self.history.clear();
        self.host.release_bet();
        self.outbox.push(MatchEvent::MatchReset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::policy::{AdaptivePolicy, ScriptedPolicy};
    use crate::random::SeededRng;
    use proptest::prelude::*;
    use std::cell::{Cell, RefCell};

    #[derive(Clone, Debug, PartialEq)]
    enum Call {
        Started,
        Win(u64),
        Lose(u64),
        Ended(Outcome, Option<u64>),
    }

    #[derive(Default)]
    struct RecordingHost {
        bet: Cell<Option<u64>>,
        calls: RefCell<Vec<Call>>,
    }

    impl RecordingHost {
        fn with_bet(bet: u64) -> Rc<Self> {
            let host = Rc::new(Self::default());
            host.bet.set(Some(bet));
            host
        }

        fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
            self.calls.borrow().iter().filter(|c| pred(*c)).count()
        }
    }

    impl HostLink for RecordingHost {
        fn active_bet(&self) -> Option<u64> {
            self.bet.get()
        }

        fn report_game_started(&self) {
            self.calls.borrow_mut().push(Call::Started);
        }

        fn report_win(&self, amount: u64) {
            self.calls.borrow_mut().push(Call::Win(amount));
        }

        fn report_lose(&self, amount: u64) {
            self.calls.borrow_mut().push(Call::Lose(amount));
        }

        fn report_match_ended(&self, result: Outcome, win_amount: Option<u64>) {
            self.calls.borrow_mut().push(Call::Ended(result, win_amount));
        }

        fn release_bet(&self) {
            self.bet.set(None);
        }
    }

    fn engine<P: OpponentPolicy>(
        policy: P,
        host: &Rc<RecordingHost>,
    ) -> MatchEngine<P, Rc<RecordingHost>> {
        MatchEngine::new(
            MatchRules::standard(),
            policy,
            Rc::clone(host),
            Rc::new(ManualClock::new(5_000)),
        )
    }

    fn always(m: Move) -> ScriptedPolicy {
        ScriptedPolicy::new(vec![m])
    }

    #[test]
    fn test_submit_before_start_is_noop() {
        let host = RecordingHost::with_bet(1_000);
        let mut e = engine(always(Move::Scissors), &host);
        assert_eq!(e.submit_move(Move::Rock), None);
        assert_eq!(e.state(), &MatchState::default());
        assert!(e.history().is_empty());
        assert!(host.calls.borrow().is_empty());
    }

    #[test]
    fn test_start_requires_acknowledged_bet() {
        let host = Rc::new(RecordingHost::default());
        let mut e = engine(always(Move::Rock), &host);
        assert_eq!(
            e.start_match(1_000),
            Err(EngineError::BetNotAcknowledged { requested: 1_000, active: None })
        );

        host.bet.set(Some(500));
        assert_eq!(
            e.start_match(1_000),
            Err(EngineError::BetNotAcknowledged { requested: 1_000, active: Some(500) })
        );
        assert_eq!(e.start_match(0), Err(EngineError::InvalidBet));
        assert_eq!(e.phase(), Phase::Idle);
        assert!(host.calls.borrow().is_empty());

        assert_eq!(e.start_match(500), Ok(()));
        assert_eq!(e.phase(), Phase::InProgress);
        assert_eq!(e.state().bet_amount, 500);
        assert_eq!(*host.calls.borrow(), vec![Call::Started]);
        assert_eq!(e.start_match(500), Err(EngineError::AlreadyStarted));
    }

    #[test]
    fn test_player_sweep_scenario() {
        let host = RecordingHost::with_bet(1_000);
        let opponent = ScriptedPolicy::new(vec![
            Move::Scissors,
            Move::Rock,
            Move::Paper,
            Move::Scissors,
            Move::Rock,
        ]);
        let mut e = engine(opponent, &host);
        e.start_match(1_000).unwrap();

        for m in [Move::Rock, Move::Paper, Move::Scissors, Move::Rock, Move::Paper] {
            let record = e.submit_move(m).unwrap();
            assert_eq!(record.outcome, Outcome::Win);
        }

        let state = e.state();
        assert!(state.terminated);
        assert_eq!(state.result, TerminalResult::PlayerWon);
        assert_eq!(state.player_score, 5);
        assert_eq!(state.opponent_score, 0);
        assert_eq!(state.settlement, 2_000);
        assert_eq!(e.phase(), Phase::Terminated);

        assert_eq!(host.count(|c| *c == Call::Win(2_000)), 1);
        assert_eq!(host.count(|c| matches!(c, Call::Win(_))), 1);
        assert_eq!(host.count(|c| matches!(c, Call::Lose(_))), 0);
        assert_eq!(
            *host.calls.borrow(),
            vec![Call::Started, Call::Win(2_000)]
        );
    }

    #[test]
    fn test_opponent_sweep_settles_negative() {
        let host = RecordingHost::with_bet(750);
        let mut e = engine(always(Move::Paper), &host);
        e.start_match(750).unwrap();

        for _ in 0..5 {
            e.submit_move(Move::Rock);
        }

        assert_eq!(e.state().result, TerminalResult::OpponentWon);
        assert_eq!(e.state().settlement, -750);
        assert_eq!(
            *host.calls.borrow(),
            vec![Call::Started, Call::Lose(750)]
        );
        assert_eq!(e.stats().matches_lost, 1);
        assert_eq!(e.stats().net_earnings, -750);
    }

    #[test]
    fn test_terminated_ignores_moves_and_settles_once() {
        let host = RecordingHost::with_bet(100);
        let mut e = engine(always(Move::Scissors), &host);
        e.start_match(100).unwrap();
        for _ in 0..5 {
            e.submit_move(Move::Rock);
        }
        let frozen = e.state().clone();
        let frozen_history = e.history().to_vec();

        for m in Move::ALL {
            assert_eq!(e.submit_move(m), None);
        }
        assert_eq!(e.state(), &frozen);
        assert_eq!(e.history(), frozen_history.as_slice());
        assert_eq!(host.count(|c| matches!(c, Call::Win(_))), 1);
    }

    #[test]
    fn test_draws_count_as_rounds() {
        let host = RecordingHost::with_bet(100);
        let mut e = engine(always(Move::Rock), &host);
        e.start_match(100).unwrap();

        for _ in 0..12 {
            let record = e.submit_move(Move::Rock).unwrap();
            assert_eq!(record.outcome, Outcome::Draw);
        }
        assert_eq!(e.state().round, 12);
        assert_eq!(e.history().len(), 12);
        assert_eq!((e.state().player_score, e.state().opponent_score), (0, 0));
        assert!(!e.state().terminated);
        assert_eq!(e.stats().rounds_drawn, 12);
    }

    #[test]
    fn test_round_records() {
        let host = RecordingHost::with_bet(100);
        let mut e = engine(ScriptedPolicy::new(vec![Move::Paper, Move::Rock]), &host);
        e.start_match(100).unwrap();
        e.submit_move(Move::Rock);
        e.submit_move(Move::Rock);

        assert_eq!(
            e.history(),
            &[
                RoundRecord {
                    round: 1,
                    player_move: Move::Rock,
                    opponent_move: Move::Paper,
                    outcome: Outcome::Lose,
                    timestamp_ms: 5_000,
                },
                RoundRecord {
                    round: 2,
                    player_move: Move::Rock,
                    opponent_move: Move::Rock,
                    outcome: Outcome::Draw,
                    timestamp_ms: 5_000,
                },
            ]
        );
    }

    #[test]
    fn test_reset_mid_match_sends_nothing() {
        let host = RecordingHost::with_bet(300);
        let mut e = engine(always(Move::Scissors), &host);
        e.start_match(300).unwrap();
        e.submit_move(Move::Rock);
        e.submit_move(Move::Rock);
        e.reset();

        assert_eq!(e.phase(), Phase::Idle);
        assert_eq!(e.state(), &MatchState::default());
        assert!(e.history().is_empty());
        assert_eq!(host.active_bet(), None);
        assert_eq!(*host.calls.borrow(), vec![Call::Started]);
        assert_eq!(e.submit_move(Move::Rock), None);

        // Round totals survive the reset.
        assert_eq!(e.stats().rounds_won, 2);
        assert_eq!(e.stats().net_earnings, 0);
    }

    #[test]
    fn test_reset_when_idle_is_safe() {
        let host = Rc::new(RecordingHost::default());
        let mut e = engine(always(Move::Rock), &host);
        e.reset();
        e.reset();
        assert_eq!(e.phase(), Phase::Idle);
    }

    #[test]
    fn test_new_match_after_reset() {
        let host = RecordingHost::with_bet(200);
        let mut e = engine(always(Move::Scissors), &host);
        e.start_match(200).unwrap();
        for _ in 0..5 {
            e.submit_move(Move::Rock);
        }
        e.reset();

        host.bet.set(Some(400));
        e.start_match(400).unwrap();
        let record = e.submit_move(Move::Rock).unwrap();
        assert_eq!(record.round, 1);
        assert_eq!(e.state().bet_amount, 400);
        assert_eq!(e.stats().matches_won, 1);
        assert_eq!(e.stats().net_earnings, 400);
    }

    #[test]
    fn test_custom_winning_score_and_multiplier() {
        let host = RecordingHost::with_bet(100);
        let rules = MatchRules { winning_score: 2, payout_multiplier: 3, ..MatchRules::standard() };
        let mut e = MatchEngine::new(
            rules,
            always(Move::Scissors),
            Rc::clone(&host),
            Rc::new(ManualClock::new(0)),
        );
        e.start_match(100).unwrap();
        e.submit_move(Move::Rock);
        assert!(!e.state().terminated);
        e.submit_move(Move::Rock);
        assert!(e.state().terminated);
        assert_eq!(e.state().settlement, 300);
    }

    #[test]
    fn test_policy_sees_current_player_move() {
        struct Spy(Rc<RefCell<Vec<(usize, Option<Move>)>>>);

        impl OpponentPolicy for Spy {
            fn next_move(&mut self, history: &[RoundRecord], last: Option<Move>) -> Move {
                self.0.borrow_mut().push((history.len(), last));
                Move::Rock
            }
        }

        let seen = Rc::new(RefCell::new(Vec::new()));
        let host = RecordingHost::with_bet(100);
        let mut e = engine(Spy(Rc::clone(&seen)), &host);
        e.start_match(100).unwrap();
        e.submit_move(Move::Paper);
        e.submit_move(Move::Scissors);

        assert_eq!(
            *seen.borrow(),
            vec![(0, Some(Move::Paper)), (1, Some(Move::Scissors))]
        );
    }

    #[test]
    fn test_tied_window_counters_move_in_play() {
        let host = RecordingHost::with_bet(100);
        let mut e = engine(AdaptivePolicy::new(SeededRng::new(3), 1.0), &host);
        e.start_match(100).unwrap();
        for m in [Move::Rock, Move::Paper, Move::Scissors] {
            e.submit_move(m);
        }
        assert!(!e.state().terminated);

        let record = e.submit_move(Move::Rock).unwrap();
        assert_eq!(record.opponent_move, Move::Paper);
        assert_eq!(record.outcome, Outcome::Lose);
    }

    #[test]
    fn test_event_queue() {
        let host = RecordingHost::with_bet(100);
        let mut e = engine(always(Move::Scissors), &host);
        e.start_match(100).unwrap();
        for _ in 0..5 {
            e.submit_move(Move::Rock);
        }
        e.reset();

        let kinds: Vec<_> = e.drain_events().iter().map(|ev| ev.kind()).collect();
        assert_eq!(kinds[0], MatchEventKind::MatchStarted);
        assert_eq!(kinds[1..6], [MatchEventKind::RoundResolved; 5]);
        assert_eq!(kinds[6], MatchEventKind::MatchTerminated);
        assert_eq!(kinds[7], MatchEventKind::MatchReset);
        assert!(e.drain_events().is_empty());
    }

    #[test]
    fn test_event_serialization() {
        let event = MatchEvent::MatchStarted { bet_amount: 100 };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({"event": "matchStarted", "betAmount": 100})
        );
        assert_eq!(
            serde_json::to_value(&MatchEvent::MatchReset).unwrap(),
            serde_json::json!({"event": "matchReset"})
        );
    }

    #[test]
    fn test_event_kind_names() {
        for kind in [
            MatchEventKind::MatchStarted,
            MatchEventKind::RoundResolved,
            MatchEventKind::MatchTerminated,
            MatchEventKind::MatchReset,
        ] {
            assert_eq!(MatchEventKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(MatchEventKind::parse("nope"), None);
    }

    fn any_move() -> impl Strategy<Value = Move> {
        prop::sample::select(Move::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn prop_history_tracks_rounds(
            moves in prop::collection::vec(any_move(), 0..60),
            seed in any::<u64>(),
        ) {
            let host = RecordingHost::with_bet(1_000);
            let mut e = engine(AdaptivePolicy::new(SeededRng::new(seed), 0.7), &host);
            e.start_match(1_000).unwrap();

            for m in moves {
                let before = e.state().clone();
                let was_terminated = before.terminated;
                let result = e.submit_move(m);

                if was_terminated {
                    prop_assert!(result.is_none());
                    prop_assert_eq!(e.state(), &before);
                } else {
                    let record = result.unwrap();
                    prop_assert_eq!(record.round, before.round + 1);
                }

                let state = e.state();
                prop_assert_eq!(e.history().len() as u32, state.round);
                for (i, r) in e.history().iter().enumerate() {
                    prop_assert_eq!(r.round, i as u32 + 1);
                }
                prop_assert!(state.player_score <= 5 && state.opponent_score <= 5);
                prop_assert!(!(state.player_score == 5 && state.opponent_score == 5));
                prop_assert_eq!(state.terminated, state.player_score == 5 || state.opponent_score == 5);
            }

            let settlements = host.count(|c| matches!(c, Call::Win(_) | Call::Lose(_)));
            prop_assert_eq!(settlements, usize::from(e.state().terminated));
        }
    }
}

//! Composition root
//!
//! Owns one host session and one match engine and wires them together:
//! a host-acknowledged bet starts the match. Engine events are published
//! only after the engine borrow is released, so listeners may read state or
//! call back into the arena.

use std::cell::RefCell;
use std::rc::Rc;

use log::warn;

use crate::channel::Transport;
use crate::clock::Clock;
use crate::config::GameConfig;
use crate::error::{BetError, EngineError};
use crate::events::{EventBus, ListenerId};
use crate::game::{MatchEngine, MatchEvent, MatchEventKind, MatchState, Phase, RoundRecord, SessionStats};
use crate::moves::{Move, Outcome};
use crate::policy::{AdaptivePolicy, OpponentPolicy};
use crate::random::SeededRng;
use crate::session::{HostLink, HostSession, SessionEvent, SessionEventKind};

pub type DynPolicy = Box<dyn OpponentPolicy>;

type Engine<T> = MatchEngine<DynPolicy, Rc<HostSession<T>>>;

/// Run `f` against the engine, then publish whatever it queued.
fn drive<T: Transport, R>(
    engine: &RefCell<Engine<T>>,
    bus: &EventBus<MatchEvent>,
    f: impl FnOnce(&mut Engine<T>) -> R,
) -> R {
    let (result, events) = {
        let mut engine = engine.borrow_mut();
        let result = f(&mut engine);
        (result, engine.drain_events())
    };
    for event in &events {
        bus.publish(event);
    }
    result
}

pub struct Arena<T: Transport + 'static> {
    session: Rc<HostSession<T>>,
    engine: Rc<RefCell<Engine<T>>>,
    events: Rc<EventBus<MatchEvent>>,
    picker: RefCell<SeededRng>,
    bet_listener: ListenerId,
}

impl<T: Transport + 'static> Arena<T> {
    /// Standard opponent seeded from `seed`.
    pub fn new(config: GameConfig, transport: T, clock: Rc<dyn Clock>, seed: u64) -> Self {
        let mut root = SeededRng::new(seed);
        let policy = AdaptivePolicy::new(root.fork(0), config.rules.exploitation_probability);
        Self::with_policy(config, transport, clock, Box::new(policy), root.fork(1))
    }

    /// Custom opponent; `picker` drives `submit_random_move`.
    pub fn with_policy(
        config: GameConfig,
        transport: T,
        clock: Rc<dyn Clock>,
        policy: DynPolicy,
        picker: SeededRng,
    ) -> Self {
        let session = HostSession::new(transport, config.session.clone(), Rc::clone(&clock));
        let engine = Rc::new(RefCell::new(MatchEngine::new(
            config.rules,
            policy,
            Rc::clone(&session),
            clock,
        )));
        let events = Rc::new(EventBus::new());

        let bet_listener = {
            let engine = Rc::downgrade(&engine);
            let events = Rc::downgrade(&events);
            session.subscribe(SessionEventKind::BetPlaced, move |event| {
                let SessionEvent::BetPlaced(amount) = event else {
                    return;
                };
                let (Some(engine), Some(events)) = (engine.upgrade(), events.upgrade()) else {
                    return;
                };
                if engine.try_borrow_mut().is_err() {
                    warn!("bet ack {} arrived while the engine was busy", amount);
                    return;
                }
                if let Err(err) = drive(&engine, &events, |e| e.start_match(*amount)) {
                    warn!("bet ack {} did not start a match: {}", amount, err);
                }
            })
        };

        Self {
            session,
            engine,
            events,
            picker: RefCell::new(picker),
            bet_listener,
        }
    }

    pub fn session(&self) -> &Rc<HostSession<T>> {
        &self.session
    }

    /// Announce readiness, start the heartbeat and ask for the balance.
    pub fn start(&self) {
        self.session.start();
        self.session.request_balance_sync();
    }

    pub fn tick(&self, now_ms: u64) {
        self.session.tick(now_ms);
    }

    pub fn receive(&self, text: &str) {
        self.session.receive(text);
    }

    pub fn receive_value(&self, value: serde_json::Value) {
        self.session.receive_value(value);
    }

    pub fn request_balance_sync(&self) {
        self.session.request_balance_sync();
    }

    pub fn place_bet(&self, amount: u64) -> Result<(), BetError> {
        self.session.place_bet(amount)
    }

    /// Start explicitly. Normally the host's bet acknowledgement does this.
    pub fn start_match(&self, bet_amount: u64) -> Result<(), EngineError> {
        drive(&self.engine, &self.events, |e| e.start_match(bet_amount))
    }

    pub fn submit_move(&self, player_move: Move) -> Option<RoundRecord> {
        drive(&self.engine, &self.events, |e| e.submit_move(player_move))
    }

    /// Play a uniformly random move for the player.
    pub fn submit_random_move(&self) -> Option<RoundRecord> {
        if self.phase() != Phase::InProgress {
            return None;
        }
        let player_move = Move::random(&mut *self.picker.borrow_mut());
        self.submit_move(player_move)
    }

    pub fn reset(&self) {
        drive(&self.engine, &self.events, |e| e.reset());
    }

    /// Tell the host the game is closing. Settlement has already been sent
    /// by the match itself, so no amount is attached unless the caller
    /// supplies one.
    pub fn report_game_ended(&self, result: Outcome, win_amount: Option<u64>) {
        self.session.report_match_ended(result, win_amount);
    }

    pub fn phase(&self) -> Phase {
        self.engine.borrow().phase()
    }

    pub fn state(&self) -> MatchState {
        self.engine.borrow().state().clone()
    }

    pub fn history(&self) -> Vec<RoundRecord> {
        self.engine.borrow().history().to_vec()
    }

    pub fn stats(&self) -> SessionStats {
        self.engine.borrow().stats().clone()
    }

    pub fn subscribe_match(
        &self,
        kind: MatchEventKind,
        handler: impl Fn(&MatchEvent) + 'static,
    ) -> ListenerId {
        self.events.subscribe(kind, handler)
    }

    pub fn unsubscribe_match(&self, id: ListenerId) -> bool {
        self.events.unsubscribe(id)
    }

    pub fn subscribe_session(
        &self,
        kind: SessionEventKind,
        handler: impl Fn(&SessionEvent) + 'static,
    ) -> ListenerId {
        self.session.subscribe(kind, handler)
    }

    pub fn unsubscribe_session(&self, id: ListenerId) -> bool {
        self.session.unsubscribe(id)
    }
}

impl<T: Transport + 'static> Drop for Arena<T> {
    fn drop(&mut self) {
        self.session.unsubscribe(self.bet_listener);
    }
}

//! Host session: the typed protocol spoken with the embedding platform
//!
//! The platform owns the money. The session only mirrors the balance it is
//! told about, asks for bets, and reports outcomes. Cached state changes only
//! in response to inbound messages, never optimistically.
//!
//! Connection lifecycle:
//!
//! ```text
//! Uninitialized --start()--> AwaitingFirstHeartbeat --PONG--> Connected
//!                                      Connected --silence > timeout--> TimedOut --PONG--> Connected
//! ```
//!
//! The `TimedOut` edge only exists when `liveness_timeout_ms` is configured.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::str::FromStr;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::channel::{kind, Envelope, Inbound, MessageChannel, Transport};
use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::error::BetError;
use crate::events::{Event, EventBus, ListenerId};
use crate::moves::Outcome;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    Uninitialized,
    AwaitingFirstHeartbeat,
    Connected,
    TimedOut,
}

/// Why the host refused a bet
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RejectReason {
    InsufficientBalance,
    InvalidAmount,
    Other,
}

impl RejectReason {
    pub fn from_host(raw: Option<&str>) -> Self {
        match raw {
            Some("insufficient_balance") | Some("insufficientBalance") => {
                RejectReason::InsufficientBalance
            }
            Some("invalid_amount") | Some("invalidAmount") => RejectReason::InvalidAmount,
            _ => RejectReason::Other,
        }
    }
}

/// Events published to session subscribers
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", content = "value", rename_all = "camelCase")]
pub enum SessionEvent {
    BalanceUpdate(u64),
    BetPlaced(u64),
    BetRejected(RejectReason),
    Connected(bool),
    GameStart(Value),
    GameEnd(Value),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionEventKind {
    BalanceUpdate,
    BetPlaced,
    BetRejected,
    Connected,
    GameStart,
    GameEnd,
}

impl SessionEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionEventKind::BalanceUpdate => "balanceUpdate",
            SessionEventKind::BetPlaced => "betPlaced",
            SessionEventKind::BetRejected => "betRejected",
            SessionEventKind::Connected => "connected",
            SessionEventKind::GameStart => "gameStart",
            SessionEventKind::GameEnd => "gameEnd",
        }
    }
}

impl fmt::Display for SessionEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionEventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "balanceUpdate" => Ok(SessionEventKind::BalanceUpdate),
            "betPlaced" => Ok(SessionEventKind::BetPlaced),
            "betRejected" => Ok(SessionEventKind::BetRejected),
            "connected" => Ok(SessionEventKind::Connected),
            "gameStart" => Ok(SessionEventKind::GameStart),
            "gameEnd" => Ok(SessionEventKind::GameEnd),
            _ => Err(format!("unknown session event: {}", s)),
        }
    }
}

impl Event for SessionEvent {
    type Kind = SessionEventKind;

    fn kind(&self) -> SessionEventKind {
        match self {
            SessionEvent::BalanceUpdate(_) => SessionEventKind::BalanceUpdate,
            SessionEvent::BetPlaced(_) => SessionEventKind::BetPlaced,
            SessionEvent::BetRejected(_) => SessionEventKind::BetRejected,
            SessionEvent::Connected(_) => SessionEventKind::Connected,
            SessionEvent::GameStart(_) => SessionEventKind::GameStart,
            SessionEvent::GameEnd(_) => SessionEventKind::GameEnd,
        }
    }
}

/// Mirror of host-side state
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    /// Last balance the host reported; `None` until the first update.
    pub balance: Option<u64>,
    /// Sent with `PLACE_BET`, not yet acknowledged.
    pub pending_bet: Option<u64>,
    /// Acknowledged by the host; fixed until released.
    pub active_bet: Option<u64>,
    pub connection: ConnectionState,
    pub last_heartbeat_ack_ms: Option<u64>,
    pub last_ping_ms: Option<u64>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            balance: None,
            pending_bet: None,
            active_bet: None,
            connection: ConnectionState::Uninitialized,
            last_heartbeat_ack_ms: None,
            last_ping_ms: None,
        }
    }
}

/// What the match engine needs from the host side.
pub trait HostLink {
    /// Bet amount the host has acknowledged, if any.
    fn active_bet(&self) -> Option<u64>;
    fn report_game_started(&self);
    fn report_win(&self, amount: u64);
    fn report_lose(&self, amount: u64);
    fn report_match_ended(&self, result: Outcome, win_amount: Option<u64>);
    /// Forget the active bet locally. Sends nothing.
    fn release_bet(&self);
}

impl<H: HostLink + ?Sized> HostLink for Rc<H> {
    fn active_bet(&self) -> Option<u64> {
        (**self).active_bet()
    }

    fn report_game_started(&self) {
        (**self).report_game_started()
    }

    fn report_win(&self, amount: u64) {
        (**self).report_win(amount)
    }

    fn report_lose(&self, amount: u64) {
        (**self).report_lose(amount)
    }

    fn report_match_ended(&self, result: Outcome, win_amount: Option<u64>) {
        (**self).report_match_ended(result, win_amount)
    }

    fn release_bet(&self) {
        (**self).release_bet()
    }
}

/// Non-negative whole amount from a JSON number. Anything else is malformed.
fn parse_amount(value: Option<&Value>) -> Option<u64> {
    let Value::Number(number) = value? else {
        return None;
    };
    if let Some(n) = number.as_u64() {
        return Some(n);
    }
    let f = number.as_f64()?;
    if f.is_finite() && f >= 0.0 && f <= u64::MAX as f64 {
        Some(f.floor() as u64)
    } else {
        None
    }
}

pub struct HostSession<T: Transport> {
    config: SessionConfig,
    channel: MessageChannel<T>,
    clock: Rc<dyn Clock>,
    state: RefCell<SessionState>,
    events: EventBus<SessionEvent>,
}

impl<T: Transport + 'static> HostSession<T> {
    /// Build a session and route the channel's inbound messages into it.
    pub fn new(transport: T, config: SessionConfig, clock: Rc<dyn Clock>) -> Rc<Self> {
        Rc::new_cyclic(|weak: &Weak<Self>| {
            let channel = MessageChannel::new(transport, config.diagnostics);
            let weak = weak.clone();
            channel.on_receive(move |message| {
                if let Some(session) = weak.upgrade() {
                    session.handle(message);
                }
            });
            Self {
                config,
                channel,
                clock,
                state: RefCell::new(SessionState::default()),
                events: EventBus::new(),
            }
        })
    }
}

impl<T: Transport> HostSession<T> {
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn channel(&self) -> &MessageChannel<T> {
        &self.channel
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn balance(&self) -> Option<u64> {
        self.state.borrow().balance
    }

    pub fn pending_bet(&self) -> Option<u64> {
        self.state.borrow().pending_bet
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.borrow().connection
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    pub fn last_heartbeat_ack(&self) -> Option<u64> {
        self.state.borrow().last_heartbeat_ack_ms
    }

    pub fn subscribe(
        &self,
        kind: SessionEventKind,
        handler: impl Fn(&SessionEvent) + 'static,
    ) -> ListenerId {
        self.events.subscribe(kind, handler)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Announce readiness and send the first heartbeat.
    pub fn start(&self) {
        let now = self.clock.now_ms();
        {
            let mut state = self.state.borrow_mut();
            if state.connection != ConnectionState::Uninitialized {
                return;
            }
            state.connection = ConnectionState::AwaitingFirstHeartbeat;
            state.last_ping_ms = Some(now);
        }
        self.send(kind::GAME_READY, json!({}));
        self.send(kind::PING, json!({}));
    }

    /// Drive the heartbeat. Call at least once per heartbeat interval.
    pub fn tick(&self, now_ms: u64) {
        let mut lost = false;
        let ping_due = {
            let mut state = self.state.borrow_mut();
            if state.connection == ConnectionState::Uninitialized {
                return;
            }

            if let (Some(timeout), Some(ack)) =
                (self.config.liveness_timeout_ms, state.last_heartbeat_ack_ms)
            {
                if state.connection == ConnectionState::Connected
                    && now_ms.saturating_sub(ack) > timeout
                {
                    state.connection = ConnectionState::TimedOut;
                    lost = true;
                }
            }

            let due = match state.last_ping_ms {
                None => true,
                Some(last) => now_ms.saturating_sub(last) >= self.config.heartbeat_interval_ms,
            };
            if due {
                state.last_ping_ms = Some(now_ms);
            }
            due
        };

        if lost {
            if self.config.diagnostics {
                info!("host silent past liveness timeout");
            }
            self.events.publish(&SessionEvent::Connected(false));
        }
        if ping_due {
            self.send(kind::PING, json!({}));
        }
    }

    pub fn request_balance_sync(&self) {
        self.send(kind::REQUEST_BALANCE, json!({}));
    }

    /// Ask the host to take a bet. The answer arrives as `BetPlaced` or
    /// `BetRejected`; local precondition failures are published as
    /// `BetRejected` too and nothing is sent.
    pub fn place_bet(&self, amount: u64) -> Result<(), BetError> {
        let checked = {
            let state = self.state.borrow();
            self.check_bet(amount, &state)
        };

        if let Err(err) = checked {
            if self.config.diagnostics {
                warn!("bet refused locally: {}", err);
            }
            let reason = match err {
                BetError::InsufficientBalance { .. } => Some(RejectReason::InsufficientBalance),
                BetError::NotPositive | BetError::OutOfRange { .. } => {
                    Some(RejectReason::InvalidAmount)
                }
                BetError::BetActive { .. } | BetError::BetPending { .. } => None,
            };
            if let Some(reason) = reason {
                self.events.publish(&SessionEvent::BetRejected(reason));
            }
            return Err(err);
        }

        self.state.borrow_mut().pending_bet = Some(amount);
        self.send(kind::PLACE_BET, json!({ "amount": amount }));
        Ok(())
    }

    fn check_bet(&self, amount: u64, state: &SessionState) -> Result<(), BetError> {
        if let Some(active) = state.active_bet {
            return Err(BetError::BetActive { active });
        }
        if let Some(pending) = state.pending_bet {
            return Err(BetError::BetPending { pending });
        }
        if amount == 0 {
            return Err(BetError::NotPositive);
        }
        let (min, max) = (self.config.min_bet, self.config.max_bet);
        if amount < min || amount > max {
            return Err(BetError::OutOfRange { amount, min, max });
        }
        // Unknown balance: the host decides.
        if let Some(balance) = state.balance {
            if amount > balance {
                return Err(BetError::InsufficientBalance { amount, balance });
            }
        }
        Ok(())
    }

    /// Feed a raw inbound message (JSON text).
    pub fn receive(&self, text: &str) {
        self.channel.deliver(text);
    }

    pub fn receive_value(&self, value: Value) {
        self.channel.deliver_value(value);
    }

    fn handle(&self, message: &Inbound) {
        match message.kind.as_str() {
            kind::BALANCE_UPDATE => self.on_balance_update(message),
            kind::BET_PLACED => self.on_bet_placed(message),
            kind::BET_REJECTED => {
                let reason = RejectReason::from_host(
                    message.field("reason").and_then(Value::as_str),
                );
                self.state.borrow_mut().pending_bet = None;
                self.events.publish(&SessionEvent::BetRejected(reason));
            }
            kind::PONG => self.on_pong(),
            kind::GAME_START => {
                self.events.publish(&SessionEvent::GameStart(message.payload().clone()));
            }
            kind::GAME_END => {
                self.events.publish(&SessionEvent::GameEnd(message.payload().clone()));
            }
            other => {
                if self.config.diagnostics {
                    debug!("ignoring message type {}", other);
                }
            }
        }
    }

    fn on_balance_update(&self, message: &Inbound) {
        let Some(balance) = parse_amount(message.field("balance")) else {
            if self.config.diagnostics {
                warn!("discarding malformed balance: {:?}", message.field("balance"));
            }
            return;
        };
        self.state.borrow_mut().balance = Some(balance);
        self.events.publish(&SessionEvent::BalanceUpdate(balance));
    }

    fn on_bet_placed(&self, message: &Inbound) {
        let amount = match parse_amount(message.field("amount")) {
            Some(amount) if amount > 0 => amount,
            _ => {
                if self.config.diagnostics {
                    warn!("discarding malformed bet ack: {:?}", message.field("amount"));
                }
                return;
            }
        };

        {
            let mut state = self.state.borrow_mut();
            if let Some(active) = state.active_bet {
                if self.config.diagnostics {
                    warn!("ignoring bet ack {} while {} is active", amount, active);
                }
                return;
            }
            state.active_bet = Some(amount);
            state.pending_bet = None;
        }
        self.events.publish(&SessionEvent::BetPlaced(amount));
    }

    fn on_pong(&self) {
        let now = self.clock.now_ms();
        {
            let mut state = self.state.borrow_mut();
            state.last_heartbeat_ack_ms = Some(now);
            if state.connection != ConnectionState::Connected {
                info!("host acknowledged heartbeat");
            }
            state.connection = ConnectionState::Connected;
        }
        self.events.publish(&SessionEvent::Connected(true));
    }

    fn send(&self, kind: &str, data: Value) {
        self.channel.send(&Envelope::new(kind, data, self.clock.now_ms()));
    }
}

impl<T: Transport> HostLink for HostSession<T> {
    fn active_bet(&self) -> Option<u64> {
        self.state.borrow().active_bet
    }

    fn report_game_started(&self) {
        self.send(kind::GAME_STARTED, json!({}));
    }

    fn report_win(&self, amount: u64) {
        self.send(kind::GAME_WON, json!({ "amount": amount }));
    }

    fn report_lose(&self, amount: u64) {
        self.send(kind::GAME_LOST, json!({ "amount": amount }));
    }

    fn report_match_ended(&self, result: Outcome, win_amount: Option<u64>) {
        let mut data = json!({ "result": result.as_str() });
        if let Some(amount) = win_amount {
            data["winAmount"] = json!(amount);
        }
        self.send(kind::GAME_ENDED, data);
    }

    fn release_bet(&self) {
        let mut state = self.state.borrow_mut();
        state.active_bet = None;
        state.pending_bet = None;
    }
}

//! WASM bindings for the in-browser game

#![cfg(feature = "wasm")]

use std::rc::{Rc, Weak};

use log::{Level, LevelFilter, Log, Metadata, Record};
use serde::Serialize;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{MessageEvent, Window};

use crate::error::{Error, TransportError};
use crate::{
    resolve, Arena, Clock, GameConfig, MatchEventKind, Move, Outcome, SessionEventKind, SystemClock,
    Transport,
};

/// Any origin may receive our messages; the host page is not known in advance.
const TARGET_ORIGIN: &str = "*";

/// `window.parent.postMessage`, when there is a parent
pub struct ParentFrame {
    parent: Option<Window>,
}

impl ParentFrame {
    pub fn new() -> Self {
        let parent = web_sys::window().and_then(|own| {
            own.parent()
                .ok()
                .flatten()
                .filter(|parent| JsValue::from(parent.clone()) != JsValue::from(own.clone()))
        });
        Self { parent }
    }
}

impl Default for ParentFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for ParentFrame {
    fn post(&self, text: &str) -> Result<(), TransportError> {
        let parent = self.parent.as_ref().ok_or(TransportError::Detached)?;
        let message = js_sys::JSON::parse(text)
            .map_err(|e| TransportError::Encode(format!("{:?}", e)))?;
        parent
            .post_message(&message, TARGET_ORIGIN)
            .map_err(|e| TransportError::Rejected(format!("{:?}", e)))
    }

    fn is_attached(&self) -> bool {
        self.parent.is_some()
    }
}

struct ConsoleLogger;

static LOGGER: ConsoleLogger = ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = JsValue::from_str(&format!("[{}] {}", record.target(), record.args()));
        match record.level() {
            Level::Error => web_sys::console::error_1(&line),
            Level::Warn => web_sys::console::warn_1(&line),
            Level::Info => web_sys::console::info_1(&line),
            Level::Debug | Level::Trace => web_sys::console::debug_1(&line),
        }
    }

    fn flush(&self) {}
}

fn init_logging(diagnostics: bool) {
    // A second game instance keeps the first logger.
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(if diagnostics { LevelFilter::Debug } else { LevelFilter::Off });
}

fn to_js<T: Serialize + ?Sized>(value: &T) -> Result<JsValue, JsError> {
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(|e| JsError::new(&format!("Serialization error: {}", e)))
}

fn js_error(err: impl Into<Error>) -> JsError {
    JsError::new(&err.into().to_string())
}

fn parse_move(name: &str) -> crate::Result<Move> {
    Ok(name.parse::<Move>()?)
}

/// Whole positive amount from a JS number
fn whole_amount(amount: f64) -> Option<u64> {
    if amount.is_finite() && amount >= 1.0 && amount.fract() == 0.0 && amount <= u64::MAX as f64 {
        Some(amount as u64)
    } else {
        None
    }
}

fn call_js(handler: &js_sys::Function, payload: Result<JsValue, JsError>) {
    match payload {
        Ok(payload) => {
            if let Err(err) = handler.call1(&JsValue::NULL, &payload) {
                log::warn!("event handler threw: {:?}", err);
            }
        }
        Err(_) => log::warn!("event payload could not be serialized"),
    }
}

/// The game as seen from JavaScript
#[wasm_bindgen]
pub struct RpsGame {
    arena: Rc<Arena<ParentFrame>>,
    window: Option<Window>,
    on_message: Closure<dyn FnMut(MessageEvent)>,
    _on_heartbeat: Closure<dyn FnMut()>,
    heartbeat_handle: Option<i32>,
}

#[wasm_bindgen]
impl RpsGame {
    /// # Arguments
    /// * `config_json` - Optional partial `GameConfig` JSON
    #[wasm_bindgen(constructor)]
    pub fn new(config_json: Option<String>) -> Result<RpsGame, JsError> {
        console_error_panic_hook::set_once();

        let config = match config_json {
            Some(json) => GameConfig::from_json(&json).map_err(js_error)?,
            None => GameConfig::default(),
        };
        init_logging(config.session.diagnostics);
        let heartbeat_ms = config.session.heartbeat_interval_ms;

        let seed = (js_sys::Math::random() * u64::MAX as f64) as u64 ^ js_sys::Date::now() as u64;
        let arena = Rc::new(Arena::new(config, ParentFrame::new(), Rc::new(SystemClock), seed));

        let weak: Weak<Arena<ParentFrame>> = Rc::downgrade(&arena);
        let on_message = Closure::<dyn FnMut(MessageEvent)>::new(move |event: MessageEvent| {
            let Some(arena) = weak.upgrade() else {
                return;
            };
            match serde_wasm_bindgen::from_value::<serde_json::Value>(event.data()) {
                Ok(value) => arena.receive_value(value),
                Err(err) => log::debug!("ignoring non-data message: {}", err),
            }
        });

        let weak: Weak<Arena<ParentFrame>> = Rc::downgrade(&arena);
        let on_heartbeat = Closure::<dyn FnMut()>::new(move || {
            if let Some(arena) = weak.upgrade() {
                arena.tick(SystemClock.now_ms());
            }
        });

        let window = web_sys::window();
        let mut heartbeat_handle = None;
        if let Some(window) = &window {
            window
                .add_event_listener_with_callback("message", on_message.as_ref().unchecked_ref())
                .map_err(|e| JsError::new(&format!("Cannot listen for messages: {:?}", e)))?;
            let interval = i32::try_from(heartbeat_ms).unwrap_or(i32::MAX);
            heartbeat_handle = window
                .set_interval_with_callback_and_timeout_and_arguments_0(
                    on_heartbeat.as_ref().unchecked_ref(),
                    interval,
                )
                .ok();
        }

        arena.start();

        Ok(RpsGame {
            arena,
            window,
            on_message,
            _on_heartbeat: on_heartbeat,
            heartbeat_handle,
        })
    }

    /// Play `"rock"`, `"paper"` or `"scissors"`. Returns the round record,
    /// or `undefined` when no match is in progress.
    #[wasm_bindgen(js_name = submitMove)]
    pub fn submit_move(&self, player_move: &str) -> Result<JsValue, JsError> {
        let m = parse_move(player_move).map_err(js_error)?;
        to_js(&self.arena.submit_move(m))
    }

    #[wasm_bindgen(js_name = submitRandomMove)]
    pub fn submit_random_move(&self) -> Result<JsValue, JsError> {
        to_js(&self.arena.submit_random_move())
    }

    /// Returns whether a bet request was sent. Refusals also arrive as
    /// `betRejected` events.
    #[wasm_bindgen(js_name = placeBet)]
    pub fn place_bet(&self, amount: f64) -> bool {
        match whole_amount(amount) {
            Some(amount) => self.arena.place_bet(amount).is_ok(),
            None => {
                log::warn!("bet amount {} is not a positive whole number", amount);
                false
            }
        }
    }

    #[wasm_bindgen(js_name = startMatch)]
    pub fn start_match(&self, bet_amount: f64) -> Result<(), JsError> {
        let amount = whole_amount(bet_amount)
            .ok_or_else(|| JsError::new("Bet must be a positive whole number"))?;
        self.arena.start_match(amount).map_err(js_error)
    }

    pub fn reset(&self) {
        self.arena.reset();
    }

    /// Send `GAME_ENDED` with `"win"`, `"lose"` or `"draw"`.
    #[wasm_bindgen(js_name = reportGameEnded)]
    pub fn report_game_ended(&self, result: &str, win_amount: Option<f64>) -> Result<(), JsError> {
        let result = match result {
            "win" => Outcome::Win,
            "lose" => Outcome::Lose,
            "draw" => Outcome::Draw,
            other => return Err(JsError::new(&format!("Unknown result: {}", other))),
        };
        self.arena.report_game_ended(result, win_amount.and_then(whole_amount));
        Ok(())
    }

    #[wasm_bindgen(js_name = requestBalance)]
    pub fn request_balance(&self) {
        self.arena.request_balance_sync();
    }

    /// Subscribe to a session event (`balanceUpdate`, `betPlaced`,
    /// `betRejected`, `connected`, `gameStart`, `gameEnd`) or a match event
    /// (`matchStarted`, `roundResolved`, `matchTerminated`, `matchReset`).
    pub fn on(&self, event: &str, handler: js_sys::Function) -> Result<u32, JsError> {
        if let Ok(kind) = event.parse::<SessionEventKind>() {
            let id = self.arena.subscribe_session(kind, move |e| call_js(&handler, to_js(e)));
            return Ok(id.as_u64() as u32);
        }
        if let Some(kind) = MatchEventKind::parse(event) {
            let id = self.arena.subscribe_match(kind, move |e| call_js(&handler, to_js(e)));
            return Ok(id.as_u64() as u32);
        }
        Err(JsError::new(&format!("Unknown event: {}", event)))
    }

    pub fn off(&self, event: &str, id: u32) -> bool {
        let id = crate::ListenerId::from_u64(id as u64);
        if event.parse::<SessionEventKind>().is_ok() {
            self.arena.unsubscribe_session(id)
        } else if MatchEventKind::parse(event).is_some() {
            self.arena.unsubscribe_match(id)
        } else {
            false
        }
    }

    pub fn state(&self) -> Result<JsValue, JsError> {
        to_js(&self.arena.state())
    }

    pub fn history(&self) -> Result<JsValue, JsError> {
        to_js(&self.arena.history())
    }

    pub fn stats(&self) -> Result<JsValue, JsError> {
        to_js(&self.arena.stats())
    }

    pub fn session(&self) -> Result<JsValue, JsError> {
        to_js(&self.arena.session().snapshot())
    }

    pub fn phase(&self) -> Result<JsValue, JsError> {
        to_js(&self.arena.phase())
    }

    /// Last balance reported by the host, if any.
    pub fn balance(&self) -> Option<f64> {
        self.arena.session().balance().map(|b| b as f64)
    }

    #[wasm_bindgen(js_name = isConnected)]
    pub fn is_connected(&self) -> bool {
        self.arena.session().is_connected()
    }
}

impl Drop for RpsGame {
    fn drop(&mut self) {
        if let Some(window) = &self.window {
            let _ = window.remove_event_listener_with_callback(
                "message",
                self.on_message.as_ref().unchecked_ref(),
            );
            if let Some(handle) = self.heartbeat_handle {
                window.clear_interval_with_handle(handle);
            }
        }
    }
}

/// Resolve a round without a running game, e.g. for tutorials.
#[wasm_bindgen]
pub fn resolve_round(player_move: &str, opponent_move: &str) -> Result<String, JsError> {
    let a = parse_move(player_move).map_err(js_error)?;
    let b = parse_move(opponent_move).map_err(js_error)?;
    Ok(resolve(a, b).as_str().to_string())
}

/// Default configuration as JSON
#[wasm_bindgen]
pub fn get_default_config() -> Result<String, JsError> {
    serde_json::to_string(&GameConfig::default())
        .map_err(|e| JsError::new(&format!("Serialization error: {}", e)))
}

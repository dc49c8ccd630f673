//! Messaging channel to the hosting frame
//!
//! At-most-once, best effort: no queue, no retry, no acknowledgement. Sends
//! never fail from the caller's point of view. Inbound messages are handed to
//! one dispatcher whatever their type; routing belongs to the session.

use std::cell::RefCell;
use std::rc::Rc;

use log::debug;
use serde::Serialize;
use serde_json::Value;

use crate::error::TransportError;

/// Protocol message types
pub mod kind {
    // outbound
    pub const GAME_READY: &str = "GAME_READY";
    pub const PING: &str = "PING";
    pub const REQUEST_BALANCE: &str = "REQUEST_BALANCE";
    pub const PLACE_BET: &str = "PLACE_BET";
    pub const GAME_STARTED: &str = "GAME_STARTED";
    pub const GAME_WON: &str = "GAME_WON";
    pub const GAME_LOST: &str = "GAME_LOST";
    pub const GAME_ENDED: &str = "GAME_ENDED";

    // inbound
    pub const BALANCE_UPDATE: &str = "BALANCE_UPDATE";
    pub const BET_PLACED: &str = "BET_PLACED";
    pub const BET_REJECTED: &str = "BET_REJECTED";
    pub const PONG: &str = "PONG";
    pub const GAME_START: &str = "GAME_START";
    pub const GAME_END: &str = "GAME_END";
}

/// Outbound `{type, data, timestamp}` message
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
    pub timestamp: u64,
}

impl Envelope {
    pub fn new(kind: &str, data: Value, timestamp: u64) -> Self {
        Self {
            kind: kind.to_string(),
            data,
            timestamp,
        }
    }
}

/// Inbound message: a JSON object with a string `type`
#[derive(Clone, Debug, PartialEq)]
pub struct Inbound {
    pub kind: String,
    pub body: Value,
}

impl Inbound {
    pub fn from_value(body: Value) -> Option<Self> {
        let kind = body.get("type")?.as_str()?.to_string();
        Some(Self { kind, body })
    }

    /// Look `name` up at the top level, then inside `data`.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.body
            .get(name)
            .filter(|v| !v.is_null())
            .or_else(|| self.body.get("data")?.get(name).filter(|v| !v.is_null()))
    }

    /// The `data` member, or the whole message when the host sent it flat.
    pub fn payload(&self) -> &Value {
        self.body.get("data").unwrap_or(&self.body)
    }
}

/// Byte pipe to the hosting frame
pub trait Transport {
    fn post(&self, text: &str) -> Result<(), TransportError>;

    fn is_attached(&self) -> bool {
        true
    }
}

impl<T: Transport + ?Sized> Transport for Rc<T> {
    fn post(&self, text: &str) -> Result<(), TransportError> {
        (**self).post(text)
    }

    fn is_attached(&self) -> bool {
        (**self).is_attached()
    }
}

/// No parent frame (running standalone)
#[derive(Clone, Copy, Debug, Default)]
pub struct Detached;

impl Transport for Detached {
    fn post(&self, _text: &str) -> Result<(), TransportError> {
        Err(TransportError::Detached)
    }

    fn is_attached(&self) -> bool {
        false
    }
}

/// Records everything posted; for native hosts and tests
#[derive(Debug, Default)]
pub struct MemoryTransport {
    sent: RefCell<Vec<String>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.borrow().clone()
    }

    /// Posted messages parsed back into JSON.
    pub fn envelopes(&self) -> Vec<Value> {
        self.sent
            .borrow()
            .iter()
            .filter_map(|s| serde_json::from_str(s).ok())
            .collect()
    }

    pub fn kinds(&self) -> Vec<String> {
        self.envelopes()
            .iter()
            .filter_map(|v| v.get("type")?.as_str().map(str::to_string))
            .collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.kinds().iter().filter(|k| *k == kind).count()
    }

    pub fn clear(&self) {
        self.sent.borrow_mut().clear();
    }
}

impl Transport for MemoryTransport {
    fn post(&self, text: &str) -> Result<(), TransportError> {
        self.sent.borrow_mut().push(text.to_string());
        Ok(())
    }
}

type Dispatcher = Rc<dyn Fn(&Inbound)>;

/// Envelope transport with a single inbound dispatcher
pub struct MessageChannel<T: Transport> {
    transport: T,
    dispatcher: RefCell<Option<Dispatcher>>,
    diagnostics: bool,
}

impl<T: Transport> MessageChannel<T> {
    pub fn new(transport: T, diagnostics: bool) -> Self {
        Self {
            transport,
            dispatcher: RefCell::new(None),
            diagnostics,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn is_attached(&self) -> bool {
        self.transport.is_attached()
    }

    pub fn send(&self, envelope: &Envelope) {
        if !self.transport.is_attached() {
            if self.diagnostics {
                debug!("no parent frame, dropping {}", envelope.kind);
            }
            return;
        }

        let result = serde_json::to_string(envelope)
            .map_err(|e| TransportError::Encode(e.to_string()))
            .and_then(|text| self.transport.post(&text));

        if let Err(err) = result {
            if self.diagnostics {
                debug!("send {} failed: {}", envelope.kind, err);
            }
        }
    }

    /// Replace the dispatcher.
    pub fn on_receive(&self, handler: impl Fn(&Inbound) + 'static) {
        *self.dispatcher.borrow_mut() = Some(Rc::new(handler));
    }

    pub fn deliver(&self, text: &str) {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => self.deliver_value(value),
            Err(err) => {
                if self.diagnostics {
                    debug!("dropping non-json message: {}", err);
                }
            }
        }
    }

    pub fn deliver_value(&self, value: Value) {
        let Some(message) = Inbound::from_value(value) else {
            if self.diagnostics {
                debug!("dropping message without a string type");
            }
            return;
        };

        let dispatcher = self.dispatcher.borrow().clone();
        if let Some(dispatch) = dispatcher {
            dispatch(&message);
        }
    }
}

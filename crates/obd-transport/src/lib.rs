//! ELM327 Adapter Transports
//!
//! A transport moves text commands to the adapter and delivers every complete
//! response line back to the session engine, together with connection state
//! changes. Both arrive on one channel so the engine sees them in order.
//!
//! Two concrete links are provided: a TCP socket for WiFi adapters and a
//! BLE GATT link that frames MTU-sized notification chunks into lines.

pub mod ble;
pub mod error;
pub mod framer;
pub mod mock;
pub mod tcp;

pub use ble::{BleTransport, GattLink, GattProfile, GattSession};
pub use error::TransportError;
pub use framer::{split_lines, ResponseFramer};
pub use mock::{ConnectBehavior, MockAdapter, MockTransport};
pub use tcp::{TcpConfig, TcpTransport};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

/// Command terminator expected by the adapter
pub const COMMAND_TERMINATOR: &str = "\r";

/// Link state as seen by the session engine
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum TransportState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Connection attempt or established link failed
    Failed(String),
}

impl TransportState {
    pub fn is_connected(&self) -> bool {
        matches!(self, TransportState::Connected)
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportState::Disconnected => write!(f, "disconnected"),
            TransportState::Connecting => write!(f, "connecting"),
            TransportState::Connected => write!(f, "connected"),
            TransportState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Everything a transport reports upward
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    StateChanged(TransportState),
    /// One trimmed, non-empty response line
    Line(String),
}

/// Channel a transport reports on
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Bidirectional, line-oriented link to an ELM327 adapter
///
/// Implementations never block the caller: `connect` starts the link in the
/// background and reports progress through `events`. Commands sent while the
/// link is not connected are dropped.
pub trait Transport: Send {
    /// Short label for logs
    fn name(&self) -> &str;

    /// Begin connecting, reporting state and lines on `events`
    fn connect(&mut self, events: EventSender);

    /// Tear the link down; idempotent
    fn disconnect(&mut self);

    /// Send one command, the carriage return is appended here
    fn send(&mut self, command: &str);

    /// Current link state
    fn state(&self) -> TransportState;
}

/// Shared state cell plus the event channel of one connection attempt
#[derive(Debug, Clone)]
pub(crate) struct Reporter {
    state: Arc<Mutex<TransportState>>,
    events: EventSender,
}

impl Reporter {
    pub(crate) fn new(state: Arc<Mutex<TransportState>>, events: EventSender) -> Self {
        Self { state, events }
    }

    /// Record a new state and announce it
    pub(crate) fn report(&self, state: TransportState) {
        debug!("transport state -> {}", state);
        *lock_state(&self.state) = state.clone();
        let _ = self.events.send(TransportEvent::StateChanged(state));
    }

    pub(crate) fn line(&self, line: String) {
        let _ = self.events.send(TransportEvent::Line(line));
    }
}

/// Lock a state cell, recovering the value if a holder panicked
pub(crate) fn lock_state(cell: &Mutex<TransportState>) -> std::sync::MutexGuard<'_, TransportState> {
    cell.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Append the adapter terminator to a command
pub(crate) fn terminated(command: &str) -> String {
    format!("{}{}", command, COMMAND_TERMINATOR)
}

//! OBD-II Session Engine
//!
//! Connects to an ELM327 adapter, runs its timed init sequence, polls the
//! parameter catalog round-robin with one request in flight, and interleaves
//! trouble-code scan and clear operations. State is published as snapshots
//! through a watch channel and as discrete events through a broadcast
//! channel.

mod config;
mod demo;
mod engine;
mod error;
mod state;

pub use config::{
    ConfiguredTransport, SessionConfig, TimingPolicy, TransportConfig, TransportFactory,
    ENV_PREFIX,
};
pub use demo::DemoSource;
pub use error::SessionError;
pub use state::{
    DiagnosticKind, DiagnosticOutcome, DiagnosticReport, ParameterSample, SampleValue,
    SessionEvent, SessionSnapshot, SessionState,
};

use engine::{Command, Engine};
use tokio::sync::{broadcast, mpsc, watch};

/// Capacity of the event broadcast; slow subscribers see `Lagged`
const EVENT_CAPACITY: usize = 256;

/// Handle onto a running session engine
///
/// Cheap to clone. The engine shuts down, disconnecting its transport, once
/// every handle has been dropped.
#[derive(Clone)]
pub struct ObdSession {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
}

impl ObdSession {
    /// Start an engine task on the current tokio runtime
    pub fn spawn<F>(config: SessionConfig, factory: F) -> Self
    where
        F: TransportFactory,
    {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (internal, internal_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot) = watch::channel(SessionSnapshot::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let engine = Engine::new(
            config,
            Box::new(factory),
            internal,
            snapshot_tx,
            events.clone(),
        );
        tokio::spawn(engine.run(command_rx, internal_rx));

        Self {
            commands,
            snapshot,
            events,
        }
    }

    /// Open the transport and start init; ignored while already connected
    pub fn connect(&self) -> Result<(), SessionError> {
        self.send(Command::Connect)
    }

    /// Close the transport and reset every sample to unavailable
    pub fn disconnect(&self) -> Result<(), SessionError> {
        self.send(Command::Disconnect)
    }

    /// Read stored trouble codes; the outcome arrives as a [`SessionEvent::Diagnostic`]
    pub fn scan_codes(&self) -> Result<(), SessionError> {
        self.send(Command::Diagnostic(DiagnosticKind::Scan))
    }

    /// Erase stored trouble codes; the outcome arrives as a [`SessionEvent::Diagnostic`]
    pub fn clear_codes(&self) -> Result<(), SessionError> {
        self.send(Command::Diagnostic(DiagnosticKind::Clear))
    }

    /// Switch to simulated data, closing any real connection
    pub fn start_demo(&self) -> Result<(), SessionError> {
        self.send(Command::StartDemo)
    }

    pub fn stop_demo(&self) -> Result<(), SessionError> {
        self.send(Command::StopDemo)
    }

    /// Latest published state
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver that wakes on every snapshot change
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Receiver for discrete events published from now on
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn send(&self, command: Command) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .map_err(|_| SessionError::Closed)
    }
}

//! Mock Transport for testing
//!
//! Records every command it is asked to send and lets a test inject adapter
//! lines or connection drops. An optional responder answers commands
//! synchronously, standing in for a scripted adapter.

use crate::{EventSender, Transport, TransportEvent, TransportState};
use std::sync::{Arc, Mutex, MutexGuard};

type Responder = Box<dyn FnMut(&str) -> Vec<String> + Send>;

/// How the mock reacts to `connect`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectBehavior {
    #[default]
    Succeed,
    Fail(String),
    /// Stay in `Connecting` forever
    Hang,
}

#[derive(Default)]
struct MockInner {
    state: TransportState,
    events: Option<EventSender>,
    sent: Vec<String>,
    connects: usize,
    behavior: ConnectBehavior,
    responder: Option<Responder>,
}

impl MockInner {
    fn emit(&self, event: TransportEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    fn set_state(&mut self, state: TransportState) {
        self.state = state.clone();
        self.emit(TransportEvent::StateChanged(state));
    }
}

/// Test-side handle onto a simulated adapter
///
/// Cloning shares the same adapter; every transport built from it records
/// into the same log.
#[derive(Clone, Default)]
pub struct MockAdapter {
    inner: Arc<Mutex<MockInner>>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer each sent command with the lines returned by `responder`
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&str) -> Vec<String> + Send + 'static,
    {
        let adapter = Self::new();
        adapter.lock().responder = Some(Box::new(responder));
        adapter
    }

    pub fn set_connect_behavior(&self, behavior: ConnectBehavior) {
        self.lock().behavior = behavior;
    }

    /// Build a transport driven by this adapter
    pub fn transport(&self) -> MockTransport {
        MockTransport {
            adapter: self.clone(),
        }
    }

    /// Commands sent so far, without terminators
    pub fn sent(&self) -> Vec<String> {
        self.lock().sent.clone()
    }

    pub fn clear_sent(&self) {
        self.lock().sent.clear();
    }

    /// How many times `connect` was called
    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    pub fn state(&self) -> TransportState {
        self.lock().state.clone()
    }

    /// Deliver one adapter line to the connected engine
    pub fn respond(&self, line: &str) {
        self.lock().emit(TransportEvent::Line(line.to_string()));
    }

    /// Simulate the adapter closing the link
    pub fn drop_connection(&self) {
        let mut inner = self.lock();
        inner.set_state(TransportState::Disconnected);
        inner.events = None;
    }

    /// Simulate a link failure
    pub fn fail(&self, reason: &str) {
        let mut inner = self.lock();
        inner.set_state(TransportState::Failed(reason.to_string()));
        inner.events = None;
    }

    fn lock(&self) -> MutexGuard<'_, MockInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Transport half of a [`MockAdapter`]
pub struct MockTransport {
    adapter: MockAdapter,
}

impl Transport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    fn connect(&mut self, events: EventSender) {
        let mut inner = self.adapter.lock();
        inner.connects += 1;
        inner.events = Some(events);
        inner.set_state(TransportState::Connecting);
        match inner.behavior.clone() {
            ConnectBehavior::Succeed => inner.set_state(TransportState::Connected),
            ConnectBehavior::Fail(reason) => inner.set_state(TransportState::Failed(reason)),
            ConnectBehavior::Hang => {}
        }
    }

    fn disconnect(&mut self) {
        let mut inner = self.adapter.lock();
        if inner.events.is_some() {
            inner.set_state(TransportState::Disconnected);
        }
        inner.state = TransportState::Disconnected;
        inner.events = None;
    }

    fn send(&mut self, command: &str) {
        let mut inner = self.adapter.lock();
        if !inner.state.is_connected() {
            return;
        }
        inner.sent.push(command.to_string());

        let replies = match inner.responder.as_mut() {
            Some(responder) => responder(command),
            None => Vec::new(),
        };
        for line in replies {
            inner.emit(TransportEvent::Line(line));
        }
    }

    fn state(&self) -> TransportState {
        self.adapter.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_records_commands_when_connected() {
        let adapter = MockAdapter::new();
        let mut transport = adapter.transport();
        transport.send("ATZ");
        assert!(adapter.sent().is_empty());

        let (tx, _rx) = mpsc::unbounded_channel();
        transport.connect(tx);
        transport.send("ATZ");
        transport.send("010C");
        assert_eq!(adapter.sent(), vec!["ATZ", "010C"]);
        assert_eq!(adapter.connects(), 1);
    }

    #[test]
    fn test_responder_replies() {
        let adapter = MockAdapter::with_responder(|command| match command {
            "010D" => vec!["41 0D 28".to_string()],
            _ => Vec::new(),
        });
        let mut transport = adapter.transport();
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.connect(tx);
        transport.send("010D");

        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(
            events,
            vec![
                TransportEvent::StateChanged(TransportState::Connecting),
                TransportEvent::StateChanged(TransportState::Connected),
                TransportEvent::Line("41 0D 28".to_string()),
            ]
        );
    }

    #[test]
    fn test_failed_connect() {
        let adapter = MockAdapter::new();
        adapter.set_connect_behavior(ConnectBehavior::Fail("refused".into()));
        let mut transport = adapter.transport();
        let (tx, _rx) = mpsc::unbounded_channel();
        transport.connect(tx);
        assert_eq!(transport.state(), TransportState::Failed("refused".into()));
        transport.send("ATZ");
        assert!(adapter.sent().is_empty());
    }

    #[test]
    fn test_disconnect_silences_adapter() {
        let adapter = MockAdapter::new();
        let mut transport = adapter.transport();
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.connect(tx);
        transport.disconnect();
        adapter.respond("41 0C 1A F8");

        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(
            events.last(),
            Some(&TransportEvent::StateChanged(TransportState::Disconnected))
        );
    }
}

//! BLE Transport
//!
//! The adapter exposes one GATT service with a notify characteristic for
//! responses and a write characteristic for commands. Radio access belongs
//! to a platform binding behind [`GattLink`]; this module handles MTU
//! chunking of outbound commands and prompt framing of inbound chunks.

use crate::error::TransportError;
use crate::framer::ResponseFramer;
use crate::{lock_state, terminated, EventSender, Reporter, Transport, TransportState};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// ATT header bytes subtracted from the MTU for each write
pub const ATT_OVERHEAD: usize = 3;

/// Minimum ATT MTU every peripheral supports
pub const DEFAULT_MTU: usize = 23;

/// Service and characteristic identifiers of the adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GattProfile {
    pub service: String,
    /// Characteristic carrying response notifications
    pub notify: String,
    /// Characteristic accepting command writes
    pub write: String,
}

impl Default for GattProfile {
    fn default() -> Self {
        Self {
            service: "FFF0".to_string(),
            notify: "FFF1".to_string(),
            write: "FFF2".to_string(),
        }
    }
}

/// An open GATT connection handed back by the platform binding
#[derive(Debug)]
pub struct GattSession {
    /// Negotiated ATT MTU
    pub mtu: usize,
    /// Each message is one write to the write characteristic
    pub writer: mpsc::UnboundedSender<Vec<u8>>,
    /// Notification payloads from the notify characteristic; closes on link loss
    pub notifications: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl GattSession {
    /// Largest payload that fits one write
    pub fn chunk_size(&self) -> usize {
        self.mtu.saturating_sub(ATT_OVERHEAD).max(1)
    }
}

/// Platform Bluetooth binding
///
/// `open` performs discovery, connection, service lookup and notification
/// subscription, failing with the matching [`TransportError`] variant.
#[async_trait]
pub trait GattLink: Send + Sync + 'static {
    async fn open(&self, profile: &GattProfile) -> Result<GattSession, TransportError>;

    /// Release the peripheral
    async fn close(&self) {}
}

/// Transport over a GATT link
pub struct BleTransport {
    link: Arc<dyn GattLink>,
    profile: GattProfile,
    state: Arc<Mutex<TransportState>>,
    reporter: Option<Reporter>,
    outbound: Option<mpsc::UnboundedSender<String>>,
    task: Option<JoinHandle<()>>,
}

impl BleTransport {
    pub fn new(link: Arc<dyn GattLink>, profile: GattProfile) -> Self {
        Self {
            link,
            profile,
            state: Arc::new(Mutex::new(TransportState::Disconnected)),
            reporter: None,
            outbound: None,
            task: None,
        }
    }

    pub fn profile(&self) -> &GattProfile {
        &self.profile
    }

    fn stop_task(&mut self) {
        self.outbound = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Transport for BleTransport {
    fn name(&self) -> &str {
        "ble"
    }

    fn connect(&mut self, events: EventSender) {
        self.stop_task();

        let reporter = Reporter::new(self.state.clone(), events);
        reporter.report(TransportState::Connecting);

        let (tx, rx) = mpsc::unbounded_channel();
        self.outbound = Some(tx);
        self.task = Some(tokio::spawn(run_link(
            self.link.clone(),
            self.profile.clone(),
            reporter.clone(),
            rx,
        )));
        self.reporter = Some(reporter);
    }

    fn disconnect(&mut self) {
        self.stop_task();
        if let Some(reporter) = self.reporter.take() {
            info!("Releasing BLE adapter");
            let link = self.link.clone();
            tokio::spawn(async move { link.close().await });
            reporter.report(TransportState::Disconnected);
        }
    }

    fn send(&mut self, command: &str) {
        if !self.state().is_connected() {
            debug!("Dropping {:?}, BLE link not connected", command);
            return;
        }
        if let Some(outbound) = &self.outbound {
            let _ = outbound.send(terminated(command));
        }
    }

    fn state(&self) -> TransportState {
        lock_state(&self.state).clone()
    }
}

impl Drop for BleTransport {
    fn drop(&mut self) {
        self.stop_task();
    }
}

async fn run_link(
    link: Arc<dyn GattLink>,
    profile: GattProfile,
    reporter: Reporter,
    mut outbound: mpsc::UnboundedReceiver<String>,
) {
    info!("Opening BLE adapter service {}", profile.service);
    let mut session = match link.open(&profile).await {
        Ok(session) => session,
        Err(e) => {
            warn!("BLE connection failed: {}", e);
            reporter.report(TransportState::Failed(e.to_string()));
            return;
        }
    };
    debug!("BLE link open, mtu {}", session.mtu);
    reporter.report(TransportState::Connected);

    let chunk_size = session.chunk_size();
    let mut framer = ResponseFramer::new();

    loop {
        tokio::select! {
            notification = session.notifications.recv() => match notification {
                Some(bytes) => {
                    for line in framer.push(&bytes) {
                        debug!("<- {}", line);
                        reporter.line(line);
                    }
                }
                None => {
                    info!("BLE adapter disconnected");
                    reporter.report(TransportState::Disconnected);
                    break;
                }
            },
            command = outbound.recv() => match command {
                Some(command) => {
                    debug!("-> {}", command.trim_end());
                    let written = command
                        .as_bytes()
                        .chunks(chunk_size)
                        .all(|chunk| session.writer.send(chunk.to_vec()).is_ok());
                    if !written {
                        warn!("BLE write characteristic went away");
                        reporter.report(TransportState::Disconnected);
                        break;
                    }
                }
                None => break,
            },
        }
    }
}

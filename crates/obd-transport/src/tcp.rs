//! TCP Transport for WiFi ELM327 Adapters

use crate::error::TransportError;
use crate::framer::split_lines;
use crate::{lock_state, terminated, EventSender, Reporter, Transport, TransportState};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Address most WiFi adapters listen on out of the box
pub const DEFAULT_HOST: &str = "192.168.0.10";
pub const DEFAULT_PORT: u16 = 35000;

const READ_BUFFER: usize = 1024;

/// Socket endpoint of a WiFi adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    pub host: String,
    pub port: u16,
    /// Budget for the TCP handshake
    pub connect_timeout_ms: u64,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            connect_timeout_ms: 5000,
        }
    }
}

impl TcpConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Stream-socket transport
///
/// Each read is split into lines on CR/LF; WiFi adapters deliver whole
/// responses per segment in practice, so no prompt framing is applied.
pub struct TcpTransport {
    config: TcpConfig,
    state: Arc<Mutex<TransportState>>,
    reporter: Option<Reporter>,
    outbound: Option<mpsc::UnboundedSender<String>>,
    task: Option<JoinHandle<()>>,
}

impl TcpTransport {
    pub fn new(config: TcpConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(TransportState::Disconnected)),
            reporter: None,
            outbound: None,
            task: None,
        }
    }

    pub fn config(&self) -> &TcpConfig {
        &self.config
    }

    fn stop_task(&mut self) {
        self.outbound = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Transport for TcpTransport {
    fn name(&self) -> &str {
        "tcp"
    }

    fn connect(&mut self, events: EventSender) {
        self.stop_task();

        let reporter = Reporter::new(self.state.clone(), events);
        reporter.report(TransportState::Connecting);

        let (tx, rx) = mpsc::unbounded_channel();
        self.outbound = Some(tx);
        self.task = Some(tokio::spawn(run_connection(
            self.config.clone(),
            reporter.clone(),
            rx,
        )));
        self.reporter = Some(reporter);
    }

    fn disconnect(&mut self) {
        self.stop_task();
        if let Some(reporter) = self.reporter.take() {
            info!("Closing adapter socket {}", self.config.address());
            reporter.report(TransportState::Disconnected);
        }
    }

    fn send(&mut self, command: &str) {
        if !self.state().is_connected() {
            debug!("Dropping {:?}, socket not connected", command);
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

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.stop_task();
    }
}

async fn open_stream(config: &TcpConfig) -> Result<TcpStream, TransportError> {
    let address = config.address();
    info!("Connecting to adapter at {}", address);

    let stream = tokio::time::timeout(config.connect_timeout(), TcpStream::connect(&address))
        .await
        .map_err(|_| TransportError::ConnectTimeout(address.clone()))??;
    stream.set_nodelay(true)?;
    Ok(stream)
}

async fn run_connection(
    config: TcpConfig,
    reporter: Reporter,
    mut outbound: mpsc::UnboundedReceiver<String>,
) {
    let stream = match open_stream(&config).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Adapter connection failed: {}", e);
            reporter.report(TransportState::Failed(e.to_string()));
            return;
        }
    };
    reporter.report(TransportState::Connected);

    let (mut reader, mut writer) = stream.into_split();
    let mut buffer = [0u8; READ_BUFFER];

    loop {
        tokio::select! {
            read = reader.read(&mut buffer) => match read {
                Ok(0) => {
                    info!("Adapter closed the connection");
                    reporter.report(TransportState::Disconnected);
                    break;
                }
                Ok(n) => {
                    let text = String::from_utf8_lossy(&buffer[..n]);
                    for line in split_lines(&text) {
                        debug!("<- {}", line);
                        reporter.line(line);
                    }
                }
                Err(e) => {
                    warn!("Adapter read failed: {}", e);
                    reporter.report(TransportState::Failed(e.to_string()));
                    break;
                }
            },
            command = outbound.recv() => match command {
                Some(command) => {
                    debug!("-> {}", command.trim_end());
                    if let Err(e) = writer.write_all(command.as_bytes()).await {
                        warn!("Adapter write failed: {}", e);
                        reporter.report(TransportState::Failed(e.to_string()));
                        break;
                    }
                }
                None => break,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_endpoint() {
        let config = TcpConfig::default();
        assert_eq!(config.address(), "192.168.0.10:35000");
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_send_dropped_while_disconnected() {
        let mut transport = TcpTransport::new(TcpConfig::new("127.0.0.1", 1));
        transport.send("010C");
        assert_eq!(transport.state(), TransportState::Disconnected);
    }

    #[tokio::test]
    async fn test_refused_connection_reports_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut transport = TcpTransport::new(TcpConfig::new("127.0.0.1", port));
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.connect(tx);

        assert_eq!(
            rx.recv().await,
            Some(crate::TransportEvent::StateChanged(TransportState::Connecting))
        );
        match rx.recv().await {
            Some(crate::TransportEvent::StateChanged(TransportState::Failed(_))) => {}
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(transport.state(), TransportState::Failed(_)));
    }
}

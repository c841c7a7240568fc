//! Session configuration

use crate::error::SessionError;
use obd_protocol::{ObdProtocol, Parameter};
use obd_transport::{
    BleTransport, GattLink, GattProfile, TcpConfig, TcpTransport, Transport,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Environment variable prefix for overrides, e.g. `OBD_TIMING__COMMAND_TIMEOUT_MS`
pub const ENV_PREFIX: &str = "OBD";

/// Delays and budgets that pace the adapter conversation (milliseconds)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingPolicy {
    /// Link up to `ATZ`
    pub init_initial_ms: u64,
    /// `ATZ` to the next init command; the adapter reboots
    pub reset_settle_ms: u64,
    /// Between the remaining init commands
    pub init_step_ms: u64,
    /// Last init command to the first poll
    pub init_tail_ms: u64,
    /// Parameter answer, NO DATA or negative to the next poll
    pub response_settle_ms: u64,
    /// `STOPPED` to the next poll
    pub stopped_settle_ms: u64,
    /// Budget for a parameter answer
    pub command_timeout_ms: u64,
    /// Timeout to the next poll
    pub timeout_cooldown_ms: u64,
    /// Scan/clear request to transmission when nothing is in flight
    pub diagnostic_defer_idle_ms: u64,
    /// Scan/clear request to transmission while a poll is outstanding
    pub diagnostic_defer_busy_ms: u64,
    /// Budget for a scan/clear answer, counted from transmission
    pub diagnostic_timeout_ms: u64,
    /// Diagnostic completion to the next poll
    pub resume_ms: u64,
    /// Demo value refresh period
    pub demo_tick_ms: u64,
    /// Simulated scan duration
    pub demo_scan_ms: u64,
    /// Simulated clear duration
    pub demo_clear_ms: u64,
}

impl Default for TimingPolicy {
    fn default() -> Self {
        Self {
            init_initial_ms: 500,
            reset_settle_ms: 1500,
            init_step_ms: 1000,
            init_tail_ms: 2000,
            response_settle_ms: 300,
            stopped_settle_ms: 2000,
            command_timeout_ms: 8000,
            timeout_cooldown_ms: 1000,
            diagnostic_defer_idle_ms: 300,
            diagnostic_defer_busy_ms: 1500,
            diagnostic_timeout_ms: 10_000,
            resume_ms: 500,
            demo_tick_ms: 1500,
            demo_scan_ms: 2000,
            demo_clear_ms: 1500,
        }
    }
}

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

impl TimingPolicy {
    /// Offsets from link-up at which each of `count` init commands is sent
    pub fn init_offsets(&self, count: usize) -> Vec<Duration> {
        let mut offsets = Vec::with_capacity(count);
        let mut at = self.init_initial_ms;
        for index in 0..count {
            offsets.push(ms(at));
            at += if index == 0 {
                self.reset_settle_ms
            } else {
                self.init_step_ms
            };
        }
        offsets
    }

    /// Offset from link-up of the first poll
    pub fn polling_start(&self, count: usize) -> Duration {
        match self.init_offsets(count).last() {
            Some(last) => *last + ms(self.init_tail_ms),
            None => ms(self.init_initial_ms),
        }
    }

    pub fn response_settle(&self) -> Duration {
        ms(self.response_settle_ms)
    }

    pub fn stopped_settle(&self) -> Duration {
        ms(self.stopped_settle_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        ms(self.command_timeout_ms)
    }

    pub fn timeout_cooldown(&self) -> Duration {
        ms(self.timeout_cooldown_ms)
    }

    /// Deferral before a scan/clear is transmitted
    pub fn diagnostic_defer(&self, poll_outstanding: bool) -> Duration {
        if poll_outstanding {
            ms(self.diagnostic_defer_busy_ms)
        } else {
            ms(self.diagnostic_defer_idle_ms)
        }
    }

    pub fn diagnostic_timeout(&self) -> Duration {
        ms(self.diagnostic_timeout_ms)
    }

    pub fn resume(&self) -> Duration {
        ms(self.resume_ms)
    }

    pub fn demo_tick(&self) -> Duration {
        ms(self.demo_tick_ms)
    }

    pub fn demo_scan(&self) -> Duration {
        ms(self.demo_scan_ms)
    }

    pub fn demo_clear(&self) -> Duration {
        ms(self.demo_clear_ms)
    }
}

/// Which link to open on connect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
    Tcp(TcpConfig),
    Ble(GattProfile),
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Tcp(TcpConfig::default())
    }
}

/// Everything the session engine needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub timing: TimingPolicy,
    /// Protocol selected during init (`ATSPn`)
    pub protocol: ObdProtocol,
    /// Parameters read as freeze frame after a scan finds codes; empty disables
    pub freeze_frame: Vec<Parameter>,
    pub transport: TransportConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timing: TimingPolicy::default(),
            protocol: ObdProtocol::Auto,
            freeze_frame: vec![
                Parameter::Rpm,
                Parameter::Speed,
                Parameter::CoolantTemp,
                Parameter::EngineLoad,
                Parameter::ThrottlePosition,
                Parameter::IntakeAirTemp,
                Parameter::Maf,
            ],
            transport: TransportConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Load defaults, then the optional file, then `OBD_*` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, SessionError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            info!("Loading session config from {}", path.display());
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?.try_deserialize::<SessionConfig>()?;
        Ok(config)
    }

    /// Config for a WiFi adapter
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            transport: TransportConfig::Tcp(TcpConfig::new(host, port)),
            ..Self::default()
        }
    }
}

/// Builds a fresh transport for every connect
pub trait TransportFactory: Send + 'static {
    fn create(&self) -> Box<dyn Transport>;
}

impl<F> TransportFactory for F
where
    F: Fn() -> Box<dyn Transport> + Send + 'static,
{
    fn create(&self) -> Box<dyn Transport> {
        self()
    }
}

/// Factory driven by a [`TransportConfig`]
pub struct ConfiguredTransport {
    link: Link,
}

enum Link {
    Tcp(TcpConfig),
    Ble(Arc<dyn GattLink>, GattProfile),
}

impl ConfiguredTransport {
    /// A BLE config needs a platform GATT binding
    pub fn new(
        config: TransportConfig,
        gatt: Option<Arc<dyn GattLink>>,
    ) -> Result<Self, SessionError> {
        let link = match (config, gatt) {
            (TransportConfig::Tcp(tcp), _) => Link::Tcp(tcp),
            (TransportConfig::Ble(profile), Some(gatt)) => Link::Ble(gatt, profile),
            (TransportConfig::Ble(_), None) => {
                return Err(SessionError::Transport(
                    "BLE transport requires a GATT binding".to_string(),
                ))
            }
        };
        Ok(Self { link })
    }
}

impl TransportFactory for ConfiguredTransport {
    fn create(&self) -> Box<dyn Transport> {
        match &self.link {
            Link::Tcp(tcp) => Box::new(TcpTransport::new(tcp.clone())),
            Link::Ble(gatt, profile) => Box::new(BleTransport::new(gatt.clone(), profile.clone())),
        }
    }
}

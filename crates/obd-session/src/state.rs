//! Published session state
//!
//! Everything the engine exposes to observers: the lifecycle state, one
//! sample per catalog parameter, the latest trouble codes and the outcome of
//! diagnostic operations.

use crate::error::SessionError;
use chrono::{DateTime, Utc};
use obd_protocol::{DtcRecord, Parameter, Reading};
use obd_transport::TransportState;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Engine lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    /// Transport is opening
    Connecting,
    /// Timed init sequence is running
    Initializing,
    /// Round-robin parameter polling
    Polling,
    /// Scan or clear in progress; polling suspended
    DiagnosticPending,
    /// Simulated data, no transport
    Demo,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Initializing => "initializing",
            SessionState::Polling => "polling",
            SessionState::DiagnosticPending => "diagnostic pending",
            SessionState::Demo => "demo",
        };
        f.write_str(name)
    }
}

/// Value slot of a sample
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleValue {
    #[default]
    Unavailable,
    Reading(Reading),
}

impl SampleValue {
    pub fn reading(&self) -> Option<Reading> {
        match self {
            SampleValue::Unavailable => None,
            SampleValue::Reading(reading) => Some(*reading),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, SampleValue::Reading(_))
    }
}

impl fmt::Display for SampleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleValue::Unavailable => f.pad("unavailable"),
            SampleValue::Reading(reading) => f.pad(&reading.to_string()),
        }
    }
}

/// Latest known value of one catalog parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSample {
    pub parameter: Parameter,
    pub value: SampleValue,
    /// When the value last changed
    pub updated_at: DateTime<Utc>,
}

impl ParameterSample {
    pub fn unavailable(parameter: Parameter) -> Self {
        Self {
            parameter,
            value: SampleValue::Unavailable,
            updated_at: Utc::now(),
        }
    }

    pub fn title(&self) -> &'static str {
        self.parameter.spec().title
    }

    pub fn unit(&self) -> &'static str {
        self.parameter.spec().unit
    }
}

impl fmt::Display for ParameterSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            SampleValue::Unavailable => write!(f, "{}: unavailable", self.title()),
            SampleValue::Reading(reading) => {
                write!(f, "{}: {} {}", self.title(), reading, self.unit())
            }
        }
    }
}

/// Fresh sample set, one unavailable slot per catalog entry
pub fn unavailable_samples() -> Vec<ParameterSample> {
    Parameter::ALL
        .iter()
        .map(|parameter| ParameterSample::unavailable(*parameter))
        .collect()
}

/// Scan or clear
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    Scan,
    Clear,
}

impl DiagnosticKind {
    /// Adapter command for this operation
    pub fn command(&self) -> &'static str {
        match self {
            DiagnosticKind::Scan => "03",
            DiagnosticKind::Clear => "04",
        }
    }

    /// OBD service byte of the request
    pub fn service(&self) -> u8 {
        match self {
            DiagnosticKind::Scan => obd_protocol::mode::READ_DTC,
            DiagnosticKind::Clear => obd_protocol::mode::CLEAR_DTC,
        }
    }
}

/// Successful diagnostic result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticReport {
    /// Scan found this many codes
    CodesRead { count: usize },
    /// Vehicle reported no stored codes
    NoCodes,
    /// Codes were erased
    Cleared,
}

/// Result of one scan or clear
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticOutcome {
    pub kind: DiagnosticKind,
    pub result: Result<DiagnosticReport, SessionError>,
}

impl DiagnosticOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Notifications broadcast by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    Connection(TransportState),
    ParameterUpdated(ParameterSample),
    /// Trouble code list replaced
    CodesUpdated(Vec<DtcRecord>),
    Diagnostic(DiagnosticOutcome),
}

/// Point-in-time view of the session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub connection: TransportState,
    /// One entry per catalog parameter, in catalog order
    pub samples: Vec<ParameterSample>,
    pub dtcs: Vec<DtcRecord>,
    /// Operation in progress, if any
    pub diagnostic: Option<DiagnosticKind>,
    pub last_scan: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            state: SessionState::Idle,
            connection: TransportState::Disconnected,
            samples: unavailable_samples(),
            dtcs: Vec::new(),
            diagnostic: None,
            last_scan: None,
            last_error: None,
        }
    }
}

impl SessionSnapshot {
    pub fn sample(&self, parameter: Parameter) -> &ParameterSample {
        &self.samples[parameter as usize]
    }

    pub fn value(&self, parameter: Parameter) -> Option<Reading> {
        self.sample(parameter).value.reading()
    }

    /// Live adapter link or demo data
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected() || self.state == SessionState::Demo
    }

    pub fn is_scanning(&self) -> bool {
        self.diagnostic == Some(DiagnosticKind::Scan)
    }

    pub fn is_clearing(&self) -> bool {
        self.diagnostic == Some(DiagnosticKind::Clear)
    }
}

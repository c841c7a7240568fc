//! Adapter Response Classification
//!
//! Every logical line received from the adapter is sorted into exactly one
//! [`ResponseKind`]. Rules are applied in priority order; the first match wins.
//! Mode-dependent decisions (e.g. whether `NO DATA` ends a trouble-code scan)
//! are left to the session engine.

use crate::dtc::{self, Dtc};
use crate::hex::{compact, HexFrame};
use crate::mode;
use crate::pid::{self, Parameter, Reading};

/// Adapter banner token (reply to `ATZ` / `ATI`)
const BANNER: &str = "ELM";

/// Adapter error lines that mean the request failed on the bus
const ADAPTER_ERRORS: [&str; 6] = [
    "UNABLE TO CONNECT",
    "CAN ERROR",
    "BUS ERROR",
    "DATA ERROR",
    "BUFFER FULL",
    "BUS BUSY",
];

/// Classified adapter line
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseKind {
    /// Empty line or a bare prompt
    Noise,
    /// Adapter is still hunting for a protocol
    Searching,
    /// Adapter aborted its protocol search
    Stopped,
    /// No answer from the vehicle for the request
    NoData,
    /// Echo of the request just sent
    Echo,
    /// `OK`, an `AT` reply or the adapter banner
    Acknowledgement,
    /// `7F <service> <code>`
    Negative { service: Option<u8> },
    /// Adapter-level failure such as `?` or `CAN ERROR`
    AdapterError(String),
    /// Mode 03 answer with decoded codes
    StoredCodes(Vec<Dtc>),
    /// Mode 04 answer
    CodesCleared,
    /// Mode 02 answer, decoded when the PID is in the catalog
    FreezeFrame(Option<(Parameter, Reading)>),
    /// Mode 01 answer recognised by a catalog entry
    Parameter(Parameter, Reading),
    /// Positive Mode 01 answer no catalog entry recognised
    Undecodable,
    /// Anything else
    Unrecognized,
}

/// Classify one logical line
///
/// `last_request` is the command most recently sent (without carriage
/// return); it is used to recognise echoes when `ATE0` has not yet taken
/// effect.
pub fn classify(line: &str, last_request: Option<&str>) -> ResponseKind {
    let line = line.trim();
    if line.is_empty() || line == ">" {
        return ResponseKind::Noise;
    }

    let upper = line.to_uppercase();
    if upper.contains("SEARCHING") {
        return ResponseKind::Searching;
    }
    if upper.contains("STOPPED") {
        return ResponseKind::Stopped;
    }
    if upper.contains("NO DATA") {
        return ResponseKind::NoData;
    }

    let compact = compact(line);
    // Checked before acknowledgements: "DATA ERROR" contains "AT"
    if compact == "?" || is_adapter_error(&upper) {
        return ResponseKind::AdapterError(line.to_string());
    }
    if is_echo(&compact, last_request) {
        return ResponseKind::Echo;
    }
    if upper.contains("AT") || upper == "OK" || upper.contains(BANNER) {
        return ResponseKind::Acknowledgement;
    }

    let negative = format!("{:02X}", mode::NEGATIVE_RESPONSE);
    if compact.starts_with(&negative) {
        let service = HexFrame::parse(&compact).and_then(|f| f.bytes().get(1).copied());
        return ResponseKind::Negative { service };
    }

    if compact.starts_with(&marker(mode::READ_DTC)) {
        return ResponseKind::StoredCodes(dtc::decode_stored_codes(&compact));
    }
    if compact.starts_with(&marker(mode::CLEAR_DTC)) {
        return ResponseKind::CodesCleared;
    }
    if compact.starts_with(&marker(mode::FREEZE_FRAME)) {
        return ResponseKind::FreezeFrame(dtc::decode_freeze_frame(&compact));
    }

    if let Some((parameter, reading)) = pid::match_response(&compact) {
        return ResponseKind::Parameter(parameter, reading);
    }
    if compact.starts_with(&marker(mode::CURRENT_DATA)) {
        return ResponseKind::Undecodable;
    }

    ResponseKind::Unrecognized
}

/// Positive response marker for a request mode, as hex text
fn marker(request_mode: u8) -> String {
    format!("{:02X}", mode::response_of(request_mode))
}

/// `BUS INIT: ...ERROR` is only an error when the init actually failed
fn is_adapter_error(upper: &str) -> bool {
    ADAPTER_ERRORS.iter().any(|e| upper.contains(e))
        || (upper.contains("BUS INIT") && upper.contains("ERROR"))
}

/// An echo starts with the request's mode digits and is no longer than the request
fn is_echo(compact: &str, last_request: Option<&str>) -> bool {
    let Some(request) = last_request else {
        return false;
    };
    let request = self::compact(request);
    match request.get(..2) {
        Some(prefix) => compact.starts_with(prefix) && compact.len() <= request.len(),
        None => false,
    }
}

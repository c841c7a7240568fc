//! OBD-II Parameter Catalog
//!
//! Defines the pollable Mode 01 parameters, their request codes and the
//! decoding formulas applied to the data bytes of a `41 <PID> ...` answer.

use crate::hex::HexFrame;
use crate::mode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pollable Mode 01 parameters, in polling order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parameter {
    /// Engine RPM (0x0C)
    Rpm,
    /// Vehicle speed (0x0D)
    Speed,
    /// Engine coolant temperature (0x05)
    CoolantTemp,
    /// Calculated engine load (0x04)
    EngineLoad,
    /// Throttle position (0x11)
    ThrottlePosition,
    /// Fuel tank level input (0x2F)
    FuelLevel,
    /// Intake air temperature (0x0F)
    IntakeAirTemp,
    /// Mass air flow rate (0x10)
    Maf,
    /// Timing advance (0x0E)
    TimingAdvance,
}

impl Parameter {
    /// All parameters in catalog order
    pub const ALL: [Parameter; 9] = [
        Parameter::Rpm,
        Parameter::Speed,
        Parameter::CoolantTemp,
        Parameter::EngineLoad,
        Parameter::ThrottlePosition,
        Parameter::FuelLevel,
        Parameter::IntakeAirTemp,
        Parameter::Maf,
        Parameter::TimingAdvance,
    ];

    /// Get the PID byte
    pub fn pid(&self) -> u8 {
        self.spec().pid
    }

    /// Get the catalog entry for this parameter
    pub fn spec(&self) -> &'static ParameterSpec {
        &CATALOG[*self as usize]
    }

    /// Look up a parameter by its PID byte
    pub fn from_pid(pid: u8) -> Option<Parameter> {
        CATALOG.iter().find(|spec| spec.pid == pid).map(|spec| spec.id)
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.spec().title)
    }
}

/// Scaling rule applied to the data bytes of a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Formula {
    /// ((A*256)+B)/4, integer
    QuarterWord,
    /// A
    Raw,
    /// A-40
    Temperature,
    /// A*100/255, integer
    Percent,
    /// ((A*256)+B)/100, one decimal
    Hundredths,
    /// (A-128)/2, one decimal
    HalfOffset,
}

impl Formula {
    /// Number of data bytes the formula consumes
    pub fn data_len(&self) -> usize {
        match self {
            Formula::QuarterWord | Formula::Hundredths => 2,
            _ => 1,
        }
    }

    /// Apply the formula to the data bytes
    ///
    /// Returns `None` when fewer bytes than [`Formula::data_len`] are present.
    /// Extra trailing bytes are ignored.
    pub fn decode(&self, data: &[u8]) -> Option<Reading> {
        if data.len() < self.data_len() {
            return None;
        }
        let a = i64::from(data[0]);
        let word = || a * 256 + i64::from(data[1]);

        let reading = match self {
            Formula::QuarterWord => Reading::Whole(word() / 4),
            Formula::Raw => Reading::Whole(a),
            Formula::Temperature => Reading::Whole(a - 40),
            Formula::Percent => Reading::Whole(a * 100 / 255),
            Formula::Hundredths => Reading::Tenths(word() as f64 / 100.0),
            Formula::HalfOffset => Reading::Tenths((a - 128) as f64 / 2.0),
        };
        Some(reading)
    }

    /// Produce data bytes that decode back to `value`
    ///
    /// Values outside the representable range are clamped. Used by the demo
    /// source and by tests.
    pub fn encode(&self, value: f64) -> Vec<u8> {
        let byte = |v: f64| v.round().clamp(0.0, 255.0) as u8;
        let word = |v: f64| {
            let w = v.round().clamp(0.0, 65535.0) as u16;
            w.to_be_bytes().to_vec()
        };

        match self {
            Formula::QuarterWord => word(value.trunc() * 4.0),
            Formula::Raw => vec![byte(value)],
            Formula::Temperature => vec![byte(value + 40.0)],
            Formula::Percent => vec![byte((value * 255.0 / 100.0).ceil())],
            Formula::Hundredths => word(value * 100.0),
            Formula::HalfOffset => vec![byte(value * 2.0 + 128.0)],
        }
    }
}

/// A decoded parameter value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reading {
    /// Integer-valued formula result
    Whole(i64),
    /// One-decimal formula result
    Tenths(f64),
}

impl Reading {
    /// Numeric value of the reading
    pub fn as_f64(&self) -> f64 {
        match self {
            Reading::Whole(v) => *v as f64,
            Reading::Tenths(v) => *v,
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reading::Whole(v) => write!(f, "{}", v),
            Reading::Tenths(v) => write!(f, "{:.1}", v),
        }
    }
}

/// Immutable description of one pollable parameter
#[derive(Debug)]
pub struct ParameterSpec {
    /// Symbolic id
    pub id: Parameter,
    /// Mode 01 PID byte
    pub pid: u8,
    /// Human readable title
    pub title: &'static str,
    /// Display unit
    pub unit: &'static str,
    /// Decode rule
    pub formula: Formula,
}

impl ParameterSpec {
    /// Request code sent to the adapter, e.g. `"010C"`
    pub fn request_code(&self) -> String {
        format!("{:02X}{:02X}", mode::CURRENT_DATA, self.pid)
    }

    /// Freeze frame request code, e.g. `"020C"`
    pub fn freeze_frame_code(&self) -> String {
        format!("{:02X}{:02X}", mode::FREEZE_FRAME, self.pid)
    }

    /// Decode a live-data response line addressed to this parameter
    ///
    /// The echoed PID must match; spaced (`41 0C 1A F8`) and contiguous
    /// (`410C1AF8`) forms decode identically.
    pub fn parse_response(&self, line: &str) -> Option<Reading> {
        let frame = HexFrame::parse(line)?;
        self.decode_frame(&frame, mode::response_of(mode::CURRENT_DATA))
    }

    /// Decode a frame whose first byte is `service` and second byte the PID
    pub fn decode_frame(&self, frame: &HexFrame, service: u8) -> Option<Reading> {
        match frame.bytes() {
            [s, pid, data @ ..] if *s == service && *pid == self.pid => self.formula.decode(data),
            _ => None,
        }
    }
}

/// The fixed polling catalog
pub static CATALOG: [ParameterSpec; 9] = [
    ParameterSpec {
        id: Parameter::Rpm,
        pid: 0x0C,
        title: "Engine RPM",
        unit: "rpm",
        formula: Formula::QuarterWord,
    },
    ParameterSpec {
        id: Parameter::Speed,
        pid: 0x0D,
        title: "Speed",
        unit: "km/h",
        formula: Formula::Raw,
    },
    ParameterSpec {
        id: Parameter::CoolantTemp,
        pid: 0x05,
        title: "Coolant Temp",
        unit: "°C",
        formula: Formula::Temperature,
    },
    ParameterSpec {
        id: Parameter::EngineLoad,
        pid: 0x04,
        title: "Engine Load",
        unit: "%",
        formula: Formula::Percent,
    },
    ParameterSpec {
        id: Parameter::ThrottlePosition,
        pid: 0x11,
        title: "Throttle Position",
        unit: "%",
        formula: Formula::Percent,
    },
    ParameterSpec {
        id: Parameter::FuelLevel,
        pid: 0x2F,
        title: "Fuel Level",
        unit: "%",
        formula: Formula::Percent,
    },
    ParameterSpec {
        id: Parameter::IntakeAirTemp,
        pid: 0x0F,
        title: "Intake Air Temp",
        unit: "°C",
        formula: Formula::Temperature,
    },
    ParameterSpec {
        id: Parameter::Maf,
        pid: 0x10,
        title: "Air Flow Rate",
        unit: "g/s",
        formula: Formula::Hundredths,
    },
    ParameterSpec {
        id: Parameter::TimingAdvance,
        pid: 0x0E,
        title: "Timing Advance",
        unit: "°",
        formula: Formula::HalfOffset,
    },
];

/// Try every catalog entry, in order, against a live-data response line
pub fn match_response(line: &str) -> Option<(Parameter, Reading)> {
    let frame = HexFrame::parse(line)?;
    let service = mode::response_of(mode::CURRENT_DATA);
    CATALOG
        .iter()
        .find_map(|spec| spec.decode_frame(&frame, service).map(|r| (spec.id, r)))
}

//! Diagnostic Trouble Code Codec
//!
//! Mode 03 answers carry stored codes packed two bytes per code:
//!
//! ```text
//! byte 0: [cc][d1 d1][d2 d2 d2 d2]    cc = category, d1 = first digit (0-3)
//! byte 1: [d3 d3 d3 d3][d4 d4 d4 d4]
//! ```
//!
//! `01 33` therefore reads as `P0133`.

use crate::error::ObdError;
use crate::hex::{compact, HexFrame};
use crate::mode;
use crate::pid::{Parameter, Reading};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::trace;

/// Trouble code category, selected by the top two bits of the first byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DtcCategory {
    /// Engine, transmission and emissions (`P`)
    Powertrain,
    /// ABS, steering and suspension (`C`)
    Chassis,
    /// Airbags, A/C, lighting (`B`)
    Body,
    /// Bus and module communication (`U`)
    Network,
}

impl DtcCategory {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => DtcCategory::Powertrain,
            1 => DtcCategory::Chassis,
            2 => DtcCategory::Body,
            _ => DtcCategory::Network,
        }
    }

    fn bits(&self) -> u8 {
        match self {
            DtcCategory::Powertrain => 0,
            DtcCategory::Chassis => 1,
            DtcCategory::Body => 2,
            DtcCategory::Network => 3,
        }
    }

    /// Code prefix letter
    pub fn letter(&self) -> char {
        match self {
            DtcCategory::Powertrain => 'P',
            DtcCategory::Chassis => 'C',
            DtcCategory::Body => 'B',
            DtcCategory::Network => 'U',
        }
    }

    /// Category for a prefix letter
    pub fn from_letter(letter: char) -> Option<Self> {
        match letter.to_ascii_uppercase() {
            'P' => Some(DtcCategory::Powertrain),
            'C' => Some(DtcCategory::Chassis),
            'B' => Some(DtcCategory::Body),
            'U' => Some(DtcCategory::Network),
            _ => None,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            DtcCategory::Powertrain => "Powertrain",
            DtcCategory::Chassis => "Chassis",
            DtcCategory::Body => "Body",
            DtcCategory::Network => "Network",
        }
    }
}

/// A single trouble code, e.g. `P0300`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dtc {
    raw: [u8; 2],
}

impl Dtc {
    /// Build a code from its two packed bytes
    pub fn from_bytes(raw: [u8; 2]) -> Self {
        Self { raw }
    }

    /// Packed two-byte representation
    pub fn to_bytes(&self) -> [u8; 2] {
        self.raw
    }

    pub fn category(&self) -> DtcCategory {
        DtcCategory::from_bits(self.raw[0] >> 6)
    }

    /// The four code digits
    fn digits(&self) -> [u8; 4] {
        [
            (self.raw[0] >> 4) & 0x03,
            self.raw[0] & 0x0F,
            self.raw[1] >> 4,
            self.raw[1] & 0x0F,
        ]
    }

    /// SAE-defined (generic) codes have `0` or `2` as first digit
    pub fn is_generic(&self) -> bool {
        matches!(self.digits()[0], 0 | 2)
    }
}

impl fmt::Display for Dtc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [d1, d2, d3, d4] = self.digits();
        write!(
            f,
            "{}{:X}{:X}{:X}{:X}",
            self.category().letter(),
            d1,
            d2,
            d3,
            d4
        )
    }
}

impl FromStr for Dtc {
    type Err = ObdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ObdError::InvalidDtc(s.to_string());
        let mut chars = s.trim().chars();

        let category = chars
            .next()
            .and_then(DtcCategory::from_letter)
            .ok_or_else(invalid)?;
        let digits = chars
            .map(|c| c.to_digit(16).map(|d| d as u8))
            .collect::<Option<Vec<u8>>>()
            .ok_or_else(invalid)?;

        match digits[..] {
            [d1, d2, d3, d4] if d1 <= 3 => Ok(Self::from_bytes([
                (category.bits() << 6) | (d1 << 4) | d2,
                (d3 << 4) | d4,
            ])),
            _ => Err(invalid()),
        }
    }
}

impl Serialize for Dtc {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Dtc {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Decode a Mode 03 (stored codes) response line
///
/// Whitespace and the leading `43` are stripped, then the remainder is read
/// four hex characters at a time. `0000` pairs are padding and skipped;
/// trailing characters that do not form a whole code are ignored.
pub fn decode_stored_codes(line: &str) -> Vec<Dtc> {
    let compact = compact(line);
    let marker = format!("{:02X}", mode::response_of(mode::READ_DTC));
    let Some(payload) = compact.strip_prefix(marker.as_str()) else {
        return Vec::new();
    };

    payload
        .as_bytes()
        .chunks_exact(4)
        .filter_map(|group| {
            let group = std::str::from_utf8(group).ok()?;
            let frame = HexFrame::parse(group)?;
            match frame.bytes() {
                [0, 0] => None,
                [a, b] => Some(Dtc::from_bytes([*a, *b])),
                _ => {
                    trace!("skipping malformed code group {:?}", group);
                    None
                }
            }
        })
        .collect()
}

/// Snapshot of live parameters captured when a fault was recorded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreezeFrame {
    /// Code that owns the snapshot
    pub dtc: Dtc,
    /// When the snapshot was read from the vehicle
    pub captured_at: DateTime<Utc>,
    /// Decoded values, keyed by parameter
    pub values: BTreeMap<Parameter, Reading>,
}

impl FreezeFrame {
    pub fn new(dtc: Dtc) -> Self {
        Self {
            dtc,
            captured_at: Utc::now(),
            values: BTreeMap::new(),
        }
    }

    /// Whether any parameter has been captured
    pub fn has_data(&self) -> bool {
        !self.values.is_empty()
    }

    /// Merge a decoded Mode 02 answer into the snapshot
    pub fn merge(&mut self, parameter: Parameter, reading: Reading) {
        self.values.insert(parameter, reading);
    }
}

/// Decode a Mode 02 answer: `42 <PID> <data>`
///
/// Data is scaled with the live-data formula of the matching catalog entry.
pub fn decode_freeze_frame(line: &str) -> Option<(Parameter, Reading)> {
    let frame = HexFrame::parse(line)?;
    let pid = *frame.bytes().get(1)?;
    let parameter = Parameter::from_pid(pid)?;
    parameter
        .spec()
        .decode_frame(&frame, mode::response_of(mode::FREEZE_FRAME))
        .map(|reading| (parameter, reading))
}

/// A trouble code reported by the latest scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DtcRecord {
    /// Decoded code
    pub code: Dtc,
    /// Packed bytes as read from the vehicle
    pub raw: [u8; 2],
    /// When the scan reported the code
    pub detected_at: DateTime<Utc>,
    /// Snapshot attached by a Mode 02 read
    pub freeze_frame: Option<FreezeFrame>,
}

impl DtcRecord {
    pub fn new(code: Dtc) -> Self {
        Self {
            code,
            raw: code.to_bytes(),
            detected_at: Utc::now(),
            freeze_frame: None,
        }
    }
}

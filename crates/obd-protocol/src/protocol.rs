//! ELM327 Adapter Vocabulary
//!
//! Bus protocol selection and the `AT` commands sent while bringing an
//! adapter up.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported OBD-II protocols
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObdProtocol {
    /// Automatic protocol detection
    #[default]
    Auto,
    /// SAE J1850 PWM (41.6 kbaud)
    J1850Pwm,
    /// SAE J1850 VPW (10.4 kbaud)
    J1850Vpw,
    /// ISO 9141-2 (10.4 kbaud, 5 baud init)
    Iso9141_2,
    /// ISO 14230-4 KWP (slow init, 10.4 kbaud)
    Iso14230_4Kwp,
    /// ISO 14230-4 KWP (fast init, 10.4 kbaud)
    Iso14230_4KwpFast,
    /// ISO 15765-4 CAN (11 bit ID, 500 kbaud)
    Iso15765_4Can11bit500,
    /// ISO 15765-4 CAN (29 bit ID, 500 kbaud)
    Iso15765_4Can29bit500,
    /// ISO 15765-4 CAN (11 bit ID, 250 kbaud)
    Iso15765_4Can11bit250,
    /// ISO 15765-4 CAN (29 bit ID, 250 kbaud)
    Iso15765_4Can29bit250,
}

impl ObdProtocol {
    /// Protocol number used by `ATSP`
    fn number(&self) -> u8 {
        match self {
            ObdProtocol::Auto => 0,
            ObdProtocol::J1850Pwm => 1,
            ObdProtocol::J1850Vpw => 2,
            ObdProtocol::Iso9141_2 => 3,
            ObdProtocol::Iso14230_4Kwp => 4,
            ObdProtocol::Iso14230_4KwpFast => 5,
            ObdProtocol::Iso15765_4Can11bit500 => 6,
            ObdProtocol::Iso15765_4Can29bit500 => 7,
            ObdProtocol::Iso15765_4Can11bit250 => 8,
            ObdProtocol::Iso15765_4Can29bit250 => 9,
        }
    }
}

/// Adapter setup commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtCommand {
    /// `ATZ`: full reset, answers with the banner
    Reset,
    /// `ATE0`
    EchoOff,
    /// `ATL0`
    LinefeedsOff,
    /// `ATS0`
    SpacesOff,
    /// `ATH0`
    HeadersOff,
    /// `ATSPn`
    SelectProtocol(ObdProtocol),
}

impl fmt::Display for AtCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AtCommand::Reset => f.write_str("ATZ"),
            AtCommand::EchoOff => f.write_str("ATE0"),
            AtCommand::LinefeedsOff => f.write_str("ATL0"),
            AtCommand::SpacesOff => f.write_str("ATS0"),
            AtCommand::HeadersOff => f.write_str("ATH0"),
            AtCommand::SelectProtocol(p) => write!(f, "ATSP{}", p.number()),
        }
    }
}

/// Ordered setup sequence sent after the transport connects
pub fn init_sequence(protocol: ObdProtocol) -> [AtCommand; 6] {
    [
        AtCommand::Reset,
        AtCommand::EchoOff,
        AtCommand::LinefeedsOff,
        AtCommand::SpacesOff,
        AtCommand::HeadersOff,
        AtCommand::SelectProtocol(protocol),
    ]
}

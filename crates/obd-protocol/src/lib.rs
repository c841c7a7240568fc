//! OBD-II Protocol Implementation
//!
//! Transport-independent pieces of the ELM327 client: the adapter command
//! vocabulary, the pollable parameter catalog, response classification and
//! the trouble-code codec.

mod dtc;
mod error;
mod hex;
mod pid;
mod protocol;
mod response;

pub use dtc::{
    decode_freeze_frame, decode_stored_codes, Dtc, DtcCategory, DtcRecord, FreezeFrame,
};
pub use error::ObdError;
pub use hex::{compact, HexFrame};
pub use pid::{match_response, Formula, Parameter, ParameterSpec, Reading, CATALOG};
pub use protocol::{init_sequence, AtCommand, ObdProtocol};
pub use response::{classify, ResponseKind};

/// OBD-II mode constants
pub mod mode {
    /// Current data
    pub const CURRENT_DATA: u8 = 0x01;
    /// Freeze frame data
    pub const FREEZE_FRAME: u8 = 0x02;
    /// Diagnostic trouble codes
    pub const READ_DTC: u8 = 0x03;
    /// Clear trouble codes
    pub const CLEAR_DTC: u8 = 0x04;
    /// Negative response marker
    pub const NEGATIVE_RESPONSE: u8 = 0x7F;

    /// Positive response marker for a request mode (`01` -> `41`)
    pub const fn response_of(mode: u8) -> u8 {
        mode | 0x40
    }
}

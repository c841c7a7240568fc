//! OBD-II Error Types

use thiserror::Error;

/// Errors that can occur while talking to an OBD-II adapter
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ObdError {
    /// Response could not be interpreted
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Positive response whose payload no decoder recognised
    #[error("Unable to decode response: {0}")]
    Undecodable(String),

    /// No answer within the response budget
    #[error("Timeout waiting for response to {command} after {after_ms}ms")]
    Timeout { command: String, after_ms: u64 },

    /// Vehicle answered with a negative response (`7F`)
    #[error("Vehicle rejected request for service {service:02X}")]
    Rejected { service: u8 },

    /// Adapter reported a bus or command error
    #[error("Adapter error: {0}")]
    Adapter(String),

    /// Malformed trouble code string
    #[error("Invalid trouble code: {0}")]
    InvalidDtc(String),
}

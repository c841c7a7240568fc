//! Transport Error Types

use thiserror::Error;

/// Errors raised while opening or using an adapter link
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection attempt exceeded its budget
    #[error("Connection to {0} timed out")]
    ConnectTimeout(String),

    /// Bluetooth radio is off or unavailable
    #[error("Bluetooth not available")]
    BluetoothUnavailable,

    /// No peripheral has been selected for the BLE link
    #[error("No BLE device selected")]
    NoDevice,

    /// The peripheral does not expose the adapter service
    #[error("OBD service {0} not found")]
    ServiceNotFound(String),

    /// A required characteristic is missing from the service
    #[error("Characteristic {0} not found")]
    CharacteristicNotFound(String),

    /// Any other GATT failure reported by the platform binding
    #[error("GATT error: {0}")]
    Gatt(String),
}

//! Error types for Aspeed JTAG operations

use thiserror::Error;

/// Aspeed JTAG specific errors
#[derive(Debug, Error)]
pub enum LinuxJtagError {
    /// Failed to open device
    #[error("Failed to open {path}: {source}")]
    OpenFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to set TCK frequency
    #[error("Failed to set JTAG frequency to {hz} Hz: {source}")]
    SetFrequencyFailed {
        hz: u32,
        #[source]
        source: std::io::Error,
    },

    /// Failed to read TCK frequency
    #[error("Failed to read JTAG frequency: {0}")]
    GetFrequencyFailed(#[source] std::io::Error),

    /// A JTAG ioctl failed
    #[error("JTAG {op} failed: {source}")]
    TransferFailed {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Shift longer than the driver's 16-bit length field
    #[error("{bits} bit shift exceeds the driver limit of {max} bits")]
    ShiftTooLong { bits: u32, max: u32 },

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Device not specified
    #[error("No device specified. Use dev=/dev/1e6e4000.jtag")]
    NoDevice,
}

impl From<LinuxJtagError> for rcpld_core::Error {
    fn from(e: LinuxJtagError) -> Self {
        rcpld_core::Error::Transport(e.to_string())
    }
}

/// Result type for Aspeed JTAG operations
pub type Result<T> = std::result::Result<T, LinuxJtagError>;

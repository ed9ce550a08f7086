//! Error types for rcpld-core
//!
//! Compare mismatches found during verification are not errors; they are
//! reported as [`crate::isp::RowMismatch`] data in a verify report.

use std::io;

use thiserror::Error;

use crate::poll::BusyTimeout;

/// Errors produced while decoding a JED fuse map
#[derive(Debug, Error)]
pub enum JedError {
    /// A byte other than `0`, `1`, CR, LF or `*` appeared inside the fuse data
    #[error("unexpected byte 0x{byte:02X} in JED row {row} at bit {bit}")]
    UnexpectedByte {
        /// The offending byte
        byte: u8,
        /// Zero-based row being decoded
        row: u32,
        /// Number of bits already collected for the row
        bit: u32,
    },
    /// The file ended before the row was complete
    #[error("JED file ended in row {row} after {bit} of {expected} bits")]
    UnexpectedEof {
        /// Zero-based row being decoded
        row: u32,
        /// Number of bits already collected for the row
        bit: u32,
        /// Bits the row should hold
        expected: u32,
    },
    /// A fuse field terminator (`*`) cut a row short
    #[error("JED row {row} has {found} bits, expected {expected}")]
    ShortRow {
        /// Zero-based row being decoded
        row: u32,
        /// Bits found before the terminator
        found: u32,
        /// Bits the row should hold
        expected: u32,
    },
    /// Reading the underlying file failed
    #[error("I/O error reading JED file: {0}")]
    Io(#[from] io::Error),
}

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// The probed IDCODE is not in the device catalog
    #[error("unknown device (IDCODE 0x{idcode:08X})")]
    UnknownDevice {
        /// IDCODE read from the scan chain
        idcode: u32,
    },
    /// A family flow read an IDCODE other than the one it drives
    #[error("IDCODE mismatch: expected 0x{expected:08X}, found 0x{found:08X}")]
    IdMismatch {
        /// IDCODE of the selected device
        expected: u32,
        /// IDCODE read from the scan chain
        found: u32,
    },
    /// The fuse map could not be decoded
    #[error(transparent)]
    Jed(#[from] JedError),
    /// A busy poll ran out of attempts
    #[error(transparent)]
    BusyTimeout(#[from] BusyTimeout),
    /// A status register read did not hold the value the flow requires
    #[error("{step}: status 0x{value:X}, expected 0x{expected:X}")]
    StatusCheck {
        /// Flow step that read the status
        step: &'static str,
        /// Value read (after masking)
        value: u32,
        /// Value the step requires
        expected: u32,
    },
    /// The JTAG transport failed
    #[error("JTAG transport error: {0}")]
    Transport(String),
    /// File I/O outside JED decoding failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Whether this error comes from identifying the device
    ///
    /// Identification errors are raised before the device enters
    /// programming mode, so no device state has been touched.
    pub fn is_identification(&self) -> bool {
        matches!(self, Error::UnknownDevice { .. } | Error::IdMismatch { .. })
    }
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Signed status of an operation outcome: `0` on success, `-1` on failure
pub fn status_code<T>(result: &Result<T>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(_) => -1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code() {
        assert_eq!(status_code(&Ok::<(), Error>(())), 0);
        assert_eq!(
            status_code::<()>(&Err(Error::Transport("gone".into()))),
            -1
        );
    }

    #[test]
    fn test_identification_errors() {
        assert!(Error::UnknownDevice { idcode: 0xDEAD_BEEF }.is_identification());
        assert!(Error::IdMismatch {
            expected: 1,
            found: 2
        }
        .is_identification());
        assert!(!Error::Transport("x".into()).is_identification());
    }

    #[test]
    fn test_display() {
        let e = Error::UnknownDevice { idcode: 0xDEAD_BEEF };
        assert_eq!(e.to_string(), "unknown device (IDCODE 0xDEADBEEF)");

        let e = Error::from(JedError::UnexpectedByte {
            byte: b'x',
            row: 3,
            bit: 7,
        });
        assert_eq!(e.to_string(), "unexpected byte 0x78 in JED row 3 at bit 7");
    }
}

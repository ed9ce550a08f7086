//! rcpld-linux-jtag - Aspeed BMC JTAG controller support
//!
//! This crate drives the JTAG master of Aspeed AST2400/AST2500/AST2600
//! BMCs through the SDK JTAG driver's character device, by default
//! `/dev/1e6e4000.jtag`.
//!
//! # Overview
//!
//! The driver exposes Run-Test/Idle, IR shift and DR shift requests as
//! ioctls. Shifts can run in the controller's hardware engine or be
//! bit-banged by the driver; hardware mode is the default.
//!
//! # Example
//!
//! ```no_run
//! use rcpld_linux_jtag::{AspeedJtag, AspeedJtagConfig, XferMode};
//! use rcpld_core::bits::BitBuffer;
//! use rcpld_core::jtag::{EndState, JtagMaster, TapState};
//!
//! let config = AspeedJtagConfig::new("/dev/1e6e4000.jtag")
//!     .with_mode(XferMode::Hardware)
//!     .with_frequency(1_000_000);
//! let mut jtag = AspeedJtag::open(&config)?;
//!
//! // Read the IDCODE with IDCODE_PUB
//! jtag.run_test_idle(true, TapState::Idle, 0)?;
//! jtag.shift_ir(EndState::Idle, 8, &BitBuffer::from_u32(0xE0, 8))?;
//! let id = jtag.shift_dr_out(EndState::Idle, 32)?.to_u32();
//! println!("IDCODE: {:08X}", id);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Usage with rcpld CLI
//!
//! ```bash
//! # Probe using the default device
//! rcpld probe -p aspeed
//!
//! # Specify device, software mode and TCK frequency
//! rcpld program -p aspeed:dev=/dev/1e6e4000.jtag,mode=sw,freq=1000000 -i cpld.jed
//! ```
//!
//! # System Requirements
//!
//! - Aspeed SDK kernel with the `ast-jtag` driver
//! - Read/write access to the JTAG device node

pub mod device;
pub mod error;

// Re-exports
pub use device::{parse_options, AspeedJtag, AspeedJtagConfig, XferMode, DEFAULT_DEVICE};
pub use error::{LinuxJtagError, Result};

/// Open an Aspeed JTAG controller and return a boxed JtagMaster
///
/// This is a convenience function for use in the CLI programmer dispatch.
///
/// # Arguments
///
/// * `options` - Slice of (key, value) pairs from programmer string parsing
///
/// # Example Options
///
/// - `dev=/dev/1e6e4000.jtag` - Optional: device path (this is the default)
/// - `mode=sw` - Optional: `hw` or `sw` transfers (default: hw)
/// - `freq=1000000` - Optional: TCK frequency in Hz
pub fn open_aspeed_jtag(
    options: &[(&str, &str)],
) -> std::result::Result<Box<dyn rcpld_core::jtag::JtagMaster>, Box<dyn std::error::Error>> {
    let config = parse_options(options)?;
    let jtag = AspeedJtag::open(&config)?;
    Ok(Box::new(jtag))
}

//! rcpld-core - Core library for Lattice CPLD/FPGA in-system programming
//!
//! This crate provides the pieces needed to erase, program and verify
//! Lattice LC4064V, LCMXO2280C and LCMXO2-7000HE devices over a JTAG bus
//! from a JEDEC `.jed` fuse map:
//!
//! - [`bits::BitBuffer`] - owned bit strings used as IR/DR shift payloads
//! - [`jed::JedReader`] - row-by-row fuse map reader
//! - [`device::DeviceCatalog`] - IDCODE to device descriptor lookup
//! - [`jtag::JtagMaster`] - the transport trait implemented by backends
//! - [`isp`] - per-family erase/program/verify state machines
//! - [`session::ProgramSession`] - probe, select and drive a device
//!
//! # Example
//!
//! ```ignore
//! use rcpld_core::device::DeviceCatalog;
//! use rcpld_core::jed::JedReader;
//! use rcpld_core::session::{ProgramSession, SessionOptions};
//!
//! fn flash<J: rcpld_core::jtag::JtagMaster>(jtag: J) -> rcpld_core::Result<()> {
//!     let catalog = DeviceCatalog::builtin();
//!     let mut session = ProgramSession::open(jtag, &catalog, SessionOptions::default())?;
//!     println!("Found: {}", session.device().name);
//!
//!     let mut jed = JedReader::open("image.jed")?;
//!     let report = session.flash(&mut jed)?;
//!     println!("Verify passed: {}", report.verify.passed());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod bits;
pub mod device;
pub mod error;
pub mod isp;
pub mod jed;
pub mod jtag;
pub mod manifest;
pub mod poll;
pub mod session;

pub use error::{Error, Result};

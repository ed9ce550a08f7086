//! JTAG transport abstraction
//!
//! Programming flows talk to the scan chain through [`JtagMaster`]. A
//! transport only has to move bits and park the TAP in the requested state;
//! sequencing IR and DR shifts into an erase or program algorithm is the
//! job of [`crate::isp`].
//!
//! Shift payloads are [`BitBuffer`]s, packed LSB first: bit 0 is the first
//! bit clocked out of TDI and bit 0 of a returned buffer is the first bit
//! sampled on TDO.

use crate::bits::BitBuffer;
use crate::error::Result;

/// TAP state a run-test-idle request ends in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapState {
    /// Run-Test/Idle
    Idle,
    /// Pause-IR
    IrPause,
    /// Pause-DR
    DrPause,
}

/// Where the TAP parks after an IR or DR shift
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndState {
    /// Return to Run-Test/Idle
    Idle,
    /// Stay in Pause-IR / Pause-DR
    Pause,
}

/// A JTAG controller able to drive one scan chain
///
/// All methods are blocking. Implementations report failures as
/// [`crate::Error::Transport`].
///
/// # Example
///
/// ```ignore
/// use rcpld_core::bits::BitBuffer;
/// use rcpld_core::jtag::{EndState, JtagMaster, TapState};
///
/// fn read_idcode<J: JtagMaster>(jtag: &mut J) -> rcpld_core::Result<u32> {
///     jtag.run_test_idle(true, TapState::Idle, 0)?;
///     jtag.shift_ir(EndState::Idle, 8, &BitBuffer::from_u32(0xE0, 8))?;
///     Ok(jtag.shift_dr_out(EndState::Idle, 32)?.to_u32())
/// }
/// ```
pub trait JtagMaster {
    /// Move to Run-Test/Idle (through Test-Logic-Reset if `reset`), clock
    /// `tcks` cycles there, then go to `end`
    fn run_test_idle(&mut self, reset: bool, end: TapState, tcks: u32) -> Result<()>;

    /// Shift `bits` bits of `tdi` into the instruction register
    ///
    /// Returns the bits captured on TDO.
    fn shift_ir(&mut self, end: EndState, bits: u32, tdi: &BitBuffer) -> Result<BitBuffer>;

    /// Shift `bits` bits of `tdi` into the data register, discarding TDO
    fn shift_dr_in(&mut self, end: EndState, bits: u32, tdi: &BitBuffer) -> Result<()>;

    /// Shift `bits` bits out of the data register (TDI held low)
    fn shift_dr_out(&mut self, end: EndState, bits: u32) -> Result<BitBuffer>;

    /// Current TCK frequency in Hz
    fn frequency(&mut self) -> Result<u32>;

    /// Set the TCK frequency in Hz
    fn set_frequency(&mut self, hz: u32) -> Result<()>;

    /// Wait for the given number of microseconds
    ///
    /// Flows wait through the transport so that emulated transports can
    /// skip the delay.
    fn delay_us(&mut self, us: u32) {
        std::thread::sleep(std::time::Duration::from_micros(u64::from(us)));
    }
}

impl<T: JtagMaster + ?Sized> JtagMaster for &mut T {
    fn run_test_idle(&mut self, reset: bool, end: TapState, tcks: u32) -> Result<()> {
        (**self).run_test_idle(reset, end, tcks)
    }

    fn shift_ir(&mut self, end: EndState, bits: u32, tdi: &BitBuffer) -> Result<BitBuffer> {
        (**self).shift_ir(end, bits, tdi)
    }

    fn shift_dr_in(&mut self, end: EndState, bits: u32, tdi: &BitBuffer) -> Result<()> {
        (**self).shift_dr_in(end, bits, tdi)
    }

    fn shift_dr_out(&mut self, end: EndState, bits: u32) -> Result<BitBuffer> {
        (**self).shift_dr_out(end, bits)
    }

    fn frequency(&mut self) -> Result<u32> {
        (**self).frequency()
    }

    fn set_frequency(&mut self, hz: u32) -> Result<()> {
        (**self).set_frequency(hz)
    }

    fn delay_us(&mut self, us: u32) {
        (**self).delay_us(us)
    }
}

impl<T: JtagMaster + ?Sized> JtagMaster for Box<T> {
    fn run_test_idle(&mut self, reset: bool, end: TapState, tcks: u32) -> Result<()> {
        (**self).run_test_idle(reset, end, tcks)
    }

    fn shift_ir(&mut self, end: EndState, bits: u32, tdi: &BitBuffer) -> Result<BitBuffer> {
        (**self).shift_ir(end, bits, tdi)
    }

    fn shift_dr_in(&mut self, end: EndState, bits: u32, tdi: &BitBuffer) -> Result<()> {
        (**self).shift_dr_in(end, bits, tdi)
    }

    fn shift_dr_out(&mut self, end: EndState, bits: u32) -> Result<BitBuffer> {
        (**self).shift_dr_out(end, bits)
    }

    fn frequency(&mut self) -> Result<u32> {
        (**self).frequency()
    }

    fn set_frequency(&mut self, hz: u32) -> Result<()> {
        (**self).set_frequency(hz)
    }

    fn delay_us(&mut self, us: u32) {
        (**self).delay_us(us)
    }
}

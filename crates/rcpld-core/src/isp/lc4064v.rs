//! ispMACH 4000V (LC4064V) programming
//!
//! The ispMACH 4000 fuse array is programmed with auto-incrementing row
//! writes after a bulk erase. There is no busy flag; each row write is
//! followed by a fixed 5 ms wait. Verification shifts a one-hot address
//! into the address register and reads the array back with auto-increment.

use crate::bits::BitBuffer;
use crate::device::Family;
use crate::error::Result;
use crate::jed::JedReader;
use crate::jtag::EndState;

use super::{
    program_rows, verify_rows, with_exit, EraseReport, IspContext, IspController, ProgramReport,
    RowSpan, VerifyExit, VerifyReport, BYPASS,
};

mod op {
    pub const ISC_ADDRESS_SHIFT: u8 = 0x01;
    pub const ISC_ERASE: u8 = 0x03;
    pub const DISCHARGE: u8 = 0x14;
    pub const ISC_ENABLE: u8 = 0x15;
    pub const IDCODE: u8 = 0x16;
    pub const PROGRAM_DISABLE: u8 = 0x1E;
    pub const ISC_ADDRESS_INIT: u8 = 0x21;
    pub const ISC_PROG_INCR: u8 = 0x27;
    pub const ISC_READ_INCR: u8 = 0x2A;
    pub const PROGRAM_DONE: u8 = 0x2F;
}

/// Wait after ISC_ERASE in the stand-alone erase
const ERASE_WAIT_US: u32 = 1_000_000;
/// Wait after each row write
const ROW_PROGRAM_US: u32 = 5_000;

/// Controller for the LC4064V family
#[derive(Debug, Clone, Copy, Default)]
pub struct Lc4064vController;

impl Lc4064vController {
    fn exit(cx: &mut IspContext<'_>) -> Result<()> {
        cx.ir(op::PROGRAM_DISABLE, EndState::Idle)?;
        cx.ir(BYPASS, EndState::Idle)
    }

    /// Point the address register at the first row
    ///
    /// The address register is `row_num` bits wide and one-hot; the first
    /// row is the most significant bit.
    fn address_first_row(cx: &mut IspContext<'_>) -> Result<()> {
        let rows = cx.device.row_num as usize;
        let mut address = BitBuffer::zeroed(rows);
        address.set(rows - 1, true);

        cx.ir(op::ISC_ADDRESS_SHIFT, EndState::Idle)?;
        cx.dr_write(EndState::Idle, &address)
    }

    fn read_back(
        &self,
        cx: &mut IspContext<'_>,
        jed: &mut JedReader,
        report: &mut VerifyReport,
    ) -> Result<()> {
        Self::address_first_row(cx)?;
        cx.ir(op::ISC_READ_INCR, EndState::Idle)?;
        jed.rewind()?;

        let span = RowSpan::config(cx.device.row_num);
        verify_rows(cx, jed, span, self.verify_exit(), report, |cx| {
            let bits = cx.device.dr_bits;
            cx.dr_read(EndState::Idle, bits)
        })?;
        Ok(())
    }
}

impl IspController for Lc4064vController {
    fn family(&self) -> Family {
        Family::Lc4064v
    }

    fn verify_exit(&self) -> VerifyExit {
        VerifyExit::Continue
    }

    fn identify(&self, cx: &mut IspContext<'_>) -> Result<u32> {
        cx.check_idcode(op::IDCODE, EndState::Idle)
    }

    fn erase(&self, cx: &mut IspContext<'_>) -> Result<EraseReport> {
        log::info!("Starting to erase {}", cx.device.name);
        with_exit(
            cx,
            |cx| {
                cx.progress.stage(super::Stage::Erase, 0);
                cx.ir(op::ISC_ENABLE, EndState::Idle)?;
                cx.ir(op::ISC_ERASE, EndState::Idle)?;
                cx.wait(ERASE_WAIT_US);
                cx.ir(op::DISCHARGE, EndState::Idle)?;
                cx.progress.finish();
                Ok(EraseReport::default())
            },
            Self::exit,
        )
    }

    fn program(&self, cx: &mut IspContext<'_>, jed: &mut JedReader) -> Result<ProgramReport> {
        with_exit(
            cx,
            |cx| {
                let mut report = ProgramReport::default();

                cx.ir(op::ISC_ENABLE, EndState::Idle)?;
                cx.ir(op::ISC_ERASE, EndState::Idle)?;
                cx.ir(op::DISCHARGE, EndState::Idle)?;
                cx.ir(op::ISC_ADDRESS_INIT, EndState::Idle)?;
                cx.ir(op::ISC_PROG_INCR, EndState::Idle)?;

                jed.rewind()?;
                let span = RowSpan::config(cx.device.row_num);
                program_rows(cx, jed, span, &mut report, |cx, _row, data| {
                    cx.dr_write(EndState::Idle, data)?;
                    cx.wait(ROW_PROGRAM_US);
                    Ok(None)
                })?;

                let mut verify = VerifyReport::default();
                self.read_back(cx, jed, &mut verify)?;
                report.verify = Some(verify);

                cx.ir(op::PROGRAM_DONE, EndState::Idle)?;
                Ok(report)
            },
            Self::exit,
        )
    }

    fn verify(&self, cx: &mut IspContext<'_>, jed: &mut JedReader) -> Result<VerifyReport> {
        log::info!("Starting to verify {}", cx.device.name);
        with_exit(
            cx,
            |cx| {
                let mut report = VerifyReport::default();
                cx.ir(op::ISC_ENABLE, EndState::Idle)?;
                self.read_back(cx, jed, &mut report)?;
                Ok(report)
            },
            Self::exit,
        )
    }
}

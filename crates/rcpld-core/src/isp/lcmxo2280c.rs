//! MachXO (LCMXO2280C) programming
//!
//! Every instruction is followed by a short Run-Test/Idle burst and a 3 ms
//! settle. Rows are loaded with DATA_SHIFT and committed with an
//! auto-incrementing program instruction whose completion is polled
//! through a one-bit flag (1 = done). The programming flow reads the array
//! back before it sets the DONE bit, so a bad image never becomes active.

use crate::bits::BitBuffer;
use crate::device::Family;
use crate::error::{Error, Result};
use crate::jed::JedReader;
use crate::jtag::{EndState, TapState};
use crate::poll::{BusyPoll, RetryPolicy, Settle};

use super::{
    check_logged, program_rows, verify_rows, with_exit, EraseReport, IspContext, IspController,
    ProgramReport, RowSpan, Stage, VerifyExit, VerifyReport, BYPASS,
};

mod op {
    pub const DATA_SHIFT: u8 = 0x02;
    pub const ISC_ERASE: u8 = 0x03;
    pub const ISC_ENABLE: u8 = 0x15;
    pub const IDCODE: u8 = 0x16;
    pub const UES_READ: u8 = 0x17;
    pub const UES_PROGRAM: u8 = 0x1A;
    pub const PRELOAD: u8 = 0x1C;
    pub const PROGRAM_DISABLE: u8 = 0x1E;
    pub const ISC_ADDRESS_INIT: u8 = 0x21;
    pub const PROGRAM_DONE: u8 = 0x2F;
    pub const SRAM_ENABLE: u8 = 0x55;
    pub const LSCC_PROGRAM_INCR_RTI: u8 = 0x67;
    pub const LSCC_READ_INCR_RTI: u8 = 0x6A;
    pub const READ_STATUS: u8 = 0xB2;
}

/// Boundary scan register length
const PRELOAD_BITS: usize = 544;
/// Run-Test/Idle clocks after each instruction
const IDLE_TCKS: u32 = 5;
/// Settle time after each instruction
const SETTLE_US: u32 = 3_000;
/// Clocks spent in Test-Logic-Reset before identification
const RESET_TCKS: u32 = 15;
/// Wait after UES_PROGRAM
const UES_PROGRAM_US: u32 = 2_000;

/// Erase completion in the stand-alone erase: 100 polls, all of them run
const ERASE_POLL: BusyPoll = BusyPoll {
    retry: RetryPolicy::fixed(100, 1_000),
    settle: Settle::Idle { tcks: IDLE_TCKS },
    read_end: EndState::Pause,
    ready: true,
};

/// Erase completion ahead of programming
const PROGRAM_ERASE_POLL: BusyPoll = BusyPoll {
    retry: RetryPolicy::until_ready(100, 300_000),
    settle: Settle::Idle { tcks: IDLE_TCKS },
    read_end: EndState::Pause,
    ready: true,
};

/// Row program completion
const ROW_POLL: BusyPoll = BusyPoll {
    retry: RetryPolicy::until_ready(10, 3_000),
    settle: Settle::DrPause,
    read_end: EndState::Pause,
    ready: true,
};

/// Controller for the LCMXO2280C family
#[derive(Debug, Clone, Copy, Default)]
pub struct Lcmxo2280cController;

impl Lcmxo2280cController {
    /// Instruction followed by the Run-Test/Idle settle
    fn command(cx: &mut IspContext<'_>, opcode: u8, end: EndState) -> Result<()> {
        cx.ir(opcode, end)?;
        cx.idle(IDLE_TCKS, SETTLE_US)
    }

    fn read_flag(cx: &mut IspContext<'_>) -> Result<bool> {
        Ok(cx.dr_read(EndState::Pause, 1)?.get(0) == Some(true))
    }

    /// Load the boundary scan register and enable ISC
    fn enter(cx: &mut IspContext<'_>, ir_end: EndState) -> Result<()> {
        cx.ir(op::PRELOAD, EndState::Pause)?;
        cx.dr_write(EndState::Pause, &BitBuffer::ones(PRELOAD_BITS))?;
        Self::command(cx, op::ISC_ENABLE, ir_end)
    }

    fn exit(cx: &mut IspContext<'_>, ir_end: EndState) -> Result<()> {
        Self::command(cx, op::PROGRAM_DISABLE, ir_end)?;
        Self::command(cx, BYPASS, ir_end)?;
        cx.ir(BYPASS, ir_end)
    }

    /// Status flag must read 0 after an erase or UES program
    fn check_status(cx: &mut IspContext<'_>, step: &'static str, ir_end: EndState) -> Result<()> {
        Self::command(cx, op::READ_STATUS, ir_end)?;
        if Self::read_flag(cx)? {
            return Err(Error::StatusCheck {
                step,
                value: 1,
                expected: 0,
            });
        }
        Ok(())
    }

    fn erase_body(cx: &mut IspContext<'_>, poll: &BusyPoll, ir_end: EndState) -> Result<EraseReport> {
        let mut report = EraseReport::default();
        cx.progress.stage(Stage::Erase, 0);

        Self::command(cx, op::SRAM_ENABLE, ir_end)?;
        Self::command(cx, op::ISC_ERASE, ir_end)?;
        Self::command(cx, op::ISC_ENABLE, ir_end)?;
        Self::command(cx, op::ISC_ERASE, ir_end)?;
        if let Some(timeout) = cx.poll(poll, "erase", None)? {
            report.busy_timeouts.push(timeout);
        }
        Self::check_status(cx, "erase status", ir_end)?;

        cx.progress.finish();
        log::info!("Erase done");
        Ok(report)
    }

    fn read_back(
        &self,
        cx: &mut IspContext<'_>,
        jed: &mut JedReader,
        ir_end: EndState,
        report: &mut VerifyReport,
    ) -> Result<bool> {
        Self::command(cx, op::ISC_ADDRESS_INIT, ir_end)?;
        Self::command(cx, BYPASS, ir_end)?;
        Self::command(cx, op::LSCC_READ_INCR_RTI, ir_end)?;
        jed.rewind()?;

        let span = RowSpan::config(cx.device.row_num);
        verify_rows(cx, jed, span, self.verify_exit(), report, |cx| {
            let bits = cx.device.dr_bits;
            let row = cx.dr_read(EndState::Pause, bits)?;
            cx.idle(IDLE_TCKS, SETTLE_US)?;
            Ok(row)
        })
    }
}

impl IspController for Lcmxo2280cController {
    fn family(&self) -> Family {
        Family::Lcmxo2280c
    }

    fn verify_exit(&self) -> VerifyExit {
        VerifyExit::StopOnFirstMismatch
    }

    fn identify(&self, cx: &mut IspContext<'_>) -> Result<u32> {
        cx.jtag.run_test_idle(true, TapState::Idle, RESET_TCKS)?;
        cx.wait(SETTLE_US);
        cx.check_idcode(op::IDCODE, EndState::Pause)
    }

    fn erase(&self, cx: &mut IspContext<'_>) -> Result<EraseReport> {
        self.identify(cx)?;
        log::info!("Starting to erase {}", cx.device.name);
        with_exit(
            cx,
            |cx| {
                Self::enter(cx, EndState::Idle)?;
                Self::erase_body(cx, &ERASE_POLL, EndState::Idle)
            },
            |cx| Self::exit(cx, EndState::Idle),
        )
    }

    fn program(&self, cx: &mut IspContext<'_>, jed: &mut JedReader) -> Result<ProgramReport> {
        self.identify(cx)?;
        let end = EndState::Pause;
        with_exit(
            cx,
            |cx| {
                Self::enter(cx, end)?;
                let erase = Self::erase_body(cx, &PROGRAM_ERASE_POLL, end)?;
                let mut report = ProgramReport {
                    busy_timeouts: erase.busy_timeouts,
                    ..Default::default()
                };

                Self::command(cx, op::ISC_ADDRESS_INIT, end)?;
                Self::command(cx, BYPASS, end)?;

                jed.rewind()?;
                let span = RowSpan::config(cx.device.row_num);
                program_rows(cx, jed, span, &mut report, |cx, row, data| {
                    cx.ir(op::DATA_SHIFT, end)?;
                    cx.wait(SETTLE_US);
                    cx.dr_write(end, data)?;
                    cx.wait(SETTLE_US);
                    Self::command(cx, op::LSCC_PROGRAM_INCR_RTI, end)?;
                    cx.poll(&ROW_POLL, "row program", Some(row))
                })?;

                Self::command(cx, op::ISC_ADDRESS_INIT, end)?;
                Self::command(cx, BYPASS, end)?;
                cx.ir(op::UES_READ, end)?;
                cx.dr_write_value(end, 32, 0)?;
                cx.ir(op::UES_PROGRAM, end)?;
                cx.idle(IDLE_TCKS, UES_PROGRAM_US)?;
                Self::check_status(cx, "UES program status", end)?;

                let mut verify = VerifyReport::default();
                let clean = self.read_back(cx, jed, end, &mut verify)?;
                report.verify = Some(verify);
                if !clean {
                    log::warn!("Read-back failed, DONE bit left unprogrammed");
                    return Ok(report);
                }

                Self::command(cx, op::UES_READ, end)?;
                let ues = cx.dr_read_value(end, 32)?;
                log::debug!("UES 0x{:08X}", ues);

                Self::command(cx, op::PROGRAM_DONE, end)?;
                let done = cx.dr_read_value(end, 1)?;
                check_logged("program done", done, 1, 1);
                cx.ir(BYPASS, end)?;
                Self::command(cx, op::READ_STATUS, end)?;
                let status = cx.dr_read_value(end, 1)?;
                check_logged("read status", status, 1, 0);

                Ok(report)
            },
            |cx| Self::exit(cx, end),
        )
    }

    fn verify(&self, cx: &mut IspContext<'_>, jed: &mut JedReader) -> Result<VerifyReport> {
        self.identify(cx)?;
        log::info!("Starting to verify {}", cx.device.name);
        with_exit(
            cx,
            |cx| {
                let mut report = VerifyReport::default();
                Self::enter(cx, EndState::Idle)?;
                self.read_back(cx, jed, EndState::Idle, &mut report)?;

                Self::command(cx, op::UES_READ, EndState::Idle)?;
                let ues = cx.dr_read_value(EndState::Pause, 32)?;
                log::debug!("UES 0x{:08X}", ues);
                Self::command(cx, op::READ_STATUS, EndState::Pause)?;
                let status = cx.dr_read_value(EndState::Pause, 1)?;
                check_logged("read status", status, 1, 0);

                Ok(report)
            },
            |cx| Self::exit(cx, EndState::Pause),
        )
    }
}

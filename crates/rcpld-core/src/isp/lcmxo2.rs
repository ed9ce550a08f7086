//! MachXO2 (LCMXO2-7000HE) programming
//!
//! MachXO2 parts are programmed in offline flash mode. After the
//! configuration rows the flow writes the UFM sector, the usercode and the
//! feature row, then sets DONE. Completion of every flash write is polled
//! through LSC_CHECK_BUSY, whose one-bit flag reads 0 once the device is
//! idle.

use bitflags::bitflags;

use crate::bits::BitBuffer;
use crate::device::Family;
use crate::error::Result;
use crate::jed::JedReader;
use crate::jtag::{EndState, TapState};
use crate::poll::{BusyPoll, BusyTimeout, RetryPolicy, Settle};

use super::{
    check_logged, program_rows, verify_rows, with_exit, EraseReport, IspContext, IspController,
    ProgramReport, Region, RowSpan, Stage, VerifyExit, VerifyReport, BYPASS, IDCODE_PUB,
};

mod op {
    pub const ISC_ERASE: u8 = 0x0E;
    pub const PRELOAD: u8 = 0x1C;
    pub const ISC_DISABLE: u8 = 0x26;
    pub const LSC_READ_STATUS: u8 = 0x3C;
    pub const LSC_INIT_ADDRESS: u8 = 0x46;
    pub const LSC_INIT_ADDR_UFM: u8 = 0x47;
    pub const ISC_PROGRAM_DONE: u8 = 0x5E;
    pub const LSC_PROG_INCR_NV: u8 = 0x70;
    pub const LSC_READ_INCR_NV: u8 = 0x73;
    pub const USERCODE: u8 = 0xC0;
    pub const ISC_PROGRAM_USERCODE: u8 = 0xC2;
    pub const ISC_ENABLE: u8 = 0xC6;
    pub const LSC_PROG_FEATURE: u8 = 0xE4;
    pub const LSC_READ_FEATURE: u8 = 0xE7;
    pub const LSC_CHECK_BUSY: u8 = 0xF0;
    pub const LSC_PROG_FEABITS: u8 = 0xF8;
    pub const LSC_READ_FEABITS: u8 = 0xFB;
}

/// ISC_ENABLE operand: transparent (SRAM) mode
const ENABLE_SRAM: u64 = 0x00;
/// ISC_ENABLE operand: offline flash mode
const ENABLE_FLASH: u64 = 0x08;
/// ISC_ERASE operand: SRAM
const ERASE_SRAM: u64 = 0x01;
/// ISC_ERASE operand: configuration flash, UFM and feature row
const ERASE_FLASH: u64 = 0x0E;
/// LSC_INIT_ADDRESS operand: feature row
const ADDRESS_FEATURE: u64 = 0x02;
/// LSC_INIT_ADDRESS operand: configuration flash
const ADDRESS_CONFIG: u64 = 0x04;

/// Boundary scan register length
const PRELOAD_BITS: usize = 664;
/// Run-Test/Idle clocks before identification
const IDLE_TCKS: u32 = 3;
/// Settle time after most instructions
const SETTLE_US: u32 = 3_000;
/// UFM rows following the configuration rows
pub const UFM_ROWS: u32 = 2048;

/// Feature row written by the programming flow
const FEATURE_ROW: u64 = 0;
/// Feature bits written by the programming flow
const FEABITS: u64 = 0x0620;
/// Feature bits compared on read-back
const FEABITS_MASK: u64 = 0xFFF2;
/// Usercode written by the programming flow
const USERCODE: u64 = 0;

/// Flash erase: 800 polls at 2 ms, all of them run
const ERASE_POLL: BusyPoll = BusyPoll {
    retry: RetryPolicy::fixed(800, 2_000),
    settle: Settle::Wait,
    read_end: EndState::Idle,
    ready: false,
};

/// Row program completion
const ROW_POLL: BusyPoll = BusyPoll {
    retry: RetryPolicy::until_ready(10, 3_000),
    settle: Settle::Wait,
    read_end: EndState::Idle,
    ready: false,
};

/// Feature row, feature bits and DONE programming: fixed 30 ms
const FEATURE_POLL: BusyPoll = BusyPoll {
    retry: RetryPolicy::fixed(10, 3_000),
    settle: Settle::Wait,
    read_end: EndState::Idle,
    ready: false,
};

bitflags! {
    /// LSC_READ_STATUS register bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Mxo2Status: u32 {
        /// DONE bit set
        const DONE = 1 << 8;
        /// Device in ISC accessed (programming) mode
        const ISC_ENABLED = 1 << 9;
        /// Internal operation in progress
        const BUSY = 1 << 12;
        /// Last flash operation failed
        const FAIL = 1 << 13;
    }
}

impl Mxo2Status {
    /// Bits checked by the two key protection reads before an erase
    pub const KEY_PROTECTION_MASKS: [u32; 2] = [0x0002_4040, 0x0001_0000];
}

/// Controller for the LCMXO2-7000HE family
#[derive(Debug, Clone, Copy, Default)]
pub struct Lcmxo2Controller;

impl Lcmxo2Controller {
    fn read_status(cx: &mut IspContext<'_>) -> Result<Mxo2Status> {
        cx.ir(op::LSC_READ_STATUS, EndState::Idle)?;
        cx.wait(SETTLE_US);
        let raw = cx.dr_read(EndState::Idle, 32)?.to_u32();
        let status = Mxo2Status::from_bits_retain(raw);
        log::debug!("status 0x{:08X} {:?}", raw, status);
        Ok(status)
    }

    /// Load the boundary scan register, clear SRAM and enter offline mode
    fn enter(cx: &mut IspContext<'_>) -> Result<()> {
        cx.ir(op::PRELOAD, EndState::Idle)?;
        cx.dr_write(EndState::Idle, &BitBuffer::ones(PRELOAD_BITS))?;

        cx.ir(op::ISC_ENABLE, EndState::Idle)?;
        cx.dr_write_value(EndState::Idle, 8, ENABLE_SRAM)?;
        cx.wait(SETTLE_US);
        cx.ir(op::ISC_ERASE, EndState::Idle)?;
        cx.dr_write_value(EndState::Idle, 8, ERASE_SRAM)?;
        cx.wait(1_000);
        cx.ir(BYPASS, EndState::Idle)?;

        cx.ir(op::ISC_ENABLE, EndState::Idle)?;
        cx.dr_write_value(EndState::Idle, 8, ENABLE_FLASH)?;
        cx.wait(SETTLE_US);
        Ok(())
    }

    fn exit(cx: &mut IspContext<'_>) -> Result<()> {
        cx.ir(BYPASS, EndState::Idle)?;
        cx.ir(op::ISC_DISABLE, EndState::Idle)?;
        cx.wait(1_000);
        cx.ir(BYPASS, EndState::Idle)?;
        cx.wait(1_000);
        cx.ir(BYPASS, EndState::Idle)
    }

    fn check_key_protection(cx: &mut IspContext<'_>) -> Result<()> {
        for mask in Mxo2Status::KEY_PROTECTION_MASKS {
            let status = Self::read_status(cx)?;
            check_logged("key protection", status.bits().into(), mask.into(), 0);
        }
        Ok(())
    }

    fn erase_body(cx: &mut IspContext<'_>) -> Result<EraseReport> {
        let mut report = EraseReport::default();
        cx.progress.stage(Stage::Erase, 0);
        Self::check_key_protection(cx)?;

        log::info!("Erase the flash");
        cx.ir(op::ISC_ERASE, EndState::Idle)?;
        cx.dr_write_value(EndState::Idle, 8, ERASE_FLASH)?;
        cx.ir(op::LSC_CHECK_BUSY, EndState::Idle)?;
        if let Some(timeout) = cx.poll(&ERASE_POLL, "erase", None)? {
            report.busy_timeouts.push(timeout);
        }

        let status = Self::read_status(cx)?;
        let failed = status & (Mxo2Status::BUSY | Mxo2Status::FAIL);
        check_logged("erase status", failed.bits().into(), u64::MAX, 0);

        cx.progress.finish();
        log::info!("Erase done");
        Ok(report)
    }

    /// Program one flash row and wait for it
    fn write_row(
        cx: &mut IspContext<'_>,
        row: u32,
        data: &BitBuffer,
        settle_us: u32,
    ) -> Result<Option<BusyTimeout>> {
        cx.ir(op::LSC_PROG_INCR_NV, EndState::Pause)?;
        cx.dr_write(EndState::Idle, data)?;
        cx.wait(settle_us);
        cx.ir(op::LSC_CHECK_BUSY, EndState::Pause)?;
        cx.poll(&ROW_POLL, "row program", Some(row))
    }

    fn read_row(cx: &mut IspContext<'_>) -> Result<BitBuffer> {
        let bits = cx.device.dr_bits;
        let row = cx.dr_read(EndState::Idle, bits)?;
        cx.wait(SETTLE_US);
        Ok(row)
    }

    fn program_feature_row(cx: &mut IspContext<'_>, report: &mut ProgramReport) -> Result<()> {
        cx.ir(op::LSC_INIT_ADDRESS, EndState::Idle)?;
        cx.dr_write_value(EndState::Idle, 8, ADDRESS_FEATURE)?;
        cx.wait(SETTLE_US);

        cx.ir(op::LSC_PROG_FEATURE, EndState::Idle)?;
        cx.dr_write_value(EndState::Idle, 64, FEATURE_ROW)?;
        cx.ir(op::LSC_CHECK_BUSY, EndState::Idle)?;
        report.busy_timeouts.extend(cx.poll(&FEATURE_POLL, "feature row program", None)?);
        cx.ir(op::LSC_READ_FEATURE, EndState::Idle)?;
        let feature = cx.dr_read_value(EndState::Idle, 64)?;
        check_logged("feature row", feature, u64::MAX, FEATURE_ROW);

        cx.ir(op::LSC_PROG_FEABITS, EndState::Idle)?;
        cx.dr_write_value(EndState::Idle, 16, FEABITS)?;
        cx.ir(op::LSC_CHECK_BUSY, EndState::Idle)?;
        report.busy_timeouts.extend(cx.poll(&FEATURE_POLL, "feature bits program", None)?);
        cx.ir(op::LSC_READ_FEABITS, EndState::Idle)?;
        let feabits = cx.dr_read_value(EndState::Idle, 16)?;
        check_logged("feature bits", feabits, FEABITS_MASK, FEABITS);
        Ok(())
    }

    /// Log the usercode, status and feature registers
    fn read_registers(cx: &mut IspContext<'_>) -> Result<()> {
        cx.ir(op::USERCODE, EndState::Idle)?;
        cx.wait(SETTLE_US);
        let usercode = cx.dr_read_value(EndState::Idle, 32)?;
        check_logged("usercode", usercode, u64::MAX, USERCODE);

        Self::read_status(cx)?;
        Self::read_status(cx)?;

        cx.ir(op::LSC_READ_FEATURE, EndState::Idle)?;
        cx.wait(SETTLE_US);
        let feature = cx.dr_read_value(EndState::Idle, 64)?;
        check_logged("feature row", feature, u64::MAX, FEATURE_ROW);

        cx.ir(op::LSC_READ_FEABITS, EndState::Idle)?;
        cx.wait(SETTLE_US);
        let feabits = cx.dr_read_value(EndState::Idle, 16)?;
        check_logged("feature bits", feabits, FEABITS_MASK, FEABITS);

        Self::read_status(cx)?;
        Ok(())
    }
}

impl IspController for Lcmxo2Controller {
    fn family(&self) -> Family {
        Family::Lcmxo2_7000he
    }

    fn verify_exit(&self) -> VerifyExit {
        VerifyExit::StopOnFirstMismatch
    }

    fn identify(&self, cx: &mut IspContext<'_>) -> Result<u32> {
        cx.jtag.run_test_idle(false, TapState::Idle, IDLE_TCKS)?;
        cx.check_idcode(IDCODE_PUB, EndState::Idle)
    }

    fn erase(&self, cx: &mut IspContext<'_>) -> Result<EraseReport> {
        self.identify(cx)?;
        log::info!("Starting to erase {}", cx.device.name);
        with_exit(
            cx,
            |cx| {
                Self::enter(cx)?;
                Self::erase_body(cx)
            },
            Self::exit,
        )
    }

    fn program(&self, cx: &mut IspContext<'_>, jed: &mut JedReader) -> Result<ProgramReport> {
        self.identify(cx)?;
        with_exit(
            cx,
            |cx| {
                Self::enter(cx)?;
                let erase = Self::erase_body(cx)?;
                let mut report = ProgramReport {
                    busy_timeouts: erase.busy_timeouts,
                    ..Default::default()
                };

                jed.rewind()?;
                cx.ir(op::LSC_INIT_ADDRESS, EndState::Idle)?;
                cx.dr_write_value(EndState::Idle, 8, ADDRESS_CONFIG)?;
                let span = RowSpan::config(cx.device.row_num);
                program_rows(cx, jed, span, &mut report, |cx, row, data| {
                    Self::write_row(cx, row, data, 1_000)
                })?;

                cx.ir(op::LSC_INIT_ADDR_UFM, EndState::Idle)?;
                program_rows(cx, jed, RowSpan::ufm(UFM_ROWS), &mut report, |cx, row, data| {
                    Self::write_row(cx, row, data, 0)
                })?;

                cx.ir(op::USERCODE, EndState::Idle)?;
                cx.dr_write_value(EndState::Idle, 32, USERCODE)?;
                cx.ir(op::ISC_PROGRAM_USERCODE, EndState::Idle)?;
                cx.wait(2_000);
                Self::read_status(cx)?;

                Self::program_feature_row(cx, &mut report)?;

                cx.ir(op::ISC_PROGRAM_DONE, EndState::Idle)?;
                cx.ir(op::LSC_CHECK_BUSY, EndState::Idle)?;
                report.busy_timeouts.extend(cx.poll(&FEATURE_POLL, "program done", None)?);

                log::info!(
                    "Programmed {} rows, {} busy timeouts",
                    report.rows_programmed,
                    report.busy_timeouts.len()
                );
                Ok(report)
            },
            Self::exit,
        )
    }

    fn verify(&self, cx: &mut IspContext<'_>, jed: &mut JedReader) -> Result<VerifyReport> {
        self.identify(cx)?;
        log::info!("Starting to verify {}", cx.device.name);
        with_exit(
            cx,
            |cx| {
                let mut report = VerifyReport::default();
                Self::enter(cx)?;

                cx.ir(op::LSC_INIT_ADDRESS, EndState::Idle)?;
                cx.dr_write_value(EndState::Idle, 8, ADDRESS_CONFIG)?;
                cx.wait(SETTLE_US);
                cx.ir(op::LSC_READ_INCR_NV, EndState::Idle)?;
                cx.wait(SETTLE_US);
                jed.rewind()?;

                let exit = self.verify_exit();
                let span = RowSpan::config(cx.device.row_num);
                let clean = verify_rows(cx, jed, span, exit, &mut report, Self::read_row)?;

                if clean {
                    cx.ir(op::LSC_INIT_ADDR_UFM, EndState::Idle)?;
                    cx.wait(SETTLE_US);
                    cx.ir(op::LSC_READ_INCR_NV, EndState::Idle)?;
                    cx.wait(SETTLE_US);
                    verify_rows(cx, jed, RowSpan::ufm(UFM_ROWS), exit, &mut report, Self::read_row)?;
                } else {
                    log::warn!("Skipping {} after configuration mismatch", Region::Ufm);
                }

                Self::read_registers(cx)?;
                Ok(report)
            },
            Self::exit,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_bits() {
        let status = Mxo2Status::from_bits_retain(0x0000_3200);
        assert!(status.contains(Mxo2Status::BUSY | Mxo2Status::FAIL));
        assert!(status.contains(Mxo2Status::ISC_ENABLED));
        assert!(!status.contains(Mxo2Status::DONE));
        assert_eq!((Mxo2Status::BUSY | Mxo2Status::FAIL).bits(), 0x3000);
    }
}

//! In-system programming flows
//!
//! Each supported family has an [`IspController`] that turns identify,
//! erase, program and verify into a sequence of IR/DR shifts, waits and
//! busy polls. The controllers are stateless unit structs; everything an
//! operation needs is passed in an [`IspContext`].
//!
//! The helpers here are shared by all families:
//!
//! - instruction and data register shifts with trace logging
//! - [`program_rows`] and [`verify_rows`] drive the per-row loops
//! - [`with_exit`] guarantees the device leaves programming mode
//!
//! Identification always happens before programming mode is entered, so an
//! IDCODE mismatch never leaves the device half-configured.

mod lc4064v;
mod lcmxo2;
mod lcmxo2280c;

pub use lc4064v::Lc4064vController;
pub use lcmxo2::{Lcmxo2Controller, Mxo2Status};
pub use lcmxo2280c::Lcmxo2280cController;

use std::fmt;

use crate::bits::BitBuffer;
use crate::device::{DeviceDescriptor, Family};
use crate::error::{Error, Result};
use crate::jed::JedReader;
use crate::jtag::{EndState, JtagMaster, TapState};
use crate::poll::{BusyPolicy, BusyPoll, BusyTimeout};

/// Instruction register length of all supported parts
pub const IR_BITS: u32 = 8;

/// BYPASS, common to every IEEE 1149.1 device
pub const BYPASS: u8 = 0xFF;

/// IDCODE_PUB, used to probe the chain before the family is known
pub const IDCODE_PUB: u8 = 0xE0;

// ============================================================================
// Reports
// ============================================================================

/// Fuse array region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// Configuration rows
    Config,
    /// User flash memory rows
    Ufm,
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Region::Config => f.write_str("CFG"),
            Region::Ufm => f.write_str("UFM"),
        }
    }
}

/// A row whose read-back differs from the fuse map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowMismatch {
    /// Region the row belongs to
    pub region: Region,
    /// Zero-based row within the region
    pub row: u32,
    /// First differing 32-bit word of the row
    pub word: usize,
    /// Word from the fuse map
    pub expected: u32,
    /// Word read from the device
    pub actual: u32,
}

impl fmt::Display for RowMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} row {} word {}: JED 0x{:08X}, device 0x{:08X}",
            self.region, self.row, self.word, self.expected, self.actual
        )
    }
}

/// Whether verification stops at the first bad row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyExit {
    /// Compare every row
    Continue,
    /// Stop at the first mismatching row
    StopOnFirstMismatch,
}

/// Outcome of an erase
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EraseReport {
    /// Busy polls that timed out but were tolerated
    pub busy_timeouts: Vec<BusyTimeout>,
}

/// Outcome of a verify pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// Rows read back and compared
    pub rows_compared: u32,
    /// Rows that differ from the fuse map
    pub mismatches: Vec<RowMismatch>,
    /// Whether the pass stopped before the last row
    pub stopped_early: bool,
}

impl VerifyReport {
    /// No row differs
    pub fn passed(&self) -> bool {
        self.mismatches.is_empty()
    }

    /// At least one row differs
    pub fn has_mismatch(&self) -> bool {
        !self.mismatches.is_empty()
    }
}

/// Outcome of programming
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramReport {
    /// Rows shifted into the device
    pub rows_programmed: u32,
    /// Busy polls that timed out but were tolerated
    pub busy_timeouts: Vec<BusyTimeout>,
    /// Read-back done as part of the programming flow, if the family has one
    pub verify: Option<VerifyReport>,
}

impl ProgramReport {
    /// No inline verify mismatch
    pub fn passed(&self) -> bool {
        self.verify.as_ref().map_or(true, VerifyReport::passed)
    }
}

// ============================================================================
// Progress
// ============================================================================

/// Step of an operation, for progress reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Erasing
    Erase,
    /// Programming a region
    Program(Region),
    /// Reading back a region
    Verify(Region),
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Erase => f.write_str("Erasing"),
            Stage::Program(region) => write!(f, "Programming {}", region),
            Stage::Verify(region) => write!(f, "Verifying {}", region),
        }
    }
}

/// Receives progress of long-running operations
pub trait Progress {
    /// A stage with `rows` rows begins (zero for stages without rows)
    fn stage(&mut self, stage: Stage, rows: u32) {
        let _ = (stage, rows);
    }

    /// `done` rows of the current stage are complete
    fn rows(&mut self, done: u32) {
        let _ = done;
    }

    /// The current stage finished
    fn finish(&mut self) {}
}

/// Progress sink that ignores all events
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl Progress for NoProgress {}

// ============================================================================
// Context
// ============================================================================

/// Everything a controller needs for one operation
pub struct IspContext<'a> {
    /// Scan chain
    pub jtag: &'a mut dyn JtagMaster,
    /// Device being programmed
    pub device: &'a DeviceDescriptor,
    /// Busy timeout handling
    pub busy: BusyPolicy,
    /// Progress sink
    pub progress: &'a mut dyn Progress,
    /// Rows shifted into the device so far, kept when the operation fails
    pub rows_programmed: u32,
}

impl<'a> IspContext<'a> {
    /// Bundle the parts of an operation
    pub fn new(
        jtag: &'a mut dyn JtagMaster,
        device: &'a DeviceDescriptor,
        busy: BusyPolicy,
        progress: &'a mut dyn Progress,
    ) -> Self {
        Self {
            jtag,
            device,
            busy,
            progress,
            rows_programmed: 0,
        }
    }

    /// Shift an instruction
    pub fn ir(&mut self, opcode: u8, end: EndState) -> Result<()> {
        log::trace!("SIR {} TDI ({:02X})", IR_BITS, opcode);
        self.jtag
            .shift_ir(end, IR_BITS, &BitBuffer::from_u32(opcode.into(), IR_BITS as usize))?;
        Ok(())
    }

    /// Shift a buffer into the data register
    pub fn dr_write(&mut self, end: EndState, data: &BitBuffer) -> Result<()> {
        log::trace!("SDR {} TDI ({})", data.len(), data);
        self.jtag.shift_dr_in(end, data.len() as u32, data)
    }

    /// Shift the low `bits` bits of `value` into the data register
    pub fn dr_write_value(&mut self, end: EndState, bits: u32, value: u64) -> Result<()> {
        self.dr_write(end, &BitBuffer::from_u64(value, bits as usize))
    }

    /// Shift `bits` bits out of the data register
    pub fn dr_read(&mut self, end: EndState, bits: u32) -> Result<BitBuffer> {
        let data = self.jtag.shift_dr_out(end, bits)?;
        log::trace!("SDR {} TDO ({})", bits, data);
        Ok(data)
    }

    /// Shift up to 64 bits out of the data register as an integer
    pub fn dr_read_value(&mut self, end: EndState, bits: u32) -> Result<u64> {
        Ok(self.dr_read(end, bits)?.to_u64())
    }

    /// Clock `tcks` cycles in Run-Test/Idle, then wait `us` microseconds
    pub fn idle(&mut self, tcks: u32, us: u32) -> Result<()> {
        self.jtag.run_test_idle(false, TapState::Idle, tcks)?;
        self.wait(us);
        Ok(())
    }

    /// Wait `us` microseconds
    pub fn wait(&mut self, us: u32) {
        if us > 0 {
            self.jtag.delay_us(us);
        }
    }

    /// Read a 32-bit IDCODE with `opcode` and check it against the device
    pub fn check_idcode(&mut self, opcode: u8, end: EndState) -> Result<u32> {
        self.ir(opcode, end)?;
        let found = self.dr_read(end, 32)?.to_u32();
        if found != self.device.idcode {
            log::warn!(
                "ID Fail: read 0x{:08X}, expected 0x{:08X}",
                found,
                self.device.idcode
            );
            return Err(Error::IdMismatch {
                expected: self.device.idcode,
                found,
            });
        }
        log::debug!("{}: IDCODE 0x{:08X}", self.device.name, found);
        Ok(found)
    }

    /// Run a busy poll, applying the busy policy
    pub fn poll(
        &mut self,
        poll: &BusyPoll,
        step: &'static str,
        row: Option<u32>,
    ) -> Result<Option<BusyTimeout>> {
        let result = poll.run(&mut *self.jtag, step, row);
        self.busy.resolve(result)
    }
}

// ============================================================================
// Controller trait
// ============================================================================

/// Family-specific programming algorithm
pub trait IspController: Sync {
    /// Family driven by this controller
    fn family(&self) -> Family;

    /// Early-exit policy of this family's verify
    fn verify_exit(&self) -> VerifyExit;

    /// Read the IDCODE the family's flows check, failing on mismatch
    fn identify(&self, cx: &mut IspContext<'_>) -> Result<u32>;

    /// Erase the configuration flash
    fn erase(&self, cx: &mut IspContext<'_>) -> Result<EraseReport>;

    /// Program the fuse map from `jed`
    ///
    /// Families whose hardware flow verifies before setting the DONE bit
    /// return that read-back in [`ProgramReport::verify`].
    fn program(&self, cx: &mut IspContext<'_>, jed: &mut JedReader) -> Result<ProgramReport>;

    /// Compare the device against `jed`
    fn verify(&self, cx: &mut IspContext<'_>, jed: &mut JedReader) -> Result<VerifyReport>;
}

/// Controller for a family
pub fn controller(family: Family) -> &'static dyn IspController {
    match family {
        Family::Lc4064v => &Lc4064vController,
        Family::Lcmxo2280c => &Lcmxo2280cController,
        Family::Lcmxo2_7000he => &Lcmxo2Controller,
    }
}

// ============================================================================
// Shared flow helpers
// ============================================================================

/// Run `body`, then `exit` no matter how `body` ended
///
/// An error from `body` wins over an error from `exit`; the latter is
/// logged.
pub(crate) fn with_exit<T>(
    cx: &mut IspContext<'_>,
    body: impl FnOnce(&mut IspContext<'_>) -> Result<T>,
    exit: impl FnOnce(&mut IspContext<'_>) -> Result<()>,
) -> Result<T> {
    let result = body(cx);
    if result.is_err() {
        log::debug!("{}: leaving programming mode after failure", cx.device.name);
    }
    let exited = exit(cx);
    match (result, exited) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(exit_err)) => {
            log::warn!("Failed to leave programming mode: {}", exit_err);
            Err(e)
        }
    }
}

/// Where the rows of a region come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RowSource {
    /// Every row must be present in the fuse map
    Required,
    /// Rows missing at the end of the fuse map are blank
    Optional,
}

/// A run of rows processed by [`program_rows`] or [`verify_rows`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RowSpan {
    pub region: Region,
    pub count: u32,
    pub source: RowSource,
}

impl RowSpan {
    pub(crate) const fn config(count: u32) -> Self {
        Self {
            region: Region::Config,
            count,
            source: RowSource::Required,
        }
    }

    pub(crate) const fn ufm(count: u32) -> Self {
        Self {
            region: Region::Ufm,
            count,
            source: RowSource::Optional,
        }
    }

    /// Decode the next row; optional rows missing from the file are blank
    fn take(&self, jed: &mut JedReader, bits: u32, blank: &mut bool) -> Result<BitBuffer> {
        match self.source {
            RowSource::Required => Ok(jed.next_row(bits)?),
            RowSource::Optional => match jed.next_row_opt(bits)? {
                Some(row) => Ok(row),
                None => {
                    if !*blank {
                        log::info!(
                            "No {} data in JED file after row {}, using blank rows",
                            self.region,
                            jed.rows_read()
                        );
                        *blank = true;
                    }
                    Ok(BitBuffer::zeroed(bits as usize))
                }
            },
        }
    }
}

/// Shift the rows of `span` from `jed` into the device
///
/// `write_row` issues the per-row shifts and waits; a tolerated busy
/// timeout it returns is recorded in `report`.
pub(crate) fn program_rows<F>(
    cx: &mut IspContext<'_>,
    jed: &mut JedReader,
    span: RowSpan,
    report: &mut ProgramReport,
    mut write_row: F,
) -> Result<()>
where
    F: FnMut(&mut IspContext<'_>, u32, &BitBuffer) -> Result<Option<BusyTimeout>>,
{
    let bits = cx.device.dr_bits;
    let mut blank = false;
    cx.progress.stage(Stage::Program(span.region), span.count);
    log::info!("Program {} {} rows", span.region, span.count);

    for row in 0..span.count {
        let data = span.take(jed, bits, &mut blank)?;
        if let Some(timeout) = write_row(cx, row, &data)? {
            report.busy_timeouts.push(timeout);
        }
        report.rows_programmed += 1;
        cx.rows_programmed += 1;
        cx.progress.rows(row + 1);
    }

    cx.progress.finish();
    Ok(())
}

/// Read back the rows of `span` and compare them with `jed`
///
/// `read_row` shifts one row out of the device and performs any per-row
/// wait. Returns `false` if the pass stopped at a mismatch.
pub(crate) fn verify_rows<F>(
    cx: &mut IspContext<'_>,
    jed: &mut JedReader,
    span: RowSpan,
    exit: VerifyExit,
    report: &mut VerifyReport,
    mut read_row: F,
) -> Result<bool>
where
    F: FnMut(&mut IspContext<'_>) -> Result<BitBuffer>,
{
    let bits = cx.device.dr_bits;
    let mut blank = false;
    cx.progress.stage(Stage::Verify(span.region), span.count);
    log::info!("Verify {} {} rows", span.region, span.count);

    for row in 0..span.count {
        let expected = span.take(jed, bits, &mut blank)?;
        let actual = read_row(cx)?;
        report.rows_compared += 1;
        cx.progress.rows(row + 1);

        if let Some((word, expected, actual)) = expected.first_mismatch(&actual) {
            let mismatch = RowMismatch {
                region: span.region,
                row,
                word,
                expected,
                actual,
            };
            log::warn!("Verify mismatch: {}", mismatch);
            report.mismatches.push(mismatch);
            if exit == VerifyExit::StopOnFirstMismatch {
                report.stopped_early = row + 1 < span.count;
                cx.progress.finish();
                return Ok(false);
            }
        }
    }

    cx.progress.finish();
    Ok(true)
}

/// Log a register read that differs from its documented value
pub(crate) fn check_logged(step: &str, value: u64, mask: u64, expected: u64) -> bool {
    let ok = value & mask == expected;
    if ok {
        log::debug!("{}: 0x{:X}", step, value);
    } else {
        log::warn!("{}: read 0x{:X}, expected 0x{:X} (mask 0x{:X})", step, value, expected, mask);
    }
    ok
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_dispatch() {
        for family in Family::ALL {
            assert_eq!(controller(family).family(), family);
        }
        assert_eq!(
            controller(Family::Lc4064v).verify_exit(),
            VerifyExit::Continue
        );
        assert_eq!(
            controller(Family::Lcmxo2280c).verify_exit(),
            VerifyExit::StopOnFirstMismatch
        );
        assert_eq!(
            controller(Family::Lcmxo2_7000he).verify_exit(),
            VerifyExit::StopOnFirstMismatch
        );
    }

    #[test]
    fn test_report_pass() {
        let mut report = ProgramReport::default();
        assert!(report.passed());
        report.verify = Some(VerifyReport {
            rows_compared: 3,
            mismatches: vec![RowMismatch {
                region: Region::Config,
                row: 2,
                word: 0,
                expected: 1,
                actual: 0,
            }],
            stopped_early: false,
        });
        assert!(!report.passed());
        assert_eq!(
            report.verify.unwrap().mismatches[0].to_string(),
            "CFG row 2 word 0: JED 0x00000001, device 0x00000000"
        );
    }

    #[test]
    fn test_check_logged() {
        assert!(check_logged("feabits", 0x0620, 0xFFF2, 0x0620));
        assert!(check_logged("feabits", 0x062D, 0xFFF2, 0x0620));
        assert!(!check_logged("feabits", 0x0000, 0xFFF2, 0x0620));
    }
}

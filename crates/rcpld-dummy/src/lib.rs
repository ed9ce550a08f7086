//! rcpld-dummy - Emulated Lattice JTAG target for testing
//!
//! This crate provides a JTAG transport that answers like a single Lattice
//! device on the chain. It keeps the fuse rows it is programmed with in
//! memory and returns them on read-back, so complete erase/program/verify
//! sessions can run without hardware.
//!
//! Faults can be injected through [`DummyConfig`]: a busy flag that never
//! clears, a failing status register and a row that reads back corrupted.
//! Every transaction is recorded as a [`JtagEvent`].

use rcpld_core::bits::BitBuffer;
use rcpld_core::device::{DeviceDescriptor, Family};
use rcpld_core::error::{Error, Result};
use rcpld_core::jtag::{EndState, JtagMaster, TapState};

/// Instructions the emulator reacts to
mod op {
    pub const IDCODE: u8 = 0x16;
    pub const IDCODE_PUB: u8 = 0xE0;

    // ispMACH 4000 and MachXO
    pub const ISC_ADDRESS_SHIFT: u8 = 0x01;
    pub const DATA_SHIFT: u8 = 0x02;
    pub const ISC_ERASE: u8 = 0x03;
    pub const UES_READ: u8 = 0x17;
    pub const ISC_ADDRESS_INIT: u8 = 0x21;
    pub const ISC_PROG_INCR: u8 = 0x27;
    pub const ISC_READ_INCR: u8 = 0x2A;
    pub const PROGRAM_DONE: u8 = 0x2F;
    pub const LSCC_PROGRAM_INCR_RTI: u8 = 0x67;
    pub const LSCC_READ_INCR_RTI: u8 = 0x6A;
    pub const READ_STATUS: u8 = 0xB2;

    // MachXO2
    pub const MXO2_ISC_ERASE: u8 = 0x0E;
    pub const LSC_READ_STATUS: u8 = 0x3C;
    pub const LSC_INIT_ADDRESS: u8 = 0x46;
    pub const LSC_INIT_ADDR_UFM: u8 = 0x47;
    pub const LSC_PROG_INCR_NV: u8 = 0x70;
    pub const LSC_READ_INCR_NV: u8 = 0x73;
    pub const USERCODE: u8 = 0xC0;
    pub const LSC_PROG_FEATURE: u8 = 0xE4;
    pub const LSC_READ_FEATURE: u8 = 0xE7;
    pub const LSC_CHECK_BUSY: u8 = 0xF0;
    pub const LSC_PROG_FEABITS: u8 = 0xF8;
    pub const LSC_READ_FEABITS: u8 = 0xFB;
}

/// MachXO2 status register BUSY | FAIL
const MXO2_STATUS_FAIL: u32 = 0x3000;

/// Configuration for the emulated device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DummyConfig {
    /// Programming algorithm the device answers to
    pub family: Family,
    /// IDCODE returned on the chain
    pub idcode: u32,
    /// Bits per row
    pub dr_bits: u32,
    /// Configuration rows
    pub rows: u32,
    /// TCK frequency reported until changed
    pub frequency_hz: u32,
    /// The busy flag never clears
    pub stuck_busy: bool,
    /// Status reads report a failure
    pub fail_status: bool,
    /// Configuration row that reads back with bit 0 flipped
    pub corrupt_row: Option<u32>,
}

impl DummyConfig {
    /// Emulate the device described by `device`
    pub fn for_device(device: &DeviceDescriptor) -> Self {
        Self {
            family: device.family,
            idcode: device.idcode,
            dr_bits: device.dr_bits,
            rows: device.row_num,
            ..Default::default()
        }
    }
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            family: Family::Lcmxo2_7000he,
            idcode: 0x012B_5043, // LCMXO2-7000HE
            dr_bits: 128,
            rows: 9212,
            frequency_hz: 1_000_000,
            stuck_busy: false,
            fail_status: false,
            corrupt_row: None,
        }
    }
}

/// One recorded JTAG transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JtagEvent {
    /// Run-Test/Idle request
    RunTestIdle {
        /// Whether the TAP went through Test-Logic-Reset
        reset: bool,
        /// State the request ended in
        end: TapState,
        /// Idle clocks
        tcks: u32,
    },
    /// Instruction shift
    Ir {
        /// Instruction opcode
        opcode: u8,
        /// State after the shift
        end: EndState,
    },
    /// Data register write
    DrIn {
        /// Shift length
        bits: u32,
    },
    /// Data register read
    DrOut {
        /// Shift length
        bits: u32,
    },
}

/// Emulated Lattice device
pub struct DummyCpld {
    config: DummyConfig,
    rows: Vec<BitBuffer>,
    frequency_hz: u32,
    instruction: u8,
    cursor: usize,
    latched: Option<BitBuffer>,
    usercode: u32,
    feature: u64,
    feabits: u64,
    events: Vec<JtagEvent>,
}

impl DummyCpld {
    /// Create an erased device with the given configuration
    pub fn new(config: DummyConfig) -> Self {
        Self {
            rows: Vec::new(),
            frequency_hz: config.frequency_hz,
            instruction: 0xFF,
            cursor: 0,
            latched: None,
            usercode: 0,
            feature: 0,
            feabits: 0,
            events: Vec::new(),
            config,
        }
    }

    /// Create an erased LCMXO2-7000HE
    pub fn new_default() -> Self {
        Self::new(DummyConfig::default())
    }

    /// Get the configuration
    pub fn config(&self) -> &DummyConfig {
        &self.config
    }

    /// Stored contents of a row; rows past the configuration array are UFM
    pub fn row(&self, index: usize) -> BitBuffer {
        match self.rows.get(index) {
            Some(r) if !r.is_empty() => r.clone(),
            _ => self.blank_row(),
        }
    }

    /// Number of rows written since the last erase
    pub fn rows_written(&self) -> usize {
        self.rows.iter().filter(|r| !r.is_empty()).count()
    }

    /// Transactions recorded so far
    pub fn events(&self) -> &[JtagEvent] {
        &self.events
    }

    /// Opcodes of all recorded instruction shifts, in order
    pub fn instructions(&self) -> Vec<u8> {
        self.events
            .iter()
            .filter_map(|e| match e {
                JtagEvent::Ir { opcode, .. } => Some(*opcode),
                _ => None,
            })
            .collect()
    }

    /// Forget recorded transactions
    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    fn blank_row(&self) -> BitBuffer {
        BitBuffer::zeroed(self.config.dr_bits as usize)
    }

    fn erase_array(&mut self) {
        log::debug!("dummy: erasing fuse array");
        self.rows.clear();
    }

    fn store_row(&mut self, data: BitBuffer) {
        if self.cursor >= self.rows.len() {
            self.rows.resize(self.cursor + 1, BitBuffer::new());
        }
        log::trace!("dummy: row {} <- {}", self.cursor, data);
        self.rows[self.cursor] = data;
        self.cursor += 1;
    }

    fn load_row(&mut self) -> BitBuffer {
        let index = self.cursor;
        self.cursor += 1;
        let mut row = self.row(index);
        if self.config.corrupt_row.map(|r| r as usize) == Some(index) {
            let bit = row.get(0).unwrap_or(false);
            row.set(0, !bit);
        }
        row
    }

    /// One-bit flag reads: busy, done and status flags
    fn flag(&self) -> bool {
        let busy = self.config.stuck_busy;
        match (self.config.family, self.instruction) {
            (Family::Lcmxo2_7000he, op::LSC_CHECK_BUSY) => busy,
            (Family::Lcmxo2280c, op::READ_STATUS) => self.config.fail_status,
            (Family::Lcmxo2280c, op::ISC_ERASE | op::LSCC_PROGRAM_INCR_RTI) => !busy,
            (Family::Lcmxo2280c, op::PROGRAM_DONE) => true,
            _ => false,
        }
    }

    fn on_instruction(&mut self, opcode: u8) {
        self.instruction = opcode;
        match (self.config.family, opcode) {
            (Family::Lc4064v | Family::Lcmxo2280c, op::ISC_ERASE) => self.erase_array(),
            (Family::Lc4064v | Family::Lcmxo2280c, op::ISC_ADDRESS_INIT) => self.cursor = 0,
            (Family::Lcmxo2280c, op::LSCC_PROGRAM_INCR_RTI) => {
                if let Some(data) = self.latched.take() {
                    self.store_row(data);
                }
            }
            (Family::Lcmxo2_7000he, op::LSC_INIT_ADDRESS) => self.cursor = 0,
            (Family::Lcmxo2_7000he, op::LSC_INIT_ADDR_UFM) => {
                self.cursor = self.config.rows as usize
            }
            _ => {}
        }
    }

    fn on_write(&mut self, bits: u32, tdi: &BitBuffer) {
        let row = bits == self.config.dr_bits;
        match (self.config.family, self.instruction) {
            (Family::Lc4064v, op::ISC_ADDRESS_SHIFT) => self.cursor = 0,
            (Family::Lc4064v, op::ISC_PROG_INCR) if row => self.store_row(tdi.clone()),
            (Family::Lcmxo2280c, op::DATA_SHIFT) if row => self.latched = Some(tdi.clone()),
            (Family::Lcmxo2280c, op::UES_READ) => self.usercode = tdi.to_u32(),
            (Family::Lcmxo2_7000he, op::LSC_PROG_INCR_NV) if row => self.store_row(tdi.clone()),
            (Family::Lcmxo2_7000he, op::MXO2_ISC_ERASE) if tdi.to_u32() & 0x0E != 0 => {
                self.erase_array();
                self.feature = 0;
                self.feabits = 0;
            }
            (Family::Lcmxo2_7000he, op::USERCODE) => self.usercode = tdi.to_u32(),
            (Family::Lcmxo2_7000he, op::LSC_PROG_FEATURE) => self.feature = tdi.to_u64(),
            (Family::Lcmxo2_7000he, op::LSC_PROG_FEABITS) => self.feabits = tdi.to_u64(),
            _ => {}
        }
    }

    fn on_read(&mut self, bits: u32) -> BitBuffer {
        let len = bits as usize;
        if bits == 1 {
            return BitBuffer::from_u32(self.flag().into(), 1);
        }
        let row = bits == self.config.dr_bits;
        match (self.config.family, self.instruction) {
            (_, op::IDCODE_PUB | op::IDCODE) if bits == 32 => {
                BitBuffer::from_u32(self.config.idcode, len)
            }
            (Family::Lc4064v, op::ISC_READ_INCR) if row => self.load_row(),
            (Family::Lcmxo2280c, op::LSCC_READ_INCR_RTI) if row => self.load_row(),
            (Family::Lcmxo2280c, op::UES_READ) => BitBuffer::from_u32(self.usercode, len),
            (Family::Lcmxo2_7000he, op::LSC_READ_INCR_NV) if row => self.load_row(),
            (Family::Lcmxo2_7000he, op::LSC_READ_STATUS) => {
                let status = if self.config.fail_status { MXO2_STATUS_FAIL } else { 0 };
                BitBuffer::from_u32(status, len)
            }
            (Family::Lcmxo2_7000he, op::USERCODE) => BitBuffer::from_u32(self.usercode, len),
            (Family::Lcmxo2_7000he, op::LSC_READ_FEATURE) => BitBuffer::from_u64(self.feature, len),
            (Family::Lcmxo2_7000he, op::LSC_READ_FEABITS) => BitBuffer::from_u64(self.feabits, len),
            _ => BitBuffer::zeroed(len),
        }
    }
}

impl JtagMaster for DummyCpld {
    fn run_test_idle(&mut self, reset: bool, end: TapState, tcks: u32) -> Result<()> {
        self.events.push(JtagEvent::RunTestIdle { reset, end, tcks });
        Ok(())
    }

    fn shift_ir(&mut self, end: EndState, bits: u32, tdi: &BitBuffer) -> Result<BitBuffer> {
        if bits != 8 || tdi.len() < 8 {
            return Err(Error::Transport(format!("dummy: unsupported IR length {}", bits)));
        }
        let opcode = tdi.to_u32() as u8;
        self.events.push(JtagEvent::Ir { opcode, end });
        self.on_instruction(opcode);
        // IR capture value of 1149.1 devices
        Ok(BitBuffer::from_u32(0x01, 8))
    }

    fn shift_dr_in(&mut self, _end: EndState, bits: u32, tdi: &BitBuffer) -> Result<()> {
        if tdi.len() < bits as usize {
            return Err(Error::Transport(format!(
                "dummy: {} bit DR shift with {} bits of data",
                bits,
                tdi.len()
            )));
        }
        self.events.push(JtagEvent::DrIn { bits });
        self.on_write(bits, tdi);
        Ok(())
    }

    fn shift_dr_out(&mut self, _end: EndState, bits: u32) -> Result<BitBuffer> {
        self.events.push(JtagEvent::DrOut { bits });
        Ok(self.on_read(bits))
    }

    fn frequency(&mut self) -> Result<u32> {
        Ok(self.frequency_hz)
    }

    fn set_frequency(&mut self, hz: u32) -> Result<()> {
        self.frequency_hz = hz;
        Ok(())
    }

    fn delay_us(&mut self, _us: u32) {
        // No delay needed for an emulated device
    }
}

impl std::fmt::Debug for DummyCpld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DummyCpld")
            .field("config", &self.config)
            .field("rows_written", &self.rows_written())
            .field("events", &self.events.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcpld_core::device::DeviceCatalog;
    use rcpld_core::isp::{controller, IspContext, NoProgress, Region};
    use rcpld_core::jed::JedReader;
    use rcpld_core::poll::BusyPolicy;
    use rcpld_core::session::{ProgramSession, SessionOptions};

    const ROWS: u32 = 10;
    const BITS: u32 = 40;
    const UFM_ROWS: u32 = 2048;

    fn device(family: Family) -> DeviceDescriptor {
        let idcode = match family {
            Family::Lc4064v => 0x0180_9043,
            Family::Lcmxo2280c => 0x0128_D043,
            Family::Lcmxo2_7000he => 0x012B_5043,
        };
        DeviceDescriptor {
            name: format!("TEST-{}", family),
            idcode,
            family,
            dr_bits: BITS,
            row_num: ROWS,
        }
    }

    fn catalog(family: Family) -> DeviceCatalog {
        let mut catalog = DeviceCatalog::new();
        catalog.insert(device(family));
        catalog
    }

    fn dummy(family: Family) -> DummyCpld {
        DummyCpld::new(DummyConfig::for_device(&device(family)))
    }

    fn fuse(row: u32, bit: u32) -> bool {
        (row * 7 + bit * 3) % 5 == 0
    }

    fn expected_row(row: u32) -> BitBuffer {
        (0..BITS).map(|bit| fuse(row, bit)).collect()
    }

    fn jed(rows: u32) -> JedReader {
        let mut text = String::from("\x02NOTE rcpld test image*\r\nQF400*\r\nF0*\r\nL000000\r\n");
        for row in 0..rows {
            for bit in 0..BITS {
                text.push(if fuse(row, bit) { '1' } else { '0' });
            }
            text.push_str("\r\n");
        }
        text.push_str("*\r\nC0000*\r\n\x030000\r\n");
        JedReader::from_bytes(text)
    }

    fn last_instructions(dummy: &DummyCpld, n: usize) -> Vec<u8> {
        let all = dummy.instructions();
        all[all.len().saturating_sub(n)..].to_vec()
    }

    #[test]
    fn test_flash_all_families() {
        for family in Family::ALL {
            let catalog = catalog(family);
            let mut dummy = dummy(family);
            let mut jed = jed(ROWS);

            let mut session =
                ProgramSession::open(&mut dummy, &catalog, SessionOptions::default()).unwrap();
            let report = session.flash(&mut jed).unwrap();
            assert!(report.verify.passed(), "{}: {:?}", family, report.verify);
            assert!(report.program.busy_timeouts.is_empty());
            assert_eq!(session.compare_errors(), 0);

            let expected_rows = match family {
                Family::Lcmxo2_7000he => ROWS + UFM_ROWS,
                _ => ROWS,
            };
            assert_eq!(session.rows_programmed(), expected_rows);
            assert_eq!(report.verify.rows_compared, expected_rows);
            drop(session);

            for row in 0..ROWS {
                assert_eq!(dummy.row(row as usize), expected_row(row), "{} row {}", family, row);
            }
        }
    }

    #[test]
    fn test_mxo2_registers_programmed() {
        let catalog = catalog(Family::Lcmxo2_7000he);
        let mut dummy = dummy(Family::Lcmxo2_7000he);
        let mut session =
            ProgramSession::open(&mut dummy, &catalog, SessionOptions::default()).unwrap();
        let report = session.program(&mut jed(ROWS)).unwrap();
        assert!(report.verify.is_none());
        drop(session);

        assert_eq!(dummy.feabits, 0x0620);
        assert_eq!(dummy.usercode, 0);
        // Missing UFM data is written blank
        assert_eq!(dummy.row((ROWS + 5) as usize), BitBuffer::zeroed(BITS as usize));
        assert_eq!(last_instructions(&dummy, 4), vec![0xFF, 0x26, 0xFF, 0xFF]);
    }

    #[test]
    fn test_verify_is_repeatable() {
        for family in Family::ALL {
            let catalog = catalog(family);
            let mut dummy = dummy(family);
            let mut jed = jed(ROWS);
            let mut session =
                ProgramSession::open(&mut dummy, &catalog, SessionOptions::default()).unwrap();
            session.program(&mut jed).unwrap();

            let first = session.verify(&mut jed).unwrap();
            let second = session.verify(&mut jed).unwrap();
            assert_eq!(first, second);
            assert!(first.passed());
        }
    }

    #[test]
    fn test_corrupt_row() {
        for family in Family::ALL {
            let catalog = catalog(family);
            let mut config = DummyConfig::for_device(&device(family));
            config.corrupt_row = Some(5);
            let mut dummy = DummyCpld::new(config);
            let mut jed = jed(ROWS);

            let mut session =
                ProgramSession::open(&mut dummy, &catalog, SessionOptions::default()).unwrap();
            session.program(&mut jed).unwrap();
            let report = session.verify(&mut jed).unwrap();

            assert_eq!(session.compare_errors(), 1, "{}", family);
            assert_eq!(report.mismatches.len(), 1);
            assert_eq!(report.mismatches[0].row, 5);
            assert_eq!(report.mismatches[0].region, Region::Config);
            assert_eq!(report.mismatches[0].word, 0);

            if family == Family::Lc4064v {
                assert_eq!(report.rows_compared, ROWS);
                assert!(!report.stopped_early);
            } else {
                assert_eq!(report.rows_compared, 6, "{}", family);
                assert!(report.stopped_early);
            }
        }
    }

    #[test]
    fn test_mxo_done_skipped_on_mismatch() {
        let catalog = catalog(Family::Lcmxo2280c);
        let mut config = DummyConfig::for_device(&device(Family::Lcmxo2280c));
        config.corrupt_row = Some(2);
        let mut dummy = DummyCpld::new(config);

        let mut session =
            ProgramSession::open(&mut dummy, &catalog, SessionOptions::default()).unwrap();
        let report = session.program(&mut jed(ROWS)).unwrap();
        assert!(!report.passed());
        drop(session);

        assert!(!dummy.instructions().contains(&op::PROGRAM_DONE));
        assert_eq!(last_instructions(&dummy, 3), vec![0x1E, 0xFF, 0xFF]);
    }

    #[test]
    fn test_unknown_device() {
        let catalog = DeviceCatalog::builtin();
        let mut dummy = DummyCpld::new(DummyConfig {
            idcode: 0xDEAD_BEEF,
            ..Default::default()
        });

        let err = ProgramSession::open(&mut dummy, &catalog, SessionOptions::default()).unwrap_err();
        assert!(matches!(err, Error::UnknownDevice { idcode: 0xDEAD_BEEF }));
        assert_eq!(
            dummy.events(),
            &[
                JtagEvent::RunTestIdle {
                    reset: true,
                    end: TapState::Idle,
                    tcks: 0
                },
                JtagEvent::Ir {
                    opcode: op::IDCODE_PUB,
                    end: EndState::Idle
                },
                JtagEvent::DrOut { bits: 32 },
            ]
        );
    }

    #[test]
    fn test_id_mismatch_leaves_device_alone() {
        let dev = device(Family::Lcmxo2280c);
        let mut dummy = DummyCpld::new(DummyConfig {
            idcode: 0x0128_D044,
            ..DummyConfig::for_device(&dev)
        });

        let mut progress = NoProgress;
        let mut cx = IspContext::new(&mut dummy, &dev, BusyPolicy::Fail, &mut progress);
        let err = controller(Family::Lcmxo2280c).erase(&mut cx).unwrap_err();
        assert!(matches!(
            err,
            Error::IdMismatch {
                expected: 0x0128_D043,
                found: 0x0128_D044
            }
        ));
        assert!(err.is_identification());
        assert_eq!(dummy.instructions(), vec![op::IDCODE]);
    }

    #[test]
    fn test_stuck_busy_policies() {
        let catalog = catalog(Family::Lcmxo2_7000he);
        for policy in [BusyPolicy::WarnAndContinue, BusyPolicy::Fail] {
            let mut config = DummyConfig::for_device(&device(Family::Lcmxo2_7000he));
            config.stuck_busy = true;
            let mut dummy = DummyCpld::new(config);
            let options = SessionOptions {
                busy_policy: policy,
                ..Default::default()
            };

            let mut session = ProgramSession::open(&mut dummy, &catalog, options).unwrap();
            let result = session.erase();
            match policy {
                BusyPolicy::WarnAndContinue => {
                    let report = result.unwrap();
                    assert_eq!(report.busy_timeouts.len(), 1);
                    assert_eq!(report.busy_timeouts[0].attempts, 800);
                }
                BusyPolicy::Fail => {
                    assert!(matches!(result, Err(Error::BusyTimeout(_))));
                }
            }
            drop(session);
            assert_eq!(last_instructions(&dummy, 4), vec![0xFF, 0x26, 0xFF, 0xFF]);
        }
    }

    #[test]
    fn test_failed_status_exits() {
        let catalog = catalog(Family::Lcmxo2280c);
        let mut config = DummyConfig::for_device(&device(Family::Lcmxo2280c));
        config.fail_status = true;
        let mut dummy = DummyCpld::new(config);

        let mut session =
            ProgramSession::open(&mut dummy, &catalog, SessionOptions::default()).unwrap();
        let err = session.erase().unwrap_err();
        assert!(matches!(err, Error::StatusCheck { value: 1, expected: 0, .. }));
        drop(session);
        assert_eq!(last_instructions(&dummy, 3), vec![0x1E, 0xFF, 0xFF]);
    }

    #[test]
    fn test_short_file_exits() {
        let catalog = catalog(Family::Lc4064v);
        let mut dummy = dummy(Family::Lc4064v);

        let mut session =
            ProgramSession::open(&mut dummy, &catalog, SessionOptions::default()).unwrap();
        let err = session.program(&mut jed(ROWS - 1)).unwrap_err();
        assert!(matches!(err, Error::Jed(_)));
        assert_eq!(session.rows_programmed(), ROWS - 1);
        drop(session);
        assert_eq!(last_instructions(&dummy, 2), vec![0x1E, 0xFF]);
        assert_eq!(dummy.rows_written(), (ROWS - 1) as usize);
    }

    #[test]
    fn test_frequency_option() {
        let catalog = catalog(Family::Lc4064v);
        let mut dummy = dummy(Family::Lc4064v);
        let options = SessionOptions {
            frequency_hz: Some(4_000_000),
            ..Default::default()
        };
        ProgramSession::open(&mut dummy, &catalog, options).unwrap();
        assert_eq!(dummy.frequency().unwrap(), 4_000_000);
    }
}

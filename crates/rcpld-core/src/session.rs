//! Programming session - probe a device and drive its family flows
//!
//! A [`ProgramSession`] owns the JTAG transport for its whole lifetime and
//! holds the descriptor of the device found on the chain. All operations go
//! through the family's [`IspController`].

use crate::bits::BitBuffer;
use crate::device::{DeviceCatalog, DeviceDescriptor};
use crate::error::{Error, Result};
use crate::isp::{
    self, EraseReport, IspContext, IspController, NoProgress, ProgramReport, Progress,
    VerifyReport, IDCODE_PUB, IR_BITS,
};
use crate::jed::JedReader;
use crate::jtag::{EndState, JtagMaster, TapState};
use crate::poll::BusyPolicy;

/// Session settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionOptions {
    /// TCK frequency to apply before probing; the transport default if `None`
    pub frequency_hz: Option<u32>,
    /// Busy timeout handling for every operation
    pub busy_policy: BusyPolicy,
}

/// Outcome of [`ProgramSession::flash`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlashReport {
    /// Stand-alone erase
    pub erase: EraseReport,
    /// Programming, including any inline read-back
    pub program: ProgramReport,
    /// Final comparison against the fuse map
    pub verify: VerifyReport,
}

/// Reset the TAP and read the chain's IDCODE with IDCODE_PUB
pub fn probe<J: JtagMaster + ?Sized>(jtag: &mut J) -> Result<u32> {
    jtag.run_test_idle(true, TapState::Idle, 0)?;
    jtag.shift_ir(
        EndState::Idle,
        IR_BITS,
        &BitBuffer::from_u32(IDCODE_PUB.into(), IR_BITS as usize),
    )?;
    let idcode = jtag.shift_dr_out(EndState::Idle, 32)?.to_u32();
    log::debug!("Probed IDCODE 0x{:08X}", idcode);
    Ok(idcode)
}

/// A transport bound to an identified device
pub struct ProgramSession<'c, J: JtagMaster> {
    jtag: J,
    device: &'c DeviceDescriptor,
    options: SessionOptions,
    rows_programmed: u32,
    compare_errors: u32,
}

impl<'c, J: JtagMaster> ProgramSession<'c, J> {
    /// Probe the chain on `jtag` and look the device up in `catalog`
    ///
    /// Fails with [`Error::UnknownDevice`] when the IDCODE is not in the
    /// catalog; no further JTAG traffic happens in that case.
    pub fn open(mut jtag: J, catalog: &'c DeviceCatalog, options: SessionOptions) -> Result<Self> {
        let hz = jtag.frequency()?;
        if hz == 0 {
            return Err(Error::Transport("JTAG clock frequency reads as 0".into()));
        }
        log::debug!("JTAG frequency {} Hz", hz);

        if let Some(wanted) = options.frequency_hz {
            if wanted == 0 {
                return Err(Error::Transport("cannot set a JTAG frequency of 0".into()));
            }
            jtag.set_frequency(wanted)?;
            log::info!("JTAG frequency set to {} Hz", wanted);
        }

        let idcode = probe(&mut jtag)?;
        let device = catalog
            .lookup(idcode)
            .ok_or(Error::UnknownDevice { idcode })?;
        log::info!(
            "Found {} (IDCODE 0x{:08X}, {} rows x {} bits)",
            device.name,
            idcode,
            device.row_num,
            device.dr_bits
        );

        Ok(Self {
            jtag,
            device,
            options,
            rows_programmed: 0,
            compare_errors: 0,
        })
    }

    /// The identified device
    pub fn device(&self) -> &'c DeviceDescriptor {
        self.device
    }

    /// Controller of the device's family
    pub fn controller(&self) -> &'static dyn IspController {
        isp::controller(self.device.family)
    }

    /// Session settings
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Rows shifted in by the last program operation
    pub fn rows_programmed(&self) -> u32 {
        self.rows_programmed
    }

    /// Mismatching rows found by the last compare
    pub fn compare_errors(&self) -> u32 {
        self.compare_errors
    }

    /// Give the transport back
    pub fn into_transport(self) -> J {
        self.jtag
    }

    fn run<T>(
        &mut self,
        progress: &mut dyn Progress,
        op: impl FnOnce(&dyn IspController, &mut IspContext<'_>) -> Result<T>,
    ) -> Result<T> {
        self.run_counted(progress, op).0
    }

    /// Like `run`, also returning the rows shifted in, even on failure
    fn run_counted<T>(
        &mut self,
        progress: &mut dyn Progress,
        op: impl FnOnce(&dyn IspController, &mut IspContext<'_>) -> Result<T>,
    ) -> (Result<T>, u32) {
        let controller = self.controller();
        let mut cx = IspContext::new(&mut self.jtag, self.device, self.options.busy_policy, progress);
        let result = op(controller, &mut cx);
        (result, cx.rows_programmed)
    }

    /// Erase the device
    pub fn erase(&mut self) -> Result<EraseReport> {
        self.erase_with_progress(&mut NoProgress)
    }

    /// Erase the device, reporting progress
    pub fn erase_with_progress(&mut self, progress: &mut dyn Progress) -> Result<EraseReport> {
        self.run(progress, |c, cx| c.erase(cx))
    }

    /// Program the device from `jed`
    pub fn program(&mut self, jed: &mut JedReader) -> Result<ProgramReport> {
        self.program_with_progress(jed, &mut NoProgress)
    }

    /// Program the device from `jed`, reporting progress
    pub fn program_with_progress(
        &mut self,
        jed: &mut JedReader,
        progress: &mut dyn Progress,
    ) -> Result<ProgramReport> {
        let (result, rows) = self.run_counted(progress, |c, cx| c.program(cx, jed));
        self.rows_programmed = rows;
        let report = result?;
        if let Some(verify) = &report.verify {
            self.compare_errors = verify.mismatches.len() as u32;
        }
        Ok(report)
    }

    /// Compare the device with `jed`
    pub fn verify(&mut self, jed: &mut JedReader) -> Result<VerifyReport> {
        self.verify_with_progress(jed, &mut NoProgress)
    }

    /// Compare the device with `jed`, reporting progress
    pub fn verify_with_progress(
        &mut self,
        jed: &mut JedReader,
        progress: &mut dyn Progress,
    ) -> Result<VerifyReport> {
        jed.rewind()?;
        let report = self.run(progress, |c, cx| c.verify(cx, jed))?;
        self.compare_errors = report.mismatches.len() as u32;
        Ok(report)
    }

    /// Erase, program and verify
    pub fn flash(&mut self, jed: &mut JedReader) -> Result<FlashReport> {
        self.flash_with_progress(jed, &mut NoProgress)
    }

    /// Erase, program and verify, reporting progress
    ///
    /// The separate verify pass is skipped when the family's program flow
    /// already read the array back.
    pub fn flash_with_progress(
        &mut self,
        jed: &mut JedReader,
        progress: &mut dyn Progress,
    ) -> Result<FlashReport> {
        let erase = self.erase_with_progress(progress)?;
        let program = self.program_with_progress(jed, progress)?;
        let verify = match &program.verify {
            Some(inline) => inline.clone(),
            None => self.verify_with_progress(jed, progress)?,
        };
        Ok(FlashReport {
            erase,
            program,
            verify,
        })
    }
}

impl<J: JtagMaster> std::fmt::Debug for ProgramSession<'_, J> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgramSession")
            .field("device", &self.device.name)
            .field("options", &self.options)
            .field("rows_programmed", &self.rows_programmed)
            .field("compare_errors", &self.compare_errors)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Answers every 32-bit read with a fixed IDCODE and counts calls
    struct Chain {
        idcode: u32,
        hz: u32,
        calls: usize,
    }

    impl Chain {
        fn new(idcode: u32) -> Self {
            Self {
                idcode,
                hz: 1_000_000,
                calls: 0,
            }
        }
    }

    impl JtagMaster for Chain {
        fn run_test_idle(&mut self, _reset: bool, _end: TapState, _tcks: u32) -> Result<()> {
            self.calls += 1;
            Ok(())
        }

        fn shift_ir(&mut self, _end: EndState, bits: u32, _tdi: &BitBuffer) -> Result<BitBuffer> {
            self.calls += 1;
            Ok(BitBuffer::zeroed(bits as usize))
        }

        fn shift_dr_in(&mut self, _end: EndState, _bits: u32, _tdi: &BitBuffer) -> Result<()> {
            self.calls += 1;
            Ok(())
        }

        fn shift_dr_out(&mut self, _end: EndState, bits: u32) -> Result<BitBuffer> {
            self.calls += 1;
            Ok(BitBuffer::from_u32(self.idcode, bits as usize))
        }

        fn frequency(&mut self) -> Result<u32> {
            Ok(self.hz)
        }

        fn set_frequency(&mut self, hz: u32) -> Result<()> {
            self.hz = hz;
            Ok(())
        }

        fn delay_us(&mut self, _us: u32) {}
    }

    #[test]
    fn test_unknown_device() {
        let catalog = DeviceCatalog::builtin();
        let mut chain = Chain::new(0xDEAD_BEEF);
        let err = ProgramSession::open(&mut chain, &catalog, SessionOptions::default()).unwrap_err();
        assert!(matches!(err, Error::UnknownDevice { idcode: 0xDEAD_BEEF }));
        // reset, IDCODE_PUB, 32-bit read
        assert_eq!(chain.calls, 3);
    }

    #[test]
    fn test_open_known_device() {
        let catalog = DeviceCatalog::builtin();
        let options = SessionOptions {
            frequency_hz: Some(4_000_000),
            ..Default::default()
        };
        let session = ProgramSession::open(Chain::new(0x012B_5043), &catalog, options).unwrap();
        assert_eq!(session.device().name, "LCMXO2-7000HE");
        assert_eq!(session.controller().family(), session.device().family);
        assert_eq!(session.rows_programmed(), 0);
        assert_eq!(session.into_transport().hz, 4_000_000);
    }

    #[test]
    fn test_zero_frequency() {
        let catalog = DeviceCatalog::builtin();
        let mut chain = Chain::new(0x012B_5043);
        chain.hz = 0;
        let err = ProgramSession::open(&mut chain, &catalog, SessionOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(chain.calls, 0);
    }
}

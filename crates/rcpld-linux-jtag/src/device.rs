//! Aspeed JTAG device implementation
//!
//! This module provides the `AspeedJtag` struct that implements the
//! `JtagMaster` trait using the Aspeed SDK JTAG driver's character device.

use crate::error::{LinuxJtagError, Result};

use rcpld_core::bits::BitBuffer;
use rcpld_core::error::Result as CoreResult;
use rcpld_core::jtag::{EndState, JtagMaster, TapState};

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;

/// Default JTAG controller device node on AST2500/AST2600 BMCs
pub const DEFAULT_DEVICE: &str = "/dev/1e6e4000.jtag";

/// Longest shift the driver's 16-bit length field can express
const MAX_SHIFT_BITS: u32 = u16::MAX as u32;

/// Most idle clocks one RUNTEST request can carry
const MAX_IDLE_TCKS: u32 = u8::MAX as u32;

/// Transfer mode of the JTAG engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum XferMode {
    /// Shifts run in the controller's hardware engine
    #[default]
    Hardware,
    /// Shifts are bit-banged by the driver
    Software,
}

impl XferMode {
    fn raw(self) -> libc::c_uint {
        match self {
            XferMode::Hardware => 0,
            XferMode::Software => 1,
        }
    }
}

/// Aspeed JTAG driver ioctl interface
mod ioctl {
    use nix::{ioctl_read, ioctl_readwrite, ioctl_write_ptr};

    // JTAG ioctl magic number
    const JTAG_IOC_MAGIC: u8 = b'T';

    /// struct runtest_idle
    #[repr(C)]
    #[derive(Debug, Default)]
    pub struct RunTestIdle {
        pub mode: libc::c_uint,
        /// 0: Run-Test/Idle, 1: Pause-IR, 2: Pause-DR
        pub end: u8,
        /// Go through Test-Logic-Reset first
        pub reset: u8,
        pub tck: u8,
    }

    /// struct sir_xfer
    #[repr(C)]
    #[derive(Debug)]
    pub struct SirXfer {
        pub mode: libc::c_uint,
        pub length: u16,
        pub tdi: *mut u32,
        pub tdo: *mut u32,
        /// 0: Run-Test/Idle, 1: Pause-IR
        pub endir: u8,
    }

    /// struct sdr_xfer
    #[repr(C)]
    #[derive(Debug)]
    pub struct SdrXfer {
        pub mode: libc::c_uint,
        /// 0: read, 1: write
        pub direct: u8,
        pub length: u16,
        pub tdio: *mut u32,
        /// 0: Run-Test/Idle, 1: Pause-DR
        pub enddr: u8,
    }

    ioctl_write_ptr!(jtag_runtest, JTAG_IOC_MAGIC, 0, RunTestIdle);
    ioctl_readwrite!(jtag_sir, JTAG_IOC_MAGIC, 1, SirXfer);
    ioctl_readwrite!(jtag_sdr, JTAG_IOC_MAGIC, 2, SdrXfer);
    ioctl_write_ptr!(jtag_set_freq, JTAG_IOC_MAGIC, 3, libc::c_uint);
    ioctl_read!(jtag_get_freq, JTAG_IOC_MAGIC, 4, libc::c_uint);
}

fn os_error(e: nix::errno::Errno) -> std::io::Error {
    std::io::Error::from_raw_os_error(e as i32)
}

fn end_state(end: EndState) -> u8 {
    match end {
        EndState::Idle => 0,
        EndState::Pause => 1,
    }
}

fn tap_state(end: TapState) -> u8 {
    match end {
        TapState::Idle => 0,
        TapState::IrPause => 1,
        TapState::DrPause => 2,
    }
}

/// Split an idle clock count into RUNTEST-sized requests
///
/// Always yields at least one request so that a zero-clock call still
/// moves the TAP.
fn idle_chunks(tcks: u32) -> impl Iterator<Item = u8> {
    let full = tcks / MAX_IDLE_TCKS;
    let rest = tcks % MAX_IDLE_TCKS;
    let tail = if rest > 0 || full == 0 { Some(rest as u8) } else { None };
    std::iter::repeat(MAX_IDLE_TCKS as u8)
        .take(full as usize)
        .chain(tail)
}

/// RUNTEST requests for `tcks` clocks ending in `end`
///
/// Only the last request leaves Run-Test/Idle.
fn idle_requests(end: TapState, tcks: u32) -> Vec<(TapState, u8)> {
    let chunks: Vec<u8> = idle_chunks(tcks).collect();
    let last = chunks.len().saturating_sub(1);
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, tck)| (if i == last { end } else { TapState::Idle }, tck))
        .collect()
}

fn check_length(bits: u32) -> Result<u16> {
    if bits > MAX_SHIFT_BITS {
        return Err(LinuxJtagError::ShiftTooLong {
            bits,
            max: MAX_SHIFT_BITS,
        });
    }
    Ok(bits as u16)
}

/// Configuration for opening an Aspeed JTAG controller
#[derive(Debug, Clone)]
pub struct AspeedJtagConfig {
    /// Device path (e.g., "/dev/1e6e4000.jtag")
    pub device: String,
    /// Hardware or software transfers
    pub mode: XferMode,
    /// TCK frequency to set on open; the driver's current one if `None`
    pub frequency_hz: Option<u32>,
}

impl Default for AspeedJtagConfig {
    fn default() -> Self {
        Self {
            device: DEFAULT_DEVICE.to_string(),
            mode: XferMode::Hardware,
            frequency_hz: None,
        }
    }
}

impl AspeedJtagConfig {
    /// Create a new configuration with the given device path
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            ..Default::default()
        }
    }

    /// Set the transfer mode
    pub fn with_mode(mut self, mode: XferMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the TCK frequency in Hz
    pub fn with_frequency(mut self, hz: u32) -> Self {
        self.frequency_hz = Some(hz);
        self
    }
}

/// Aspeed BMC JTAG master
///
/// Drives the JTAG controller of an Aspeed BMC through its character
/// device. Shift payloads are passed to the driver as LSB-first 32-bit
/// words, the layout [`BitBuffer`] already uses.
pub struct AspeedJtag {
    /// File handle for the JTAG device
    file: File,
    /// Transfer mode passed with every request
    mode: XferMode,
}

impl AspeedJtag {
    /// Open an Aspeed JTAG controller with the given configuration
    pub fn open(config: &AspeedJtagConfig) -> Result<Self> {
        if config.device.is_empty() {
            return Err(LinuxJtagError::NoDevice);
        }

        log::debug!("aspeed_jtag: Opening device {}", config.device);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&config.device)
            .map_err(|e| LinuxJtagError::OpenFailed {
                path: config.device.clone(),
                source: e,
            })?;

        let mut jtag = Self {
            file,
            mode: config.mode,
        };

        if let Some(hz) = config.frequency_hz {
            jtag.write_frequency(hz)?;
        }

        log::info!(
            "aspeed_jtag: Opened {} ({:?} mode, {} kHz)",
            config.device,
            config.mode,
            jtag.read_frequency()? / 1000
        );

        Ok(jtag)
    }

    /// Open a device with default settings
    pub fn open_device(device: &str) -> Result<Self> {
        Self::open(&AspeedJtagConfig::new(device))
    }

    /// Current TCK frequency in Hz
    pub fn read_frequency(&self) -> Result<u32> {
        let mut hz: libc::c_uint = 0;
        unsafe {
            ioctl::jtag_get_freq(self.file.as_raw_fd(), &mut hz)
                .map_err(|e| LinuxJtagError::GetFrequencyFailed(os_error(e)))?;
        }
        Ok(hz)
    }

    /// Set a new TCK frequency in Hz
    pub fn write_frequency(&mut self, hz: u32) -> Result<()> {
        if hz == 0 {
            return Err(LinuxJtagError::InvalidParameter(
                "JTAG frequency must be non-zero".into(),
            ));
        }
        let value: libc::c_uint = hz;
        unsafe {
            ioctl::jtag_set_freq(self.file.as_raw_fd(), &value).map_err(|e| {
                LinuxJtagError::SetFrequencyFailed {
                    hz,
                    source: os_error(e),
                }
            })?;
        }
        log::debug!("aspeed_jtag: Set frequency to {} Hz", hz);
        Ok(())
    }

    fn runtest(&mut self, reset: bool, end: TapState, tcks: u32) -> Result<()> {
        let fd = self.file.as_raw_fd();
        for (i, (state, tck)) in idle_requests(end, tcks).into_iter().enumerate() {
            let req = ioctl::RunTestIdle {
                mode: self.mode.raw(),
                end: tap_state(state),
                reset: u8::from(reset && i == 0),
                tck,
            };
            unsafe {
                ioctl::jtag_runtest(fd, &req).map_err(|e| LinuxJtagError::TransferFailed {
                    op: "run-test-idle",
                    source: os_error(e),
                })?;
            }
        }
        Ok(())
    }

    fn sir(&mut self, end: EndState, bits: u32, tdi: &BitBuffer) -> Result<BitBuffer> {
        let length = check_length(bits)?;
        let mut tdi_words = padded_words(tdi, bits);
        let mut tdo_words = vec![0u32; tdi_words.len()];
        let mut xfer = ioctl::SirXfer {
            mode: self.mode.raw(),
            length,
            tdi: tdi_words.as_mut_ptr(),
            tdo: tdo_words.as_mut_ptr(),
            endir: end_state(end),
        };
        unsafe {
            ioctl::jtag_sir(self.file.as_raw_fd(), &mut xfer).map_err(|e| {
                LinuxJtagError::TransferFailed {
                    op: "SIR",
                    source: os_error(e),
                }
            })?;
        }
        Ok(BitBuffer::from_words(&tdo_words, bits as usize))
    }

    fn sdr(&mut self, end: EndState, bits: u32, tdi: Option<&BitBuffer>) -> Result<BitBuffer> {
        let length = check_length(bits)?;
        let mut words = match tdi {
            Some(data) => padded_words(data, bits),
            None => vec![0u32; word_count(bits)],
        };
        let mut xfer = ioctl::SdrXfer {
            mode: self.mode.raw(),
            direct: u8::from(tdi.is_some()),
            length,
            tdio: words.as_mut_ptr(),
            enddr: end_state(end),
        };
        unsafe {
            ioctl::jtag_sdr(self.file.as_raw_fd(), &mut xfer).map_err(|e| {
                LinuxJtagError::TransferFailed {
                    op: "SDR",
                    source: os_error(e),
                }
            })?;
        }
        Ok(BitBuffer::from_words(&words, bits as usize))
    }
}

fn word_count(bits: u32) -> usize {
    (bits as usize).div_ceil(32).max(1)
}

/// Copy a payload into a driver buffer of exactly `bits` bits
fn padded_words(data: &BitBuffer, bits: u32) -> Vec<u32> {
    let mut words = vec![0u32; word_count(bits)];
    for (dst, src) in words.iter_mut().zip(data.words()) {
        *dst = *src;
    }
    words
}

impl JtagMaster for AspeedJtag {
    fn run_test_idle(&mut self, reset: bool, end: TapState, tcks: u32) -> CoreResult<()> {
        Ok(self.runtest(reset, end, tcks)?)
    }

    fn shift_ir(&mut self, end: EndState, bits: u32, tdi: &BitBuffer) -> CoreResult<BitBuffer> {
        Ok(self.sir(end, bits, tdi)?)
    }

    fn shift_dr_in(&mut self, end: EndState, bits: u32, tdi: &BitBuffer) -> CoreResult<()> {
        self.sdr(end, bits, Some(tdi))?;
        Ok(())
    }

    fn shift_dr_out(&mut self, end: EndState, bits: u32) -> CoreResult<BitBuffer> {
        Ok(self.sdr(end, bits, None)?)
    }

    fn frequency(&mut self) -> CoreResult<u32> {
        Ok(self.read_frequency()?)
    }

    fn set_frequency(&mut self, hz: u32) -> CoreResult<()> {
        Ok(self.write_frequency(hz)?)
    }

    fn delay_us(&mut self, us: u32) {
        std::thread::sleep(std::time::Duration::from_micros(us as u64));
    }
}

/// Parse programmer options from a list of key-value pairs
pub fn parse_options(options: &[(&str, &str)]) -> std::result::Result<AspeedJtagConfig, String> {
    let mut config = AspeedJtagConfig::default();

    for (key, value) in options {
        match *key {
            "dev" => {
                config.device = value.to_string();
            }
            "mode" => {
                config.mode = match *value {
                    "hw" => XferMode::Hardware,
                    "sw" => XferMode::Software,
                    _ => return Err(format!("Invalid mode value: {} (must be hw or sw)", value)),
                };
            }
            "freq" => {
                let hz: u32 = value
                    .parse()
                    .map_err(|_| format!("Invalid freq value: {}", value))?;
                if hz == 0 {
                    return Err("JTAG frequency must be non-zero".to_string());
                }
                config.frequency_hz = Some(hz);
            }
            _ => {
                log::warn!("aspeed_jtag: Unknown option: {}={}", key, value);
            }
        }
    }

    if config.device.is_empty() {
        return Err("No device specified. Use dev=/dev/1e6e4000.jtag".to_string());
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_options_defaults() {
        let config = parse_options(&[]).unwrap();
        assert_eq!(config.device, DEFAULT_DEVICE);
        assert_eq!(config.mode, XferMode::Hardware);
        assert_eq!(config.frequency_hz, None);
    }

    #[test]
    fn test_parse_options() {
        let config =
            parse_options(&[("dev", "/dev/jtag0"), ("mode", "sw"), ("freq", "1000000")]).unwrap();
        assert_eq!(config.device, "/dev/jtag0");
        assert_eq!(config.mode, XferMode::Software);
        assert_eq!(config.frequency_hz, Some(1_000_000));

        assert!(parse_options(&[("mode", "fast")]).is_err());
        assert!(parse_options(&[("freq", "0")]).is_err());
        assert!(parse_options(&[("dev", "")]).is_err());
    }

    #[test]
    fn test_idle_chunks() {
        assert_eq!(idle_chunks(0).collect::<Vec<_>>(), vec![0]);
        assert_eq!(idle_chunks(15).collect::<Vec<_>>(), vec![15]);
        assert_eq!(idle_chunks(255).collect::<Vec<_>>(), vec![255]);
        assert_eq!(idle_chunks(600).collect::<Vec<_>>(), vec![255, 255, 90]);
    }

    #[test]
    fn test_idle_requests_stay_in_idle() {
        assert_eq!(
            idle_requests(TapState::DrPause, 600),
            vec![
                (TapState::Idle, 255),
                (TapState::Idle, 255),
                (TapState::DrPause, 90)
            ]
        );
        assert_eq!(idle_requests(TapState::IrPause, 0), vec![(TapState::IrPause, 0)]);
        assert_eq!(idle_requests(TapState::Idle, 300), vec![(TapState::Idle, 255), (TapState::Idle, 45)]);
    }

    #[test]
    fn test_padded_words() {
        let data = BitBuffer::ones(40);
        assert_eq!(padded_words(&data, 40), vec![0xFFFF_FFFF, 0xFF]);
        assert_eq!(padded_words(&BitBuffer::new(), 1), vec![0]);
        assert!(check_length(664).is_ok());
        assert!(check_length(70_000).is_err());
    }
}

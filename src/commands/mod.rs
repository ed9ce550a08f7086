//! CLI command implementations
//!
//! Every device command opens the programmer, binds it to the device found on
//! the chain with a [`ProgramSession`] and drives one or more family flows.
//! Erase, program and verify hold the operation lock from [`crate::oplock`]
//! for their whole run.

mod erase;
mod list;
mod manifest;
mod probe;
mod program;
mod status;
mod verify;

pub use erase::run_erase;
pub use list::{list_devices, list_programmers};
pub use manifest::run_manifest;
pub use probe::run_probe;
pub use program::{run_program, ProgramOptions};
pub use status::run_status;
pub use verify::run_verify;

use indicatif::{ProgressBar, ProgressStyle};
use rcpld_core::device::DeviceCatalog;
use rcpld_core::isp::{Progress, Stage};
use rcpld_core::jtag::JtagMaster;
use rcpld_core::poll::BusyPolicy;
use rcpld_core::session::{ProgramSession, SessionOptions};
use std::time::Duration;

use crate::programmers::open_programmer;

/// A session over whichever programmer the user picked
pub type Session<'c> = ProgramSession<'c, Box<dyn JtagMaster>>;

/// Open `programmer` and identify the device on it
pub fn open_session<'c>(
    programmer: &str,
    catalog: &'c DeviceCatalog,
    strict_busy: bool,
) -> Result<Session<'c>, Box<dyn std::error::Error>> {
    let jtag = open_programmer(programmer, catalog)?;
    let options = SessionOptions {
        busy_policy: if strict_busy {
            BusyPolicy::Fail
        } else {
            BusyPolicy::WarnAndContinue
        },
        ..SessionOptions::default()
    };

    let session = ProgramSession::open(jtag, catalog, options)?;
    let device = session.device();
    println!(
        "Found: {} (IDCODE 0x{:08X}, {} rows x {} bits)",
        device.name, device.idcode, device.row_num, device.dr_bits
    );
    Ok(session)
}

/// Progress sink drawing one indicatif bar per stage
#[derive(Default)]
pub struct BarProgress {
    bar: Option<ProgressBar>,
    stage: Option<Stage>,
}

impl BarProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Progress for BarProgress {
    fn stage(&mut self, stage: Stage, rows: u32) {
        self.finish();

        let bar = if rows == 0 {
            let pb = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
                pb.set_style(style);
            }
            pb.enable_steady_tick(Duration::from_millis(100));
            pb.set_message(format!("{}...", stage));
            pb
        } else {
            let pb = ProgressBar::new(u64::from(rows));
            if let Ok(style) = ProgressStyle::default_bar().template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} rows {msg}",
            ) {
                pb.set_style(style.progress_chars("#>-"));
            }
            pb.set_message(stage.to_string());
            pb
        };

        self.bar = Some(bar);
        self.stage = Some(stage);
    }

    fn rows(&mut self, done: u32) {
        if let Some(bar) = &self.bar {
            bar.set_position(u64::from(done));
        }
    }

    fn finish(&mut self) {
        if let (Some(bar), Some(stage)) = (self.bar.take(), self.stage.take()) {
            bar.finish_with_message(format!("{} done", stage));
        }
    }
}

impl Drop for BarProgress {
    fn drop(&mut self) {
        // A failed stage never reaches finish()
        if let Some(bar) = self.bar.take() {
            bar.abandon();
        }
    }
}

//! Program command implementation

use rcpld_core::device::DeviceCatalog;
use rcpld_core::isp::VerifyReport;
use rcpld_core::jed::JedReader;
use std::path::Path;

use super::{open_session, BarProgress};
use crate::oplock::{Operation, ResultKind, StateDir};

/// Options for the program command
#[derive(Debug, Clone, Copy)]
pub struct ProgramOptions {
    pub erase: bool,
    pub verify: bool,
    pub strict_busy: bool,
}

/// Run the program command
///
/// The outcome is recorded in the `cpldflash` result file. A verify
/// mismatch counts as a failed flash.
pub fn run_program(
    programmer: &str,
    catalog: &DeviceCatalog,
    state: &StateDir,
    input: &Path,
    options: ProgramOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let _guard = state.begin(Operation::Program)?;

    let result = program_device(programmer, catalog, input, options);
    state.write_result(ResultKind::Flash, result.is_ok())?;
    result
}

fn program_device(
    programmer: &str,
    catalog: &DeviceCatalog,
    input: &Path,
    options: ProgramOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut jed = JedReader::open(input)
        .map_err(|e| format!("Failed to open {}: {}", input.display(), e))?;

    let mut session = open_session(programmer, catalog, options.strict_busy)?;
    let mut progress = BarProgress::new();

    if options.erase {
        session.erase_with_progress(&mut progress)?;
    } else {
        log::info!("Skipping stand-alone erase");
    }

    let report = session.program_with_progress(&mut jed, &mut progress)?;
    println!("Programmed {} rows", report.rows_programmed);
    if !report.busy_timeouts.is_empty() {
        log::warn!("{} busy timeouts tolerated", report.busy_timeouts.len());
    }

    let verify = match report.verify {
        Some(inline) => Some(inline),
        None if options.verify => Some(session.verify_with_progress(&mut jed, &mut progress)?),
        None => None,
    };

    match verify {
        Some(verify) => check_verify(&verify),
        None => {
            println!("Program complete (not verified)");
            Ok(())
        }
    }
}

/// Print a verify report; mismatches are an error
pub(super) fn check_verify(report: &VerifyReport) -> Result<(), Box<dyn std::error::Error>> {
    if report.passed() {
        println!("Verify passed ({} rows compared)", report.rows_compared);
        return Ok(());
    }

    for mismatch in &report.mismatches {
        eprintln!("  {}", mismatch);
    }
    if report.stopped_early {
        eprintln!("  (stopped at first mismatch)");
    }
    Err(format!(
        "Verify failed: {} of {} rows differ",
        report.mismatches.len(),
        report.rows_compared
    )
    .into())
}

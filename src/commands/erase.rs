//! Erase command implementation

use rcpld_core::device::DeviceCatalog;

use super::{open_session, BarProgress};
use crate::oplock::{Operation, ResultKind, StateDir};

/// Run the erase command
///
/// The outcome is recorded in the `cplderase` result file.
pub fn run_erase(
    programmer: &str,
    catalog: &DeviceCatalog,
    state: &StateDir,
    strict_busy: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let _guard = state.begin(Operation::Erase)?;

    let result = erase_device(programmer, catalog, strict_busy);
    state.write_result(ResultKind::Erase, result.is_ok())?;
    result
}

fn erase_device(
    programmer: &str,
    catalog: &DeviceCatalog,
    strict_busy: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut session = open_session(programmer, catalog, strict_busy)?;
    let mut progress = BarProgress::new();

    let report = session.erase_with_progress(&mut progress)?;
    if !report.busy_timeouts.is_empty() {
        println!(
            "Erase complete ({} busy timeouts tolerated)",
            report.busy_timeouts.len()
        );
    } else {
        println!("Erase complete");
    }
    Ok(())
}

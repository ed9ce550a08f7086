//! Verify command implementation

use rcpld_core::device::DeviceCatalog;
use rcpld_core::jed::JedReader;
use std::path::Path;

use super::program::check_verify;
use super::{open_session, BarProgress};
use crate::oplock::{Operation, StateDir};

/// Compare the device against a JED file
pub fn run_verify(
    programmer: &str,
    catalog: &DeviceCatalog,
    state: &StateDir,
    input: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let _guard = state.begin(Operation::Verify)?;

    let mut jed = JedReader::open(input)
        .map_err(|e| format!("Failed to open {}: {}", input.display(), e))?;
    let mut session = open_session(programmer, catalog, false)?;
    let mut progress = BarProgress::new();

    let report = session.verify_with_progress(&mut jed, &mut progress)?;
    check_verify(&report)
}

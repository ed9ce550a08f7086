//! Manifest command implementation

use rcpld_core::manifest::{self, Manifest};
use std::path::Path;

/// Print an image MANIFEST and check it against the running machine
///
/// The running machine is `machine` if given, otherwise the one named in
/// `os_release`.
pub fn run_manifest(
    file: &Path,
    machine: Option<&str>,
    os_release: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let manifest = Manifest::from_file(file)?;

    println!("Version: {}", manifest.version()?);
    println!("Id:      {}", manifest.id()?);
    println!("Purpose: {}", manifest.purpose()?);
    println!("Machine: {}", manifest.machine().unwrap_or("(any)"));

    let running = match machine {
        Some(running) => running.to_string(),
        None => manifest::running_machine(os_release).map_err(|e| {
            format!(
                "Unable to find the running machine in {}: {}",
                os_release.display(),
                e
            )
        })?,
    };
    manifest.check_machine(&running)?;
    println!("Image matches machine {}", running);
    Ok(())
}

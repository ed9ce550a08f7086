//! rcpld - Lattice CPLD/FPGA programmer
//!
//! Erases, programs and verifies LC4064V, LCMXO2280C and LCMXO2-7000HE
//! devices over JTAG from JEDEC `.jed` fuse maps.
//!
//! # Architecture
//!
//! The CLI opens a JTAG transport by programmer name (the Aspeed BMC JTAG
//! controller or the emulated `dummy` device), identifies the device by its
//! IDCODE and hands it to the family's ISP flow in `rcpld-core`. Device
//! operations are serialized through marker files in the state directory.

mod cli;
mod commands;
mod oplock;
mod programmers;

use clap::Parser;
use cli::{Cli, Commands};
use oplock::StateDir;
use rcpld_core::device::DeviceCatalog;
use std::path::{Path, PathBuf};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let catalog = match load_device_catalog(cli.device_db.as_deref()) {
        Ok(catalog) => catalog,
        Err(e) => {
            eprintln!("Failed to load device catalog: {}", e);
            std::process::exit(1);
        }
    };

    log::debug!("Loaded {} device definitions", catalog.len());

    let state = StateDir::new(cli.state_dir);
    log::debug!("State directory {}", state.path().display());

    let result = match cli.command {
        Commands::Probe { programmer } => commands::run_probe(&programmer, &catalog),
        Commands::Erase {
            programmer,
            strict_busy,
        } => commands::run_erase(&programmer, &catalog, &state, strict_busy),
        Commands::Program {
            programmer,
            input,
            no_verify,
            no_erase,
            strict_busy,
        } => commands::run_program(
            &programmer,
            &catalog,
            &state,
            &input,
            commands::ProgramOptions {
                erase: !no_erase,
                verify: !no_verify,
                strict_busy,
            },
        ),
        Commands::Verify { programmer, input } => {
            commands::run_verify(&programmer, &catalog, &state, &input)
        }
        Commands::Status => {
            commands::run_status(&state);
            Ok(())
        }
        Commands::ListDevices => {
            commands::list_devices(&catalog);
            Ok(())
        }
        Commands::ListProgrammers => {
            commands::list_programmers();
            Ok(())
        }
        Commands::Manifest {
            file,
            machine,
            os_release,
        } => commands::run_manifest(&file, machine.as_deref(), &os_release),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Build the device catalog
///
/// The built-in devices are always present; definitions loaded from disk
/// override them by IDCODE.
fn load_device_catalog(path: Option<&Path>) -> Result<DeviceCatalog, Box<dyn std::error::Error>> {
    let mut catalog = DeviceCatalog::builtin();

    if let Some(path) = path {
        // User specified a path
        if path.is_dir() {
            catalog.load_dir(path)?;
        } else if path.is_file() {
            catalog.load_file(path)?;
        } else {
            return Err(format!("Device catalog path not found: {}", path.display()).into());
        }
    } else {
        // Try default locations
        let default_paths = [
            PathBuf::from("devices"),
            PathBuf::from("/usr/share/rcpld/devices"),
        ];

        for dir in &default_paths {
            if dir.is_dir() {
                match catalog.load_dir(dir) {
                    Ok(count) => log::debug!("Loaded {} devices from {}", count, dir.display()),
                    Err(e) => log::warn!("Failed to load devices from {}: {}", dir.display(), e),
                }
            }
        }
    }

    Ok(catalog)
}

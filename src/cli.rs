//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Default directory for operation markers and result files
pub const DEFAULT_STATE_DIR: &str = "/tmp/rcpld";

const PROGRAMMER_HELP: &str =
    "Programmer to use, as name[:key=value,...] (see list-programmers)";

#[derive(Parser)]
#[command(name = "rcpld")]
#[command(author, version, about = "Lattice CPLD/FPGA JTAG programmer", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to a device catalog file or directory (contains .ron files)
    /// Defaults to the built-in catalog plus ./devices/ and /usr/share/rcpld/devices/
    #[arg(long, global = true)]
    pub device_db: Option<PathBuf>,

    /// Directory holding operation markers and result files
    #[arg(long, global = true, default_value = DEFAULT_STATE_DIR)]
    pub state_dir: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Identify the device on the JTAG chain
    Probe {
        #[arg(short, long, help = PROGRAMMER_HELP)]
        programmer: String,
    },

    /// Erase the device
    Erase {
        #[arg(short, long, help = PROGRAMMER_HELP)]
        programmer: String,

        /// Fail when a busy poll times out instead of warning
        #[arg(long)]
        strict_busy: bool,
    },

    /// Program a JED file into the device
    Program {
        #[arg(short, long, help = PROGRAMMER_HELP)]
        programmer: String,

        /// JEDEC fuse map (.jed)
        #[arg(short, long)]
        input: PathBuf,

        /// Skip the final verify pass
        #[arg(long)]
        no_verify: bool,

        /// Skip the stand-alone erase before programming
        #[arg(long)]
        no_erase: bool,

        /// Fail when a busy poll times out instead of warning
        #[arg(long)]
        strict_busy: bool,
    },

    /// Compare the device with a JED file
    Verify {
        #[arg(short, long, help = PROGRAMMER_HELP)]
        programmer: String,

        /// JEDEC fuse map (.jed)
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Show the running operation and the last erase/program results
    Status,

    /// List devices in the catalog
    ListDevices,

    /// List available programmers
    ListProgrammers,

    /// Show the contents of an update image MANIFEST
    Manifest {
        /// MANIFEST file
        #[arg(short, long)]
        file: PathBuf,

        /// Check the image's machine name against this one instead of the
        /// machine named in the os-release file
        #[arg(long)]
        machine: Option<String>,

        /// os-release file naming the running machine
        #[arg(long, default_value = rcpld_core::manifest::DEFAULT_OS_RELEASE)]
        os_release: PathBuf,
    },
}

//! Programmer registration and dispatch
//!
//! This module provides a centralized registry for all JTAG programmers, with
//! support for feature-gated inclusion and dynamic help text generation.

use rcpld_core::device::DeviceCatalog;
use rcpld_core::jtag::JtagMaster;

/// Information about a programmer
pub struct ProgrammerInfo {
    /// Primary name (used for matching)
    pub name: &'static str,
    /// Alternative names/aliases
    pub aliases: &'static [&'static str],
    /// Short description
    pub description: &'static str,
}

/// Get information about all available programmers (enabled at compile time)
#[allow(unused_mut, clippy::vec_init_then_push)]
pub fn available_programmers() -> Vec<ProgrammerInfo> {
    let mut programmers = Vec::new();

    #[cfg(feature = "dummy")]
    programmers.push(ProgrammerInfo {
        name: "dummy",
        aliases: &[],
        description: "Emulated device for testing (device=<family|name>,stuck_busy=1,fail_status=1,corrupt_row=<n>)",
    });

    #[cfg(feature = "linux-jtag")]
    programmers.push(ProgrammerInfo {
        name: "aspeed",
        aliases: &["aspeed_jtag", "ast-jtag"],
        description: "Aspeed BMC JTAG controller (dev=/dev/1e6e4000.jtag,mode=<hw|sw>,freq=<Hz>)",
    });

    programmers
}

/// Generate help text listing all available programmers
pub fn programmer_help() -> String {
    let programmers = available_programmers();

    if programmers.is_empty() {
        return "No programmers available (recompile with programmer features enabled)".to_string();
    }

    let mut help = String::from("Available programmers:\n");
    for p in &programmers {
        help.push_str(&format!("  {:8} - {}\n", p.name, p.description));
    }
    help
}

/// Resolve a programmer name or alias to its primary name
pub fn find_programmer(name: &str) -> Option<&'static str> {
    available_programmers()
        .into_iter()
        .find(|p| p.name == name || p.aliases.contains(&name))
        .map(|p| p.name)
}

/// Open the programmer named by `programmer`
///
/// The programmer string can be just the name (e.g., "aspeed") or include
/// parameters (e.g., "aspeed:dev=/dev/1e6e4000.jtag,freq=1000000").
#[allow(unused_variables)]
pub fn open_programmer(
    programmer: &str,
    catalog: &DeviceCatalog,
) -> Result<Box<dyn JtagMaster>, Box<dyn std::error::Error>> {
    let (name, options) = parse_programmer_string(programmer);

    let canonical_name = match find_programmer(name) {
        Some(n) => n,
        None => return Err(unknown_programmer_error(name)),
    };

    match canonical_name {
        #[cfg(feature = "dummy")]
        "dummy" => {
            let config = dummy_config(&options, catalog)
                .map_err(|e| format!("Invalid dummy parameters: {}", e))?;
            log::info!(
                "Opening dummy programmer emulating {} (IDCODE 0x{:08X})",
                config.family,
                config.idcode
            );
            Ok(Box::new(rcpld_dummy::DummyCpld::new(config)))
        }

        #[cfg(feature = "linux-jtag")]
        "aspeed" => {
            log::info!("Opening Aspeed JTAG programmer...");
            rcpld_linux_jtag::open_aspeed_jtag(&options).map_err(|e| {
                Box::<dyn std::error::Error>::from(format!(
                    "Failed to open Aspeed JTAG device: {}\n\
                     Make sure the ast-jtag driver is loaded and you have read/write permissions.",
                    e
                ))
            })
        }

        _ => Err(unknown_programmer_error(name)),
    }
}

/// Build an emulator configuration from programmer options
#[cfg(feature = "dummy")]
fn dummy_config(
    options: &[(&str, &str)],
    catalog: &DeviceCatalog,
) -> Result<rcpld_dummy::DummyConfig, String> {
    use rcpld_core::device::Family;

    let device_name = options
        .iter()
        .find(|(k, _)| *k == "device")
        .map(|(_, v)| *v)
        .unwrap_or(Family::Lcmxo2_7000he.id());

    let device = match Family::from_id(device_name) {
        Some(family) => catalog.iter().find(|d| d.family == family),
        None => catalog.find_by_name(device_name).into_iter().next(),
    }
    .ok_or_else(|| format!("unknown device {}", device_name))?;

    let mut config = rcpld_dummy::DummyConfig::for_device(device);
    for (key, value) in options {
        match *key {
            "device" => {}
            "stuck_busy" => config.stuck_busy = parse_flag(value)?,
            "fail_status" => config.fail_status = parse_flag(value)?,
            "corrupt_row" => {
                let row = value
                    .parse()
                    .map_err(|_| format!("Invalid corrupt_row value: {}", value))?;
                config.corrupt_row = Some(row);
            }
            "idcode" => config.idcode = parse_hex_u32(value)?,
            _ => log::warn!("dummy: Unknown option: {}={}", key, value),
        }
    }
    Ok(config)
}

#[cfg(feature = "dummy")]
fn parse_flag(value: &str) -> Result<bool, String> {
    match value {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(format!("Invalid flag value: {}", value)),
    }
}

/// Parse a string as a hex or decimal u32
#[cfg(feature = "dummy")]
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u32>().map_err(|e| format!("Invalid number: {}", e))
    }
}

/// Parse a programmer string into name and options
///
/// Format: "name" or "name:option1=value1,option2=value2"
pub fn parse_programmer_string(s: &str) -> (&str, Vec<(&str, &str)>) {
    if let Some((name, opts)) = s.split_once(':') {
        let options: Vec<_> = opts
            .split(',')
            .filter_map(|opt| opt.split_once('='))
            .collect();
        (name, options)
    } else {
        (s, Vec::new())
    }
}

fn unknown_programmer_error(name: &str) -> Box<dyn std::error::Error> {
    let mut msg = format!("Unknown programmer: {}\n\n", name);
    msg.push_str(&programmer_help());
    msg.push_str("\nUse 'rcpld list-programmers' for more details");
    msg.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_programmer_string() {
        assert_eq!(parse_programmer_string("aspeed"), ("aspeed", vec![]));
        assert_eq!(
            parse_programmer_string("aspeed:dev=/dev/jtag0,freq=1000000"),
            ("aspeed", vec![("dev", "/dev/jtag0"), ("freq", "1000000")])
        );
        assert_eq!(
            parse_programmer_string("dummy:device=lc4064v,bogus"),
            ("dummy", vec![("device", "lc4064v")])
        );
    }

    #[test]
    fn test_unknown_programmer() {
        let catalog = DeviceCatalog::builtin();
        assert_eq!(find_programmer("ch341a"), None);
        assert!(open_programmer("ch341a", &catalog).is_err());
    }

    #[cfg(feature = "dummy")]
    #[test]
    fn test_dummy_config() {
        let catalog = DeviceCatalog::builtin();
        let config = dummy_config(&[("device", "lc4064v"), ("corrupt_row", "5")], &catalog).unwrap();
        assert_eq!(config.idcode, 0x0180_9043);
        assert_eq!(config.corrupt_row, Some(5));

        let config = dummy_config(&[("device", "LCMXO2280C"), ("stuck_busy", "1")], &catalog).unwrap();
        assert_eq!(config.rows, 1080);
        assert!(config.stuck_busy);

        assert!(dummy_config(&[("device", "ecp5")], &catalog).is_err());
        assert!(dummy_config(&[("idcode", "0xZZ")], &catalog).is_err());
    }
}

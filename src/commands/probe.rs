//! Probe command implementation

use rcpld_core::device::DeviceCatalog;

use super::open_session;

/// Identify the device on the chain and print its geometry
pub fn run_probe(programmer: &str, catalog: &DeviceCatalog) -> Result<(), Box<dyn std::error::Error>> {
    let session = open_session(programmer, catalog, false)?;
    let device = session.device();

    println!("  Family:  {}", device.family);
    println!("  Rows:    {}", device.row_num);
    println!("  Row:     {} bits", device.dr_bits);
    println!("  Fuses:   {} bits", device.config_bits());
    Ok(())
}

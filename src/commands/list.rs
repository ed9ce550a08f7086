//! List commands implementation

use rcpld_core::device::DeviceCatalog;

use crate::programmers;

/// List all available programmers
pub fn list_programmers() {
    println!("Supported programmers:");
    println!();
    for p in programmers::available_programmers() {
        if p.aliases.is_empty() {
            println!("  {:8} - {}", p.name, p.description);
        } else {
            println!(
                "  {:8} - {} (aliases: {})",
                p.name,
                p.description,
                p.aliases.join(", ")
            );
        }
    }
}

/// List all devices in the catalog
pub fn list_devices(catalog: &DeviceCatalog) {
    println!("Supported devices:");
    println!();
    println!(
        "{:<16} {:<14} {:>10} {:>6} {:>9}",
        "Name", "Family", "IDCODE", "Rows", "Row bits"
    );
    println!("{}", "-".repeat(59));

    for device in catalog.iter() {
        println!(
            "{:<16} {:<14} {:>10} {:>6} {:>9}",
            device.name,
            device.family.id(),
            format!("{:08X}", device.idcode),
            device.row_num,
            device.dr_bits
        );
    }
}

//! Supported devices and the IDCODE catalog
//!
//! Every device belongs to a [`Family`], which selects the programming
//! algorithm. The descriptor only carries the geometry the algorithm needs:
//! the width of one configuration row and how many rows there are.

mod catalog;

pub use catalog::{CatalogError, DeviceCatalog};

use std::fmt;

/// Programming algorithm family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize)]
pub enum Family {
    /// ispMACH 4000V CPLDs
    Lc4064v,
    /// MachXO CPLDs
    Lcmxo2280c,
    /// MachXO2 flash-based FPGAs
    #[allow(non_camel_case_types)]
    Lcmxo2_7000he,
}

impl Family {
    /// All families, in catalog order
    pub const ALL: [Family; 3] = [Family::Lc4064v, Family::Lcmxo2280c, Family::Lcmxo2_7000he];

    /// Short lowercase identifier, as used on the command line
    pub fn id(self) -> &'static str {
        match self {
            Family::Lc4064v => "lc4064v",
            Family::Lcmxo2280c => "lcmxo2280c",
            Family::Lcmxo2_7000he => "lcmxo2-7000he",
        }
    }

    /// Parse a [`Family::id`] string (case-insensitive)
    pub fn from_id(id: &str) -> Option<Family> {
        Family::ALL
            .into_iter()
            .find(|f| f.id().eq_ignore_ascii_case(id))
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// A device the programmer knows how to drive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Marketing name, e.g. "LCMXO2-7000HE"
    pub name: String,
    /// 32-bit JTAG IDCODE
    pub idcode: u32,
    /// Programming algorithm
    pub family: Family,
    /// Bits per configuration row
    pub dr_bits: u32,
    /// Configuration rows
    pub row_num: u32,
}

impl DeviceDescriptor {
    /// Total configuration bits
    pub fn config_bits(&self) -> u64 {
        u64::from(self.dr_bits) * u64::from(self.row_num)
    }
}

/// Devices compiled into the catalog
pub(crate) const BUILTIN_DEVICES: &[(&str, u32, Family, u32, u32)] = &[
    ("LC4064V", 0x0180_9043, Family::Lc4064v, 352, 95),
    ("LCMXO2280C", 0x0128_D043, Family::Lcmxo2280c, 556, 1080),
    ("LCMXO2-7000HE", 0x012B_5043, Family::Lcmxo2_7000he, 128, 9212),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_ids() {
        for family in Family::ALL {
            assert_eq!(Family::from_id(family.id()), Some(family));
        }
        assert_eq!(Family::from_id("LCMXO2-7000HE"), Some(Family::Lcmxo2_7000he));
        assert_eq!(Family::from_id("ecp5"), None);
    }

    #[test]
    fn test_config_bits() {
        let dev = DeviceDescriptor {
            name: "LC4064V".into(),
            idcode: 0x0180_9043,
            family: Family::Lc4064v,
            dr_bits: 352,
            row_num: 95,
        };
        assert_eq!(dev.config_bits(), 33_440);
    }
}

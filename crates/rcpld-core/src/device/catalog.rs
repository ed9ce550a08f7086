//! Device catalog for runtime loading and lookup
//!
//! The built-in table covers the supported parts. Additional or corrected
//! entries can be loaded from RON files:
//!
//! ```ron
//! (
//!     devices: [
//!         (name: "LCMXO2-7000HE", idcode: 0x012B5043, family: Lcmxo2_7000he,
//!          dr_bits: 128, row_num: 9212),
//!     ],
//! )
//! ```

use std::fs;
use std::io;
use std::path::Path;

use super::{DeviceDescriptor, Family, BUILTIN_DEVICES};

/// Error type for catalog operations
#[derive(Debug)]
pub enum CatalogError {
    /// I/O error reading files
    Io(io::Error),
    /// RON parsing error
    Parse(ron::error::SpannedError),
    /// Validation error
    Validation(String),
}

impl From<io::Error> for CatalogError {
    fn from(e: io::Error) -> Self {
        CatalogError::Io(e)
    }
}

impl From<ron::error::SpannedError> for CatalogError {
    fn from(e: ron::error::SpannedError) -> Self {
        CatalogError::Parse(e)
    }
}

impl std::fmt::Display for CatalogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogError::Io(e) => write!(f, "I/O error: {}", e),
            CatalogError::Parse(e) => write!(f, "Parse error: {}", e),
            CatalogError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for CatalogError {}

// ============================================================================
// RON deserialization types
// ============================================================================

#[derive(Debug, Clone, serde::Deserialize)]
struct DeviceDef {
    name: String,
    idcode: u32,
    family: Family,
    dr_bits: u32,
    row_num: u32,
}

impl TryFrom<DeviceDef> for DeviceDescriptor {
    type Error = CatalogError;

    fn try_from(def: DeviceDef) -> Result<Self, Self::Error> {
        if def.dr_bits == 0 {
            return Err(CatalogError::Validation(format!(
                "{}: dr_bits must be non-zero",
                def.name
            )));
        }
        if def.row_num == 0 {
            return Err(CatalogError::Validation(format!(
                "{}: row_num must be non-zero",
                def.name
            )));
        }
        Ok(DeviceDescriptor {
            name: def.name,
            idcode: def.idcode,
            family: def.family,
            dr_bits: def.dr_bits,
            row_num: def.row_num,
        })
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
struct CatalogDef {
    devices: Vec<DeviceDef>,
}

// ============================================================================
// Catalog
// ============================================================================

/// IDCODE-indexed table of supported devices
#[derive(Debug, Clone, Default)]
pub struct DeviceCatalog {
    devices: Vec<DeviceDescriptor>,
}

impl DeviceCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
        }
    }

    /// Create a catalog holding the built-in devices
    pub fn builtin() -> Self {
        let devices = BUILTIN_DEVICES
            .iter()
            .map(|&(name, idcode, family, dr_bits, row_num)| DeviceDescriptor {
                name: name.to_string(),
                idcode,
                family,
                dr_bits,
                row_num,
            })
            .collect();
        Self { devices }
    }

    /// Add a device, replacing any entry with the same IDCODE
    pub fn insert(&mut self, device: DeviceDescriptor) {
        if let Some(slot) = self.devices.iter_mut().find(|d| d.idcode == device.idcode) {
            log::debug!(
                "catalog: {} replaces {} for IDCODE 0x{:08X}",
                device.name,
                slot.name,
                device.idcode
            );
            *slot = device;
        } else {
            self.devices.push(device);
        }
    }

    /// Load device definitions from a single RON file
    pub fn load_file(&mut self, path: &Path) -> Result<usize, CatalogError> {
        let content = fs::read_to_string(path)?;
        self.load_ron(&content)
    }

    /// Load device definitions from a RON string
    ///
    /// The whole file is validated before any entry is added.
    pub fn load_ron(&mut self, content: &str) -> Result<usize, CatalogError> {
        let def: CatalogDef = ron::from_str(content)?;
        let devices = def
            .devices
            .into_iter()
            .map(DeviceDescriptor::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        for (i, dev) in devices.iter().enumerate() {
            if devices[..i].iter().any(|d| d.idcode == dev.idcode) {
                return Err(CatalogError::Validation(format!(
                    "duplicate IDCODE 0x{:08X} ({})",
                    dev.idcode, dev.name
                )));
            }
        }

        let count = devices.len();
        for dev in devices {
            self.insert(dev);
        }
        Ok(count)
    }

    /// Load all RON files from a directory
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize, CatalogError> {
        let mut total = 0;

        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();

            if path.extension().is_some_and(|ext| ext == "ron") {
                total += self.load_file(&path)?;
            }
        }

        Ok(total)
    }

    /// Get all devices in the catalog
    pub fn devices(&self) -> &[DeviceDescriptor] {
        &self.devices
    }

    /// Get the number of devices in the catalog
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Check if the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Find the device with exactly this IDCODE
    pub fn lookup(&self, idcode: u32) -> Option<&DeviceDescriptor> {
        self.devices.iter().find(|d| d.idcode == idcode)
    }

    /// Find devices by name (case-insensitive partial match)
    pub fn find_by_name(&self, name: &str) -> Vec<&DeviceDescriptor> {
        let name_lower = name.to_lowercase();
        self.devices
            .iter()
            .filter(|d| d.name.to_lowercase().contains(&name_lower))
            .collect()
    }

    /// Iterate over all devices
    pub fn iter(&self) -> impl Iterator<Item = &DeviceDescriptor> {
        self.devices.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup() {
        let db = DeviceCatalog::builtin();
        assert_eq!(db.len(), 3);

        let dev = db.lookup(0x012B_5043).unwrap();
        assert_eq!(dev.name, "LCMXO2-7000HE");
        assert_eq!(dev.family, Family::Lcmxo2_7000he);
        assert_eq!(dev.dr_bits, 128);
        assert_eq!(dev.row_num, 9212);

        assert_eq!(db.lookup(0x0128_D043).unwrap().dr_bits, 556);
        assert!(db.lookup(0xDEAD_BEEF).is_none());
        // Version nibble is part of the match
        assert!(db.lookup(0x1128_D043).is_none());
    }

    #[test]
    fn test_load_ron() {
        let ron = r#"
        (
            devices: [
                (
                    name: "LCMXO2-7000HE-B",
                    idcode: 0x012B5043,
                    family: Lcmxo2_7000he,
                    dr_bits: 128,
                    row_num: 9212,
                ),
                (
                    name: "LC4064V-TEST",
                    idcode: 0x0180A043,
                    family: Lc4064v,
                    dr_bits: 352,
                    row_num: 95,
                ),
            ],
        )
        "#;

        let mut db = DeviceCatalog::builtin();
        let count = db.load_ron(ron).unwrap();

        assert_eq!(count, 2);
        assert_eq!(db.len(), 4);
        assert_eq!(db.lookup(0x012B_5043).unwrap().name, "LCMXO2-7000HE-B");
        assert_eq!(db.find_by_name("lc4064v").len(), 2);
    }

    #[test]
    fn test_shipped_catalog_matches_builtin() {
        let mut db = DeviceCatalog::new();
        db.load_ron(include_str!("../../../../devices/lattice.ron"))
            .unwrap();
        let builtin = DeviceCatalog::builtin();
        assert_eq!(db.devices(), builtin.devices());
    }

    #[test]
    fn test_validation() {
        let mut db = DeviceCatalog::new();
        let zero_rows = r#"(devices: [(name: "X", idcode: 1, family: Lc4064v, dr_bits: 8, row_num: 0)])"#;
        assert!(matches!(
            db.load_ron(zero_rows),
            Err(CatalogError::Validation(_))
        ));

        let dup = r#"(devices: [
            (name: "A", idcode: 1, family: Lc4064v, dr_bits: 8, row_num: 1),
            (name: "B", idcode: 1, family: Lc4064v, dr_bits: 8, row_num: 1),
        ])"#;
        assert!(matches!(db.load_ron(dup), Err(CatalogError::Validation(_))));
        assert!(db.is_empty());

        assert!(matches!(
            db.load_ron("(devices: [(name: \"X\")])"),
            Err(CatalogError::Parse(_))
        ));
    }
}

//! Firmware image MANIFEST files
//!
//! A CPLD update image ships with a MANIFEST of `key=value` lines naming the
//! image version, its purpose and the machine it was built for. Lines may
//! end in CRLF. When a key appears more than once the first line wins.
//!
//! Images are named by an id derived from their version string, and are only
//! accepted on the machine named in the BMC's os-release file.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use sha2::{Digest, Sha512};
use thiserror::Error;

/// os-release file naming the running BMC machine
pub const DEFAULT_OS_RELEASE: &str = "/etc/os-release";

const MACHINE_KEY: &str = "OPENBMC_TARGET_MACHINE=";

/// Errors reading or checking a manifest
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The manifest file could not be read
    #[error("failed to read manifest: {0}")]
    Io(#[from] std::io::Error),
    /// A required key is absent or empty
    #[error("manifest has no {0}")]
    MissingKey(&'static str),
    /// The image was built for another machine
    #[error("machine name mismatch: running on {running}, image is for {image}")]
    MachineMismatch {
        /// Machine the tool runs on
        running: String,
        /// Machine named in the manifest
        image: String,
    },
}

/// What an image is meant to update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Purpose {
    /// Unrecognised purpose string
    #[default]
    Unknown,
    /// BMC firmware
    Bmc,
    /// Host firmware
    Host,
    /// Whole-system image
    System,
    /// Anything else, CPLD images included
    Other,
}

impl FromStr for Purpose {
    type Err = ();

    /// Accepts both bare names and fully qualified D-Bus enum strings such as
    /// `xyz.openbmc_project.Software.Version.VersionPurpose.Other`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.rsplit('.').next().unwrap_or(s);
        match name {
            "Unknown" => Ok(Purpose::Unknown),
            "BMC" => Ok(Purpose::Bmc),
            "Host" => Ok(Purpose::Host),
            "System" => Ok(Purpose::System),
            "Other" => Ok(Purpose::Other),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Purpose::Unknown => "Unknown",
            Purpose::Bmc => "BMC",
            Purpose::Host => "Host",
            Purpose::System => "System",
            Purpose::Other => "Other",
        };
        f.write_str(name)
    }
}

/// A parsed MANIFEST
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<(String, String)>,
}

impl Manifest {
    /// Parse manifest text
    ///
    /// Lines without `=` are ignored.
    pub fn parse(content: &str) -> Self {
        let entries = content
            .lines()
            .map(|line| line.strip_suffix('\r').unwrap_or(line))
            .filter_map(|line| line.split_once('='))
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Self { entries }
    }

    /// Read and parse a manifest file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ManifestError> {
        Ok(Self::parse(&fs::read_to_string(path)?))
    }

    /// Value of the first line with `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Image version; required
    pub fn version(&self) -> Result<&str, ManifestError> {
        self.get("version")
            .filter(|v| !v.is_empty())
            .ok_or(ManifestError::MissingKey("version"))
    }

    /// Image purpose; required, unrecognised strings map to [`Purpose::Unknown`]
    pub fn purpose(&self) -> Result<Purpose, ManifestError> {
        let raw = self
            .get("purpose")
            .filter(|v| !v.is_empty())
            .ok_or(ManifestError::MissingKey("purpose"))?;
        Ok(raw.parse().unwrap_or_else(|()| {
            log::warn!("Unrecognised manifest purpose {:?}, using Unknown", raw);
            Purpose::Unknown
        }))
    }

    /// Image id: the first 8 hex digits of the SHA-512 of the version
    pub fn id(&self) -> Result<String, ManifestError> {
        Ok(version_id(self.version()?))
    }

    /// Target machine, if the manifest names one
    pub fn machine(&self) -> Option<&str> {
        self.get("MachineName").filter(|v| !v.is_empty())
    }

    /// Check the target machine against the running one
    ///
    /// A manifest without a machine name matches any machine.
    pub fn check_machine(&self, running: &str) -> Result<(), ManifestError> {
        match self.machine() {
            Some(image) if image != running => Err(ManifestError::MachineMismatch {
                running: running.to_string(),
                image: image.to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                log::warn!("No machine name in manifest file");
                Ok(())
            }
        }
    }
}

/// Id of an image with version `version`
pub fn version_id(version: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(version.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..8].to_string()
}

/// Machine the BMC runs on, from its os-release file
pub fn running_machine<P: AsRef<Path>>(os_release: P) -> Result<String, ManifestError> {
    let content = fs::read_to_string(os_release)?;
    parse_machine(&content).ok_or(ManifestError::MissingKey("OPENBMC_TARGET_MACHINE"))
}

/// Value of `OPENBMC_TARGET_MACHINE`, with any quotes removed
fn parse_machine(os_release: &str) -> Option<String> {
    os_release
        .lines()
        .find_map(|line| line.strip_prefix(MACHINE_KEY))
        .map(|value| value.trim().trim_matches('"').to_string())
        .filter(|machine| !machine.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "purpose=xyz.openbmc_project.Software.Version.VersionPurpose.Other\r\n\
                          version=2.1.0\r\n\
                          MachineName=ast2500\r\n\
                          version=9.9.9\r\n";

    #[test]
    fn test_parse() {
        let m = Manifest::parse(SAMPLE);
        assert_eq!(m.version().unwrap(), "2.1.0");
        assert_eq!(m.purpose().unwrap(), Purpose::Other);
        assert_eq!(m.machine(), Some("ast2500"));
        assert_eq!(m.get("missing"), None);
    }

    #[test]
    fn test_missing_keys() {
        let m = Manifest::parse("version=\nnoise line\n");
        assert!(matches!(m.version(), Err(ManifestError::MissingKey("version"))));
        assert!(matches!(m.purpose(), Err(ManifestError::MissingKey("purpose"))));
        assert_eq!(m.machine(), None);
        assert!(m.check_machine("anything").is_ok());
    }

    #[test]
    fn test_unknown_purpose() {
        let m = Manifest::parse("purpose=Firmware\n");
        assert_eq!(m.purpose().unwrap(), Purpose::Unknown);
        assert_eq!("BMC".parse::<Purpose>(), Ok(Purpose::Bmc));
    }

    #[test]
    fn test_version_id() {
        assert_eq!(version_id("abc"), "ddaf35a1");
        let m = Manifest::parse("version=abc\n");
        assert_eq!(m.id().unwrap(), "ddaf35a1");
        assert!(matches!(
            Manifest::parse("purpose=Other\n").id(),
            Err(ManifestError::MissingKey("version"))
        ));
    }

    #[test]
    fn test_parse_machine() {
        let os_release = "ID=openbmc-phosphor\n\
                          NAME=\"Phosphor OpenBMC\"\n\
                          OPENBMC_TARGET_MACHINE=\"ast2500\"\n";
        assert_eq!(parse_machine(os_release).as_deref(), Some("ast2500"));
        assert_eq!(
            parse_machine("OPENBMC_TARGET_MACHINE=evb-ast2600\n").as_deref(),
            Some("evb-ast2600")
        );
        assert_eq!(parse_machine("ID=debian\nVERSION_ID=\"12\"\n"), None);
        assert_eq!(parse_machine("OPENBMC_TARGET_MACHINE=\"\"\n"), None);
    }

    #[test]
    fn test_running_machine_missing_file() {
        let path = std::env::temp_dir().join("rcpld-no-such-os-release");
        assert!(matches!(running_machine(&path), Err(ManifestError::Io(_))));
    }

    #[test]
    fn test_check_machine() {
        let m = Manifest::parse(SAMPLE);
        assert!(m.check_machine("ast2500").is_ok());
        let err = m.check_machine("ast2600").unwrap_err();
        assert_eq!(
            err.to_string(),
            "machine name mismatch: running on ast2600, image is for ast2500"
        );
    }
}

//! Firmware artifacts ready to be flashed.
//!
//! An artifact is a validated on-disk image plus where it came from. Both
//! source paths (local file, store download) funnel into the same type so
//! the flash driver never cares about provenance.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use semver::Version;

use crate::error::{Result, UpgradeError};

/// Where a firmware artifact came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provenance {
    /// Pre-provisioned file from the local assets tree.
    Local,
    /// Downloaded from the artifact store.
    Remote {
        /// Resolved release version.
        version: Version,
        /// Release file name from the metadata document.
        file: String,
    },
}

/// A firmware image on disk, validated and ready to flash.
#[derive(Debug, Clone)]
pub struct FirmwareArtifact {
    path: PathBuf,
    size: u64,
    provenance: Provenance,
}

impl FirmwareArtifact {
    /// Wrap a pre-provisioned local image.
    ///
    /// The file must exist and be non-empty; anything else is
    /// [`UpgradeError::FirmwareNotFound`]. Local mode never falls back to
    /// a download, so a missing file ends the run here.
    pub fn from_local(path: &Path) -> Result<Self> {
        let missing = || UpgradeError::FirmwareNotFound {
            path: path.to_path_buf(),
        };
        let meta = fs::metadata(path).map_err(|_| missing())?;
        if !meta.is_file() || meta.len() == 0 {
            return Err(missing());
        }
        Ok(Self {
            path: path.to_path_buf(),
            size: meta.len(),
            provenance: Provenance::Local,
        })
    }

    /// Persist a downloaded payload and wrap it.
    ///
    /// The payload has already passed the integrity checks; this only puts
    /// the bytes somewhere the programmer can read them.
    pub fn from_download(
        path: &Path,
        payload: &[u8],
        version: Version,
        file: String,
    ) -> Result<Self> {
        if payload.is_empty() {
            return Err(UpgradeError::IntegrityCheckFailed {
                file,
                detail: "downloaded payload is empty".into(),
            });
        }
        fs::write(path, payload).map_err(|source| UpgradeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            size: payload.len() as u64,
            provenance: Provenance::Remote { version, file },
        })
    }

    /// Path the programmer tool reads the image from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Image size in bytes. This is the byte count a full verify pass must
    /// cover, regardless of which board it is flashed onto.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Provenance of the image.
    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    /// Number of flash pages the image occupies, rounding up the tail.
    pub fn page_count(&self, page_size: u32) -> u64 {
        let page = u64::from(page_size);
        self.size.div_ceil(page)
    }
}

impl fmt::Display for FirmwareArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.provenance {
            Provenance::Local => {
                write!(f, "{} ({} bytes, local)", self.path.display(), self.size)
            }
            Provenance::Remote { version, .. } => {
                write!(f, "{} ({} bytes, v{})", self.path.display(), self.size, version)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_local_file_is_firmware_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("firmware.bin");
        let err = FirmwareArtifact::from_local(&path).unwrap_err();
        assert!(matches!(err, UpgradeError::FirmwareNotFound { .. }));
    }

    #[test]
    fn empty_local_file_is_firmware_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("firmware.bin");
        fs::write(&path, b"").unwrap();
        let err = FirmwareArtifact::from_local(&path).unwrap_err();
        assert!(matches!(err, UpgradeError::FirmwareNotFound { .. }));
    }

    #[test]
    fn local_file_reports_its_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("firmware.bin");
        fs::write(&path, vec![0xA5u8; 12204]).unwrap();
        let artifact = FirmwareArtifact::from_local(&path).unwrap();
        assert_eq!(artifact.size(), 12204);
        assert_eq!(artifact.provenance(), &Provenance::Local);
    }

    #[test]
    fn page_count_rounds_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("firmware.bin");
        fs::write(&path, vec![0u8; 12204]).unwrap();
        let artifact = FirmwareArtifact::from_local(&path).unwrap();
        // 12204 / 64 = 190.68..., so 191 pages.
        assert_eq!(artifact.page_count(64), 191);

        fs::write(&path, vec![0u8; 128]).unwrap();
        let artifact = FirmwareArtifact::from_local(&path).unwrap();
        assert_eq!(artifact.page_count(64), 2);
    }

    #[test]
    fn download_is_persisted_with_provenance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("battery_fw_v1.2.0.bin");
        let artifact = FirmwareArtifact::from_download(
            &path,
            &[1, 2, 3, 4],
            Version::new(1, 2, 0),
            "battery_fw_v1.2.0.bin".into(),
        )
        .unwrap();
        assert_eq!(artifact.size(), 4);
        assert_eq!(fs::read(&path).unwrap(), vec![1, 2, 3, 4]);
        match artifact.provenance() {
            Provenance::Remote { version, file } => {
                assert_eq!(version, &Version::new(1, 2, 0));
                assert_eq!(file, "battery_fw_v1.2.0.bin");
            }
            other => panic!("expected remote provenance, got {other:?}"),
        }
    }

    #[test]
    fn empty_download_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hub_fw.bin");
        let err = FirmwareArtifact::from_download(
            &path,
            &[],
            Version::new(0, 1, 0),
            "hub_fw.bin".into(),
        )
        .unwrap_err();
        assert!(matches!(err, UpgradeError::IntegrityCheckFailed { .. }));
        assert!(!path.exists());
    }
}

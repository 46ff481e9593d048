//! Artifact store interface and release metadata.
//!
//! The store publishes one metadata document per release plus the binary
//! itself. `latest` is a store-side alias resolved at request time, so the
//! orchestrator only ever handles concrete versions after resolution.

use semver::Version;
use serde::Deserialize;

use crate::error::Result;
use crate::request::DeviceKind;

/// Release metadata document published alongside each firmware binary.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct FirmwareMetadata {
    /// Release version.
    pub version: Version,
    /// File name of the binary within the device's store prefix.
    pub file: String,
    /// Expected size of the binary in bytes.
    pub size: u64,
    /// Expected SHA-256 of the binary, lowercase hex.
    pub sha256: String,
}

/// A source of firmware releases.
///
/// Two phases: [`resolve`](ArtifactStore::resolve) turns "latest" or a
/// pinned version into concrete metadata, then
/// [`fetch`](ArtifactStore::fetch) retrieves the binary. Implementations
/// report transport failures as [`UpgradeError::DownloadFailed`]; payload
/// validation against the metadata happens in the caller.
///
/// [`UpgradeError::DownloadFailed`]: crate::error::UpgradeError::DownloadFailed
pub trait ArtifactStore {
    /// Resolve the release to install for `device`.
    ///
    /// `version` pins a specific release; `None` asks the store for its
    /// current `latest`.
    fn resolve(&self, device: DeviceKind, version: Option<&Version>) -> Result<FirmwareMetadata>;

    /// Fetch the binary described by `meta`.
    ///
    /// `on_progress` is called with (bytes so far, expected total) as the
    /// payload arrives.
    fn fetch(
        &self,
        device: DeviceKind,
        meta: &FirmwareMetadata,
        on_progress: &mut dyn FnMut(u64, u64),
    ) -> Result<Vec<u8>>;
}

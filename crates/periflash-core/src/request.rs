//! The immutable description of one upgrade attempt.
//!
//! Environment and command line are read exactly once at startup and folded
//! into an [`UpgradeRequest`]; the pipeline never consults the environment
//! again after that.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use semver::Version;

/// Default root of the on-robot firmware assets tree.
pub const DEFAULT_ASSETS_DIR: &str = "/data/firmware";

/// Default serial device the peripheral hub/battery board enumerates on.
pub const DEFAULT_PORT: &str = "/dev/ttyACM0";

/// Default per-step wall-clock bound for programmer invocations.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(120);

/// Which peripheral board is being upgraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// The battery management board.
    Battery,
    /// The peripheral hub board.
    Hub,
}

impl DeviceKind {
    /// Lowercase name used in paths, store URLs and log lines.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Battery => "battery",
            Self::Hub => "hub",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the firmware image comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    /// Resolve and download the image from the artifact store.
    Remote,
    /// Use the pre-provisioned image under the assets directory.
    Local,
}

/// Immutable parameters for a single upgrade attempt.
///
/// Built once at startup from CLI arguments and a one-time environment
/// capture. Mode selection is explicit: a missing local file in
/// [`SourceMode::Local`] is an error, never a silent fallback to remote,
/// and vice versa.
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    /// Target board.
    pub device: DeviceKind,
    /// Firmware source selection.
    pub source: SourceMode,
    /// Hardware platform tag from the launch environment (e.g.
    /// `jetson_nano`). Validated during profile selection, not here.
    pub platform_tag: String,
    /// Serial device the programmer talks to.
    pub port: String,
    /// Root of the local firmware assets tree.
    pub assets_dir: PathBuf,
    /// Optional version pin; `None` means "latest".
    pub pinned_version: Option<Version>,
    /// Wall-clock bound applied to each programmer step.
    pub step_timeout: Duration,
    /// When set, stop after the configuration check and report what would
    /// have been flashed without erasing or writing anything.
    pub dry_run: bool,
}

impl UpgradeRequest {
    /// Create a request with the default assets dir, timeout, no version
    /// pin and dry-run off.
    pub fn new(
        device: DeviceKind,
        source: SourceMode,
        platform_tag: impl Into<String>,
        port: impl Into<String>,
    ) -> Self {
        Self {
            device,
            source,
            platform_tag: platform_tag.into(),
            port: port.into(),
            assets_dir: PathBuf::from(DEFAULT_ASSETS_DIR),
            pinned_version: None,
            step_timeout: DEFAULT_STEP_TIMEOUT,
            dry_run: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_names_match_store_layout() {
        assert_eq!(DeviceKind::Battery.as_str(), "battery");
        assert_eq!(DeviceKind::Hub.as_str(), "hub");
        assert_eq!(DeviceKind::Hub.to_string(), "hub");
    }

    #[test]
    fn new_fills_defaults() {
        let req = UpgradeRequest::new(
            DeviceKind::Battery,
            SourceMode::Remote,
            "jetson_nano",
            "/dev/ttyACM0",
        );
        assert_eq!(req.assets_dir, PathBuf::from(DEFAULT_ASSETS_DIR));
        assert_eq!(req.step_timeout, DEFAULT_STEP_TIMEOUT);
        assert!(req.pinned_version.is_none());
        assert!(!req.dry_run);
    }
}

//! Error taxonomy for the upgrade pipeline.
//!
//! One enum covers every failure class the pipeline can surface. Errors
//! propagate unmodified from the stage that raised them up to the
//! orchestrator; nothing is swallowed or retried internally.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::tool::ToolStep;

/// Errors surfaced by the upgrade pipeline.
///
/// Each variant maps to a stable process exit code (see
/// [`UpgradeError::exit_code`]) so calling automation can branch on the
/// failure class without parsing log output.
#[derive(Debug, Error)]
pub enum UpgradeError {
    /// The expected local firmware image is absent or empty.
    #[error("firmware image not found (or empty) at {path}")]
    FirmwareNotFound {
        /// The well-known local path that was checked.
        path: PathBuf,
    },

    /// Fetching metadata or the binary from the artifact store failed.
    #[error("firmware download failed: {detail}")]
    DownloadFailed {
        /// Transport-level failure description.
        detail: String,
    },

    /// A downloaded payload disagrees with its published metadata.
    #[error("integrity check failed for {file}: {detail}")]
    IntegrityCheckFailed {
        /// Release file name from the metadata document.
        file: String,
        /// Which check failed and the expected/observed values.
        detail: String,
    },

    /// The hardware platform tag is not one of the recognized platforms.
    #[error("unsupported hardware platform '{tag}' (known platforms: {known})")]
    UnsupportedHardware {
        /// The tag as delivered by the launch environment.
        tag: String,
        /// Comma-separated list of recognized tags.
        known: &'static str,
    },

    /// The device's reported identity or fuse-backed configuration does not
    /// match the selected hardware profile.
    #[error("device configuration mismatch: {detail}")]
    ConfigurationMismatch {
        /// What differed between device and profile.
        detail: String,
    },

    /// Read-back flash contents differ from the firmware payload.
    #[error("flash verification failed: {detail}")]
    VerificationFailed {
        /// Mismatch location or count discrepancy.
        detail: String,
    },

    /// A programmer invocation exceeded its wall-clock deadline.
    #[error("programmer {step} step timed out after {seconds}s")]
    Timeout {
        /// The step whose deadline expired.
        step: ToolStep,
        /// The configured bound, in seconds.
        seconds: u64,
    },

    /// The programmer reported that no device answered on the serial port.
    #[error("device not responding on {port}")]
    DeviceNotResponding {
        /// Serial device path that gave no answer.
        port: String,
    },

    /// The programmer tool failed outright: non-zero exit without a
    /// recognized failure marker, or it could not be spawned at all.
    #[error("programmer {step} step failed: {detail}")]
    ToolFailed {
        /// The step that was being executed.
        step: ToolStep,
        /// Exit status or spawn failure description.
        detail: String,
    },

    /// Filesystem error around the firmware artifact.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path the operation touched.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
}

impl UpgradeError {
    /// Stable exit code for this error kind. 0 is reserved for success.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ToolFailed { .. } | Self::Io { .. } => 1,
            Self::FirmwareNotFound { .. } => 2,
            Self::DownloadFailed { .. } => 3,
            Self::IntegrityCheckFailed { .. } => 4,
            Self::UnsupportedHardware { .. } => 5,
            Self::ConfigurationMismatch { .. } => 6,
            Self::VerificationFailed { .. } => 7,
            Self::Timeout { .. } => 8,
            Self::DeviceNotResponding { .. } => 9,
        }
    }

    /// Short failure-class name used in the summary banner.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FirmwareNotFound { .. } => "FirmwareNotFound",
            Self::DownloadFailed { .. } => "DownloadFailed",
            Self::IntegrityCheckFailed { .. } => "IntegrityCheckFailed",
            Self::UnsupportedHardware { .. } => "UnsupportedHardware",
            Self::ConfigurationMismatch { .. } => "ConfigurationMismatch",
            Self::VerificationFailed { .. } => "VerificationFailed",
            Self::Timeout { .. } => "Timeout",
            Self::DeviceNotResponding { .. } => "DeviceNotResponding",
            Self::ToolFailed { .. } => "ToolFailed",
            Self::Io { .. } => "Io",
        }
    }
}

/// Result type alias using the pipeline error type.
pub type Result<T> = std::result::Result<T, UpgradeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct_per_class() {
        let errors = [
            UpgradeError::FirmwareNotFound {
                path: PathBuf::from("/data/firmware/battery/firmware.bin"),
            },
            UpgradeError::DownloadFailed {
                detail: "connection refused".into(),
            },
            UpgradeError::IntegrityCheckFailed {
                file: "battery_fw_v1.2.0.bin".into(),
                detail: "size mismatch".into(),
            },
            UpgradeError::UnsupportedHardware {
                tag: "beaglebone".into(),
                known: "jetson_nano, raspberry_pi",
            },
            UpgradeError::ConfigurationMismatch {
                detail: "security bit set".into(),
            },
            UpgradeError::VerificationFailed {
                detail: "page 3 differs".into(),
            },
            UpgradeError::Timeout {
                step: ToolStep::Write,
                seconds: 120,
            },
            UpgradeError::DeviceNotResponding {
                port: "/dev/ttyACM0".into(),
            },
        ];

        let mut codes: Vec<i32> = errors.iter().map(|e| e.exit_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len(), "exit codes must not collide");
        assert!(codes.iter().all(|&c| c != 0), "0 is reserved for success");
    }

    #[test]
    fn messages_name_the_resource() {
        let err = UpgradeError::FirmwareNotFound {
            path: PathBuf::from("/data/firmware/hub/firmware.bin"),
        };
        assert!(err.to_string().contains("/data/firmware/hub/firmware.bin"));

        let err = UpgradeError::DeviceNotResponding {
            port: "/dev/ttyACM1".into(),
        };
        assert!(err.to_string().contains("/dev/ttyACM1"));
    }
}

//! Hardware profile selection.
//!
//! Maps the (platform tag, device) pair onto the concrete programmer
//! parameters for that board revision. Selection is a pure function over a
//! closed set of platforms; an unknown tag is rejected up front with the
//! list of tags this build knows about.

use std::path::PathBuf;

use crate::error::{Result, UpgradeError};
use crate::request::DeviceKind;

/// Directory holding the per-platform programmer configuration files.
pub const PROGRAMMER_CONFIG_DIR: &str = "/usr/share/periflash";

/// Comma-separated list of platform tags this build recognizes.
pub const KNOWN_PLATFORMS: &str = "jetson_nano, raspberry_pi";

/// Host platforms the robot ships on.
///
/// The set is closed on purpose. A new carrier board means a new variant
/// here plus its config file, and every `match` below is forced to handle
/// it at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwarePlatform {
    /// Jetson Nano carrier.
    JetsonNano,
    /// Raspberry Pi carrier.
    RaspberryPi,
}

impl HardwarePlatform {
    /// Parse the platform tag delivered by the launch environment.
    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag {
            "jetson_nano" => Ok(Self::JetsonNano),
            "raspberry_pi" => Ok(Self::RaspberryPi),
            _ => Err(UpgradeError::UnsupportedHardware {
                tag: tag.to_string(),
                known: KNOWN_PLATFORMS,
            }),
        }
    }

    /// File name of this platform's programmer configuration.
    fn config_file(self) -> &'static str {
        match self {
            Self::JetsonNano => "jetson-nano.conf",
            Self::RaspberryPi => "raspberry-pi.conf",
        }
    }
}

/// Concrete programmer parameters for one (platform, device) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareProfile {
    /// Programmer configuration file for the host platform.
    pub programmer_config: PathBuf,
    /// MCU part name the device must report during the configuration check.
    pub part: &'static str,
    /// Serial baud rate.
    pub baud: u32,
    /// Expected flash page size in bytes; checked against the device.
    pub page_size: u32,
    /// Byte offset the application image is written at (below it lives the
    /// bootloader, which must never be touched).
    pub flash_offset: u32,
}

/// Select the hardware profile for this request.
///
/// Fails with [`UpgradeError::UnsupportedHardware`] before any device or
/// network I/O when the tag is not in the known set.
pub fn select(platform_tag: &str, device: DeviceKind) -> Result<HardwareProfile> {
    let platform = HardwarePlatform::from_tag(platform_tag)?;
    let programmer_config = PathBuf::from(PROGRAMMER_CONFIG_DIR).join(platform.config_file());

    let profile = match device {
        DeviceKind::Battery => HardwareProfile {
            programmer_config,
            part: "atsamd21e18a",
            baud: 115_200,
            page_size: 64,
            flash_offset: 0x2000,
        },
        DeviceKind::Hub => HardwareProfile {
            programmer_config,
            part: "atsamd21g18a",
            baud: 115_200,
            page_size: 64,
            flash_offset: 0x4000,
        },
    };
    Ok(profile)
}

//! CLI argument parsing

use clap::{ArgGroup, Parser, ValueEnum};

use periflash_core::request::{DeviceKind, DEFAULT_PORT};

/// Programmer backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProgrammerKind {
    /// Drive the external `mcuprog` tool over the serial port.
    Mcuprog,
    /// In-memory emulator; no hardware required.
    Dummy,
}

#[derive(Parser)]
#[command(name = "periflash")]
#[command(author, version, about = "Firmware upgrade utility for robot peripheral boards", long_about = None)]
#[command(group(ArgGroup::new("device").required(true).args(["battery", "hub"])))]
pub struct Cli {
    /// Upgrade the battery management board
    #[arg(long)]
    pub battery: bool,

    /// Upgrade the peripheral hub board
    #[arg(long)]
    pub hub: bool,

    /// Flash the pre-provisioned image from the assets directory instead of
    /// downloading from the firmware store
    #[arg(long)]
    pub local_firmware: bool,

    /// Check the device and report what would be flashed, without touching
    /// its flash
    #[arg(long)]
    pub dry_run: bool,

    /// Serial device the board enumerates on
    #[arg(long, default_value = DEFAULT_PORT)]
    pub port: String,

    /// Deadline in seconds applied to each programmer step
    #[arg(long, value_name = "SECONDS", default_value_t = 120)]
    pub timeout: u64,

    /// Programmer backend to use
    #[arg(long, value_enum, default_value_t = ProgrammerKind::Mcuprog)]
    pub programmer: ProgrammerKind,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// The board selected by the device flag group.
    pub fn device(&self) -> DeviceKind {
        if self.battery {
            DeviceKind::Battery
        } else {
            DeviceKind::Hub
        }
    }
}

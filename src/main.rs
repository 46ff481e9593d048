//! periflash - Firmware upgrade utility for robot peripheral boards
//!
//! Upgrades the firmware on the robot's battery management and peripheral
//! hub boards by driving the external `mcuprog` programmer over the boards'
//! serial bootloader.
//!
//! # Architecture
//!
//! The binary captures the environment and command line once, folds them
//! into an immutable request, and hands it to the pipeline in
//! `periflash-core`. Three seams are wired here:
//!
//! - **Firmware source** - the HTTP firmware store, or a pre-provisioned
//!   file under the assets directory with `--local-firmware`
//! - **Hardware profile** - per-platform programmer parameters, selected
//!   from the `ROBOT_HARDWARE` tag
//! - **Programmer backend** - the `mcuprog` subprocess, or an in-memory
//!   emulator with `--programmer dummy`

mod cli;
mod progress;

use std::env;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::Parser;
use log::{debug, error, info};
use semver::Version;

use periflash_core::driver::FlashResult;
use periflash_core::error::UpgradeError;
use periflash_core::profile::KNOWN_PLATFORMS;
use periflash_core::request::{DeviceKind, SourceMode, UpgradeRequest, DEFAULT_ASSETS_DIR};
use periflash_core::runner::UpgradeRunner;
use periflash_dummy::{DummyConfig, DummyProgrammer};
use periflash_mcuprog::{McuprogConfig, McuprogTool};
use periflash_store::{HttpArtifactStore, DEFAULT_STORE_URL};

use cli::{Cli, ProgrammerKind};
use progress::IndicatifProgress;

/// Hardware platform tag, set by the robot's launch environment.
const ENV_HARDWARE: &str = "ROBOT_HARDWARE";
/// Root of the local firmware assets tree.
const ENV_ASSETS_DIR: &str = "PERIFLASH_ASSETS_DIR";
/// Base URL of the firmware store.
const ENV_STORE_URL: &str = "PERIFLASH_STORE_URL";
/// Pin the firmware to a specific version instead of `latest`.
const ENV_FW_VERSION: &str = "PERIFLASH_FW_VERSION";

/// One-time capture of the launch environment.
///
/// The environment is read exactly here and nowhere else; everything
/// downstream works from the request built out of it.
struct Environment {
    platform_tag: String,
    assets_dir: PathBuf,
    store_url: String,
    pinned_version: Option<Version>,
}

impl Environment {
    fn capture() -> Result<Self, UpgradeError> {
        let platform_tag =
            env::var(ENV_HARDWARE).map_err(|_| UpgradeError::UnsupportedHardware {
                tag: format!("({ENV_HARDWARE} is not set)"),
                known: KNOWN_PLATFORMS,
            })?;
        let assets_dir = env::var_os(ENV_ASSETS_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ASSETS_DIR));
        let store_url =
            env::var(ENV_STORE_URL).unwrap_or_else(|_| DEFAULT_STORE_URL.to_string());
        let pinned_version = match env::var(ENV_FW_VERSION) {
            Ok(raw) => Some(Version::parse(&raw).map_err(|e| UpgradeError::DownloadFailed {
                detail: format!("invalid {ENV_FW_VERSION} '{raw}': {e}"),
            })?),
            Err(_) => None,
        };
        Ok(Self {
            platform_tag,
            assets_dir,
            store_url,
            pinned_version,
        })
    }
}

fn build_request(cli: &Cli, environment: &Environment) -> UpgradeRequest {
    let source = if cli.local_firmware {
        SourceMode::Local
    } else {
        SourceMode::Remote
    };
    let mut request = UpgradeRequest::new(
        cli.device(),
        source,
        environment.platform_tag.clone(),
        cli.port.clone(),
    );
    request.assets_dir = environment.assets_dir.clone();
    request.pinned_version = environment.pinned_version.clone();
    request.step_timeout = Duration::from_secs(cli.timeout);
    request.dry_run = cli.dry_run;
    request
}

fn run(cli: &Cli) -> Result<FlashResult, UpgradeError> {
    let environment = Environment::capture()?;
    let request = build_request(cli, &environment);
    debug!(
        "request: device={} platform={} port={} assets={} pin={:?} timeout={}s dry_run={}",
        request.device,
        request.platform_tag,
        request.port,
        request.assets_dir.display(),
        request.pinned_version,
        request.step_timeout.as_secs(),
        request.dry_run,
    );

    let store = HttpArtifactStore::new(&environment.store_url)?;
    let mut progress = IndicatifProgress::new();

    let outcome = match cli.programmer {
        ProgrammerKind::Mcuprog => {
            let mut tool = McuprogTool::new(McuprogConfig::new(request.step_timeout));
            UpgradeRunner::new(&request, &store, &mut tool, &mut progress).run()
        }
        ProgrammerKind::Dummy => {
            // The emulator plays whichever board was asked for.
            let config = DummyConfig {
                device: match request.device {
                    DeviceKind::Battery => "ATSAMD21E18A".into(),
                    DeviceKind::Hub => "ATSAMD21G18A".into(),
                },
                ..DummyConfig::default()
            };
            let mut tool = DummyProgrammer::new(config);
            UpgradeRunner::new(&request, &store, &mut tool, &mut progress).run()
        }
    };
    outcome.result.map_err(|failure| failure.error)
}

fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins when set; -v raises the default otherwise.
    let default_filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    info!("periflash {}", env!("CARGO_PKG_VERSION"));

    let code = match run(&cli) {
        Ok(result) => {
            if result.dry_run {
                info!("dry run complete; device configuration checks passed");
            } else {
                info!(
                    "upgrade complete: {} pages written, {} bytes verified",
                    result.pages_written, result.bytes_verified
                );
            }
            0
        }
        Err(err) => {
            error!("upgrade failed: {err} [{}]", err.kind());
            err.exit_code()
        }
    };
    process::exit(code);
}

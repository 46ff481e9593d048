//! periflash-core - Core upgrade pipeline for robot peripheral boards
//!
//! This crate contains the decision logic of the firmware upgrade utility:
//! resolving which firmware image to flash (locally supplied file vs. a
//! download from the artifact store), mapping the host platform onto the
//! parameters the external programmer needs, driving the programmer through
//! the flash sequence, and tracking the run's status to a terminal state.
//!
//! It performs no network or device I/O itself. Those concerns sit behind
//! two traits:
//!
//! - [`store::ArtifactStore`] - lookup and download of published firmware
//!   releases (HTTP implementation in `periflash-store`)
//! - [`tool::ProgrammerTool`] - invocation of the external programmer
//!   utility (subprocess implementation in `periflash-mcuprog`, in-memory
//!   emulator in `periflash-dummy`)
//!
//! # Example
//!
//! ```ignore
//! use periflash_core::request::{DeviceKind, SourceMode, UpgradeRequest};
//! use periflash_core::runner::UpgradeRunner;
//!
//! let request = UpgradeRequest::new(
//!     DeviceKind::Battery,
//!     SourceMode::Local,
//!     "jetson_nano",
//!     "/dev/ttyACM0",
//! );
//! let outcome = UpgradeRunner::new(&request, &store, &mut tool, &mut progress).run();
//! match outcome.result {
//!     Ok(result) => println!("verified {} bytes", result.bytes_verified),
//!     Err(failure) => eprintln!("{}", failure),
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod artifact;
pub mod driver;
pub mod error;
pub mod output;
pub mod profile;
pub mod progress;
pub mod request;
pub mod runner;
pub mod source;
pub mod status;
pub mod store;
pub mod tool;

pub use artifact::FirmwareArtifact;
pub use driver::{FlashDriver, FlashResult};
pub use error::{Result, UpgradeError};
pub use profile::HardwareProfile;
pub use request::UpgradeRequest;
pub use runner::{UpgradeFailure, UpgradeOutcome, UpgradeRunner};
pub use status::UpgradeStatus;

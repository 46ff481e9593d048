//! periflash-dummy - In-memory emulators for testing
//!
//! This crate provides a dummy programmer that emulates an MCU behind the
//! `mcuprog` output dialect, plus an in-memory artifact store. Both are
//! useful for testing and development without real hardware or a network.

use std::fmt::Write as _;
use std::fs;

use log::debug;
use semver::Version;
use sha2::{Digest, Sha256};

use periflash_core::error::{Result, UpgradeError};
use periflash_core::request::DeviceKind;
use periflash_core::store::{ArtifactStore, FirmwareMetadata};
use periflash_core::tool::{ProgrammerTool, ToolExit, ToolInvocation, ToolStep};

/// Configuration for the dummy programmer.
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// Device name reported by the `info` step.
    pub device: String,
    /// Page size reported by the `info` step, in bytes.
    pub page_size: u32,
    /// Emulated flash size in bytes.
    pub flash_size: usize,
    /// Report the security bit as set and refuse destructive steps.
    pub security_locked: bool,
    /// Whether a device answers on the port at all.
    pub present: bool,
    /// Flip this flash byte after a write completes, so the verify pass
    /// sees a mismatch.
    pub corrupt_byte_after_write: Option<usize>,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            device: "ATSAMD21E18A".into(),
            page_size: 64,
            flash_size: 256 * 1024,
            security_locked: false,
            present: true,
            corrupt_byte_after_write: None,
        }
    }
}

/// Dummy programmer.
///
/// Emulates the external programmer and its device in memory, producing
/// the same line-oriented output the real tool does.
pub struct DummyProgrammer {
    config: DummyConfig,
    flash: Vec<u8>,
    steps: Vec<ToolStep>,
}

impl DummyProgrammer {
    /// Create a dummy programmer with the given configuration.
    pub fn new(config: DummyConfig) -> Self {
        let flash = vec![0xFF; config.flash_size];
        Self {
            config,
            flash,
            steps: Vec::new(),
        }
    }

    /// Create a dummy programmer with the default configuration (a healthy
    /// battery board on the port).
    pub fn new_default() -> Self {
        Self::new(DummyConfig::default())
    }

    /// Emulated flash contents.
    pub fn flash(&self) -> &[u8] {
        &self.flash
    }

    /// Every step that has been invoked, in order.
    pub fn steps(&self) -> &[ToolStep] {
        &self.steps
    }

    fn info(&self, on_line: &mut dyn FnMut(&str)) -> ToolExit {
        on_line(&format!("Device       : {}", self.config.device));
        on_line("Version      : v2.0 [mcuprog:dummy]");
        on_line(&format!("Security     : {}", self.config.security_locked));
        on_line("BOD          : true");
        on_line("BOR          : true");
        on_line(&format!("Page size    : {} bytes", self.config.page_size));
        on_line(&format!(
            "Pages        : {}",
            self.config.flash_size / self.config.page_size as usize
        ));
        ToolExit::ok()
    }

    fn erase(&mut self, on_line: &mut dyn FnMut(&str)) -> ToolExit {
        if self.config.security_locked {
            on_line("Flash locked; operation not permitted");
            return ToolExit::failed(1);
        }
        self.flash.fill(0xFF);
        on_line("Erase flash");
        on_line("Done in 0.820 seconds");
        ToolExit::ok()
    }

    fn write(&mut self, image: &[u8], on_line: &mut dyn FnMut(&str)) -> ToolExit {
        if self.config.security_locked {
            on_line("Flash locked; operation not permitted");
            return ToolExit::failed(1);
        }
        if image.len() > self.flash.len() {
            on_line("Image exceeds flash size");
            return ToolExit::failed(1);
        }
        let pages = page_count(image.len(), self.config.page_size);
        on_line(&format!(
            "Write {} bytes to flash ({} pages)",
            image.len(),
            pages
        ));
        emit_progress(pages, on_line);
        self.flash[..image.len()].copy_from_slice(image);
        if let Some(i) = self.config.corrupt_byte_after_write {
            if i < image.len() {
                self.flash[i] ^= 0xFF;
                debug!("corrupting flash byte {i}");
            }
        }
        on_line("Done in 4.312 seconds");
        ToolExit::ok()
    }

    fn verify(&self, image: &[u8], on_line: &mut dyn FnMut(&str)) -> ToolExit {
        on_line(&format!("Verify {} bytes of flash", image.len()));
        let pages = page_count(image.len(), self.config.page_size);
        emit_progress(pages, on_line);
        let mismatch = image
            .iter()
            .zip(self.flash.iter())
            .position(|(a, b)| a != b);
        match mismatch {
            None if image.len() <= self.flash.len() => {
                on_line("Verify successful");
                on_line("Done in 3.104 seconds");
                ToolExit::ok()
            }
            _ => {
                let byte = mismatch.unwrap_or(self.flash.len());
                let page = byte / self.config.page_size as usize;
                on_line(&format!("Verify failed: page {page} differs"));
                ToolExit::failed(1)
            }
        }
    }

    fn reset(&self, on_line: &mut dyn FnMut(&str)) -> ToolExit {
        on_line("CPU reset.");
        ToolExit::ok()
    }
}

impl ProgrammerTool for DummyProgrammer {
    fn invoke(
        &mut self,
        invocation: &ToolInvocation<'_>,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<ToolExit> {
        self.steps.push(invocation.step);
        debug!(
            "dummy programmer: step '{}' on {} at offset 0x{:x}",
            invocation.step, invocation.port, invocation.profile.flash_offset
        );

        if !self.config.present {
            on_line(&format!("No device found on {}", invocation.port));
            return Ok(ToolExit::failed(1));
        }

        let exit = match invocation.step {
            ToolStep::Info => self.info(on_line),
            ToolStep::Erase => self.erase(on_line),
            ToolStep::Write | ToolStep::Verify => {
                let Some(path) = invocation.firmware else {
                    return Err(UpgradeError::ToolFailed {
                        step: invocation.step,
                        detail: "no firmware image supplied".into(),
                    });
                };
                let image = fs::read(path).map_err(|source| UpgradeError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                match invocation.step {
                    ToolStep::Write => self.write(&image, on_line),
                    _ => self.verify(&image, on_line),
                }
            }
            ToolStep::Reset => self.reset(on_line),
        };
        Ok(exit)
    }
}

fn page_count(bytes: usize, page_size: u32) -> u64 {
    (bytes as u64).div_ceil(u64::from(page_size))
}

/// Emit bar-art progress lines at quarter marks, ending at 100%.
fn emit_progress(total_pages: u64, on_line: &mut dyn FnMut(&str)) {
    if total_pages == 0 {
        return;
    }
    let mut last = 0;
    for done in [
        total_pages / 4,
        total_pages / 2,
        total_pages * 3 / 4,
        total_pages,
    ] {
        if done == 0 || done == last {
            continue;
        }
        last = done;
        let filled = (done * 30 / total_pages) as usize;
        let mut line = String::from("[");
        for _ in 0..filled {
            line.push('=');
        }
        for _ in filled..30 {
            line.push(' ');
        }
        let _ = write!(
            line,
            "] {}% ({done}/{total_pages} pages)",
            done * 100 / total_pages
        );
        on_line(&line);
    }
}

/// In-memory artifact store.
///
/// Holds published releases per device; `resolve` with no pin returns the
/// highest published version, mirroring the real store's `latest` alias.
#[derive(Debug, Default)]
pub struct DummyStore {
    releases: Vec<(DeviceKind, FirmwareMetadata, Vec<u8>)>,
}

impl DummyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a release, deriving size and digest from the payload.
    pub fn publish(&mut self, device: DeviceKind, version: Version, file: &str, payload: Vec<u8>) {
        let meta = FirmwareMetadata {
            version,
            file: file.to_string(),
            size: payload.len() as u64,
            sha256: format!("{:x}", Sha256::digest(&payload)),
        };
        self.releases.push((device, meta, payload));
    }

    /// Publish a release with hand-written metadata, so tests can lie
    /// about size or digest.
    pub fn publish_with_metadata(
        &mut self,
        device: DeviceKind,
        meta: FirmwareMetadata,
        payload: Vec<u8>,
    ) {
        self.releases.push((device, meta, payload));
    }
}

impl ArtifactStore for DummyStore {
    fn resolve(&self, device: DeviceKind, version: Option<&Version>) -> Result<FirmwareMetadata> {
        let candidates = self
            .releases
            .iter()
            .filter(|(d, _, _)| *d == device)
            .map(|(_, meta, _)| meta);
        let found = match version {
            Some(v) => candidates.filter(|m| &m.version == v).next_back(),
            None => candidates.max_by(|a, b| a.version.cmp(&b.version)),
        };
        found.cloned().ok_or_else(|| UpgradeError::DownloadFailed {
            detail: match version {
                Some(v) => format!("store has no {device} release {v}"),
                None => format!("store has no {device} releases"),
            },
        })
    }

    fn fetch(
        &self,
        device: DeviceKind,
        meta: &FirmwareMetadata,
        on_progress: &mut dyn FnMut(u64, u64),
    ) -> Result<Vec<u8>> {
        let payload = self
            .releases
            .iter()
            .find(|(d, m, _)| *d == device && m.file == meta.file)
            .map(|(_, _, payload)| payload.clone())
            .ok_or_else(|| UpgradeError::DownloadFailed {
                detail: format!("store has no file {} for {device}", meta.file),
            })?;
        // Two progress ticks are enough to exercise callers.
        let total = payload.len() as u64;
        on_progress(total / 2, total);
        on_progress(total, total);
        Ok(payload)
    }
}

//! Firmware source resolution.
//!
//! Turns an [`UpgradeRequest`] into a flashable [`FirmwareArtifact`],
//! either from the local assets tree or from the artifact store. The mode
//! is whatever the request says; there is no fallback from one source to
//! the other.

use std::env;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use sha2::{Digest, Sha256};

use crate::artifact::FirmwareArtifact;
use crate::error::{Result, UpgradeError};
use crate::progress::UpgradeProgress;
use crate::request::{SourceMode, UpgradeRequest};
use crate::store::{ArtifactStore, FirmwareMetadata};

/// Well-known file name of a pre-provisioned image inside the assets tree.
pub const LOCAL_FIRMWARE_FILE: &str = "firmware.bin";

/// Path a pre-provisioned image for this request must live at.
pub fn local_firmware_path(request: &UpgradeRequest) -> PathBuf {
    request
        .assets_dir
        .join(request.device.as_str())
        .join(LOCAL_FIRMWARE_FILE)
}

/// Resolve the firmware image for this request.
pub fn resolve(
    request: &UpgradeRequest,
    store: &dyn ArtifactStore,
    progress: &mut dyn UpgradeProgress,
) -> Result<FirmwareArtifact> {
    match request.source {
        SourceMode::Local => resolve_local(request),
        SourceMode::Remote => resolve_remote(request, store, progress),
    }
}

fn resolve_local(request: &UpgradeRequest) -> Result<FirmwareArtifact> {
    warn!("local firmware mode: skipping remote download");
    let path = local_firmware_path(request);
    let artifact = FirmwareArtifact::from_local(&path)?;
    info!("using local firmware image {artifact}");
    Ok(artifact)
}

fn resolve_remote(
    request: &UpgradeRequest,
    store: &dyn ArtifactStore,
    progress: &mut dyn UpgradeProgress,
) -> Result<FirmwareArtifact> {
    let meta = store.resolve(request.device, request.pinned_version.as_ref())?;
    let file_name = bare_file_name(&meta)?;
    match &request.pinned_version {
        Some(v) => info!("firmware version pinned to {v}"),
        None => info!("latest {} firmware is {}", request.device, meta.version),
    }

    progress.download_started(meta.size);
    let payload = store.fetch(request.device, &meta, &mut |bytes, total| {
        progress.download_progress(bytes, total)
    })?;
    progress.download_finished();

    check_integrity(&meta, &payload)?;
    debug!("downloaded {} bytes, integrity ok", payload.len());

    let path = env::temp_dir().join(file_name);
    let artifact =
        FirmwareArtifact::from_download(&path, &payload, meta.version.clone(), meta.file.clone())?;
    info!("downloaded firmware image {artifact}");
    Ok(artifact)
}

/// Reduce the store-supplied file name to a plain file name.
///
/// The name decides where the download lands inside the temp directory.
/// Path structure in it (separators, `..`, an absolute prefix) would steer
/// the write elsewhere, so it is refused like any other malformed piece of
/// store metadata, before the download starts.
fn bare_file_name(meta: &FirmwareMetadata) -> Result<&str> {
    let path = Path::new(&meta.file);
    match path.file_name() {
        Some(name) if name == path.as_os_str() => Ok(meta.file.as_str()),
        _ => Err(UpgradeError::DownloadFailed {
            detail: format!("release metadata names an invalid file '{}'", meta.file),
        }),
    }
}

/// Compare a downloaded payload against its metadata.
///
/// Size first (cheap, catches truncation), then SHA-256. The comparison
/// ignores hex case so stores that publish uppercase digests still pass.
fn check_integrity(meta: &FirmwareMetadata, payload: &[u8]) -> Result<()> {
    if payload.len() as u64 != meta.size {
        return Err(UpgradeError::IntegrityCheckFailed {
            file: meta.file.clone(),
            detail: format!(
                "size mismatch: metadata says {} bytes, downloaded {}",
                meta.size,
                payload.len()
            ),
        });
    }
    let digest = format!("{:x}", Sha256::digest(payload));
    if !digest.eq_ignore_ascii_case(&meta.sha256) {
        return Err(UpgradeError::IntegrityCheckFailed {
            file: meta.file.clone(),
            detail: format!("sha256 mismatch: expected {}, got {}", meta.sha256, digest),
        });
    }
    Ok(())
}

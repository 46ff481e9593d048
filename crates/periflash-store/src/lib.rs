//! periflash-store - HTTP client for the firmware artifact store
//!
//! The store is a static HTTP tree, one prefix per device:
//!
//! ```text
//! {base}/battery/latest.json     metadata of the current release
//! {base}/battery/1.2.0.json      metadata of a specific release
//! {base}/battery/{file}          the binary named by the metadata
//! ```
//!
//! `latest.json` is maintained store-side; resolving it here means the
//! orchestrator only ever works with concrete versions. Transport and
//! HTTP-level failures surface as `DownloadFailed`; payload validation
//! against the metadata is the caller's business.

use std::io::Read;
use std::time::Duration;

use log::debug;
use semver::Version;

use periflash_core::error::{Result, UpgradeError};
use periflash_core::request::DeviceKind;
use periflash_core::store::{ArtifactStore, FirmwareMetadata};

/// Default base URL of the firmware store.
pub const DEFAULT_STORE_URL: &str = "https://periflash-firmware.s3.amazonaws.com";

/// Total per-request timeout, covering connect and body.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

const DOWNLOAD_CHUNK: usize = 8 * 1024;

/// Cap on the pre-allocated download buffer. The size claimed by the
/// metadata is unverified until the integrity check, so it must not drive
/// allocation on its own; real images are a few hundred KiB at most.
const PREALLOC_CAP: u64 = 4 * 1024 * 1024;

fn initial_capacity(claimed: u64) -> usize {
    claimed.min(PREALLOC_CAP) as usize
}

/// Blocking HTTP implementation of the artifact store.
pub struct HttpArtifactStore {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HttpArtifactStore {
    /// Create a client for the store at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(format!("periflash/{}", env!("CARGO_PKG_VERSION")))
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| UpgradeError::DownloadFailed {
                detail: format!("failed to create HTTP client: {e}"),
            })?;
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Ok(Self { base_url, client })
    }

    fn metadata_url(&self, device: DeviceKind, version: Option<&Version>) -> String {
        match version {
            Some(v) => format!("{}/{}/{}.json", self.base_url, device, v),
            None => format!("{}/{}/latest.json", self.base_url, device),
        }
    }

    fn binary_url(&self, device: DeviceKind, file: &str) -> String {
        format!("{}/{}/{}", self.base_url, device, file)
    }

    fn get(&self, url: &str) -> Result<reqwest::blocking::Response> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| UpgradeError::DownloadFailed {
                detail: format!("request to {url} failed: {e}"),
            })?;
        if !response.status().is_success() {
            return Err(UpgradeError::DownloadFailed {
                detail: format!("{url} returned {}", response.status()),
            });
        }
        Ok(response)
    }
}

impl ArtifactStore for HttpArtifactStore {
    fn resolve(&self, device: DeviceKind, version: Option<&Version>) -> Result<FirmwareMetadata> {
        let url = self.metadata_url(device, version);
        debug!("fetching release metadata from {url}");
        self.get(&url)?
            .json::<FirmwareMetadata>()
            .map_err(|e| UpgradeError::DownloadFailed {
                detail: format!("malformed metadata from {url}: {e}"),
            })
    }

    fn fetch(
        &self,
        device: DeviceKind,
        meta: &FirmwareMetadata,
        on_progress: &mut dyn FnMut(u64, u64),
    ) -> Result<Vec<u8>> {
        let url = self.binary_url(device, &meta.file);
        debug!("downloading {url}");
        let mut response = self.get(&url)?;
        let total = response.content_length().unwrap_or(meta.size);

        let mut payload = Vec::with_capacity(initial_capacity(meta.size));
        let mut buf = [0u8; DOWNLOAD_CHUNK];
        loop {
            let n = response
                .read(&mut buf)
                .map_err(|e| UpgradeError::DownloadFailed {
                    detail: format!("read from {url} failed: {e}"),
                })?;
            if n == 0 {
                break;
            }
            payload.extend_from_slice(&buf[..n]);
            on_progress(payload.len() as u64, total);
        }
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_url_distinguishes_latest_from_pinned() {
        let store = HttpArtifactStore::new("https://fw.example.com").unwrap();
        assert_eq!(
            store.metadata_url(DeviceKind::Battery, None),
            "https://fw.example.com/battery/latest.json"
        );
        let pin = Version::new(1, 2, 0);
        assert_eq!(
            store.metadata_url(DeviceKind::Battery, Some(&pin)),
            "https://fw.example.com/battery/1.2.0.json"
        );
    }

    #[test]
    fn binary_url_lives_under_the_device_prefix() {
        let store = HttpArtifactStore::new("https://fw.example.com").unwrap();
        assert_eq!(
            store.binary_url(DeviceKind::Hub, "hub_fw_v0.3.0.bin"),
            "https://fw.example.com/hub/hub_fw_v0.3.0.bin"
        );
    }

    #[test]
    fn trailing_slashes_in_the_base_are_trimmed() {
        let store = HttpArtifactStore::new("https://fw.example.com///").unwrap();
        assert_eq!(
            store.metadata_url(DeviceKind::Hub, None),
            "https://fw.example.com/hub/latest.json"
        );
    }

    #[test]
    fn download_buffer_preallocation_is_capped() {
        assert_eq!(initial_capacity(12204), 12204);
        assert_eq!(initial_capacity(u64::MAX), PREALLOC_CAP as usize);
    }
}

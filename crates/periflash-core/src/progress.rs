//! Progress reporting hooks.
//!
//! The pipeline reports download and flash progress through this trait so
//! the CLI can draw bars while tests and scripts stay silent.

/// Receives progress callbacks from the pipeline.
///
/// All methods have empty default bodies; implementors override the ones
/// they care about. Page counts come straight from the programmer's own
/// output, byte counts from the artifact store.
pub trait UpgradeProgress {
    /// A download of `total` bytes is starting.
    fn download_started(&mut self, total: u64) {
        let _ = total;
    }

    /// `bytes` of `total` have arrived.
    fn download_progress(&mut self, bytes: u64, total: u64) {
        let _ = (bytes, total);
    }

    /// The download completed.
    fn download_finished(&mut self) {}

    /// The programmer is about to write `total_bytes` across `total_pages`.
    fn write_started(&mut self, total_bytes: u64, total_pages: u64) {
        let _ = (total_bytes, total_pages);
    }

    /// `pages` of `total` pages have been written.
    fn write_progress(&mut self, pages: u64, total: u64) {
        let _ = (pages, total);
    }

    /// The write pass completed.
    fn write_finished(&mut self) {}

    /// The programmer is about to verify `total_bytes` of flash.
    fn verify_started(&mut self, total_bytes: u64) {
        let _ = total_bytes;
    }

    /// `pages` of `total` pages have been read back and compared.
    fn verify_progress(&mut self, pages: u64, total: u64) {
        let _ = (pages, total);
    }

    /// The verify pass completed.
    fn verify_finished(&mut self) {}
}

/// Progress sink that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl UpgradeProgress for NoProgress {}

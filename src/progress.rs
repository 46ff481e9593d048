//! Terminal progress bars

use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use periflash_core::progress::UpgradeProgress;

fn byte_bar_style(phase: &str) -> Result<ProgressStyle, Box<dyn std::error::Error>> {
    Ok(ProgressStyle::default_bar()
        .template(&format!(
            "{{spinner:.green}} [{{bar:40.cyan/blue}}] {{bytes}}/{{total_bytes}} ({{bytes_per_sec}}, {{eta}}) {phase}"
        ))?
        .progress_chars("#>-"))
}

fn page_bar_style(phase: &str) -> Result<ProgressStyle, Box<dyn std::error::Error>> {
    Ok(ProgressStyle::default_bar()
        .template(&format!(
            "{{spinner:.green}} [{{bar:40.cyan/blue}}] {{pos}}/{{len}} pages ({{eta}}) {phase}"
        ))?
        .progress_chars("#>-"))
}

fn spinner_style() -> Result<ProgressStyle, Box<dyn std::error::Error>> {
    Ok(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?)
}

/// Progress reporter using indicatif progress bars.
pub struct IndicatifProgress {
    multi: MultiProgress,
    current_bar: Option<ProgressBar>,
}

impl IndicatifProgress {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            current_bar: None,
        }
    }

    fn create_byte_bar(&mut self, total: u64, phase: &str) {
        let pb = self.multi.add(ProgressBar::new(total));
        if let Ok(style) = byte_bar_style(phase) {
            pb.set_style(style);
        }
        self.current_bar = Some(pb);
    }

    fn create_page_bar(&mut self, total: u64, phase: &str) {
        let pb = self.multi.add(ProgressBar::new(total));
        if let Ok(style) = page_bar_style(phase) {
            pb.set_style(style);
        }
        self.current_bar = Some(pb);
    }

    fn create_spinner(&mut self, message: String) {
        let pb = self.multi.add(ProgressBar::new_spinner());
        if let Ok(style) = spinner_style() {
            pb.set_style(style);
        }
        pb.set_message(message);
        pb.enable_steady_tick(Duration::from_millis(100));
        self.current_bar = Some(pb);
    }

    fn set_position(&self, position: u64) {
        if let Some(pb) = &self.current_bar {
            pb.set_position(position);
        }
    }

    fn finish(&mut self, message: &'static str) {
        if let Some(pb) = self.current_bar.take() {
            pb.finish_with_message(message);
        }
    }
}

impl Default for IndicatifProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl UpgradeProgress for IndicatifProgress {
    fn download_started(&mut self, total: u64) {
        self.create_byte_bar(total, "Downloading");
    }

    fn download_progress(&mut self, bytes: u64, _total: u64) {
        self.set_position(bytes);
    }

    fn download_finished(&mut self) {
        self.finish("Download complete");
    }

    fn write_started(&mut self, _total_bytes: u64, total_pages: u64) {
        self.create_page_bar(total_pages, "Writing");
    }

    fn write_progress(&mut self, pages: u64, _total: u64) {
        self.set_position(pages);
    }

    fn write_finished(&mut self) {
        self.finish("Write complete");
    }

    fn verify_started(&mut self, total_bytes: u64) {
        self.create_spinner(format!("Verifying {total_bytes} bytes..."));
    }

    fn verify_progress(&mut self, pages: u64, total: u64) {
        if let Some(pb) = &self.current_bar {
            pb.set_message(format!("Verified {pages}/{total} pages..."));
        }
    }

    fn verify_finished(&mut self) {
        self.finish("Verify complete");
    }
}

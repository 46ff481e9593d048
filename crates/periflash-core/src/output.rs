//! Programmer output parsing.
//!
//! `mcuprog` reports everything on stdout as human-oriented lines. This
//! module turns the lines the pipeline acts on into [`ToolEvent`]s; lines
//! that carry no decision weight (banners, timing, bar art without a page
//! counter) parse to `None` and are only kept in the transcript.
//!
//! Plain string ops only. The grammar is a handful of fixed prefixes and
//! one `(<done>/<total> pages)` counter, which does not justify a regex
//! engine.

/// A semantically meaningful line of programmer output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolEvent {
    /// `Device       : ATSAMD21E18A`
    DeviceName(String),
    /// `Security     : false`
    Security(bool),
    /// `Page size    : 64 bytes`
    PageSize(u32),
    /// `No device found on /dev/ttyACM0`
    NoDevice,
    /// `Write 12204 bytes to flash (191 pages)`
    WriteHeader {
        /// Total bytes to write.
        bytes: u64,
        /// Total pages to write.
        pages: u64,
    },
    /// Any line carrying a `(<done>/<total> pages)` counter.
    PageProgress {
        /// Pages completed so far.
        done: u64,
        /// Total pages in this pass.
        total: u64,
    },
    /// `Verify 12204 bytes of flash`
    VerifyHeader {
        /// Total bytes the verify pass covers.
        bytes: u64,
    },
    /// `Verify successful`
    VerifyOk,
    /// `Verify failed: page 3 differs`
    VerifyMismatch {
        /// First page whose read-back differed.
        page: u64,
    },
    /// `CPU reset.`
    Reset,
}

/// Parse one line of tool output.
pub fn parse_line(line: &str) -> Option<ToolEvent> {
    let line = line.trim_end();

    if line.starts_with("No device found") {
        return Some(ToolEvent::NoDevice);
    }
    if line == "Verify successful" {
        return Some(ToolEvent::VerifyOk);
    }
    if let Some(rest) = line.strip_prefix("Verify failed") {
        // "Verify failed: page 3 differs"
        let page = rest
            .split_whitespace()
            .skip_while(|w| *w != "page")
            .nth(1)
            .and_then(|w| w.parse().ok())
            .unwrap_or(0);
        return Some(ToolEvent::VerifyMismatch { page });
    }
    if let Some(rest) = line.strip_prefix("Write ") {
        if let Some((bytes, tail)) = leading_number(rest) {
            if tail.starts_with("bytes to flash") {
                let pages = tail
                    .find('(')
                    .and_then(|i| leading_number(&tail[i + 1..]))
                    .map(|(n, _)| n)?;
                return Some(ToolEvent::WriteHeader { bytes, pages });
            }
        }
    }
    if let Some(rest) = line.strip_prefix("Verify ") {
        if let Some((bytes, tail)) = leading_number(rest) {
            if tail.starts_with("bytes of flash") {
                return Some(ToolEvent::VerifyHeader { bytes });
            }
        }
    }
    if let Some((done, total)) = parse_page_progress(line) {
        return Some(ToolEvent::PageProgress { done, total });
    }
    if line.starts_with("CPU reset") {
        return Some(ToolEvent::Reset);
    }
    if let Some((key, value)) = split_info_line(line) {
        match key {
            "Device" => return Some(ToolEvent::DeviceName(value.to_string())),
            "Security" => {
                return match value {
                    "true" => Some(ToolEvent::Security(true)),
                    "false" => Some(ToolEvent::Security(false)),
                    _ => None,
                };
            }
            "Page size" => {
                let (n, _) = leading_number(value)?;
                return u32::try_from(n).ok().map(ToolEvent::PageSize);
            }
            _ => return None,
        }
    }
    None
}

/// Split an `info` key-value line like `Device       : ATSAMD21E18A`.
fn split_info_line(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once(':')?;
    let key = key.trim();
    let value = value.trim();
    if key.is_empty() || value.is_empty() {
        return None;
    }
    Some((key, value))
}

/// Parse a decimal number at the start of `s`; returns it and the rest of
/// the string with leading whitespace removed.
fn leading_number(s: &str) -> Option<(u64, &str)> {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    if end == 0 {
        return None;
    }
    let n = s[..end].parse().ok()?;
    Some((n, s[end..].trim_start()))
}

/// Find a `(<done>/<total> pages)` counter anywhere in the line.
fn parse_page_progress(line: &str) -> Option<(u64, u64)> {
    let mut rest = line;
    while let Some(open) = rest.find('(') {
        let inner = &rest[open + 1..];
        if let Some((done, after_done)) = leading_number(inner) {
            if let Some(after_slash) = after_done.strip_prefix('/') {
                if let Some((total, tail)) = leading_number(after_slash) {
                    if tail.starts_with("pages)") {
                        return Some((done, total));
                    }
                }
            }
        }
        rest = &rest[open + 1..];
    }
    None
}

//! Flash driver.
//!
//! Drives the programmer through the fixed step sequence
//! `info -> erase -> write -> verify -> reset`, interpreting the tool's
//! output as it streams by. The `info` step doubles as the configuration
//! check: it is read-only, so a mismatched or locked device is rejected
//! before anything touches flash.

use log::{debug, info, warn};

use crate::artifact::FirmwareArtifact;
use crate::error::{Result, UpgradeError};
use crate::output::{self, ToolEvent};
use crate::profile::HardwareProfile;
use crate::progress::UpgradeProgress;
use crate::tool::{ProgrammerTool, ToolInvocation, ToolStep};

/// Outcome of a completed flash sequence.
#[derive(Debug, Clone)]
pub struct FlashResult {
    /// Bytes covered by the verify pass. A property of the image: the same
    /// artifact yields the same count on any board.
    pub bytes_verified: u64,
    /// Pages the write pass reported.
    pub pages_written: u64,
    /// Whether this was a dry run that stopped after the configuration
    /// check.
    pub dry_run: bool,
    /// Every line of programmer output, in order across all steps.
    pub transcript: Vec<String>,
}

/// Executes the flash sequence against one device.
pub struct FlashDriver<'a> {
    tool: &'a mut dyn ProgrammerTool,
    profile: &'a HardwareProfile,
    port: &'a str,
    progress: &'a mut dyn UpgradeProgress,
    transcript: Vec<String>,
}

impl<'a> FlashDriver<'a> {
    /// Build a driver for one (tool, profile, port) combination.
    pub fn new(
        tool: &'a mut dyn ProgrammerTool,
        profile: &'a HardwareProfile,
        port: &'a str,
        progress: &'a mut dyn UpgradeProgress,
    ) -> Self {
        Self {
            tool,
            profile,
            port,
            progress,
            transcript: Vec::new(),
        }
    }

    /// Run the full sequence for `artifact`.
    ///
    /// With `dry_run` set, stops after the configuration check and reports
    /// what would have been written; flash contents are untouched.
    pub fn flash(mut self, artifact: &FirmwareArtifact, dry_run: bool) -> Result<FlashResult> {
        self.check_configuration()?;

        if dry_run {
            info!(
                "dry run: would write {} bytes ({} pages) at offset 0x{:x}",
                artifact.size(),
                artifact.page_count(self.profile.page_size),
                self.profile.flash_offset
            );
            return Ok(FlashResult {
                bytes_verified: 0,
                pages_written: 0,
                dry_run: true,
                transcript: self.transcript,
            });
        }

        self.erase()?;
        let pages_written = self.write(artifact)?;
        let bytes_verified = self.verify(artifact)?;
        self.reset()?;

        Ok(FlashResult {
            bytes_verified,
            pages_written,
            dry_run: false,
            transcript: self.transcript,
        })
    }

    /// Run one programmer step, collecting the events its output produced.
    ///
    /// Recognized failure markers in the output take precedence over the
    /// bare exit code.
    fn run_step(
        &mut self,
        step: ToolStep,
        firmware: Option<&std::path::Path>,
    ) -> Result<Vec<ToolEvent>> {
        let invocation = ToolInvocation {
            step,
            profile: self.profile,
            port: self.port,
            firmware,
        };
        debug!("running programmer step '{step}'");

        let mut events = Vec::new();
        let transcript = &mut self.transcript;
        let progress = &mut *self.progress;
        let exit = self.tool.invoke(&invocation, &mut |line| {
            transcript.push(line.to_string());
            if let Some(event) = output::parse_line(line) {
                match &event {
                    ToolEvent::WriteHeader { bytes, pages } => {
                        progress.write_started(*bytes, *pages);
                    }
                    ToolEvent::VerifyHeader { bytes } => {
                        progress.verify_started(*bytes);
                    }
                    ToolEvent::PageProgress { done, total } => {
                        debug!("{step}: {done}/{total} pages");
                        match step {
                            ToolStep::Write => progress.write_progress(*done, *total),
                            ToolStep::Verify => progress.verify_progress(*done, *total),
                            _ => {}
                        }
                    }
                    _ => {}
                }
                events.push(event);
            }
        })?;

        if events.iter().any(|e| matches!(e, ToolEvent::NoDevice)) {
            return Err(UpgradeError::DeviceNotResponding {
                port: self.port.to_string(),
            });
        }
        if let Some(page) = events.iter().find_map(|e| match e {
            ToolEvent::VerifyMismatch { page } => Some(*page),
            _ => None,
        }) {
            return Err(UpgradeError::VerificationFailed {
                detail: format!("device page {page} differs from the image"),
            });
        }
        if !exit.success {
            let detail = match exit.code {
                Some(code) => format!("exit code {code}"),
                None => "killed by signal".to_string(),
            };
            return Err(UpgradeError::ToolFailed { step, detail });
        }
        Ok(events)
    }

    /// Read-only identity and configuration check against the profile.
    fn check_configuration(&mut self) -> Result<()> {
        let events = self.run_step(ToolStep::Info, None)?;

        let mut device_name = None;
        for event in &events {
            match event {
                ToolEvent::DeviceName(name) => device_name = Some(name.clone()),
                ToolEvent::Security(true) => {
                    return Err(UpgradeError::ConfigurationMismatch {
                        detail: "security bit is set; flash is locked".into(),
                    });
                }
                ToolEvent::PageSize(n) if *n != self.profile.page_size => {
                    return Err(UpgradeError::ConfigurationMismatch {
                        detail: format!(
                            "device reports {n}-byte pages, profile expects {}",
                            self.profile.page_size
                        ),
                    });
                }
                _ => {}
            }
        }

        match device_name {
            Some(name) if name.eq_ignore_ascii_case(self.profile.part) => {
                info!("device identity confirmed: {name}");
                Ok(())
            }
            Some(name) => Err(UpgradeError::ConfigurationMismatch {
                detail: format!(
                    "device reports '{name}', profile expects '{}'",
                    self.profile.part
                ),
            }),
            None => Err(UpgradeError::ConfigurationMismatch {
                detail: "device did not report its identity".into(),
            }),
        }
    }

    fn erase(&mut self) -> Result<()> {
        self.run_step(ToolStep::Erase, None)?;
        info!("application flash erased");
        Ok(())
    }

    fn write(&mut self, artifact: &FirmwareArtifact) -> Result<u64> {
        let events = self.run_step(ToolStep::Write, Some(artifact.path()))?;
        self.progress.write_finished();

        // Last page counter is authoritative; fall back to the header, then
        // to the computed count, when the tool printed none.
        let pages = events
            .iter()
            .rev()
            .find_map(|e| match e {
                ToolEvent::PageProgress { done, .. } => Some(*done),
                _ => None,
            })
            .or_else(|| {
                events.iter().find_map(|e| match e {
                    ToolEvent::WriteHeader { pages, .. } => Some(*pages),
                    _ => None,
                })
            })
            .unwrap_or_else(|| artifact.page_count(self.profile.page_size));
        info!("wrote {} bytes ({} pages)", artifact.size(), pages);
        Ok(pages)
    }

    fn verify(&mut self, artifact: &FirmwareArtifact) -> Result<u64> {
        let events = self.run_step(ToolStep::Verify, Some(artifact.path()))?;
        self.progress.verify_finished();

        // run_step already rejected an explicit page mismatch.
        if !events.iter().any(|e| matches!(e, ToolEvent::VerifyOk)) {
            return Err(UpgradeError::VerificationFailed {
                detail: "tool did not confirm the verify pass".into(),
            });
        }
        if let Some(bytes) = events.iter().find_map(|e| match e {
            ToolEvent::VerifyHeader { bytes } => Some(*bytes),
            _ => None,
        }) {
            if bytes != artifact.size() {
                return Err(UpgradeError::VerificationFailed {
                    detail: format!(
                        "verify pass covered {bytes} bytes, image is {} bytes",
                        artifact.size()
                    ),
                });
            }
        }
        info!("verified {} bytes of flash", artifact.size());
        Ok(artifact.size())
    }

    fn reset(&mut self) -> Result<()> {
        let events = self.run_step(ToolStep::Reset, None)?;
        if !events.iter().any(|e| matches!(e, ToolEvent::Reset)) {
            warn!("tool did not confirm the CPU reset");
        }
        info!("device reset into the new firmware");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile;
    use crate::progress::NoProgress;
    use crate::request::DeviceKind;
    use crate::tool::ToolExit;
    use std::fs;
    use std::path::Path;

    struct ScriptedTool {
        scripts: Vec<(ToolStep, Vec<String>, ToolExit)>,
        calls: Vec<ToolStep>,
    }

    impl ScriptedTool {
        fn new() -> Self {
            Self {
                scripts: Vec::new(),
                calls: Vec::new(),
            }
        }

        fn on(mut self, step: ToolStep, lines: &[&str], exit: ToolExit) -> Self {
            self.scripts
                .push((step, lines.iter().map(|s| s.to_string()).collect(), exit));
            self
        }
    }

    impl ProgrammerTool for ScriptedTool {
        fn invoke(
            &mut self,
            invocation: &ToolInvocation<'_>,
            on_line: &mut dyn FnMut(&str),
        ) -> Result<ToolExit> {
            self.calls.push(invocation.step);
            let (_, lines, exit) = self
                .scripts
                .iter()
                .find(|(s, _, _)| *s == invocation.step)
                .unwrap_or_else(|| panic!("unscripted step '{}'", invocation.step));
            for line in lines {
                on_line(line);
            }
            Ok(*exit)
        }
    }

    const HEALTHY_INFO: &[&str] = &[
        "Device       : ATSAMD21E18A",
        "Version      : v2.0 [mcuprog:ba2b]",
        "Security     : false",
        "BOD          : true",
        "BOR          : true",
        "Page size    : 64 bytes",
        "Pages        : 4096",
    ];

    fn happy_tool() -> ScriptedTool {
        ScriptedTool::new()
            .on(ToolStep::Info, HEALTHY_INFO, ToolExit::ok())
            .on(
                ToolStep::Erase,
                &["Erase flash", "Done in 0.820 seconds"],
                ToolExit::ok(),
            )
            .on(
                ToolStep::Write,
                &[
                    "Write 12204 bytes to flash (191 pages)",
                    "[===============               ] 52% (100/191 pages)",
                    "[==============================] 100% (191/191 pages)",
                    "Done in 4.312 seconds",
                ],
                ToolExit::ok(),
            )
            .on(
                ToolStep::Verify,
                &[
                    "Verify 12204 bytes of flash",
                    "[==============================] 100% (191/191 pages)",
                    "Verify successful",
                    "Done in 3.104 seconds",
                ],
                ToolExit::ok(),
            )
            .on(ToolStep::Reset, &["CPU reset."], ToolExit::ok())
    }

    fn battery_profile() -> HardwareProfile {
        profile::select("jetson_nano", DeviceKind::Battery).unwrap()
    }

    fn image(dir: &Path, bytes: usize) -> FirmwareArtifact {
        let path = dir.join("firmware.bin");
        fs::write(&path, vec![0xA5u8; bytes]).unwrap();
        FirmwareArtifact::from_local(&path).unwrap()
    }

    fn run(
        tool: &mut ScriptedTool,
        artifact: &FirmwareArtifact,
        dry_run: bool,
    ) -> Result<FlashResult> {
        let profile = battery_profile();
        let mut progress = NoProgress;
        FlashDriver::new(tool, &profile, "/dev/ttyACM0", &mut progress).flash(artifact, dry_run)
    }

    #[test]
    fn full_sequence_reports_bytes_and_pages() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = image(dir.path(), 12204);
        let mut tool = happy_tool();

        let result = run(&mut tool, &artifact, false).unwrap();
        assert_eq!(result.bytes_verified, 12204);
        assert_eq!(result.pages_written, 191);
        assert!(!result.dry_run);
        assert_eq!(
            tool.calls,
            vec![
                ToolStep::Info,
                ToolStep::Erase,
                ToolStep::Write,
                ToolStep::Verify,
                ToolStep::Reset,
            ]
        );
        assert!(result.transcript.iter().any(|l| l == "Verify successful"));
    }

    #[test]
    fn dry_run_stops_after_the_configuration_check() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = image(dir.path(), 12204);
        let mut tool = happy_tool();

        let result = run(&mut tool, &artifact, true).unwrap();
        assert!(result.dry_run);
        assert_eq!(result.bytes_verified, 0);
        assert_eq!(result.pages_written, 0);
        assert_eq!(tool.calls, vec![ToolStep::Info]);
    }

    #[test]
    fn locked_device_is_rejected_before_erase() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = image(dir.path(), 256);
        let mut tool = ScriptedTool::new().on(
            ToolStep::Info,
            &[
                "Device       : ATSAMD21E18A",
                "Security     : true",
                "Page size    : 64 bytes",
            ],
            ToolExit::ok(),
        );

        let err = run(&mut tool, &artifact, false).unwrap_err();
        assert!(matches!(err, UpgradeError::ConfigurationMismatch { .. }));
        assert_eq!(tool.calls, vec![ToolStep::Info]);
    }

    #[test]
    fn wrong_part_is_a_configuration_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = image(dir.path(), 256);
        let mut tool = ScriptedTool::new().on(
            ToolStep::Info,
            &[
                "Device       : ATSAMD21G18A",
                "Security     : false",
                "Page size    : 64 bytes",
            ],
            ToolExit::ok(),
        );

        let err = run(&mut tool, &artifact, false).unwrap_err();
        match err {
            UpgradeError::ConfigurationMismatch { detail } => {
                assert!(detail.contains("ATSAMD21G18A"), "detail: {detail}");
                assert!(detail.contains("atsamd21e18a"), "detail: {detail}");
            }
            other => panic!("expected ConfigurationMismatch, got {other:?}"),
        }
    }

    #[test]
    fn part_comparison_ignores_case() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = image(dir.path(), 64);
        // The tool reports uppercase; the profile stores lowercase.
        let mut tool = happy_tool();
        assert!(run(&mut tool, &artifact, true).is_ok());
    }

    #[test]
    fn wrong_page_size_is_a_configuration_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = image(dir.path(), 256);
        let mut tool = ScriptedTool::new().on(
            ToolStep::Info,
            &[
                "Device       : ATSAMD21E18A",
                "Security     : false",
                "Page size    : 256 bytes",
            ],
            ToolExit::ok(),
        );

        let err = run(&mut tool, &artifact, false).unwrap_err();
        assert!(matches!(err, UpgradeError::ConfigurationMismatch { .. }));
    }

    #[test]
    fn silent_info_step_is_a_configuration_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = image(dir.path(), 256);
        let mut tool = ScriptedTool::new().on(ToolStep::Info, &[], ToolExit::ok());

        let err = run(&mut tool, &artifact, false).unwrap_err();
        assert!(matches!(err, UpgradeError::ConfigurationMismatch { .. }));
    }

    #[test]
    fn absent_device_maps_to_device_not_responding() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = image(dir.path(), 256);
        let mut tool = ScriptedTool::new().on(
            ToolStep::Info,
            &["No device found on /dev/ttyACM0"],
            ToolExit::failed(1),
        );

        let err = run(&mut tool, &artifact, false).unwrap_err();
        match err {
            UpgradeError::DeviceNotResponding { port } => assert_eq!(port, "/dev/ttyACM0"),
            other => panic!("expected DeviceNotResponding, got {other:?}"),
        }
    }

    #[test]
    fn verify_mismatch_beats_the_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = image(dir.path(), 12204);
        let mut tool = ScriptedTool::new()
            .on(ToolStep::Info, HEALTHY_INFO, ToolExit::ok())
            .on(ToolStep::Erase, &["Erase flash"], ToolExit::ok())
            .on(
                ToolStep::Write,
                &["Write 12204 bytes to flash (191 pages)"],
                ToolExit::ok(),
            )
            .on(
                ToolStep::Verify,
                &[
                    "Verify 12204 bytes of flash",
                    "Verify failed: page 3 differs",
                ],
                ToolExit::failed(1),
            );

        let err = run(&mut tool, &artifact, false).unwrap_err();
        match err {
            UpgradeError::VerificationFailed { detail } => {
                assert!(detail.contains("page 3"), "detail: {detail}");
            }
            other => panic!("expected VerificationFailed, got {other:?}"),
        }
    }

    #[test]
    fn unconfirmed_verify_fails() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = image(dir.path(), 12204);
        let mut tool = ScriptedTool::new()
            .on(ToolStep::Info, HEALTHY_INFO, ToolExit::ok())
            .on(ToolStep::Erase, &["Erase flash"], ToolExit::ok())
            .on(
                ToolStep::Write,
                &["Write 12204 bytes to flash (191 pages)"],
                ToolExit::ok(),
            )
            .on(
                ToolStep::Verify,
                &["Verify 12204 bytes of flash"],
                ToolExit::ok(),
            );

        let err = run(&mut tool, &artifact, false).unwrap_err();
        assert!(matches!(err, UpgradeError::VerificationFailed { .. }));
    }

    #[test]
    fn short_verify_pass_fails() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = image(dir.path(), 12204);
        let mut tool = ScriptedTool::new()
            .on(ToolStep::Info, HEALTHY_INFO, ToolExit::ok())
            .on(ToolStep::Erase, &["Erase flash"], ToolExit::ok())
            .on(
                ToolStep::Write,
                &["Write 12204 bytes to flash (191 pages)"],
                ToolExit::ok(),
            )
            .on(
                ToolStep::Verify,
                &["Verify 4096 bytes of flash", "Verify successful"],
                ToolExit::ok(),
            );

        let err = run(&mut tool, &artifact, false).unwrap_err();
        match err {
            UpgradeError::VerificationFailed { detail } => {
                assert!(detail.contains("4096"), "detail: {detail}");
            }
            other => panic!("expected VerificationFailed, got {other:?}"),
        }
    }

    #[test]
    fn plain_tool_failure_names_the_step() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = image(dir.path(), 256);
        let mut tool = ScriptedTool::new()
            .on(ToolStep::Info, HEALTHY_INFO, ToolExit::ok())
            .on(ToolStep::Erase, &["Erase flash"], ToolExit::failed(3));

        let err = run(&mut tool, &artifact, false).unwrap_err();
        match err {
            UpgradeError::ToolFailed { step, detail } => {
                assert_eq!(step, ToolStep::Erase);
                assert!(detail.contains("3"), "detail: {detail}");
            }
            other => panic!("expected ToolFailed, got {other:?}"),
        }
    }
}

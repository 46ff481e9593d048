//! periflash-mcuprog - `mcuprog` subprocess backend
//!
//! This crate drives the external `mcuprog` utility, the vendor tool that
//! actually speaks the SAM-BA bootloader protocol over the serial port.
//! periflash never opens the serial device itself; it builds an argument
//! vector per step and interprets the tool's stdout.
//!
//! # Overview
//!
//! One `mcuprog` process is spawned per step (`info`, `erase`, `write`,
//! `verify`, `reset`). Output is streamed line by line to the caller as it
//! appears, and each invocation runs under a wall-clock deadline: a tool
//! that wedges on a half-dead board is killed and reported as a timeout
//! instead of hanging the upgrade forever.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use periflash_mcuprog::{McuprogConfig, McuprogTool};
//! use periflash_core::tool::{ProgrammerTool, ToolInvocation, ToolStep};
//!
//! let mut tool = McuprogTool::new(McuprogConfig::new(Duration::from_secs(120)));
//! let invocation = ToolInvocation {
//!     step: ToolStep::Info,
//!     profile: &profile,
//!     port: "/dev/ttyACM0",
//!     firmware: None,
//! };
//! tool.invoke(&invocation, &mut |line| println!("{line}"))?;
//! ```
//!
//! # System Requirements
//!
//! - `mcuprog` on `PATH` (or an explicit path via
//!   [`McuprogConfig::with_program`])
//! - read/write access to the serial device, typically via the `dialout`
//!   group
//! - the platform configuration files under `/usr/share/periflash`

use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, warn};

use periflash_core::error::{Result, UpgradeError};
use periflash_core::tool::{ProgrammerTool, ToolExit, ToolInvocation, ToolStep};

/// Program name resolved via `PATH` by default.
pub const DEFAULT_PROGRAM: &str = "mcuprog";

/// Poll interval while waiting for a child that closed its output but has
/// not exited yet.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Configuration for the subprocess backend.
#[derive(Debug, Clone)]
pub struct McuprogConfig {
    /// Program to execute.
    pub program: PathBuf,
    /// Wall-clock deadline applied to each invocation.
    pub step_timeout: Duration,
}

impl McuprogConfig {
    /// Use the default program name with the given per-step deadline.
    pub fn new(step_timeout: Duration) -> Self {
        Self::with_program(DEFAULT_PROGRAM, step_timeout)
    }

    /// Use an explicit program path with the given per-step deadline.
    pub fn with_program(program: impl Into<PathBuf>, step_timeout: Duration) -> Self {
        Self {
            program: program.into(),
            step_timeout,
        }
    }
}

/// Programmer backend that shells out to `mcuprog`.
pub struct McuprogTool {
    config: McuprogConfig,
}

impl McuprogTool {
    /// Create a backend with the given configuration.
    pub fn new(config: McuprogConfig) -> Self {
        Self { config }
    }

    fn spawn(&self, invocation: &ToolInvocation<'_>) -> Result<Child> {
        let args = invocation.to_args();
        debug!(
            "spawning {} with {:?}",
            self.config.program.display(),
            args
        );
        Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| UpgradeError::ToolFailed {
                step: invocation.step,
                detail: format!("failed to spawn '{}': {e}", self.config.program.display()),
            })
    }
}

impl ProgrammerTool for McuprogTool {
    fn invoke(
        &mut self,
        invocation: &ToolInvocation<'_>,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<ToolExit> {
        let step = invocation.step;
        let mut child = self.spawn(invocation)?;
        let deadline = Instant::now() + self.config.step_timeout;

        // Reader threads feed both output streams into one channel; the
        // deadline is enforced on the receiving side. When the last sender
        // drops, the channel disconnects and the tool is about to exit.
        let (tx, rx) = mpsc::channel::<String>();
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, tx.clone()));
        }
        drop(tx);

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(line) => on_line(&line),
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    warn!("'{step}' exceeded its deadline; killing the tool");
                    terminate(&mut child);
                    // Readers exit on EOF. An orphaned grandchild can hold
                    // the pipe open past the kill, so they are dropped
                    // rather than joined.
                    drop(readers);
                    return Err(UpgradeError::Timeout {
                        step,
                        seconds: self.config.step_timeout.as_secs(),
                    });
                }
            }
        }
        // Disconnected means both readers finished; joins are immediate.
        for reader in readers {
            let _ = reader.join();
        }

        // Output is closed; the same deadline still covers process exit.
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if Instant::now() >= deadline {
                        warn!("'{step}' closed its output but kept running; killing the tool");
                        terminate(&mut child);
                        return Err(UpgradeError::Timeout {
                            step,
                            seconds: self.config.step_timeout.as_secs(),
                        });
                    }
                    thread::sleep(EXIT_POLL_INTERVAL);
                }
                Err(e) => {
                    terminate(&mut child);
                    return Err(UpgradeError::ToolFailed {
                        step,
                        detail: format!("failed to reap the tool: {e}"),
                    });
                }
            }
        };

        debug!("'{step}' exited with {status}");
        Ok(ToolExit {
            success: status.success(),
            code: status.code(),
        })
    }
}

fn spawn_reader<R: Read + Send + 'static>(stream: R, tx: Sender<String>) -> JoinHandle<()> {
    thread::spawn(move || {
        for line in BufReader::new(stream).lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    })
}

fn terminate(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use periflash_core::profile;
    use periflash_core::request::DeviceKind;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn fake_tool(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("mcuprog");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perm = fs::metadata(&path).unwrap().permissions();
        perm.set_mode(0o755);
        fs::set_permissions(&path, perm).unwrap();
        path
    }

    fn invoke_collecting(
        program: &Path,
        timeout: Duration,
    ) -> (Result<ToolExit>, Vec<String>) {
        let profile = profile::select("jetson_nano", DeviceKind::Battery).unwrap();
        let invocation = ToolInvocation {
            step: ToolStep::Info,
            profile: &profile,
            port: "/dev/ttyACM0",
            firmware: None,
        };
        let mut tool = McuprogTool::new(McuprogConfig::with_program(program, timeout));
        let mut lines = Vec::new();
        let result = tool.invoke(&invocation, &mut |line| lines.push(line.to_string()));
        (result, lines)
    }

    #[test]
    fn lines_stream_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(
            dir.path(),
            "echo 'Device       : ATSAMD21E18A'\necho 'Security     : false'",
        );
        let (result, lines) = invoke_collecting(&tool, Duration::from_secs(5));
        let exit = result.unwrap();
        assert!(exit.success);
        assert_eq!(
            lines,
            vec!["Device       : ATSAMD21E18A", "Security     : false"]
        );
    }

    #[test]
    fn argument_vector_reaches_the_tool() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(dir.path(), "echo \"$@\"");
        let (result, lines) = invoke_collecting(&tool, Duration::from_secs(5));
        assert!(result.unwrap().success);
        let echoed = lines.join(" ");
        assert!(echoed.contains("--port /dev/ttyACM0"), "echoed: {echoed}");
        assert!(echoed.contains("--part atsamd21e18a"), "echoed: {echoed}");
        assert!(echoed.contains("--offset 0x2000"), "echoed: {echoed}");
        assert!(echoed.ends_with("info"), "echoed: {echoed}");
    }

    #[test]
    fn stderr_is_forwarded_too() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(dir.path(), "echo oops >&2\nexit 1");
        let (result, lines) = invoke_collecting(&tool, Duration::from_secs(5));
        let exit = result.unwrap();
        assert!(!exit.success);
        assert_eq!(exit.code, Some(1));
        assert_eq!(lines, vec!["oops"]);
    }

    #[test]
    fn nonzero_exit_is_reported_not_errored() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(dir.path(), "exit 3");
        let (result, _) = invoke_collecting(&tool, Duration::from_secs(5));
        assert_eq!(result.unwrap(), ToolExit::failed(3));
    }

    #[test]
    fn wedged_tool_is_killed_and_reported_as_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(dir.path(), "echo started\nexec sleep 30");
        let started = Instant::now();
        let (result, lines) = invoke_collecting(&tool, Duration::from_millis(300));
        assert!(started.elapsed() < Duration::from_secs(5), "kill was not prompt");
        assert_eq!(lines, vec!["started"]);
        match result.unwrap_err() {
            UpgradeError::Timeout { step, .. } => assert_eq!(step, ToolStep::Info),
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[test]
    fn missing_program_is_a_tool_failure() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no-such-mcuprog");
        let (result, _) = invoke_collecting(&missing, Duration::from_secs(5));
        match result.unwrap_err() {
            UpgradeError::ToolFailed { step, detail } => {
                assert_eq!(step, ToolStep::Info);
                assert!(detail.contains("failed to spawn"), "detail: {detail}");
            }
            other => panic!("expected ToolFailed, got {other:?}"),
        }
    }
}

//! Programmer tool abstraction.
//!
//! The pipeline never shells out directly; it describes an invocation and
//! hands it to a [`ProgrammerTool`]. The real backend spawns `mcuprog`,
//! the dummy backend emulates a device in memory, and both produce the
//! same line-oriented output stream.

use std::ffi::OsString;
use std::fmt;
use std::path::Path;

use crate::error::Result;
use crate::profile::HardwareProfile;

/// One step of the flashing sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStep {
    /// Read device identity and configuration without touching flash.
    Info,
    /// Erase the application flash region.
    Erase,
    /// Write the firmware image.
    Write,
    /// Read back and compare against the image.
    Verify,
    /// Reset the MCU into the new firmware.
    Reset,
}

impl ToolStep {
    /// The action word passed on the tool's command line.
    pub fn action(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Erase => "erase",
            Self::Write => "write",
            Self::Verify => "verify",
            Self::Reset => "reset",
        }
    }
}

impl fmt::Display for ToolStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.action())
    }
}

/// A fully-specified programmer invocation.
#[derive(Debug)]
pub struct ToolInvocation<'a> {
    /// Step to execute.
    pub step: ToolStep,
    /// Hardware profile supplying config file, part, baud and offset.
    pub profile: &'a HardwareProfile,
    /// Serial device to use.
    pub port: &'a str,
    /// Firmware image, for steps that take one (write, verify).
    pub firmware: Option<&'a Path>,
}

impl ToolInvocation<'_> {
    /// Render the invocation as a command-line argument vector.
    ///
    /// Every invocation carries the full parameter set even when the step
    /// ignores some of it; the tool tolerates that and it keeps the call
    /// sites uniform.
    pub fn to_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--config".into(),
            self.profile.programmer_config.as_os_str().to_os_string(),
            "--port".into(),
            self.port.into(),
            "--baud".into(),
            self.profile.baud.to_string().into(),
            "--part".into(),
            self.profile.part.into(),
            "--offset".into(),
            format!("0x{:x}", self.profile.flash_offset).into(),
            self.step.action().into(),
        ];
        if let Some(fw) = self.firmware {
            args.push(fw.as_os_str().to_os_string());
        }
        args
    }
}

/// Exit status of a tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolExit {
    /// Whether the tool exited zero.
    pub success: bool,
    /// Raw exit code when the process produced one.
    pub code: Option<i32>,
}

impl ToolExit {
    /// A successful exit.
    pub fn ok() -> Self {
        Self {
            success: true,
            code: Some(0),
        }
    }

    /// A failed exit with the given code.
    pub fn failed(code: i32) -> Self {
        Self {
            success: false,
            code: Some(code),
        }
    }
}

/// Executes programmer invocations.
///
/// `on_line` receives each line of tool output as it appears, in order,
/// before the call returns. Implementations map their own failure modes
/// (spawn failure, deadline expiry) onto the pipeline error taxonomy and
/// leave output interpretation to the caller.
pub trait ProgrammerTool {
    /// Run one invocation to completion or deadline.
    fn invoke(
        &mut self,
        invocation: &ToolInvocation<'_>,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<ToolExit>;
}

//! Upgrade orchestration.
//!
//! Wires the pipeline stages together around one [`UpgradeRequest`]:
//! resolve the firmware source, select the hardware profile, drive the
//! flash sequence. The runner owns the lifecycle state machine and
//! attributes every failure to the stage that raised it. Running consumes
//! the runner, so one runner is one attempt; a retry means a fresh runner
//! with a fresh tracker.

use std::error::Error;
use std::fmt;

use log::{error, info};

use crate::driver::{FlashDriver, FlashResult};
use crate::error::UpgradeError;
use crate::profile;
use crate::progress::UpgradeProgress;
use crate::request::UpgradeRequest;
use crate::source;
use crate::status::{StatusTracker, UpgradeStatus};
use crate::store::ArtifactStore;
use crate::tool::ProgrammerTool;

/// Pipeline stage a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Locating or downloading the firmware image.
    SourceResolution,
    /// Mapping the platform tag onto a hardware profile.
    ProfileSelection,
    /// Driving the programmer.
    Flashing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SourceResolution => "firmware source resolution",
            Self::ProfileSelection => "hardware profile selection",
            Self::Flashing => "flashing",
        })
    }
}

/// A pipeline error together with the stage it occurred in.
#[derive(Debug)]
pub struct UpgradeFailure {
    /// Stage that raised the error.
    pub stage: Stage,
    /// The underlying pipeline error.
    pub error: UpgradeError,
}

impl fmt::Display for UpgradeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.error)
    }
}

impl Error for UpgradeFailure {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.error)
    }
}

/// What one upgrade attempt produced.
#[derive(Debug)]
pub struct UpgradeOutcome {
    /// Flash result, or the failure attributed to its pipeline stage.
    pub result: Result<FlashResult, UpgradeFailure>,
    /// Terminal status the attempt ended in.
    pub status: UpgradeStatus,
    /// Every lifecycle state the attempt visited, in order.
    pub history: Vec<UpgradeStatus>,
}

/// Runs one upgrade attempt end to end.
pub struct UpgradeRunner<'a> {
    request: &'a UpgradeRequest,
    store: &'a dyn ArtifactStore,
    tool: &'a mut dyn ProgrammerTool,
    progress: &'a mut dyn UpgradeProgress,
    status: StatusTracker,
}

impl<'a> UpgradeRunner<'a> {
    /// Build a runner around a request and its collaborators.
    pub fn new(
        request: &'a UpgradeRequest,
        store: &'a dyn ArtifactStore,
        tool: &'a mut dyn ProgrammerTool,
        progress: &'a mut dyn UpgradeProgress,
    ) -> Self {
        Self {
            request,
            store,
            tool,
            progress,
            status: StatusTracker::new(),
        }
    }

    /// Execute the attempt.
    ///
    /// Consumes the runner: terminal states are sticky, and a consumed
    /// runner cannot be asked to run again. The outcome carries the result
    /// together with the lifecycle trail the tracker recorded.
    pub fn run(mut self) -> UpgradeOutcome {
        info!(
            "upgrading {} firmware on {} (platform: {}, source: {})",
            self.request.device,
            self.request.port,
            self.request.platform_tag,
            match self.request.source {
                crate::request::SourceMode::Remote => "store",
                crate::request::SourceMode::Local => "local",
            }
        );
        self.status.transition(UpgradeStatus::Running);

        let result = match self.execute() {
            Ok(result) => {
                self.status.transition(UpgradeStatus::Succeeded);
                Ok(result)
            }
            Err(failure) => {
                error!("{failure}");
                self.status.transition(UpgradeStatus::Failed);
                Err(failure)
            }
        };
        UpgradeOutcome {
            result,
            status: self.status.current(),
            history: self.status.into_history(),
        }
    }

    fn execute(&mut self) -> Result<FlashResult, UpgradeFailure> {
        let at = |stage: Stage| move |error: UpgradeError| UpgradeFailure { stage, error };

        let artifact = source::resolve(self.request, self.store, self.progress)
            .map_err(at(Stage::SourceResolution))?;

        let profile = profile::select(&self.request.platform_tag, self.request.device)
            .map_err(at(Stage::ProfileSelection))?;

        let driver = FlashDriver::new(self.tool, &profile, &self.request.port, self.progress);
        driver
            .flash(&artifact, self.request.dry_run)
            .map_err(at(Stage::Flashing))
    }
}

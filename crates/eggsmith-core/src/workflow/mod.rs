//! Workflow orchestration: prepare, generate, copy and the composed automatic run.

mod prompt;


use crate::artifact::{format_size, Artifact, ArtifactLocator};
use crate::config::EggsmithConfig;
use crate::copy::{ChunkedCopier, CopyTally};
use crate::eggs_yaml::{self, EggsSettings, PermissionGuard};
use crate::error::{EggsmithError, EggsmithResult};
use crate::events::{EngineEvent, EventBus};
use crate::runner::{CommandDescriptor, CommandExecutor, OutputLine};
use crate::sequencer::{SequenceObserver, Sequencer};
use crate::timer::{CounterKind, ElapsedTracker, Ticker};
use crate::toolchain::{EggsToolchain, PrepareOptions, ProduceOptions, ToolchainCommands};
use log::{error, info, warn};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use prompt::{CopyPrompt, PresetCopyPrompt};

/// Severity levels used when reporting workflow events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowLevel {
    Info,
    Success,
    Warn,
    Error,
    /// Privilege-sensitive actions such as widening file permissions.
    Security,
}

/// Single user-facing notice produced by a workflow step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowEvent {
    pub level: WorkflowLevel,
    pub message: String,
}

/// Aggregated report returned by any workflow entry point.
#[derive(Debug, Clone, Default)]
pub struct WorkflowReport {
    pub title: String,
    pub events: Vec<WorkflowEvent>,
    /// Filled by [`WorkflowController::probe_versions`].
    pub versions: Option<ToolchainVersions>,
}

impl WorkflowReport {
    fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn has_errors(&self) -> bool {
        self.events.iter().any(|e| e.level == WorkflowLevel::Error)
    }
}

/// Versions reported by the external toolchain, `N/A` when unavailable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainVersions {
    pub eggs: String,
    pub installer: String,
}

pub(crate) fn event(level: WorkflowLevel, message: impl Into<String>) -> WorkflowEvent {
    WorkflowEvent {
        level,
        message: message.into(),
    }
}

/// Where the controller currently is in the image-building flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    Idle,
    Preparing,
    AwaitingPhase2,
    Generating,
    AwaitingCopyDestination,
    Copying,
    AutoRunning,
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WorkflowState::Idle => "idle",
            WorkflowState::Preparing => "preparing",
            WorkflowState::AwaitingPhase2 => "awaiting phase 2",
            WorkflowState::Generating => "generating",
            WorkflowState::AwaitingCopyDestination => "awaiting a copy destination",
            WorkflowState::Copying => "copying",
            WorkflowState::AutoRunning => "running automatically",
        };
        f.write_str(label)
    }
}

/// Options for the composed one-shot run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AutoOptions {
    pub prepare: PrepareOptions,
    pub produce: ProduceOptions,
}

enum CopyOutcome {
    Finished,
    Skipped,
}

/// Forwards sequencer callbacks onto the bus and into the report.
struct BusObserver<'a> {
    bus: &'a EventBus,
    events: &'a mut Vec<WorkflowEvent>,
}

impl SequenceObserver for BusObserver<'_> {
    fn on_step_started(&mut self, index: usize, total: usize, descriptor: &CommandDescriptor) {
        let message = format!("[{}/{}] {}", index + 1, total, descriptor.command);
        self.bus
            .post(EngineEvent::Output(OutputLine::runner(message.clone())));
        self.events.push(event(WorkflowLevel::Info, message));
    }

    fn on_line(&mut self, line: OutputLine) {
        self.bus.post(EngineEvent::Output(line));
    }
}

/// Owns every piece of session state and drives the external toolchain.
///
/// Operations block until their work is done; front-ends run the controller
/// on a worker thread and render what arrives on the [`EventBus`].
pub struct WorkflowController<E: CommandExecutor> {
    executor: E,
    toolchain: Box<dyn ToolchainCommands>,
    tracker: Arc<ElapsedTracker>,
    _ticker: Ticker,
    copier: ChunkedCopier,
    tally: CopyTally,
    locator: ArtifactLocator,
    bus: EventBus,
    state: WorkflowState,
    eggs_yaml: PathBuf,
    workspace_dir: PathBuf,
}

impl<E: CommandExecutor> WorkflowController<E> {
    pub fn new(executor: E, config: &EggsmithConfig, bus: EventBus) -> EggsmithResult<Self> {
        let publisher = bus.clone();
        let tracker = Arc::new(ElapsedTracker::with_publisher(move |update| {
            publisher.post(EngineEvent::Timer(update));
        }));
        let ticker = Ticker::spawn(Arc::clone(&tracker), config.tick_period())?;

        Ok(Self {
            executor,
            toolchain: Box::new(EggsToolchain::from_config(config)),
            tracker,
            _ticker: ticker,
            copier: config.copier(),
            tally: CopyTally::new(),
            locator: config.artifact_locator(),
            bus,
            state: WorkflowState::Idle,
            eggs_yaml: config.paths.eggs_yaml.clone(),
            workspace_dir: config.paths.workspace_dir.clone(),
        })
    }

    /// Swap the command builder, e.g. for a different toolchain layout.
    pub fn with_toolchain(mut self, toolchain: Box<dyn ToolchainCommands>) -> Self {
        self.toolchain = toolchain;
        self
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn copy_tally(&self) -> u64 {
        self.tally.get()
    }

    pub fn tracker(&self) -> &ElapsedTracker {
        &self.tracker
    }

    fn set_state(&mut self, state: WorkflowState) {
        if self.state != state {
            info!("workflow {} -> {}", self.state, state);
            self.state = state;
            self.bus.post(EngineEvent::State(state));
        }
    }

    fn require(&self, action: &'static str, allowed: &[WorkflowState]) -> EggsmithResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(EggsmithError::InvalidState {
                action,
                state: self.state.to_string(),
            })
        }
    }

    fn notify(&self, events: &mut Vec<WorkflowEvent>, level: WorkflowLevel, message: impl Into<String>) {
        let notice = event(level, message);
        self.bus.post(EngineEvent::Notice(notice.clone()));
        events.push(notice);
    }

    /// Surface a step failure on both channels (log line and notice) and drop to `Idle`.
    fn fail_step(&mut self, events: &mut Vec<WorkflowEvent>, err: &EggsmithError) {
        let message = err.to_string();
        error!("{message}");
        self.bus
            .post(EngineEvent::Output(OutputLine::runner(message.clone())));
        self.notify(events, WorkflowLevel::Error, message);
        self.set_state(WorkflowState::Idle);
    }

    fn run_sequence(
        &self,
        commands: &[CommandDescriptor],
        events: &mut Vec<WorkflowEvent>,
    ) -> EggsmithResult<()> {
        let mut observer = BusObserver {
            bus: &self.bus,
            events,
        };
        Sequencer::new(&self.executor)
            .run(commands, &mut observer)
            .map(|_| ())
    }

    /// Run the cleanup/install commands and open phase 2.
    pub fn prepare(&mut self, options: PrepareOptions) -> EggsmithResult<WorkflowReport> {
        self.require(
            "prepare the environment",
            &[WorkflowState::Idle, WorkflowState::AwaitingPhase2],
        )?;
        let mut report = WorkflowReport::new("Prepare environment");
        match self.prepare_step(options, &mut report.events) {
            Ok(()) => Ok(report),
            Err(err) => {
                self.fail_step(&mut report.events, &err);
                Err(err)
            }
        }
    }

    fn prepare_step(
        &mut self,
        options: PrepareOptions,
        events: &mut Vec<WorkflowEvent>,
    ) -> EggsmithResult<()> {
        self.set_state(WorkflowState::Preparing);
        let commands = self.toolchain.prepare_commands(&options);
        if commands.is_empty() {
            self.notify(events, WorkflowLevel::Info, "No preparation selected");
        }
        self.run_sequence(&commands, events)?;
        self.notify(events, WorkflowLevel::Success, "Environment prepared");
        self.set_state(WorkflowState::AwaitingPhase2);
        Ok(())
    }

    /// Copy the current user's configuration into the live skeleton.
    pub fn replicate_skel(&mut self) -> EggsmithResult<WorkflowReport> {
        self.require(
            "replicate the user skeleton",
            &[WorkflowState::Idle, WorkflowState::AwaitingPhase2],
        )?;
        let mut report = WorkflowReport::new("Replicate user skeleton");
        let command = self.toolchain.skel_command();
        match self.run_sequence(std::slice::from_ref(&command), &mut report.events) {
            Ok(()) => {
                self.notify(&mut report.events, WorkflowLevel::Success, "User skeleton replicated");
                Ok(report)
            }
            Err(err) => {
                self.report_option_failure(&mut report.events, &err);
                Err(err)
            }
        }
    }

    /// Rewrite the selected eggs.yaml keys with temporarily widened permissions.
    pub fn edit_eggs_settings(&mut self, update: &EggsSettings) -> EggsmithResult<WorkflowReport> {
        self.require(
            "edit eggs.yaml",
            &[WorkflowState::Idle, WorkflowState::AwaitingPhase2],
        )?;
        let mut report = WorkflowReport::new("Edit eggs.yaml");
        match self.edit_step(update, &mut report.events) {
            Ok(()) => Ok(report),
            Err(err) => {
                self.report_option_failure(&mut report.events, &err);
                Err(err)
            }
        }
    }

    fn edit_step(&self, update: &EggsSettings, events: &mut Vec<WorkflowEvent>) -> EggsmithResult<()> {
        if update.is_empty() {
            self.notify(events, WorkflowLevel::Info, "No eggs.yaml changes requested");
            return Ok(());
        }
        update.check()?;

        let bus = self.bus.clone();
        let sink = move |line: OutputLine| {
            bus.post(EngineEvent::Output(line));
        };
        let mut guard = PermissionGuard::widen(&self.executor, &*self.toolchain, &sink, &self.eggs_yaml)?;
        self.notify(
            events,
            WorkflowLevel::Security,
            format!("Permissions on {} widened for editing", self.eggs_yaml.display()),
        );

        let written = eggs_yaml::edit_file(guard.path(), update)?;
        guard.restore()?;
        self.notify(
            events,
            WorkflowLevel::Security,
            format!("Permissions on {} restored", self.eggs_yaml.display()),
        );

        let mut changed = Vec::new();
        if update.root_passwd.is_some() {
            changed.push("root_passwd");
        }
        if update.snapshot_basename.is_some() {
            changed.push("snapshot_basename");
        }
        if update.snapshot_prefix.is_some() {
            changed.push("snapshot_prefix");
        }
        if update.user_opt_passwd.is_some() {
            changed.push("user_opt_passwd");
        }
        self.notify(
            events,
            WorkflowLevel::Success,
            format!("Updated {}", changed.join(", ")),
        );
        if let Some(basename) = written.snapshot_basename {
            self.notify(events, WorkflowLevel::Info, format!("Snapshot basename is now {basename}"));
        }
        Ok(())
    }

    /// Phase-2 options keep the current state; only the main flow resets to `Idle`.
    fn report_option_failure(&self, events: &mut Vec<WorkflowEvent>, err: &EggsmithError) {
        let message = err.to_string();
        warn!("{message}");
        self.bus
            .post(EngineEvent::Output(OutputLine::runner(message.clone())));
        self.notify(events, WorkflowLevel::Error, message);
    }

    /// Produce the image. Maximum compression wins over including user data.
    pub fn generate(&mut self, options: ProduceOptions) -> EggsmithResult<WorkflowReport> {
        self.require("generate an image", &[WorkflowState::AwaitingPhase2])?;
        let mut report = WorkflowReport::new("Generate image");
        match self.generate_step(options, &mut report.events) {
            Ok(()) => Ok(report),
            Err(err) => {
                self.fail_step(&mut report.events, &err);
                Err(err)
            }
        }
    }

    fn generate_step(
        &mut self,
        options: ProduceOptions,
        events: &mut Vec<WorkflowEvent>,
    ) -> EggsmithResult<()> {
        if options.include_data && options.max_compression {
            self.notify(
                events,
                WorkflowLevel::Warn,
                "Maximum compression selected; user data will not be included",
            );
        }
        self.set_state(WorkflowState::Generating);
        let command = self.toolchain.produce_command(&options);

        self.tracker.start(CounterKind::Generate);
        let outcome = self.run_sequence(std::slice::from_ref(&command), events);
        self.tracker.stop(CounterKind::Generate);
        outcome?;

        match self.locator.locate() {
            Ok(artifact) => self.announce_artifact(&artifact, events),
            Err(err) => self.notify(events, WorkflowLevel::Warn, err.to_string()),
        }
        self.notify(events, WorkflowLevel::Success, "Image generated");
        self.set_state(WorkflowState::AwaitingCopyDestination);
        Ok(())
    }

    fn announce_artifact(&self, artifact: &Artifact, events: &mut Vec<WorkflowEvent>) {
        self.bus.post(EngineEvent::Artifact {
            path: artifact.path.clone(),
            size: artifact.size,
        });
        self.notify(
            events,
            WorkflowLevel::Info,
            format!(
                "Image {} ({})",
                artifact.path.display(),
                format_size(artifact.size)
            ),
        );
    }

    /// Copy the generated image, repeating for as long as the prompt asks for more.
    pub fn copy(&mut self, prompt: &mut dyn CopyPrompt) -> EggsmithResult<WorkflowReport> {
        self.require("copy the image", &[WorkflowState::AwaitingCopyDestination])?;
        let mut report = WorkflowReport::new("Copy image");
        match self.copy_loop(prompt, &mut report.events) {
            Ok(_) => Ok(report),
            Err(err) => {
                self.fail_step(&mut report.events, &err);
                Err(err)
            }
        }
    }

    fn copy_loop(
        &mut self,
        prompt: &mut dyn CopyPrompt,
        events: &mut Vec<WorkflowEvent>,
    ) -> EggsmithResult<CopyOutcome> {
        let mut copies_this_run = 0u64;
        loop {
            let artifact = self.locator.locate()?;

            let fast = if copies_this_run == 0 && self.tally.get() == 0 {
                prompt.first_copy_fast()
            } else {
                prompt.fast_copy(self.tally.get())
            };
            let Some(dir) = prompt.destination() else {
                self.notify(events, WorkflowLevel::Warn, "No destination chosen; copy skipped");
                return Ok(CopyOutcome::Skipped);
            };

            self.copy_once(&artifact, &dir, fast, events)?;
            copies_this_run += 1;

            if prompt.copy_again() {
                self.set_state(WorkflowState::AwaitingCopyDestination);
                continue;
            }
            self.set_state(WorkflowState::Idle);
            return Ok(CopyOutcome::Finished);
        }
    }

    fn copy_once(
        &mut self,
        artifact: &Artifact,
        dir: &Path,
        fast: bool,
        events: &mut Vec<WorkflowEvent>,
    ) -> EggsmithResult<()> {
        let file_name = artifact
            .path
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("image.iso"));
        let destination = dir.join(file_name);
        if !dir.is_dir() {
            return Err(EggsmithError::TransferFailed {
                artifact: artifact.path.clone(),
                destination,
                reason: "destination directory does not exist".to_string(),
            });
        }

        self.set_state(WorkflowState::Copying);
        self.tracker.start(CounterKind::Copy);
        let bus = &self.bus;
        let outcome = self.copier.copy(
            &artifact.path,
            &destination,
            fast,
            &self.tally,
            &mut |fraction| {
                bus.post(EngineEvent::Progress(fraction));
            },
        );
        self.tracker.stop(CounterKind::Copy);
        let transfer = outcome?;

        self.bus.post(EngineEvent::Tally(self.tally.get()));
        self.notify(
            events,
            WorkflowLevel::Success,
            format!(
                "Copied {} to {} ({})",
                artifact.path.display(),
                transfer.destination.display(),
                format_size(transfer.bytes_total)
            ),
        );
        Ok(())
    }

    /// Prepare, generate and copy in one go without per-step gating.
    pub fn auto_run(
        &mut self,
        options: AutoOptions,
        prompt: &mut dyn CopyPrompt,
    ) -> EggsmithResult<WorkflowReport> {
        self.require("start an automatic run", &[WorkflowState::Idle])?;
        let mut report = WorkflowReport::new("Automatic run");
        self.set_state(WorkflowState::AutoRunning);
        self.tracker.start(CounterKind::Auto);

        let outcome = self.auto_steps(options, prompt, &mut report.events);
        self.tracker.stop(CounterKind::Auto);
        match outcome {
            Ok(CopyOutcome::Finished) => {
                self.notify(&mut report.events, WorkflowLevel::Success, "Automatic run complete");
                Ok(report)
            }
            Ok(CopyOutcome::Skipped) => Ok(report),
            Err(err) => {
                self.fail_step(&mut report.events, &err);
                Err(err)
            }
        }
    }

    fn auto_steps(
        &mut self,
        options: AutoOptions,
        prompt: &mut dyn CopyPrompt,
        events: &mut Vec<WorkflowEvent>,
    ) -> EggsmithResult<CopyOutcome> {
        self.prepare_step(options.prepare, events)?;
        self.generate_step(options.produce, events)?;
        self.copy_loop(prompt, events)
    }

    /// Ask the toolchain for its versions. Never fails; missing tools read `N/A`.
    pub fn probe_versions(&self) -> WorkflowReport {
        let mut report = WorkflowReport::new("Toolchain versions");
        let eggs = self
            .capture(&self.toolchain.version_command())
            .and_then(|lines| lines.into_iter().find(|l| !l.trim().is_empty()))
            .map(|l| l.trim().to_string())
            .unwrap_or_else(|| "N/A".to_string());
        let installer = self
            .capture(&self.toolchain.installer_version_command())
            .and_then(|lines| {
                lines
                    .iter()
                    .rev()
                    .find_map(|l| l.split_whitespace().last().map(str::to_string))
            })
            .unwrap_or_else(|| "N/A".to_string());

        self.notify(&mut report.events, WorkflowLevel::Info, format!("eggs: {eggs}"));
        self.notify(
            &mut report.events,
            WorkflowLevel::Info,
            format!("installer: {installer}"),
        );
        report.versions = Some(ToolchainVersions { eggs, installer });
        report
    }

    fn capture(&self, command: &CommandDescriptor) -> Option<Vec<String>> {
        let mut lines = Vec::new();
        let result = self.executor.run(command, &mut |line| {
            if line.source != crate::runner::LineSource::Runner {
                lines.push(line.text);
            }
        });
        match result {
            Ok(_) => Some(lines),
            Err(err) => {
                warn!("version probe `{}` failed: {err}", command.command);
                None
            }
        }
    }

    /// Best-effort removal of the toolchain's scratch tree. Failures are reported, never raised.
    pub fn teardown(&mut self) -> WorkflowReport {
        let mut report = WorkflowReport::new("Session teardown");
        for kind in CounterKind::ALL {
            self.tracker.stop(kind);
        }

        if self.workspace_dir.exists() {
            let command = self.toolchain.remove_tree_command(&self.workspace_dir);
            let bus = &self.bus;
            let outcome = self.executor.run(&command, &mut |line| {
                bus.post(EngineEvent::Output(line));
            });
            match outcome {
                Ok(_) => self.notify(
                    &mut report.events,
                    WorkflowLevel::Success,
                    format!("Removed {}", self.workspace_dir.display()),
                ),
                Err(err) => self.notify(
                    &mut report.events,
                    WorkflowLevel::Error,
                    format!("Could not remove {}: {err}", self.workspace_dir.display()),
                ),
            }
        } else {
            self.notify(
                &mut report.events,
                WorkflowLevel::Info,
                format!("Nothing to clean at {}", self.workspace_dir.display()),
            );
        }

        self.set_state(WorkflowState::Idle);
        report
    }
}

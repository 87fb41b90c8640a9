//! End-to-end runs of the controller against a real shell.

use eggsmith_core::config::EggsmithConfig;
use eggsmith_core::events::{EngineEvent, EventBus};
use eggsmith_core::runner::{CommandDescriptor, LineSource, ShellRunner};
use eggsmith_core::timer::{CounterId, CounterKind};
use eggsmith_core::toolchain::{PrepareOptions, ProduceOptions, ToolchainCommands};
use eggsmith_core::workflow::{AutoOptions, PresetCopyPrompt, WorkflowController, WorkflowState};
use eggsmith_core::EggsmithError;
use std::fs;
use std::path::{Path, PathBuf};

/// Stand-in toolchain that only uses unprivileged POSIX utilities.
struct ShellToolchain {
    artifact_dir: PathBuf,
    fail_prepare: bool,
}

impl ToolchainCommands for ShellToolchain {
    fn prepare_commands(&self, _options: &PrepareOptions) -> Vec<CommandDescriptor> {
        let middle = if self.fail_prepare { "false" } else { "echo cleaned" };
        vec![
            CommandDescriptor::user("echo killing"),
            CommandDescriptor::user(middle),
            CommandDescriptor::user("echo configured"),
        ]
    }

    fn produce_command(&self, options: &ProduceOptions) -> CommandDescriptor {
        let flavour = if options.max_compression { "max" } else { "plain" };
        CommandDescriptor::user(format!(
            "mkdir -p {dir} && head -c 2097152 /dev/zero > {dir}/{flavour}.iso && printf '\\033[1;32mdone\\033[0m\\n'",
            dir = self.artifact_dir.display()
        ))
    }

    fn skel_command(&self) -> CommandDescriptor {
        CommandDescriptor::user("true")
    }

    fn update_commands(&self) -> Vec<CommandDescriptor> {
        Vec::new()
    }

    fn version_command(&self) -> CommandDescriptor {
        CommandDescriptor::user("echo 'penguins-eggs/10.0.30 linux-x64'")
    }

    fn installer_version_command(&self) -> CommandDescriptor {
        CommandDescriptor::user("exit 127")
    }

    fn chmod_command(&self, path: &Path, mode: u32) -> CommandDescriptor {
        CommandDescriptor::user(format!("chmod {mode:o} {}", path.display()))
    }

    fn remove_tree_command(&self, path: &Path) -> CommandDescriptor {
        CommandDescriptor::user(format!("rm -rf -- {}", path.display()))
    }
}

fn config_in(dir: &Path) -> EggsmithConfig {
    let mut config = EggsmithConfig::default();
    config.paths.workspace_dir = dir.join("workspace");
    config.paths.artifact_dir = dir.join("workspace").join(".mnt");
    config.paths.eggs_yaml = dir.join("eggs.yaml");
    config.copy.throttle_ms = 0;
    config.timer.tick_ms = 3_600_000;
    config
}

fn controller_in(
    dir: &Path,
    fail_prepare: bool,
) -> (
    WorkflowController<ShellRunner>,
    eggsmith_core::events::EventReceiver,
) {
    let config = config_in(dir);
    let (bus, rx) = EventBus::channel(16_384);
    let runner = ShellRunner::unprivileged().with_filter(config.output_filter());
    let controller = WorkflowController::new(runner, &config, bus)
        .unwrap()
        .with_toolchain(Box::new(ShellToolchain {
            artifact_dir: config.paths.artifact_dir.clone(),
            fail_prepare,
        }));
    (controller, rx)
}

#[test]
fn automatic_run_copies_two_mib_image_in_two_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("usb");
    fs::create_dir_all(&dest).unwrap();
    let (mut controller, rx) = controller_in(dir.path(), false);

    let mut prompt = PresetCopyPrompt::new([dest.clone()], true);
    controller
        .auto_run(
            AutoOptions {
                prepare: PrepareOptions::default(),
                produce: ProduceOptions {
                    include_data: true,
                    max_compression: true,
                },
            },
            &mut prompt,
        )
        .unwrap();

    assert_eq!(controller.copy_tally(), 1);
    assert_eq!(fs::metadata(dest.join("max.iso")).unwrap().len(), 2 * 1024 * 1024);

    drop(controller);
    let events: Vec<EngineEvent> = rx.into_iter().collect();

    let progress: Vec<f64> = events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::Progress(p) => Some(*p),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![0.5, 1.0]);

    let stdout: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::Output(line) if line.source == LineSource::Stdout => Some(line.text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(stdout, vec!["killing", "cleaned", "configured", "done"]);

    assert!(events.iter().any(|e| matches!(
        e,
        EngineEvent::Artifact { size, .. } if *size == 2 * 1024 * 1024
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        EngineEvent::Timer(update)
            if update.counter == CounterId::Named(CounterKind::Auto) && !update.running
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        EngineEvent::Timer(update) if update.counter == CounterId::Total && !update.running
    )));
}

#[test]
fn failing_prepare_step_never_runs_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let (mut controller, rx) = controller_in(dir.path(), true);

    let err = controller.prepare(PrepareOptions::default()).unwrap_err();
    assert!(matches!(
        err,
        EggsmithError::CommandFailed { code: 1, ref command } if command == "false"
    ));
    assert_eq!(controller.state(), WorkflowState::Idle);

    drop(controller);
    let texts: Vec<String> = rx
        .into_iter()
        .filter_map(|e| match e {
            EngineEvent::Output(line) => Some(line.text),
            _ => None,
        })
        .collect();
    assert!(texts.iter().any(|t| t == "killing"));
    assert!(!texts.iter().any(|t| t == "configured"));
}

#[test]
fn teardown_and_versions_use_the_toolchain() {
    let dir = tempfile::tempdir().unwrap();
    let workspace = dir.path().join("workspace");
    fs::create_dir_all(workspace.join("iso")).unwrap();
    let (mut controller, _rx) = controller_in(dir.path(), false);

    let versions = controller.probe_versions().versions.unwrap();
    assert_eq!(versions.eggs, "penguins-eggs/10.0.30 linux-x64");
    assert_eq!(versions.installer, "N/A");

    let report = controller.teardown();
    assert!(!report.has_errors());
    assert!(!workspace.exists());
}

//! eggsmith command-line front-end for building penguins-eggs live images.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use eggsmith_core::{
    config::{bootstrap_template, EggsmithConfig},
    eggs_yaml::{read_settings, EggsSettings},
    events::EventBus,
    logging,
    runner::{running_as_root, ShellRunner},
    toolchain::{PrepareOptions, ProduceOptions},
    workflow::{AutoOptions, PresetCopyPrompt, WorkflowController},
    SessionCredential,
};
use log::warn;
use rpassword::prompt_password;
use schemars::schema_for;
use serde_json::to_string_pretty;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

mod render;
mod ui;

use render::print_report;
use ui::{Interrupt, StopOnInterrupt, Ui};

/// Top-level command-line options shared by every subcommand.
#[derive(Parser, Debug)]
#[command(
    name = "eggsmith",
    version,
    about = "Drive penguins-eggs to prepare, produce and copy live ISO images."
)]
struct Cli {
    /// Path to the eggsmith configuration file (defaults to $EGGSMITH_CONFIG or the per-user file).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging (RUST_LOG still wins).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Guided run: prepare, optional phase 2, generate, copy. Cleans up on exit.
    Session,

    /// One-shot run that chains every step without questions.
    Auto {
        /// Directory to copy the image into; repeat to make several copies.
        #[arg(long = "dest", required = true)]
        destinations: Vec<PathBuf>,

        /// Copy without the progress throttle.
        #[arg(long)]
        fast: bool,

        /// Include user data in the image (`--clone`).
        #[arg(long)]
        with_data: bool,

        /// Maximum compression; overrides --with-data.
        #[arg(long)]
        max: bool,

        /// Install or refresh the calamares installer.
        #[arg(long)]
        installer: bool,

        /// Skip killing sessions and cleaning caches before producing.
        #[arg(long)]
        no_cleanup: bool,
    },

    /// Print the eggs and installer versions.
    Versions,

    /// Inspect the configuration.
    Config {
        /// Print the JSON schema of the configuration file.
        #[arg(long, conflicts_with_all = ["validate", "template"])]
        schema: bool,

        /// Report configuration issues and exit non-zero when any exist.
        #[arg(long, conflicts_with = "template")]
        validate: bool,

        /// Print the bootstrap template.
        #[arg(long)]
        template: bool,
    },
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init(if cli.verbose { "debug" } else { "info" });

    match cli.command {
        Commands::Config {
            schema,
            validate,
            template,
        } => {
            if schema {
                let schema = schema_for!(EggsmithConfig);
                println!("{}", to_string_pretty(&schema)?);
                return Ok(());
            }
            if template {
                print!("{}", bootstrap_template());
                return Ok(());
            }
            let config = load_cli_config(cli.config.as_ref())?;
            let issues = config.validate();
            if validate {
                if issues.is_empty() {
                    println!("{}: OK", config.path.display());
                    return Ok(());
                }
                for issue in &issues {
                    println!("  - {issue}");
                }
                bail!("{} configuration issue(s) found", issues.len());
            }
            print_settings(&config);
            Ok(())
        }
        Commands::Versions => {
            let config = load_cli_config(cli.config.as_ref())?;
            let mut session = Session::start(&config, Interrupt::default())?;
            let report = session.ui.on_worker(|| session.controller.probe_versions());
            print_report(&report);
            Ok(())
        }
        Commands::Auto {
            destinations,
            fast,
            with_data,
            max,
            installer,
            no_cleanup,
        } => {
            let config = load_cli_config(cli.config.as_ref())?;
            for dest in &destinations {
                if !dest.is_dir() {
                    bail!("destination {} is not a directory", dest.display());
                }
            }
            let options = AutoOptions {
                prepare: PrepareOptions {
                    cleanup: !no_cleanup,
                    installer,
                },
                produce: ProduceOptions {
                    include_data: with_data,
                    max_compression: max,
                },
            };
            let interrupt = Interrupt::default();
            let mut session = Session::start(&config, interrupt.clone())?;
            interrupt.install()?;
            let prompt = StopOnInterrupt::new(PresetCopyPrompt::new(destinations, fast), interrupt);
            let outcome = session.auto(options, prompt);
            session.teardown();
            outcome
        }
        Commands::Session => {
            let config = load_cli_config(cli.config.as_ref())?;
            let interrupt = Interrupt::default();
            let mut session = Session::start(&config, interrupt.clone())?;
            interrupt.install()?;
            let outcome = session.guided(&config);
            session.teardown();
            outcome
        }
    }
}

fn load_cli_config(explicit: Option<&PathBuf>) -> Result<EggsmithConfig> {
    let path = EggsmithConfig::resolve_path(explicit.map(PathBuf::as_path))?;
    let config = EggsmithConfig::load_or_bootstrap(&path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;
    for issue in config.validate() {
        warn!("config: {issue}");
    }
    Ok(config)
}

fn print_settings(config: &EggsmithConfig) {
    println!("Configuration: {}", config.path.display());
    println!("  eggs binary:      {}", config.toolchain.eggs_path);
    println!("  installer:        {}", config.toolchain.installer_path);
    println!("  compression flag: {}", config.toolchain.compression_flag.flag());
    println!("  workspace:        {}", config.paths.workspace_dir.display());
    println!(
        "  artifacts:        {}/*{}",
        config.paths.artifact_dir.display(),
        config.paths.artifact_suffix
    );
    println!("  eggs.yaml:        {}", config.paths.eggs_yaml.display());
    println!(
        "  copy blocks:      {} bytes, {} ms throttle",
        config.copy.block_size_bytes, config.copy.throttle_ms
    );
}

/// Prompt for the elevation secret once. Root sessions need none.
fn acquire_runner(config: &EggsmithConfig) -> Result<ShellRunner> {
    let filter = config.output_filter();
    if running_as_root() {
        return Ok(ShellRunner::unprivileged().with_filter(filter));
    }
    let secret = prompt_password("[sudo] password for eggsmith session: ")
        .context("failed to read the session password")?;
    let credential = SessionCredential::new(secret)?;
    Ok(ShellRunner::new(Arc::new(credential)).with_filter(filter))
}

struct Session {
    controller: WorkflowController<ShellRunner>,
    ui: Ui,
}

impl Session {
    fn start(config: &EggsmithConfig, interrupt: Interrupt) -> Result<Self> {
        let runner = acquire_runner(config)?;
        let (bus, events) = EventBus::channel(config.events.channel_capacity);
        let controller = WorkflowController::new(runner, config, bus)
            .context("failed to start the workflow controller")?;
        Ok(Self {
            controller,
            ui: Ui::new(events, interrupt),
        })
    }

    fn auto(
        &mut self,
        options: AutoOptions,
        mut prompt: StopOnInterrupt<PresetCopyPrompt>,
    ) -> Result<()> {
        let controller = &mut self.controller;
        let report = self
            .ui
            .on_worker(|| controller.auto_run(options, &mut prompt))?;
        print_report(&report);
        Ok(())
    }

    fn guided(&mut self, config: &EggsmithConfig) -> Result<()> {
        let versions = {
            let controller = &self.controller;
            self.ui.on_worker(|| controller.probe_versions())
        };
        print_report(&versions);

        let prepare = PrepareOptions {
            cleanup: self
                .ui
                .confirm("Clean up and reset the eggs environment first?", true)?,
            installer: self
                .ui
                .confirm("Install or refresh the calamares installer?", false)?,
        };
        {
            let controller = &mut self.controller;
            let report = self.ui.on_worker(|| controller.prepare(prepare))?;
            print_report(&report);
        }
        self.ui.interrupt().checkpoint()?;

        if self
            .ui
            .confirm("Replicate your user configuration into the live skeleton?", false)?
        {
            let controller = &mut self.controller;
            match self.ui.on_worker(|| controller.replicate_skel()) {
                Ok(report) => print_report(&report),
                Err(err) => warn!("skeleton replication failed: {err}"),
            }
        }

        self.ui.interrupt().checkpoint()?;

        if self
            .ui
            .confirm("Edit eggs.yaml (passwords, snapshot names)?", false)?
        {
            let update = ask_eggs_settings(&self.ui, config)?;
            self.ui.interrupt().checkpoint()?;
            let controller = &mut self.controller;
            match self.ui.on_worker(|| controller.edit_eggs_settings(&update)) {
                Ok(report) => print_report(&report),
                Err(err) => warn!("eggs.yaml edit failed: {err}"),
            }
        }

        self.ui.interrupt().checkpoint()?;

        let produce = ProduceOptions {
            include_data: self.ui.confirm("Include user data in the image?", false)?,
            max_compression: self.ui.confirm("Use maximum compression?", false)?,
        };
        {
            let controller = &mut self.controller;
            let report = self.ui.on_worker(|| controller.generate(produce))?;
            print_report(&report);
        }
        self.ui.interrupt().checkpoint()?;

        let mut prompt = self.ui.copy_prompt();
        let controller = &mut self.controller;
        let report = self.ui.on_worker(|| controller.copy(&mut prompt))?;
        print_report(&report);
        println!(
            "Copies completed this session: {}",
            self.controller.copy_tally()
        );
        Ok(())
    }

    fn teardown(&mut self) {
        let controller = &mut self.controller;
        let report = self.ui.on_worker(|| controller.teardown());
        self.ui.flush();
        print_report(&report);
    }
}

/// Ask for new eggs.yaml values, showing the current ones. Blank keeps a value.
fn ask_eggs_settings(ui: &Ui, config: &EggsmithConfig) -> Result<EggsSettings> {
    let current = fs::read_to_string(&config.paths.eggs_yaml)
        .map(|contents| read_settings(&contents))
        .unwrap_or_default();

    let keep_or = |value: String| if value.is_empty() { None } else { Some(value) };
    let text = |label: &str, current: &Option<String>| {
        let shown = current.as_deref().unwrap_or("");
        ui.ask(&format!("{label} [{shown}]: "))
            .map(keep_or)
            .ok_or_else(|| anyhow!("interrupted"))
    };
    let secret = |label: &str| -> Result<Option<String>> {
        let value = prompt_password(format!("{label} (blank keeps current): "))
            .context("failed to read password")?;
        Ok(keep_or(value))
    };

    Ok(EggsSettings {
        root_passwd: secret("Root password")?,
        snapshot_basename: text("Snapshot basename", &current.snapshot_basename)?,
        snapshot_prefix: text("Snapshot prefix", &current.snapshot_prefix)?,
        user_opt_passwd: secret("Live user password")?,
    })
}

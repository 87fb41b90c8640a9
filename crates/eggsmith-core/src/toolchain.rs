//! Command builder for the penguins-eggs toolchain.
//!
//! The workflow controller never assembles shell text itself; every external
//! invocation is produced here and handed over as a [`CommandDescriptor`].

use crate::config::{CompressionFlag, EggsmithConfig};
use crate::runner::CommandDescriptor;
use std::path::{Path, PathBuf};

/// Options chosen for the prepare step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrepareOptions {
    /// Kill stale sessions, clean caches and reset the configuration.
    pub cleanup: bool,
    /// Install (or refresh) the installer framework.
    pub installer: bool,
}

impl Default for PrepareOptions {
    fn default() -> Self {
        Self {
            cleanup: true,
            installer: false,
        }
    }
}

/// Options chosen for image generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProduceOptions {
    pub include_data: bool,
    pub max_compression: bool,
}

/// Produces every command string the workflow needs.
pub trait ToolchainCommands: Send + Sync {
    fn prepare_commands(&self, options: &PrepareOptions) -> Vec<CommandDescriptor>;
    fn produce_command(&self, options: &ProduceOptions) -> CommandDescriptor;
    fn skel_command(&self) -> CommandDescriptor;
    fn update_commands(&self) -> Vec<CommandDescriptor>;
    fn version_command(&self) -> CommandDescriptor;
    fn installer_version_command(&self) -> CommandDescriptor;
    fn chmod_command(&self, path: &Path, mode: u32) -> CommandDescriptor;
    fn remove_tree_command(&self, path: &Path) -> CommandDescriptor;
}

/// penguins-eggs implementation of [`ToolchainCommands`].
#[derive(Debug, Clone)]
pub struct EggsToolchain {
    eggs: String,
    installer: String,
    compression: CompressionFlag,
    fresh_eggs_repo: String,
    fresh_eggs_dir: PathBuf,
}

impl EggsToolchain {
    pub fn new(eggs: impl Into<String>, installer: impl Into<String>) -> Self {
        Self {
            eggs: eggs.into(),
            installer: installer.into(),
            compression: CompressionFlag::default(),
            fresh_eggs_repo: crate::config::DEFAULT_FRESH_EGGS_REPO.to_string(),
            fresh_eggs_dir: PathBuf::from("fresh-eggs"),
        }
    }

    pub fn from_config(config: &EggsmithConfig) -> Self {
        Self {
            eggs: config.toolchain.eggs_path.clone(),
            installer: config.toolchain.installer_path.clone(),
            compression: config.toolchain.compression_flag,
            fresh_eggs_repo: config.toolchain.fresh_eggs_repo.clone(),
            fresh_eggs_dir: config.fresh_eggs_dir(),
        }
    }

    pub fn with_compression(mut self, compression: CompressionFlag) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_fresh_eggs(mut self, repo: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        self.fresh_eggs_repo = repo.into();
        self.fresh_eggs_dir = dir.into();
        self
    }

    fn eggs(&self, args: &str) -> String {
        format!("{} {args}", shell_quote(&self.eggs))
    }
}

impl ToolchainCommands for EggsToolchain {
    fn prepare_commands(&self, options: &PrepareOptions) -> Vec<CommandDescriptor> {
        if options.installer && !options.cleanup {
            return self.update_commands();
        }

        let mut commands = Vec::new();
        if options.cleanup {
            commands.push(CommandDescriptor::privileged(self.eggs("kill -n")));
            commands.push(CommandDescriptor::privileged(self.eggs("tools clean -n")));
            commands.push(CommandDescriptor::privileged(self.eggs("dad -d")));
        }
        if options.installer {
            commands.push(CommandDescriptor::privileged(self.eggs("calamares --install")));
        }
        commands
    }

    fn produce_command(&self, options: &ProduceOptions) -> CommandDescriptor {
        let mode = if options.max_compression {
            self.compression.flag()
        } else if options.include_data {
            "--clone"
        } else {
            "--noicon"
        };
        CommandDescriptor::privileged(self.eggs(&format!("produce {mode} -n")))
    }

    fn skel_command(&self) -> CommandDescriptor {
        CommandDescriptor::privileged(self.eggs("tools skel"))
    }

    fn update_commands(&self) -> Vec<CommandDescriptor> {
        let dir = shell_quote(&self.fresh_eggs_dir.to_string_lossy());
        vec![
            CommandDescriptor::user(format!("rm -rf -- {dir}")),
            CommandDescriptor::user(format!(
                "git clone --quiet {} {dir}",
                shell_quote(&self.fresh_eggs_repo)
            )),
            CommandDescriptor::privileged(format!(
                "cd {dir} && chmod 755 ./fresh-eggs.sh && ./fresh-eggs.sh"
            )),
        ]
    }

    fn version_command(&self) -> CommandDescriptor {
        CommandDescriptor::privileged(self.eggs("--version"))
    }

    fn installer_version_command(&self) -> CommandDescriptor {
        CommandDescriptor::user(format!("{} --version", shell_quote(&self.installer)))
    }

    fn chmod_command(&self, path: &Path, mode: u32) -> CommandDescriptor {
        CommandDescriptor::privileged(format!(
            "chmod {mode:o} {}",
            shell_quote(&path.to_string_lossy())
        ))
    }

    fn remove_tree_command(&self, path: &Path) -> CommandDescriptor {
        CommandDescriptor::privileged(format!(
            "rm -rf -- {}",
            shell_quote(&path.to_string_lossy())
        ))
    }
}

/// Quote `value` for POSIX `sh` unless it only contains safe characters.
pub fn shell_quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+:=@%,".contains(c));
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

//! Error taxonomy shared by every eggsmith component.

use std::path::PathBuf;
use thiserror::Error;

/// Failures surfaced by the orchestration engine.
#[derive(Debug, Error)]
pub enum EggsmithError {
    /// No secret was supplied for the session; fatal at startup.
    #[error("authentication required: no elevation secret was supplied for this session")]
    AuthenticationMissing,

    /// An external command terminated with a non-zero status (or never ran).
    #[error("command `{command}` failed with exit code {code}")]
    CommandFailed { code: i32, command: String },

    /// The expected output artifact is absent.
    #[error("no `*{suffix}` artifact found in {}", dir.display())]
    NoArtifactFound { dir: PathBuf, suffix: String },

    /// A chunked copy failed part-way through.
    #[error("copy of {} to {} failed: {reason}", artifact.display(), destination.display())]
    TransferFailed {
        artifact: PathBuf,
        destination: PathBuf,
        reason: String,
    },

    /// The toolchain configuration file is not where it should be.
    #[error("configuration file not found: {}", .0.display())]
    ConfigFileMissing(PathBuf),

    /// A workflow action was requested from a state that does not allow it.
    #[error("cannot {action} while the workflow is {state}")]
    InvalidState { action: &'static str, state: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    TomlSer(#[from] toml::ser::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

pub type EggsmithResult<T> = Result<T, EggsmithError>;

//! Configuration model and helpers used by eggsmith front-ends.

use crate::artifact::ArtifactLocator;
use crate::copy::ChunkedCopier;
use crate::error::{EggsmithError, EggsmithResult};
use crate::output::{OutputFilter, DEFAULT_SUPPRESSED};
use directories_next::ProjectDirs;
use log::info;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

pub const CONFIG_ENV: &str = "EGGSMITH_CONFIG";
pub const DEFAULT_FRESH_EGGS_REPO: &str = "https://github.com/pieroproietti/fresh-eggs";
const BOOTSTRAP_FILE_NAME: &str = "eggsmith.toml";
const APP_QUALIFIER: &str = "org";
const APP_ORGANIZATION: &str = "Eggsmith";
const APP_NAME: &str = "eggsmith";
pub(crate) const KNOWN_EGGS_PATHS: &[&str] = &[
    "/usr/bin/eggs",
    "/usr/local/bin/eggs",
    "/bin/eggs",
    "/opt/penguins-eggs/bin/eggs",
];

pub(crate) fn detect_binary_path(candidates: &[&str]) -> Option<String> {
    candidates
        .iter()
        .map(Path::new)
        .find(|path| path.exists())
        .map(|path| path.to_string_lossy().into_owned())
}

pub fn detect_eggs_binary_path() -> Option<String> {
    detect_binary_path(KNOWN_EGGS_PATHS)
}

/// Which `produce` flag "maximum compression" maps to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum CompressionFlag {
    #[default]
    Max,
    Pendrive,
}

impl CompressionFlag {
    pub fn flag(self) -> &'static str {
        match self {
            CompressionFlag::Max => "--max",
            CompressionFlag::Pendrive => "--pendrive",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ToolchainCfg {
    #[serde(default = "default_eggs_path")]
    pub eggs_path: String,

    #[serde(default = "default_installer_path")]
    pub installer_path: String,

    #[serde(default)]
    pub compression_flag: CompressionFlag,

    #[serde(default = "default_fresh_eggs_repo")]
    pub fresh_eggs_repo: String,

    /// Checkout directory for the toolchain updater; `~/` expands to `$HOME`.
    #[serde(default = "default_fresh_eggs_dir")]
    pub fresh_eggs_dir: String,
}

fn default_eggs_path() -> String {
    detect_eggs_binary_path().unwrap_or_else(|| "/usr/bin/eggs".to_string())
}

fn default_installer_path() -> String {
    "calamares".to_string()
}

fn default_fresh_eggs_repo() -> String {
    DEFAULT_FRESH_EGGS_REPO.to_string()
}

fn default_fresh_eggs_dir() -> String {
    "~/fresh-eggs".to_string()
}

impl Default for ToolchainCfg {
    fn default() -> Self {
        Self {
            eggs_path: default_eggs_path(),
            installer_path: default_installer_path(),
            compression_flag: CompressionFlag::default(),
            fresh_eggs_repo: default_fresh_eggs_repo(),
            fresh_eggs_dir: default_fresh_eggs_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PathsCfg {
    /// Scratch tree removed on session teardown.
    #[serde(default = "default_workspace_dir")]
    pub workspace_dir: PathBuf,

    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,

    #[serde(default = "default_artifact_suffix")]
    pub artifact_suffix: String,

    #[serde(default = "default_eggs_yaml")]
    pub eggs_yaml: PathBuf,
}

fn default_workspace_dir() -> PathBuf {
    PathBuf::from("/home/eggs")
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("/home/eggs/.mnt")
}

fn default_artifact_suffix() -> String {
    ".iso".to_string()
}

fn default_eggs_yaml() -> PathBuf {
    PathBuf::from("/etc/penguins-eggs.d/eggs.yaml")
}

impl Default for PathsCfg {
    fn default() -> Self {
        Self {
            workspace_dir: default_workspace_dir(),
            artifact_dir: default_artifact_dir(),
            artifact_suffix: default_artifact_suffix(),
            eggs_yaml: default_eggs_yaml(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CopyCfg {
    #[serde(default = "default_block_size")]
    pub block_size_bytes: usize,

    /// Pause after each block in throttled mode.
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,
}

fn default_block_size() -> usize {
    crate::copy::DEFAULT_BLOCK_SIZE
}

fn default_throttle_ms() -> u64 {
    10
}

impl Default for CopyCfg {
    fn default() -> Self {
        Self {
            block_size_bytes: default_block_size(),
            throttle_ms: default_throttle_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TimerCfg {
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

fn default_tick_ms() -> u64 {
    1000
}

impl Default for TimerCfg {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OutputCfg {
    #[serde(default = "default_true")]
    pub strip_ansi: bool,

    /// Lines containing any of these substrings are dropped from the stream.
    #[serde(default = "default_suppress")]
    pub suppress: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_suppress() -> Vec<String> {
    DEFAULT_SUPPRESSED.iter().map(|s| s.to_string()).collect()
}

impl Default for OutputCfg {
    fn default() -> Self {
        Self {
            strip_ansi: true,
            suppress: default_suppress(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EventsCfg {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    256
}

impl Default for EventsCfg {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Top-level configuration snapshot loaded from disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct EggsmithConfig {
    #[serde(default)]
    pub toolchain: ToolchainCfg,

    #[serde(default)]
    pub paths: PathsCfg,

    #[serde(default)]
    pub copy: CopyCfg,

    #[serde(default)]
    pub timer: TimerCfg,

    #[serde(default)]
    pub output: OutputCfg,

    #[serde(default)]
    pub events: EventsCfg,

    #[serde(skip)]
    pub path: PathBuf,

    #[serde(skip)]
    pub format: ConfigFormat,
}

/// Tracks whether we parsed TOML or YAML so writes preserve format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfigFormat {
    #[default]
    Toml,
    Yaml,
}

impl EggsmithConfig {
    /// Resolve the per-user configuration path.
    pub fn user_config_path() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().join(BOOTSTRAP_FILE_NAME))
    }

    /// Pick the config file: explicit path, then `EGGSMITH_CONFIG`, then the per-user default.
    pub fn resolve_path(explicit: Option<&Path>) -> EggsmithResult<PathBuf> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }
        if let Ok(from_env) = env::var(CONFIG_ENV) {
            if !from_env.trim().is_empty() {
                return Ok(PathBuf::from(from_env));
            }
        }
        Self::user_config_path().ok_or_else(|| {
            EggsmithError::InvalidConfig(format!(
                "unable to determine a configuration directory; pass --config or set {CONFIG_ENV}"
            ))
        })
    }

    /// Load configuration from disk, writing the bootstrap template first when missing.
    pub fn load_or_bootstrap<P: AsRef<Path>>(path: P) -> EggsmithResult<Self> {
        let target = path.as_ref();
        if target.exists() {
            return Self::load(target);
        }

        let created = ensure_bootstrap_file(target).map_err(|err| {
            EggsmithError::InvalidConfig(format!(
                "failed to initialise configuration at {}: {err}",
                target.display()
            ))
        })?;
        if created {
            info!("eggsmith config bootstrap created at {}", target.display());
        }
        Self::load(target)
    }

    /// Read a config file from disk, detecting the format from its extension.
    pub fn load<P: AsRef<Path>>(path: P) -> EggsmithResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let is_toml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some(ext) if ext.eq_ignore_ascii_case("toml")
        );
        let mut cfg = if is_toml {
            toml::from_str::<Self>(&contents)?
        } else {
            serde_yaml::from_str::<Self>(&contents)?
        };

        cfg.path = path.to_path_buf();
        cfg.format = if is_toml {
            ConfigFormat::Toml
        } else {
            ConfigFormat::Yaml
        };
        Ok(cfg)
    }

    /// Perform a best-effort validation pass and return human-readable issues.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if self.toolchain.eggs_path.trim().is_empty() {
            issues.push("toolchain.eggs_path must not be empty".to_string());
        }
        if self.toolchain.installer_path.trim().is_empty() {
            issues.push("toolchain.installer_path must not be empty".to_string());
        }

        for (key, path) in [
            ("paths.workspace_dir", &self.paths.workspace_dir),
            ("paths.artifact_dir", &self.paths.artifact_dir),
            ("paths.eggs_yaml", &self.paths.eggs_yaml),
        ] {
            if !path.is_absolute() {
                issues.push(format!("{key} must be an absolute path: {}", path.display()));
            }
        }
        if self.paths.workspace_dir == Path::new("/") {
            issues.push("paths.workspace_dir must not be the filesystem root".to_string());
        }
        if self.paths.artifact_suffix.trim().is_empty() {
            issues.push("paths.artifact_suffix must not be empty".to_string());
        }

        if self.copy.block_size_bytes == 0 {
            issues.push("copy.block_size_bytes must be greater than 0".to_string());
        }
        if self.timer.tick_ms == 0 {
            issues.push("timer.tick_ms must be greater than 0".to_string());
        }
        if self.events.channel_capacity == 0 {
            issues.push("events.channel_capacity must be greater than 0".to_string());
        }

        issues
    }

    /// Checkout directory for the toolchain updater with `~/` expanded.
    pub fn fresh_eggs_dir(&self) -> PathBuf {
        expand_home(&self.toolchain.fresh_eggs_dir)
    }

    pub fn copier(&self) -> ChunkedCopier {
        ChunkedCopier::new(
            self.copy.block_size_bytes,
            Duration::from_millis(self.copy.throttle_ms),
        )
    }

    pub fn output_filter(&self) -> OutputFilter {
        OutputFilter::new(self.output.strip_ansi, self.output.suppress.clone())
    }

    pub fn artifact_locator(&self) -> ArtifactLocator {
        ArtifactLocator::new(&self.paths.artifact_dir, &self.paths.artifact_suffix)
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.timer.tick_ms.max(1))
    }

    /// Persist the configuration back in the format it was loaded from.
    pub fn save(&self) -> EggsmithResult<()> {
        let payload = match self.format {
            ConfigFormat::Toml => toml::to_string_pretty(self)?,
            ConfigFormat::Yaml => serde_yaml::to_string(self)?,
        };
        fs::write(&self.path, payload)?;
        Ok(())
    }
}

fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(raw)
}

/// Commented TOML template written on first run.
pub fn bootstrap_template() -> String {
    let eggs_path = default_eggs_path();
    let suppress = default_suppress()
        .iter()
        .map(|s| format!("  \"{}\",", s.replace('"', "\\\"")))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "# Auto-generated eggsmith configuration.\n\
         # Adjust paths if your penguins-eggs installation differs.\n\n\
         [toolchain]\n\
         eggs_path = \"{eggs_path}\"\n\
         installer_path = \"calamares\"\n\
         # \"max\" or \"pendrive\"; used when maximum compression is requested.\n\
         compression_flag = \"max\"\n\
         fresh_eggs_repo = \"{DEFAULT_FRESH_EGGS_REPO}\"\n\
         fresh_eggs_dir = \"~/fresh-eggs\"\n\n\
         [paths]\n\
         workspace_dir = \"/home/eggs\"\n\
         artifact_dir = \"/home/eggs/.mnt\"\n\
         artifact_suffix = \".iso\"\n\
         eggs_yaml = \"/etc/penguins-eggs.d/eggs.yaml\"\n\n\
         [copy]\n\
         block_size_bytes = 1048576\n\
         throttle_ms = 10\n\n\
         [timer]\n\
         tick_ms = 1000\n\n\
         [output]\n\
         strip_ansi = true\n\
         suppress = [\n{suppress}\n]\n\n\
         [events]\n\
         channel_capacity = 256\n"
    )
}

fn ensure_bootstrap_file(path: &Path) -> io::Result<bool> {
    if path.exists() {
        return Ok(false);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    match OpenOptions::new().create_new(true).write(true).open(path) {
        Ok(mut file) => {
            file.write_all(bootstrap_template().as_bytes())?;
            file.flush()?;
            #[cfg(unix)]
            fs::set_permissions(path, PermissionsExt::from_mode(0o600))?;
            Ok(true)
        }
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    struct EnvGuard {
        key: &'static str,
        prev: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &'static str, value: impl Into<String>) -> Self {
            let prev = env::var(key).ok();
            env::set_var(key, value.into());
            Self { key, prev }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            if let Some(prev) = &self.prev {
                env::set_var(self.key, prev);
            } else {
                env::remove_var(self.key);
            }
        }
    }

    #[test]
    fn bootstrap_template_parses_and_validates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("eggsmith.toml");

        let cfg = EggsmithConfig::load_or_bootstrap(&path).unwrap();

        assert!(path.exists());
        assert_eq!(cfg.format, ConfigFormat::Toml);
        assert_eq!(cfg.paths.artifact_suffix, ".iso");
        assert_eq!(cfg.copy.block_size_bytes, 1024 * 1024);
        assert!(cfg.validate().is_empty(), "{:?}", cfg.validate());
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        fs::write(&path, "[copy]\nthrottle_ms = 0\n").unwrap();

        let cfg = EggsmithConfig::load(&path).unwrap();
        assert_eq!(cfg.copy.throttle_ms, 0);
        assert_eq!(cfg.copy.block_size_bytes, 1024 * 1024);
        assert_eq!(cfg.paths.eggs_yaml, PathBuf::from("/etc/penguins-eggs.d/eggs.yaml"));
        assert_eq!(cfg.events.channel_capacity, 256);
    }

    #[test]
    fn yaml_files_are_accepted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("eggsmith.yaml");
        fs::write(
            &path,
            "toolchain:\n  compression_flag: pendrive\npaths:\n  artifact_suffix: .img\n",
        )
        .unwrap();

        let cfg = EggsmithConfig::load(&path).unwrap();
        assert_eq!(cfg.format, ConfigFormat::Yaml);
        assert_eq!(cfg.toolchain.compression_flag, CompressionFlag::Pendrive);
        assert_eq!(cfg.paths.artifact_suffix, ".img");
    }

    #[test]
    fn validate_flags_bad_values() {
        let mut cfg = EggsmithConfig::default();
        cfg.copy.block_size_bytes = 0;
        cfg.paths.artifact_suffix = String::new();
        cfg.paths.artifact_dir = PathBuf::from("relative/dir");
        cfg.events.channel_capacity = 0;

        let issues = cfg.validate();
        assert_eq!(issues.len(), 4, "{issues:?}");
        assert!(issues.iter().any(|i| i.contains("block_size_bytes")));
        assert!(issues.iter().any(|i| i.contains("paths.artifact_dir")));
    }

    #[test]
    fn resolve_path_prefers_explicit_then_env() {
        let explicit = PathBuf::from("/tmp/explicit.toml");
        assert_eq!(
            EggsmithConfig::resolve_path(Some(&explicit)).unwrap(),
            explicit
        );

        let guard = EnvGuard::set(CONFIG_ENV, "/tmp/from-env.toml");
        assert_eq!(
            EggsmithConfig::resolve_path(None).unwrap(),
            PathBuf::from("/tmp/from-env.toml")
        );
        drop(guard);
    }

    #[test]
    fn save_round_trips_yaml_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("eggsmith.yml");
        fs::write(&path, "timer:\n  tick_ms: 250\n").unwrap();

        let mut cfg = EggsmithConfig::load(&path).unwrap();
        cfg.copy.throttle_ms = 42;
        cfg.save().unwrap();

        let reloaded = EggsmithConfig::load(&path).unwrap();
        assert_eq!(reloaded.timer.tick_ms, 250);
        assert_eq!(reloaded.copy.throttle_ms, 42);
    }

    #[test]
    fn home_prefix_expands() {
        let guard = EnvGuard::set("HOME", "/home/tester");
        assert_eq!(
            expand_home("~/fresh-eggs"),
            PathBuf::from("/home/tester/fresh-eggs")
        );
        assert_eq!(expand_home("/srv/fresh-eggs"), PathBuf::from("/srv/fresh-eggs"));
        drop(guard);
    }
}

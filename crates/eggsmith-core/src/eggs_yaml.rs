//! Line-oriented edits of the penguins-eggs `eggs.yaml` settings file.
//!
//! Only four keys are touched; every other line (comments and ordering
//! included) is written back verbatim.

use crate::error::{EggsmithError, EggsmithResult};
use crate::runner::{CommandExecutor, OutputLine};
use crate::toolchain::ToolchainCommands;
use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};

pub const WIDE_MODE: u32 = 0o666;
pub const RESTRICTED_MODE: u32 = 0o644;

/// Values of the editable keys. `None` means "leave as is" on update and
/// "not present" on read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EggsSettings {
    pub root_passwd: Option<String>,
    pub snapshot_basename: Option<String>,
    pub snapshot_prefix: Option<String>,
    pub user_opt_passwd: Option<String>,
}

impl EggsSettings {
    const KEYS: [&'static str; 4] = [
        "root_passwd",
        "snapshot_basename",
        "snapshot_prefix",
        "user_opt_passwd",
    ];

    fn slot(&self, key: &str) -> Option<&String> {
        match key {
            "root_passwd" => self.root_passwd.as_ref(),
            "snapshot_basename" => self.snapshot_basename.as_ref(),
            "snapshot_prefix" => self.snapshot_prefix.as_ref(),
            "user_opt_passwd" => self.user_opt_passwd.as_ref(),
            _ => None,
        }
    }

    fn slot_mut(&mut self, key: &str) -> Option<&mut Option<String>> {
        match key {
            "root_passwd" => Some(&mut self.root_passwd),
            "snapshot_basename" => Some(&mut self.snapshot_basename),
            "snapshot_prefix" => Some(&mut self.snapshot_prefix),
            "user_opt_passwd" => Some(&mut self.user_opt_passwd),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        Self::KEYS.iter().all(|key| self.slot(key).is_none())
    }

    /// Values are written as single YAML lines, so line breaks are refused.
    pub fn check(&self) -> EggsmithResult<()> {
        for key in Self::KEYS {
            if let Some(value) = self.slot(key) {
                if value.contains(['\n', '\r']) {
                    return Err(EggsmithError::InvalidConfig(format!(
                        "{key} must not contain line breaks"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Split `line` into one of the editable keys and its raw value.
fn editable_key(line: &str) -> Option<(&'static str, &str)> {
    EggsSettings::KEYS.iter().find_map(|key| {
        line.strip_prefix(key)
            .and_then(|rest| rest.strip_prefix(':'))
            .map(|value| (*key, value))
    })
}

/// Current values of the editable keys.
pub fn read_settings(contents: &str) -> EggsSettings {
    let mut settings = EggsSettings::default();
    for line in contents.lines() {
        if let Some((key, value)) = editable_key(line) {
            if let Some(slot) = settings.slot_mut(key) {
                *slot = Some(value.trim().to_string());
            }
        }
    }
    settings
}

/// Rewrite the editable keys present in `contents`; all other lines are untouched.
pub fn apply_settings(contents: &str, update: &EggsSettings) -> String {
    let mut out = String::with_capacity(contents.len());
    for line in contents.split_inclusive('\n') {
        let body = line.trim_end_matches(['\n', '\r']);
        let ending = &line[body.len()..];
        match editable_key(body).and_then(|(key, _)| update.slot(key).map(|v| (key, v))) {
            Some((key, value)) => {
                out.push_str(key);
                out.push_str(": ");
                out.push_str(value);
                out.push_str(ending);
            }
            None => out.push_str(line),
        }
    }
    out
}

/// Widens a root-owned file for editing and narrows it again on every exit path.
pub struct PermissionGuard<'a> {
    executor: &'a dyn CommandExecutor,
    toolchain: &'a dyn ToolchainCommands,
    sink: &'a (dyn Fn(OutputLine) + Sync),
    path: PathBuf,
    restored: bool,
}

impl<'a> PermissionGuard<'a> {
    /// `chmod 666` the file. Fails with `ConfigFileMissing` before touching anything
    /// when the file is absent.
    pub fn widen(
        executor: &'a dyn CommandExecutor,
        toolchain: &'a dyn ToolchainCommands,
        sink: &'a (dyn Fn(OutputLine) + Sync),
        path: &Path,
    ) -> EggsmithResult<Self> {
        if !path.is_file() {
            return Err(EggsmithError::ConfigFileMissing(path.to_path_buf()));
        }
        let widen = toolchain.chmod_command(path, WIDE_MODE);
        executor.run(&widen, &mut |line| sink(line))?;
        debug!("{} widened to {WIDE_MODE:o}", path.display());
        Ok(Self {
            executor,
            toolchain,
            sink,
            path: path.to_path_buf(),
            restored: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Put the restrictive mode back. Calling it again after success is a no-op.
    pub fn restore(&mut self) -> EggsmithResult<()> {
        if self.restored {
            return Ok(());
        }
        let narrow = self.toolchain.chmod_command(&self.path, RESTRICTED_MODE);
        let sink = self.sink;
        self.executor.run(&narrow, &mut |line| sink(line))?;
        self.restored = true;
        debug!("{} restored to {RESTRICTED_MODE:o}", self.path.display());
        Ok(())
    }
}

impl Drop for PermissionGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.restore() {
            warn!(
                "failed to restore permissions on {}: {err}",
                self.path.display()
            );
        }
    }
}

/// Read, rewrite and save `path` with `update` applied. Returns the values written.
pub fn edit_file(path: &Path, update: &EggsSettings) -> EggsmithResult<EggsSettings> {
    update.check()?;
    let contents = fs::read_to_string(path).map_err(|err| match err.kind() {
        std::io::ErrorKind::NotFound => EggsmithError::ConfigFileMissing(path.to_path_buf()),
        _ => EggsmithError::Io(err),
    })?;
    let updated = apply_settings(&contents, update);
    fs::write(path, &updated)?;
    Ok(read_settings(&updated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{CommandDescriptor, TerminationStatus};
    use crate::toolchain::EggsToolchain;
    use std::sync::Mutex;

    const SAMPLE: &str = "# eggs settings\n\
root_passwd: evolution\n\
snapshot_basename: colibri\n\
snapshot_dir: /home/eggs\n\
snapshot_prefix: egg-of-\n\
user_opt: live\n\
user_opt_passwd: evolution\n";

    #[derive(Default)]
    struct RecordingExecutor {
        seen: Mutex<Vec<String>>,
        fail: bool,
    }

    impl CommandExecutor for RecordingExecutor {
        fn run(
            &self,
            descriptor: &CommandDescriptor,
            sink: &mut dyn FnMut(OutputLine),
        ) -> EggsmithResult<TerminationStatus> {
            self.seen.lock().unwrap().push(descriptor.command.clone());
            if self.fail {
                sink(OutputLine::runner("chmod refused"));
                return Err(EggsmithError::CommandFailed {
                    code: 1,
                    command: descriptor.command.clone(),
                });
            }
            Ok(TerminationStatus {
                code: 0,
                command: descriptor.command.clone(),
            })
        }
    }

    fn quiet(_: OutputLine) {}

    #[test]
    fn reads_current_values() {
        let settings = read_settings(SAMPLE);
        assert_eq!(settings.root_passwd.as_deref(), Some("evolution"));
        assert_eq!(settings.snapshot_prefix.as_deref(), Some("egg-of-"));
        assert_eq!(settings.user_opt_passwd.as_deref(), Some("evolution"));
    }

    #[test]
    fn apply_only_rewrites_selected_keys() {
        let update = EggsSettings {
            snapshot_basename: Some("mydistro".into()),
            user_opt_passwd: Some("s3cret".into()),
            ..EggsSettings::default()
        };
        let out = apply_settings(SAMPLE, &update);
        assert!(out.contains("snapshot_basename: mydistro\n"));
        assert!(out.contains("user_opt_passwd: s3cret\n"));
        assert!(out.contains("root_passwd: evolution\n"));
        // `user_opt` shares a prefix with `user_opt_passwd` and must survive.
        assert!(out.contains("user_opt: live\n"));
        assert!(out.contains("snapshot_dir: /home/eggs\n"));
        assert_eq!(out.lines().count(), SAMPLE.lines().count());
    }

    #[test]
    fn edit_file_persists_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eggs.yaml");
        fs::write(&path, SAMPLE).unwrap();
        let written = edit_file(
            &path,
            &EggsSettings {
                root_passwd: Some("toor".into()),
                ..EggsSettings::default()
            },
        )
        .unwrap();
        assert_eq!(written.root_passwd.as_deref(), Some("toor"));
        assert!(fs::read_to_string(&path)
            .unwrap()
            .starts_with("# eggs settings\nroot_passwd: toor\n"));
    }

    #[test]
    fn line_breaks_in_values_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eggs.yaml");
        fs::write(&path, SAMPLE).unwrap();

        let update = EggsSettings {
            root_passwd: Some("secret\nuser_opt: root".into()),
            ..EggsSettings::default()
        };
        let err = edit_file(&path, &update).unwrap_err();
        assert!(matches!(err, EggsmithError::InvalidConfig(_)));
        assert_eq!(fs::read_to_string(&path).unwrap(), SAMPLE);

        let carriage = EggsSettings {
            snapshot_prefix: Some("egg\r".into()),
            ..EggsSettings::default()
        };
        assert!(carriage.check().is_err());
    }

    #[test]
    fn missing_file_never_widens() {
        let dir = tempfile::tempdir().unwrap();
        let executor = RecordingExecutor::default();
        let toolchain = EggsToolchain::new("eggs", "calamares");
        let result = PermissionGuard::widen(
            &executor,
            &toolchain,
            &quiet,
            &dir.path().join("eggs.yaml"),
        );
        assert!(matches!(result, Err(EggsmithError::ConfigFileMissing(_))));
        assert!(executor.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn restore_is_idempotent_and_runs_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eggs.yaml");
        fs::write(&path, SAMPLE).unwrap();
        let executor = RecordingExecutor::default();
        let toolchain = EggsToolchain::new("eggs", "calamares");

        {
            let mut guard = PermissionGuard::widen(&executor, &toolchain, &quiet, &path).unwrap();
            guard.restore().unwrap();
            guard.restore().unwrap();
        }
        {
            let _guard = PermissionGuard::widen(&executor, &toolchain, &quiet, &path).unwrap();
        }

        let seen = executor.seen.lock().unwrap();
        let narrow = format!("chmod 644 {}", path.display());
        let wide = format!("chmod 666 {}", path.display());
        assert_eq!(*seen, vec![wide.clone(), narrow.clone(), wide, narrow]);
    }

    #[test]
    fn failed_restore_does_not_panic_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eggs.yaml");
        fs::write(&path, SAMPLE).unwrap();
        let toolchain = EggsToolchain::new("eggs", "calamares");
        let failing = RecordingExecutor {
            fail: true,
            ..RecordingExecutor::default()
        };
        let mut guard = PermissionGuard {
            executor: &failing,
            toolchain: &toolchain,
            sink: &quiet,
            path: path.clone(),
            restored: false,
        };
        assert!(guard.restore().is_err());
        drop(guard);
        assert_eq!(failing.seen.lock().unwrap().len(), 2);
    }
}

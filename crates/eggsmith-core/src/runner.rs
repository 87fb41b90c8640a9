//! Child-process execution with live, merged output streaming.
//!
//! Shell integration is isolated here so the sequencer and workflow logic can
//! be exercised against scripted executors in tests.

use crate::credential::SessionCredential;
use crate::error::{EggsmithError, EggsmithResult};
use crate::output::OutputFilter;
use log::{info, trace, warn};
use std::fmt;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

/// One command in a sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDescriptor {
    pub command: String,
    pub privileged: bool,
}

impl CommandDescriptor {
    /// Command that must run through the elevation mechanism.
    pub fn privileged(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            privileged: true,
        }
    }

    /// Command that runs with the caller's own privileges.
    pub fn user(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            privileged: false,
        }
    }
}

impl fmt::Display for CommandDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.privileged {
            write!(f, "# {}", self.command)
        } else {
            write!(f, "$ {}", self.command)
        }
    }
}

/// Where a streamed line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineSource {
    Stdout,
    Stderr,
    /// Synthesised by the runner itself (spawn errors, exit diagnostics).
    Runner,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub source: LineSource,
    pub text: String,
}

impl OutputLine {
    pub fn runner(text: impl Into<String>) -> Self {
        Self {
            source: LineSource::Runner,
            text: text.into(),
        }
    }
}

/// Terminal status of a successful invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminationStatus {
    pub code: i32,
    pub command: String,
}

impl TerminationStatus {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Anything able to execute a single command and stream its output.
///
/// Implementations return `Ok` only for exit code 0. Every failure is reported
/// as [`EggsmithError::CommandFailed`] after at least one
/// [`LineSource::Runner`] line describing it has been handed to `sink`.
pub trait CommandExecutor: Send + Sync {
    fn run(
        &self,
        descriptor: &CommandDescriptor,
        sink: &mut dyn FnMut(OutputLine),
    ) -> EggsmithResult<TerminationStatus>;
}

impl<T: CommandExecutor + ?Sized> CommandExecutor for Arc<T> {
    fn run(
        &self,
        descriptor: &CommandDescriptor,
        sink: &mut dyn FnMut(OutputLine),
    ) -> EggsmithResult<TerminationStatus> {
        (**self).run(descriptor, sink)
    }
}

const DEFAULT_SHELL: &str = "/bin/sh";
const DEFAULT_ELEVATION: &str = "sudo";

/// Runs commands through `sh -c`, elevating with `sudo -S` when required.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    credential: Option<Arc<SessionCredential>>,
    filter: OutputFilter,
    shell: PathBuf,
    elevation: PathBuf,
    already_root: bool,
}

impl ShellRunner {
    pub fn new(credential: Arc<SessionCredential>) -> Self {
        Self {
            credential: Some(credential),
            filter: OutputFilter::default(),
            shell: PathBuf::from(DEFAULT_SHELL),
            elevation: PathBuf::from(DEFAULT_ELEVATION),
            already_root: running_as_root(),
        }
    }

    /// Runner without a secret; privileged commands fail unless already root.
    pub fn unprivileged() -> Self {
        Self {
            credential: None,
            filter: OutputFilter::default(),
            shell: PathBuf::from(DEFAULT_SHELL),
            elevation: PathBuf::from(DEFAULT_ELEVATION),
            already_root: running_as_root(),
        }
    }

    pub fn with_filter(mut self, filter: OutputFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_elevation(mut self, elevation: impl Into<PathBuf>) -> Self {
        self.elevation = elevation.into();
        self
    }

    fn build_command(&self, descriptor: &CommandDescriptor) -> (Command, bool) {
        if descriptor.privileged && !self.already_root {
            let mut command = Command::new(&self.elevation);
            command
                .args(["-S", "-k", "-p", "", "--"])
                .arg(&self.shell)
                .arg("-c")
                .arg(&descriptor.command);
            (command, true)
        } else {
            let mut command = Command::new(&self.shell);
            command.arg("-c").arg(&descriptor.command);
            (command, false)
        }
    }

    fn emit(&self, sink: &mut dyn FnMut(OutputLine), source: LineSource, raw: &str) {
        let Some(mut text) = self.filter.clean(raw) else {
            return;
        };
        if let Some(credential) = &self.credential {
            text = credential.redact(&text);
        }
        trace!("[{source:?}] {text}");
        sink(OutputLine { source, text });
    }

    fn fail(
        &self,
        descriptor: &CommandDescriptor,
        code: i32,
        reason: &str,
        sink: &mut dyn FnMut(OutputLine),
    ) -> EggsmithError {
        let message = format!("`{}` failed: {reason}", descriptor.command);
        warn!("{message}");
        sink(OutputLine::runner(message));
        EggsmithError::CommandFailed {
            code,
            command: descriptor.command.clone(),
        }
    }
}

enum StreamMessage {
    Line(LineSource, String),
    ReadError(LineSource, std::io::Error),
}

impl CommandExecutor for ShellRunner {
    fn run(
        &self,
        descriptor: &CommandDescriptor,
        sink: &mut dyn FnMut(OutputLine),
    ) -> EggsmithResult<TerminationStatus> {
        let (mut command, elevated) = self.build_command(descriptor);
        let secret = if elevated {
            match &self.credential {
                Some(credential) => Some(credential),
                None => {
                    sink(OutputLine::runner(format!(
                        "`{}` requires elevation but no secret was supplied",
                        descriptor.command
                    )));
                    return Err(EggsmithError::AuthenticationMissing);
                }
            }
        } else {
            None
        };

        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.stdin(if elevated {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        info!("running {descriptor}");
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                return Err(self.fail(descriptor, -1, &format!("unable to start: {err}"), sink));
            }
        };

        if let (Some(credential), Some(mut stdin)) = (secret, child.stdin.take()) {
            let mut payload = zeroize::Zeroizing::new(credential.expose().to_string());
            payload.push('\n');
            if let Err(err) = stdin.write_all(payload.as_bytes()) {
                warn!("could not hand secret to elevation prompt: {err}");
            }
            stdin.flush().ok();
        }

        let (tx, rx) = mpsc::channel();
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_line_reader(stdout, LineSource::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_line_reader(stderr, LineSource::Stderr, tx.clone()));
        }
        drop(tx);

        let mut read_failure = None;
        for message in rx {
            match message {
                StreamMessage::Line(source, raw) => self.emit(sink, source, &raw),
                StreamMessage::ReadError(source, err) => {
                    read_failure.get_or_insert(format!("{source:?} read error: {err}"));
                }
            }
        }
        for reader in readers {
            if reader.join().is_err() {
                read_failure.get_or_insert("output reader thread panicked".to_string());
            }
        }

        let status = match child.wait() {
            Ok(status) => status,
            Err(err) => {
                return Err(self.fail(descriptor, -1, &format!("wait failed: {err}"), sink));
            }
        };
        let code = status.code().unwrap_or(-1);

        if code != 0 {
            let reason = if status.code().is_none() {
                "terminated by signal".to_string()
            } else {
                format!("exit code {code}")
            };
            return Err(self.fail(descriptor, code, &reason, sink));
        }
        if let Some(reason) = read_failure {
            return Err(self.fail(descriptor, -1, &reason, sink));
        }

        Ok(TerminationStatus {
            code,
            command: descriptor.command.clone(),
        })
    }
}

fn spawn_line_reader<R>(
    pipe: R,
    source: LineSource,
    tx: mpsc::Sender<StreamMessage>,
) -> thread::JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf).into_owned();
                    if tx.send(StreamMessage::Line(source, line)).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    let _ = tx.send(StreamMessage::ReadError(source, err));
                    break;
                }
            }
        }
    })
}

/// True when the current process already holds root privileges.
pub fn running_as_root() -> bool {
    #[cfg(unix)]
    unsafe {
        libc::geteuid() == 0
    }
    #[cfg(not(unix))]
    {
        false
    }
}

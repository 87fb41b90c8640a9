//! Ordered, fail-fast execution of command lists.

use crate::error::{EggsmithError, EggsmithResult};
use crate::runner::{CommandDescriptor, CommandExecutor, OutputLine, TerminationStatus};
use log::{error, info};

/// Callbacks fired while a sequence runs.
///
/// Exactly one of `on_all_succeeded` / `on_failure` fires per run.
pub trait SequenceObserver {
    fn on_step_started(&mut self, _index: usize, _total: usize, _descriptor: &CommandDescriptor) {}

    fn on_line(&mut self, line: OutputLine);

    fn on_all_succeeded(&mut self) {}

    fn on_failure(&mut self, _descriptor: &CommandDescriptor, _code: i32) {}
}

/// Outcome of a fully successful run.
#[derive(Debug, Clone, Default)]
pub struct SequenceReport {
    pub completed: Vec<TerminationStatus>,
}

/// Runs descriptors one at a time through a single executor.
pub struct Sequencer<'a, E: CommandExecutor + ?Sized> {
    executor: &'a E,
}

impl<'a, E: CommandExecutor + ?Sized> Sequencer<'a, E> {
    pub fn new(executor: &'a E) -> Self {
        Self { executor }
    }

    /// Execute `steps` in order, stopping at the first failure.
    pub fn run(
        &self,
        steps: &[CommandDescriptor],
        observer: &mut dyn SequenceObserver,
    ) -> EggsmithResult<SequenceReport> {
        let total = steps.len();
        let mut report = SequenceReport::default();

        for (index, step) in steps.iter().enumerate() {
            observer.on_step_started(index, total, step);
            info!("step {}/{}: {}", index + 1, total, step.command);

            let outcome = self
                .executor
                .run(step, &mut |line| observer.on_line(line));
            match outcome {
                Ok(status) => report.completed.push(status),
                Err(err) => {
                    let code = match &err {
                        EggsmithError::CommandFailed { code, .. } => *code,
                        _ => -1,
                    };
                    error!(
                        "sequence aborted at step {}/{} (`{}`, code {code})",
                        index + 1,
                        total,
                        step.command
                    );
                    observer.on_failure(step, code);
                    return Err(err);
                }
            }
        }

        observer.on_all_succeeded();
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ShellRunner;

    #[derive(Default)]
    struct Recorder {
        started: Vec<String>,
        lines: Vec<String>,
        successes: usize,
        failures: Vec<(String, i32)>,
    }

    impl SequenceObserver for Recorder {
        fn on_step_started(&mut self, _index: usize, _total: usize, descriptor: &CommandDescriptor) {
            self.started.push(descriptor.command.clone());
        }

        fn on_line(&mut self, line: OutputLine) {
            self.lines.push(line.text);
        }

        fn on_all_succeeded(&mut self) {
            self.successes += 1;
        }

        fn on_failure(&mut self, descriptor: &CommandDescriptor, code: i32) {
            self.failures.push((descriptor.command.clone(), code));
        }
    }

    fn steps(commands: &[&str]) -> Vec<CommandDescriptor> {
        commands.iter().map(|c| CommandDescriptor::user(*c)).collect()
    }

    #[test]
    fn failure_halts_remaining_steps() {
        let runner = ShellRunner::unprivileged();
        let sequencer = Sequencer::new(&runner);
        let mut recorder = Recorder::default();

        let result = sequencer.run(&steps(&["true", "false", "true"]), &mut recorder);

        assert!(matches!(
            result,
            Err(EggsmithError::CommandFailed { code: 1, ref command }) if command == "false"
        ));
        assert_eq!(recorder.started, vec!["true", "false"]);
        assert_eq!(recorder.failures, vec![("false".to_string(), 1)]);
        assert_eq!(recorder.successes, 0);
    }

    #[test]
    fn full_success_fires_completion_once() {
        let runner = ShellRunner::unprivileged();
        let sequencer = Sequencer::new(&runner);
        let mut recorder = Recorder::default();

        let report = sequencer
            .run(&steps(&["echo one", "echo two"]), &mut recorder)
            .unwrap();

        assert_eq!(report.completed.len(), 2);
        assert_eq!(recorder.lines, vec!["one", "two"]);
        assert_eq!(recorder.successes, 1);
        assert!(recorder.failures.is_empty());
    }

    #[test]
    fn empty_sequence_succeeds_immediately() {
        let runner = ShellRunner::unprivileged();
        let mut recorder = Recorder::default();
        let report = Sequencer::new(&runner).run(&[], &mut recorder).unwrap();
        assert!(report.completed.is_empty());
        assert_eq!(recorder.successes, 1);
    }

    #[test]
    fn steps_never_overlap() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("order");
        let path = marker.display();
        let commands = [
            format!("sleep 0.1; echo a >> {path}"),
            format!("echo b >> {path}"),
        ];
        let runner = ShellRunner::unprivileged();
        let descriptors: Vec<_> = commands.iter().map(CommandDescriptor::user).collect();
        Sequencer::new(&runner)
            .run(&descriptors, &mut Recorder::default())
            .unwrap();
        assert_eq!(std::fs::read_to_string(&marker).unwrap(), "a\nb\n");
    }
}

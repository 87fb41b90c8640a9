//! Foreground event pump and terminal answers to the controller's questions.
//!
//! Workflow operations run on a scoped worker thread. The main thread renders
//! whatever arrives on the event bus and answers copy-loop questions, which
//! the worker forwards through a request channel and then blocks on.
//!
//! A first Ctrl-C raises [`Interrupt`]: questions stop blocking, the copy loop
//! winds down and the caller still tears the session down. A second one exits.

use crate::render::Renderer;
use anyhow::{anyhow, Context, Result};
use eggsmith_core::events::EventReceiver;
use eggsmith_core::workflow::CopyPrompt;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const PUMP_INTERVAL: Duration = Duration::from_millis(50);

/// Exit status used when the operator insists on leaving right away.
const FORCED_EXIT: i32 = 130;

/// Shared "the operator pressed Ctrl-C" flag.
#[derive(Debug, Clone, Default)]
pub(crate) struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    /// Route SIGINT into this flag for the rest of the process.
    pub(crate) fn install(&self) -> Result<()> {
        let flag = self.clone();
        ctrlc::set_handler(move || {
            if flag.raise() {
                eprintln!("\ninterrupted again, exiting without cleanup");
                std::process::exit(FORCED_EXIT);
            }
            eprintln!("\ninterrupt received: stopping after the current step and cleaning up");
        })
        .context("failed to install the Ctrl-C handler")
    }

    /// Returns whether the flag was already raised.
    pub(crate) fn raise(&self) -> bool {
        self.0.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Error out of a guided flow once the flag is up.
    pub(crate) fn checkpoint(&self) -> Result<()> {
        if self.is_raised() {
            Err(anyhow!("interrupted"))
        } else {
            Ok(())
        }
    }
}

enum Question {
    FastCopy { copies_done: u64 },
    Destination,
    CopyAgain,
}

enum Answer {
    Yes(bool),
    Path(Option<PathBuf>),
}

struct PromptRequest {
    question: Question,
    reply: Sender<Answer>,
}

pub(crate) struct Ui {
    events: EventReceiver,
    requests: Receiver<PromptRequest>,
    request_tx: Sender<PromptRequest>,
    renderer: Renderer,
    input: Receiver<String>,
    interrupt: Interrupt,
}

impl Ui {
    pub(crate) fn new(events: EventReceiver, interrupt: Interrupt) -> Self {
        Self::with_input(events, stdin_lines(), interrupt)
    }

    /// Answers come from `input`, one line per message.
    fn with_input(events: EventReceiver, input: Receiver<String>, interrupt: Interrupt) -> Self {
        let (request_tx, requests) = mpsc::channel();
        Self {
            events,
            requests,
            request_tx,
            renderer: Renderer::default(),
            input,
            interrupt,
        }
    }

    pub(crate) fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    /// Prompt handle for the worker side of the copy loop.
    pub(crate) fn copy_prompt(&self) -> TerminalCopyPrompt {
        TerminalCopyPrompt {
            requests: self.request_tx.clone(),
        }
    }

    /// Run `job` on a worker thread while rendering its events here.
    pub(crate) fn on_worker<T, F>(&mut self, job: F) -> T
    where
        T: Send,
        F: FnOnce() -> T + Send,
    {
        thread::scope(|scope| {
            let handle = scope.spawn(job);
            self.pump(|| handle.is_finished());
            match handle.join() {
                Ok(value) => value,
                Err(panic) => std::panic::resume_unwind(panic),
            }
        })
    }

    /// Render anything still queued without blocking.
    pub(crate) fn flush(&mut self) {
        for event in self.events.drain() {
            self.renderer.render(&event);
        }
    }

    fn pump(&mut self, finished: impl Fn() -> bool) {
        loop {
            match self.events.recv_timeout(PUMP_INTERVAL) {
                Ok(event) => self.renderer.render(&event),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {}
            }
            if let Ok(request) = self.requests.try_recv() {
                self.flush();
                let answer = self.renderer.suspend(|| self.answer(&request.question));
                let _ = request.reply.send(answer);
            }
            if finished() {
                self.flush();
                break;
            }
        }
    }

    fn answer(&self, question: &Question) -> Answer {
        match question {
            Question::FastCopy { copies_done } => Answer::Yes(
                self.ask_yes_no(
                    &format!("{copies_done} copy(ies) done. Use fast copy this time?"),
                    true,
                )
                .unwrap_or(false),
            ),
            Question::Destination => Answer::Path(
                self.ask("Destination directory for the image (blank to skip): ")
                    .filter(|raw| !raw.is_empty())
                    .map(PathBuf::from),
            ),
            Question::CopyAgain => Answer::Yes(
                self.ask_yes_no("Copy the image somewhere else?", false)
                    .unwrap_or(false),
            ),
        }
    }

    /// Read one trimmed line. `None` once interrupted; EOF reads as blank.
    pub(crate) fn ask(&self, prompt: &str) -> Option<String> {
        print!("{prompt}");
        let _ = io::stdout().flush();
        loop {
            if self.interrupt.is_raised() {
                println!();
                return None;
            }
            match self.input.recv_timeout(PUMP_INTERVAL) {
                Ok(line) => return Some(line.trim().to_string()),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Some(String::new()),
            }
        }
    }

    pub(crate) fn ask_yes_no(&self, question: &str, default: bool) -> Option<bool> {
        let hint = if default { "[Y/n]" } else { "[y/N]" };
        loop {
            let raw = self.ask(&format!("{question} {hint} "))?;
            match raw.to_ascii_lowercase().as_str() {
                "" => return Some(default),
                "y" | "yes" | "s" | "si" => return Some(true),
                "n" | "no" => return Some(false),
                _ => println!("Please answer y or n."),
            }
        }
    }

    /// Yes/no question inside a guided flow; an interrupt aborts the flow.
    pub(crate) fn confirm(&self, question: &str, default: bool) -> Result<bool> {
        self.ask_yes_no(question, default)
            .ok_or_else(|| anyhow!("interrupted"))
    }
}

/// Lines typed on stdin, read on a helper thread so questions can give up on Ctrl-C.
fn stdin_lines() -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name("eggsmith-stdin".into())
        .spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        log::warn!("failed to read answer: {err}");
                        break;
                    }
                }
            }
        });
    if let Err(err) = spawned {
        log::warn!("stdin reader unavailable: {err}");
    }
    rx
}

/// Worker-side [`CopyPrompt`] that blocks until the main thread answers.
pub(crate) struct TerminalCopyPrompt {
    requests: Sender<PromptRequest>,
}

impl TerminalCopyPrompt {
    fn ask(&self, question: Question) -> Option<Answer> {
        let (reply, response) = mpsc::channel();
        self.requests.send(PromptRequest { question, reply }).ok()?;
        response.recv().ok()
    }
}

impl CopyPrompt for TerminalCopyPrompt {
    fn fast_copy(&mut self, copies_done: u64) -> bool {
        matches!(
            self.ask(Question::FastCopy { copies_done }),
            Some(Answer::Yes(true))
        )
    }

    fn destination(&mut self) -> Option<PathBuf> {
        match self.ask(Question::Destination) {
            Some(Answer::Path(path)) => path,
            _ => None,
        }
    }

    fn copy_again(&mut self) -> bool {
        matches!(self.ask(Question::CopyAgain), Some(Answer::Yes(true)))
    }
}

/// Wraps a prompt so the copy loop ends as soon as the operator interrupts.
pub(crate) struct StopOnInterrupt<P> {
    inner: P,
    interrupt: Interrupt,
}

impl<P: CopyPrompt> StopOnInterrupt<P> {
    pub(crate) fn new(inner: P, interrupt: Interrupt) -> Self {
        Self { inner, interrupt }
    }
}

impl<P: CopyPrompt> CopyPrompt for StopOnInterrupt<P> {
    fn first_copy_fast(&self) -> bool {
        self.inner.first_copy_fast()
    }

    fn fast_copy(&mut self, copies_done: u64) -> bool {
        self.inner.fast_copy(copies_done)
    }

    fn destination(&mut self) -> Option<PathBuf> {
        if self.interrupt.is_raised() {
            return None;
        }
        self.inner.destination()
    }

    fn copy_again(&mut self) -> bool {
        !self.interrupt.is_raised() && self.inner.copy_again()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eggsmith_core::events::EventBus;
    use eggsmith_core::workflow::PresetCopyPrompt;

    fn ui_with_input() -> (Ui, Sender<String>, Interrupt) {
        let (_bus, events) = EventBus::channel(4);
        let (tx, rx) = mpsc::channel();
        let interrupt = Interrupt::default();
        (Ui::with_input(events, rx, interrupt.clone()), tx, interrupt)
    }

    #[test]
    fn ask_returns_trimmed_line() {
        let (ui, tx, _) = ui_with_input();
        tx.send("  /media/usb \n".into()).unwrap();
        assert_eq!(ui.ask("dest: ").as_deref(), Some("/media/usb"));
    }

    #[test]
    fn yes_no_uses_default_on_blank_and_eof() {
        let (ui, tx, _) = ui_with_input();
        tx.send(String::new()).unwrap();
        assert_eq!(ui.ask_yes_no("clean?", true), Some(true));
        drop(tx);
        assert_eq!(ui.ask_yes_no("install?", false), Some(false));
    }

    #[test]
    fn interrupt_unblocks_a_pending_question() {
        let (ui, _tx, interrupt) = ui_with_input();
        let raiser = interrupt.clone();
        let waker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            raiser.raise();
        });

        assert_eq!(ui.ask("dest: "), None);
        assert!(ui.confirm("again?", false).is_err());
        assert!(ui.interrupt().checkpoint().is_err());
        waker.join().unwrap();
    }

    #[test]
    fn second_raise_reports_flag_already_set() {
        let interrupt = Interrupt::default();
        assert!(!interrupt.raise());
        assert!(interrupt.raise());
    }

    #[test]
    fn interrupted_copy_loop_stops_asking_for_destinations() {
        let interrupt = Interrupt::default();
        let mut prompt = StopOnInterrupt::new(
            PresetCopyPrompt::new(["/a", "/b"], true),
            interrupt.clone(),
        );

        assert_eq!(prompt.destination(), Some(PathBuf::from("/a")));
        assert!(prompt.copy_again());

        interrupt.raise();
        assert!(!prompt.copy_again());
        assert_eq!(prompt.destination(), None);
    }
}

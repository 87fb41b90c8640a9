//! Terminal rendering of engine events. Runs on the main thread only.
//!
//! - Copy progress: an indicatif bar, finished when the copy reaches 100%
//! - Running counters: a spinner whose message is the live chronometers
//! - Everything else: timestamped lines printed above the bars

use chrono::Local;
use eggsmith_core::artifact::format_size;
use eggsmith_core::events::EngineEvent;
use eggsmith_core::runner::{LineSource, OutputLine};
use eggsmith_core::timer::{format_hms, CounterId, CounterKind, TimerUpdate};
use eggsmith_core::workflow::{WorkflowEvent, WorkflowLevel, WorkflowReport};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

/// Copy progress is tracked in thousandths.
const BAR_SCALE: u64 = 1_000;
const TICK: Duration = Duration::from_millis(120);

/// Live chronometers, in display order.
#[derive(Debug, Default)]
struct Chronometers {
    copy: Option<u64>,
    generate: Option<u64>,
    auto: Option<u64>,
    total: Option<u64>,
}

impl Chronometers {
    fn slot(&mut self, counter: CounterId) -> &mut Option<u64> {
        match counter {
            CounterId::Named(CounterKind::Copy) => &mut self.copy,
            CounterId::Named(CounterKind::Generate) => &mut self.generate,
            CounterId::Named(CounterKind::Auto) => &mut self.auto,
            CounterId::Total => &mut self.total,
        }
    }

    fn is_empty(&self) -> bool {
        self.copy.is_none() && self.generate.is_none() && self.auto.is_none() && self.total.is_none()
    }

    fn message(&self) -> String {
        [
            ("copy", self.copy),
            ("generate", self.generate),
            ("auto", self.auto),
            ("total", self.total),
        ]
        .iter()
        .filter_map(|(name, seconds)| seconds.map(|s| format!("{name} {}", format_hms(s))))
        .collect::<Vec<_>>()
        .join("  ")
    }
}

pub(crate) struct Renderer {
    multi: MultiProgress,
    copy_bar: Option<ProgressBar>,
    clock: Option<ProgressBar>,
    chronometers: Chronometers,
}

impl Default for Renderer {
    fn default() -> Self {
        Self {
            multi: MultiProgress::new(),
            copy_bar: None,
            clock: None,
            chronometers: Chronometers::default(),
        }
    }
}

impl Renderer {
    pub(crate) fn render(&mut self, event: &EngineEvent) {
        match event {
            EngineEvent::Progress(fraction) => self.progress(*fraction),
            EngineEvent::Timer(update) => self.timer(update),
            EngineEvent::Output(line) => self.print(|| print_line(line)),
            EngineEvent::Notice(notice) => self.print(|| print_notice(notice)),
            EngineEvent::State(state) => log::debug!("state: {state}"),
            EngineEvent::Tally(count) => {
                self.print(|| println!("{} copies completed this session: {count}", stamp()))
            }
            EngineEvent::Artifact { path, size } => self.print(|| {
                println!(
                    "{} image: {} ({})",
                    stamp(),
                    path.display(),
                    format_size(*size)
                )
            }),
        }
    }

    /// Run `f` with the bars hidden, e.g. while a question is on screen.
    pub(crate) fn suspend<R>(&self, f: impl FnOnce() -> R) -> R {
        self.multi.suspend(f)
    }

    fn print(&self, f: impl FnOnce()) {
        self.multi.suspend(f);
    }

    fn progress(&mut self, fraction: f64) {
        let fraction = fraction.clamp(0.0, 1.0);
        let bar = self.copy_bar.get_or_insert_with(|| {
            let bar = self.multi.add(ProgressBar::new(BAR_SCALE));
            bar.set_style(copy_style());
            bar
        });
        bar.set_position((fraction * BAR_SCALE as f64).round() as u64);
        if fraction >= 1.0 {
            bar.finish();
            self.copy_bar = None;
        }
    }

    fn timer(&mut self, update: &TimerUpdate) {
        if update.running {
            *self.chronometers.slot(update.counter) = Some(update.seconds);
        } else {
            *self.chronometers.slot(update.counter) = None;
            let name = match update.counter {
                CounterId::Named(kind) => kind.name(),
                CounterId::Total => "total",
            };
            self.print(|| println!("{} [TIME] {name} {}", stamp(), format_hms(update.seconds)));
        }

        if self.chronometers.is_empty() {
            if let Some(clock) = self.clock.take() {
                clock.finish_and_clear();
            }
            return;
        }
        let message = self.chronometers.message();
        let clock = self.clock.get_or_insert_with(|| {
            let clock = self.multi.add(ProgressBar::new_spinner());
            clock.set_style(clock_style());
            clock.enable_steady_tick(TICK);
            clock
        });
        clock.set_message(message);
    }
}

fn copy_style() -> ProgressStyle {
    ProgressStyle::with_template("  Copying [{bar:30.cyan/dim}] {percent:>3}% ({elapsed})")
        .map(|style| style.progress_chars("━╸─"))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

fn clock_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.cyan} {msg}")
        .map(|style| style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"))
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn stamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

fn print_line(line: &OutputLine) {
    match line.source {
        LineSource::Stdout => println!("  | {}", line.text),
        LineSource::Stderr => eprintln!("  ! {}", line.text),
        LineSource::Runner => println!("{} > {}", stamp(), line.text),
    }
}

fn print_notice(notice: &WorkflowEvent) {
    println!(
        "{} [{}] {}",
        stamp(),
        level_tag(notice.level),
        notice.message
    );
}

pub(crate) fn print_report(report: &WorkflowReport) {
    println!("{}", report.title);
    for event in &report.events {
        println!("  [{}] {}", level_tag(event.level), event.message);
    }
}

/// Short tag used when printing workflow severity levels.
pub(crate) fn level_tag(level: WorkflowLevel) -> &'static str {
    match level {
        WorkflowLevel::Info => "INFO",
        WorkflowLevel::Success => "OK",
        WorkflowLevel::Warn => "WARN",
        WorkflowLevel::Error => "ERR",
        WorkflowLevel::Security => "SEC",
    }
}

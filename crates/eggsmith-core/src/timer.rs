//! Elapsed-time counters for long-running activities.
//!
//! All counter state lives behind a single mutex owned by [`ElapsedTracker`].
//! Updates are published while the lock is held, so consumers observe each
//! counter's values in the order they were produced.

use log::debug;
use std::fmt;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

/// Activities that own an elapsed-time counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CounterKind {
    Copy,
    Generate,
    Auto,
}

impl CounterKind {
    pub const ALL: [CounterKind; 3] = [CounterKind::Copy, CounterKind::Generate, CounterKind::Auto];

    pub fn name(self) -> &'static str {
        match self {
            CounterKind::Copy => "copy",
            CounterKind::Generate => "generate",
            CounterKind::Auto => "auto",
        }
    }

    fn index(self) -> usize {
        match self {
            CounterKind::Copy => 0,
            CounterKind::Generate => 1,
            CounterKind::Auto => 2,
        }
    }
}

impl fmt::Display for CounterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterId {
    Named(CounterKind),
    Total,
}

/// One observable change of a counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerUpdate {
    pub counter: CounterId,
    pub seconds: u64,
    pub running: bool,
}

impl TimerUpdate {
    pub fn formatted(&self) -> String {
        format_hms(self.seconds)
    }
}

/// Render seconds as `HH:MM:SS` (hours are not wrapped at 24).
pub fn format_hms(seconds: u64) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

#[derive(Debug, Clone, Copy, Default)]
struct Counter {
    seconds: u64,
    running: bool,
}

#[derive(Debug, Default)]
struct TrackerState {
    counters: [Counter; 3],
    total_running: bool,
}

impl TrackerState {
    fn total(&self) -> u64 {
        self.counters.iter().map(|c| c.seconds).sum()
    }

    fn any_running(&self) -> bool {
        self.counters.iter().any(|c| c.running)
    }

    fn total_update(&self) -> TimerUpdate {
        TimerUpdate {
            counter: CounterId::Total,
            seconds: self.total(),
            running: self.total_running,
        }
    }
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerSnapshot {
    pub counters: Vec<(CounterKind, u64, bool)>,
    pub total: u64,
    pub total_running: bool,
}

type Publisher = Box<dyn Fn(TimerUpdate) + Send + Sync>;

/// Independent named counters plus their derived total.
pub struct ElapsedTracker {
    state: Mutex<TrackerState>,
    publisher: Option<Publisher>,
}

impl Default for ElapsedTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ElapsedTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElapsedTracker")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl ElapsedTracker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
            publisher: None,
        }
    }

    /// Tracker that forwards every update to `publisher`.
    pub fn with_publisher(publisher: impl Fn(TimerUpdate) + Send + Sync + 'static) -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
            publisher: Some(Box::new(publisher)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, updates: &[TimerUpdate]) {
        if let Some(publisher) = &self.publisher {
            for update in updates {
                publisher(*update);
            }
        }
    }

    /// Reset `kind` to zero and mark it running.
    pub fn start(&self, kind: CounterKind) -> Vec<TimerUpdate> {
        let mut state = self.lock();
        state.counters[kind.index()] = Counter {
            seconds: 0,
            running: true,
        };
        state.total_running = true;
        debug!("counter {kind} started");
        let updates = vec![
            TimerUpdate {
                counter: CounterId::Named(kind),
                seconds: 0,
                running: true,
            },
            state.total_update(),
        ];
        self.publish(&updates);
        updates
    }

    /// Freeze `kind` at its current value.
    ///
    /// When this stops the last running counter, a final frozen total update is emitted.
    pub fn stop(&self, kind: CounterKind) -> Vec<TimerUpdate> {
        let mut state = self.lock();
        let counter = &mut state.counters[kind.index()];
        if !counter.running {
            return Vec::new();
        }
        counter.running = false;
        let frozen = counter.seconds;
        debug!("counter {kind} stopped at {}", format_hms(frozen));

        let mut updates = vec![TimerUpdate {
            counter: CounterId::Named(kind),
            seconds: frozen,
            running: false,
        }];
        if state.total_running && !state.any_running() {
            state.total_running = false;
            debug!("total counter stopped at {}", format_hms(state.total()));
            updates.push(state.total_update());
        }
        self.publish(&updates);
        updates
    }

    /// Advance every running counter by one second.
    pub fn tick(&self) -> Vec<TimerUpdate> {
        let mut state = self.lock();
        let mut updates = Vec::new();
        for kind in CounterKind::ALL {
            let counter = &mut state.counters[kind.index()];
            if counter.running {
                counter.seconds += 1;
                updates.push(TimerUpdate {
                    counter: CounterId::Named(kind),
                    seconds: counter.seconds,
                    running: true,
                });
            }
        }
        if !updates.is_empty() {
            updates.push(state.total_update());
        }
        self.publish(&updates);
        updates
    }

    pub fn value(&self, kind: CounterKind) -> u64 {
        self.lock().counters[kind.index()].seconds
    }

    pub fn is_running(&self, kind: CounterKind) -> bool {
        self.lock().counters[kind.index()].running
    }

    pub fn is_total_running(&self) -> bool {
        self.lock().total_running
    }

    pub fn total(&self) -> u64 {
        self.lock().total()
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        let state = self.lock();
        TrackerSnapshot {
            counters: CounterKind::ALL
                .iter()
                .map(|kind| {
                    let c = state.counters[kind.index()];
                    (*kind, c.seconds, c.running)
                })
                .collect(),
            total: state.total(),
            total_running: state.total_running,
        }
    }
}

/// Background thread that drives [`ElapsedTracker::tick`] once per period.
///
/// The thread exits when the handle is dropped.
pub struct Ticker {
    stop: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Ticker {
    pub fn spawn(tracker: Arc<ElapsedTracker>, period: Duration) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("eggsmith-ticker".into())
            .spawn(move || loop {
                match stop_rx.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => {
                        tracker.tick();
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;
        Ok(Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

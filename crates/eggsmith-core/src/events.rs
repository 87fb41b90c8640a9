//! Bounded channel that carries engine events to the UI-owning thread.

use crate::runner::OutputLine;
use crate::timer::TimerUpdate;
use crate::workflow::{WorkflowEvent, WorkflowState};
use log::debug;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError};
use std::time::Duration;

/// Everything a front-end may render.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A line of (cleaned) command output, or a runner diagnostic.
    Output(OutputLine),
    /// A user-facing notification.
    Notice(WorkflowEvent),
    /// Copy progress in `[0, 1]`.
    Progress(f64),
    Timer(TimerUpdate),
    State(WorkflowState),
    /// New value of the session copy tally.
    Tally(u64),
    /// The generated image was located.
    Artifact { path: PathBuf, size: u64 },
}

/// Sending half. Cheap to clone; each clone keeps its own FIFO order.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: SyncSender<EngineEvent>,
}

/// Receiving half, owned by the UI thread.
#[derive(Debug)]
pub struct EventReceiver {
    rx: Receiver<EngineEvent>,
}

impl EventBus {
    /// Create a bus holding at most `capacity` undelivered events.
    ///
    /// Senders block while the queue is full.
    pub fn channel(capacity: usize) -> (EventBus, EventReceiver) {
        let (tx, rx) = mpsc::sync_channel(capacity.max(1));
        (EventBus { tx }, EventReceiver { rx })
    }

    /// Post an event. Returns `false` once the receiver has gone away.
    pub fn post(&self, event: EngineEvent) -> bool {
        match self.tx.send(event) {
            Ok(()) => true,
            Err(mpsc::SendError(event)) => {
                debug!("event dropped, receiver closed: {event:?}");
                false
            }
        }
    }
}

impl EventReceiver {
    /// Block until the next event, or `None` when every sender is gone.
    pub fn recv(&self) -> Option<EngineEvent> {
        self.rx.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<EngineEvent, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    pub fn try_recv(&self) -> Option<EngineEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Everything currently queued, without blocking.
    pub fn drain(&self) -> Vec<EngineEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

impl IntoIterator for EventReceiver {
    type Item = EngineEvent;
    type IntoIter = mpsc::IntoIter<EngineEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.rx.into_iter()
    }
}

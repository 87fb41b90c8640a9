use std::collections::VecDeque;
use std::path::PathBuf;

/// Decisions the copy loop hands back to the front-end.
///
/// Every method may block for as long as the operator needs; the controller
/// waits without a timeout.
pub trait CopyPrompt {
    /// Fast (unthrottled) mode for the very first copy of a run.
    fn first_copy_fast(&self) -> bool {
        false
    }

    /// Asked before every copy after the first one.
    fn fast_copy(&mut self, copies_done: u64) -> bool;

    /// Directory that receives the image, or `None` to skip copying.
    fn destination(&mut self) -> Option<PathBuf>;

    /// Asked after each successful copy.
    fn copy_again(&mut self) -> bool;
}

/// Non-interactive prompt that walks a fixed list of destinations.
#[derive(Debug, Clone, Default)]
pub struct PresetCopyPrompt {
    destinations: VecDeque<PathBuf>,
    fast: bool,
}

impl PresetCopyPrompt {
    pub fn new<I, P>(destinations: I, fast: bool) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            destinations: destinations.into_iter().map(Into::into).collect(),
            fast,
        }
    }

    pub fn remaining(&self) -> usize {
        self.destinations.len()
    }
}

impl CopyPrompt for PresetCopyPrompt {
    fn first_copy_fast(&self) -> bool {
        self.fast
    }

    fn fast_copy(&mut self, _copies_done: u64) -> bool {
        self.fast
    }

    fn destination(&mut self) -> Option<PathBuf> {
        self.destinations.pop_front()
    }

    fn copy_again(&mut self) -> bool {
        !self.destinations.is_empty()
    }
}

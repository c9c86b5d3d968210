//! Cancellation plumbing for the in-flight command.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Cooperative cancellation flag shared with a running command.
///
/// Cancellation is best-effort: the engine polls the token between units
/// of work, and a command that never looks at it simply runs to
/// completion. Once [`finish`](CancelToken::finish) has been called, late
/// cancel requests are no-ops.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelFlags>,
}

#[derive(Debug, Default)]
struct CancelFlags {
    requested: AtomicBool,
    finished: AtomicBool,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    /// Request cancellation. Ignored once the command is over.
    pub fn cancel(&self) {
        if !self.inner.finished.load(Ordering::Acquire) {
            self.inner.requested.store(true, Ordering::Release);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.requested.load(Ordering::Acquire)
    }

    /// Mark the command as over; subsequent `cancel` calls do nothing.
    pub fn finish(&self) {
        self.inner.finished.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.inner.finished.load(Ordering::Acquire)
    }
}

/// Record of the execution currently running on the engine.
#[derive(Debug, Clone)]
pub struct LastCommand {
    pub work_id: u64,
    pub cancel: CancelToken,
}

/// Shared cell carrying the in-flight [`LastCommand`] from the engine loop
/// (writer) to the reader loop (which services cancel requests).
#[derive(Debug, Clone, Default)]
pub struct LastCommandCell {
    inner: Arc<Mutex<Option<LastCommand>>>,
}

impl LastCommandCell {
    pub fn new() -> Self {
        LastCommandCell::default()
    }

    pub fn set(&self, work_id: u64, cancel: CancelToken) {
        let mut slot = self.inner.lock().expect("last-command lock poisoned");
        *slot = Some(LastCommand { work_id, cancel });
    }

    pub fn clear(&self) {
        let mut slot = self.inner.lock().expect("last-command lock poisoned");
        *slot = None;
    }

    /// Trip the cancel token of the in-flight command, if `work_id` names
    /// it. `0` matches whatever is running. Returns whether a token was
    /// tripped.
    pub fn cancel(&self, work_id: u64) -> bool {
        let slot = self.inner.lock().expect("last-command lock poisoned");
        match slot.as_ref() {
            Some(last) if work_id == 0 || work_id == last.work_id => {
                last.cancel.cancel();
                true
            }
            _ => false,
        }
    }
}

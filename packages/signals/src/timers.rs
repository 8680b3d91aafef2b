//! Loop timers that run their callbacks outside any tracking scope.
//!
//! `later` and `repeat` exist so query GC, polling and session timeouts can
//! fire without accidentally capturing reactive dependencies from the
//! context that armed them. Panics in a callback are reported and do not
//! kill the timer task's owner.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use crate::untrack;

/// Handle to a timer armed with [`later`]. Dropping the handle does not
/// cancel the timer; call [`TimerHandle::cancel`].
pub struct TimerHandle {
    task: tokio::task::JoinHandle<()>,
}

impl TimerHandle {
    pub fn cancel(&self) {
        self.task.abort();
    }
}

/// Run `f` once after `delay`, untracked.
pub fn later(delay: Duration, f: impl FnOnce() + 'static) -> TimerHandle {
    let task = tokio::task::spawn_local(async move {
        tokio::time::sleep(delay).await;
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| untrack(f))) {
            tracing::error!(
                message = payload_text(&payload),
                "panic in later() callback"
            );
        }
    });
    TimerHandle { task }
}

/// Handle to a repeating timer armed with [`repeat`].
pub struct RepeatHandle {
    task: tokio::task::JoinHandle<()>,
}

impl RepeatHandle {
    pub fn cancel(&self) {
        self.task.abort();
    }
}

/// Run `f` every `interval`, untracked, until cancelled.
pub fn repeat(interval: Duration, mut f: impl FnMut() + 'static) -> RepeatHandle {
    let task = tokio::task::spawn_local(async move {
        loop {
            tokio::time::sleep(interval).await;
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| untrack(&mut f))) {
                tracing::error!(
                    message = payload_text(&payload),
                    "panic in repeat() callback"
                );
            }
        }
    });
    RepeatHandle { task }
}

fn payload_text(payload: &Box<dyn std::any::Any + Send>) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}

//! Deferral windows for effect execution.

use crate::rt;

/// Run `f` with effect execution deferred. Signal writes inside the batch
/// mark observers pending; the queue drains once when the outermost batch
/// exits, so an effect triggered by several writes runs once.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    let _guard = BatchGuard::new();
    f()
}

/// Drain the pending-effect queue immediately.
pub fn flush_effects() {
    rt::drain_queue();
}

/// RAII batch: opened on construction, flushed on drop. Useful when the
/// deferral window does not nest cleanly in a closure.
pub struct BatchGuard {
    _priv: (),
}

impl BatchGuard {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        rt::start_batch();
        BatchGuard { _priv: () }
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        if rt::end_batch() {
            rt::drain_queue();
        }
    }
}

//! Read-tracking control.

use crate::rt::{self, FrameKind};

/// Run `f` with dependency tracking suppressed: signal and computed reads
/// inside are not recorded by any enclosing effect or computed.
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    let _scope = UntrackedScope::new();
    f()
}

/// RAII form of [`untrack`] for spans that do not fit a closure.
pub struct UntrackedScope {
    _priv: (),
}

impl UntrackedScope {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        rt::push_frame(FrameKind::Untracked);
        UntrackedScope { _priv: () }
    }
}

impl Drop for UntrackedScope {
    fn drop(&mut self) {
        rt::pop_frame();
    }
}

#![doc = include_str!("../README.md")]

pub(crate) mod rt;

mod batch;
mod computed;
mod effect;
mod scope;
mod signal;
mod timers;

pub mod collections;

pub use batch::{batch, flush_effects, BatchGuard};
pub use computed::Computed;
pub use effect::{on_cleanup, Dependency, Effect, EffectBuilder};
pub use scope::{untrack, UntrackedScope};
pub use signal::Signal;
pub use timers::{later, repeat, RepeatHandle, TimerHandle};

pub use collections::{ReactiveList, ReactiveMap, ReactiveSet};

/// A computed's thunk re-entered itself while already computing.
#[derive(Debug, Clone, thiserror::Error)]
#[error("circular dependency while evaluating computed `{}`", cycle_label(.name))]
pub struct CycleError {
    pub name: Option<String>,
}

fn cycle_label(name: &Option<String>) -> &str {
    name.as_deref().unwrap_or("<unnamed>")
}

pub mod prelude {
    pub use crate::{
        batch, flush_effects, on_cleanup, untrack, Computed, Effect, ReactiveList, ReactiveMap,
        ReactiveSet, Signal,
    };
}

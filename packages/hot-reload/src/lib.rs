//! Hot reload for Tether dev servers.
//!
//! Changed source files map to a reloadable-module graph; the dirty set is
//! the reverse transitive closure of the change, reloaded in dependency
//! order through a [`ReloadHost`]. Each batch of changes is classified:
//! component-level edits re-render live mounts in place (preserving state
//! whose signatures still match), route-level changes also tell clients to
//! reload, and anything touching the app's bootstrap surface (or any
//! failure along the way) requests a process restart - by touching the
//! configured trigger file or exiting with code 3.

mod graph;
mod manager;
mod plan;
mod signature;

pub use graph::{ModuleGraph, ModuleId, ModuleIndex, ModuleInfo};
pub use manager::{HotReloadManager, ReloadError, ReloadHost};
pub use plan::{build_plan, ReloadAction, ReloadPlan, WatchConfig};
pub use signature::{compare_signatures, AppSignature, SignatureImpact};

//! Reload planning: classify a set of changed files into an action.

use std::path::{Path, PathBuf};

use rustc_hash::FxHashSet;

use crate::graph::{ModuleGraph, ModuleId};
use crate::signature::{compare_signatures, AppSignature, SignatureImpact};

/// Watcher and planner configuration.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Directories whose sources are reloadable.
    pub roots: Vec<PathBuf>,
    /// Watched file extensions (default: `rs`).
    pub extensions: Vec<String>,
    /// Path substrings to ignore (build output, VCS metadata).
    pub excludes: Vec<String>,
    /// Files whose change always restarts the process.
    pub config_files: Vec<PathBuf>,
    /// File touched to request a supervised restart; without one the
    /// process exits with code 3.
    pub trigger_file: Option<PathBuf>,
    /// Debounce window for the watch loop.
    pub debounce: std::time::Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        WatchConfig {
            roots: vec![PathBuf::from("src")],
            extensions: vec!["rs".to_string()],
            excludes: vec![
                "/target/".to_string(),
                "/.git/".to_string(),
                "/node_modules/".to_string(),
            ],
            config_files: vec![PathBuf::from("Cargo.toml")],
            trigger_file: None,
            debounce: std::time::Duration::from_millis(100),
        }
    }
}

impl WatchConfig {
    pub fn is_excluded(&self, path: &Path) -> bool {
        let text = path.to_string_lossy();
        self.excludes.iter().any(|needle| text.contains(needle))
    }

    pub fn matches_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| self.extensions.iter().any(|e| e == ext))
            .unwrap_or(false)
    }

    pub fn is_config_file(&self, path: &Path) -> bool {
        self.config_files.iter().any(|config| {
            if config.components().count() == 1 {
                // A bare name like `Cargo.toml` matches anywhere.
                path.file_name() == config.file_name()
            } else {
                path.ends_with(config)
            }
        })
    }
}

/// What the executor should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadAction {
    /// Swap the modules and re-render live mounts in place.
    Rerender,
    /// Swap, re-render, and tell clients to reload.
    RefreshClient,
    /// Only a fresh process is safe.
    Restart(String),
}

/// The classified decision for one batch of changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadPlan {
    /// Dirty modules in reload order (dependencies first).
    pub modules: Vec<ModuleId>,
    pub action: ReloadAction,
}

/// Build a plan for `changed` files.
///
/// Config-file changes and changes to files the module index does not
/// know about escalate straight to a restart; otherwise the dirty set is
/// the reverse transitive closure of the changed modules, and the action
/// depends on how the app signature moved.
pub fn build_plan(
    changed: &[PathBuf],
    config: &WatchConfig,
    graph: &ModuleGraph,
    old_signature: &AppSignature,
    new_signature: &AppSignature,
) -> Option<ReloadPlan> {
    let relevant: Vec<&PathBuf> = changed
        .iter()
        .filter(|path| !config.is_excluded(path))
        .collect();
    if relevant.is_empty() {
        return None;
    }

    for path in &relevant {
        if config.is_config_file(path) {
            return Some(ReloadPlan {
                modules: Vec::new(),
                action: ReloadAction::Restart(format!(
                    "config file changed: {}",
                    path.display()
                )),
            });
        }
    }

    let mut changed_modules: FxHashSet<ModuleId> = FxHashSet::default();
    for path in &relevant {
        if !config.matches_extension(path) {
            continue;
        }
        match graph.index().resolve_path(path) {
            Some(id) => {
                changed_modules.insert(id.clone());
            }
            None => {
                return Some(ReloadPlan {
                    modules: Vec::new(),
                    action: ReloadAction::Restart(format!(
                        "change outside the module index: {}",
                        path.display()
                    )),
                });
            }
        }
    }
    if changed_modules.is_empty() {
        return None;
    }

    let dirty = graph.dirty_set(&changed_modules);
    let modules = graph.topo_order(&dirty);

    let action = match compare_signatures(old_signature, new_signature) {
        SignatureImpact::Restart(reason) => ReloadAction::Restart(reason),
        SignatureImpact::ClientReload => ReloadAction::RefreshClient,
        SignatureImpact::None => ReloadAction::Rerender,
    };

    tracing::info!(
        modules = modules.len(),
        action = ?action,
        "hot reload plan built"
    );
    Some(ReloadPlan { modules, action })
}

//! The hot-reload manager: watch, plan, execute.
//!
//! Code loading itself sits behind [`ReloadHost`]: the host knows how to
//! swap module code and re-register component definitions (a dev
//! interpreter, dlopen, a patching runtime). The manager owns everything
//! around that: debounced watching, the module graph, classification,
//! pausing sessions during the critical section, re-rendering under the
//! hot-reload scope, client reload broadcasts and restart signalling.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use futures_util::StreamExt;
use notify::{RecursiveMode, Watcher};
use tether_core::{hot_reload_scope, ComponentRegistry};
use tether_liveview::{RenderSession, ServerMessage};

use crate::graph::{ModuleGraph, ModuleId, ModuleIndex};
use crate::plan::{build_plan, ReloadAction, ReloadPlan, WatchConfig};
use crate::signature::AppSignature;

#[derive(Debug, thiserror::Error)]
pub enum ReloadError {
    #[error("module `{module}` failed to reload: {reason}")]
    Module { module: String, reason: String },
    #[error("signature refresh failed: {0}")]
    Signature(String),
    #[error("codegen failed: {0}")]
    Codegen(String),
    #[error("watcher failed: {0}")]
    Watcher(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The application side of a reload: code swapping and app introspection.
pub trait ReloadHost {
    /// Reload the given modules, in order, re-registering any component
    /// definitions they provide into [`ReloadHost::registry`].
    fn reload_modules(&self, modules: &[ModuleId]) -> Result<(), ReloadError>;

    /// The app signature as currently running.
    fn current_signature(&self) -> AppSignature;

    /// The app signature the changed sources would produce.
    fn updated_signature(&self) -> Result<AppSignature, ReloadError>;

    fn registry(&self) -> Rc<ComponentRegistry>;

    /// Live sessions to pause, re-render and notify.
    fn sessions(&self) -> Vec<RenderSession>;

    /// Re-run code generation after a successful module reload.
    fn refresh_codegen(&self) -> Result<(), ReloadError> {
        Ok(())
    }
}

pub struct HotReloadManager {
    config: WatchConfig,
    host: Rc<dyn ReloadHost>,
    graph: RefCell<ModuleGraph>,
    /// Overrides process exit, mainly for tests and embedders.
    restart_hook: RefCell<Option<Box<dyn Fn(&str)>>>,
}

impl HotReloadManager {
    pub fn new(config: WatchConfig, host: Rc<dyn ReloadHost>) -> Result<Rc<Self>, ReloadError> {
        let index = ModuleIndex::scan(&config.roots)?;
        tracing::info!(modules = index.len(), "hot reload module index built");
        let graph = ModuleGraph::build(index);
        Ok(Rc::new(HotReloadManager {
            config,
            host,
            graph: RefCell::new(graph),
            restart_hook: RefCell::new(None),
        }))
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    /// Replace the restart behavior (default: touch the trigger file, or
    /// exit with code 3 when none is configured).
    pub fn set_restart_hook(&self, hook: impl Fn(&str) + 'static) {
        *self.restart_hook.borrow_mut() = Some(Box::new(hook));
    }

    /// Rebuild the module index and edges from disk.
    pub fn refresh_graph(&self) -> Result<(), ReloadError> {
        let index = ModuleIndex::scan(&self.config.roots)?;
        *self.graph.borrow_mut() = ModuleGraph::build(index);
        Ok(())
    }

    /// Classify one batch of changed paths.
    pub fn plan_for(&self, changed: &[PathBuf]) -> Option<ReloadPlan> {
        let old_signature = self.host.current_signature();
        let new_signature = match self.host.updated_signature() {
            Ok(signature) => signature,
            Err(err) => {
                tracing::error!(%err, "signature refresh failed; restarting");
                return Some(ReloadPlan {
                    modules: Vec::new(),
                    action: ReloadAction::Restart(err.to_string()),
                });
            }
        };
        build_plan(
            changed,
            &self.config,
            &self.graph.borrow(),
            &old_signature,
            &new_signature,
        )
    }

    /// Execute a plan. Any failure escalates to a process restart so no
    /// session is left with partially reloaded code.
    pub fn execute(&self, plan: ReloadPlan) {
        match &plan.action {
            ReloadAction::Restart(reason) => {
                self.request_restart(reason);
            }
            ReloadAction::Rerender | ReloadAction::RefreshClient => {
                if let Err(err) = self.swap_and_rerender(&plan) {
                    tracing::error!(%err, "hot reload failed; escalating to restart");
                    self.request_restart(&err.to_string());
                    return;
                }
                if plan.action == ReloadAction::RefreshClient {
                    self.broadcast_reload();
                }
            }
        }
    }

    fn swap_and_rerender(&self, plan: &ReloadPlan) -> Result<(), ReloadError> {
        let sessions = self.host.sessions();

        // Critical section: no reactive updates may reach a client while
        // module code and registries are in flux.
        for session in &sessions {
            session.pause_updates();
        }

        let result = (|| -> Result<(), ReloadError> {
            self.host.reload_modules(&plan.modules)?;
            self.host.refresh_codegen()?;
            self.refresh_graph()?;
            Ok(())
        })();

        match result {
            Ok(()) => {
                // Remounts with compatible signatures keep their state;
                // the reconciler handles the rest under this scope.
                hot_reload_scope(|| {
                    for session in &sessions {
                        session.resume_updates();
                    }
                });
                tracing::info!(modules = plan.modules.len(), "hot reload applied");
                Ok(())
            }
            Err(err) => {
                for session in &sessions {
                    session.resume_updates();
                }
                Err(err)
            }
        }
    }

    fn broadcast_reload(&self) {
        for session in self.host.sessions() {
            session.send(ServerMessage::Reload);
        }
    }

    /// Ask the supervisor for a fresh process: touch the trigger file, or
    /// exit with code 3 when none is configured.
    pub fn request_restart(&self, reason: &str) {
        tracing::warn!(reason, "process restart requested");
        if let Some(hook) = self.restart_hook.borrow().as_ref() {
            hook(reason);
            return;
        }
        match &self.config.trigger_file {
            Some(trigger) => {
                if let Err(err) = std::fs::write(trigger, reason) {
                    tracing::error!(%err, "failed to touch restart trigger; exiting");
                    std::process::exit(3);
                }
            }
            None => std::process::exit(3),
        }
    }

    /// Watch the configured roots until the channel closes. Filesystem
    /// events are debounced, filtered and turned into executed plans.
    pub async fn watch(self: Rc<Self>) -> Result<(), ReloadError> {
        let (tx, mut rx) = futures_channel::mpsc::unbounded::<Vec<PathBuf>>();

        let mut watcher = notify::recommended_watcher(move |event: Result<notify::Event, notify::Error>| {
            if let Ok(event) = event {
                let _ = tx.unbounded_send(event.paths);
            }
        })
        .map_err(|err| ReloadError::Watcher(err.to_string()))?;

        for root in &self.config.roots {
            watcher
                .watch(root, RecursiveMode::Recursive)
                .map_err(|err| ReloadError::Watcher(err.to_string()))?;
        }
        tracing::info!(roots = self.config.roots.len(), "hot reload watching");

        while let Some(first) = rx.next().await {
            let mut changed: Vec<PathBuf> = first;

            // Debounce: keep absorbing events until the window goes quiet.
            loop {
                let more = tokio::time::timeout(self.config.debounce, rx.next()).await;
                match more {
                    Ok(Some(paths)) => changed.extend(paths),
                    Ok(None) => break,
                    Err(_) => break,
                }
            }

            changed.sort();
            changed.dedup();
            if let Some(plan) = self.plan_for(&changed) {
                self.execute(plan);
            }
        }
        Ok(())
    }
}

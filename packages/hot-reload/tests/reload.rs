//! Executing a reload against live sessions: state preservation for
//! signature-compatible swaps, client reload broadcasts, restart
//! escalation.

use std::cell::{Cell, RefCell};
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

use serde_json::json;
use tether_core::factory::*;
use tether_core::{
    Callback, ComponentDef, ComponentRegistry, State, StateError, StateSnapshot,
};
use tether_hot_reload::{
    AppSignature, HotReloadManager, ModuleId, ReloadAction, ReloadError, ReloadHost, ReloadPlan,
    WatchConfig,
};
use tether_liveview::{ClientMessage, RenderSession, ServerMessage, SessionConfig};
use tether_router::{route, RouteInfo, RouteTree};
use tether_signals::Signal;

struct CounterState {
    count: Signal<i64>,
}

impl State for CounterState {
    fn drain(&self) -> Result<StateSnapshot, StateError> {
        let mut values = serde_json::Map::new();
        values.insert("count".into(), json!(self.count.peek()));
        Ok(StateSnapshot { version: 1, values })
    }
    fn hydrate(&self, snapshot: StateSnapshot) -> Result<(), StateError> {
        if let Some(v) = snapshot.values.get("count").and_then(|v| v.as_i64()) {
            self.count.set(v);
        }
        Ok(())
    }
}

type InitLog = Rc<RefCell<Vec<usize>>>;

/// A counter whose body text is configurable, so a "reload" can change
/// the rendered output while the hook state stays.
fn counter_body(label: &'static str, init_log: InitLog) -> impl Fn(&()) -> tether_core::Node {
    move |_: &()| {
        let seeded = tether_core::use_init(|| vec![1, 2, 3]);
        init_log.borrow_mut().push(Rc::as_ptr(&seeded) as usize);

        let state = tether_core::use_state(|| CounterState {
            count: Signal::new(7),
        });
        let count = state.count.clone();
        el("div")
            .child(el("span").child(format!("{label}:{}", state.count.get())))
            .child(el("button").on(
                "onClick",
                Callback::from_fn(move || count.update(|n| *n += 1)),
            ))
            .build()
    }
}

struct TestHost {
    registry: Rc<ComponentRegistry>,
    sessions: RefCell<Vec<RenderSession>>,
    on_reload: RefCell<Option<Box<dyn Fn()>>>,
    signature: RefCell<AppSignature>,
}

impl ReloadHost for TestHost {
    fn reload_modules(&self, _modules: &[ModuleId]) -> Result<(), ReloadError> {
        if let Some(swap) = self.on_reload.borrow().as_ref() {
            swap();
        }
        Ok(())
    }
    fn current_signature(&self) -> AppSignature {
        self.signature.borrow().clone()
    }
    fn updated_signature(&self) -> Result<AppSignature, ReloadError> {
        Ok(self.signature.borrow().clone())
    }
    fn registry(&self) -> Rc<ComponentRegistry> {
        self.registry.clone()
    }
    fn sessions(&self) -> Vec<RenderSession> {
        self.sessions.borrow().clone()
    }
}

fn empty_workspace(name: &str) -> PathBuf {
    let root = std::env::temp_dir()
        .join("tether-hot-reload-tests")
        .join(format!("reload-{name}-{}", std::process::id()));
    let _ = fs::remove_dir_all(&root);
    fs::create_dir_all(root.join("src")).unwrap();
    fs::write(root.join("src/lib.rs"), "\n").unwrap();
    root
}

fn manager_with(host: Rc<TestHost>, name: &str) -> Rc<HotReloadManager> {
    let config = WatchConfig {
        roots: vec![empty_workspace(name)],
        ..WatchConfig::default()
    };
    HotReloadManager::new(config, host).unwrap()
}

#[test]
fn compatible_swap_preserves_init_and_state() {
    let init_log: InitLog = Rc::new(RefCell::new(Vec::new()));
    let def = ComponentDef::with_signature("counter", 11, counter_body("v1", init_log.clone()));

    let registry = Rc::new(ComponentRegistry::new());
    registry.register(def.clone());

    let session = RenderSession::new(
        "hr",
        Rc::new(RouteTree::new(vec![route("", def.clone())])),
        SessionConfig::default(),
    );
    let outbox: Rc<RefCell<Vec<ServerMessage>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = outbox.clone();
    session.connect(move |message| sink.borrow_mut().push(message));
    session.receive(ClientMessage::Mount {
        path: "/".into(),
        route_info: RouteInfo {
            pathname: "/".into(),
            ..Default::default()
        },
    });

    // Bump the counter so preserved state is observable.
    session.receive(ClientMessage::Callback {
        path: "/".into(),
        callback: "1.onClick".into(),
        args: vec![],
    });

    let host = Rc::new(TestHost {
        registry,
        sessions: RefCell::new(vec![session.clone()]),
        on_reload: RefCell::new(Some(Box::new({
            let def = def.clone();
            let init_log = init_log.clone();
            move || def.swap_render(11, counter_body("v2", init_log.clone()))
        }))),
        signature: RefCell::new(AppSignature::default()),
    });
    let manager = manager_with(host, "compatible");

    manager.execute(ReloadPlan {
        modules: vec!["views".into()],
        action: ReloadAction::Rerender,
    });

    let messages = outbox.borrow();
    match messages.last().unwrap() {
        ServerMessage::VdomUpdate { ops, .. } => {
            // The body changed but the counter's value survived.
            assert_eq!(
                serde_json::to_value(ops).unwrap(),
                json!([{"type": "replace", "path": "0.0", "data": "v2:8"}])
            );
        }
        other => panic!("expected vdom_update, got {other:?}"),
    }

    // The init block's value kept its identity across the swap.
    let log = init_log.borrow();
    assert!(log.len() >= 3);
    assert!(log.iter().all(|ptr| *ptr == log[0]));
}

#[test]
fn incompatible_swap_remounts_fresh_state() {
    let init_log: InitLog = Rc::new(RefCell::new(Vec::new()));
    let def = ComponentDef::with_signature("counter", 1, counter_body("v1", init_log.clone()));

    let registry = Rc::new(ComponentRegistry::new());
    registry.register(def.clone());

    let session = RenderSession::new(
        "hr2",
        Rc::new(RouteTree::new(vec![route("", def.clone())])),
        SessionConfig::default(),
    );
    let outbox: Rc<RefCell<Vec<ServerMessage>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = outbox.clone();
    session.connect(move |message| sink.borrow_mut().push(message));
    session.receive(ClientMessage::Mount {
        path: "/".into(),
        route_info: RouteInfo {
            pathname: "/".into(),
            ..Default::default()
        },
    });
    session.receive(ClientMessage::Callback {
        path: "/".into(),
        callback: "1.onClick".into(),
        args: vec![],
    });

    let host = Rc::new(TestHost {
        registry,
        sessions: RefCell::new(vec![session.clone()]),
        on_reload: RefCell::new(Some(Box::new({
            let def = def.clone();
            let init_log = init_log.clone();
            // The hook layout "changed": new signature hash.
            move || def.swap_render(2, counter_body("v2", init_log.clone()))
        }))),
        signature: RefCell::new(AppSignature::default()),
    });
    let manager = manager_with(host, "incompatible");

    manager.execute(ReloadPlan {
        modules: vec!["views".into()],
        action: ReloadAction::Rerender,
    });

    let messages = outbox.borrow();
    match messages.last().unwrap() {
        ServerMessage::VdomUpdate { ops, .. } => {
            // A full remount: the counter reset to its initial value.
            let ops = serde_json::to_value(ops).unwrap();
            assert_eq!(ops[0]["type"], "replace");
            assert_eq!(ops[0]["path"], "");
            assert_eq!(
                ops[0]["data"]["children"][0]["children"][0],
                json!("v2:7")
            );
        }
        other => panic!("expected vdom_update, got {other:?}"),
    }
}

#[test]
fn refresh_client_broadcasts_reload() {
    let init_log: InitLog = Rc::new(RefCell::new(Vec::new()));
    let def = ComponentDef::with_signature("counter", 5, counter_body("v1", init_log));
    let registry = Rc::new(ComponentRegistry::new());
    registry.register(def.clone());

    let session = RenderSession::new(
        "hr3",
        Rc::new(RouteTree::new(vec![route("", def)])),
        SessionConfig::default(),
    );
    let outbox: Rc<RefCell<Vec<ServerMessage>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = outbox.clone();
    session.connect(move |message| sink.borrow_mut().push(message));

    let host = Rc::new(TestHost {
        registry,
        sessions: RefCell::new(vec![session]),
        on_reload: RefCell::new(None),
        signature: RefCell::new(AppSignature::default()),
    });
    let manager = manager_with(host, "refresh");

    manager.execute(ReloadPlan {
        modules: vec![],
        action: ReloadAction::RefreshClient,
    });

    assert!(outbox
        .borrow()
        .iter()
        .any(|message| matches!(message, ServerMessage::Reload)));
}

#[test]
fn restart_plans_invoke_the_restart_hook() {
    let init_log: InitLog = Rc::new(RefCell::new(Vec::new()));
    let def = ComponentDef::new("counter", counter_body("v1", init_log));
    let registry = Rc::new(ComponentRegistry::new());
    registry.register(def);

    let host = Rc::new(TestHost {
        registry,
        sessions: RefCell::new(Vec::new()),
        on_reload: RefCell::new(None),
        signature: RefCell::new(AppSignature::default()),
    });
    let manager = manager_with(host, "restart");

    let restarted = Rc::new(Cell::new(false));
    let flag = restarted.clone();
    manager.set_restart_hook(move |_reason| flag.set(true));

    manager.execute(ReloadPlan {
        modules: vec![],
        action: ReloadAction::Restart("config changed".into()),
    });
    assert!(restarted.get());
}

#[test]
fn restart_touches_the_trigger_file_when_configured() {
    let init_log: InitLog = Rc::new(RefCell::new(Vec::new()));
    let def = ComponentDef::new("counter", counter_body("v1", init_log));
    let registry = Rc::new(ComponentRegistry::new());
    registry.register(def);

    let root = empty_workspace("trigger");
    let trigger = root.join(".reload-trigger");
    let config = WatchConfig {
        roots: vec![root],
        trigger_file: Some(trigger.clone()),
        ..WatchConfig::default()
    };
    let host = Rc::new(TestHost {
        registry,
        sessions: RefCell::new(Vec::new()),
        on_reload: RefCell::new(None),
        signature: RefCell::new(AppSignature::default()),
    });
    let manager = HotReloadManager::new(config, host).unwrap();

    manager.request_restart("route config changed");
    assert!(trigger.exists());
    assert!(fs::read_to_string(trigger).unwrap().contains("route config"));
}

#![doc = include_str!("../README.md")]

pub mod component;
pub mod diff;
pub mod factory;
pub mod hooks;
pub mod nodes;
pub mod refs;
pub mod runtime;
pub mod state;
pub mod vdom;

pub use crate::component::{ComponentDef, ComponentRegistry};
pub use crate::diff::{clone_spec, CallbackTable, RenderTree};
pub use crate::hooks::{
    use_effect, use_effect_keyed, use_hook, use_init, use_setup, use_state, use_state_keyed,
    HookContext, HookIdentity, HookState,
};
pub use crate::nodes::{
    join_path, normalize_children, unmount_node, Callback, CallbackResult, ComponentNode,
    ElementNode, Expr, Node, Prop, CALLBACK_PLACEHOLDER, FRAGMENT_TAG, MOUNT_PREFIX,
};
pub use crate::refs::{use_element_ref, use_element_ref_with, ElementRef, RefTransport};
pub use crate::runtime::{
    current_hook_context, hot_reload_scope, is_hot_reload_active, use_env, EnvGuard,
};
pub use crate::state::{
    CodecError, QueryParamCodec, QueryParamField, QueryParamSink, State, StateError,
    StateSnapshot,
};
pub use crate::vdom::{CallbacksDelta, Operation, PropsDelta, VDom};

pub mod prelude {
    pub use crate::component::{ComponentDef, ComponentRegistry};
    pub use crate::diff::RenderTree;
    pub use crate::factory::{el, fragment, text};
    pub use crate::hooks::{use_effect, use_effect_keyed, use_init, use_state, use_state_keyed};
    pub use crate::nodes::{Callback, Expr, Node, Prop};
    pub use crate::refs::{use_element_ref, ElementRef};
    pub use crate::state::{State, StateSnapshot};
    pub use crate::vdom::Operation;
}

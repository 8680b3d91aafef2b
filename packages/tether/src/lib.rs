//! Tether: a server-driven UI framework.
//!
//! The server owns a tree of stateful components, renders it to a JSON
//! VDOM, and ships patches plus callback references to a thin client that
//! mirrors the document and forwards user events back. This crate
//! re-exports the pieces:
//!
//! - [`tether_signals`]: the reactivity engine (signals, computeds,
//!   effects, batches, reactive collections).
//! - [`tether_core`]: the element tree, hook runtime, state layer and the
//!   renderer/reconciler.
//! - [`tether_router`]: route trees and the reactive route context.
//! - [`tether_query`]: cached async fetches with observers and GC.
//! - [`tether_liveview`]: one render session per connected client.
//! - [`tether_hot_reload`]: dev-mode module reloading with state
//!   preservation.

pub use tether_core;
pub use tether_hot_reload;
pub use tether_liveview;
pub use tether_query;
pub use tether_router;
pub use tether_signals;

/// Derive for reactive state structs; see [`tether_core::State`].
pub use tether_core_macro::State;

pub mod prelude {
    pub use tether_core::factory::{el, fragment, text};
    pub use tether_core::{
        use_effect, use_effect_keyed, use_element_ref, use_init, use_state, use_state_keyed,
        Callback, ComponentDef, ComponentRegistry, Expr, Node, Prop, RenderTree, State,
        StateSnapshot,
    };
    pub use tether_core_macro::State as DeriveState;
    pub use tether_liveview::{ClientMessage, RenderSession, ServerMessage, SessionConfig};
    pub use tether_query::{use_query, QueryError, QueryKey, QueryOptions, QueryStore};
    pub use tether_router::{layout, page, route, use_route, RouteInfo, RouteTree};
    pub use tether_signals::{batch, untrack, Computed, Effect, Signal};
}

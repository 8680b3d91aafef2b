//! Routing for Tether apps: a declarative route tree, path matching with
//! parameters and catch-alls, and a reactive route context whose fields
//! drive re-renders when the client navigates.

mod context;
mod query;
mod tree;

pub use context::{use_route, NavigationIntent, RouteContext, RouteInfo};
pub use query::{encode_query, parse_query};
pub use tree::{layout, page, route, normalize_path, OutletProps, Route, RouteMatch, RouteTree};

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("no route matches `{0}`")]
    NotFound(String),
    #[error("invalid route pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

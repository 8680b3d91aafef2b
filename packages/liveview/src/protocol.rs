//! The bidirectional wire protocol.
//!
//! Messages are JSON objects discriminated by `type`. The server ships
//! rendered documents and patches; the client reports lifecycle events and
//! forwards user interactions.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tether_core::Operation;
use tether_router::RouteInfo;

/// Messages the client sends to the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// A mount point appeared on the page.
    Mount {
        path: String,
        #[serde(rename = "routeInfo")]
        route_info: RouteInfo,
    },
    /// The client-side location changed for an existing mount.
    Navigate {
        path: String,
        #[serde(rename = "routeInfo")]
        route_info: RouteInfo,
    },
    /// A user interaction targeting a callback by table key.
    Callback {
        path: String,
        callback: String,
        #[serde(default)]
        args: Vec<Value>,
    },
    /// The mount point went away.
    Unmount { path: String },
    /// Response to a server-initiated `api_call`.
    ApiResult {
        id: u64,
        ok: bool,
        status: u16,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default)]
        body: Option<Value>,
    },
    /// Channel-scoped traffic (refs, forms, plugins).
    Channel {
        channel: String,
        event: String,
        #[serde(default)]
        payload: Value,
        #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
    },
}

/// Structured error shipped with `server_error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    pub phase: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Messages the session sends to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Full document for a fresh mount.
    VdomInit {
        path: String,
        vdom: Value,
        callbacks: Vec<String>,
        render_props: Vec<String>,
        css_refs: Vec<String>,
    },
    /// Ordered patch operations for an existing mount.
    VdomUpdate { path: String, ops: Vec<Operation> },
    /// Ask the client to navigate.
    NavigateTo {
        path: String,
        replace: bool,
        hard: bool,
    },
    /// Ask the client to perform an HTTP request on the server's behalf.
    ApiCall {
        id: u64,
        url: String,
        method: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<Value>,
        credentials: Credentials,
    },
    /// A phase failed for one mount; the session stays alive.
    ServerError { path: String, error: ErrorPayload },
    /// Invalidate the client's caches and reload.
    Reload,
    /// Channel-scoped traffic (refs, forms, plugins).
    Channel {
        channel: String,
        event: String,
        #[serde(default)]
        payload: Value,
        #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Credentials {
    Include,
    Omit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_parse_from_wire_json() {
        let msg: ClientMessage = serde_json::from_value(serde_json::json!({
            "type": "mount",
            "path": "/",
            "routeInfo": {
                "pathname": "/users/4",
                "queryParams": {"tab": "posts"},
                "pathParams": {},
                "catchall": [],
                "hash": "",
            },
        }))
        .unwrap();
        match msg {
            ClientMessage::Mount { path, route_info } => {
                assert_eq!(path, "/");
                assert_eq!(route_info.pathname, "/users/4");
                assert_eq!(route_info.query_params["tab"], "posts");
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn server_messages_serialize_with_type_tags() {
        let json = serde_json::to_value(ServerMessage::NavigateTo {
            path: "/login".into(),
            replace: true,
            hard: false,
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "navigate_to",
                "path": "/login",
                "replace": true,
                "hard": false,
            })
        );

        let json = serde_json::to_value(ServerMessage::Reload).unwrap();
        assert_eq!(json, serde_json::json!({"type": "reload"}));
    }

    #[test]
    fn callback_args_default_to_empty() {
        let msg: ClientMessage = serde_json::from_value(serde_json::json!({
            "type": "callback",
            "path": "/",
            "callback": "1.onClick",
        }))
        .unwrap();
        assert!(matches!(msg, ClientMessage::Callback { args, .. } if args.is_empty()));
    }
}

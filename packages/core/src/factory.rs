//! Builders for element trees.
//!
//! There is no template macro on the server side; trees are built with a
//! small fluent API:
//!
//! ```rust
//! use tether_core::factory::*;
//! use tether_core::nodes::Callback;
//!
//! let view = el("div")
//!     .child(el("span").child("n"))
//!     .child(el("button").on("onClick", Callback::from_fn(|| {})))
//!     .build();
//! ```

use serde_json::Value;

use crate::nodes::{Callback, ElementNode, Expr, Node, Prop, FRAGMENT_TAG};

/// Start building an element with the given tag.
pub fn el(tag: impl Into<String>) -> ElementBuilder {
    ElementBuilder {
        node: ElementNode {
            tag: tag.into(),
            key: None,
            props: indexmap::IndexMap::new(),
            children: Vec::new(),
        },
    }
}

/// A text node.
pub fn text(value: impl Into<String>) -> Node {
    Node::Text(value.into())
}

/// A fragment: children splice into the surrounding parent.
pub fn fragment(children: impl IntoIterator<Item = Node>) -> Node {
    el(FRAGMENT_TAG).children(children).build()
}

pub struct ElementBuilder {
    node: ElementNode,
}

impl ElementBuilder {
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.node.key = Some(key.into());
        self
    }

    pub fn prop(mut self, name: impl Into<String>, value: impl Into<Prop>) -> Self {
        self.node.props.insert(name.into(), value.into());
        self
    }

    /// An event-handler prop.
    pub fn on(mut self, name: impl Into<String>, callback: Callback) -> Self {
        self.node.props.insert(name.into(), Prop::Callback(callback));
        self
    }

    pub fn child(mut self, child: impl IntoNode) -> Self {
        self.node.children.push(child.into_node());
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = Node>) -> Self {
        self.node.children.extend(children);
        self
    }

    pub fn build(self) -> Node {
        Node::Element(self.node)
    }
}

/// Conversion into a child node.
pub trait IntoNode {
    fn into_node(self) -> Node;
}

impl IntoNode for Node {
    fn into_node(self) -> Node {
        self
    }
}

impl IntoNode for ElementBuilder {
    fn into_node(self) -> Node {
        self.build()
    }
}

impl IntoNode for &str {
    fn into_node(self) -> Node {
        Node::Text(self.to_string())
    }
}

impl IntoNode for String {
    fn into_node(self) -> Node {
        Node::Text(self)
    }
}

impl IntoNode for i64 {
    fn into_node(self) -> Node {
        Node::Text(self.to_string())
    }
}

impl IntoNode for i32 {
    fn into_node(self) -> Node {
        Node::Text(self.to_string())
    }
}

impl IntoNode for f64 {
    fn into_node(self) -> Node {
        Node::Text(self.to_string())
    }
}

impl From<Value> for Prop {
    fn from(value: Value) -> Self {
        Prop::Value(value)
    }
}

impl From<&str> for Prop {
    fn from(value: &str) -> Self {
        Prop::Value(Value::String(value.to_string()))
    }
}

impl From<String> for Prop {
    fn from(value: String) -> Self {
        Prop::Value(Value::String(value))
    }
}

impl From<bool> for Prop {
    fn from(value: bool) -> Self {
        Prop::Value(Value::Bool(value))
    }
}

impl From<i64> for Prop {
    fn from(value: i64) -> Self {
        Prop::Value(Value::from(value))
    }
}

impl From<i32> for Prop {
    fn from(value: i32) -> Self {
        Prop::Value(Value::from(value))
    }
}

impl From<f64> for Prop {
    fn from(value: f64) -> Self {
        Prop::Value(Value::from(value))
    }
}

impl From<Callback> for Prop {
    fn from(value: Callback) -> Self {
        Prop::Callback(value)
    }
}

impl From<Expr> for Prop {
    fn from(value: Expr) -> Self {
        Prop::Expr(value)
    }
}

impl From<Node> for Prop {
    fn from(value: Node) -> Self {
        Prop::Node(Box::new(value))
    }
}

impl From<ElementBuilder> for Prop {
    fn from(value: ElementBuilder) -> Self {
        Prop::Node(Box::new(value.build()))
    }
}

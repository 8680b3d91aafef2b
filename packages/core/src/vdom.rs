//! Wire types for rendered documents and patch operations.
//!
//! The VDOM itself is plain JSON (`serde_json::Value`): elements are
//! `{tag, props?, children?, key?, eval?}` objects, text nodes are JSON
//! strings. Patches are an ordered list of [`Operation`]s addressed by
//! dotted structural paths.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A rendered VDOM payload.
pub type VDom = Value;

/// Prop changes for one element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropsDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remove: Option<Vec<String>>,
    /// Full new list of eval props, present only when the set changed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eval: Option<Vec<String>>,
}

impl PropsDelta {
    pub fn is_empty(&self) -> bool {
        self.set.is_none() && self.remove.is_none() && self.eval.is_none()
    }
}

/// Callback-table changes, emitted at the tree root.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallbacksDelta {
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub add: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub remove: Vec<String>,
}

impl CallbacksDelta {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

/// One patch operation. Paths address the node the operation applies to;
/// `""` is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    /// The subtree at `path` changed identity; `data` is its new VDOM.
    Replace { path: String, data: VDom },
    /// Prop delta for the element at `path`.
    UpdateProps { path: String, data: PropsDelta },
    /// Sibling-list transform at `path`: the final list has `n` entries;
    /// each final index appears in `new` (freshly rendered) or `reuse`
    /// (moved from an old index), or is held in place.
    Reconciliation {
        path: String,
        #[serde(rename = "N")]
        n: usize,
        /// Parallel lists: destination indices and their VDOM payloads.
        new: (Vec<usize>, Vec<VDom>),
        /// Parallel lists: destination indices and source indices.
        reuse: (Vec<usize>, Vec<usize>),
    },
    /// Callback-table delta; always addressed to the root.
    UpdateCallbacks { path: String, data: CallbacksDelta },
}

impl Operation {
    pub fn path(&self) -> &str {
        match self {
            Operation::Replace { path, .. }
            | Operation::UpdateProps { path, .. }
            | Operation::Reconciliation { path, .. }
            | Operation::UpdateCallbacks { path, .. } => path,
        }
    }
}

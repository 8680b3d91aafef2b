//! The renderer and reconciler.
//!
//! [`RenderTree`] binds a mount to its normalized tree and callback table.
//! The first `render()` produces the full VDOM; each `rerender()` diffs the
//! tree against a fresh spec and emits ordered [`Operation`]s: `replace`
//! when identity changes, `update_props` for prop deltas, and exactly one
//! `reconciliation` per parent whose sibling list changed. Component nodes
//! are transparent in paths: a component's subtree lives at the
//! component's own path.

use std::collections::BTreeSet;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use serde_json::{Map, Value};

use crate::hooks::HookContext;
use crate::nodes::{
    join_path, normalize_children, unmount_node, Callback, ComponentNode, ElementNode, Node,
    Prop, CALLBACK_PLACEHOLDER,
};
use crate::runtime;
use crate::vdom::{CallbacksDelta, Operation, PropsDelta, VDom};

/// The callback table: dotted structural path → handler.
pub type CallbackTable = FxHashMap<String, Callback>;

/// A mount's normalized tree plus the callback table generated by the
/// last render.
pub struct RenderTree {
    element: Option<Node>,
    pub callbacks: CallbackTable,
    rendered: bool,
    render_props: Vec<String>,
    css_refs: Vec<String>,
}

impl RenderTree {
    pub fn new(root: Node) -> Self {
        RenderTree {
            element: Some(root),
            callbacks: FxHashMap::default(),
            rendered: false,
            render_props: Vec::new(),
            css_refs: Vec::new(),
        }
    }

    /// Render the full VDOM. The first call mounts the tree (creating hook
    /// contexts); later calls snapshot the current state without diffing.
    pub fn render(&mut self) -> VDom {
        let mut renderer = Renderer::default();
        let element = self.element.take().expect("render tree has a root");
        if !self.rendered {
            let (vdom, normalized) = renderer.render_tree(element, "");
            self.element = Some(normalized);
            self.rendered = true;
            self.adopt(renderer);
            vdom
        } else {
            let (vdom, element) = renderer.snapshot_tree(element, "");
            self.element = Some(element);
            self.adopt(renderer);
            vdom
        }
    }

    /// Re-render against `new_root` (or a fresh copy of the current spec)
    /// and return the patch operations, including the callback-table delta.
    pub fn rerender(&mut self, new_root: Option<Node>) -> Vec<Operation> {
        assert!(self.rendered, "render() must be called before rerender()");
        let previous = self.element.take().expect("render tree has a root");
        let target = match new_root {
            Some(root) => root,
            None => clone_spec(&previous),
        };

        let old_paths: BTreeSet<String> = self.callbacks.keys().cloned().collect();

        let mut renderer = Renderer::default();
        let normalized = renderer.reconcile_tree(previous, target, "");
        self.element = Some(normalized);

        let new_paths: BTreeSet<String> = renderer.callbacks.keys().cloned().collect();
        let mut operations = std::mem::take(&mut renderer.operations);
        let add: Vec<String> = new_paths.difference(&old_paths).cloned().collect();
        let remove: Vec<String> = old_paths.difference(&new_paths).cloned().collect();
        if !add.is_empty() || !remove.is_empty() {
            operations.push(Operation::UpdateCallbacks {
                path: String::new(),
                data: CallbacksDelta { add, remove },
            });
        }

        self.adopt(renderer);
        operations
    }

    /// Tear down the mounted tree: every component's hooks unmount.
    pub fn unmount(&mut self) {
        if self.rendered {
            if let Some(mut element) = self.element.take() {
                unmount_node(&mut element);
                self.element = Some(element);
            }
            self.rendered = false;
        }
        self.callbacks.clear();
        self.render_props.clear();
        self.css_refs.clear();
    }

    pub fn callback(&self, path: &str) -> Option<Callback> {
        self.callbacks.get(path).cloned()
    }

    /// Sorted callback paths, as listed in `vdom_init`.
    pub fn callback_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.callbacks.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Paths of render props in the current tree.
    pub fn render_prop_paths(&self) -> &[String] {
        &self.render_props
    }

    /// Css-module import keys referenced by the current tree.
    pub fn css_refs(&self) -> &[String] {
        &self.css_refs
    }

    /// The mounted root, for introspection in tests and hot reload.
    pub fn root(&self) -> Option<&Node> {
        self.element.as_ref()
    }

    fn adopt(&mut self, renderer: Renderer) {
        self.callbacks = renderer.callbacks;
        self.render_props = renderer.render_props;
        self.css_refs = renderer.css_refs;
    }
}

#[derive(Default)]
struct Renderer {
    callbacks: CallbackTable,
    operations: Vec<Operation>,
    render_props: Vec<String>,
    css_refs: Vec<String>,
}

struct RenderPropTask {
    key: String,
    previous: Node,
    current: Node,
    path: String,
}

struct DiffPropsResult {
    normalized: indexmap::IndexMap<String, Prop>,
    delta_set: Map<String, Value>,
    delta_remove: Vec<String>,
    tasks: Vec<RenderPropTask>,
    eval_keys: BTreeSet<String>,
    eval_changed: bool,
}

impl Renderer {
    // ------------------------------------------------------------------
    // Fresh rendering
    // ------------------------------------------------------------------

    fn render_tree(&mut self, node: Node, path: &str) -> (VDom, Node) {
        match node {
            Node::Text(text) => (Value::String(text.clone()), Node::Text(text)),
            Node::Element(element) => self.render_node(element, path),
            Node::Component(component) => self.render_component(component, path),
        }
    }

    fn render_component(&mut self, mut component: ComponentNode, path: &str) -> (VDom, Node) {
        let hooks = prepare_hooks(&mut component);
        let rendered = {
            let _guard = hooks.enter();
            component.def.invoke(&*component.props)
        };
        let (vdom, normalized) = self.render_tree(rendered, path);
        component.contents = Some(Box::new(normalized));
        (vdom, Node::Component(component))
    }

    fn render_node(&mut self, mut element: ElementNode, path: &str) -> (VDom, Node) {
        let props = std::mem::take(&mut element.props);
        let mut result = self.diff_props(indexmap::IndexMap::new(), props, path);

        let mut vdom = Map::new();
        vdom.insert("tag".into(), Value::String(element.tag.clone()));
        if let Some(key) = &element.key {
            vdom.insert("key".into(), Value::String(key.clone()));
        }
        if !result.delta_set.is_empty() {
            vdom.insert("props".into(), Value::Object(result.delta_set.clone()));
        }
        if !result.eval_keys.is_empty() {
            vdom.insert(
                "eval".into(),
                Value::Array(
                    result
                        .eval_keys
                        .iter()
                        .map(|k| Value::String(k.clone()))
                        .collect(),
                ),
            );
        }

        for task in std::mem::take(&mut result.tasks) {
            let normalized = self.reconcile_tree(task.previous, task.current, &task.path);
            result
                .normalized
                .insert(task.key, Prop::Node(Box::new(normalized)));
        }
        element.props = result.normalized;

        let children = normalize_children(std::mem::take(&mut element.children));
        let mut children_vdom: Vec<Value> = Vec::with_capacity(children.len());
        let mut normalized_children: Vec<Node> = Vec::with_capacity(children.len());
        for (idx, child) in children.into_iter().enumerate() {
            let child_path = join_path(path, idx);
            let (child_vdom, normalized) = self.render_tree(child, &child_path);
            children_vdom.push(child_vdom);
            normalized_children.push(normalized);
        }
        if !children_vdom.is_empty() {
            vdom.insert("children".into(), Value::Array(children_vdom));
        }
        element.children = normalized_children;

        (Value::Object(vdom), Node::Element(element))
    }

    // ------------------------------------------------------------------
    // Snapshots (full VDOM of an already-mounted tree)
    // ------------------------------------------------------------------

    fn snapshot_tree(&mut self, node: Node, path: &str) -> (VDom, Node) {
        match node {
            Node::Text(text) => (Value::String(text.clone()), Node::Text(text)),
            Node::Element(element) => self.snapshot_node(element, path),
            Node::Component(mut component) => match component.contents.take() {
                Some(contents) => {
                    let (vdom, normalized) = self.snapshot_tree(*contents, path);
                    component.contents = Some(Box::new(normalized));
                    (vdom, Node::Component(component))
                }
                None => self.render_component(component, path),
            },
        }
    }

    fn snapshot_node(&mut self, mut element: ElementNode, path: &str) -> (VDom, Node) {
        let mut vdom = Map::new();
        vdom.insert("tag".into(), Value::String(element.tag.clone()));
        if let Some(key) = &element.key {
            vdom.insert("key".into(), Value::String(key.clone()));
        }

        let props = std::mem::take(&mut element.props);
        let mut rendered_props = Map::new();
        let mut eval_keys: BTreeSet<String> = BTreeSet::new();
        let mut normalized_props = indexmap::IndexMap::new();
        for (key, prop) in props {
            let prop_path = join_path(path, &key);
            match prop {
                Prop::Node(node) => {
                    eval_keys.insert(key.clone());
                    self.note_render_prop(&prop_path);
                    let (value, normalized) = self.snapshot_tree(*node, &prop_path);
                    rendered_props.insert(key.clone(), value);
                    normalized_props.insert(key, Prop::Node(Box::new(normalized)));
                }
                Prop::Expr(expr) => {
                    eval_keys.insert(key.clone());
                    expr.collect_css_refs(&mut self.css_refs);
                    rendered_props.insert(key.clone(), expr.render());
                    normalized_props.insert(key, Prop::Expr(expr));
                }
                Prop::Callback(callback) => {
                    eval_keys.insert(key.clone());
                    self.callbacks.insert(prop_path, callback.clone());
                    rendered_props
                        .insert(key.clone(), Value::String(CALLBACK_PLACEHOLDER.into()));
                    normalized_props.insert(key, Prop::Callback(callback));
                }
                Prop::Value(value) => {
                    rendered_props.insert(key.clone(), value.clone());
                    normalized_props.insert(key, Prop::Value(value));
                }
            }
        }
        if !rendered_props.is_empty() {
            vdom.insert("props".into(), Value::Object(rendered_props));
        }
        if !eval_keys.is_empty() {
            vdom.insert(
                "eval".into(),
                Value::Array(eval_keys.iter().map(|k| Value::String(k.clone())).collect()),
            );
        }
        element.props = normalized_props;

        let children = std::mem::take(&mut element.children);
        let mut children_vdom = Vec::with_capacity(children.len());
        let mut normalized_children = Vec::with_capacity(children.len());
        for (idx, child) in children.into_iter().enumerate() {
            let child_path = join_path(path, idx);
            let (child_vdom, normalized) = self.snapshot_tree(child, &child_path);
            children_vdom.push(child_vdom);
            normalized_children.push(normalized);
        }
        if !children_vdom.is_empty() {
            vdom.insert("children".into(), Value::Array(children_vdom));
        }
        element.children = normalized_children;

        (Value::Object(vdom), Node::Element(element))
    }

    // ------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------

    fn reconcile_tree(&mut self, previous: Node, current: Node, path: &str) -> Node {
        if !previous.same_node(&current) {
            let mut previous = previous;
            unmount_node(&mut previous);
            let (vdom, normalized) = self.render_tree(current, path);
            self.operations.push(Operation::Replace {
                path: path.to_string(),
                data: vdom,
            });
            return normalized;
        }

        match (previous, current) {
            (Node::Component(previous), Node::Component(current)) => {
                self.reconcile_component(previous, current, path)
            }
            (Node::Element(previous), Node::Element(current)) => {
                self.reconcile_element(previous, current, path)
            }
            // Equal text nodes.
            (_, current) => current,
        }
    }

    fn reconcile_component(
        &mut self,
        mut previous: ComponentNode,
        mut current: ComponentNode,
        path: &str,
    ) -> Node {
        if runtime::is_hot_reload_active() && signature_mismatch(&previous, &current) {
            tracing::warn!(
                component = %current.def.id,
                old = previous.def.signature_hash(),
                new = current.def.signature_hash(),
                "component signature changed; remounting"
            );
            let mut old = Node::Component(previous);
            unmount_node(&mut old);
            let (vdom, normalized) = self.render_tree(Node::Component(current), path);
            self.operations.push(Operation::Replace {
                path: path.to_string(),
                data: vdom,
            });
            return normalized;
        }

        // Same component identity: the hook state and last subtree carry
        // over; the render function runs with the new props.
        current.hooks = previous.hooks.take();
        current.contents = previous.contents.take();

        let hooks = prepare_hooks(&mut current);
        let rendered = {
            let _guard = hooks.enter();
            current.def.invoke(&*current.props)
        };

        match current.contents.take() {
            None => {
                let (vdom, normalized) = self.render_tree(rendered, path);
                current.contents = Some(Box::new(normalized));
                self.operations.push(Operation::Replace {
                    path: path.to_string(),
                    data: vdom,
                });
            }
            Some(contents) => {
                let normalized = self.reconcile_tree(*contents, rendered, path);
                current.contents = Some(Box::new(normalized));
            }
        }
        Node::Component(current)
    }

    fn reconcile_element(
        &mut self,
        previous: ElementNode,
        mut current: ElementNode,
        path: &str,
    ) -> Node {
        let mut result =
            self.diff_props(previous.props, std::mem::take(&mut current.props), path);

        if !result.delta_set.is_empty() || !result.delta_remove.is_empty() || result.eval_changed
        {
            let delta = PropsDelta {
                set: (!result.delta_set.is_empty()).then(|| result.delta_set.clone()),
                remove: (!result.delta_remove.is_empty())
                    .then(|| result.delta_remove.clone()),
                eval: result
                    .eval_changed
                    .then(|| result.eval_keys.iter().cloned().collect()),
            };
            self.operations.push(Operation::UpdateProps {
                path: path.to_string(),
                data: delta,
            });
        }

        for task in std::mem::take(&mut result.tasks) {
            let normalized = self.reconcile_tree(task.previous, task.current, &task.path);
            result
                .normalized
                .insert(task.key, Prop::Node(Box::new(normalized)));
        }
        current.props = result.normalized;

        let prev_children = previous.children;
        let next_children = normalize_children(std::mem::take(&mut current.children));
        current.children = self.reconcile_children(prev_children, next_children, path);
        Node::Element(current)
    }

    fn reconcile_children(&mut self, c1: Vec<Node>, c2: Vec<Node>, path: &str) -> Vec<Node> {
        if c1.is_empty() && c2.is_empty() {
            return Vec::new();
        }

        let n1 = c1.len();
        let n2 = c2.len();
        let mut old: Vec<Option<Node>> = c1.into_iter().map(Some).collect();
        let mut new: Vec<Option<Node>> = c2.into_iter().map(Some).collect();
        let mut norm: Vec<Option<Node>> = (0..n2).map(|_| None).collect();

        // Common head: reconcile in place while identities line up.
        let mut i = 0;
        let head = n1.min(n2);
        while i < head {
            let same = old[i]
                .as_ref()
                .zip(new[i].as_ref())
                .map(|(a, b)| a.same_node(b))
                .unwrap_or(false);
            if !same {
                break;
            }
            let x1 = old[i].take().expect("head item present");
            let x2 = new[i].take().expect("head item present");
            norm[i] = Some(self.reconcile_tree(x1, x2, &join_path(path, i)));
            i += 1;
        }

        if i == n1 && i == n2 {
            return norm.into_iter().map(|n| n.expect("all heads filled")).collect();
        }

        // One reconciliation op for this parent; it is placed before any
        // operations produced by reconciling the children it mentions.
        let op_index = self.operations.len();
        self.operations.push(Operation::Reconciliation {
            path: path.to_string(),
            n: n2,
            new: (Vec::new(), Vec::new()),
            reuse: (Vec::new(), Vec::new()),
        });

        let mut keys_to_old: FxHashMap<String, usize> = FxHashMap::default();
        for (j1, slot) in old.iter().enumerate().skip(i) {
            if let Some(key) = slot.as_ref().and_then(Node::key) {
                keys_to_old.insert(key.to_string(), j1);
            }
        }

        let mut new_indices: Vec<usize> = Vec::new();
        let mut new_vdoms: Vec<VDom> = Vec::new();
        let mut reuse_dst: Vec<usize> = Vec::new();
        let mut reuse_src: Vec<usize> = Vec::new();
        let mut reused = vec![false; n1 - i];

        for j2 in i..n2 {
            let x2 = new[j2].take().expect("tail item present");
            let child_path = join_path(path, j2);

            let key = x2.key().map(str::to_string);
            if let Some(key) = &key {
                if let Some(&j1) = keys_to_old.get(key) {
                    let matches = old[j1]
                        .as_ref()
                        .map(|x1| x1.same_node(&x2))
                        .unwrap_or(false);
                    if matches {
                        let x1 = old[j1].take().expect("keyed item present");
                        norm[j2] = Some(self.reconcile_tree(x1, x2, &child_path));
                        reused[j1 - i] = true;
                        if j1 != j2 {
                            reuse_dst.push(j2);
                            reuse_src.push(j1);
                        }
                        continue;
                    }
                }
            }

            // Unkeyed fallback: pair by position.
            if key.is_none() && j2 < n1 {
                let matches = old[j2]
                    .as_ref()
                    .map(|x1| x1.same_node(&x2))
                    .unwrap_or(false);
                if matches {
                    let x1 = old[j2].take().expect("positional item present");
                    reused[j2 - i] = true;
                    norm[j2] = Some(self.reconcile_tree(x1, x2, &child_path));
                    continue;
                }
            }

            let (vdom, normalized) = self.render_tree(x2, &child_path);
            new_indices.push(j2);
            new_vdoms.push(vdom);
            norm[j2] = Some(normalized);
        }

        for (offset, was_reused) in reused.iter().enumerate() {
            if !was_reused {
                if let Some(mut stale) = old[i + offset].take() {
                    unmount_node(&mut stale);
                }
            }
        }

        self.operations[op_index] = Operation::Reconciliation {
            path: path.to_string(),
            n: n2,
            new: (new_indices, new_vdoms),
            reuse: (reuse_dst, reuse_src),
        };

        norm.into_iter()
            .map(|n| n.expect("every final index filled"))
            .collect()
    }

    // ------------------------------------------------------------------
    // Prop diffing
    // ------------------------------------------------------------------

    fn diff_props(
        &mut self,
        previous: indexmap::IndexMap<String, Prop>,
        current: indexmap::IndexMap<String, Prop>,
        path: &str,
    ) -> DiffPropsResult {
        let prev_eval = eval_keys_for_props(&previous);
        let mut previous = previous;

        let mut normalized = indexmap::IndexMap::with_capacity(current.len());
        let mut delta_set = Map::new();
        let mut tasks = Vec::new();
        let mut eval_keys: BTreeSet<String> = BTreeSet::new();

        for (key, value) in current {
            let prop_path = join_path(path, &key);
            let old_value = previous.swap_remove(&key);

            match value {
                Prop::Node(node) => {
                    eval_keys.insert(key.clone());
                    self.note_render_prop(&prop_path);
                    match old_value {
                        Some(Prop::Node(old_node)) => {
                            // Reconciled after the prop delta is emitted so
                            // subtree ops follow the update_props op.
                            normalized.insert(key.clone(), Prop::Value(Value::Null));
                            tasks.push(RenderPropTask {
                                key,
                                previous: *old_node,
                                current: *node,
                                path: prop_path,
                            });
                        }
                        _ => {
                            let (vdom, fresh) = self.render_tree(*node, &prop_path);
                            delta_set.insert(key.clone(), vdom);
                            normalized.insert(key, Prop::Node(Box::new(fresh)));
                        }
                    }
                }
                Prop::Value(new_value) => {
                    if let Some(Prop::Node(mut old_node)) = old_value {
                        unmount_node(&mut old_node);
                        delta_set.insert(key.clone(), new_value.clone());
                    } else {
                        let changed = match &old_value {
                            Some(Prop::Value(old)) => *old != new_value,
                            Some(_) => true,
                            None => true,
                        };
                        if changed {
                            delta_set.insert(key.clone(), new_value.clone());
                        }
                    }
                    normalized.insert(key, Prop::Value(new_value));
                }
                Prop::Expr(expr) => {
                    eval_keys.insert(key.clone());
                    expr.collect_css_refs(&mut self.css_refs);
                    if let Some(Prop::Node(mut old_node)) = old_value {
                        unmount_node(&mut old_node);
                        delta_set.insert(key.clone(), expr.render());
                    } else {
                        let unchanged = matches!(&old_value, Some(Prop::Expr(old)) if *old == expr);
                        if !unchanged {
                            delta_set.insert(key.clone(), expr.render());
                        }
                    }
                    normalized.insert(key, Prop::Expr(expr));
                }
                Prop::Callback(callback) => {
                    eval_keys.insert(key.clone());
                    self.callbacks.insert(prop_path, callback.clone());
                    if let Some(Prop::Node(mut old_node)) = old_value {
                        unmount_node(&mut old_node);
                        delta_set
                            .insert(key.clone(), Value::String(CALLBACK_PLACEHOLDER.into()));
                    } else if !matches!(&old_value, Some(Prop::Callback(_))) {
                        delta_set
                            .insert(key.clone(), Value::String(CALLBACK_PLACEHOLDER.into()));
                    }
                    normalized.insert(key, Prop::Callback(callback));
                }
            }
        }

        // Anything left in `previous` was removed.
        let mut delta_remove: Vec<String> = Vec::with_capacity(previous.len());
        for (key, old_value) in previous {
            if let Prop::Node(mut old_node) = old_value {
                unmount_node(&mut old_node);
            }
            delta_remove.push(key);
        }
        delta_remove.sort();

        let eval_changed = eval_keys != prev_eval;
        DiffPropsResult {
            normalized,
            delta_set,
            delta_remove,
            tasks,
            eval_keys,
            eval_changed,
        }
    }

    fn note_render_prop(&mut self, path: &str) {
        if !self.render_props.iter().any(|p| p == path) {
            self.render_props.push(path.to_string());
        }
    }
}

fn prepare_hooks(component: &mut ComponentNode) -> Rc<HookContext> {
    let hooks = component.hooks.take().unwrap_or_else(HookContext::new);
    *hooks.component_id.borrow_mut() = component.def.id.clone();
    hooks.signature_hash.set(component.def.signature_hash());
    component.hooks = Some(hooks.clone());
    hooks
}

fn signature_mismatch(previous: &ComponentNode, current: &ComponentNode) -> bool {
    // The mounted side compares the hash captured at its last render, so
    // an in-place definition swap is still visible as a change.
    let previous_hash = previous
        .hooks
        .as_ref()
        .map(|hooks| hooks.signature_hash())
        .unwrap_or_else(|| previous.def.signature_hash());
    previous_hash != current.def.signature_hash()
}

fn eval_keys_for_props(props: &indexmap::IndexMap<String, Prop>) -> BTreeSet<String> {
    props
        .iter()
        .filter(|(_, prop)| !matches!(prop, Prop::Value(_)))
        .map(|(key, _)| key.clone())
        .collect()
}

/// A structural copy of the spec without mounted state: components come
/// back unmounted (sharing the def and props), so reconciling the mounted
/// tree against the copy re-renders every component in place.
pub fn clone_spec(node: &Node) -> Node {
    match node {
        Node::Text(text) => Node::Text(text.clone()),
        Node::Component(component) => Node::Component(ComponentNode {
            def: component.def.clone(),
            key: component.key.clone(),
            props: component.props.clone(),
            hooks: None,
            contents: None,
        }),
        Node::Element(element) => Node::Element(ElementNode {
            tag: element.tag.clone(),
            key: element.key.clone(),
            props: element
                .props
                .iter()
                .map(|(key, prop)| {
                    let cloned = match prop {
                        Prop::Value(value) => Prop::Value(value.clone()),
                        Prop::Callback(callback) => Prop::Callback(callback.clone()),
                        Prop::Expr(expr) => Prop::Expr(expr.clone()),
                        Prop::Node(subtree) => Prop::Node(Box::new(clone_spec(subtree))),
                    };
                    (key.clone(), cloned)
                })
                .collect(),
            children: element.children.iter().map(clone_spec).collect(),
        }),
    }
}

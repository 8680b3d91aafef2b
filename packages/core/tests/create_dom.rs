//! Initial render: VDOM shape, callback table, eval lists.

use serde_json::json;
use tether_core::factory::*;
use tether_core::prelude::*;
use tether_core::Expr;

#[test]
fn renders_basic_tree() {
    let root = el("div")
        .prop("class", "container")
        .child(el("span").child("hello"))
        .child("world")
        .build();

    let mut tree = RenderTree::new(root);
    let vdom = tree.render();

    assert_eq!(
        vdom,
        json!({
            "tag": "div",
            "props": {"class": "container"},
            "children": [
                {"tag": "span", "children": ["hello"]},
                "world",
            ],
        })
    );
    assert!(tree.callback_paths().is_empty());
}

#[test]
fn callbacks_render_as_sentinels_and_register() {
    let root = el("div")
        .child(el("span").child("n"))
        .child(el("button").on("onClick", Callback::from_fn(|| {})))
        .build();

    let mut tree = RenderTree::new(root);
    let vdom = tree.render();

    assert_eq!(vdom["children"][1]["props"]["onClick"], json!("$cb"));
    assert_eq!(vdom["children"][1]["eval"], json!(["onClick"]));
    assert_eq!(tree.callback_paths(), vec!["1.onClick".to_string()]);
}

#[test]
fn keys_appear_in_vdom() {
    let root = el("ul")
        .child(el("li").key("a").child("A"))
        .child(el("li").key("b").child("B"))
        .build();

    let mut tree = RenderTree::new(root);
    let vdom = tree.render();
    assert_eq!(vdom["children"][0]["key"], json!("a"));
    assert_eq!(vdom["children"][1]["key"], json!("b"));
}

#[test]
fn render_props_are_nested_vdom_and_eval() {
    let root = el("panel")
        .prop("header", el("h1").child("Title"))
        .build();

    let mut tree = RenderTree::new(root);
    let vdom = tree.render();

    assert_eq!(
        vdom["props"]["header"],
        json!({"tag": "h1", "children": ["Title"]})
    );
    assert_eq!(vdom["eval"], json!(["header"]));
    assert_eq!(tree.render_prop_paths(), ["header"]);
}

#[test]
fn expressions_render_and_collect_css_refs() {
    let root = el("div")
        .prop("className", Expr::import("styles").member("button"))
        .build();

    let mut tree = RenderTree::new(root);
    let vdom = tree.render();

    assert_eq!(
        vdom["props"]["className"],
        json!({"t": "member", "obj": {"t": "ref", "key": "styles"}, "prop": "button"})
    );
    assert_eq!(vdom["eval"], json!(["className"]));
    assert_eq!(tree.css_refs(), ["styles"]);
}

#[test]
fn mount_point_tags_pass_through() {
    let root = el("$$ErrorBoundary")
        .prop("fallback", el("div").child("something broke"))
        .child(el("span").child("content"))
        .build();

    let mut tree = RenderTree::new(root);
    let vdom = tree.render();
    assert_eq!(vdom["tag"], json!("$$ErrorBoundary"));
    assert_eq!(vdom["eval"], json!(["fallback"]));
}

#[test]
fn components_are_transparent_in_paths() {
    let def = ComponentDef::new("button-holder", |_: &()| {
        el("button").on("onClick", Callback::from_fn(|| {})).build()
    });
    let root = el("div").child(def.node(())).build();

    let mut tree = RenderTree::new(root);
    let vdom = tree.render();

    // The component's subtree sits at the component's own path.
    assert_eq!(vdom["children"][0]["tag"], json!("button"));
    assert_eq!(tree.callback_paths(), vec!["0.onClick".to_string()]);
}

#[test]
#[should_panic(expected = "duplicate sibling key")]
fn duplicate_sibling_keys_are_rejected() {
    let root = el("ul")
        .child(el("li").key("a"))
        .child(el("li").key("a"))
        .build();
    RenderTree::new(root).render();
}

//! The route tree: declarative definitions, normalization, matching.

use std::rc::Rc;

use rustc_hash::FxHashMap;
use tether_core::{ComponentDef, Node};

/// Props handed to layout components: the matched child subtree. Layouts
/// clone the spec into their own output via [`tether_core::clone_spec`].
pub struct OutletProps {
    pub child: Rc<Node>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Segment {
    Literal,
    Param,
    CatchAll,
}

#[derive(Clone, Debug)]
struct Pattern {
    segments: Vec<(Segment, String)>,
}

impl Pattern {
    fn parse(pattern: &str) -> Pattern {
        let segments = pattern
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|segment| {
                if let Some(name) = segment.strip_prefix(':') {
                    (Segment::Param, name.to_string())
                } else if let Some(name) = segment.strip_prefix('*') {
                    (Segment::CatchAll, name.to_string())
                } else {
                    (Segment::Literal, segment.to_string())
                }
            })
            .collect();
        Pattern { segments }
    }
}

/// One node in the route tree: a page with a path pattern, or a layout
/// that wraps its children without consuming path segments.
pub struct Route {
    pattern: Pattern,
    raw_pattern: String,
    def: Rc<ComponentDef>,
    children: Vec<Route>,
    is_layout: bool,
}

/// A page route. `pattern` is relative to the parent: `""` is the index,
/// `:name` captures a path parameter, a trailing `*rest` captures the
/// remaining segments.
pub fn route(pattern: &str, def: Rc<ComponentDef>) -> Route {
    Route {
        pattern: Pattern::parse(pattern),
        raw_pattern: pattern.to_string(),
        def,
        children: Vec::new(),
        is_layout: false,
    }
}

/// A page route with nested children.
pub fn page(pattern: &str, def: Rc<ComponentDef>, children: Vec<Route>) -> Route {
    Route {
        pattern: Pattern::parse(pattern),
        raw_pattern: pattern.to_string(),
        def,
        children,
        is_layout: false,
    }
}

/// A layout: renders around whichever child matches, consuming no path.
pub fn layout(def: Rc<ComponentDef>, children: Vec<Route>) -> Route {
    Route {
        pattern: Pattern::parse(""),
        raw_pattern: String::new(),
        def,
        children,
        is_layout: true,
    }
}

/// The resolved target of a path: the leaf's component wrapped by its
/// layout chain (outermost first), plus extracted parameters.
pub struct RouteMatch {
    pub chain: Vec<Rc<ComponentDef>>,
    pub path_params: FxHashMap<String, String>,
    pub catchall: Vec<String>,
    /// The route patterns along the chain, for diagnostics and route
    /// fingerprinting.
    pub patterns: Vec<String>,
}

/// Collapse duplicate slashes and strip the trailing slash (except root).
pub fn normalize_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    out.push('/');
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if !out.ends_with('/') {
            out.push('/');
        }
        out.push_str(segment);
    }
    out
}

/// A sparse tree of routes and layouts.
pub struct RouteTree {
    roots: Vec<Route>,
}

impl RouteTree {
    pub fn new(roots: Vec<Route>) -> Self {
        RouteTree { roots }
    }

    /// Resolve `path` to the deepest matching page, or `None`.
    pub fn find(&self, path: &str) -> Option<RouteMatch> {
        let normalized = normalize_path(path);
        let segments: Vec<&str> = normalized.split('/').filter(|s| !s.is_empty()).collect();
        let mut result = MatchState::default();
        if match_routes(&self.roots, &segments, &mut result) {
            tracing::debug!(path = %normalized, chain = result.patterns.len(), "route matched");
            Some(RouteMatch {
                chain: result.chain,
                path_params: result.params,
                catchall: result.catchall,
                patterns: result.patterns,
            })
        } else {
            tracing::debug!(path = %normalized, "no route matched");
            None
        }
    }

    /// A stable fingerprint of the route structure, used by hot reload to
    /// detect route-tree changes.
    pub fn fingerprint(&self) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut hasher = DefaultHasher::new();
        fn visit(routes: &[Route], hasher: &mut DefaultHasher) {
            for route in routes {
                route.raw_pattern.hash(hasher);
                route.is_layout.hash(hasher);
                route.def.id.hash(hasher);
                visit(&route.children, hasher);
            }
        }
        visit(&self.roots, &mut hasher);
        hasher.finish()
    }
}

#[derive(Default)]
struct MatchState {
    chain: Vec<Rc<ComponentDef>>,
    params: FxHashMap<String, String>,
    catchall: Vec<String>,
    patterns: Vec<String>,
}

fn match_routes(routes: &[Route], segments: &[&str], state: &mut MatchState) -> bool {
    for route in routes {
        let chain_len = state.chain.len();
        let patterns_len = state.patterns.len();
        let params_before: Vec<String> = state.params.keys().cloned().collect();
        if match_route(route, segments, state) {
            return true;
        }
        // Backtrack partial captures from the failed branch.
        state.chain.truncate(chain_len);
        state.patterns.truncate(patterns_len);
        state.params.retain(|key, _| params_before.contains(key));
        state.catchall.clear();
    }
    false
}

fn match_route(route: &Route, segments: &[&str], state: &mut MatchState) -> bool {
    if route.is_layout {
        state.chain.push(route.def.clone());
        state.patterns.push(route.raw_pattern.clone());
        return match_routes(&route.children, segments, state);
    }

    let mut remaining = segments;
    for (kind, name) in &route.pattern.segments {
        match kind {
            Segment::Literal => {
                let Some((head, tail)) = remaining.split_first() else {
                    return false;
                };
                if head != name {
                    return false;
                }
                remaining = tail;
            }
            Segment::Param => {
                let Some((head, tail)) = remaining.split_first() else {
                    return false;
                };
                state
                    .params
                    .insert(name.clone(), urlencoding::decode(head).map(|s| s.into_owned()).unwrap_or_else(|_| head.to_string()));
                remaining = tail;
            }
            Segment::CatchAll => {
                state.catchall = remaining.iter().map(|s| s.to_string()).collect();
                remaining = &[];
            }
        }
    }

    state.chain.push(route.def.clone());
    state.patterns.push(route.raw_pattern.clone());

    if remaining.is_empty() {
        if route.children.is_empty() {
            return true;
        }
        // Prefer an index child; fall back to this page as the leaf.
        if match_routes(&route.children, remaining, state) {
            return true;
        }
        return true;
    }

    if route.children.is_empty() {
        return false;
    }
    match_routes(&route.children, remaining, state)
}

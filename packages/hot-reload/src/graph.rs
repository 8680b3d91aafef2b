//! The reloadable-module graph.
//!
//! Source files under the watch roots are indexed as modules; their
//! `use`/`mod` declarations (parsed with `syn`) become edges. A change
//! dirties the changed module plus everything that transitively imports
//! it, and reloads happen in dependency order.

use std::path::{Path, PathBuf};

use rustc_hash::{FxHashMap, FxHashSet};

/// Stable module name: the source path relative to its watch root, with
/// `::` separators (`src/views/home.rs` → `views::home`).
pub type ModuleId = String;

#[derive(Debug, Clone)]
pub struct ModuleInfo {
    pub id: ModuleId,
    pub path: PathBuf,
}

/// Index of every reloadable source file.
#[derive(Default, Debug)]
pub struct ModuleIndex {
    by_path: FxHashMap<PathBuf, ModuleId>,
    by_id: FxHashMap<ModuleId, ModuleInfo>,
}

impl ModuleIndex {
    /// Scan the watch roots for Rust sources.
    pub fn scan(roots: &[PathBuf]) -> std::io::Result<ModuleIndex> {
        let mut index = ModuleIndex::default();
        for root in roots {
            let mut stack = vec![root.clone()];
            while let Some(dir) = stack.pop() {
                let entries = match std::fs::read_dir(&dir) {
                    Ok(entries) => entries,
                    Err(err) => {
                        tracing::warn!(dir = %dir.display(), %err, "skipping unreadable dir");
                        continue;
                    }
                };
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.is_dir() {
                        stack.push(path);
                    } else if path.extension().and_then(|e| e.to_str()) == Some("rs") {
                        index.insert(root, &path);
                    }
                }
            }
        }
        Ok(index)
    }

    fn insert(&mut self, root: &Path, path: &Path) {
        let id = module_id_for(root, path);
        self.by_path.insert(path.to_path_buf(), id.clone());
        self.by_id.insert(
            id.clone(),
            ModuleInfo {
                id,
                path: path.to_path_buf(),
            },
        );
    }

    pub fn resolve_path(&self, path: &Path) -> Option<&ModuleId> {
        self.by_path.get(path)
    }

    pub fn get(&self, id: &str) -> Option<&ModuleInfo> {
        self.by_id.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &ModuleId> {
        self.by_id.keys()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

fn module_id_for(root: &Path, path: &Path) -> ModuleId {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let mut parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if let Some(last) = parts.last_mut() {
        *last = last.trim_end_matches(".rs").to_string();
    }
    // lib.rs / main.rs / mod.rs name the enclosing module.
    if matches!(parts.last().map(String::as_str), Some("lib" | "main" | "mod")) {
        parts.pop();
    }
    // A leading src/ is not part of the module path.
    if parts.first().map(String::as_str) == Some("src") {
        parts.remove(0);
    }
    if parts.is_empty() {
        "crate".to_string()
    } else {
        parts.join("::")
    }
}

/// Forward and reverse import edges over the module index.
#[derive(Default, Debug)]
pub struct ModuleGraph {
    index: ModuleIndex,
    imports: FxHashMap<ModuleId, FxHashSet<ModuleId>>,
    imported_by: FxHashMap<ModuleId, FxHashSet<ModuleId>>,
}

impl ModuleGraph {
    /// Parse every indexed module and wire the edges.
    pub fn build(index: ModuleIndex) -> ModuleGraph {
        let mut graph = ModuleGraph {
            index,
            imports: FxHashMap::default(),
            imported_by: FxHashMap::default(),
        };
        let infos: Vec<ModuleInfo> = graph.index.by_id.values().cloned().collect();
        for info in infos {
            let deps = parse_imports(&info, &graph.index);
            for dep in &deps {
                graph
                    .imported_by
                    .entry(dep.clone())
                    .or_default()
                    .insert(info.id.clone());
            }
            graph.imports.insert(info.id.clone(), deps);
        }
        graph
    }

    pub fn index(&self) -> &ModuleIndex {
        &self.index
    }

    pub fn imports_of(&self, id: &str) -> Vec<ModuleId> {
        self.imports
            .get(id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// The changed modules plus everything that transitively imports
    /// them: the set that must reload.
    pub fn dirty_set(&self, changed: &FxHashSet<ModuleId>) -> FxHashSet<ModuleId> {
        let mut dirty = FxHashSet::default();
        let mut queue: Vec<ModuleId> = changed.iter().cloned().collect();
        while let Some(id) = queue.pop() {
            if !dirty.insert(id.clone()) {
                continue;
            }
            if let Some(importers) = self.imported_by.get(&id) {
                queue.extend(importers.iter().cloned());
            }
        }
        dirty
    }

    /// Order the dirty set so dependencies reload before their importers.
    /// Cycles (mutually-importing modules) keep a stable arbitrary order.
    pub fn topo_order(&self, dirty: &FxHashSet<ModuleId>) -> Vec<ModuleId> {
        let mut order = Vec::with_capacity(dirty.len());
        let mut visited = FxHashSet::default();
        let mut on_stack = FxHashSet::default();

        let mut roots: Vec<&ModuleId> = dirty.iter().collect();
        roots.sort();
        for root in roots {
            self.visit(root, dirty, &mut visited, &mut on_stack, &mut order);
        }
        order
    }

    fn visit(
        &self,
        id: &ModuleId,
        dirty: &FxHashSet<ModuleId>,
        visited: &mut FxHashSet<ModuleId>,
        on_stack: &mut FxHashSet<ModuleId>,
        order: &mut Vec<ModuleId>,
    ) {
        if visited.contains(id) || !dirty.contains(id) {
            return;
        }
        if !on_stack.insert(id.clone()) {
            return;
        }
        if let Some(deps) = self.imports.get(id) {
            let mut deps: Vec<&ModuleId> = deps.iter().collect();
            deps.sort();
            for dep in deps {
                self.visit(dep, dirty, visited, on_stack, order);
            }
        }
        on_stack.remove(id);
        visited.insert(id.clone());
        order.push(id.clone());
    }
}

/// Extract intra-project imports from one source file.
fn parse_imports(info: &ModuleInfo, index: &ModuleIndex) -> FxHashSet<ModuleId> {
    let mut deps = FxHashSet::default();
    let source = match std::fs::read_to_string(&info.path) {
        Ok(source) => source,
        Err(err) => {
            tracing::warn!(path = %info.path.display(), %err, "unreadable module source");
            return deps;
        }
    };
    let file = match syn::parse_file(&source) {
        Ok(file) => file,
        Err(err) => {
            tracing::warn!(path = %info.path.display(), %err, "unparseable module source");
            return deps;
        }
    };

    for item in &file.items {
        match item {
            syn::Item::Use(item_use) => {
                let mut paths = Vec::new();
                collect_use_paths(&item_use.tree, Vec::new(), &mut paths);
                for segments in paths {
                    if let Some(dep) = resolve_use(&segments, &info.id, index) {
                        if dep != info.id {
                            deps.insert(dep);
                        }
                    }
                }
            }
            syn::Item::Mod(item_mod) if item_mod.content.is_none() => {
                // `mod foo;` points at a child module file.
                let child = if info.id == "crate" {
                    item_mod.ident.to_string()
                } else {
                    format!("{}::{}", info.id, item_mod.ident)
                };
                if index.get(&child).is_some() {
                    deps.insert(child);
                }
            }
            _ => {}
        }
    }
    deps
}

fn collect_use_paths(
    tree: &syn::UseTree,
    mut prefix: Vec<String>,
    out: &mut Vec<Vec<String>>,
) {
    match tree {
        syn::UseTree::Path(path) => {
            prefix.push(path.ident.to_string());
            collect_use_paths(&path.tree, prefix, out);
        }
        syn::UseTree::Name(name) => {
            prefix.push(name.ident.to_string());
            out.push(prefix);
        }
        syn::UseTree::Rename(rename) => {
            prefix.push(rename.ident.to_string());
            out.push(prefix);
        }
        syn::UseTree::Glob(_) => {
            out.push(prefix);
        }
        syn::UseTree::Group(group) => {
            for item in &group.items {
                collect_use_paths(item, prefix.clone(), out);
            }
        }
    }
}

/// Resolve a use path to the deepest known module it refers to.
fn resolve_use(segments: &[String], importer: &ModuleId, index: &ModuleIndex) -> Option<ModuleId> {
    let mut normalized: Vec<String> = Vec::new();
    let mut iter = segments.iter().peekable();
    match iter.peek().map(|s| s.as_str()) {
        Some("crate") => {
            iter.next();
        }
        Some("self") => {
            iter.next();
            normalized.extend(importer.split("::").map(str::to_string));
        }
        Some("super") => {
            let mut parent: Vec<&str> = importer.split("::").collect();
            while iter.peek().map(|s| s.as_str()) == Some("super") {
                iter.next();
                parent.pop();
            }
            normalized.extend(parent.iter().map(|s| s.to_string()));
        }
        _ => {}
    }
    normalized.extend(iter.cloned());

    // Longest known prefix wins.
    while !normalized.is_empty() {
        let candidate = normalized.join("::");
        if index.get(&candidate).is_some() {
            return Some(candidate);
        }
        normalized.pop();
    }
    None
}

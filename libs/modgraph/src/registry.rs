use std::collections::{HashMap, VecDeque};

use crate::errors::ModuleError;
use crate::metadata::{module_key, normalize, ModuleKey, NormalizedModule};
use crate::module::ModuleRef;
use crate::routes::join_path;
use crate::web::GuardItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// One distinct module reference in the graph.
#[derive(Debug)]
pub struct ModuleNode {
    pub id: NodeId,
    pub meta: NormalizedModule,
    pub imports: Vec<NodeId>,
    pub export_modules: Vec<NodeId>,
    /// Route prefix inherited along the edge that discovered this node.
    pub prefix: String,
    /// Guards inherited along the edge that discovered this node.
    pub guards: Vec<GuardItem>,
}

impl ModuleNode {
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn is_root(&self) -> bool {
        self.meta.is_root()
    }

    fn edges(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.imports.iter().chain(&self.export_modules).copied()
    }
}

/// The module graph reachable from the root, in discovery order.
#[derive(Debug)]
pub struct ModuleRegistry {
    nodes: Vec<ModuleNode>,
    index: HashMap<ModuleKey, NodeId>,
    post_order: Vec<NodeId>,
}

impl ModuleRegistry {
    /// Discovers every module reachable through imports and exported
    /// modules, rejects import cycles and computes the children-first order.
    pub fn scan(root: &ModuleRef) -> Result<Self, ModuleError> {
        let root_meta = normalize(root)?;
        if !root_meta.is_root() {
            return Err(ModuleError::configuration(
                &root_meta.name,
                "the application must be bootstrapped with a root module",
            ));
        }

        let mut reg = ModuleRegistry {
            nodes: Vec::new(),
            index: HashMap::new(),
            post_order: Vec::new(),
        };
        let prefix = root_meta.prefix.clone();
        let guards = root_meta.guards.clone();
        reg.insert(root_meta, prefix, guards);

        let mut queue = VecDeque::from([NodeId(0)]);
        while let Some(parent) = queue.pop_front() {
            let node = &reg.nodes[parent.0];
            let children: Vec<(bool, ModuleRef)> = node
                .meta
                .imports
                .iter()
                .map(|m| (true, m.clone()))
                .chain(node.meta.export_modules.iter().map(|m| (false, m.clone())))
                .collect();

            for (is_import, child) in children {
                let key = module_key(&child)?;
                let id = match reg.index.get(&key).copied() {
                    Some(id) => id,
                    None => {
                        let meta = normalize(&child)?;
                        let parent_node = &reg.nodes[parent.0];
                        if meta.is_root() {
                            return Err(ModuleError::configuration(
                                &meta.name,
                                format!("the root module cannot be imported (by {})", parent_node.name()),
                            ));
                        }
                        let prefix = join_path(&parent_node.prefix, &meta.prefix);
                        let mut guards = parent_node.guards.clone();
                        guards.extend(meta.guards.iter().cloned());
                        let id = reg.insert(meta, prefix, guards);
                        queue.push_back(id);
                        id
                    }
                };

                let parent_node = &mut reg.nodes[parent.0];
                let edges = if is_import {
                    &mut parent_node.imports
                } else {
                    &mut parent_node.export_modules
                };
                if !edges.contains(&id) {
                    edges.push(id);
                }
            }
        }

        if let Some(cycle) = reg.detect_cycle_with_path() {
            return Err(ModuleError::ImportCycle { path: cycle });
        }

        let mut visited = vec![false; reg.nodes.len()];
        let mut order = Vec::with_capacity(reg.nodes.len());
        reg.post_visit(NodeId(0), &mut visited, &mut order);
        reg.post_order = order;

        tracing::debug!(modules = reg.nodes.len(), "module graph scanned");
        Ok(reg)
    }

    fn insert(&mut self, meta: NormalizedModule, prefix: String, guards: Vec<GuardItem>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.index.insert(meta.key, id);
        self.nodes.push(ModuleNode {
            id,
            meta,
            imports: Vec::new(),
            export_modules: Vec::new(),
            prefix,
            guards,
        });
        id
    }

    fn post_visit(&self, id: NodeId, visited: &mut [bool], out: &mut Vec<NodeId>) {
        if visited[id.0] {
            return;
        }
        visited[id.0] = true;
        for child in self.nodes[id.0].edges() {
            self.post_visit(child, visited, out);
        }
        out.push(id);
    }

    /// Colored DFS over import and export-module edges. Returns the module
    /// names along the first cycle found, closed by repeating its first name.
    fn detect_cycle_with_path(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        fn dfs(reg: &ModuleRegistry, node: usize, colors: &mut [Color], path: &mut Vec<usize>) -> Option<Vec<String>> {
            colors[node] = Color::Gray;
            path.push(node);

            for neighbor in reg.nodes[node].edges().map(|n| n.0) {
                match colors[neighbor] {
                    Color::Gray => {
                        if let Some(start) = path.iter().position(|&n| n == neighbor) {
                            let mut cycle: Vec<String> =
                                path[start..].iter().map(|&i| reg.nodes[i].name().to_string()).collect();
                            cycle.push(reg.nodes[neighbor].name().to_string());
                            return Some(cycle);
                        }
                    }
                    Color::White => {
                        if let Some(cycle) = dfs(reg, neighbor, colors, path) {
                            return Some(cycle);
                        }
                    }
                    Color::Black => {}
                }
            }

            path.pop();
            colors[node] = Color::Black;
            None
        }

        let mut colors = vec![Color::White; self.nodes.len()];
        let mut path = Vec::new();
        for i in 0..self.nodes.len() {
            if colors[i] == Color::White {
                if let Some(cycle) = dfs(self, i, &mut colors, &mut path) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    pub fn root(&self) -> &ModuleNode {
        &self.nodes[0]
    }

    pub fn node(&self, id: NodeId) -> &ModuleNode {
        &self.nodes[id.0]
    }

    pub fn nodes(&self) -> &[ModuleNode] {
        &self.nodes
    }

    /// Children before parents; the root comes last.
    pub fn post_order(&self) -> &[NodeId] {
        &self.post_order
    }

    pub fn find(&self, module: &ModuleRef) -> Option<NodeId> {
        let key = module_key(module).ok()?;
        self.index.get(&key).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ModuleDef;

    fn names(reg: &ModuleRegistry, ids: &[NodeId]) -> Vec<String> {
        ids.iter().map(|id| reg.node(*id).name().to_string()).collect()
    }

    #[test]
    fn post_order_visits_children_first() {
        let leaf = ModuleDef::builder("Leaf").build();
        let mid = ModuleDef::builder("Mid").import(&leaf).export(&leaf).build();
        let other = ModuleDef::builder("Other").import(&leaf).build();
        let root = ModuleDef::root("App").imports([&mid, &other]).build();

        let reg = ModuleRegistry::scan(&root).unwrap();
        assert_eq!(reg.len(), 4);
        assert_eq!(names(&reg, reg.post_order()), vec!["Leaf", "Mid", "Other", "App"]);
        assert_eq!(reg.node(reg.find(&mid).unwrap()).imports.len(), 1);
        assert_eq!(reg.node(reg.find(&mid).unwrap()).export_modules.len(), 1);
    }

    #[test]
    fn prefixes_and_guards_are_inherited() {
        let leaf = ModuleDef::builder("Leaf").build();
        let mid = ModuleDef::builder("Mid").import(leaf.with_params().prefix("leaf").build()).build();
        let root = ModuleDef::root("App")
            .import(mid.with_params().prefix("mid").build())
            .build();

        let reg = ModuleRegistry::scan(&root).unwrap();
        let leaf_node = reg.nodes().iter().find(|n| n.name() == "Leaf").unwrap();
        assert_eq!(leaf_node.prefix, "mid/leaf");
    }

    #[test]
    fn import_cycle_reports_the_path() {
        use std::sync::LazyLock;
        static A: LazyLock<ModuleRef> =
            LazyLock::new(|| ModuleDef::builder("A").import(ModuleRef::forward(|| B.clone())).build());
        static B: LazyLock<ModuleRef> =
            LazyLock::new(|| ModuleDef::builder("B").import(ModuleRef::forward(|| A.clone())).build());

        let root = ModuleDef::root("App").import(&*A).build();
        match ModuleRegistry::scan(&root) {
            Err(ModuleError::ImportCycle { path }) => assert_eq!(path, vec!["A", "B", "A"]),
            other => panic!("expected an import cycle, got {other:?}"),
        }
    }

    #[test]
    fn root_module_is_required_and_cannot_be_imported() {
        let feature = ModuleDef::builder("Feature").build();
        assert!(matches!(
            ModuleRegistry::scan(&feature),
            Err(ModuleError::Configuration { .. })
        ));

        let other_root = ModuleDef::root("Other").build();
        let root = ModuleDef::root("App").import(&other_root).build();
        let err = ModuleRegistry::scan(&root).unwrap_err();
        assert!(err.to_string().contains("cannot be imported"));
    }
}

//! Module dependency graph

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::ModuleId;

/// Directed graph of modules keyed by id. Cycles are ordinary: bundled code
/// may import itself or import in a loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModuleGraph {
    edges: BTreeMap<ModuleId, BTreeSet<ModuleId>>,
}

impl ModuleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_module(&mut self, id: ModuleId) {
        self.edges.entry(id).or_default();
    }

    /// Adds `from -> to`. Both ends become nodes.
    pub fn add_dependency(&mut self, from: ModuleId, to: ModuleId) {
        self.add_module(to.clone());
        self.edges.entry(from).or_default().insert(to);
    }

    pub fn contains(&self, id: &ModuleId) -> bool {
        self.edges.contains_key(id)
    }

    pub fn modules(&self) -> impl Iterator<Item = &ModuleId> {
        self.edges.keys()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn dependencies(&self, id: &ModuleId) -> impl Iterator<Item = &ModuleId> {
        self.edges.get(id).into_iter().flatten()
    }

    pub fn dependents<'a>(&'a self, id: &'a ModuleId) -> impl Iterator<Item = &'a ModuleId> + 'a {
        self.edges
            .iter()
            .filter(move |(_, deps)| deps.contains(id))
            .map(|(from, _)| from)
    }

    pub fn has_cycle(&self) -> bool {
        !self.cycles().is_empty()
    }

    /// Strongly connected components with two or more modules, plus modules
    /// that depend on themselves. Each cycle is sorted, and cycles are
    /// ordered by their first module.
    pub fn cycles(&self) -> Vec<Vec<ModuleId>> {
        let mut tarjan = Tarjan::new(self);
        for id in self.edges.keys() {
            if !tarjan.index.contains_key(id) {
                tarjan.connect(id);
            }
        }
        let mut cycles: Vec<Vec<ModuleId>> = tarjan
            .components
            .into_iter()
            .filter(|component| match component.as_slice() {
                [single] => self.dependencies(single).any(|dep| dep == single),
                _ => true,
            })
            .map(|mut component| {
                component.sort();
                component
            })
            .collect();
        cycles.sort();
        cycles
    }
}

struct Tarjan<'g> {
    graph: &'g ModuleGraph,
    next: usize,
    index: BTreeMap<&'g ModuleId, usize>,
    lowlink: BTreeMap<&'g ModuleId, usize>,
    stack: Vec<&'g ModuleId>,
    on_stack: BTreeSet<&'g ModuleId>,
    components: Vec<Vec<ModuleId>>,
}

impl<'g> Tarjan<'g> {
    fn new(graph: &'g ModuleGraph) -> Self {
        Self {
            graph,
            next: 0,
            index: BTreeMap::new(),
            lowlink: BTreeMap::new(),
            stack: Vec::new(),
            on_stack: BTreeSet::new(),
            components: Vec::new(),
        }
    }

    // Recursive; bundles nest a few hundred modules deep at most.
    fn connect(&mut self, id: &'g ModuleId) {
        self.index.insert(id, self.next);
        self.lowlink.insert(id, self.next);
        self.next += 1;
        self.stack.push(id);
        self.on_stack.insert(id);

        let graph = self.graph;
        for dep in graph.dependencies(id) {
            if !self.index.contains_key(dep) {
                self.connect(dep);
                let low = self.lowlink[dep].min(self.lowlink[id]);
                self.lowlink.insert(id, low);
            } else if self.on_stack.contains(dep) {
                let low = self.index[dep].min(self.lowlink[id]);
                self.lowlink.insert(id, low);
            }
        }

        if self.lowlink[id] == self.index[id] {
            let mut component = Vec::new();
            while let Some(member) = self.stack.pop() {
                self.on_stack.remove(member);
                component.push(member.clone());
                if member == id {
                    break;
                }
            }
            self.components.push(component);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u64) -> ModuleId {
        ModuleId::Number(n)
    }

    fn graph(edges: &[(u64, u64)]) -> ModuleGraph {
        let mut graph = ModuleGraph::new();
        for &(from, to) in edges {
            graph.add_dependency(id(from), id(to));
        }
        graph
    }

    #[test]
    fn dependencies_and_dependents() {
        let graph = graph(&[(0, 1), (0, 2), (2, 1)]);
        assert_eq!(graph.dependencies(&id(0)).collect::<Vec<_>>(), vec![&id(1), &id(2)]);
        assert_eq!(graph.dependents(&id(1)).collect::<Vec<_>>(), vec![&id(0), &id(2)]);
        assert_eq!(graph.dependencies(&id(9)).count(), 0);
        assert!(!graph.has_cycle());
    }

    #[test]
    fn mutual_imports_form_a_cycle() {
        let graph = graph(&[(0, 1), (1, 2), (2, 1), (2, 3)]);
        assert!(graph.has_cycle());
        assert_eq!(graph.cycles(), vec![vec![id(1), id(2)]]);
    }

    #[test]
    fn self_imports_are_cycles() {
        let graph = graph(&[(0, 0), (0, 1), (3, 4), (4, 5), (5, 3)]);
        assert_eq!(graph.cycles(), vec![vec![id(0)], vec![id(3), id(4), id(5)]]);
    }
}

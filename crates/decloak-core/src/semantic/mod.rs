//! Semantic analysis
//!
//! The [`ScopeGraph`] is an index over a module: scopes, the bindings declared
//! in them, and the identifier occurrences that use each binding. It owns no
//! part of the tree. Transforms rebuild it whenever they need fresh facts.

pub mod binding;
pub mod builder;
pub mod node_id;
pub mod scope;

use swc_common::Span;
use swc_ecma_ast::Module;

pub use binding::{
    Binding, BindingId, BindingKind, BindingTable, Site, SiteKind, SiteShape, UnresolvedSite,
};
pub use builder::ScopeBuilder;
pub use node_id::{IdentCursor, IdentIndex, NodeId, count_idents};
pub use scope::{Scope, ScopeId, ScopeKind, ScopeTree};

/// Durable handle to a binding that survives rebuilding the graph.
///
/// Matches by declaration span when the declaration has a real position, and
/// by declaration ordinal otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingKey {
    pub name: String,
    pub span: Span,
    pub node: NodeId,
}

#[derive(Debug)]
pub struct ScopeGraph {
    scopes: ScopeTree,
    bindings: BindingTable,
    unresolved: Vec<UnresolvedSite>,
    root: ScopeId,
    ident_count: u32,
    stale: bool,
}

impl ScopeGraph {
    pub fn build(module: &Module) -> Self {
        ScopeBuilder::build(module)
    }

    pub(crate) fn from_parts(
        scopes: ScopeTree,
        bindings: BindingTable,
        unresolved: Vec<UnresolvedSite>,
        root: ScopeId,
        ident_count: u32,
    ) -> Self {
        Self {
            scopes,
            bindings,
            unresolved,
            root,
            ident_count,
            stale: false,
        }
    }

    pub fn scopes(&self) -> &ScopeTree {
        &self.scopes
    }

    pub fn root_scope(&self) -> ScopeId {
        self.root
    }

    pub fn binding(&self, id: BindingId) -> &Binding {
        self.bindings.get(id)
    }

    pub fn bindings(&self) -> impl Iterator<Item = &Binding> {
        self.bindings.iter()
    }

    pub(crate) fn bindings_mut(&mut self) -> &mut BindingTable {
        &mut self.bindings
    }

    pub fn binding_at(&self, node: NodeId) -> Option<BindingId> {
        self.bindings.binding_at(node)
    }

    /// The site recorded for the identifier at `node`, resolved or not.
    pub fn site_at(&self, node: NodeId) -> Option<Site> {
        match self.binding_at(node) {
            Some(id) => self.binding(id).sites().find(|site| site.node == node).copied(),
            None => self
                .unresolved
                .iter()
                .find(|u| u.site.node == node)
                .map(|u| u.site),
        }
    }

    pub fn lookup(&self, name: &str, scope: ScopeId) -> Option<BindingId> {
        self.bindings.lookup(name, scope, &self.scopes)
    }

    pub fn bindings_named(&self, name: &str) -> Vec<BindingId> {
        self.bindings
            .iter()
            .filter(|binding| binding.name == name)
            .map(|binding| binding.id)
            .collect()
    }

    pub fn unresolved(&self) -> &[UnresolvedSite] {
        &self.unresolved
    }

    /// Whether some identifier named `name` refers to an undeclared global.
    pub fn is_global_reference(&self, name: &str) -> bool {
        self.unresolved.iter().any(|u| u.name == name)
    }

    /// The binding of the parameter at `index` of the function whose scope
    /// is `scope`.
    pub fn parameter(&self, scope: ScopeId, index: u32) -> Option<BindingId> {
        self.bindings
            .bindings_in_scope(scope)
            .filter(|binding| match binding.kind {
                BindingKind::Param { index: i, .. } => i == index,
                _ => false,
            })
            .min_by_key(|binding| binding.declaration.node)
            .map(|binding| binding.id)
    }

    pub fn key(&self, id: BindingId) -> BindingKey {
        let binding = self.binding(id);
        BindingKey {
            name: binding.name.clone(),
            span: binding.declaration.span,
            node: binding.declaration.node,
        }
    }

    pub fn resolve_key(&self, key: &BindingKey) -> Option<BindingId> {
        self.bindings
            .iter()
            .filter(|binding| binding.name == key.name)
            .find(|binding| {
                if key.span.is_dummy() {
                    binding.declaration.node == key.node
                } else {
                    binding.declaration.span == key.span
                }
            })
            .map(|binding| binding.id)
    }

    /// The binding whose declaring identifier carries `span`.
    pub fn binding_for_declaration_span(&self, span: Span) -> Option<BindingId> {
        if span.is_dummy() {
            return None;
        }
        self.bindings
            .iter()
            .find(|binding| binding.declaration.span == span)
            .map(|binding| binding.id)
    }

    /// Number of identifier occurrences in the indexed module.
    pub fn ident_count(&self) -> u32 {
        self.ident_count
    }

    /// Set once a rewrite changed the number of identifiers in the tree; the
    /// recorded ordinals no longer line up with it.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub(crate) fn mark_stale(&mut self) {
        self.stale = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn key_round_trips_through_rebuild() {
        let parsed = parse("function f(a) { return a; } var a = 2;").unwrap();
        let first = ScopeGraph::build(&parsed.module);
        let param = first
            .bindings_named("a")
            .into_iter()
            .find(|&id| matches!(first.binding(id).kind, BindingKind::Param { .. }))
            .unwrap();
        let key = first.key(param);

        let second = ScopeGraph::build(&parsed.module);
        let resolved = second.resolve_key(&key).unwrap();
        assert!(matches!(
            second.binding(resolved).kind,
            BindingKind::Param { index: 0, .. }
        ));
    }

    #[test]
    fn declaration_span_finds_the_binding() {
        let parsed = parse("var a = 1; function f(b) { return b; }").unwrap();
        let graph = ScopeGraph::build(&parsed.module);
        let b = graph.bindings_named("b")[0];
        let span = graph.binding(b).declaration.span;
        assert_eq!(graph.binding_for_declaration_span(span), Some(b));
        assert_eq!(graph.binding_for_declaration_span(swc_common::DUMMY_SP), None);
    }

    #[test]
    fn site_at_covers_unresolved_names() {
        let parsed = parse("console.log(x);").unwrap();
        let graph = ScopeGraph::build(&parsed.module);
        let site = graph.site_at(NodeId(0)).unwrap();
        assert_eq!(site.kind, SiteKind::Read);
        assert!(graph.is_global_reference("console"));
        assert_eq!(graph.ident_count(), 2);
    }

    #[test]
    fn lookup_respects_block_scope() {
        let parsed = parse("let a = 1; { let b = a; }").unwrap();
        let graph = ScopeGraph::build(&parsed.module);
        assert!(graph.lookup("a", graph.root_scope()).is_some());
        assert!(graph.lookup("b", graph.root_scope()).is_none());
    }
}

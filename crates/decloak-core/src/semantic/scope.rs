//! Scope tree for variable bindings
//!
//! This module provides a scope tree data structure for representing
//! nested program scopes (global, function, block).

use id_arena::{Arena, Id};
use swc_common::Span;

pub type ScopeId = Id<Scope>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Global,
    Function,
    ArrowFunction,
    Block,
    For,
    Switch,
    Catch,
    Class,
    With,
}

impl ScopeKind {
    /// Scopes that receive hoisted `var` declarations.
    pub fn is_var_scope(self) -> bool {
        matches!(
            self,
            ScopeKind::Global | ScopeKind::Function | ScopeKind::ArrowFunction
        )
    }
}

#[derive(Debug)]
pub struct Scope {
    pub id: ScopeId,
    pub kind: ScopeKind,
    pub parent: Option<ScopeId>,
    pub children: Vec<ScopeId>,
    pub span: Span,
}

pub struct ScopeTree {
    arena: Arena<Scope>,
    root: Option<ScopeId>,
}

impl Default for ScopeTree {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ScopeTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeTree")
            .field("len", &self.arena.len())
            .finish()
    }
}

impl ScopeTree {
    pub fn new() -> Self {
        Self {
            arena: Arena::new(),
            root: None,
        }
    }

    pub fn create_scope(
        &mut self,
        kind: ScopeKind,
        parent: Option<ScopeId>,
        span: Span,
    ) -> ScopeId {
        let id = self.arena.alloc_with_id(|id| Scope {
            id,
            kind,
            parent,
            children: Vec::new(),
            span,
        });

        if let Some(parent_id) = parent {
            self.arena[parent_id].children.push(id);
        }

        if self.root.is_none() {
            self.root = Some(id);
        }

        id
    }

    pub fn root(&self) -> Option<ScopeId> {
        self.root
    }

    pub fn get(&self, id: ScopeId) -> &Scope {
        &self.arena[id]
    }

    pub fn parent(&self, id: ScopeId) -> Option<&Scope> {
        self.arena[id].parent.map(|p| &self.arena[p])
    }

    pub fn children(&self, id: ScopeId) -> impl Iterator<Item = &Scope> {
        self.arena[id].children.iter().map(|&c| &self.arena[c])
    }

    pub fn ancestors(&self, id: ScopeId) -> AncestorIter<'_> {
        AncestorIter {
            tree: self,
            current: Some(id),
        }
    }

    /// True when `scope` is `ancestor` or nested anywhere inside it.
    pub fn is_descendant_of(&self, scope: ScopeId, ancestor: ScopeId) -> bool {
        self.ancestors(scope).any(|s| s.id == ancestor)
    }

    /// The nearest enclosing scope that receives `var` declarations.
    pub fn var_scope(&self, id: ScopeId) -> ScopeId {
        self.ancestors(id)
            .find(|scope| scope.kind.is_var_scope())
            .map(|scope| scope.id)
            .unwrap_or(id)
    }

    /// Whether a function boundary lies between `inner` and `outer`.
    pub fn crosses_function(&self, inner: ScopeId, outer: ScopeId) -> bool {
        for scope in self.ancestors(inner) {
            if scope.id == outer {
                return false;
            }
            if matches!(scope.kind, ScopeKind::Function | ScopeKind::ArrowFunction) {
                return true;
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.len() == 0
    }
}

pub struct AncestorIter<'a> {
    tree: &'a ScopeTree,
    current: Option<ScopeId>,
}

impl<'a> Iterator for AncestorIter<'a> {
    type Item = &'a Scope;

    fn next(&mut self) -> Option<Self::Item> {
        let current_id = self.current?;
        let scope = &self.tree.arena[current_id];
        self.current = scope.parent;
        Some(scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swc_common::{BytePos, DUMMY_SP};

    fn span_at(lo: u32, hi: u32) -> Span {
        Span::new(BytePos(lo), BytePos(hi))
    }

    #[test]
    fn first_scope_becomes_root() {
        let mut tree = ScopeTree::new();
        let global = tree.create_scope(ScopeKind::Global, None, DUMMY_SP);

        assert_eq!(tree.root(), Some(global));
        assert_eq!(tree.get(global).kind, ScopeKind::Global);
        assert!(tree.get(global).parent.is_none());
    }

    #[test]
    fn nested_scopes_have_correct_parent() {
        let mut tree = ScopeTree::new();
        let global = tree.create_scope(ScopeKind::Global, None, span_at(0, 100));
        let func = tree.create_scope(ScopeKind::Function, Some(global), span_at(10, 90));
        let block = tree.create_scope(ScopeKind::Block, Some(func), span_at(20, 80));

        assert_eq!(tree.parent(block).map(|s| s.id), Some(func));
        assert_eq!(tree.parent(func).map(|s| s.id), Some(global));
        assert_eq!(tree.children(global).count(), 1);
    }

    #[test]
    fn ancestors_iterator_traverses_parent_chain() {
        let mut tree = ScopeTree::new();
        let global = tree.create_scope(ScopeKind::Global, None, DUMMY_SP);
        let func = tree.create_scope(ScopeKind::Function, Some(global), DUMMY_SP);
        let block = tree.create_scope(ScopeKind::Block, Some(func), DUMMY_SP);

        let chain: Vec<_> = tree.ancestors(block).map(|s| s.id).collect();
        assert_eq!(chain, vec![block, func, global]);
    }

    #[test]
    fn is_descendant_of_checks_ancestry() {
        let mut tree = ScopeTree::new();
        let global = tree.create_scope(ScopeKind::Global, None, DUMMY_SP);
        let a = tree.create_scope(ScopeKind::Function, Some(global), DUMMY_SP);
        let b = tree.create_scope(ScopeKind::Function, Some(global), DUMMY_SP);

        assert!(tree.is_descendant_of(a, global));
        assert!(tree.is_descendant_of(a, a));
        assert!(!tree.is_descendant_of(a, b));
        assert!(!tree.is_descendant_of(global, a));
    }

    #[test]
    fn var_scope_skips_blocks() {
        let mut tree = ScopeTree::new();
        let global = tree.create_scope(ScopeKind::Global, None, DUMMY_SP);
        let arrow = tree.create_scope(ScopeKind::ArrowFunction, Some(global), DUMMY_SP);
        let block = tree.create_scope(ScopeKind::Block, Some(arrow), DUMMY_SP);
        let switch = tree.create_scope(ScopeKind::Switch, Some(block), DUMMY_SP);

        assert_eq!(tree.var_scope(switch), arrow);
        assert_eq!(tree.var_scope(global), global);
    }

    #[test]
    fn crosses_function_detects_closures() {
        let mut tree = ScopeTree::new();
        let global = tree.create_scope(ScopeKind::Global, None, DUMMY_SP);
        let block = tree.create_scope(ScopeKind::Block, Some(global), DUMMY_SP);
        let func = tree.create_scope(ScopeKind::Function, Some(block), DUMMY_SP);
        let inner = tree.create_scope(ScopeKind::Block, Some(func), DUMMY_SP);

        assert!(!tree.crosses_function(block, global));
        assert!(tree.crosses_function(inner, block));
        assert!(tree.crosses_function(func, global));
    }
}

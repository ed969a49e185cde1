//! Binding table
//!
//! Tracks declared names, their scopes, and every site that reads or writes
//! them. Sites are identified by [`NodeId`], never by pointers into the tree.

use std::collections::{BTreeMap, HashMap};

use id_arena::{Arena, Id};
use swc_common::Span;

use super::node_id::NodeId;
use super::scope::{ScopeId, ScopeTree};

pub type BindingId = Id<Binding>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Var,
    Let,
    Const,
    Function,
    Class,
    /// Positional function parameter. Every name bound by a destructured
    /// parameter shares that parameter's index.
    Param { index: u32, simple: bool },
    CatchParam,
    Import,
    /// Own name of a function or class expression, visible only inside it.
    ExprName,
}

/// What a site does to its binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SiteKind {
    Declaration,
    Read,
    Assignment,
    Update,
    Redeclaration,
    ForHead,
    Pattern,
    Function,
    /// The site sits inside a `with` body and resolves at runtime.
    Dynamic,
}

impl SiteKind {
    pub fn is_write(self) -> bool {
        matches!(
            self,
            SiteKind::Assignment
                | SiteKind::Update
                | SiteKind::Redeclaration
                | SiteKind::ForHead
                | SiteKind::Pattern
                | SiteKind::Function
        )
    }
}

impl std::fmt::Display for SiteKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SiteKind::Declaration => "declaration",
            SiteKind::Read => "reference",
            SiteKind::Assignment => "assignment",
            SiteKind::Update => "update expression",
            SiteKind::Redeclaration => "redeclaration",
            SiteKind::ForHead => "for-loop head",
            SiteKind::Pattern => "destructuring pattern",
            SiteKind::Function => "function redeclaration",
            SiteKind::Dynamic => "dynamically scoped reference",
        };
        f.write_str(name)
    }
}

/// Syntactic form of the identifier at a site, which decides how a rename
/// has to rewrite it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SiteShape {
    Plain,
    /// `{ x }` in an object literal.
    ShorthandProp,
    /// `{ x }` or `{ x = 1 }` in a destructuring pattern.
    ShorthandPattern,
    /// `import { x }` without `as`.
    ImportSpecifier,
    /// `export { x }` without `as`.
    ExportSpecifier,
    /// `<X />`
    JsxName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Site {
    pub node: NodeId,
    pub scope: ScopeId,
    pub kind: SiteKind,
    pub shape: SiteShape,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Binding {
    pub id: BindingId,
    pub name: String,
    pub kind: BindingKind,
    pub scope: ScopeId,
    pub declaration: Site,
    pub references: Vec<Site>,
    pub violations: Vec<Site>,
}

impl Binding {
    /// Declaration, references and violations, in that order.
    pub fn sites(&self) -> impl Iterator<Item = &Site> {
        std::iter::once(&self.declaration)
            .chain(self.references.iter())
            .chain(self.violations.iter())
    }

    pub fn is_constant(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn is_referenced(&self) -> bool {
        !self.references.is_empty()
    }
}

/// A site whose name no binding declares.
#[derive(Debug, Clone)]
pub struct UnresolvedSite {
    pub name: String,
    pub site: Site,
}

#[derive(Default)]
pub struct BindingTable {
    arena: Arena<Binding>,
    by_scope: HashMap<ScopeId, BTreeMap<String, BindingId>>,
    by_node: HashMap<NodeId, BindingId>,
}

impl std::fmt::Debug for BindingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingTable")
            .field("len", &self.arena.len())
            .finish()
    }
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `name` in `scope`. A second declaration of the same name in
    /// the same scope is recorded as a violation of the first.
    pub fn declare(&mut self, name: &str, kind: BindingKind, scope: ScopeId, site: Site) -> BindingId {
        if let Some(&existing) = self.by_scope.get(&scope).and_then(|names| names.get(name)) {
            let violation_kind = if kind == BindingKind::Function {
                SiteKind::Function
            } else {
                SiteKind::Redeclaration
            };
            self.arena[existing].violations.push(Site {
                kind: violation_kind,
                ..site
            });
            self.by_node.insert(site.node, existing);
            return existing;
        }

        let id = self.arena.alloc_with_id(|id| Binding {
            id,
            name: name.to_string(),
            kind,
            scope,
            declaration: site,
            references: Vec::new(),
            violations: Vec::new(),
        });
        self.by_scope
            .entry(scope)
            .or_default()
            .insert(name.to_string(), id);
        self.by_node.insert(site.node, id);
        id
    }

    pub fn get(&self, id: BindingId) -> &Binding {
        &self.arena[id]
    }

    pub fn get_in_scope(&self, scope: ScopeId, name: &str) -> Option<BindingId> {
        self.by_scope.get(&scope)?.get(name).copied()
    }

    pub fn lookup(&self, name: &str, scope: ScopeId, tree: &ScopeTree) -> Option<BindingId> {
        tree.ancestors(scope)
            .find_map(|s| self.get_in_scope(s.id, name))
    }

    /// Attaches a resolved site to its binding.
    pub fn add_site(&mut self, id: BindingId, site: Site) {
        let binding = &mut self.arena[id];
        if site.kind.is_write() {
            binding.violations.push(site);
        } else {
            binding.references.push(site);
        }
        self.by_node.insert(site.node, id);
    }

    pub fn binding_at(&self, node: NodeId) -> Option<BindingId> {
        self.by_node.get(&node).copied()
    }

    pub fn bindings_in_scope(&self, scope: ScopeId) -> impl Iterator<Item = &Binding> {
        self.by_scope
            .get(&scope)
            .into_iter()
            .flat_map(|names| names.values())
            .map(|&id| &self.arena[id])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Binding> {
        self.arena.iter().map(|(_, binding)| binding)
    }

    /// Moves a binding to a new name after a rename.
    pub fn set_name(&mut self, id: BindingId, new_name: &str) {
        let scope = self.arena[id].scope;
        let old = std::mem::replace(&mut self.arena[id].name, new_name.to_string());
        if let Some(names) = self.by_scope.get_mut(&scope) {
            if names.get(&old) == Some(&id) {
                names.remove(&old);
            }
            names.insert(new_name.to_string(), id);
        }
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.len() == 0
    }
}

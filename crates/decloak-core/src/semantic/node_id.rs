//! Stable identities for identifier occurrences
//!
//! A [`NodeId`] is the position of an [`Ident`] in the default
//! `swc_ecma_visit` traversal order. Read-only analyses resolve ids through an
//! [`IdentIndex`]; rewriting passes recover them with an [`IdentCursor`] that
//! advances in `visit_mut_ident`, so both sides agree as long as the tree's
//! shape does not change in between.

use std::collections::HashMap;

use serde::Serialize;
use swc_ecma_ast::{Ident, Module};
use swc_ecma_visit::{Visit, VisitWith};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub u32);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Maps the address of every identifier in a borrowed tree to its ordinal.
#[derive(Debug, Default)]
pub struct IdentIndex {
    by_addr: HashMap<usize, NodeId>,
    len: u32,
}

impl IdentIndex {
    pub fn build(module: &Module) -> Self {
        let mut index = Self::default();
        module.visit_with(&mut index);
        index
    }

    pub fn get(&self, ident: &Ident) -> Option<NodeId> {
        self.by_addr.get(&(ident as *const Ident as usize)).copied()
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Visit for IdentIndex {
    fn visit_ident(&mut self, ident: &Ident) {
        self.by_addr
            .insert(ident as *const Ident as usize, NodeId(self.len));
        self.len += 1;
    }
}

#[derive(Debug, Default)]
pub struct IdentCounter {
    count: u32,
}

impl Visit for IdentCounter {
    fn visit_ident(&mut self, _: &Ident) {
        self.count += 1;
    }
}

/// Number of identifier occurrences inside `node`.
pub fn count_idents<N: VisitWith<IdentCounter> + ?Sized>(node: &N) -> u32 {
    let mut counter = IdentCounter::default();
    node.visit_with(&mut counter);
    counter.count
}

/// Tracks the ordinal of the next identifier a `VisitMut` will reach.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentCursor {
    next: u32,
}

impl IdentCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of the next identifier, without consuming it.
    pub fn peek(&self) -> NodeId {
        NodeId(self.next)
    }

    /// Consumes one identifier and returns its id.
    pub fn advance(&mut self) -> NodeId {
        let id = NodeId(self.next);
        self.next += 1;
        id
    }

    /// Skips a subtree that is not visited.
    pub fn skip(&mut self, count: u32) {
        self.next += count;
    }

    /// Skips `node` entirely.
    pub fn skip_node<N: VisitWith<IdentCounter> + ?Sized>(&mut self, node: &N) {
        self.next += count_idents(node);
    }
}

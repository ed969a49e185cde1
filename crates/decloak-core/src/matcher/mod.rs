//! Declarative AST pattern matching
//!
//! A [`Matcher`] describes the shape of a subtree. Matching is pure: it never
//! touches the tree, and it threads a [`Captures`] environment through the
//! match by value, so a failed alternative cannot leak captures into the next
//! one.
//!
//! ```ignore
//! use decloak_core::matcher::builders::*;
//!
//! // `NAME.push(NAME.shift())`
//! let rotate = call(
//!     member(capture("array", any_ident()), "push"),
//!     exact(vec![call(member(backref("array"), "shift"), exact(vec![]))]),
//! );
//! ```

pub mod builders;
pub mod common;

use swc_common::EqIgnoreSpan;
use swc_ecma_ast::{
    AssignOp, AssignTarget, BinaryOp, BlockStmt, BlockStmtOrExpr, Callee, Decl, Expr,
    ExprOrSpread, Ident, IdentName, Lit, MemberExpr, MemberProp, Pat, Prop, PropName,
    SimpleAssignTarget, Stmt, UnaryOp, UpdateOp, VarDeclKind, VarDeclarator,
};

use crate::helpers::unparen;

/// Borrowed view of a node a matcher can inspect.
#[derive(Debug, Clone, Copy)]
pub enum NodeRef<'a> {
    Expr(&'a Expr),
    Stmt(&'a Stmt),
    Pat(&'a Pat),
    Ident(&'a Ident),
    IdentName(&'a IdentName),
    Member(&'a MemberExpr),
    Prop(&'a Prop),
    PropName(&'a PropName),
    VarDeclarator(&'a VarDeclarator),
    Block(&'a BlockStmt),
    /// A spread call argument or array element.
    Spread(&'a ExprOrSpread),
}

impl<'a> NodeRef<'a> {
    fn unparen(self) -> Self {
        match self {
            NodeRef::Expr(expr) => NodeRef::Expr(unparen(expr)),
            other => other,
        }
    }

    fn as_expr(self) -> Option<&'a Expr> {
        match self {
            NodeRef::Expr(expr) => Some(expr),
            _ => None,
        }
    }

    fn as_stmt(self) -> Option<&'a Stmt> {
        match self {
            NodeRef::Stmt(stmt) => Some(stmt),
            _ => None,
        }
    }

    /// The name of an identifier-like node.
    pub fn ident_name(self) -> Option<&'a str> {
        match self {
            NodeRef::Expr(Expr::Ident(ident)) | NodeRef::Ident(ident) => Some(&*ident.sym),
            NodeRef::Pat(Pat::Ident(binding)) => Some(&*binding.id.sym),
            NodeRef::IdentName(name) => Some(&*name.sym),
            NodeRef::PropName(PropName::Ident(name)) => Some(&*name.sym),
            _ => None,
        }
    }

    fn str_value(self) -> Option<&'a str> {
        match self {
            NodeRef::Expr(Expr::Lit(Lit::Str(s))) | NodeRef::PropName(PropName::Str(s)) => {
                Some(&*s.value)
            }
            _ => None,
        }
    }

    fn num_value(self) -> Option<f64> {
        match self {
            NodeRef::Expr(Expr::Lit(Lit::Num(n))) | NodeRef::PropName(PropName::Num(n)) => {
                Some(n.value)
            }
            _ => None,
        }
    }

    fn as_member(self) -> Option<&'a MemberExpr> {
        match self {
            NodeRef::Expr(Expr::Member(member)) | NodeRef::Member(member) => Some(member),
            _ => None,
        }
    }

    /// Structural equality, ignoring spans. Identifiers compare by name
    /// whatever position they occupy.
    pub fn structurally_eq(self, other: NodeRef<'_>) -> bool {
        if let (Some(a), Some(b)) = (self.ident_name(), other.ident_name()) {
            return a == b;
        }
        match (self.unparen(), other.unparen()) {
            (NodeRef::Expr(a), NodeRef::Expr(b)) => a.eq_ignore_span(b),
            (NodeRef::Stmt(a), NodeRef::Stmt(b)) => a.eq_ignore_span(b),
            (NodeRef::Pat(a), NodeRef::Pat(b)) => a.eq_ignore_span(b),
            (NodeRef::Prop(a), NodeRef::Prop(b)) => a.eq_ignore_span(b),
            (NodeRef::PropName(a), NodeRef::PropName(b)) => a.eq_ignore_span(b),
            (NodeRef::VarDeclarator(a), NodeRef::VarDeclarator(b)) => a.eq_ignore_span(b),
            (NodeRef::Block(a), NodeRef::Block(b)) => a.eq_ignore_span(b),
            (NodeRef::Spread(a), NodeRef::Spread(b)) => a.eq_ignore_span(b),
            (a, b) => match (a.as_member(), b.as_member()) {
                (Some(a), Some(b)) => a.eq_ignore_span(b),
                _ => false,
            },
        }
    }
}

impl<'a> From<&'a Expr> for NodeRef<'a> {
    fn from(expr: &'a Expr) -> Self {
        NodeRef::Expr(expr)
    }
}

impl<'a> From<&'a Stmt> for NodeRef<'a> {
    fn from(stmt: &'a Stmt) -> Self {
        NodeRef::Stmt(stmt)
    }
}

impl<'a> From<&'a Pat> for NodeRef<'a> {
    fn from(pat: &'a Pat) -> Self {
        NodeRef::Pat(pat)
    }
}

impl<'a> From<&'a ExprOrSpread> for NodeRef<'a> {
    fn from(arg: &'a ExprOrSpread) -> Self {
        match arg.spread {
            Some(_) => NodeRef::Spread(arg),
            None => NodeRef::Expr(&arg.expr),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Captured<'a> {
    Node(NodeRef<'a>),
    List(Vec<NodeRef<'a>>),
}

/// Named sub-matches recorded while matching.
#[derive(Debug, Clone, Default)]
pub struct Captures<'a> {
    entries: Vec<(&'static str, Captured<'a>)>,
}

impl<'a> Captures<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, name: &'static str, value: Captured<'a>) {
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Captured<'a>> {
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, value)| value)
    }

    pub fn node(&self, name: &str) -> Option<NodeRef<'a>> {
        match self.get(name)? {
            Captured::Node(node) => Some(*node),
            Captured::List(_) => None,
        }
    }

    pub fn list(&self, name: &str) -> Option<&[NodeRef<'a>]> {
        match self.get(name)? {
            Captured::List(items) => Some(items),
            Captured::Node(_) => None,
        }
    }

    pub fn expr(&self, name: &str) -> Option<&'a Expr> {
        self.node(name)?.as_expr()
    }

    pub fn stmt(&self, name: &str) -> Option<&'a Stmt> {
        self.node(name)?.as_stmt()
    }

    pub fn ident(&self, name: &str) -> Option<&'a str> {
        self.node(name)?.ident_name()
    }

    pub fn string(&self, name: &str) -> Option<&'a str> {
        self.node(name)?.str_value()
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.node(name)?.num_value()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone)]
pub enum Matcher {
    Any,
    AnyOf(Vec<Matcher>),
    AllOf(Vec<Matcher>),
    Not(Box<Matcher>),
    Capture(&'static str, Box<Matcher>),
    Backref(&'static str),
    Predicate(fn(NodeRef<'_>) -> bool),

    /// Identifier, binding, property or member name.
    Ident(Option<String>),
    Str(Option<String>),
    Num(Option<f64>),
    Bool(Option<bool>),
    Null,
    This,
    Unary(Option<UnaryOp>, Box<Matcher>),
    Binary(Option<BinaryOp>, Box<Matcher>, Box<Matcher>),
    Assign(Option<AssignOp>, Box<Matcher>, Box<Matcher>),
    Update(Option<UpdateOp>, Box<Matcher>),
    Call(Box<Matcher>, ListMatcher),
    New(Box<Matcher>, ListMatcher),
    /// `computed: None` accepts both `a.b` and `a[b]`.
    Member {
        obj: Box<Matcher>,
        prop: Box<Matcher>,
        computed: Option<bool>,
    },
    Seq(ListMatcher),
    Cond(Box<Matcher>, Box<Matcher>, Box<Matcher>),
    Array(ListMatcher),
    Object(ListMatcher),
    KeyValue(Box<Matcher>, Box<Matcher>),
    /// Function expression, declaration, or arrow with a block body.
    Function {
        params: ListMatcher,
        body: ListMatcher,
    },

    ExprStmt(Box<Matcher>),
    /// `None` requires a bare `return;`.
    Return(Option<Box<Matcher>>),
    VarDecl {
        kind: Option<VarDeclKind>,
        decls: ListMatcher,
    },
    /// `init: None` requires a declarator without initializer.
    Declarator {
        name: Box<Matcher>,
        init: Option<Box<Matcher>>,
    },
    If {
        test: Box<Matcher>,
        cons: Box<Matcher>,
        alt: Option<Box<Matcher>>,
    },
    Block(ListMatcher),
    While(Box<Matcher>, Box<Matcher>),
    Break,
    Continue,
    Empty,
}

impl Matcher {
    /// Matches `node` against `self`, starting from `caps`. Returns the
    /// extended environment on success.
    pub fn matches<'a>(&self, node: NodeRef<'a>, caps: Captures<'a>) -> Option<Captures<'a>> {
        let node = node.unparen();
        match self {
            Matcher::Any => Some(caps),
            Matcher::AnyOf(alternatives) => alternatives
                .iter()
                .find_map(|alt| alt.matches(node, caps.clone())),
            Matcher::AllOf(all) => all.iter().try_fold(caps, |caps, m| m.matches(node, caps)),
            Matcher::Not(inner) => match inner.matches(node, caps.clone()) {
                Some(_) => None,
                None => Some(caps),
            },
            Matcher::Capture(name, inner) => {
                let mut caps = inner.matches(node, caps)?;
                caps.insert(*name, Captured::Node(node));
                Some(caps)
            }
            Matcher::Backref(name) => {
                let previous = caps.node(name)?;
                node.structurally_eq(previous).then_some(caps)
            }
            Matcher::Predicate(predicate) => predicate(node).then_some(caps),

            Matcher::Ident(expected) => {
                let name = node.ident_name()?;
                expected
                    .as_deref()
                    .is_none_or(|want| want == name)
                    .then_some(caps)
            }
            Matcher::Str(expected) => {
                let value = node.str_value()?;
                expected
                    .as_deref()
                    .is_none_or(|want| want == value)
                    .then_some(caps)
            }
            Matcher::Num(expected) => {
                let value = node.num_value()?;
                expected.is_none_or(|want| want == value).then_some(caps)
            }
            Matcher::Bool(expected) => match node.as_expr()? {
                Expr::Lit(Lit::Bool(b)) => expected.is_none_or(|want| want == b.value).then_some(caps),
                _ => None,
            },
            Matcher::Null => matches!(node.as_expr()?, Expr::Lit(Lit::Null(_))).then_some(caps),
            Matcher::This => matches!(node.as_expr()?, Expr::This(_)).then_some(caps),
            Matcher::Unary(op, arg) => match node.as_expr()? {
                Expr::Unary(unary) if op.is_none_or(|op| op == unary.op) => {
                    arg.matches(NodeRef::Expr(&unary.arg), caps)
                }
                _ => None,
            },
            Matcher::Binary(op, left, right) => match node.as_expr()? {
                Expr::Bin(bin) if op.is_none_or(|op| op == bin.op) => {
                    let caps = left.matches(NodeRef::Expr(&bin.left), caps)?;
                    right.matches(NodeRef::Expr(&bin.right), caps)
                }
                _ => None,
            },
            Matcher::Assign(op, left, right) => match node.as_expr()? {
                Expr::Assign(assign) if op.is_none_or(|op| op == assign.op) => {
                    let caps = match assign_target_ref(&assign.left) {
                        Some(target) => left.matches(target, caps)?,
                        None if matches!(**left, Matcher::Any) => caps,
                        None => return None,
                    };
                    right.matches(NodeRef::Expr(&assign.right), caps)
                }
                _ => None,
            },
            Matcher::Update(op, arg) => match node.as_expr()? {
                Expr::Update(update) if op.is_none_or(|op| op == update.op) => {
                    arg.matches(NodeRef::Expr(&update.arg), caps)
                }
                _ => None,
            },
            Matcher::Call(callee, args) => match node.as_expr()? {
                Expr::Call(call) => {
                    let Callee::Expr(callee_expr) = &call.callee else {
                        return None;
                    };
                    let caps = callee.matches(NodeRef::Expr(callee_expr), caps)?;
                    let items: Vec<NodeRef<'a>> = call.args.iter().map(NodeRef::from).collect();
                    args.matches(&items, caps)
                }
                _ => None,
            },
            Matcher::New(callee, args) => match node.as_expr()? {
                Expr::New(new) => {
                    let caps = callee.matches(NodeRef::Expr(&new.callee), caps)?;
                    let items: Vec<NodeRef<'a>> = new
                        .args
                        .iter()
                        .flatten()
                        .map(NodeRef::from)
                        .collect();
                    args.matches(&items, caps)
                }
                _ => None,
            },
            Matcher::Member {
                obj,
                prop,
                computed,
            } => {
                let member = node.as_member()?;
                let (prop_ref, is_computed) = match &member.prop {
                    MemberProp::Ident(name) => (NodeRef::IdentName(name), false),
                    MemberProp::Computed(c) => (NodeRef::Expr(&c.expr), true),
                    MemberProp::PrivateName(_) => return None,
                };
                if computed.is_some_and(|want| want != is_computed) {
                    return None;
                }
                let caps = obj.matches(NodeRef::Expr(&member.obj), caps)?;
                prop.matches(prop_ref, caps)
            }
            Matcher::Seq(list) => match node.as_expr()? {
                Expr::Seq(seq) => {
                    let items: Vec<NodeRef<'a>> =
                        seq.exprs.iter().map(|e| NodeRef::Expr(e)).collect();
                    list.matches(&items, caps)
                }
                _ => None,
            },
            Matcher::Cond(test, cons, alt) => match node.as_expr()? {
                Expr::Cond(cond) => {
                    let caps = test.matches(NodeRef::Expr(&cond.test), caps)?;
                    let caps = cons.matches(NodeRef::Expr(&cond.cons), caps)?;
                    alt.matches(NodeRef::Expr(&cond.alt), caps)
                }
                _ => None,
            },
            Matcher::Array(list) => match node.as_expr()? {
                Expr::Array(array) => {
                    let mut items = Vec::with_capacity(array.elems.len());
                    for elem in &array.elems {
                        // Holes only match an unconstrained list.
                        match elem {
                            Some(elem) => items.push(NodeRef::from(elem)),
                            None if matches!(list, ListMatcher::Any) => {}
                            None => return None,
                        }
                    }
                    list.matches(&items, caps)
                }
                _ => None,
            },
            Matcher::Object(list) => match node.as_expr()? {
                Expr::Object(object) => {
                    let mut items = Vec::with_capacity(object.props.len());
                    for prop in &object.props {
                        match prop.as_prop() {
                            Some(prop) => items.push(NodeRef::Prop(prop)),
                            None if matches!(list, ListMatcher::Any) => {}
                            None => return None,
                        }
                    }
                    list.matches(&items, caps)
                }
                _ => None,
            },
            Matcher::KeyValue(key, value) => match node {
                NodeRef::Prop(Prop::KeyValue(kv)) => {
                    let caps = key.matches(NodeRef::PropName(&kv.key), caps)?;
                    value.matches(NodeRef::Expr(&kv.value), caps)
                }
                _ => None,
            },
            Matcher::Function { params, body } => {
                let (param_refs, stmts): (Vec<NodeRef<'a>>, &'a [Stmt]) = match node {
                    NodeRef::Expr(Expr::Fn(f)) => (
                        f.function.params.iter().map(|p| NodeRef::Pat(&p.pat)).collect(),
                        f.function.body.as_ref().map(|b| b.stmts.as_slice())?,
                    ),
                    NodeRef::Stmt(Stmt::Decl(Decl::Fn(f))) => (
                        f.function.params.iter().map(|p| NodeRef::Pat(&p.pat)).collect(),
                        f.function.body.as_ref().map(|b| b.stmts.as_slice())?,
                    ),
                    NodeRef::Expr(Expr::Arrow(arrow)) => match &*arrow.body {
                        BlockStmtOrExpr::BlockStmt(block) => (
                            arrow.params.iter().map(NodeRef::Pat).collect(),
                            block.stmts.as_slice(),
                        ),
                        BlockStmtOrExpr::Expr(_) => return None,
                    },
                    _ => return None,
                };
                let caps = params.matches(&param_refs, caps)?;
                let stmt_refs: Vec<NodeRef<'a>> = stmts.iter().map(NodeRef::Stmt).collect();
                body.matches(&stmt_refs, caps)
            }

            Matcher::ExprStmt(inner) => match node.as_stmt()? {
                Stmt::Expr(stmt) => inner.matches(NodeRef::Expr(&stmt.expr), caps),
                _ => None,
            },
            Matcher::Return(arg) => match (node.as_stmt()?, arg) {
                (Stmt::Return(ret), None) => ret.arg.is_none().then_some(caps),
                (Stmt::Return(ret), Some(arg)) => arg.matches(NodeRef::Expr(ret.arg.as_deref()?), caps),
                _ => None,
            },
            Matcher::VarDecl { kind, decls } => match node.as_stmt()? {
                Stmt::Decl(Decl::Var(var)) if kind.is_none_or(|kind| kind == var.kind) => {
                    let items: Vec<NodeRef<'a>> =
                        var.decls.iter().map(NodeRef::VarDeclarator).collect();
                    decls.matches(&items, caps)
                }
                _ => None,
            },
            Matcher::Declarator { name, init } => match node {
                NodeRef::VarDeclarator(declarator) => {
                    let caps = name.matches(NodeRef::Pat(&declarator.name), caps)?;
                    match (init, &declarator.init) {
                        (None, None) => Some(caps),
                        (Some(init), Some(value)) => init.matches(NodeRef::Expr(value), caps),
                        _ => None,
                    }
                }
                _ => None,
            },
            Matcher::If { test, cons, alt } => match node.as_stmt()? {
                Stmt::If(stmt) => {
                    let caps = test.matches(NodeRef::Expr(&stmt.test), caps)?;
                    let caps = cons.matches(NodeRef::Stmt(&stmt.cons), caps)?;
                    match (alt, &stmt.alt) {
                        (None, None) => Some(caps),
                        (Some(alt), Some(stmt)) => alt.matches(NodeRef::Stmt(stmt), caps),
                        _ => None,
                    }
                }
                _ => None,
            },
            Matcher::Block(list) => {
                let block = match node {
                    NodeRef::Stmt(Stmt::Block(block)) | NodeRef::Block(block) => block,
                    _ => return None,
                };
                let items: Vec<NodeRef<'a>> = block.stmts.iter().map(NodeRef::Stmt).collect();
                list.matches(&items, caps)
            }
            Matcher::While(test, body) => match node.as_stmt()? {
                Stmt::While(stmt) => {
                    let caps = test.matches(NodeRef::Expr(&stmt.test), caps)?;
                    body.matches(NodeRef::Stmt(&stmt.body), caps)
                }
                _ => None,
            },
            Matcher::Break => matches!(node.as_stmt()?, Stmt::Break(b) if b.label.is_none()).then_some(caps),
            Matcher::Continue => {
                matches!(node.as_stmt()?, Stmt::Continue(c) if c.label.is_none()).then_some(caps)
            }
            Matcher::Empty => matches!(node.as_stmt()?, Stmt::Empty(_)).then_some(caps),
        }
    }

    /// Matches from an empty environment.
    pub fn find<'a>(&self, node: impl Into<NodeRef<'a>>) -> Option<Captures<'a>> {
        self.matches(node.into(), Captures::new())
    }

    pub fn is_match<'a>(&self, node: impl Into<NodeRef<'a>>) -> bool {
        self.find(node).is_some()
    }
}

fn assign_target_ref(target: &AssignTarget) -> Option<NodeRef<'_>> {
    match target {
        AssignTarget::Simple(SimpleAssignTarget::Ident(binding)) => Some(NodeRef::Ident(&binding.id)),
        AssignTarget::Simple(SimpleAssignTarget::Member(member)) => Some(NodeRef::Member(member)),
        AssignTarget::Simple(SimpleAssignTarget::Paren(paren)) => Some(NodeRef::Expr(&paren.expr)),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub enum ListItem {
    One(Matcher),
    ZeroOrMore(Matcher),
}

/// Matches a list of sibling nodes: call arguments, statements, elements.
#[derive(Debug, Clone)]
pub enum ListMatcher {
    Any,
    Exact(Vec<Matcher>),
    Seq(Vec<ListItem>),
    Capture(&'static str, Box<ListMatcher>),
}

impl ListMatcher {
    pub fn matches<'a>(&self, items: &[NodeRef<'a>], caps: Captures<'a>) -> Option<Captures<'a>> {
        match self {
            ListMatcher::Any => Some(caps),
            ListMatcher::Exact(matchers) => {
                if matchers.len() != items.len() {
                    return None;
                }
                matchers
                    .iter()
                    .zip(items)
                    .try_fold(caps, |caps, (m, &item)| m.matches(item, caps))
            }
            ListMatcher::Seq(pattern) => match_seq(pattern, items, caps),
            ListMatcher::Capture(name, inner) => {
                let mut caps = inner.matches(items, caps)?;
                caps.insert(*name, Captured::List(items.to_vec()));
                Some(caps)
            }
        }
    }
}

/// `ZeroOrMore` is greedy and backtracks into shorter runs when the rest of
/// the pattern fails.
fn match_seq<'a>(pattern: &[ListItem], items: &[NodeRef<'a>], caps: Captures<'a>) -> Option<Captures<'a>> {
    let Some((head, rest)) = pattern.split_first() else {
        return items.is_empty().then_some(caps);
    };
    match head {
        ListItem::One(m) => {
            let (first, tail) = items.split_first()?;
            let caps = m.matches(*first, caps)?;
            match_seq(rest, tail, caps)
        }
        ListItem::ZeroOrMore(m) => {
            let mut runs = vec![caps.clone()];
            let mut current = caps;
            for &item in items {
                match m.matches(item, current.clone()) {
                    Some(next) => {
                        current = next;
                        runs.push(current.clone());
                    }
                    None => break,
                }
            }
            runs.into_iter()
                .enumerate()
                .rev()
                .find_map(|(taken, caps)| match_seq(rest, &items[taken..], caps))
        }
    }
}

//! control-flow-object: inlines dispatch tables.
//!
//! ```js
//! const t = { abc: function (a, b) { return a + b; }, def: "log" };
//! console[t.def](t.abc(1, 2));
//! // becomes
//! console["log"]((1 + 2));
//! ```

use std::collections::{HashMap, HashSet};

use swc_common::DUMMY_SP;
use swc_ecma_ast::{
    AssignExpr, AssignTarget, BlockStmtOrExpr, CallExpr, Callee, Expr, Ident, Lit, MemberExpr,
    Module, ParenExpr, Prop, PropOrSpread, SimpleAssignTarget, Stmt, UnaryExpr, UnaryOp,
    UpdateExpr, VarDeclarator,
};
use swc_ecma_visit::{Visit, VisitMut, VisitMutWith, VisitWith};
use tracing::debug;

use crate::declare_transform;
use crate::factory;
use crate::helpers::{binding_ident_name, member_prop_key, prop_name_key, unparen};
use crate::rewrite::{self, Rewrite};
use crate::semantic::{BindingId, BindingKey, BindingKind, IdentIndex, NodeId, ScopeGraph};
use crate::transforms::{Transform, TransformContext, TransformError, TransformMetadata};

declare_transform!(
    ControlFlowObject,
    name = "control-flow-object",
    description = "Inline control flow dispatch objects",
    group = Deobfuscate,
    tags = [Unsafe]
);

#[derive(Debug, Clone)]
enum Entry {
    Literal(Expr),
    /// `function (params) { return body; }`
    Function { params: Vec<String>, body: Expr },
}

type Table = HashMap<String, Entry>;

/// Identifiers in `expr`, counted by name.
fn identifier_counts(expr: &Expr) -> HashMap<String, usize> {
    struct Counter(HashMap<String, usize>, bool);
    impl Visit for Counter {
        fn visit_ident(&mut self, ident: &Ident) {
            *self.0.entry(ident.sym.to_string()).or_default() += 1;
        }
        fn visit_function(&mut self, _: &swc_ecma_ast::Function) {
            self.1 = true;
        }
        fn visit_arrow_expr(&mut self, _: &swc_ecma_ast::ArrowExpr) {
            self.1 = true;
        }
    }
    let mut counter = Counter(HashMap::new(), false);
    expr.visit_with(&mut counter);
    if counter.1 {
        // Nested functions could shadow parameters; treat as unusable.
        counter.0.insert(String::new(), usize::MAX);
    }
    counter.0
}

fn function_entry(params: Vec<String>, body: &Expr) -> Option<Entry> {
    let counts = identifier_counts(body);
    let closed = counts.keys().all(|name| params.contains(name));
    closed.then(|| Entry::Function {
        params,
        body: body.clone(),
    })
}

fn entry(value: &Expr) -> Option<Entry> {
    match unparen(value) {
        lit @ Expr::Lit(Lit::Str(_) | Lit::Num(_)) => Some(Entry::Literal(lit.clone())),
        Expr::Fn(f) => {
            let params = f
                .function
                .params
                .iter()
                .map(|p| binding_ident_name(&p.pat).map(|i| i.sym.to_string()))
                .collect::<Option<Vec<_>>>()?;
            let [Stmt::Return(ret)] = f.function.body.as_ref()?.stmts.as_slice() else {
                return None;
            };
            function_entry(params, ret.arg.as_deref()?)
        }
        Expr::Arrow(arrow) => {
            let params = arrow
                .params
                .iter()
                .map(|p| binding_ident_name(p).map(|i| i.sym.to_string()))
                .collect::<Option<Vec<_>>>()?;
            match &*arrow.body {
                BlockStmtOrExpr::Expr(body) => function_entry(params, body),
                BlockStmtOrExpr::BlockStmt(block) => match block.stmts.as_slice() {
                    [Stmt::Return(ret)] => function_entry(params, ret.arg.as_deref()?),
                    _ => None,
                },
            }
        }
        _ => None,
    }
}

fn table(init: &Expr) -> Option<Table> {
    let Expr::Object(object) = unparen(init) else {
        return None;
    };
    if object.props.is_empty() {
        return None;
    }
    object
        .props
        .iter()
        .map(|prop| match prop {
            PropOrSpread::Prop(prop) => match &**prop {
                Prop::KeyValue(kv) => Some((prop_name_key(&kv.key)?, entry(&kv.value)?)),
                _ => None,
            },
            PropOrSpread::Spread(_) => None,
        })
        .collect()
}

struct Tables<'g> {
    graph: &'g ScopeGraph,
    index: &'g IdentIndex,
    tables: HashMap<BindingId, Table>,
}

impl Visit for Tables<'_> {
    fn visit_var_declarator(&mut self, declarator: &VarDeclarator) {
        declarator.visit_children_with(self);
        let (Some(name), Some(init)) = (binding_ident_name(&declarator.name), &declarator.init) else {
            return;
        };
        let Some(binding) = self.index.get(name).and_then(|node| self.graph.binding_at(node)) else {
            return;
        };
        let info = self.graph.binding(binding);
        let declared = matches!(info.kind, BindingKind::Var | BindingKind::Let | BindingKind::Const);
        if !declared || !info.is_constant() {
            return;
        }
        if let Some(table) = table(init) {
            self.tables.insert(binding, table);
        }
    }
}

/// How each table reference is used.
struct Uses<'g> {
    graph: &'g ScopeGraph,
    index: &'g IdentIndex,
    tables: &'g HashMap<BindingId, Table>,
    /// Reference node -> (table, key, call arguments when called).
    reads: HashMap<NodeId, (BindingId, String, Option<Vec<Expr>>)>,
    /// Tables that are written through, passed around or read with an
    /// unknown key.
    rejected: HashSet<BindingId>,
}

impl Uses<'_> {
    fn table_of(&self, expr: &Expr) -> Option<(NodeId, BindingId)> {
        let Expr::Ident(ident) = unparen(expr) else {
            return None;
        };
        let node = self.index.get(ident)?;
        let binding = self.graph.binding_at(node)?;
        self.tables.contains_key(&binding).then_some((node, binding))
    }

    fn reject_member(&mut self, member: &MemberExpr) {
        if let Some((_, binding)) = self.table_of(&member.obj) {
            self.rejected.insert(binding);
        }
    }

    fn record(&mut self, member: &MemberExpr, args: Option<Vec<Expr>>) {
        let Some((node, binding)) = self.table_of(&member.obj) else {
            return;
        };
        match member_prop_key(&member.prop) {
            Some(key) if self.tables[&binding].contains_key(&key) => {
                self.reads.insert(node, (binding, key, args));
            }
            _ => {
                self.rejected.insert(binding);
            }
        }
    }
}

impl Visit for Uses<'_> {
    fn visit_assign_expr(&mut self, assign: &AssignExpr) {
        if let AssignTarget::Simple(SimpleAssignTarget::Member(member)) = &assign.left {
            self.reject_member(member);
        }
        assign.visit_children_with(self);
    }

    fn visit_update_expr(&mut self, update: &UpdateExpr) {
        if let Expr::Member(member) = unparen(&update.arg) {
            self.reject_member(member);
        }
        update.visit_children_with(self);
    }

    fn visit_unary_expr(&mut self, unary: &UnaryExpr) {
        if unary.op == UnaryOp::Delete {
            if let Expr::Member(member) = unparen(&unary.arg) {
                self.reject_member(member);
            }
        }
        unary.visit_children_with(self);
    }

    fn visit_call_expr(&mut self, call: &CallExpr) {
        if let Callee::Expr(callee) = &call.callee {
            if let Expr::Member(member) = unparen(callee) {
                let spread = call.args.iter().any(|arg| arg.spread.is_some());
                if spread {
                    self.reject_member(member);
                } else {
                    let args = call.args.iter().map(|arg| (*arg.expr).clone()).collect();
                    self.record(member, Some(args));
                }
                // The callee itself is handled; only visit what is inside it.
                if self.table_of(&member.obj).is_none() {
                    member.obj.visit_with(self);
                }
                member.prop.visit_with(self);
                call.args.visit_with(self);
                return;
            }
        }
        call.visit_children_with(self);
    }

    fn visit_member_expr(&mut self, member: &MemberExpr) {
        self.record(member, None);
        member.visit_children_with(self);
    }
}

fn needs_parens(expr: &Expr) -> bool {
    !matches!(
        expr,
        Expr::Lit(_)
            | Expr::Ident(_)
            | Expr::Call(_)
            | Expr::Member(_)
            | Expr::Paren(_)
            | Expr::Array(_)
            | Expr::This(_)
    )
}

fn paren(expr: Expr) -> Expr {
    if needs_parens(&expr) {
        Expr::Paren(ParenExpr {
            span: DUMMY_SP,
            expr: Box::new(expr),
        })
    } else {
        expr
    }
}

struct Substitute<'a>(&'a HashMap<&'a str, Expr>);

impl VisitMut for Substitute<'_> {
    fn visit_mut_expr(&mut self, expr: &mut Expr) {
        if let Expr::Ident(ident) = expr {
            if let Some(value) = self.0.get(&*ident.sym) {
                *expr = paren(value.clone());
                return;
            }
        }
        expr.visit_mut_children_with(self);
    }
}

fn is_duplicable(expr: &Expr) -> bool {
    matches!(unparen(expr), Expr::Lit(_) | Expr::Ident(_))
}

/// The expression a call to a function entry evaluates to.
fn inline_call(params: &[String], body: &Expr, args: &[Expr]) -> Option<Expr> {
    let counts = identifier_counts(body);
    let undefined = factory::undefined();
    let mut bindings = HashMap::new();
    for (i, param) in params.iter().enumerate() {
        let value = args.get(i).unwrap_or(&undefined);
        // An argument is evaluated exactly once, or it has no side effects.
        if counts.get(param).copied().unwrap_or(0) != 1 && !is_duplicable(value) {
            return None;
        }
        bindings.insert(param.as_str(), value.clone());
    }
    // Extra arguments are still evaluated.
    if args.len() > params.len() && !args[params.len()..].iter().all(is_duplicable) {
        return None;
    }
    let mut inlined = body.clone();
    inlined.visit_mut_with(&mut Substitute(&bindings));
    Some(paren(inlined))
}

impl Transform for ControlFlowObject {
    fn metadata(&self) -> &TransformMetadata {
        &self.metadata
    }

    fn run(&self, module: &mut Module, _ctx: &mut TransformContext) -> Result<usize, TransformError> {
        let graph = ScopeGraph::build(module);
        let index = IdentIndex::build(module);
        let mut tables = Tables {
            graph: &graph,
            index: &index,
            tables: HashMap::new(),
        };
        module.visit_with(&mut tables);
        let tables = tables.tables;
        if tables.is_empty() {
            return Ok(0);
        }

        let mut uses = Uses {
            graph: &graph,
            index: &index,
            tables: &tables,
            reads: HashMap::new(),
            rejected: HashSet::new(),
        };
        module.visit_with(&mut uses);
        let Uses { reads, mut rejected, .. } = uses;

        // Every reference has to be one of the recognized reads.
        for &binding in tables.keys() {
            let all_read = graph
                .binding(binding)
                .references
                .iter()
                .all(|site| reads.contains_key(&site.node));
            if !all_read {
                rejected.insert(binding);
            }
        }

        let mut rewrites = HashMap::new();
        for (node, (binding, key, args)) in &reads {
            if rejected.contains(binding) {
                continue;
            }
            let rewrite = match (&tables[binding][key], args) {
                (Entry::Literal(lit), None) => Rewrite::Member(lit.clone()),
                (Entry::Function { params, body }, Some(args)) => match inline_call(params, body, args) {
                    Some(expr) => Rewrite::Call(expr),
                    None => continue,
                },
                (Entry::Literal(_), Some(_)) => continue,
                (Entry::Function { .. }, None) => continue,
            };
            rewrites.insert(*node, rewrite);
        }
        let keys: Vec<BindingKey> = tables
            .keys()
            .filter(|binding| !rejected.contains(binding))
            .map(|&binding| graph.key(binding))
            .collect();
        let mut changes = rewrite::apply(module, rewrites);
        debug!(changes, tables = tables.len(), "inlined dispatch table entries");

        let graph = ScopeGraph::build(module);
        let unused: HashMap<NodeId, Rewrite> = keys
            .iter()
            .filter_map(|key| graph.resolve_key(key))
            .map(|id| graph.binding(id))
            .filter(|binding| !binding.is_referenced())
            .map(|binding| (binding.declaration.node, Rewrite::RemoveDeclaration))
            .collect();
        changes += rewrite::apply(module, unused);
        Ok(changes)
    }
}

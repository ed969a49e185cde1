//! control-flow-switch: undoes switch dispatch flattening.
//!
//! Two shapes are recognized. The sequence form drives the switch from a
//! split string:
//!
//! ```js
//! var order = "1|0|2".split("|"), i = 0;
//! while (true) {
//!     switch (order[i++]) {
//!         case "0": b(); continue;
//!         case "1": a(); continue;
//!         case "2": c(); continue;
//!     }
//!     break;
//! }
//! ```
//!
//! The state machine form assigns the next state at the end of every case:
//!
//! ```js
//! var s = 0;
//! while (s !== 3) {
//!     switch (s) {
//!         case 0: a(); s = 2; continue;
//!         case 2: b(); s = 3; continue;
//!     }
//! }
//! ```
//!
//! Both become the case bodies in execution order. A loop is only flattened
//! when the whole trace is known.

use std::collections::{HashMap, HashSet};

use swc_common::{DUMMY_SP, SyntaxContext};
use swc_ecma_ast::{
    AssignOp, AssignTarget, BinaryOp, BlockStmt, Decl, Expr, Function, Ident, MemberProp, Module,
    ModuleItem, SimpleAssignTarget, Stmt, SwitchCase, UpdateOp, VarDeclKind,
};
use swc_ecma_visit::{Visit, VisitMut, VisitMutWith, VisitWith};
use tracing::debug;

use super::eval::{JsValue, evaluate};
use crate::declare_transform;
use crate::helpers::{StmtLike, binding_ident_name, unparen};
use crate::matcher::builders::{any_string, call, capture, exact, member};
use crate::matcher::common::is_true_like;
use crate::transforms::{Transform, TransformContext, TransformError, TransformMetadata};

declare_transform!(
    ControlFlowSwitch,
    name = "control-flow-switch",
    description = "Flatten switch based control flow dispatch",
    group = Deobfuscate,
    tags = [Unsafe]
);

impl Transform for ControlFlowSwitch {
    fn metadata(&self) -> &TransformMetadata {
        &self.metadata
    }

    fn run(&self, module: &mut Module, _ctx: &mut TransformContext) -> Result<usize, TransformError> {
        let mut flattener = Flattener {
            counts: Vec::new(),
            changes: 0,
        };
        module.visit_mut_with(&mut flattener);
        Ok(flattener.changes)
    }
}

fn name_counts<N: VisitWith<NameCounter>>(node: &N) -> HashMap<String, usize> {
    let mut counter = NameCounter(HashMap::new());
    node.visit_with(&mut counter);
    counter.0
}

struct NameCounter(HashMap<String, usize>);

impl Visit for NameCounter {
    fn visit_ident(&mut self, ident: &Ident) {
        *self.0.entry(ident.sym.to_string()).or_default() += 1;
    }
}

/// Identifier counts of every enclosing function, innermost last. The
/// dispatch variables are function scoped, so a count over the function
/// body sees every use of them.
struct Flattener {
    counts: Vec<HashMap<String, usize>>,
    changes: usize,
}

impl Flattener {
    fn count(&self, name: &str) -> usize {
        self.counts
            .last()
            .and_then(|counts| counts.get(name))
            .copied()
            .unwrap_or(0)
    }

    fn flatten<T: StmtLike>(&mut self, items: &mut Vec<T>) {
        let mut k = 0;
        while k < items.len() {
            let plan = items[k]
                .as_stmt()
                .and_then(|stmt| self.plan(stmt, &items[..k]));
            let Some(plan) = plan else {
                k += 1;
                continue;
            };
            debug!(cases = plan.traced, "flattened switch dispatch");
            let removed = remove_declarators(items, k, &plan.declared);
            k -= removed;
            let replacement: Vec<T> = plan.stmts.into_iter().map(T::from_stmt).collect();
            let len = replacement.len();
            items.splice(k..=k, replacement);
            k += len;
            self.changes += 1;
        }
    }

    fn plan<T: StmtLike>(&self, stmt: &Stmt, preceding: &[T]) -> Option<Plan> {
        let dispatch = Dispatch::parse(stmt)?;
        let cases = dispatch
            .switch_cases
            .iter()
            .map(|case| Case::parse(case, dispatch.state()))
            .collect::<Option<Vec<_>>>()?;
        if cases.iter().any(|case| has_stray_jump(&case.body)) {
            return None;
        }
        let declarations: Vec<&Stmt> = preceding.iter().filter_map(T::as_stmt).collect();

        match &dispatch.driver {
            Driver::Sequence { array, index } => {
                // Declaration and the lookup.
                if self.count(array) != 2 || self.count(index) != 2 || !dispatch.trailing_break {
                    return None;
                }
                let order = declared_init(&declarations, array).and_then(split_sequence)?;
                let start = declared_init(&declarations, index).and_then(evaluate)?;
                let JsValue::Number(start) = start else {
                    return None;
                };
                if start < 0.0 || start.fract() != 0.0 {
                    return None;
                }
                let mut seen = HashSet::new();
                let mut stmts = Vec::new();
                for value in order.into_iter().skip(start as usize) {
                    let Some(i) = find_case(&cases, &JsValue::String(value)) else {
                        break;
                    };
                    if !seen.insert(i) {
                        return None;
                    }
                    stmts.extend(cases[i].body.iter().cloned());
                    match cases[i].exit {
                        Exit::Continue(None) => {}
                        Exit::Continue(Some(_)) => return None,
                        Exit::Break(_) | Exit::End => break,
                    }
                }
                Some(Plan::new(stmts, vec![array.clone(), index.clone()], seen.len()))
            }
            Driver::State { name } => {
                let assignments = cases
                    .iter()
                    .filter(|case| matches!(case.exit, Exit::Continue(Some(_)) | Exit::Break(Some(_))))
                    .count();
                let in_test = usize::from(dispatch.end.is_some());
                if self.count(name) != 2 + assignments + in_test {
                    return None;
                }
                let mut state = declared_init(&declarations, name).and_then(evaluate)?;
                let mut seen = HashSet::new();
                let mut stmts = Vec::new();
                loop {
                    if dispatch.end.as_ref().is_some_and(|end| end.strict_equals(&state)) {
                        break;
                    }
                    // Without a break after the switch, an unmatched state
                    // short of the end spins forever.
                    let Some(i) = find_case(&cases, &state) else {
                        if dispatch.trailing_break {
                            break;
                        }
                        return None;
                    };
                    // A repeated state is a loop in the original program.
                    if !seen.insert(i) {
                        return None;
                    }
                    stmts.extend(cases[i].body.iter().cloned());
                    match &cases[i].exit {
                        Exit::Continue(Some(next)) => state = next.clone(),
                        Exit::Continue(None) => return None,
                        Exit::Break(next) => {
                            if dispatch.trailing_break {
                                break;
                            }
                            if let Some(next) = next {
                                state = next.clone();
                            }
                        }
                        Exit::End => break,
                    }
                }
                Some(Plan::new(stmts, vec![name.clone()], seen.len()))
            }
        }
    }
}

impl VisitMut for Flattener {
    fn visit_mut_module(&mut self, module: &mut Module) {
        self.counts.push(name_counts(module));
        module.visit_mut_children_with(self);
        self.counts.pop();
    }

    fn visit_mut_function(&mut self, function: &mut Function) {
        self.counts.push(name_counts(function));
        function.visit_mut_children_with(self);
        self.counts.pop();
    }

    fn visit_mut_arrow_expr(&mut self, arrow: &mut swc_ecma_ast::ArrowExpr) {
        self.counts.push(name_counts(arrow));
        arrow.visit_mut_children_with(self);
        self.counts.pop();
    }

    fn visit_mut_module_items(&mut self, items: &mut Vec<ModuleItem>) {
        items.visit_mut_children_with(self);
        self.flatten(items);
    }

    fn visit_mut_stmts(&mut self, stmts: &mut Vec<Stmt>) {
        stmts.visit_mut_children_with(self);
        self.flatten(stmts);
    }
}

struct Plan {
    stmts: Vec<Stmt>,
    declared: Vec<String>,
    traced: usize,
}

impl Plan {
    fn new(stmts: Vec<Stmt>, declared: Vec<String>, traced: usize) -> Self {
        // Lexical declarations from different cases shared the switch
        // scope; keep them out of the enclosing one.
        let lexical = stmts.iter().any(|stmt| {
            matches!(stmt, Stmt::Decl(Decl::Class(_)))
                || matches!(stmt, Stmt::Decl(Decl::Var(var)) if var.kind != VarDeclKind::Var)
        });
        let stmts = if lexical {
            vec![Stmt::Block(BlockStmt {
                span: DUMMY_SP,
                ctxt: SyntaxContext::empty(),
                stmts,
            })]
        } else {
            stmts
        };
        Self {
            stmts,
            declared,
            traced,
        }
    }
}

enum Driver {
    /// `switch (array[index++])`
    Sequence { array: String, index: String },
    /// `switch (name)`
    State { name: String },
}

struct Dispatch<'a> {
    driver: Driver,
    switch_cases: &'a [SwitchCase],
    /// A `break;` follows the switch inside the loop.
    trailing_break: bool,
    /// `while (state !== END)`
    end: Option<JsValue>,
}

impl<'a> Dispatch<'a> {
    fn parse(stmt: &'a Stmt) -> Option<Self> {
        let (test, body) = match stmt {
            Stmt::While(w) => (Some(&*w.test), &*w.body),
            Stmt::For(f) if f.init.is_none() && f.update.is_none() => (f.test.as_deref(), &*f.body),
            _ => return None,
        };
        let (switch, trailing_break) = match body {
            Stmt::Switch(switch) => (switch, false),
            Stmt::Block(block) => match block.stmts.as_slice() {
                [Stmt::Switch(switch)] => (switch, false),
                [Stmt::Switch(switch), Stmt::Break(b)] if b.label.is_none() => (switch, true),
                _ => return None,
            },
            _ => return None,
        };
        let driver = match unparen(&switch.discriminant) {
            Expr::Ident(ident) => Driver::State {
                name: ident.sym.to_string(),
            },
            Expr::Member(m) => {
                let (Expr::Ident(array), MemberProp::Computed(prop)) = (unparen(&m.obj), &m.prop) else {
                    return None;
                };
                let Expr::Update(update) = unparen(&prop.expr) else {
                    return None;
                };
                let Expr::Ident(index) = unparen(&update.arg) else {
                    return None;
                };
                if update.op != UpdateOp::PlusPlus || update.prefix {
                    return None;
                }
                Driver::Sequence {
                    array: array.sym.to_string(),
                    index: index.sym.to_string(),
                }
            }
            _ => return None,
        };

        let end = match test {
            None => None,
            Some(test) if always_true(test) => None,
            Some(test) => {
                let Driver::State { name } = &driver else {
                    return None;
                };
                let Expr::Bin(bin) = unparen(test) else {
                    return None;
                };
                let is_state = matches!(unparen(&bin.left), Expr::Ident(i) if *i.sym == **name);
                if bin.op != BinaryOp::NotEqEq || !is_state {
                    return None;
                }
                Some(evaluate(&bin.right)?)
            }
        };
        Some(Self {
            driver,
            switch_cases: &switch.cases,
            trailing_break,
            end,
        })
    }

    fn state(&self) -> Option<&str> {
        match &self.driver {
            Driver::State { name } => Some(name),
            Driver::Sequence { .. } => None,
        }
    }
}

/// `true`, `!0` or `!![]`.
fn always_true(test: &Expr) -> bool {
    if is_true_like(test) {
        return true;
    }
    let Expr::Unary(outer) = unparen(test) else {
        return false;
    };
    let Expr::Unary(inner) = unparen(&outer.arg) else {
        return false;
    };
    outer.op == swc_ecma_ast::UnaryOp::Bang
        && inner.op == swc_ecma_ast::UnaryOp::Bang
        && matches!(unparen(&inner.arg), Expr::Array(_) | Expr::Object(_))
}

enum Exit {
    /// `continue`, with the state assigned before it.
    Continue(Option<JsValue>),
    Break(Option<JsValue>),
    /// `return` or `throw`; kept in the body.
    End,
}

struct Case {
    test: JsValue,
    body: Vec<Stmt>,
    exit: Exit,
}

/// `state = <constant>;`
fn state_assignment(stmt: &Stmt, state: &str) -> Option<JsValue> {
    let Stmt::Expr(stmt) = stmt else {
        return None;
    };
    let Expr::Assign(assign) = unparen(&stmt.expr) else {
        return None;
    };
    let AssignTarget::Simple(SimpleAssignTarget::Ident(target)) = &assign.left else {
        return None;
    };
    if assign.op != AssignOp::Assign || *target.id.sym != *state {
        return None;
    }
    evaluate(&assign.right)
}

impl Case {
    fn parse(case: &SwitchCase, state: Option<&str>) -> Option<Self> {
        let test = evaluate(case.test.as_deref()?)?;
        let mut body = case.cons.clone();
        let exit = match body.pop()? {
            Stmt::Continue(c) if c.label.is_none() => Exit::Continue(pop_assignment(&mut body, state)),
            Stmt::Break(b) if b.label.is_none() => Exit::Break(pop_assignment(&mut body, state)),
            end @ (Stmt::Return(_) | Stmt::Throw(_)) => {
                body.push(end);
                Exit::End
            }
            _ => return None,
        };
        Some(Self { test, body, exit })
    }
}

fn pop_assignment(body: &mut Vec<Stmt>, state: Option<&str>) -> Option<JsValue> {
    let value = state_assignment(body.last()?, state?)?;
    body.pop();
    Some(value)
}

fn find_case(cases: &[Case], value: &JsValue) -> Option<usize> {
    cases.iter().position(|case| case.test.strict_equals(value))
}

/// Finds `break`/`continue` statements that would leave the switch or the
/// loop from the middle of a case.
struct JumpFinder {
    /// Depth of enclosing loops inside the case body.
    loops: usize,
    /// Depth of enclosing loops and switches.
    breakable: usize,
    found: bool,
}

impl Visit for JumpFinder {
    fn visit_break_stmt(&mut self, stmt: &swc_ecma_ast::BreakStmt) {
        self.found |= stmt.label.is_none() && self.breakable == 0;
    }

    fn visit_continue_stmt(&mut self, stmt: &swc_ecma_ast::ContinueStmt) {
        self.found |= stmt.label.is_none() && self.loops == 0;
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        let is_loop = matches!(
            stmt,
            Stmt::While(_) | Stmt::DoWhile(_) | Stmt::For(_) | Stmt::ForIn(_) | Stmt::ForOf(_)
        );
        let is_switch = matches!(stmt, Stmt::Switch(_));
        self.loops += usize::from(is_loop);
        self.breakable += usize::from(is_loop || is_switch);
        stmt.visit_children_with(self);
        self.loops -= usize::from(is_loop);
        self.breakable -= usize::from(is_loop || is_switch);
    }

    fn visit_function(&mut self, _: &Function) {}

    fn visit_arrow_expr(&mut self, _: &swc_ecma_ast::ArrowExpr) {}

    fn visit_class(&mut self, _: &swc_ecma_ast::Class) {}
}

fn has_stray_jump(body: &[Stmt]) -> bool {
    let mut finder = JumpFinder {
        loops: 0,
        breakable: 0,
        found: false,
    };
    for stmt in body {
        stmt.visit_with(&mut finder);
    }
    finder.found
}

/// The initializer of the declaration of `name` among `stmts`.
fn declared_init<'a>(stmts: &[&'a Stmt], name: &str) -> Option<&'a Expr> {
    stmts.iter().find_map(|stmt| {
        let Stmt::Decl(Decl::Var(var)) = stmt else {
            return None;
        };
        if var.kind == VarDeclKind::Const {
            return None;
        }
        var.decls.iter().find_map(|decl| {
            let ident = binding_ident_name(&decl.name)?;
            (*ident.sym == *name).then_some(decl.init.as_deref()).flatten()
        })
    })
}

/// `"1|0|2".split("|")`
fn split_sequence(init: &Expr) -> Option<Vec<String>> {
    let pattern = call(
        member(capture("string", any_string()), "split"),
        exact(vec![capture("separator", any_string())]),
    );
    let caps = pattern.find(init)?;
    let (string, separator) = (caps.string("string")?, caps.string("separator")?);
    if separator.is_empty() {
        return None;
    }
    Some(string.split(separator).map(str::to_string).collect())
}

/// Drops the declarators of `names` from the statements before `end`.
/// Returns how many statements were removed entirely.
fn remove_declarators<T: StmtLike>(items: &mut Vec<T>, end: usize, names: &[String]) -> usize {
    let mut removed = 0;
    let mut j = 0;
    while j < end - removed {
        let emptied = match items[j].as_stmt_mut() {
            Some(Stmt::Decl(Decl::Var(var))) => {
                let before = var.decls.len();
                var.decls.retain(|decl| {
                    !matches!(binding_ident_name(&decl.name), Some(ident) if names.iter().any(|n| *ident.sym == **n))
                });
                before != var.decls.len() && var.decls.is_empty()
            }
            _ => false,
        };
        if emptied {
            items.remove(j);
            removed += 1;
        } else {
            j += 1;
        }
    }
    removed
}

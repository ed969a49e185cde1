//! self-defending: removes the single call controller and everything it
//! guards.
//!
//! The controller backs self defending code, domain locks, console output
//! suppression and debug protection:
//!
//! ```js
//! var ctrl = (function () {
//!     var firstCall = true;
//!     return function (context, fn) {
//!         var rfn = firstCall ? function () {
//!             if (fn) { var res = fn.apply(context, arguments); fn = null; return res; }
//!         } : function () {};
//!         firstCall = false;
//!         return rfn;
//!     };
//! })();
//! var guard = ctrl(this, function () { ... });
//! guard();
//! ```
//!
//! Only an exact structural match is removed. A reference to the controller
//! in any other position aborts the pass.

use std::collections::{HashMap, HashSet};
use std::ops::Range;

use swc_common::Span;
use swc_ecma_ast::{AssignOp, Callee, Expr, Module, ModuleItem, Stmt, VarDeclarator};
use swc_ecma_visit::{Visit, VisitMut, VisitMutWith, VisitWith};
use tracing::{debug, info};

use crate::declare_transform;
use crate::helpers::{binding_ident_name, preview_at, unparen};
use crate::matcher::builders::*;
use crate::matcher::common::{const_member, empty_iife, false_like, iife, true_like};
use crate::matcher::{Matcher, NodeRef};
use crate::rewrite::{self, Rewrite};
use crate::semantic::{BindingId, IdentIndex, NodeId, ScopeGraph, count_idents};
use crate::transforms::{Transform, TransformContext, TransformError, TransformMetadata};

declare_transform!(
    SelfDefending,
    name = "self-defending",
    description = "Remove self defending and anti debugging code",
    group = Deobfuscate,
    tags = [Safe]
);

/// `name = (function () { var first = true; return function (context, fn) { .. }; })()`
fn controller() -> Matcher {
    // function () { if (fn) { var res = fn.apply(context, arguments); fn = null; return res; } }
    let run_once = function(
        exact(vec![]),
        exact(vec![if_stmt(
            backref("fn"),
            block(exact(vec![
                var_decl(
                    None,
                    exact(vec![declarator(
                        capture("res", any_ident()),
                        Some(call(
                            const_member(backref("fn"), "apply"),
                            exact(vec![backref("context"), ident("arguments")]),
                        )),
                    )]),
                ),
                expr_stmt(assign(Some(AssignOp::Assign), backref("fn"), null())),
                ret(backref("res")),
            ])),
            None,
        )]),
    );
    let guard = function(
        exact(vec![capture("context", any_ident()), capture("fn", any_ident())]),
        exact(vec![
            var_decl(
                None,
                exact(vec![declarator(
                    capture("rfn", any_ident()),
                    Some(cond(
                        backref("first"),
                        run_once,
                        function(exact(vec![]), exact(vec![])),
                    )),
                )]),
            ),
            expr_stmt(assign(Some(AssignOp::Assign), backref("first"), false_like())),
            ret(backref("rfn")),
        ]),
    );
    declarator(
        capture("controller", any_ident()),
        Some(iife(
            exact(vec![]),
            exact(vec![
                var_decl(
                    None,
                    exact(vec![declarator(capture("first", any_ident()), Some(true_like()))]),
                ),
                ret(guard),
            ]),
            exact(vec![]),
        )),
    )
}

struct Controllers<'g> {
    matcher: Matcher,
    graph: &'g ScopeGraph,
    index: &'g IdentIndex,
    found: Vec<BindingId>,
}

impl Visit for Controllers<'_> {
    fn visit_var_declarator(&mut self, declarator: &VarDeclarator) {
        if self.matcher.is_match(NodeRef::VarDeclarator(declarator)) {
            let binding = binding_ident_name(&declarator.name)
                .and_then(|name| self.index.get(name))
                .and_then(|node| self.graph.binding_at(node));
            if let Some(binding) = binding {
                self.found.push(binding);
                return;
            }
        }
        declarator.visit_children_with(self);
    }
}

/// `callee(a, b)`
fn two_arg_call(expr: &Expr) -> Option<&swc_ecma_ast::Ident> {
    let Expr::Call(call) = unparen(expr) else {
        return None;
    };
    let Callee::Expr(callee) = &call.callee else {
        return None;
    };
    match unparen(callee) {
        Expr::Ident(ident) if call.args.len() == 2 => Some(ident),
        _ => None,
    }
}

/// Candidate reference shapes, keyed by the node of their leading
/// identifier.
struct Shapes<'g> {
    graph: &'g ScopeGraph,
    index: &'g IdentIndex,
    /// `ctrl(this, fn)();`
    guarded_calls: HashSet<NodeId>,
    /// `var x = ctrl(this, fn);`, with the binding of `x` and the identifiers
    /// of the declarator.
    holders: HashMap<NodeId, (BindingId, Range<u32>)>,
    /// `x();`
    bare_calls: HashSet<NodeId>,
}

impl Visit for Shapes<'_> {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        if let Stmt::Expr(expr_stmt) = stmt {
            if let Expr::Call(call) = unparen(&expr_stmt.expr) {
                if let (Callee::Expr(callee), true) = (&call.callee, call.args.is_empty()) {
                    let leading = match unparen(callee) {
                        Expr::Ident(ident) => self.index.get(ident).map(|node| (node, false)),
                        inner => two_arg_call(inner)
                            .and_then(|ident| self.index.get(ident))
                            .map(|node| (node, true)),
                    };
                    match leading {
                        Some((node, true)) => {
                            self.guarded_calls.insert(node);
                        }
                        Some((node, false)) => {
                            self.bare_calls.insert(node);
                        }
                        None => {}
                    }
                }
            }
        }
        stmt.visit_children_with(self);
    }

    fn visit_var_declarator(&mut self, declarator: &VarDeclarator) {
        let callee = declarator.init.as_deref().and_then(two_arg_call);
        let name = binding_ident_name(&declarator.name);
        if let (Some(callee), Some(name)) = (callee, name) {
            let holder = self.index.get(name).and_then(|node| {
                let binding = self.graph.binding_at(node)?;
                Some((binding, node.0..node.0 + count_idents(declarator)))
            });
            if let (Some(callee), Some(holder)) = (self.index.get(callee), holder) {
                self.holders.insert(callee, holder);
            }
        }
        declarator.visit_children_with(self);
    }
}

fn unexpected(module: &Module, name: &str, node: NodeId) -> TransformError {
    TransformError::UnexpectedShape {
        message: format!("unexpected reference to call controller `{name}`"),
        preview: preview_at(module, node),
    }
}

/// Drops `(function () {})();` left behind by removed guarded calls. Only
/// statements that enclosed one of the removed calls are candidates.
struct EmptyIifes {
    matcher: Matcher,
    sites: Vec<Span>,
    removed: usize,
}

impl EmptyIifes {
    fn encloses_site(&self, span: Span) -> bool {
        !span.is_dummy()
            && self
                .sites
                .iter()
                .any(|site| span.lo <= site.lo && site.hi <= span.hi)
    }

    fn keep(&mut self, stmt: &Stmt) -> bool {
        let empty = matches!(
            stmt,
            Stmt::Expr(e) if self.encloses_site(e.span) && self.matcher.is_match(&*e.expr)
        );
        self.removed += usize::from(empty);
        !empty
    }
}

impl VisitMut for EmptyIifes {
    fn visit_mut_module_items(&mut self, items: &mut Vec<ModuleItem>) {
        items.visit_mut_children_with(self);
        items.retain(|item| match item {
            ModuleItem::Stmt(stmt) => self.keep(stmt),
            ModuleItem::ModuleDecl(_) => true,
        });
    }

    fn visit_mut_stmts(&mut self, stmts: &mut Vec<Stmt>) {
        stmts.visit_mut_children_with(self);
        stmts.retain(|stmt| self.keep(stmt));
    }
}

impl Transform for SelfDefending {
    fn metadata(&self) -> &TransformMetadata {
        &self.metadata
    }

    fn run(&self, module: &mut Module, ctx: &mut TransformContext) -> Result<usize, TransformError> {
        let graph = ScopeGraph::build(module);
        let index = IdentIndex::build(module);
        let mut controllers = Controllers {
            matcher: controller(),
            graph: &graph,
            index: &index,
            found: Vec::new(),
        };
        module.visit_with(&mut controllers);
        if controllers.found.is_empty() {
            return Ok(0);
        }

        let mut shapes = Shapes {
            graph: &graph,
            index: &index,
            guarded_calls: HashSet::new(),
            holders: HashMap::new(),
            bare_calls: HashSet::new(),
        };
        module.visit_with(&mut shapes);

        let mut rewrites = HashMap::new();
        let mut removed_calls = Vec::new();
        for &id in &controllers.found {
            let controller = graph.binding(id);
            info!(name = %controller.name, refs = controller.references.len(), "found call controller");
            if !controller.violations.is_empty() {
                return Err(unexpected(module, &controller.name, controller.violations[0].node));
            }
            for site in &controller.references {
                if shapes.guarded_calls.contains(&site.node) {
                    rewrites.insert(site.node, Rewrite::RemoveStmt);
                    removed_calls.push(site.span);
                    continue;
                }
                let Some((holder, own)) = shapes.holders.get(&site.node) else {
                    return Err(unexpected(module, &controller.name, site.node));
                };
                let holder = graph.binding(*holder);
                for site in holder.references.iter().chain(&holder.violations) {
                    if own.contains(&site.node.0) {
                        continue;
                    }
                    if !shapes.bare_calls.contains(&site.node) {
                        return Err(unexpected(module, &holder.name, site.node));
                    }
                    rewrites.insert(site.node, Rewrite::RemoveStmt);
                    removed_calls.push(site.span);
                }
                rewrites.insert(holder.declaration.node, Rewrite::RemoveDeclaration);
            }
            rewrites.insert(controller.declaration.node, Rewrite::RemoveDeclaration);
            ctx.info(format!("removed single call controller `{}`", controller.name));
        }

        let mut changes = rewrite::apply(module, rewrites);
        let mut leftovers = EmptyIifes {
            matcher: empty_iife(),
            sites: removed_calls,
            removed: 0,
        };
        module.visit_mut_with(&mut leftovers);
        changes += leftovers.removed;
        debug!(changes, "removed self defending code");
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{apply, assert_transform, assert_unchanged, module};

    const CONTROLLER: &str = "var ctrl = (function () {
        var firstCall = true;
        return function (context, fn) {
            var rfn = firstCall ? function () {
                if (fn) {
                    var res = fn.apply(context, arguments);
                    fn = null;
                    return res;
                }
            } : function () {};
            firstCall = false;
            return rfn;
        };
    })();";

    #[test]
    fn removes_controller_and_guarded_code() {
        let input = format!(
            "{CONTROLLER}
             var guard = ctrl(this, function () {{ return guard.toString().search('(((.+)+)+)+$'); }});
             guard();
             (function () {{ ctrl(this, function () {{ debugger; }})(); }})();
             console.log('ok');"
        );
        assert_transform(&SelfDefending::new(), &input, "console.log('ok');");
    }

    #[test]
    fn unrelated_empty_iifes_stay() {
        let input = format!(
            "(function () {{}})();
             {CONTROLLER}
             (function () {{ ctrl(this, function () {{ debugger; }})(); }})();
             console.log('ok');"
        );
        assert_transform(
            &SelfDefending::new(),
            &input,
            "(function () {})(); console.log('ok');",
        );
    }

    #[test]
    fn keeps_guarded_function_used_elsewhere() {
        let input = format!(
            "function check() {{ verify(); }}
             {CONTROLLER}
             ctrl(this, check)();
             check();"
        );
        assert_transform(
            &SelfDefending::new(),
            &input,
            "function check() { verify(); } check();",
        );
    }

    #[test]
    fn minified_booleans_match() {
        let input = "const c = (function () {
            let f = !0;
            return function (ctx, g) {
                const r = f ? function () { if (g) { const v = g['apply'](ctx, arguments); g = null; return v; } } : function () {};
                f = !1;
                return r;
            };
        }());
        c(this, function () {})();
        x();";
        let (output, changes) = apply(&SelfDefending::new(), input);
        assert_eq!(output, crate::test_support::normalize("x();"));
        assert!(changes > 0);
    }

    #[test]
    fn unknown_reference_shape_is_fatal() {
        let mut module = module(&format!("{CONTROLLER} register(ctrl);"));
        let mut ctx = TransformContext::new(None);
        let err = SelfDefending::new().run(&mut module, &mut ctx).unwrap_err();
        assert!(matches!(err, TransformError::UnexpectedShape { .. }));
        assert!(err.to_string().contains("register(ctrl)"));
    }

    #[test]
    fn similar_code_is_left_alone() {
        // Runs `fn` every time.
        assert_unchanged(
            &SelfDefending::new(),
            "var ctrl = (function () {
                 var firstCall = true;
                 return function (context, fn) {
                     var rfn = firstCall ? function () { return fn.apply(context, arguments); } : function () {};
                     return rfn;
                 };
             })();
             ctrl(this, f)();",
        );
    }
}

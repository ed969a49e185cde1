//! Batched edits addressed by identifier ordinal
//!
//! Analyses find what to change through the [`ScopeGraph`](crate::semantic::ScopeGraph),
//! which only knows [`NodeId`]s. A [`Rewrite`] names the node to replace
//! relative to such an identifier; [`apply`] performs every edit in a single
//! traversal, keeping its cursor in step with the ordinals of the unmodified
//! tree.

use std::collections::HashMap;

use swc_ecma_ast::{
    Callee, Decl, Expr, ForStmt, Ident, Module, ModuleItem, Pat, Stmt, VarDeclOrExpr, VarDeclarator,
};
use swc_ecma_visit::{VisitMut, VisitMutWith, VisitWith};

use crate::helpers::unparen;
use crate::semantic::node_id::IdentCounter;
use crate::semantic::{IdentCursor, NodeId, count_idents};

#[derive(Debug, Clone)]
pub enum Rewrite {
    /// Replace the call whose callee is, or starts with, the identifier:
    /// `id(..)` or `id.prop(..)`.
    Call(Expr),
    /// Replace the member expression `id.prop` / `id[prop]`.
    Member(Expr),
    /// Rename this one occurrence.
    Rename(String),
    /// Drop the expression statement that starts with the identifier.
    RemoveStmt,
    /// Drop the function declaration or the variable declarator that
    /// declares the identifier.
    RemoveDeclaration,
}

/// Applies `rewrites` and returns how many took effect.
pub fn apply(module: &mut Module, rewrites: HashMap<NodeId, Rewrite>) -> usize {
    if rewrites.is_empty() {
        return 0;
    }
    let mut rewriter = Rewriter {
        cursor: IdentCursor::new(),
        rewrites,
        applied: 0,
    };
    module.visit_mut_with(&mut rewriter);
    rewriter.applied
}

struct Rewriter {
    cursor: IdentCursor,
    rewrites: HashMap<NodeId, Rewrite>,
    applied: usize,
}

fn leading_ident_of_callee(callee: &Callee) -> bool {
    match callee {
        Callee::Expr(callee) => match unparen(callee) {
            Expr::Ident(_) => true,
            Expr::Member(member) => matches!(unparen(&member.obj), Expr::Ident(_)),
            _ => false,
        },
        _ => false,
    }
}

impl Rewriter {
    fn pending<N: VisitWith<IdentCounter>>(&self, node: &N) -> Option<&Rewrite> {
        if count_idents(node) == 0 {
            return None;
        }
        self.rewrites.get(&self.cursor.peek())
    }

    fn removes(&mut self, stmt: &Stmt) -> bool {
        let removed = matches!(
            (stmt, self.pending(stmt)),
            (Stmt::Expr(_), Some(Rewrite::RemoveStmt))
                | (Stmt::Decl(Decl::Fn(_)), Some(Rewrite::RemoveDeclaration))
        );
        if removed {
            self.cursor.skip_node(stmt);
            self.applied += 1;
        }
        removed
    }
}

fn is_empty_var(stmt: &Stmt) -> bool {
    matches!(stmt, Stmt::Decl(Decl::Var(var)) if var.decls.is_empty())
}

impl VisitMut for Rewriter {
    fn visit_mut_module_items(&mut self, items: &mut Vec<ModuleItem>) {
        let old = std::mem::take(items);
        for mut item in old {
            if let ModuleItem::Stmt(stmt) = &item {
                if self.removes(stmt) {
                    continue;
                }
            }
            item.visit_mut_with(self);
            if !matches!(&item, ModuleItem::Stmt(stmt) if is_empty_var(stmt)) {
                items.push(item);
            }
        }
    }

    fn visit_mut_stmts(&mut self, stmts: &mut Vec<Stmt>) {
        let old = std::mem::take(stmts);
        for mut stmt in old {
            if self.removes(&stmt) {
                continue;
            }
            stmt.visit_mut_with(self);
            if !is_empty_var(&stmt) {
                stmts.push(stmt);
            }
        }
    }

    fn visit_mut_var_declarators(&mut self, declarators: &mut Vec<VarDeclarator>) {
        let old = std::mem::take(declarators);
        for mut declarator in old {
            let removed = matches!(declarator.name, Pat::Ident(_))
                && matches!(self.pending(&declarator), Some(Rewrite::RemoveDeclaration));
            if removed {
                self.cursor.skip_node(&declarator);
                self.applied += 1;
                continue;
            }
            declarator.visit_mut_with(self);
            declarators.push(declarator);
        }
    }

    fn visit_mut_for_stmt(&mut self, stmt: &mut ForStmt) {
        stmt.visit_mut_children_with(self);
        if matches!(&stmt.init, Some(VarDeclOrExpr::VarDecl(var)) if var.decls.is_empty()) {
            stmt.init = None;
        }
    }

    fn visit_mut_expr(&mut self, expr: &mut Expr) {
        let replacement = match (&*expr, self.pending(&*expr)) {
            (Expr::Call(call), Some(Rewrite::Call(new))) if leading_ident_of_callee(&call.callee) => {
                Some(new.clone())
            }
            (Expr::Member(member), Some(Rewrite::Member(new)))
                if matches!(unparen(&member.obj), Expr::Ident(_)) =>
            {
                Some(new.clone())
            }
            _ => None,
        };
        match replacement {
            Some(new) => {
                self.cursor.skip_node(&*expr);
                *expr = new;
                self.applied += 1;
            }
            None => expr.visit_mut_children_with(self),
        }
    }

    fn visit_mut_ident(&mut self, ident: &mut Ident) {
        let node = self.cursor.advance();
        if let Some(Rewrite::Rename(name)) = self.rewrites.get(&node) {
            ident.sym = name.as_str().into();
            self.applied += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory;
    use crate::semantic::ScopeGraph;
    use crate::test_support::{module, normalize, print};

    fn references(module: &Module, name: &str) -> Vec<NodeId> {
        let graph = ScopeGraph::build(module);
        let id = graph.bindings_named(name)[0];
        graph.binding(id).references.iter().map(|site| site.node).collect()
    }

    #[test]
    fn replaces_calls_by_callee() {
        let mut module = module("function f(x) {} g(f(1) + f(2), h(f));");
        let rewrites = references(&module, "f")
            .into_iter()
            .map(|node| (node, Rewrite::Call(factory::str_lit("x"))))
            .collect();
        // The bare reference in `h(f)` is not a call and stays.
        assert_eq!(apply(&mut module, rewrites), 2);
        assert_eq!(print(&module), normalize("function f(x) {} g('x' + 'x', h(f));"));
    }

    #[test]
    fn replaces_members_and_keeps_later_ordinals_in_step() {
        let mut module = module("var r; r.g.setTimeout(r.g); var after = r;");
        let refs = references(&module, "r");
        let mut rewrites: HashMap<NodeId, Rewrite> = refs[..2]
            .iter()
            .map(|&node| (node, Rewrite::Member(factory::ident_expr("global"))))
            .collect();
        rewrites.insert(refs[2], Rewrite::Rename("renamed".into()));
        assert_eq!(apply(&mut module, rewrites), 3);
        assert_eq!(
            print(&module),
            normalize("var r; global.setTimeout(global); var after = renamed;")
        );
    }

    #[test]
    fn removes_statements() {
        let mut module = module("var r; r.r(e); if (a) { r.r(e); b(); } 1;");
        let rewrites = references(&module, "r")
            .into_iter()
            .map(|node| (node, Rewrite::RemoveStmt))
            .collect();
        assert_eq!(apply(&mut module, rewrites), 2);
        assert_eq!(print(&module), normalize("var r; if (a) { b(); } 1;"));
    }

    #[test]
    fn removes_declarations() {
        let mut module = module("var a = 1, b = a; function f() { return b; } var c = f;");
        let graph = ScopeGraph::build(&module);
        let rewrites = ["a", "f"]
            .iter()
            .map(|name| {
                let id = graph.bindings_named(name)[0];
                (graph.binding(id).declaration.node, Rewrite::RemoveDeclaration)
            })
            .collect();
        assert_eq!(apply(&mut module, rewrites), 2);
        assert_eq!(print(&module), normalize("var b = a; var c = f;"));
    }

    #[test]
    fn drops_emptied_var_statements() {
        let mut module = module("var a = 1; for (var i = 0;;) {} x();");
        let graph = ScopeGraph::build(&module);
        let rewrites = ["a", "i"]
            .iter()
            .map(|name| {
                let id = graph.bindings_named(name)[0];
                (graph.binding(id).declaration.node, Rewrite::RemoveDeclaration)
            })
            .collect();
        assert_eq!(apply(&mut module, rewrites), 2);
        assert_eq!(print(&module), normalize("for (;;) {} x();"));
    }
}

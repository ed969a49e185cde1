//! block-statements: gives every `if`, loop and labelled body its own block,
//! and splits sequence-bodied arrows into statements.

use swc_common::DUMMY_SP;
use swc_ecma_ast::{ArrowExpr, BlockStmtOrExpr, EmptyStmt, Expr, Module, Stmt};
use swc_ecma_visit::{VisitMut, VisitMutWith};

use crate::declare_transform;
use crate::factory;
use crate::helpers::unparen_mut;
use crate::transforms::{Transform, TransformContext, TransformError, TransformMetadata};

declare_transform!(
    BlockStatements,
    name = "block-statements",
    description = "Wrap statement bodies in blocks",
    group = Unminify,
    tags = [Safe]
);

impl Transform for BlockStatements {
    fn metadata(&self) -> &TransformMetadata {
        &self.metadata
    }

    fn run(&self, module: &mut Module, _ctx: &mut TransformContext) -> Result<usize, TransformError> {
        let mut visitor = BlockVisitor { changes: 0 };
        module.visit_mut_with(&mut visitor);
        Ok(visitor.changes)
    }
}

struct BlockVisitor {
    changes: usize,
}

impl BlockVisitor {
    fn wrap(&mut self, body: &mut Box<Stmt>) {
        if matches!(**body, Stmt::Block(_) | Stmt::Decl(_)) {
            return;
        }
        let inner = std::mem::replace(&mut **body, Stmt::Empty(EmptyStmt { span: DUMMY_SP }));
        let stmts = if matches!(inner, Stmt::Empty(_)) {
            Vec::new()
        } else {
            vec![inner]
        };
        **body = Stmt::Block(factory::block(stmts));
        self.changes += 1;
    }
}

impl VisitMut for BlockVisitor {
    fn visit_mut_stmt(&mut self, stmt: &mut Stmt) {
        stmt.visit_mut_children_with(self);
        match stmt {
            Stmt::If(if_stmt) => {
                self.wrap(&mut if_stmt.cons);
                if let Some(alt) = &mut if_stmt.alt {
                    // `else if` chains stay flat.
                    if !matches!(**alt, Stmt::If(_)) {
                        self.wrap(alt);
                    }
                }
            }
            Stmt::For(s) => self.wrap(&mut s.body),
            Stmt::ForIn(s) => self.wrap(&mut s.body),
            Stmt::ForOf(s) => self.wrap(&mut s.body),
            Stmt::While(s) => self.wrap(&mut s.body),
            Stmt::DoWhile(s) => self.wrap(&mut s.body),
            Stmt::Labeled(labeled) => {
                let is_loop = matches!(
                    *labeled.body,
                    Stmt::For(_) | Stmt::ForIn(_) | Stmt::ForOf(_) | Stmt::While(_) | Stmt::DoWhile(_)
                );
                if !is_loop {
                    self.wrap(&mut labeled.body);
                }
            }
            _ => {}
        }
    }

    fn visit_mut_arrow_expr(&mut self, arrow: &mut ArrowExpr) {
        arrow.visit_mut_children_with(self);
        let BlockStmtOrExpr::Expr(body) = &mut *arrow.body else {
            return;
        };
        let Expr::Seq(seq) = unparen_mut(body) else {
            return;
        };
        let mut exprs = std::mem::take(&mut seq.exprs);
        let Some(last) = exprs.pop() else {
            return;
        };
        let mut stmts: Vec<Stmt> = exprs.into_iter().map(|e| factory::expr_stmt(*e)).collect();
        stmts.push(factory::return_stmt(Some(*last)));
        *arrow.body = BlockStmtOrExpr::BlockStmt(factory::block(stmts));
        self.changes += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{assert_transform, assert_unchanged};

    #[test]
    fn wraps_if_and_else_bodies() {
        assert_transform(
            &BlockStatements::new(),
            "if (a) b(); else c();",
            "if (a) { b(); } else { c(); }",
        );
    }

    #[test]
    fn keeps_else_if_chains() {
        assert_transform(
            &BlockStatements::new(),
            "if (a) b(); else if (c) d();",
            "if (a) { b(); } else if (c) { d(); }",
        );
    }

    #[test]
    fn wraps_loop_bodies() {
        assert_transform(
            &BlockStatements::new(),
            "for (;;) a(); while (b) c(); do d(); while (e); for (k in o) f(k);",
            "for (;;) { a(); } while (b) { c(); } do { d(); } while (e); for (k in o) { f(k); }",
        );
    }

    #[test]
    fn empty_body_becomes_empty_block() {
        assert_transform(&BlockStatements::new(), "while (a());", "while (a()) {}");
    }

    #[test]
    fn labelled_loops_are_left_alone() {
        assert_unchanged(&BlockStatements::new(), "outer: for (;;) { break outer; }");
    }

    #[test]
    fn splits_sequence_arrow_body() {
        assert_transform(
            &BlockStatements::new(),
            "const f = () => (a(), b());",
            "const f = () => { a(); return b(); };",
        );
    }
}

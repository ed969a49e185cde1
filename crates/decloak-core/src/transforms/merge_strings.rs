//! merge-strings: folds concatenations of adjacent string literals.

use swc_ecma_ast::{BinaryOp, Expr, Module};
use swc_ecma_visit::{VisitMut, VisitMutWith};

use crate::declare_transform;
use crate::factory;
use crate::helpers::as_str_lit;
use crate::transforms::{Transform, TransformContext, TransformError, TransformMetadata};

declare_transform!(
    MergeStrings,
    name = "merge-strings",
    description = "Merge concatenated string literals",
    group = Unminify,
    tags = [Safe]
);

impl Transform for MergeStrings {
    fn metadata(&self) -> &TransformMetadata {
        &self.metadata
    }

    fn run(&self, module: &mut Module, _ctx: &mut TransformContext) -> Result<usize, TransformError> {
        let mut visitor = MergeVisitor { changes: 0 };
        module.visit_mut_with(&mut visitor);
        Ok(visitor.changes)
    }
}

struct MergeVisitor {
    changes: usize,
}

impl VisitMut for MergeVisitor {
    fn visit_mut_expr(&mut self, expr: &mut Expr) {
        expr.visit_mut_children_with(self);

        let Expr::Bin(bin) = expr else {
            return;
        };
        if bin.op != BinaryOp::Add {
            return;
        }
        let Some(right) = as_str_lit(&bin.right) else {
            return;
        };

        // "a" + "b"
        if let Some(left) = as_str_lit(&bin.left) {
            *expr = factory::str_lit(&format!("{left}{right}"));
            self.changes += 1;
            return;
        }

        // x + "a" + "b"
        let right = right.to_string();
        if let Expr::Bin(inner) = &mut *bin.left {
            if inner.op == BinaryOp::Add {
                if let Some(middle) = as_str_lit(&inner.right) {
                    let merged = factory::str_lit(&format!("{middle}{right}"));
                    let left = std::mem::replace(&mut *inner.left, factory::undefined());
                    bin.left = Box::new(left);
                    bin.right = Box::new(merged);
                    self.changes += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{assert_transform, assert_unchanged};

    #[test]
    fn merges_two_literals() {
        assert_transform(&MergeStrings::new(), "f('a' + 'b');", "f('ab');");
    }

    #[test]
    fn merges_chains() {
        assert_transform(&MergeStrings::new(), "x = 'a' + 'b' + 'c' + 'd';", "x = 'abcd';");
    }

    #[test]
    fn merges_after_a_non_literal() {
        assert_transform(&MergeStrings::new(), "y = x + 'a' + 'b';", "y = x + 'ab';");
    }

    #[test]
    fn keeps_numeric_addition() {
        assert_unchanged(&MergeStrings::new(), "y = 'a' + (1 + 2); z = x + 1 + 'b';");
    }
}

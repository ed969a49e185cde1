//! Locating the array rotator
//!
//! The rotator is an IIFE receiving the array (or the array function) and a
//! number, shuffling the array with `push(shift())` before first use. Two
//! templates exist:
//!
//! ```js
//! // sentinel: rotate until a checksum over decoded entries matches
//! (function (get, target) {
//!     var arr = get();
//!     while (true) {
//!         try {
//!             var sum = parseInt(d(0x1a0)) / 1 + -parseInt(d(0x1a1)) / 2;
//!             if (sum === target) break;
//!             else arr.push(arr.shift());
//!         } catch (e) {
//!             arr.push(arr.shift());
//!         }
//!     }
//! })(_0x3f2a, 0x4b3c1);
//!
//! // counted: rotate a fixed number of times
//! (function (arr, n) {
//!     var r = function (k) { while (--k) arr.push(arr.shift()); };
//!     r(++n);
//! })(_0x4e08, 0x113);
//! ```

use std::collections::HashMap;

use swc_ecma_ast::{
    BinaryOp, Callee, Expr, Function, IfStmt, MemberExpr, Module, ModuleItem, Pat, Stmt, UnaryOp,
    UpdateOp, VarDeclarator, WhileStmt,
};
use swc_ecma_visit::{Visit, VisitWith};

use super::array::EncodedArray;
use super::eval::{JsValue, evaluate};
use crate::helpers::{binding_ident_name, is_member_named, unparen};

#[derive(Debug, Clone)]
pub enum RotatorKind {
    /// Rotate until `test` evaluates to `target`.
    Sentinel { test: Expr, target: f64 },
    /// Rotate `count` times.
    Counted { count: f64 },
    /// Recognized as a rotator, but its stopping condition is not.
    Unresolved,
}

#[derive(Debug, Clone)]
pub struct Rotator {
    /// Index of the rotator statement in the module body.
    pub item: usize,
    pub kind: RotatorKind,
    /// `local -> decoder` aliases declared inside the rotator.
    pub aliases: HashMap<String, String>,
}

/// The invoked function and its arguments, when `expr` is an IIFE.
fn as_iife(expr: &Expr) -> Option<(&Function, &[swc_ecma_ast::ExprOrSpread])> {
    let expr = match unparen(expr) {
        Expr::Unary(unary) if unary.op == UnaryOp::Bang => unparen(&unary.arg),
        other => other,
    };
    let Expr::Call(call) = expr else {
        return None;
    };
    let Callee::Expr(callee) = &call.callee else {
        return None;
    };
    match unparen(callee) {
        Expr::Fn(f) => Some((&f.function, &call.args)),
        _ => None,
    }
}

#[derive(Default)]
struct RotatorScan {
    target_param: String,
    locals: HashMap<String, Expr>,
    aliases: HashMap<String, String>,
    rotates: bool,
    sentinel: Option<Expr>,
    counted: bool,
}

impl Visit for RotatorScan {
    fn visit_var_declarator(&mut self, declarator: &VarDeclarator) {
        if let (Some(name), Some(init)) = (binding_ident_name(&declarator.name), &declarator.init) {
            if let Expr::Ident(target) = unparen(init) {
                self.aliases.insert(name.sym.to_string(), target.sym.to_string());
            }
            self.locals.insert(name.sym.to_string(), (**init).clone());
        }
        declarator.visit_children_with(self);
    }

    fn visit_member_expr(&mut self, member: &MemberExpr) {
        self.rotates |= is_member_named(&member.prop, "push") || is_member_named(&member.prop, "shift");
        member.visit_children_with(self);
    }

    fn visit_if_stmt(&mut self, stmt: &IfStmt) {
        if self.sentinel.is_none() {
            if let Expr::Bin(bin) = unparen(&stmt.test) {
                if matches!(bin.op, BinaryOp::EqEqEq | BinaryOp::EqEq) {
                    let is_target =
                        |e: &Expr| matches!(unparen(e), Expr::Ident(i) if *i.sym == *self.target_param);
                    let side = if is_target(&bin.right) {
                        Some(&*bin.left)
                    } else if is_target(&bin.left) {
                        Some(&*bin.right)
                    } else {
                        None
                    };
                    self.sentinel = side.map(|side| match unparen(side) {
                        Expr::Ident(local) => self
                            .locals
                            .get(&*local.sym)
                            .cloned()
                            .unwrap_or_else(|| side.clone()),
                        _ => side.clone(),
                    });
                }
            }
        }
        stmt.visit_children_with(self);
    }

    fn visit_while_stmt(&mut self, stmt: &WhileStmt) {
        if let Expr::Update(update) = unparen(&stmt.test) {
            self.counted |= update.prefix && update.op == UpdateOp::MinusMinus;
        }
        stmt.visit_children_with(self);
    }
}

/// Finds the rotator IIFE for `array` among the top-level statements.
pub fn find_rotator(module: &Module, array: &EncodedArray) -> Option<Rotator> {
    module.body.iter().enumerate().find_map(|(item, stmt)| {
        let ModuleItem::Stmt(Stmt::Expr(stmt)) = stmt else {
            return None;
        };
        let (function, args) = as_iife(&stmt.expr)?;
        let [array_arg, count_arg] = args else {
            return None;
        };
        if !matches!(unparen(&array_arg.expr), Expr::Ident(i) if *i.sym == *array.name) {
            return None;
        }
        let target_param = match function.params.get(1).map(|p| &p.pat) {
            Some(Pat::Ident(param)) => param.id.sym.to_string(),
            _ => return None,
        };
        let mut scan = RotatorScan {
            target_param,
            ..Default::default()
        };
        function.visit_with(&mut scan);
        if !scan.rotates {
            return None;
        }

        let count = match evaluate(&count_arg.expr) {
            Some(JsValue::Number(n)) => Some(n),
            _ => None,
        };
        let kind = match (scan.sentinel, count) {
            (Some(test), Some(target)) => RotatorKind::Sentinel { test, target },
            (None, Some(count)) if scan.counted => RotatorKind::Counted { count },
            _ => RotatorKind::Unresolved,
        };
        Some(Rotator {
            item,
            kind,
            aliases: scan.aliases,
        })
    })
}

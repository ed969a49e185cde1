//! Matchers for idioms obfuscators and minifiers emit everywhere.

use swc_ecma_ast::{Expr, UnaryOp};

use super::builders::*;
use super::{ListMatcher, Matcher};

/// `true` or `!0`
pub fn true_like() -> Matcher {
    any_of(vec![boolean(true), unary(Some(UnaryOp::Bang), number(0.0))])
}

/// `false` or `!1`
pub fn false_like() -> Matcher {
    any_of(vec![boolean(false), unary(Some(UnaryOp::Bang), number(1.0))])
}

/// `obj.name` or `obj["name"]`
pub fn const_member(obj: Matcher, name: &str) -> Matcher {
    any_of(vec![
        member(obj.clone(), name),
        computed_member(obj, string(name)),
    ])
}

/// An immediately invoked function or arrow with a block body. Also covers
/// the `!function () {}()` form.
pub fn iife(params: ListMatcher, body: ListMatcher, args: ListMatcher) -> Matcher {
    let invocation = call(function(params, body), args);
    any_of(vec![
        invocation.clone(),
        unary(Some(UnaryOp::Bang), invocation),
    ])
}

/// `(function () {})()` and `(() => {})()`
pub fn empty_iife() -> Matcher {
    iife(exact(vec![]), exact(vec![]), exact(vec![]))
}

pub fn is_true_like(expr: &Expr) -> bool {
    true_like().is_match(expr)
}

pub fn is_false_like(expr: &Expr) -> bool {
    false_like().is_match(expr)
}

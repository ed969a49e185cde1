//! Browserify bundle detection.
//!
//! ```js
//! (function e(t, n, r) { ... })({
//!     1: [function (require, module, exports) { ... }, { "./dep": 2 }],
//!     2: [function (require, module, exports) { ... }, {}]
//! }, {}, [1]);
//! ```

use std::collections::BTreeMap;

use swc_ecma_ast::{AssignTarget, Callee, Expr, Module, ObjectLit, Prop, PropOrSpread, Stmt, UnaryOp};

use super::{BundleKind, Factory, ModuleId, RawBundle};
use crate::helpers::{StmtLike, as_num_lit, as_str_lit, js_number_to_string, prop_name_key, unparen};

const PARAMS: [&str; 3] = ["require", "module", "exports"];

pub(crate) fn detect(module: &Module) -> Option<RawBundle> {
    module
        .body
        .iter()
        .filter_map(StmtLike::as_stmt)
        .find_map(|stmt| match stmt {
            Stmt::Expr(stmt) => bundle(&stmt.expr),
            _ => None,
        })
}

fn literal_id(expr: &Expr) -> Option<ModuleId> {
    as_num_lit(expr)
        .map(js_number_to_string)
        .or_else(|| as_str_lit(expr).map(str::to_string))
        .map(|key| ModuleId::from_key(&key))
}

fn bundle(expr: &Expr) -> Option<RawBundle> {
    let call = match unparen(expr) {
        Expr::Call(call) => call,
        Expr::Unary(unary) if unary.op == UnaryOp::Bang => match unparen(&unary.arg) {
            Expr::Call(call) => call,
            _ => return None,
        },
        // `require = (function e(t, n, r) { .. })(..)`
        Expr::Assign(assign) if matches!(assign.left, AssignTarget::Simple(_)) => match unparen(&assign.right) {
            Expr::Call(call) => call,
            _ => return None,
        },
        _ => return None,
    };
    let Callee::Expr(callee) = &call.callee else {
        return None;
    };
    if !matches!(unparen(callee), Expr::Fn(_) | Expr::Call(_)) {
        return None;
    }
    let [modules, cache, entries] = call.args.as_slice() else {
        return None;
    };
    if [modules, cache, entries].iter().any(|arg| arg.spread.is_some()) {
        return None;
    }
    let (Expr::Object(modules), Expr::Object(_), Expr::Array(entries)) =
        (unparen(&modules.expr), unparen(&cache.expr), unparen(&entries.expr))
    else {
        return None;
    };
    let factories = factories(modules)?;
    let entry = entries
        .elems
        .iter()
        .flatten()
        .find_map(|elem| literal_id(&elem.expr));
    (!factories.is_empty()).then_some(RawBundle {
        kind: BundleKind::Browserify,
        entry,
        factories,
    })
}

/// `{ id: [factory, { alias: id }] }`
fn factories(object: &ObjectLit) -> Option<Vec<Factory>> {
    object
        .props
        .iter()
        .map(|prop| {
            let PropOrSpread::Prop(prop) = prop else {
                return None;
            };
            let Prop::KeyValue(kv) = &**prop else {
                return None;
            };
            let id = ModuleId::from_key(&prop_name_key(&kv.key)?);
            let Expr::Array(pair) = unparen(&kv.value) else {
                return None;
            };
            let [Some(function), Some(aliases)] = pair.elems.as_slice() else {
                return None;
            };
            let function = unparen(&function.expr);
            if !matches!(function, Expr::Fn(_)) {
                return None;
            }
            let Expr::Object(aliases) = unparen(&aliases.expr) else {
                return None;
            };
            Some(Factory {
                id,
                function: function.clone(),
                params: &PARAMS,
                aliases: aliases_of(aliases)?,
            })
        })
        .collect()
}

/// Excluded modules map to `false` and are left out.
fn aliases_of(object: &ObjectLit) -> Option<BTreeMap<String, ModuleId>> {
    let mut aliases = BTreeMap::new();
    for prop in &object.props {
        let PropOrSpread::Prop(prop) = prop else {
            return None;
        };
        let Prop::KeyValue(kv) = &**prop else {
            return None;
        };
        let alias = prop_name_key(&kv.key)?;
        if let Some(id) = literal_id(&kv.value) {
            aliases.insert(alias, id);
        }
    }
    Some(aliases)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::module;

    const BUNDLE: &str = r#"
        (function e(t, n, r) { function s(o) { return t[o][0].call(); } for (var o = 0; o < r.length; o++) s(r[o]); return s; })({
            1: [function (require, module, exports) {
                var dep = require("./dep");
                console.log(dep);
            }, { "./dep": 2, "fs": false }],
            2: [function (require, module, exports) {
                module.exports = 42;
            }, {}]
        }, {}, [1]);
    "#;

    #[test]
    fn detects_factories_and_aliases() {
        let bundle = detect(&module(BUNDLE)).unwrap();
        assert_eq!(bundle.kind, BundleKind::Browserify);
        assert_eq!(bundle.entry, Some(ModuleId::Number(1)));
        assert_eq!(bundle.factories.len(), 2);
        let first = &bundle.factories[0];
        assert_eq!(first.id, ModuleId::Number(1));
        assert_eq!(
            first.aliases,
            BTreeMap::from([("./dep".to_string(), ModuleId::Number(2))])
        );
        assert!(bundle.factories[1].aliases.is_empty());
    }

    #[test]
    fn assignment_form() {
        let code = format!("require = {}", BUNDLE.trim());
        let bundle = detect(&module(&code)).unwrap();
        assert_eq!(bundle.factories.len(), 2);
    }

    #[test]
    fn rejects_other_calls() {
        assert!(detect(&module("f({ 1: [g, {}] }, {}, [1]);")).is_none());
        assert!(detect(&module("(function () {})({ 1: 2 }, {}, [1]);")).is_none());
    }
}

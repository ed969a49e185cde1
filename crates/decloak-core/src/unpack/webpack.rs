//! Webpack 4 and 5 bundle detection.
//!
//! Webpack 4 passes its modules to the runtime IIFE:
//!
//! ```js
//! (function (modules) {
//!     function __webpack_require__(id) { ... modules[id].call(...); ... }
//!     return __webpack_require__(__webpack_require__.s = 0);
//! })([function (module, exports, __webpack_require__) { ... }, ...]);
//! ```
//!
//! Webpack 5 declares them in the runtime scope:
//!
//! ```js
//! (() => {
//!     var __webpack_modules__ = { 12: (module, exports, __webpack_require__) => { ... } };
//!     function __webpack_require__(id) { ... __webpack_modules__[id](...); ... }
//!     var __webpack_exports__ = __webpack_require__(12);
//! })();
//! ```

use swc_ecma_ast::{
    AssignExpr, AssignTarget, BlockStmtOrExpr, CallExpr, Callee, Decl, Expr, FnDecl, MemberProp,
    Module, ObjectLit, Prop, PropOrSpread, SimpleAssignTarget, Stmt, UnaryOp, VarDeclarator,
};
use swc_ecma_visit::{Visit, VisitWith};

use super::{BundleKind, Factory, ModuleId, RawBundle};
use crate::helpers::{
    StmtLike, as_num_lit, as_str_lit, binding_ident_name, js_number_to_string, prop_name_key, unparen,
};
use crate::unpack::runtime::require_argument;

const PARAMS: [&str; 3] = ["module", "exports", "require"];

pub(crate) fn detect(module: &Module) -> Option<RawBundle> {
    module
        .body
        .iter()
        .filter_map(StmtLike::as_stmt)
        .find_map(|stmt| match stmt {
            Stmt::Expr(stmt) => webpack4(&stmt.expr),
            _ => None,
        })
        .or_else(|| webpack5(module))
}

fn is_factory(expr: &Expr) -> bool {
    matches!(unparen(expr), Expr::Fn(_) | Expr::Arrow(_))
}

fn factory(id: ModuleId, expr: &Expr) -> Factory {
    Factory {
        id,
        function: unparen(expr).clone(),
        params: &PARAMS,
        aliases: Default::default(),
    }
}

/// `{ id: factory, .. }`
fn object_factories(object: &ObjectLit) -> Option<Vec<Factory>> {
    object
        .props
        .iter()
        .map(|prop| match prop {
            PropOrSpread::Prop(prop) => match &**prop {
                Prop::KeyValue(kv) if is_factory(&kv.value) => {
                    Some(factory(ModuleId::from_key(&prop_name_key(&kv.key)?), &kv.value))
                }
                _ => None,
            },
            PropOrSpread::Spread(_) => None,
        })
        .collect()
}

fn factories(expr: &Expr) -> Option<Vec<Factory>> {
    let factories = match unparen(expr) {
        Expr::Array(array) => array
            .elems
            .iter()
            .enumerate()
            .filter_map(|(i, elem)| elem.as_ref().map(|elem| (i, elem)))
            .map(|(i, elem)| {
                (elem.spread.is_none() && is_factory(&elem.expr))
                    .then(|| factory(ModuleId::Number(i as u64), &elem.expr))
            })
            .collect::<Option<Vec<_>>>()?,
        Expr::Object(object) => object_factories(object)?,
        _ => return None,
    };
    (!factories.is_empty()).then_some(factories)
}

/// Finds `name[..](..)` and `name[..].call(..)`.
struct IndexedCall<'a> {
    name: &'a str,
    found: bool,
}

impl IndexedCall<'_> {
    fn is_indexed(&self, expr: &Expr) -> bool {
        matches!(
            unparen(expr),
            Expr::Member(m) if matches!(m.prop, MemberProp::Computed(_))
                && matches!(unparen(&m.obj), Expr::Ident(obj) if *obj.sym == *self.name)
        )
    }
}

impl Visit for IndexedCall<'_> {
    fn visit_call_expr(&mut self, call: &CallExpr) {
        if let Callee::Expr(callee) = &call.callee {
            let direct = self.is_indexed(callee);
            let via_call = match unparen(callee) {
                Expr::Member(m) => {
                    matches!(&m.prop, MemberProp::Ident(p) if &*p.sym == "call") && self.is_indexed(&m.obj)
                }
                _ => false,
            };
            self.found |= direct || via_call;
        }
        call.visit_children_with(self);
    }
}

fn calls_indexed<'n, N: VisitWith<IndexedCall<'n>> + ?Sized>(node: &N, name: &'n str) -> bool {
    let mut finder = IndexedCall { name, found: false };
    node.visit_with(&mut finder);
    finder.found
}

/// `require.s = id`
struct EntryAssignment(Option<ModuleId>);

impl Visit for EntryAssignment {
    fn visit_assign_expr(&mut self, assign: &AssignExpr) {
        if let AssignTarget::Simple(SimpleAssignTarget::Member(member)) = &assign.left {
            if matches!(&member.prop, MemberProp::Ident(p) if &*p.sym == "s") {
                let key = as_num_lit(&assign.right)
                    .map(js_number_to_string)
                    .or_else(|| as_str_lit(&assign.right).map(str::to_string));
                if let Some(key) = key {
                    self.0 = Some(ModuleId::from_key(&key));
                }
            }
        }
        assign.visit_children_with(self);
    }
}

fn webpack4(expr: &Expr) -> Option<RawBundle> {
    let call = match unparen(expr) {
        Expr::Unary(unary) if unary.op == UnaryOp::Bang => match unparen(&unary.arg) {
            Expr::Call(call) => call,
            _ => return None,
        },
        Expr::Call(call) => call,
        _ => return None,
    };
    let Callee::Expr(callee) = &call.callee else {
        return None;
    };
    let Expr::Fn(runtime) = unparen(callee) else {
        return None;
    };
    let modules = binding_ident_name(&runtime.function.params.first()?.pat)?;
    let arg = call.args.first()?;
    if arg.spread.is_some() {
        return None;
    }
    let factories = factories(&arg.expr)?;
    let body = runtime.function.body.as_ref()?;
    if !calls_indexed(body, &modules.sym) {
        return None;
    }
    let mut entry = EntryAssignment(None);
    body.visit_with(&mut entry);
    Some(RawBundle {
        kind: BundleKind::Webpack4,
        entry: entry.0,
        factories,
    })
}

struct ModulesObject<'a>(Option<(&'a str, &'a ObjectLit)>);

impl<'a> ModulesObject<'a> {
    fn check(&mut self, declarator: &'a VarDeclarator) {
        if self.0.is_some() {
            return;
        }
        let (Some(name), Some(init)) = (binding_ident_name(&declarator.name), declarator.init.as_deref()) else {
            return;
        };
        if let Expr::Object(object) = unparen(init) {
            if object_factories(object).is_some_and(|f| !f.is_empty()) {
                self.0 = Some((&*name.sym, object));
            }
        }
    }
}

fn find_modules_object(module: &Module) -> Option<(&str, &ObjectLit)> {
    // `Visit` cannot hand out borrows of the tree, so walk by hand.
    fn stmts<'a>(found: &mut ModulesObject<'a>, stmts: impl Iterator<Item = &'a Stmt>) {
        for stmt in stmts {
            walk(found, stmt);
        }
    }
    fn walk<'a>(found: &mut ModulesObject<'a>, stmt: &'a Stmt) {
        match stmt {
            Stmt::Decl(Decl::Var(var)) => {
                for declarator in &var.decls {
                    found.check(declarator);
                }
            }
            Stmt::Expr(expr) => {
                if let Some(block) = iife_body(&expr.expr) {
                    stmts(found, block.iter());
                }
            }
            Stmt::Block(block) => stmts(found, block.stmts.iter()),
            _ => {}
        }
    }
    let mut found = ModulesObject(None);
    stmts(&mut found, module.body.iter().filter_map(StmtLike::as_stmt));
    found.0
}

/// The statements of `(function () { .. })()` or `(() => { .. })()`.
fn iife_body(expr: &Expr) -> Option<&[Stmt]> {
    let call = match unparen(expr) {
        Expr::Call(call) => call,
        Expr::Unary(unary) if unary.op == UnaryOp::Bang => match unparen(&unary.arg) {
            Expr::Call(call) => call,
            _ => return None,
        },
        _ => return None,
    };
    let Callee::Expr(callee) = &call.callee else {
        return None;
    };
    match unparen(callee) {
        Expr::Fn(f) => f.function.body.as_ref().map(|b| b.stmts.as_slice()),
        Expr::Arrow(arrow) => match &*arrow.body {
            BlockStmtOrExpr::BlockStmt(block) => Some(block.stmts.as_slice()),
            BlockStmtOrExpr::Expr(_) => None,
        },
        _ => None,
    }
}

/// Finds the runtime require function and its last call with a literal id.
struct Runtime<'a> {
    modules: &'a str,
    modules_object: &'a ObjectLit,
    require: Option<String>,
    calls: Vec<(String, ModuleId)>,
}

impl Visit for Runtime<'_> {
    fn visit_fn_decl(&mut self, decl: &FnDecl) {
        if self.require.is_none() && calls_indexed(&decl.function, self.modules) {
            self.require = Some(decl.ident.sym.to_string());
            return;
        }
        decl.visit_children_with(self);
    }

    fn visit_object_lit(&mut self, object: &ObjectLit) {
        // Factories carry their own `require` parameter.
        if std::ptr::eq(object, self.modules_object) {
            return;
        }
        object.visit_children_with(self);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        if let Some((callee, key)) = require_argument(expr) {
            self.calls.push((callee.sym.to_string(), ModuleId::from_key(&key)));
        }
        expr.visit_children_with(self);
    }
}

fn webpack5(module: &Module) -> Option<RawBundle> {
    let (name, object) = find_modules_object(module)?;
    let mut runtime = Runtime {
        modules: name,
        modules_object: object,
        require: None,
        calls: Vec::new(),
    };
    module.visit_with(&mut runtime);
    let require = runtime.require?;
    let entry = runtime
        .calls
        .into_iter()
        .filter(|(callee, _)| *callee == require)
        .map(|(_, id)| id)
        .last();
    let factories = object_factories(object)?;
    Some(RawBundle {
        kind: BundleKind::Webpack5,
        entry,
        factories,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::module;

    fn ids(bundle: &RawBundle) -> Vec<String> {
        bundle.factories.iter().map(|f| f.id.to_string()).collect()
    }

    #[test]
    fn webpack4_array() {
        let module = module(
            r#"
            !function (e) {
                var t = {};
                function n(r) {
                    if (t[r]) return t[r].exports;
                    var o = t[r] = { i: r, l: !1, exports: {} };
                    return e[r].call(o.exports, o, o.exports, n), o.l = !0, o.exports;
                }
                n(n.s = 1);
            }([
                function (e, t) { t.a = 1; },
                function (e, t, n) { var a = n(0); console.log(a.a); }
            ]);
            "#,
        );
        let bundle = detect(&module).unwrap();
        assert_eq!(bundle.kind, BundleKind::Webpack4);
        assert_eq!(ids(&bundle), vec!["0", "1"]);
        assert_eq!(bundle.entry, Some(ModuleId::Number(1)));
    }

    #[test]
    fn webpack4_object_with_string_ids() {
        let module = module(
            r#"
            (function (modules) {
                function require(id) {
                    var module = { exports: {} };
                    modules[id](module, module.exports, require);
                    return module.exports;
                }
                return require(require.s = "./src/index.js");
            })({
                "./src/index.js": function (module, exports, require) { require("./src/util.js"); },
                "./src/util.js": function (module, exports) {}
            });
            "#,
        );
        let bundle = detect(&module).unwrap();
        assert_eq!(ids(&bundle), vec!["./src/index.js", "./src/util.js"]);
        assert_eq!(bundle.entry, Some(ModuleId::Name("./src/index.js".to_string())));
    }

    #[test]
    fn webpack5_modules_object() {
        let module = module(
            r#"
            (() => {
                var __webpack_modules__ = {
                    12: (module, exports, __webpack_require__) => { __webpack_require__(7); },
                    7: (module) => { module.exports = 1; }
                };
                var __webpack_module_cache__ = {};
                function __webpack_require__(moduleId) {
                    var cached = __webpack_module_cache__[moduleId];
                    if (cached !== undefined) return cached.exports;
                    var module = __webpack_module_cache__[moduleId] = { exports: {} };
                    __webpack_modules__[moduleId](module, module.exports, __webpack_require__);
                    return module.exports;
                }
                var __webpack_exports__ = __webpack_require__(12);
            })();
            "#,
        );
        let bundle = detect(&module).unwrap();
        assert_eq!(bundle.kind, BundleKind::Webpack5);
        assert_eq!(ids(&bundle), vec!["12", "7"]);
        assert_eq!(bundle.entry, Some(ModuleId::Number(12)));
    }

    #[test]
    fn plain_code_is_not_a_bundle() {
        let module = module("(function (a) { return a[0](); })([1, 2]); var o = { a: function () {} };");
        assert!(detect(&module).is_none());
    }
}

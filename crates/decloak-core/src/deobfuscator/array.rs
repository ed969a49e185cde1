//! Locating the string array
//!
//! Two shapes are recognized at the top level of the module:
//!
//! ```js
//! var _0x4e08 = ["log", "Hello", "World"];
//!
//! function _0x3f2a() {
//!     var a = ["log", "Hello"];
//!     _0x3f2a = function () { return a; };
//!     return _0x3f2a();
//! }
//! ```

use swc_ecma_ast::{Decl, Expr, Lit, Module, ModuleItem, Stmt};

use crate::helpers::binding_ident_name;
use crate::matcher::builders::*;
use crate::matcher::{Matcher, NodeRef};
use crate::semantic::{BindingKey, ScopeGraph};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayForm {
    /// `var arr = [...]`, indexed directly.
    Variable,
    /// A self-replacing function returning the array.
    Function,
}

#[derive(Debug, Clone)]
pub struct EncodedArray {
    pub name: String,
    pub key: BindingKey,
    pub form: ArrayForm,
    pub strings: Vec<String>,
}

fn array_function() -> Matcher {
    function(
        exact(vec![]),
        exact(vec![
            var_decl(
                None,
                exact(vec![declarator(
                    capture("array", any_ident()),
                    Some(capture("elements", array(list_any()))),
                )]),
            ),
            expr_stmt(assign(
                Some(swc_ecma_ast::AssignOp::Assign),
                capture("fn", any_ident()),
                function(exact(vec![]), exact(vec![ret(backref("array"))])),
            )),
            ret(call(backref("fn"), exact(vec![]))),
        ]),
    )
}

/// The entries of a non-empty array literal made only of string literals.
/// Numbers would come back out as strings, so such arrays are not candidates.
fn literal_entries(expr: &Expr) -> Option<Vec<String>> {
    let Expr::Array(array) = expr else {
        return None;
    };
    let strings = array
        .elems
        .iter()
        .map(|elem| match &*elem.as_ref().filter(|elem| elem.spread.is_none())?.expr {
            Expr::Lit(Lit::Str(s)) => Some(s.value.to_string()),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;
    (!strings.is_empty()).then_some(strings)
}

/// Every top-level string array candidate, in source order.
pub fn find_arrays(module: &Module, graph: &ScopeGraph) -> Vec<EncodedArray> {
    let matcher = array_function();
    let mut found = Vec::new();
    for item in &module.body {
        let ModuleItem::Stmt(stmt) = item else {
            continue;
        };
        let candidate = match stmt {
            Stmt::Decl(Decl::Var(var)) if var.decls.len() == 1 => {
                let declarator = &var.decls[0];
                let name = binding_ident_name(&declarator.name);
                let strings = declarator.init.as_deref().and_then(literal_entries);
                name.zip(strings)
                    .map(|(name, strings)| (name.sym.to_string(), ArrayForm::Variable, strings))
            }
            Stmt::Decl(Decl::Fn(decl)) => matcher.find(NodeRef::Stmt(stmt)).and_then(|caps| {
                if caps.ident("fn") != Some(&*decl.ident.sym) {
                    return None;
                }
                let strings = literal_entries(caps.expr("elements")?)?;
                Some((decl.ident.sym.to_string(), ArrayForm::Function, strings))
            }),
            _ => None,
        };
        let Some((name, form, strings)) = candidate else {
            continue;
        };
        let Some(id) = graph.lookup(&name, graph.root_scope()) else {
            continue;
        };
        found.push(EncodedArray {
            key: graph.key(id),
            name,
            form,
            strings,
        });
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::module;

    fn find(code: &str) -> Vec<EncodedArray> {
        let module = module(code);
        let graph = ScopeGraph::build(&module);
        find_arrays(&module, &graph)
    }

    #[test]
    fn variable_form() {
        let arrays = find("var _0x1 = ['a', 'b', 'c']; var other = [x];");
        assert_eq!(arrays.len(), 1);
        assert_eq!(arrays[0].name, "_0x1");
        assert_eq!(arrays[0].form, ArrayForm::Variable);
        assert_eq!(arrays[0].strings, vec!["a", "b", "c"]);
    }

    #[test]
    fn numeric_entries_are_not_string_arrays() {
        assert!(find("var _0x1 = ['a', 'b', 0x10];").is_empty());
        assert!(find("var _0x1 = [];").is_empty());
    }

    #[test]
    fn function_form() {
        let arrays = find(
            "function _0x2() { var a = ['x', 'y']; _0x2 = function () { return a; }; return _0x2(); }",
        );
        assert_eq!(arrays.len(), 1);
        assert_eq!(arrays[0].form, ArrayForm::Function);
        assert_eq!(arrays[0].strings, vec!["x", "y"]);
    }

    #[test]
    fn rejects_mixed_arrays() {
        assert!(find("var a = ['x', y]; var b = [1, 2];").is_empty());
    }
}

//! object-literals: folds property assignments into the object literal they
//! follow.
//!
//! ```js
//! var o = {};
//! o.a = 1;
//! o["b"] = 2;
//! // becomes
//! var o = { a: 1, b: 2 };
//! ```

use swc_common::DUMMY_SP;
use swc_ecma_ast::{
    AssignOp, AssignTarget, Decl, Expr, Ident, IdentName, KeyValueProp, Module, ModuleItem,
    ObjectLit, Prop, PropName, PropOrSpread, SimpleAssignTarget, Stmt, Str,
};
use swc_ecma_visit::{Visit, VisitMut, VisitMutWith, VisitWith};

use crate::declare_transform;
use crate::helpers::{StmtLike, binding_ident_name, is_identifier_name, member_prop_key, prop_name_key, unparen};
use crate::transforms::{Transform, TransformContext, TransformError, TransformMetadata};

declare_transform!(
    ObjectLiterals,
    name = "object-literals",
    description = "Merge property assignments into object literals",
    group = Deobfuscate,
    tags = [Safe]
);

impl Transform for ObjectLiterals {
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
    fn visit_mut_module_items(&mut self, items: &mut Vec<ModuleItem>) {
        items.visit_mut_children_with(self);
        self.changes += merge(items);
    }

    fn visit_mut_stmts(&mut self, stmts: &mut Vec<Stmt>) {
        stmts.visit_mut_children_with(self);
        self.changes += merge(stmts);
    }
}

/// The name and existing keys of a declaration ending in `name = {..}`.
fn object_declaration(stmt: &Stmt) -> Option<(String, Vec<String>)> {
    let Stmt::Decl(Decl::Var(var)) = stmt else {
        return None;
    };
    let last = var.decls.last()?;
    let name = binding_ident_name(&last.name)?;
    let Expr::Object(object) = unparen(last.init.as_deref()?) else {
        return None;
    };
    let keys = object
        .props
        .iter()
        .filter_map(|prop| match prop {
            PropOrSpread::Prop(prop) => match &**prop {
                Prop::KeyValue(kv) => prop_name_key(&kv.key),
                Prop::Shorthand(ident) => Some(ident.sym.to_string()),
                _ => None,
            },
            PropOrSpread::Spread(_) => None,
        })
        .collect();
    Some((name.sym.to_string(), keys))
}

fn object_mut(stmt: &mut Stmt) -> Option<&mut ObjectLit> {
    let Stmt::Decl(Decl::Var(var)) = stmt else {
        return None;
    };
    match var.decls.last_mut()?.init.as_deref_mut()? {
        Expr::Object(object) => Some(object),
        Expr::Paren(paren) => match &mut *paren.expr {
            Expr::Object(object) => Some(object),
            _ => None,
        },
        _ => None,
    }
}

/// `name.key = value;`
fn property_assignment<'a>(stmt: &'a Stmt, name: &str) -> Option<(String, &'a Expr)> {
    let Stmt::Expr(stmt) = stmt else {
        return None;
    };
    let Expr::Assign(assign) = &*stmt.expr else {
        return None;
    };
    if assign.op != AssignOp::Assign {
        return None;
    }
    let AssignTarget::Simple(SimpleAssignTarget::Member(member)) = &assign.left else {
        return None;
    };
    if !matches!(unparen(&member.obj), Expr::Ident(obj) if *obj.sym == *name) {
        return None;
    }
    Some((member_prop_key(&member.prop)?, &assign.right))
}

struct Mentions<'a> {
    name: &'a str,
    found: bool,
}

impl Visit for Mentions<'_> {
    fn visit_ident(&mut self, ident: &Ident) {
        self.found |= *ident.sym == *self.name;
    }
}

fn mentions(expr: &Expr, name: &str) -> bool {
    let mut visitor = Mentions { name, found: false };
    expr.visit_with(&mut visitor);
    visitor.found
}

fn key_value(key: &str, value: Expr) -> PropOrSpread {
    let key = if is_identifier_name(key) {
        PropName::Ident(IdentName::new(key.into(), DUMMY_SP))
    } else {
        PropName::Str(Str {
            span: DUMMY_SP,
            value: key.into(),
            raw: None,
        })
    };
    PropOrSpread::Prop(Box::new(Prop::KeyValue(KeyValueProp {
        key,
        value: Box::new(value),
    })))
}

fn merge<T: StmtLike>(items: &mut Vec<T>) -> usize {
    let mut changes = 0;
    let mut i = 0;
    while i < items.len() {
        let Some((name, mut keys)) = items[i].as_stmt().and_then(object_declaration) else {
            i += 1;
            continue;
        };
        let mut props = Vec::new();
        for item in &items[i + 1..] {
            let Some((key, value)) = item.as_stmt().and_then(|stmt| property_assignment(stmt, &name))
            else {
                break;
            };
            if keys.contains(&key) || mentions(value, &name) {
                break;
            }
            keys.push(key.clone());
            props.push(key_value(&key, value.clone()));
        }
        let merged = props.len();
        if let Some(object) = items[i].as_stmt_mut().and_then(object_mut) {
            object.props.extend(props);
            items.drain(i + 1..i + 1 + merged);
            changes += merged;
        }
        i += 1;
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{assert_transform, assert_unchanged};

    #[test]
    fn merges_following_assignments() {
        assert_transform(
            &ObjectLiterals::new(),
            "var o = {}; o.a = 1; o['b-c'] = 2; o[3] = f(); use(o);",
            "var o = { a: 1, 'b-c': 2, '3': f() }; use(o);",
        );
    }

    #[test]
    fn stops_at_self_reference() {
        assert_transform(
            &ObjectLiterals::new(),
            "function g() { const t = { x: 0 }; t.y = 1; t.z = t.y; }",
            "function g() { const t = { x: 0, y: 1 }; t.z = t.y; }",
        );
    }

    #[test]
    fn stops_at_duplicate_keys_and_other_statements() {
        assert_unchanged(&ObjectLiterals::new(), "var o = { a: 1 }; o.a = 2;");
        assert_unchanged(&ObjectLiterals::new(), "var o = {}; f(); o.a = 1;");
        assert_unchanged(&ObjectLiterals::new(), "var o = {}; o.a += 1;");
    }

    #[test]
    fn uses_the_last_declarator() {
        assert_transform(
            &ObjectLiterals::new(),
            "var n = 1, o = {}; o.k = n;",
            "var n = 1, o = { k: n };",
        );
    }
}

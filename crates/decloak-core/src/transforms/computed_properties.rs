//! computed-properties: `a["foo"]` to `a.foo` and `{"foo": 1}` to `{foo: 1}`.

use swc_common::DUMMY_SP;
use swc_ecma_ast::{Expr, IdentName, Lit, MemberProp, Module, PropName};
use swc_ecma_visit::{VisitMut, VisitMutWith};

use crate::declare_transform;
use crate::helpers::{is_identifier_name, unparen};
use crate::transforms::{Transform, TransformContext, TransformError, TransformMetadata};

declare_transform!(
    ComputedProperties,
    name = "computed-properties",
    description = "Use dot notation for literal property keys",
    group = Unminify,
    tags = [Safe]
);

impl Transform for ComputedProperties {
    fn metadata(&self) -> &TransformMetadata {
        &self.metadata
    }

    fn run(&self, module: &mut Module, _ctx: &mut TransformContext) -> Result<usize, TransformError> {
        let mut visitor = ComputedVisitor { changes: 0 };
        module.visit_mut_with(&mut visitor);
        Ok(visitor.changes)
    }
}

struct ComputedVisitor {
    changes: usize,
}

fn identifier_key(expr: &Expr) -> Option<String> {
    match unparen(expr) {
        Expr::Lit(Lit::Str(s)) if is_identifier_name(&s.value) => Some(s.value.to_string()),
        _ => None,
    }
}

impl VisitMut for ComputedVisitor {
    fn visit_mut_member_prop(&mut self, prop: &mut MemberProp) {
        prop.visit_mut_children_with(self);
        let MemberProp::Computed(computed) = prop else {
            return;
        };
        if let Some(key) = identifier_key(&computed.expr) {
            *prop = MemberProp::Ident(IdentName::new(key.into(), DUMMY_SP));
            self.changes += 1;
        }
    }

    fn visit_mut_prop_name(&mut self, name: &mut PropName) {
        name.visit_mut_children_with(self);
        let key = match name {
            PropName::Str(s) if is_identifier_name(&s.value) => s.value.to_string(),
            // `{["__proto__"]: x}` defines an own property; `{__proto__: x}`
            // sets the prototype.
            PropName::Computed(computed) => match identifier_key(&computed.expr) {
                Some(key) if key != "__proto__" => key,
                _ => return,
            },
            _ => return,
        };
        *name = PropName::Ident(IdentName::new(key.into(), DUMMY_SP));
        self.changes += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{assert_transform, assert_unchanged};

    #[test]
    fn member_access_uses_dot_notation() {
        assert_transform(
            &ComputedProperties::new(),
            "console['log'](a['b']['c']);",
            "console.log(a.b.c);",
        );
    }

    #[test]
    fn object_keys_become_identifiers() {
        assert_transform(
            &ComputedProperties::new(),
            "x = { 'foo': 1, ['bar']: 2, 'baz-qux': 3 };",
            "x = { foo: 1, bar: 2, 'baz-qux': 3 };",
        );
    }

    #[test]
    fn keeps_non_identifier_keys() {
        assert_unchanged(
            &ComputedProperties::new(),
            "a['b-c']; a[0]; a[k]; x = { ['__proto__']: 1 };",
        );
    }

    #[test]
    fn reserved_words_are_valid_property_names() {
        assert_transform(&ComputedProperties::new(), "a['default'];", "a.default;");
    }
}

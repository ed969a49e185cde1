//! raw-literals: drops preserved source text of string and numeric literals
//! so that `"\x61"` and `0x1` print as `"a"` and `1`.

use swc_ecma_ast::{Module, Number, Str};
use swc_ecma_visit::{VisitMut, VisitMutWith};

use crate::declare_transform;
use crate::transforms::{Transform, TransformContext, TransformError, TransformMetadata};

declare_transform!(
    RawLiterals,
    name = "raw-literals",
    description = "Print string and number literals canonically",
    group = Unminify,
    tags = [Safe]
);

impl Transform for RawLiterals {
    fn metadata(&self) -> &TransformMetadata {
        &self.metadata
    }

    fn run(&self, module: &mut Module, _ctx: &mut TransformContext) -> Result<usize, TransformError> {
        let mut visitor = RawVisitor { changes: 0 };
        module.visit_mut_with(&mut visitor);
        Ok(visitor.changes)
    }
}

struct RawVisitor {
    changes: usize,
}

impl VisitMut for RawVisitor {
    fn visit_mut_str(&mut self, s: &mut Str) {
        if s.raw.take().is_some() {
            self.changes += 1;
        }
    }

    fn visit_mut_number(&mut self, n: &mut Number) {
        if n.raw.take().is_some() {
            self.changes += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::printer::print_module;

    #[test]
    fn escapes_print_decoded() {
        let parsed = parse(r#"var a = "\x61b", b = 0x1f;"#).unwrap();
        let mut module = parsed.module;
        let changes = RawLiterals::new()
            .run(&mut module, &mut TransformContext::new(None))
            .unwrap();
        let printed = print_module(&module, &parsed.source_map).unwrap();

        assert_eq!(changes, 2);
        assert!(printed.contains("\"ab\""), "{printed}");
        assert!(printed.contains("31"), "{printed}");
    }

    #[test]
    fn second_run_is_a_no_op() {
        let mut module = parse("f('a', 1e3);").unwrap().module;
        let mut ctx = TransformContext::new(None);
        assert_eq!(RawLiterals::new().run(&mut module, &mut ctx).unwrap(), 2);
        assert_eq!(RawLiterals::new().run(&mut module, &mut ctx).unwrap(), 0);
    }
}

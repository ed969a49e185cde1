//! Helpers shared by the unit tests of the transforms.

use swc_ecma_ast::{Lit, Module};
use swc_ecma_visit::{VisitMut, VisitMutWith};

use crate::parser::parse;
use crate::printer::print_module;
use crate::transforms::{Transform, TransformContext};

struct StripRaw;

impl VisitMut for StripRaw {
    fn visit_mut_lit(&mut self, lit: &mut Lit) {
        match lit {
            Lit::Str(s) => s.raw = None,
            Lit::Num(n) => n.raw = None,
            _ => {}
        }
    }
}

pub fn print(module: &Module) -> String {
    let mut module = module.clone();
    module.visit_mut_with(&mut StripRaw);
    print_module(&module, &Default::default()).unwrap()
}

/// Parses and reprints `code` so expectations share the printer's layout.
pub fn normalize(code: &str) -> String {
    print(&parse(code).unwrap().module)
}

pub fn module(code: &str) -> Module {
    parse(code).unwrap().module
}

/// Runs `transform` once and returns the printed result with the change count.
pub fn apply(transform: &dyn Transform, code: &str) -> (String, usize) {
    let mut module = module(code);
    let mut ctx = TransformContext::new(None);
    let changes = transform.run(&mut module, &mut ctx).unwrap();
    (print(&module), changes)
}

/// Asserts that `transform` rewrites `input` into `expected`, and that a
/// second run over its own output changes nothing.
pub fn assert_transform(transform: &dyn Transform, input: &str, expected: &str) {
    let (output, changes) = apply(transform, input);
    assert_eq!(output, normalize(expected));
    assert!(changes > 0, "expected changes for {input}");
    let (again, second) = apply(transform, &output);
    assert_eq!(again, output);
    assert_eq!(second, 0, "second run changed {output}");
}

pub fn assert_unchanged(transform: &dyn Transform, input: &str) {
    let (output, changes) = apply(transform, input);
    assert_eq!(output, normalize(input));
    assert_eq!(changes, 0);
}

//! Deobfuscation passes
//!
//! Targets the output of javascript-obfuscator style tools: encoded string
//! arrays, control flow flattening and self-defending code.

pub mod array;
pub mod control_flow_object;
pub mod control_flow_switch;
pub mod decoder;
pub mod encoding;
pub mod eval;
pub mod object_literals;
pub mod rotator;
pub mod self_defending;
pub mod string_array;
pub mod vm;
pub mod wrappers;

use std::ops::Range;

use swc_ecma_ast::Module;

use crate::semantic::count_idents;

pub use control_flow_object::ControlFlowObject;
pub use control_flow_switch::ControlFlowSwitch;
pub use object_literals::ObjectLiterals;
pub use self_defending::SelfDefending;
pub use string_array::StringArray;

/// Identifier ordinals covered by each top-level item.
pub(crate) fn item_ranges(module: &Module) -> Vec<Range<u32>> {
    let mut start = 0;
    module
        .body
        .iter()
        .map(|item| {
            let end = start + count_idents(item);
            let range = start..end;
            start = end;
            range
        })
        .collect()
}

/// Removes the top-level items at `indices`.
pub(crate) fn remove_items(module: &mut Module, mut indices: Vec<usize>) -> usize {
    indices.sort_unstable();
    indices.dedup();
    let mut removed = 0;
    for index in indices.into_iter().rev() {
        if index < module.body.len() {
            module.body.remove(index);
            removed += 1;
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{module, normalize, print};

    #[test]
    fn item_ranges_partition_identifiers() {
        let module = module("var a = b; f(); 1;");
        assert_eq!(item_ranges(&module), vec![0..2, 2..3, 3..3]);
    }

    #[test]
    fn remove_items_drops_by_index() {
        let mut module = module("a(); b(); c();");
        assert_eq!(remove_items(&mut module, vec![2, 0, 7]), 2);
        assert_eq!(print(&module), normalize("b();"));
    }
}

//! string-array: replaces decoder calls with the strings they return.
//!
//! The pass finds the array and its decoders, replays the rotator on a copy
//! of the array, unwinds decoder aliases and wrappers, and splices a literal
//! in place of every decoder call with constant arguments. Once no call is
//! left, the array, the rotator and the decoders are deleted.

use swc_ecma_ast::{Module, ModuleItem};
use tracing::{debug, info, warn};

use super::array::{EncodedArray, find_arrays};
use super::decoder::{Decoder, find_decoders};
use super::rotator::find_rotator;
use super::vm::{Vm, decode_calls};
use super::{item_ranges, remove_items, wrappers};
use crate::declare_transform;
use crate::helpers::code_preview;
use crate::rewrite;
use crate::semantic::{BindingId, BindingKey, ScopeGraph};
use crate::transforms::{Transform, TransformContext, TransformError, TransformMetadata};

declare_transform!(
    StringArray,
    name = "string-array",
    description = "Decode string array lookups",
    group = Deobfuscate,
    tags = [Unsafe]
);

impl Transform for StringArray {
    fn metadata(&self) -> &TransformMetadata {
        &self.metadata
    }

    fn run(&self, module: &mut Module, ctx: &mut TransformContext) -> Result<usize, TransformError> {
        let graph = ScopeGraph::build(module);
        let found = find_arrays(module, &graph).into_iter().find_map(|array| {
            let decoders = find_decoders(module, &graph, &array);
            (!decoders.is_empty()).then_some((array, decoders))
        });
        let Some((array, decoders)) = found else {
            return Ok(0);
        };
        info!(
            array = %array.name,
            entries = array.strings.len(),
            decoders = decoders.len(),
            "found string array"
        );

        let mut vm = Vm::new(array.strings.clone(), &decoders);
        if let Some(rotator) = find_rotator(module, &array) {
            if let Err(err) = vm.rotate(&rotator) {
                warn!(array = %array.name, %err, "skipping string array");
                let preview = match module.body.get(rotator.item) {
                    Some(ModuleItem::Stmt(stmt)) => Some(code_preview(stmt)),
                    _ => None,
                };
                ctx.warn(format!("string array `{}` left encoded: {err}", array.name), preview);
                return Ok(0);
            }
        }

        let keys: Vec<BindingKey> = decoders.iter().map(|d| d.key.clone()).collect();
        let mut changes = wrappers::inline_wrappers(module, &keys);

        let graph = ScopeGraph::build(module);
        let resolved: Vec<(BindingId, &Decoder)> = decoders
            .iter()
            .filter_map(|d| graph.resolve_key(&d.key).map(|id| (id, d)))
            .collect();
        let ranges = item_ranges(module);
        let skipped: Vec<_> = dead_items(module, &graph, &array, &keys)
            .into_iter()
            .map(|item| ranges[item].clone())
            .collect();
        let decoded = decode_calls(module, &graph, &vm, &resolved, &skipped);
        let unresolved = decoded.unresolved;
        let replaced = rewrite::apply(module, decoded.rewrites);
        debug!(replaced, unresolved, "decoded string array calls");
        changes += replaced;

        if unresolved > 0 {
            ctx.warn(
                format!(
                    "{unresolved} call(s) to decoders of `{}` have non-constant arguments; the decoders are kept",
                    array.name
                ),
                None,
            );
            return Ok(changes);
        }

        let graph = ScopeGraph::build(module);
        let dead = dead_items(module, &graph, &array, &keys);
        let ranges = item_ranges(module);
        let in_dead = |node: u32| dead.iter().any(|&item| ranges[item].contains(&node));
        let live: Vec<&str> = std::iter::once(&array.key)
            .chain(&keys)
            .filter_map(|key| graph.resolve_key(key))
            .map(|id| graph.binding(id))
            .filter(|binding| binding.sites().any(|site| !in_dead(site.node.0)))
            .map(|binding| binding.name.as_str())
            .collect();
        if !live.is_empty() {
            ctx.warn(
                format!("still referenced after decoding: {}", live.join(", ")),
                None,
            );
            return Ok(changes);
        }

        ctx.info(format!(
            "decoded string array `{}` ({} entries, {} call sites)",
            array.name,
            array.strings.len(),
            replaced
        ));
        changes += remove_items(module, dead);
        Ok(changes)
    }
}

/// Top-level items of the array, its rotator and its decoders.
fn dead_items(module: &Module, graph: &ScopeGraph, array: &EncodedArray, decoders: &[BindingKey]) -> Vec<usize> {
    let ranges = item_ranges(module);
    let mut items: Vec<usize> = std::iter::once(&array.key)
        .chain(decoders)
        .filter_map(|key| graph.resolve_key(key))
        .filter_map(|id| {
            let node = graph.binding(id).declaration.node.0;
            ranges.iter().position(|range| range.contains(&node))
        })
        .collect();
    items.extend(find_rotator(module, array).map(|rotator| rotator.item));
    items.sort_unstable();
    items.dedup();
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{apply, assert_unchanged, module, normalize, print};

    fn run(code: &str) -> (String, usize, Vec<String>) {
        let mut module = module(code);
        let mut ctx = TransformContext::new(None);
        let changes = StringArray::new().run(&mut module, &mut ctx).unwrap();
        let messages = ctx.diagnostics().iter().map(|d| d.message.clone()).collect();
        (print(&module), changes, messages)
    }

    #[test]
    fn decodes_and_removes_plain_array() {
        let (output, _) = apply(
            &StringArray::new(),
            "var _0xa = ['log', 'Hello'];
             var _0xb = function (i) { i = i - 0; var v = _0xa[i]; return v; };
             console[_0xb('0x0')](_0xb('0x1'));",
        );
        assert_eq!(output, normalize("console['log']('Hello');"));
    }

    #[test]
    fn rotation_by_one_resolves_against_rotated_order() {
        let (output, _) = apply(
            &StringArray::new(),
            "var arr = ['foo', 'bar'];
             (function (a, n) {
                 var r = function (k) { while (--k) { a.push(a.shift()); } };
                 r(++n);
             })(arr, 1);
             function f(i) { return arr[i]; }
             x = f(0);",
        );
        assert_eq!(output, normalize("x = 'bar';"));
    }

    #[test]
    fn modern_template_with_sentinel_rotator() {
        // Entries rotated once to the right: the sentinel only holds for
        // ["1", "2", "hi"].
        let (output, changes, _) = run(
            "function _0xs() {
                 var a = ['hi', '1', '2'];
                 _0xs = function () { return a; };
                 return _0xs();
             }
             (function (get, target) {
                 var d = _0xd, arr = get();
                 while (true) {
                     try {
                         var sum = parseInt(d(0x64)) + parseInt(d(0x65)) * 10;
                         if (sum === target) break;
                         else arr.push(arr.shift());
                     } catch (e) {
                         arr.push(arr.shift());
                     }
                 }
             })(_0xs, 21);
             function _0xd(i, k) {
                 var s = _0xs();
                 return _0xd = function (i, k) { i = i - 0x64; var v = s[i]; return v; }, _0xd(i, k);
             }
             function greet() { var q = _0xd; return q(0x66); }
             greet();",
        );
        assert_eq!(output, normalize("function greet() { return 'hi'; } greet();"));
        assert!(changes > 0);
    }

    #[test]
    fn non_constant_calls_keep_the_decoder() {
        let (output, _, messages) = run(
            "var arr = ['a', 'b']; function f(i) { return arr[i]; } x = f(1); y = f(z);",
        );
        assert_eq!(
            output,
            normalize("var arr = ['a', 'b']; function f(i) { return arr[i]; } x = 'b'; y = f(z);")
        );
        assert!(messages.iter().any(|m| m.contains("non-constant")));
    }

    #[test]
    fn unresolved_rotator_skips_decoding() {
        let code = "var arr = ['a', 'b'];
             (function (a, n) { for (;;) a.push(a.shift()); })(arr, 1);
             function f(i) { return arr[i]; }
             x = f(0);";
        let (output, changes, messages) = run(code);
        assert_eq!(output, normalize(code));
        assert_eq!(changes, 0);
        assert!(messages.iter().any(|m| m.contains("left encoded")));
    }

    #[test]
    fn base64_entries_are_decoded() {
        let (output, _) = apply(
            &StringArray::new(),
            "var arr = ['AgvSBg8='];
             function f(i) {
                 var chars = 'abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789+/=';
                 return arr[i];
             }
             x = f(0);",
        );
        assert_eq!(output, normalize("x = 'hello';"));
    }

    #[test]
    fn indexed_accessors_are_not_decoders() {
        assert_unchanged(
            &StringArray::new(),
            "var colors = ['red', 'blue']; function pick(i) { return colors[1 - i]; } x = pick(0);",
        );
    }

    #[test]
    fn offsets_on_other_locals_are_ignored() {
        let (output, _) = apply(
            &StringArray::new(),
            "var a = ['p', 'q', 'r']; function f(i) { var k = 0; k = k - 1; return a[i]; } y = f(1);",
        );
        assert_eq!(output, normalize("y = 'q';"));
    }

    #[test]
    fn numeric_entries_are_left_alone() {
        assert_unchanged(
            &StringArray::new(),
            "var a = ['x', 1]; function f(i) { return a[i]; } y = f(1) + 1;",
        );
    }

    #[test]
    fn plain_arrays_without_decoders_are_ignored() {
        assert_unchanged(&StringArray::new(), "var colors = ['red', 'blue']; use(colors[0]);");
    }
}

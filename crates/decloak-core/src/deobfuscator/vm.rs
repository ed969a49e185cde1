//! Symbolic evaluation of decoder calls
//!
//! The [`Vm`] holds a private copy of the string array. It replays the
//! rotator on that copy, then answers decoder calls whose arguments are all
//! constants. Nothing from the input is ever executed.

use std::collections::HashMap;
use std::ops::Range;

use swc_ecma_ast::{CallExpr, Callee, Expr, Module};
use swc_ecma_visit::{Visit, VisitWith};
use tracing::debug;

use super::decoder::Decoder;
use super::eval::{CallResolver, Evaluator, JsValue, evaluate};
use super::rotator::{Rotator, RotatorKind};
use crate::factory;
use crate::helpers::unparen;
use crate::rewrite::Rewrite;
use crate::semantic::{BindingId, IdentIndex, NodeId, ScopeGraph};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RotateError {
    #[error("rotator condition never held within {attempts} rotations")]
    NoMatch { attempts: usize },
    #[error("rotator has no recognizable stopping condition")]
    Unrecognized,
}

#[derive(Debug)]
pub struct Vm<'a> {
    strings: Vec<String>,
    decoders: &'a [Decoder],
}

impl<'a> Vm<'a> {
    pub fn new(strings: Vec<String>, decoders: &'a [Decoder]) -> Self {
        Self { strings, decoders }
    }

    pub fn strings(&self) -> &[String] {
        &self.strings
    }

    /// Applies the rotator to the array copy. Returns the number of
    /// positions the array moved.
    pub fn rotate(&mut self, rotator: &Rotator) -> Result<usize, RotateError> {
        let len = self.strings.len();
        if len == 0 {
            return Ok(0);
        }
        match &rotator.kind {
            RotatorKind::Counted { count } => {
                let shift = (count.max(0.0) as usize) % len;
                self.strings.rotate_left(shift);
                Ok(shift)
            }
            RotatorKind::Sentinel { test, target } => {
                let target = JsValue::Number(*target);
                for attempt in 0..len {
                    let resolver = AliasResolver {
                        vm: self,
                        aliases: &rotator.aliases,
                    };
                    // A failed evaluation is the generated `catch` branch.
                    let value = Evaluator::new(&resolver).eval(test);
                    if value.is_some_and(|value| value.strict_equals(&target)) {
                        debug!(attempt, "rotator condition satisfied");
                        return Ok(attempt);
                    }
                    self.strings.rotate_left(1);
                }
                Err(RotateError::NoMatch { attempts: len })
            }
            RotatorKind::Unresolved => Err(RotateError::Unrecognized),
        }
    }

    /// What `decoder(args..)` returns, if the arguments are enough to know.
    pub fn call(&self, decoder: &Decoder, args: &[JsValue]) -> Option<String> {
        let index = args.first()?.to_number();
        let key = args.get(1).map(JsValue::to_js_string);
        decoder.decode(&self.strings, index, key.as_deref())
    }

    fn decoder_named(&self, name: &str) -> Option<&Decoder> {
        self.decoders.iter().find(|decoder| decoder.name == name)
    }
}

struct AliasResolver<'v, 'a> {
    vm: &'v Vm<'a>,
    aliases: &'v HashMap<String, String>,
}

impl CallResolver for AliasResolver<'_, '_> {
    fn call(&self, callee: &str, args: &[JsValue]) -> Option<JsValue> {
        let name = self.aliases.get(callee).map_or(callee, String::as_str);
        let decoder = self.vm.decoder_named(name)?;
        self.vm.call(decoder, args).map(JsValue::String)
    }
}

/// Decoder call sites found in a module.
#[derive(Debug, Default)]
pub struct DecodedCalls {
    pub rewrites: HashMap<NodeId, Rewrite>,
    pub unresolved: usize,
}

struct CallSites<'g, 'v, 'a> {
    graph: &'g ScopeGraph,
    index: &'g IdentIndex,
    decoders: &'g [(BindingId, &'g Decoder)],
    /// Identifier ranges of the items the pass deletes afterwards.
    skipped: &'g [Range<u32>],
    vm: &'v Vm<'a>,
    found: DecodedCalls,
}

impl Visit for CallSites<'_, '_, '_> {
    fn visit_call_expr(&mut self, call: &CallExpr) {
        call.visit_children_with(self);
        let Callee::Expr(callee) = &call.callee else {
            return;
        };
        let Expr::Ident(ident) = unparen(callee) else {
            return;
        };
        let Some(node) = self.index.get(ident) else {
            return;
        };
        if self.skipped.iter().any(|range| range.contains(&node.0)) {
            return;
        }
        let Some(binding) = self.graph.binding_at(node) else {
            return;
        };
        let Some((_, decoder)) = self.decoders.iter().find(|(id, _)| *id == binding) else {
            return;
        };

        let args: Option<Vec<JsValue>> = call
            .args
            .iter()
            .map(|arg| if arg.spread.is_some() { None } else { evaluate(&arg.expr) })
            .collect();
        match args.and_then(|args| self.vm.call(decoder, &args)) {
            Some(value) => {
                self.found
                    .rewrites
                    .insert(node, Rewrite::Call(factory::str_lit(&value)));
            }
            None => self.found.unresolved += 1,
        }
    }
}

/// Collects a string-literal rewrite for every decoder call with constant
/// arguments. Calls inside `skipped` ranges are ignored.
pub fn decode_calls(
    module: &Module,
    graph: &ScopeGraph,
    vm: &Vm<'_>,
    decoders: &[(BindingId, &Decoder)],
    skipped: &[Range<u32>],
) -> DecodedCalls {
    let index = IdentIndex::build(module);
    let mut sites = CallSites {
        graph,
        index: &index,
        decoders,
        skipped,
        vm,
        found: DecodedCalls::default(),
    };
    module.visit_with(&mut sites);
    sites.found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deobfuscator::encoding::Encoding;
    use crate::parser::parse;
    use crate::semantic::{BindingKey, NodeId};
    use swc_common::DUMMY_SP;
    use swc_ecma_ast::{ModuleItem, Stmt};

    fn decoder(name: &str, offset: f64) -> Decoder {
        Decoder {
            name: name.to_string(),
            key: BindingKey {
                name: name.to_string(),
                span: DUMMY_SP,
                node: NodeId(0),
            },
            offset,
            encoding: Encoding::None,
        }
    }

    fn expr(code: &str) -> Expr {
        match parse(code).unwrap().module.body.remove(0) {
            ModuleItem::Stmt(Stmt::Expr(stmt)) => *stmt.expr,
            other => panic!("expected an expression, got {other:?}"),
        }
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn rotation_by_one_shifts_lookups() {
        let decoders = [decoder("f", 0.0)];
        let mut vm = Vm::new(strings(&["foo", "bar"]), &decoders);
        let rotator = Rotator {
            item: 0,
            kind: RotatorKind::Counted { count: 1.0 },
            aliases: HashMap::new(),
        };
        assert_eq!(vm.rotate(&rotator), Ok(1));
        assert_eq!(vm.call(&decoders[0], &[JsValue::Number(0.0)]), Some("bar".to_string()));
    }

    #[test]
    fn sentinel_rotation_goes_through_aliases() {
        let decoders = [decoder("decode", -1.0)];
        let mut vm = Vm::new(strings(&["3", "1", "2"]), &decoders);
        let rotator = Rotator {
            item: 0,
            kind: RotatorKind::Sentinel {
                test: expr("parseInt(d(1)) + parseInt(d(2)) * 10;"),
                target: 21.0,
            },
            aliases: HashMap::from([("d".to_string(), "decode".to_string())]),
        };
        // [1, 2, 3] gives 1 + 20.
        assert_eq!(vm.rotate(&rotator), Ok(1));
        assert_eq!(vm.strings(), ["1", "2", "3"]);
    }

    #[test]
    fn sentinel_that_never_holds() {
        let decoders = [decoder("d", 0.0)];
        let mut vm = Vm::new(strings(&["a", "b"]), &decoders);
        let rotator = Rotator {
            item: 0,
            kind: RotatorKind::Sentinel {
                test: expr("parseInt(d(0));"),
                target: 5.0,
            },
            aliases: HashMap::new(),
        };
        assert_eq!(vm.rotate(&rotator), Err(RotateError::NoMatch { attempts: 2 }));
    }

    #[test]
    fn hex_string_indexes_use_to_number() {
        let decoders = [decoder("d", 0.0)];
        let vm = Vm::new(strings(&["a", "b"]), &decoders);
        let index = JsValue::String("0x1".to_string());
        assert_eq!(vm.call(&decoders[0], &[index]), Some("b".to_string()));
    }
}

//! Decoder alias and wrapper inlining
//!
//! Obfuscators hide decoder calls behind aliases and thin wrappers:
//!
//! ```js
//! const d = _0x4e2c;
//! function w(a, b) { return _0x4e2c(a - 0x3d, b); }
//! d(0x1a0); w(0x1dd, "k3y");
//! ```
//!
//! Both are rewritten to call the decoder directly, one layer per round, so
//! wrappers of wrappers unwind over several rounds.

use std::collections::HashMap;

use swc_ecma_ast::{
    BlockStmtOrExpr, CallExpr, Callee, Expr, FnDecl, Function, Ident, Module, Stmt, VarDeclarator,
};
use swc_ecma_visit::{Visit, VisitWith};
use tracing::debug;

use crate::factory;
use crate::helpers::{binding_ident_name, unparen};
use crate::rewrite::{self, Rewrite};
use crate::semantic::{BindingId, BindingKey, IdentIndex, NodeId, ScopeGraph, SiteShape};

const MAX_ROUNDS: usize = 16;

/// A function whose only statement is `return decoder(<args>)`.
#[derive(Debug, Clone)]
struct Wrapper {
    params: Vec<String>,
    decoder: BindingId,
    args: Vec<Expr>,
}

/// Whether `expr` only combines literals and the wrapper's own parameters.
fn is_template(expr: &Expr, params: &[String]) -> bool {
    match unparen(expr) {
        Expr::Lit(_) => true,
        Expr::Ident(ident) => params.iter().any(|p| *p == *ident.sym) || &*ident.sym == "undefined",
        Expr::Unary(unary) => is_template(&unary.arg, params),
        Expr::Bin(bin) => is_template(&bin.left, params) && is_template(&bin.right, params),
        _ => false,
    }
}

fn simple_params(function: &Function) -> Option<Vec<String>> {
    function
        .params
        .iter()
        .map(|param| binding_ident_name(&param.pat).map(|ident| ident.sym.to_string()))
        .collect()
}

struct Candidates<'g> {
    graph: &'g ScopeGraph,
    index: &'g IdentIndex,
    decoders: &'g [BindingId],
    aliases: HashMap<BindingId, BindingId>,
    wrappers: HashMap<BindingId, Wrapper>,
}

impl Candidates<'_> {
    fn decoder_of(&self, expr: &Expr) -> Option<BindingId> {
        let Expr::Ident(ident) = unparen(expr) else {
            return None;
        };
        let binding = self.graph.binding_at(self.index.get(ident)?)?;
        self.decoders.contains(&binding).then_some(binding)
    }

    /// Constant binding declared by `name`, other than a decoder.
    fn constant(&self, name: &Ident) -> Option<BindingId> {
        let binding = self.graph.binding_at(self.index.get(name)?)?;
        let usable = self.graph.binding(binding).is_constant() && !self.decoders.contains(&binding);
        usable.then_some(binding)
    }

    fn wrapper(&self, function: &Function) -> Option<Wrapper> {
        let params = simple_params(function)?;
        let [Stmt::Return(ret)] = function.body.as_ref()?.stmts.as_slice() else {
            return None;
        };
        let Expr::Call(call) = unparen(ret.arg.as_deref()?) else {
            return None;
        };
        let Callee::Expr(callee) = &call.callee else {
            return None;
        };
        let decoder = self.decoder_of(callee)?;
        let mut args = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            if arg.spread.is_some() || !is_template(&arg.expr, &params) {
                return None;
            }
            args.push((*arg.expr).clone());
        }
        Some(Wrapper { params, decoder, args })
    }
}

impl Visit for Candidates<'_> {
    fn visit_fn_decl(&mut self, decl: &FnDecl) {
        if let Some(wrapper) = self.wrapper(&decl.function) {
            if let Some(binding) = self.constant(&decl.ident) {
                self.wrappers.insert(binding, wrapper);
            }
        }
        decl.visit_children_with(self);
    }

    fn visit_var_declarator(&mut self, declarator: &VarDeclarator) {
        if let (Some(name), Some(init)) = (binding_ident_name(&declarator.name), &declarator.init) {
            if let Some(decoder) = self.decoder_of(init) {
                if let Some(binding) = self.constant(name) {
                    self.aliases.insert(binding, decoder);
                }
            } else if let Expr::Fn(f) = unparen(init) {
                let wrapper = self.wrapper(&f.function);
                if let (Some(wrapper), Some(binding)) = (wrapper, self.constant(name)) {
                    self.wrappers.insert(binding, wrapper);
                }
            } else if let Expr::Arrow(arrow) = unparen(init) {
                // const w = (a, b) => decoder(a - 1, b);
                let params: Option<Vec<String>> = arrow
                    .params
                    .iter()
                    .map(|p| binding_ident_name(p).map(|i| i.sym.to_string()))
                    .collect();
                if let (Some(params), BlockStmtOrExpr::Expr(body)) = (params, &*arrow.body) {
                    let wrapper = self.arrow_wrapper(params, body);
                    if let (Some(wrapper), Some(binding)) = (wrapper, self.constant(name)) {
                        self.wrappers.insert(binding, wrapper);
                    }
                }
            }
        }
        declarator.visit_children_with(self);
    }
}

impl Candidates<'_> {
    fn arrow_wrapper(&self, params: Vec<String>, body: &Expr) -> Option<Wrapper> {
        let Expr::Call(call) = unparen(body) else {
            return None;
        };
        let Callee::Expr(callee) = &call.callee else {
            return None;
        };
        let decoder = self.decoder_of(callee)?;
        let args = call
            .args
            .iter()
            .map(|arg| {
                (arg.spread.is_none() && is_template(&arg.expr, &params)).then(|| (*arg.expr).clone())
            })
            .collect::<Option<Vec<_>>>()?;
        Some(Wrapper { params, decoder, args })
    }
}

/// Replaces parameter names in a wrapper's argument template.
fn substitute(template: &Expr, bindings: &HashMap<&str, &Expr>) -> Expr {
    match unparen(template) {
        Expr::Ident(ident) => match bindings.get(&*ident.sym) {
            Some(value) => (*value).clone(),
            None => template.clone(),
        },
        Expr::Unary(unary) => {
            let mut unary = unary.clone();
            unary.arg = Box::new(paren_if_needed(substitute(&unary.arg, bindings)));
            Expr::Unary(unary)
        }
        Expr::Bin(bin) => {
            let mut bin = bin.clone();
            bin.left = Box::new(paren_if_needed(substitute(&bin.left, bindings)));
            bin.right = Box::new(paren_if_needed(substitute(&bin.right, bindings)));
            Expr::Bin(bin)
        }
        _ => template.clone(),
    }
}

fn paren_if_needed(expr: Expr) -> Expr {
    match expr {
        Expr::Bin(_) | Expr::Cond(_) | Expr::Seq(_) | Expr::Assign(_) => {
            Expr::Paren(swc_ecma_ast::ParenExpr {
                span: swc_common::DUMMY_SP,
                expr: Box::new(expr),
            })
        }
        other => other,
    }
}

/// Arguments that can be duplicated without repeating side effects.
fn is_duplicable(expr: &Expr) -> bool {
    matches!(unparen(expr), Expr::Lit(_) | Expr::Ident(_))
        || matches!(unparen(expr), Expr::Unary(unary) if matches!(unparen(&unary.arg), Expr::Lit(_)))
}

fn occurrences(template: &[Expr], name: &str) -> usize {
    struct Count<'a>(&'a str, usize);
    impl Visit for Count<'_> {
        fn visit_ident(&mut self, ident: &Ident) {
            if *ident.sym == *self.0 {
                self.1 += 1;
            }
        }
    }
    let mut count = Count(name, 0);
    for expr in template {
        expr.visit_with(&mut count);
    }
    count.1
}

struct CallSites<'g> {
    graph: &'g ScopeGraph,
    index: &'g IdentIndex,
    wrappers: &'g HashMap<BindingId, Wrapper>,
    rewrites: HashMap<NodeId, Rewrite>,
}

impl Visit for CallSites<'_> {
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
        let Some(wrapper) = self.graph.binding_at(node).and_then(|b| self.wrappers.get(&b)) else {
            return;
        };
        let Some(site) = self.graph.site_at(node) else {
            return;
        };
        let decoder = self.graph.binding(wrapper.decoder);
        if self.graph.lookup(&decoder.name, site.scope) != Some(wrapper.decoder) {
            return;
        }
        if call.args.iter().any(|arg| arg.spread.is_some()) {
            return;
        }

        let undefined = factory::undefined();
        let mut bindings = HashMap::new();
        for (i, param) in wrapper.params.iter().enumerate() {
            let value = call.args.get(i).map_or(&undefined, |arg| &*arg.expr);
            if occurrences(&wrapper.args, param) > 1 && !is_duplicable(value) {
                return;
            }
            bindings.insert(param.as_str(), value);
        }
        let args = wrapper.args.iter().map(|arg| substitute(arg, &bindings)).collect();
        let replacement = factory::call(factory::ident_expr(&decoder.name), args);
        self.rewrites.insert(node, Rewrite::Call(replacement));
    }
}

/// Inlines aliases and wrappers of `decoders` until nothing changes, then
/// removes the ones left unreferenced. Returns the number of changes.
pub fn inline_wrappers(module: &mut Module, decoders: &[BindingKey]) -> usize {
    let mut changes = 0;
    let mut inlined: Vec<BindingKey> = Vec::new();

    for round in 0..MAX_ROUNDS {
        let graph = ScopeGraph::build(module);
        let index = IdentIndex::build(module);
        let ids: Vec<BindingId> = decoders.iter().filter_map(|key| graph.resolve_key(key)).collect();
        let mut candidates = Candidates {
            graph: &graph,
            index: &index,
            decoders: &ids,
            aliases: HashMap::new(),
            wrappers: HashMap::new(),
        };
        module.visit_with(&mut candidates);
        let Candidates { aliases, wrappers, .. } = candidates;

        let mut rewrites = HashMap::new();
        for (&alias, &decoder) in &aliases {
            let name = &graph.binding(decoder).name;
            for site in &graph.binding(alias).references {
                if site.shape == SiteShape::Plain && graph.lookup(name, site.scope) == Some(decoder) {
                    rewrites.insert(site.node, Rewrite::Rename(name.clone()));
                }
            }
        }
        let mut sites = CallSites {
            graph: &graph,
            index: &index,
            wrappers: &wrappers,
            rewrites,
        };
        module.visit_with(&mut sites);

        for &id in aliases.keys().chain(wrappers.keys()) {
            let key = graph.key(id);
            if !inlined.contains(&key) {
                inlined.push(key);
            }
        }
        let applied = rewrite::apply(module, sites.rewrites);
        debug!(round, applied, "inlined decoder aliases and wrappers");
        if applied == 0 {
            break;
        }
        changes += applied;
    }

    changes + remove_unreferenced(module, &inlined)
}

fn remove_unreferenced(module: &mut Module, keys: &[BindingKey]) -> usize {
    let graph = ScopeGraph::build(module);
    let rewrites: HashMap<NodeId, Rewrite> = keys
        .iter()
        .filter_map(|key| graph.resolve_key(key))
        .map(|id| graph.binding(id))
        .filter(|binding| !binding.is_referenced())
        .map(|binding| (binding.declaration.node, Rewrite::RemoveDeclaration))
        .collect();
    rewrite::apply(module, rewrites)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{module, normalize, print};

    fn inline(code: &str) -> (String, usize) {
        let mut module = module(code);
        let graph = ScopeGraph::build(&module);
        let decoder = graph.key(graph.bindings_named("dec")[0]);
        let changes = inline_wrappers(&mut module, &[decoder]);
        (print(&module), changes)
    }

    #[test]
    fn aliases_are_renamed_and_removed() {
        let (output, changes) = inline("function dec(i) {} const d = dec; d(1); function f() { d(2); }");
        assert_eq!(output, normalize("function dec(i) {} dec(1); function f() { dec(2); }"));
        assert_eq!(changes, 3);
    }

    #[test]
    fn wrappers_are_inlined_with_arguments_substituted() {
        let (output, _) = inline(
            "function dec(i, k) {} function w(a, b) { return dec(b - 0x3, a); } w('key', 0x10); w('k');",
        );
        assert_eq!(
            output,
            normalize("function dec(i, k) {} dec(0x10 - 0x3, 'key'); dec(undefined - 0x3, 'k');")
        );
    }

    #[test]
    fn nested_wrappers_unwind() {
        let (output, _) = inline(
            "function dec(i) {} function w1(a) { return dec(a + 1); } var w2 = function (b) { return w1(b * 2); }; w2(3);",
        );
        assert_eq!(output, normalize("function dec(i) {} dec((3 * 2) + 1);"));
    }

    #[test]
    fn shadowed_decoder_name_blocks_inlining() {
        let code = "function dec(i) {} const d = dec; function g(dec) { return d(1); }";
        let (output, changes) = inline(code);
        assert_eq!(output, normalize(code));
        assert_eq!(changes, 0);
    }

    #[test]
    fn repeated_parameter_with_side_effects_is_kept() {
        let code = "function dec(i) {} function w(a) { return dec(a + a); } w(f());";
        let (output, _) = inline(code);
        assert_eq!(output, normalize(code));
    }
}

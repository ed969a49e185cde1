//! mangle: renames bindings to the shortest free names.
//!
//! Runs once after the main pipeline has converged. Names are handed out in
//! declaration order from the sequence `a`..`z`, `aa`, `ab`, ... and restart
//! for every binding, so sibling scopes reuse the same short names.

use swc_ecma_ast::Module;
use tracing::debug;

use crate::declare_transform;
use crate::helpers::is_reserved_word;
use crate::rename::{RenameError, rename};
use crate::semantic::{BindingKey, ScopeGraph, SiteShape};
use crate::transforms::{Transform, TransformContext, TransformError, TransformMetadata};

declare_transform!(
    Mangle,
    name = "mangle",
    description = "Rename bindings to short names",
    group = Unminify,
    tags = [Unsafe]
);

impl Transform for Mangle {
    fn metadata(&self) -> &TransformMetadata {
        &self.metadata
    }

    fn run(&self, module: &mut Module, ctx: &mut TransformContext) -> Result<usize, TransformError> {
        let mut graph = ScopeGraph::build(module);
        let mut keys: Vec<(BindingKey, bool)> = graph
            .bindings()
            .filter(|binding| !is_short_name(&binding.name))
            .map(|binding| {
                let jsx = binding.sites().any(|site| site.shape == SiteShape::JsxName);
                (graph.key(binding.id), jsx)
            })
            .collect();
        keys.sort_by_key(|(key, _)| key.node);

        let mut changes = 0;
        for (key, jsx) in keys {
            if jsx {
                continue;
            }
            if graph.is_stale() {
                graph = ScopeGraph::build(module);
            }
            let Some(binding) = graph.resolve_key(&key) else {
                ctx.warn(format!("lost track of `{}` while mangling", key.name), None);
                continue;
            };

            let mut index = 0;
            loop {
                let candidate = short_name(index);
                index += 1;
                if is_reserved_word(&candidate) {
                    continue;
                }
                match rename(module, &mut graph, binding, &candidate) {
                    Ok(()) => {
                        debug!(from = %key.name, to = %candidate, "mangled");
                        changes += 1;
                        break;
                    }
                    Err(RenameError::Collision { .. }) => continue,
                    Err(err) => return Err(err.into()),
                }
            }
        }
        Ok(changes)
    }
}

/// `0 -> a`, `25 -> z`, `26 -> aa`, ...
fn short_name(mut index: usize) -> String {
    let mut name = Vec::new();
    loop {
        name.push(b'a' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    name.reverse();
    String::from_utf8_lossy(&name).into_owned()
}

fn is_short_name(name: &str) -> bool {
    !name.is_empty() && name.len() <= 3 && name.bytes().all(|b| b.is_ascii_lowercase())
}

//! Scope-safe renaming
//!
//! A rename rewrites the declaration and every reference and write site of a
//! binding in one traversal. All checks run before the tree is touched, so a
//! rejected rename leaves the module exactly as it was.

use std::collections::HashMap;

use swc_common::DUMMY_SP;
use swc_ecma_ast::{
    AssignPat, BindingIdent, ExportNamedSpecifier, Expr, Ident, IdentName, ImportNamedSpecifier,
    KeyValuePatProp, KeyValueProp, Module, ModuleExportName, ObjectPatProp, Pat, Prop, PropName,
};
use swc_ecma_visit::{VisitMut, VisitMutWith};

use crate::helpers::{is_valid_binding_name, preview_at, to_identifier};
use crate::semantic::{BindingId, BindingKind, IdentCursor, NodeId, ScopeGraph, ScopeId, SiteKind, SiteShape};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenameError {
    #[error("`{name}` would collide with another binding")]
    Collision { name: String },
    #[error("`{name}` is not a valid identifier")]
    InvalidName { name: String },
    #[error("unexpected {kind} of `{name}`: {preview}")]
    UnexpectedSite {
        name: String,
        kind: SiteKind,
        preview: String,
    },
    #[error("scope graph no longer matches the tree")]
    StaleGraph,
    #[error("`{name}` is used as a JSX tag and must start with an uppercase letter")]
    LowercaseJsxName { name: String },
}

/// Renames `binding` and all of its sites to `new_name`.
pub fn rename(
    module: &mut Module,
    graph: &mut ScopeGraph,
    binding: BindingId,
    new_name: &str,
) -> Result<(), RenameError> {
    if graph.is_stale() {
        return Err(RenameError::StaleGraph);
    }
    if !is_valid_binding_name(new_name) {
        return Err(RenameError::InvalidName {
            name: new_name.to_string(),
        });
    }

    let target = graph.binding(binding);
    if target.name == new_name {
        return Ok(());
    }

    let mut sites = HashMap::new();
    for site in target.sites() {
        if site.kind == SiteKind::Dynamic {
            return Err(RenameError::UnexpectedSite {
                name: target.name.clone(),
                kind: site.kind,
                preview: preview_at(module, site.node),
            });
        }
        if site.shape == SiteShape::JsxName && new_name.starts_with(|c: char| c.is_ascii_lowercase()) {
            return Err(RenameError::LowercaseJsxName {
                name: new_name.to_string(),
            });
        }
        sites.insert(site.node, site.shape);
    }

    if collides(graph, binding, new_name) {
        return Err(RenameError::Collision {
            name: new_name.to_string(),
        });
    }

    let old_name = target.name.clone();
    tracing::trace!(from = %old_name, to = new_name, sites = sites.len(), "renaming binding");

    let mut renamer = Renamer {
        cursor: IdentCursor::new(),
        sites,
        old_name: &old_name,
        new_name,
        added_idents: false,
    };
    module.visit_mut_with(&mut renamer);
    let added_idents = renamer.added_idents;

    graph.bindings_mut().set_name(binding, new_name);
    if added_idents {
        graph.mark_stale();
    }
    Ok(())
}

/// Whether renaming `binding` to `name` would change what any identifier in
/// the program refers to.
fn collides(graph: &ScopeGraph, binding: BindingId, name: &str) -> bool {
    let target = graph.binding(binding);
    let scopes = graph.scopes();

    // A same-named binding at or below the binding's scope would capture
    // some of its sites.
    for site in target.sites() {
        if let Some(other) = graph.lookup(name, site.scope) {
            if other != binding && scopes.is_descendant_of(graph.binding(other).scope, target.scope) {
                return true;
            }
        }
    }

    // Uses of an outer `name` inside the binding's scope would be captured
    // by the renamed binding.
    for other in graph.bindings_named(name) {
        let other = graph.binding(other);
        if scopes.is_descendant_of(other.scope, target.scope) {
            continue;
        }
        if other
            .sites()
            .any(|site| scopes.is_descendant_of(site.scope, target.scope))
        {
            return true;
        }
    }

    graph
        .unresolved()
        .iter()
        .any(|u| u.name == name && scopes.is_descendant_of(u.site.scope, target.scope))
}

/// Derives a name from `hint` that `binding` can be renamed to: the hint
/// itself when free, else the first free `hint2`, `hint3`, ...
pub fn generate_unique_name(graph: &ScopeGraph, binding: BindingId, hint: &str) -> String {
    let base = to_identifier(hint);
    let own = &graph.binding(binding).name;
    if is_valid_binding_name(&base) && (*own == base || !collides(graph, binding, &base)) {
        return base;
    }
    let mut counter = 2u32;
    loop {
        let candidate = format!("{base}{counter}");
        if is_valid_binding_name(&candidate) && !collides(graph, binding, &candidate) {
            return candidate;
        }
        counter += 1;
    }
}

/// Renames `binding` to `hint`, or to a unique variant of it.
pub fn rename_unique(
    module: &mut Module,
    graph: &mut ScopeGraph,
    binding: BindingId,
    hint: &str,
) -> Result<String, RenameError> {
    let name = generate_unique_name(graph, binding, hint);
    rename(module, graph, binding, &name)?;
    Ok(name)
}

/// Renames the simple parameters of the function owning `scope`, one name
/// per position. Surplus names and unnamed positions are skipped. The graph
/// is rebuilt between renames that leave it stale.
pub fn rename_parameters(
    module: &mut Module,
    graph: &mut ScopeGraph,
    scope: ScopeId,
    names: &[&str],
) -> Result<(), RenameError> {
    let params: Vec<_> = names
        .iter()
        .enumerate()
        .filter_map(|(index, name)| {
            let param = graph.parameter(scope, index as u32)?;
            matches!(graph.binding(param).kind, BindingKind::Param { simple: true, .. })
                .then(|| (graph.key(param), *name))
        })
        .collect();

    for (key, name) in params {
        if graph.is_stale() {
            *graph = ScopeGraph::build(module);
        }
        let Some(param) = graph.resolve_key(&key) else {
            return Err(RenameError::StaleGraph);
        };
        rename(module, graph, param, name)?;
    }
    Ok(())
}

struct Renamer<'a> {
    cursor: IdentCursor,
    sites: HashMap<NodeId, SiteShape>,
    old_name: &'a str,
    new_name: &'a str,
    added_idents: bool,
}

impl Renamer<'_> {
    fn take(&mut self) -> Option<SiteShape> {
        let node = self.cursor.advance();
        self.sites.get(&node).copied()
    }

    fn renamed(&self, ident: &Ident) -> Ident {
        Ident {
            sym: self.new_name.into(),
            ..ident.clone()
        }
    }

    fn old_key(&self, span: swc_common::Span) -> IdentName {
        IdentName::new(self.old_name.into(), span)
    }
}

impl VisitMut for Renamer<'_> {
    fn visit_mut_ident(&mut self, ident: &mut Ident) {
        if self.take().is_some() {
            ident.sym = self.new_name.into();
        }
    }

    fn visit_mut_prop(&mut self, prop: &mut Prop) {
        let Prop::Shorthand(ident) = prop else {
            prop.visit_mut_children_with(self);
            return;
        };
        if self.take().is_none() {
            return;
        }
        *prop = Prop::KeyValue(KeyValueProp {
            key: PropName::Ident(self.old_key(ident.span)),
            value: Box::new(Expr::Ident(self.renamed(ident))),
        });
    }

    fn visit_mut_object_pat_prop(&mut self, prop: &mut ObjectPatProp) {
        let ObjectPatProp::Assign(assign) = prop else {
            prop.visit_mut_children_with(self);
            return;
        };
        let hit = self.take().is_some();
        assign.value.visit_mut_with(self);
        if !hit {
            return;
        }
        let binding = Pat::Ident(BindingIdent {
            id: self.renamed(&assign.key.id),
            type_ann: None,
        });
        let value = match assign.value.take() {
            Some(default) => Pat::Assign(AssignPat {
                span: DUMMY_SP,
                left: Box::new(binding),
                right: default,
            }),
            None => binding,
        };
        *prop = ObjectPatProp::KeyValue(KeyValuePatProp {
            key: PropName::Ident(self.old_key(assign.key.id.span)),
            value: Box::new(value),
        });
    }

    fn visit_mut_import_named_specifier(&mut self, specifier: &mut ImportNamedSpecifier) {
        let hit = self.take();
        specifier.imported.visit_mut_with(self);
        if hit.is_none() {
            return;
        }
        if specifier.imported.is_none() {
            specifier.imported = Some(ModuleExportName::Ident(Ident {
                sym: self.old_name.into(),
                ..specifier.local.clone()
            }));
            self.added_idents = true;
        }
        specifier.local.sym = self.new_name.into();
    }

    fn visit_mut_export_named_specifier(&mut self, specifier: &mut ExportNamedSpecifier) {
        let ModuleExportName::Ident(orig) = &mut specifier.orig else {
            specifier.visit_mut_children_with(self);
            return;
        };
        let hit = self.take();
        specifier.exported.visit_mut_with(self);
        if hit.is_none() {
            return;
        }
        if specifier.exported.is_none() {
            specifier.exported = Some(ModuleExportName::Ident(orig.clone()));
            self.added_idents = true;
        }
        orig.sym = self.new_name.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::printer::print_module;

    fn rename_in(code: &str, from: &str, to: &str) -> Result<String, RenameError> {
        let mut parsed = parse(code).unwrap();
        let mut graph = ScopeGraph::build(&parsed.module);
        let binding = graph.bindings_named(from)[0];
        rename(&mut parsed.module, &mut graph, binding, to)?;
        Ok(print_module(&parsed.module, &parsed.source_map).unwrap())
    }

    #[test]
    fn renames_declaration_references_and_writes() {
        let code = rename_in("var a = 1; a++; a = a + 2; [a] = [3];", "a", "count").unwrap();
        assert!(code.contains("var count = 1;"));
        assert!(code.contains("count++;"));
        assert!(code.contains("count = count + 2;"));
        assert!(code.contains("[count] ="));
        assert!(!code.contains(" a"));
    }

    #[test]
    fn leaves_shadowing_binding_alone() {
        let code = rename_in("let a = 1; function f(a) { return a; } a;", "a", "b").unwrap();
        assert!(code.contains("let b = 1;"));
        assert!(code.contains("function f(a)"));
        assert!(code.contains("return a;"));
        assert!(code.contains("b;"));
    }

    #[test]
    fn expands_shorthand_properties() {
        let code = rename_in("var x = 1; var o = { x }; var { x: y } = o;", "x", "z").unwrap();
        assert!(code.contains("x: z"));
    }

    #[test]
    fn expands_shorthand_patterns_with_defaults() {
        let code = rename_in("let { a = 1 } = obj; use(a);", "a", "b").unwrap();
        assert!(code.contains("a: b = 1"));
        assert!(code.contains("use(b)"));
    }

    #[test]
    fn rejects_collision_in_same_scope() {
        let err = rename_in("var a = 1, b = 2;", "a", "b").unwrap_err();
        assert_eq!(err, RenameError::Collision { name: "b".into() });
    }

    #[test]
    fn rejects_capturing_outer_reference() {
        let err = rename_in("var b = 1; function f() { var a = 2; return b; }", "a", "b").unwrap_err();
        assert_eq!(err, RenameError::Collision { name: "b".into() });

        let err = rename_in("function f() { var a = 2; return console; }", "a", "console").unwrap_err();
        assert_eq!(err, RenameError::Collision { name: "console".into() });
    }

    #[test]
    fn rejects_shadowed_site() {
        let err = rename_in("var a = 1; function f() { var b; return a; }", "a", "b").unwrap_err();
        assert_eq!(err, RenameError::Collision { name: "b".into() });
    }

    #[test]
    fn rejects_invalid_names() {
        let err = rename_in("var a;", "a", "class").unwrap_err();
        assert!(matches!(err, RenameError::InvalidName { .. }));
    }

    #[test]
    fn dynamic_sites_are_fatal() {
        let err = rename_in("var a; with (o) { a; }", "a", "b").unwrap_err();
        let RenameError::UnexpectedSite { preview, .. } = err else {
            panic!("expected unexpected site error");
        };
        assert_eq!(preview, "a;");
    }

    #[test]
    fn jsx_tags_stay_capitalized() {
        let err = rename_in("const A = 1; <A />;", "A", "b").unwrap_err();
        assert!(matches!(err, RenameError::LowercaseJsxName { .. }));
        let code = rename_in("const A = 1; <A />;", "A", "B").unwrap();
        assert!(code.contains("<B />") || code.contains("<B/>"));
    }

    #[test]
    fn import_and_export_specifiers_keep_external_names() {
        let mut parsed = parse("import { a } from 'm'; export { a };").unwrap();
        let mut graph = ScopeGraph::build(&parsed.module);
        let a = graph.bindings_named("a")[0];
        rename(&mut parsed.module, &mut graph, a, "b").unwrap();
        let code = print_module(&parsed.module, &parsed.source_map).unwrap();
        assert!(code.contains("import { a as b }"));
        assert!(code.contains("export { b as a }"));
        assert!(graph.is_stale());

        let err = rename(&mut parsed.module, &mut graph, a, "c").unwrap_err();
        assert_eq!(err, RenameError::StaleGraph);
    }

    #[test]
    fn unique_names_append_counter() {
        let parsed = parse("var a = 1, x = 2, x2 = 3;").unwrap();
        let graph = ScopeGraph::build(&parsed.module);
        let a = graph.bindings_named("a")[0];
        assert_eq!(generate_unique_name(&graph, a, "x"), "x3");
        assert_eq!(generate_unique_name(&graph, a, "fresh"), "fresh");
        assert_eq!(generate_unique_name(&graph, a, "default"), "_default");
    }

    #[test]
    fn parameters_rename_positionally() {
        let mut parsed = parse("(function (a, b, c) { return a + b + c; });").unwrap();
        let mut graph = ScopeGraph::build(&parsed.module);
        let scope = graph.binding(graph.bindings_named("a")[0]).scope;
        rename_parameters(&mut parsed.module, &mut graph, scope, &["module", "exports"]).unwrap();
        let code = print_module(&parsed.module, &parsed.source_map).unwrap();
        assert!(code.contains("(module, exports, c)"));
        assert!(code.contains("return module + exports + c;"));
    }
}

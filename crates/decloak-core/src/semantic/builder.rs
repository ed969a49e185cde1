//! Scope builder
//!
//! Walks a module once, collecting declarations into the binding table and
//! every other identifier occurrence as a pending site. Pending sites are
//! resolved after the walk so that hoisted declarations are visible to uses
//! that precede them.

use swc_common::Span;
use swc_ecma_ast::{
    ArrayPat, ArrowExpr, AssignExpr, AssignTarget, AssignTargetPat, BlockStmt, BlockStmtOrExpr,
    BreakStmt, CatchClause, Class, ClassDecl, ClassExpr, Constructor, ContinueStmt, DefaultDecl,
    ExportDefaultDecl, ExportSpecifier, Expr, FnDecl, FnExpr, ForHead, ForInStmt, ForOfStmt,
    ForStmt, Function, GetterProp, Ident, ImportDecl, ImportSpecifier, JSXElementName,
    LabeledStmt, Module, ModuleExportName, NamedExport, ObjectPat, ObjectPatProp,
    ParamOrTsParamProp, Pat, Prop, SetterProp, SimpleAssignTarget, SwitchStmt, UpdateExpr,
    VarDecl, VarDeclKind, WithStmt,
};
use swc_ecma_visit::{Visit, VisitWith};

use super::ScopeGraph;
use super::binding::{BindingKind, BindingTable, Site, SiteKind, SiteShape, UnresolvedSite};
use super::node_id::IdentIndex;
use super::scope::{ScopeId, ScopeKind, ScopeTree};
use crate::helpers::unparen;

/// How identifiers inside a pattern are bound.
#[derive(Debug, Clone, Copy)]
enum Binder {
    Declare(BindingKind, ScopeId),
    Write(SiteKind),
}

struct PendingSite {
    name: String,
    site: Site,
}

pub struct ScopeBuilder {
    index: IdentIndex,
    scopes: ScopeTree,
    bindings: BindingTable,
    current: ScopeId,
    dynamic_depth: u32,
    pending: Vec<PendingSite>,
}

impl ScopeBuilder {
    pub fn build(module: &Module) -> ScopeGraph {
        let mut scopes = ScopeTree::new();
        let root = scopes.create_scope(ScopeKind::Global, None, module.span);
        let mut builder = Self {
            index: IdentIndex::build(module),
            scopes,
            bindings: BindingTable::new(),
            current: root,
            dynamic_depth: 0,
            pending: Vec::new(),
        };
        module.visit_children_with(&mut builder);
        builder.finish(root)
    }

    fn finish(mut self, root: ScopeId) -> ScopeGraph {
        let mut unresolved = Vec::new();
        for PendingSite { name, site } in std::mem::take(&mut self.pending) {
            match self.bindings.lookup(&name, site.scope, &self.scopes) {
                Some(binding) => self.bindings.add_site(binding, site),
                None => unresolved.push(UnresolvedSite { name, site }),
            }
        }
        tracing::trace!(
            scopes = self.scopes.len(),
            bindings = self.bindings.len(),
            unresolved = unresolved.len(),
            "built scope graph"
        );
        ScopeGraph::from_parts(self.scopes, self.bindings, unresolved, root, self.index.len())
    }

    fn enter(&mut self, kind: ScopeKind, span: Span) -> ScopeId {
        let parent = self.current;
        self.current = self.scopes.create_scope(kind, Some(parent), span);
        parent
    }

    fn leave(&mut self, parent: ScopeId) {
        self.current = parent;
    }

    fn site(&self, ident: &Ident, kind: SiteKind, shape: SiteShape) -> Option<Site> {
        let node = self.index.get(ident)?;
        let kind = if self.dynamic_depth > 0 {
            SiteKind::Dynamic
        } else {
            kind
        };
        Some(Site {
            node,
            scope: self.current,
            kind,
            shape,
            span: ident.span,
        })
    }

    fn declare(&mut self, ident: &Ident, kind: BindingKind, scope: ScopeId, shape: SiteShape) {
        if let Some(site) = self.site(ident, SiteKind::Declaration, shape) {
            self.bindings.declare(&ident.sym, kind, scope, site);
        }
    }

    fn reference(&mut self, ident: &Ident, kind: SiteKind, shape: SiteShape) {
        if let Some(site) = self.site(ident, kind, shape) {
            self.pending.push(PendingSite {
                name: ident.sym.to_string(),
                site,
            });
        }
    }

    fn bind_ident(&mut self, ident: &Ident, binder: Binder, shape: SiteShape) {
        match binder {
            Binder::Declare(kind, scope) => self.declare(ident, kind, scope, shape),
            Binder::Write(kind) => self.reference(ident, kind, shape),
        }
    }

    fn bind_pat(&mut self, pat: &Pat, binder: Binder) {
        match pat {
            Pat::Ident(binding) => self.bind_ident(&binding.id, binder, SiteShape::Plain),
            Pat::Array(array) => self.bind_array_pat(array, binder),
            Pat::Object(object) => self.bind_object_pat(object, binder),
            Pat::Rest(rest) => self.bind_pat(&rest.arg, binder),
            Pat::Assign(assign) => {
                self.bind_pat(&assign.left, binder);
                assign.right.visit_with(self);
            }
            Pat::Expr(expr) => match unparen(expr) {
                Expr::Ident(ident) => self.bind_ident(ident, binder, SiteShape::Plain),
                other => other.visit_with(self),
            },
            Pat::Invalid(_) => {}
        }
    }

    fn bind_array_pat(&mut self, array: &ArrayPat, binder: Binder) {
        for elem in array.elems.iter().flatten() {
            self.bind_pat(elem, binder);
        }
    }

    fn bind_object_pat(&mut self, object: &ObjectPat, binder: Binder) {
        for prop in &object.props {
            match prop {
                ObjectPatProp::KeyValue(kv) => {
                    kv.key.visit_with(self);
                    self.bind_pat(&kv.value, binder);
                }
                ObjectPatProp::Assign(assign) => {
                    self.bind_ident(&assign.key.id, binder, SiteShape::ShorthandPattern);
                    assign.value.visit_with(self);
                }
                ObjectPatProp::Rest(rest) => self.bind_pat(&rest.arg, binder),
            }
        }
    }

    fn declare_params<'a>(&mut self, params: impl Iterator<Item = &'a Pat>, scope: ScopeId) {
        for (index, pat) in params.enumerate() {
            let kind = BindingKind::Param {
                index: index as u32,
                simple: matches!(pat, Pat::Ident(_)),
            };
            self.bind_pat(pat, Binder::Declare(kind, scope));
        }
    }
}

impl Visit for ScopeBuilder {
    fn visit_ident(&mut self, ident: &Ident) {
        self.reference(ident, SiteKind::Read, SiteShape::Plain);
    }

    fn visit_var_decl(&mut self, decl: &VarDecl) {
        let (kind, scope) = match decl.kind {
            VarDeclKind::Var => (BindingKind::Var, self.scopes.var_scope(self.current)),
            VarDeclKind::Let => (BindingKind::Let, self.current),
            VarDeclKind::Const => (BindingKind::Const, self.current),
        };
        for declarator in &decl.decls {
            self.bind_pat(&declarator.name, Binder::Declare(kind, scope));
            declarator.init.visit_with(self);
        }
    }

    fn visit_fn_decl(&mut self, decl: &FnDecl) {
        self.declare(&decl.ident, BindingKind::Function, self.current, SiteShape::Plain);
        decl.function.visit_with(self);
    }

    fn visit_fn_expr(&mut self, expr: &FnExpr) {
        match &expr.ident {
            Some(ident) => {
                let parent = self.enter(ScopeKind::Block, expr.function.span);
                self.declare(ident, BindingKind::ExprName, self.current, SiteShape::Plain);
                expr.function.visit_with(self);
                self.leave(parent);
            }
            None => expr.function.visit_with(self),
        }
    }

    fn visit_function(&mut self, function: &Function) {
        function.decorators.visit_with(self);
        let parent = self.enter(ScopeKind::Function, function.span);
        self.declare_params(function.params.iter().map(|p| &p.pat), self.current);
        if let Some(body) = &function.body {
            body.stmts.visit_with(self);
        }
        self.leave(parent);
    }

    fn visit_arrow_expr(&mut self, arrow: &ArrowExpr) {
        let parent = self.enter(ScopeKind::ArrowFunction, arrow.span);
        self.declare_params(arrow.params.iter(), self.current);
        match &*arrow.body {
            BlockStmtOrExpr::BlockStmt(block) => block.stmts.visit_with(self),
            BlockStmtOrExpr::Expr(expr) => expr.visit_with(self),
        }
        self.leave(parent);
    }

    fn visit_constructor(&mut self, ctor: &Constructor) {
        ctor.key.visit_with(self);
        let parent = self.enter(ScopeKind::Function, ctor.span);
        let params = ctor.params.iter().filter_map(|param| match param {
            ParamOrTsParamProp::Param(param) => Some(&param.pat),
            ParamOrTsParamProp::TsParamProp(_) => None,
        });
        self.declare_params(params, self.current);
        if let Some(body) = &ctor.body {
            body.stmts.visit_with(self);
        }
        self.leave(parent);
    }

    fn visit_getter_prop(&mut self, prop: &GetterProp) {
        prop.key.visit_with(self);
        let parent = self.enter(ScopeKind::Function, prop.span);
        if let Some(body) = &prop.body {
            body.stmts.visit_with(self);
        }
        self.leave(parent);
    }

    fn visit_setter_prop(&mut self, prop: &SetterProp) {
        prop.key.visit_with(self);
        let parent = self.enter(ScopeKind::Function, prop.span);
        self.declare_params(std::iter::once(&*prop.param), self.current);
        if let Some(body) = &prop.body {
            body.stmts.visit_with(self);
        }
        self.leave(parent);
    }

    fn visit_class_decl(&mut self, decl: &ClassDecl) {
        self.declare(&decl.ident, BindingKind::Class, self.current, SiteShape::Plain);
        decl.class.visit_with(self);
    }

    fn visit_class_expr(&mut self, expr: &ClassExpr) {
        match &expr.ident {
            Some(ident) => {
                let parent = self.enter(ScopeKind::Class, expr.class.span);
                self.declare(ident, BindingKind::ExprName, self.current, SiteShape::Plain);
                expr.class.visit_with(self);
                self.leave(parent);
            }
            None => expr.class.visit_with(self),
        }
    }

    fn visit_class(&mut self, class: &Class) {
        class.decorators.visit_with(self);
        class.super_class.visit_with(self);
        let parent = self.enter(ScopeKind::Class, class.span);
        class.body.visit_with(self);
        self.leave(parent);
    }

    fn visit_block_stmt(&mut self, block: &BlockStmt) {
        let parent = self.enter(ScopeKind::Block, block.span);
        block.stmts.visit_with(self);
        self.leave(parent);
    }

    fn visit_for_stmt(&mut self, stmt: &ForStmt) {
        let parent = self.enter(ScopeKind::For, stmt.span);
        stmt.visit_children_with(self);
        self.leave(parent);
    }

    fn visit_for_in_stmt(&mut self, stmt: &ForInStmt) {
        let parent = self.enter(ScopeKind::For, stmt.span);
        stmt.visit_children_with(self);
        self.leave(parent);
    }

    fn visit_for_of_stmt(&mut self, stmt: &ForOfStmt) {
        let parent = self.enter(ScopeKind::For, stmt.span);
        stmt.visit_children_with(self);
        self.leave(parent);
    }

    fn visit_for_head(&mut self, head: &ForHead) {
        match head {
            ForHead::Pat(pat) => self.bind_pat(pat, Binder::Write(SiteKind::ForHead)),
            _ => head.visit_children_with(self),
        }
    }

    fn visit_switch_stmt(&mut self, stmt: &SwitchStmt) {
        stmt.discriminant.visit_with(self);
        let parent = self.enter(ScopeKind::Switch, stmt.span);
        stmt.cases.visit_with(self);
        self.leave(parent);
    }

    fn visit_catch_clause(&mut self, clause: &CatchClause) {
        let parent = self.enter(ScopeKind::Catch, clause.span);
        if let Some(param) = &clause.param {
            self.bind_pat(param, Binder::Declare(BindingKind::CatchParam, self.current));
        }
        clause.body.stmts.visit_with(self);
        self.leave(parent);
    }

    fn visit_with_stmt(&mut self, stmt: &WithStmt) {
        stmt.obj.visit_with(self);
        let parent = self.enter(ScopeKind::With, stmt.span);
        self.dynamic_depth += 1;
        stmt.body.visit_with(self);
        self.dynamic_depth -= 1;
        self.leave(parent);
    }

    fn visit_labeled_stmt(&mut self, stmt: &LabeledStmt) {
        stmt.body.visit_with(self);
    }

    fn visit_break_stmt(&mut self, _: &BreakStmt) {}

    fn visit_continue_stmt(&mut self, _: &ContinueStmt) {}

    fn visit_assign_expr(&mut self, expr: &AssignExpr) {
        match &expr.left {
            AssignTarget::Simple(SimpleAssignTarget::Ident(binding)) => {
                self.reference(&binding.id, SiteKind::Assignment, SiteShape::Plain);
            }
            AssignTarget::Simple(target) => target.visit_with(self),
            AssignTarget::Pat(AssignTargetPat::Array(array)) => {
                self.bind_array_pat(array, Binder::Write(SiteKind::Pattern));
            }
            AssignTarget::Pat(AssignTargetPat::Object(object)) => {
                self.bind_object_pat(object, Binder::Write(SiteKind::Pattern));
            }
            AssignTarget::Pat(AssignTargetPat::Invalid(_)) => {}
        }
        expr.right.visit_with(self);
    }

    fn visit_update_expr(&mut self, expr: &UpdateExpr) {
        match unparen(&expr.arg) {
            Expr::Ident(ident) => self.reference(ident, SiteKind::Update, SiteShape::Plain),
            _ => expr.arg.visit_with(self),
        }
    }

    fn visit_prop(&mut self, prop: &Prop) {
        match prop {
            Prop::Shorthand(ident) => {
                self.reference(ident, SiteKind::Read, SiteShape::ShorthandProp);
            }
            _ => prop.visit_children_with(self),
        }
    }

    fn visit_import_decl(&mut self, decl: &ImportDecl) {
        for specifier in &decl.specifiers {
            match specifier {
                ImportSpecifier::Named(named) => {
                    let shape = if named.imported.is_none() {
                        SiteShape::ImportSpecifier
                    } else {
                        SiteShape::Plain
                    };
                    self.declare(&named.local, BindingKind::Import, self.current, shape);
                }
                ImportSpecifier::Default(default) => {
                    self.declare(&default.local, BindingKind::Import, self.current, SiteShape::Plain);
                }
                ImportSpecifier::Namespace(namespace) => {
                    self.declare(&namespace.local, BindingKind::Import, self.current, SiteShape::Plain);
                }
            }
        }
    }

    fn visit_named_export(&mut self, export: &NamedExport) {
        // Re-exports name another module's bindings.
        if export.src.is_some() {
            return;
        }
        for specifier in &export.specifiers {
            if let ExportSpecifier::Named(named) = specifier {
                if let ModuleExportName::Ident(orig) = &named.orig {
                    let shape = if named.exported.is_none() {
                        SiteShape::ExportSpecifier
                    } else {
                        SiteShape::Plain
                    };
                    self.reference(orig, SiteKind::Read, shape);
                }
            }
        }
    }

    fn visit_export_default_decl(&mut self, export: &ExportDefaultDecl) {
        match &export.decl {
            DefaultDecl::Fn(expr) => {
                if let Some(ident) = &expr.ident {
                    self.declare(ident, BindingKind::Function, self.current, SiteShape::Plain);
                }
                expr.function.visit_with(self);
            }
            DefaultDecl::Class(expr) => {
                if let Some(ident) = &expr.ident {
                    self.declare(ident, BindingKind::Class, self.current, SiteShape::Plain);
                }
                expr.class.visit_with(self);
            }
            DefaultDecl::TsInterfaceDecl(_) => {}
        }
    }

    fn visit_jsx_element_name(&mut self, name: &JSXElementName) {
        match name {
            // Lowercase tags are intrinsic elements, not references.
            JSXElementName::Ident(ident) => {
                if !ident.sym.starts_with(|c: char| c.is_ascii_lowercase()) {
                    self.reference(ident, SiteKind::Read, SiteShape::JsxName);
                }
            }
            _ => name.visit_children_with(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::parser::parse;
    use crate::semantic::binding::{BindingKind, SiteKind, SiteShape};
    use crate::semantic::scope::ScopeKind;
    use crate::semantic::ScopeGraph;

    fn build(code: &str) -> ScopeGraph {
        let parsed = parse(code).unwrap();
        ScopeGraph::build(&parsed.module)
    }

    fn only(graph: &ScopeGraph, name: &str) -> crate::semantic::BindingId {
        let named = graph.bindings_named(name);
        assert_eq!(named.len(), 1, "expected exactly one binding named {name}");
        named[0]
    }

    #[test]
    fn var_hoists_to_function_scope() {
        let graph = build("function f() { if (x) { var a = 1; } return a; }");
        let a = graph.binding(only(&graph, "a"));
        assert_eq!(a.kind, BindingKind::Var);
        assert_eq!(graph.scopes().get(a.scope).kind, ScopeKind::Function);
        assert_eq!(a.references.len(), 1);
    }

    #[test]
    fn uses_before_declaration_resolve() {
        let graph = build("g(); function g() {}");
        let g = graph.binding(only(&graph, "g"));
        assert_eq!(g.kind, BindingKind::Function);
        assert_eq!(g.references.len(), 1);
        assert!(graph.unresolved().is_empty());
    }

    #[test]
    fn let_shadows_outer_binding() {
        let graph = build("let a = 1; { let a = 2; a; } a;");
        let named = graph.bindings_named("a");
        assert_eq!(named.len(), 2);
        for id in named {
            assert_eq!(graph.binding(id).references.len(), 1);
        }
    }

    #[test]
    fn writes_are_violations() {
        let graph = build("var a = 0; a = 1; a++; [a] = [2]; ({ a } = { a: 3 }); for (a in o);");
        let a = graph.binding(only(&graph, "a"));
        let kinds: Vec<SiteKind> = a.violations.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                SiteKind::Assignment,
                SiteKind::Update,
                SiteKind::Pattern,
                SiteKind::Pattern,
                SiteKind::ForHead,
            ]
        );
        assert_eq!(a.violations[3].shape, SiteShape::ShorthandPattern);
        assert!(a.references.is_empty());
    }

    #[test]
    fn parameters_record_positions() {
        let graph = build("function f(a, { b }, ...c) { return a + b + c; }");
        let b = graph.binding(only(&graph, "b"));
        assert_eq!(b.kind, BindingKind::Param { index: 1, simple: false });
        let c = graph.binding(only(&graph, "c"));
        assert_eq!(c.kind, BindingKind::Param { index: 2, simple: false });
        assert_eq!(graph.parameter(c.scope, 0), Some(only(&graph, "a")));
    }

    #[test]
    fn function_expression_name_is_local() {
        let graph = build("var x = function fact(n) { return fact(n - 1); }; fact;");
        let fact = graph.binding(only(&graph, "fact"));
        assert_eq!(fact.kind, BindingKind::ExprName);
        assert_eq!(fact.references.len(), 1);
        assert_eq!(graph.unresolved().len(), 1);
    }

    #[test]
    fn labels_and_properties_are_not_references() {
        let graph = build("outer: for (;;) { break outer; } o.p; ({ q: 1 });");
        let names: Vec<&str> = graph.unresolved().iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["o"]);
    }

    #[test]
    fn with_body_sites_are_dynamic() {
        let graph = build("var x = 1; with (obj) { x; }");
        let x = graph.binding(only(&graph, "x"));
        assert_eq!(x.references[0].kind, SiteKind::Dynamic);
    }

    #[test]
    fn module_specifier_shapes() {
        let graph = build("import { a, b as c } from 'm'; export { a, c as d };");
        let a = graph.binding(only(&graph, "a"));
        assert_eq!(a.declaration.shape, SiteShape::ImportSpecifier);
        assert_eq!(a.references[0].shape, SiteShape::ExportSpecifier);
        let c = graph.binding(only(&graph, "c"));
        assert_eq!(c.declaration.shape, SiteShape::Plain);
        assert_eq!(c.references[0].shape, SiteShape::Plain);
        assert!(graph.bindings_named("b").is_empty());
    }

    #[test]
    fn jsx_component_names_are_references() {
        let graph = build("const Foo = 1; <Foo><div /></Foo>;");
        let foo = graph.binding(only(&graph, "Foo"));
        assert_eq!(foo.references.len(), 2);
        assert!(foo.references.iter().all(|s| s.shape == SiteShape::JsxName));
        assert!(graph.unresolved().is_empty());
    }

    #[test]
    fn duplicate_var_is_redeclaration() {
        let graph = build("var a = 1; var a = 2;");
        let a = graph.binding(only(&graph, "a"));
        assert_eq!(a.violations.len(), 1);
        assert_eq!(a.violations[0].kind, SiteKind::Redeclaration);
    }
}

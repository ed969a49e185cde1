//! Bundle unpacking
//!
//! Recognizes a webpack or browserify runtime, lifts every module factory out
//! of it, normalizes the runtime helpers inside each factory and prints the
//! factory body as a module of its own. Static `require` calls become the
//! edges of a [`ModuleGraph`].

mod browserify;
pub mod graph;
pub mod runtime;
mod webpack;

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use swc_common::sync::Lrc;
use swc_common::{DUMMY_SP, SourceMap};
use swc_ecma_ast::{BlockStmtOrExpr, Callee, Expr, Ident, Module, ModuleItem, ParenExpr, Pat, Stmt};
use swc_ecma_visit::{Visit, VisitWith};
use tracing::{debug, info};

use crate::factory;
use crate::helpers::{binding_ident_name, unparen};
use crate::printer::{PrintError, print_stmts};
use crate::rename::rename_unique;
use crate::semantic::{BindingId, BindingKey, IdentIndex, NodeId, ScopeGraph};
use crate::transforms::{Pipeline, TransformContext};

pub use graph::ModuleGraph;
pub use runtime::{Global, HasOwnProperty, NamespaceObject, RequirePath};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(untagged)]
pub enum ModuleId {
    Number(u64),
    Name(String),
}

impl ModuleId {
    /// `"12"` is a number, `"012"` and `"./a.js"` are names.
    pub fn from_key(key: &str) -> Self {
        match key.parse::<u64>() {
            Ok(n) if n.to_string() == key => ModuleId::Number(n),
            _ => ModuleId::Name(key.to_string()),
        }
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleId::Number(n) => write!(f, "{n}"),
            ModuleId::Name(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleKind {
    Webpack4,
    Webpack5,
    Browserify,
}

impl fmt::Display for BundleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BundleKind::Webpack4 => "webpack4",
            BundleKind::Webpack5 => "webpack5",
            BundleKind::Browserify => "browserify",
        })
    }
}

/// A module factory lifted out of the runtime.
#[derive(Debug, Clone)]
pub(crate) struct Factory {
    pub id: ModuleId,
    pub function: Expr,
    /// Names for the factory parameters, by position.
    pub params: &'static [&'static str],
    /// Browserify's per-module map from the required string to a module id.
    pub aliases: BTreeMap<String, ModuleId>,
}

impl Factory {
    fn require_index(&self) -> Option<usize> {
        self.params.iter().position(|role| *role == "require")
    }

    fn resolve(&self, key: &str) -> ModuleId {
        match self.aliases.get(key) {
            Some(id) => id.clone(),
            None => ModuleId::from_key(key),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RawBundle {
    pub kind: BundleKind,
    pub entry: Option<ModuleId>,
    pub factories: Vec<Factory>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnpackedModule {
    pub id: ModuleId,
    /// Relative path, `/`-separated.
    pub path: String,
    pub is_entry: bool,
    pub dependencies: BTreeSet<ModuleId>,
    /// `require` calls whose argument is not a literal.
    pub dynamic_requires: usize,
    #[serde(skip)]
    pub code: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Bundle {
    pub kind: BundleKind,
    pub entry: Option<ModuleId>,
    pub modules: Vec<UnpackedModule>,
    pub graph: ModuleGraph,
}

/// The `bundle.json` written next to the modules.
#[derive(Debug, Clone, Serialize)]
pub struct Manifest<'a> {
    pub kind: BundleKind,
    pub entry: Option<&'a ModuleId>,
    pub modules: Vec<ManifestEntry<'a>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestEntry<'a> {
    pub id: &'a ModuleId,
    pub path: &'a str,
    pub dependencies: &'a BTreeSet<ModuleId>,
    pub entry: bool,
}

impl Bundle {
    pub fn module(&self, id: &ModuleId) -> Option<&UnpackedModule> {
        self.modules.iter().find(|module| module.id == *id)
    }

    pub fn manifest(&self) -> Manifest<'_> {
        Manifest {
            kind: self.kind,
            entry: self.entry.as_ref(),
            modules: self
                .modules
                .iter()
                .map(|module| ManifestEntry {
                    id: &module.id,
                    path: &module.path,
                    dependencies: &module.dependencies,
                    entry: module.is_entry,
                })
                .collect(),
        }
    }
}

/// Recognizes a bundle runtime in `module`.
pub(crate) fn detect(module: &Module) -> Option<RawBundle> {
    webpack::detect(module).or_else(|| browserify::detect(module))
}

/// Unpacks the bundle in `module`, if there is one. The module itself is not
/// changed.
pub fn unpack(
    module: &Module,
    source_map: &Lrc<SourceMap>,
    ctx: &mut TransformContext,
) -> Result<Option<Bundle>, PrintError> {
    let Some(raw) = detect(module) else {
        return Ok(None);
    };
    info!(kind = %raw.kind, modules = raw.factories.len(), "bundle found");
    ctx.info(format!("{} bundle with {} modules", raw.kind, raw.factories.len()));

    let paths = assign_paths(&raw);
    let mut modules = Vec::with_capacity(raw.factories.len());
    for factory in &raw.factories {
        let path = paths.get(&factory.id).cloned().unwrap_or_default();
        let mut unpacked = unpack_factory(factory, &path, &paths, source_map, ctx)?;
        unpacked.is_entry = raw.entry.as_ref() == Some(&factory.id);
        modules.push(unpacked);
    }

    let mut graph = ModuleGraph::new();
    for module in &modules {
        graph.add_module(module.id.clone());
    }
    for module in &modules {
        for dependency in module.dependencies.iter().filter(|id| paths.contains_key(id)) {
            graph.add_dependency(module.id.clone(), dependency.clone());
        }
    }
    if graph.has_cycle() {
        debug!(cycles = graph.cycles().len(), "module graph has cycles");
    }

    Ok(Some(Bundle {
        kind: raw.kind,
        entry: raw.entry,
        modules,
        graph,
    }))
}

fn unpack_factory(
    factory: &Factory,
    path: &str,
    paths: &BTreeMap<ModuleId, String>,
    source_map: &Lrc<SourceMap>,
    ctx: &mut TransformContext,
) -> Result<UnpackedModule, PrintError> {
    let mut sub = Module {
        span: DUMMY_SP,
        body: vec![ModuleItem::Stmt(factory::expr_stmt(Expr::Paren(ParenExpr {
            span: DUMMY_SP,
            expr: Box::new(factory.function.clone()),
        })))],
        shebang: None,
    };

    let require = factory
        .require_index()
        .and_then(|index| param_key(&sub, index));
    let requires = require
        .as_ref()
        .map(|key| collect_requires(&sub, key))
        .unwrap_or_default();

    let mut dependencies = BTreeSet::new();
    let mut rewrites = BTreeMap::new();
    for key in &requires.keys {
        let id = factory.resolve(key);
        if let Some(target) = paths.get(&id) {
            rewrites.insert(key.clone(), relative_path(path, target));
        }
        dependencies.insert(id);
    }

    if require.is_some() {
        let pipeline = Pipeline::from_transforms(vec![
            Box::new(HasOwnProperty::new()),
            Box::new(Global::new()),
            Box::new(NamespaceObject::new()),
            Box::new(RequirePath::new(rewrites)),
        ]);
        let report = ctx.run_nested(&pipeline, &mut sub, require);
        debug!(module = %factory.id, changes = report.changes, "normalized module");
    }

    for (index, role) in factory.params.iter().enumerate() {
        let Some(key) = param_key(&sub, index) else {
            continue;
        };
        let mut graph = ScopeGraph::build(&sub);
        let Some(binding) = graph.resolve_key(&key) else {
            continue;
        };
        if let Err(err) = rename_unique(&mut sub, &mut graph, binding, role) {
            ctx.warn(format!("module {}: cannot rename `{}`: {err}", factory.id, key.name), None);
        }
    }

    let code = print_stmts(body_of(sub), source_map)?;
    Ok(UnpackedModule {
        id: factory.id.clone(),
        path: path.to_string(),
        is_entry: false,
        dependencies,
        dynamic_requires: requires.dynamic,
        code,
    })
}

fn function_of(sub: &Module) -> Option<&Expr> {
    match sub.body.first()? {
        ModuleItem::Stmt(Stmt::Expr(stmt)) => Some(unparen(&stmt.expr)),
        _ => None,
    }
}

fn param_ident(function: &Expr, index: usize) -> Option<&Ident> {
    let pat: &Pat = match function {
        Expr::Fn(f) => &f.function.params.get(index)?.pat,
        Expr::Arrow(arrow) => arrow.params.get(index)?,
        _ => return None,
    };
    binding_ident_name(pat)
}

/// Key of the simple parameter at `index` of the factory in `sub`.
fn param_key(sub: &Module, index: usize) -> Option<BindingKey> {
    let ident = param_ident(function_of(sub)?, index)?;
    let node = IdentIndex::build(sub).get(ident)?;
    let graph = ScopeGraph::build(sub);
    let binding: BindingId = graph.binding_at(node)?;
    Some(graph.key(binding))
}

fn body_of(sub: Module) -> Vec<Stmt> {
    let Some(ModuleItem::Stmt(Stmt::Expr(stmt))) = sub.body.into_iter().next() else {
        return Vec::new();
    };
    let function = match *stmt.expr {
        Expr::Paren(paren) => *paren.expr,
        expr => expr,
    };
    match function {
        Expr::Fn(f) => f.function.body.map(|body| body.stmts).unwrap_or_default(),
        Expr::Arrow(arrow) => match *arrow.body {
            BlockStmtOrExpr::BlockStmt(block) => block.stmts,
            BlockStmtOrExpr::Expr(expr) => vec![factory::expr_stmt(*expr)],
        },
        _ => Vec::new(),
    }
}

#[derive(Debug, Default)]
struct Requires {
    /// Literal arguments, as written.
    keys: BTreeSet<String>,
    dynamic: usize,
}

struct RequireCollector<'a> {
    index: &'a IdentIndex,
    refs: &'a HashSet<NodeId>,
    found: Requires,
}

impl Visit for RequireCollector<'_> {
    fn visit_expr(&mut self, expr: &Expr) {
        if let Expr::Call(call) = expr {
            if let Callee::Expr(callee) = &call.callee {
                if let Expr::Ident(callee) = unparen(callee) {
                    if self.index.get(callee).is_some_and(|node| self.refs.contains(&node)) {
                        match runtime::require_argument(expr) {
                            Some((_, key)) => {
                                self.found.keys.insert(key);
                            }
                            None => self.found.dynamic += 1,
                        }
                    }
                }
            }
        }
        expr.visit_children_with(self);
    }
}

fn collect_requires(sub: &Module, require: &BindingKey) -> Requires {
    let graph = ScopeGraph::build(sub);
    let Some(binding) = graph.resolve_key(require) else {
        return Requires::default();
    };
    let refs: HashSet<NodeId> = graph.binding(binding).references.iter().map(|site| site.node).collect();
    let index = IdentIndex::build(sub);
    let mut collector = RequireCollector {
        index: &index,
        refs: &refs,
        found: Requires::default(),
    };
    sub.visit_with(&mut collector);
    collector.found
}

/// Maps every module to a unique relative path. The entry takes `index.js`
/// unless another module already claims it.
fn assign_paths(raw: &RawBundle) -> BTreeMap<ModuleId, String> {
    let natural = |id: &ModuleId| match id {
        ModuleId::Number(n) => format!("{n}.js"),
        ModuleId::Name(name) => sanitize_path(name),
    };
    let index_taken = raw
        .factories
        .iter()
        .any(|f| raw.entry.as_ref() != Some(&f.id) && natural(&f.id) == "index.js");

    let mut used = HashSet::new();
    let mut paths = BTreeMap::new();
    for factory in &raw.factories {
        let base = if raw.entry.as_ref() == Some(&factory.id) && !index_taken {
            "index.js".to_string()
        } else {
            natural(&factory.id)
        };
        let mut path = base.clone();
        let mut counter = 2;
        while !used.insert(path.clone()) {
            path = with_suffix(&base, counter);
            counter += 1;
        }
        paths.insert(factory.id.clone(), path);
    }
    paths
}

fn with_suffix(path: &str, counter: u32) -> String {
    let (dir, file) = path.rsplit_once('/').map_or(("", path), |(d, f)| (d, f));
    let file = match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}-{counter}.{ext}"),
        _ => format!("{file}-{counter}"),
    };
    if dir.is_empty() { file } else { format!("{dir}/{file}") }
}

static UNSAFE_PATH_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._@+-]").expect("Invalid regex pattern"));

/// Turns a module name into a relative path that stays below the output
/// directory.
pub fn sanitize_path(name: &str) -> String {
    let segments: Vec<String> = name
        .split(['/', '\\'])
        .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
        .map(|segment| UNSAFE_PATH_CHARS.replace_all(segment, "_").into_owned())
        .collect();
    let mut path = if segments.is_empty() {
        "module".to_string()
    } else {
        segments.join("/")
    };
    let file = path.rsplit('/').next().unwrap_or_default();
    if !file.contains('.') {
        path.push_str(".js");
    }
    path
}

/// The `require` specifier that reaches `to` from the module at `from`.
pub fn relative_path(from: &str, to: &str) -> String {
    let mut from_dir: Vec<&str> = from.split('/').collect();
    from_dir.pop();
    let target: Vec<&str> = to.split('/').collect();
    let common = from_dir
        .iter()
        .zip(&target)
        .take_while(|(a, b)| a == b)
        .count()
        .min(target.len().saturating_sub(1));
    let ups = from_dir.len() - common;
    let rest = target[common..].join("/");
    if ups == 0 {
        format!("./{rest}")
    } else {
        format!("{}{rest}", "../".repeat(ups))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn run(code: &str) -> Bundle {
        let parsed = parse(code).unwrap();
        let mut ctx = TransformContext::new(None);
        unpack(&parsed.module, &parsed.source_map, &mut ctx).unwrap().unwrap()
    }

    #[test]
    fn module_ids() {
        assert_eq!(ModuleId::from_key("12"), ModuleId::Number(12));
        assert_eq!(ModuleId::from_key("012"), ModuleId::Name("012".to_string()));
        assert_eq!(ModuleId::from_key("./a.js"), ModuleId::Name("./a.js".to_string()));
        assert!(ModuleId::Number(9) < ModuleId::Name("0".to_string()));
    }

    #[test]
    fn sanitized_paths() {
        assert_eq!(sanitize_path("./src/index.js"), "src/index.js");
        assert_eq!(sanitize_path("../../etc/passwd"), "etc/passwd.js");
        assert_eq!(sanitize_path("/abs/a b.js"), "abs/a_b.js");
        assert_eq!(sanitize_path("lodash"), "lodash.js");
        assert_eq!(sanitize_path(".."), "module.js");
    }

    #[test]
    fn relative_paths() {
        assert_eq!(relative_path("index.js", "1.js"), "./1.js");
        assert_eq!(relative_path("src/index.js", "src/util.js"), "./util.js");
        assert_eq!(relative_path("src/a/b.js", "lib/c.js"), "../../lib/c.js");
        assert_eq!(relative_path("index.js", "src/util.js"), "./src/util.js");
    }

    #[test]
    fn path_collisions_get_suffixes() {
        let factory = |id: ModuleId| Factory {
            id,
            function: factory::null_lit(),
            params: &[],
            aliases: BTreeMap::new(),
        };
        let raw = RawBundle {
            kind: BundleKind::Webpack4,
            entry: Some(ModuleId::Number(0)),
            factories: vec![
                factory(ModuleId::Number(0)),
                factory(ModuleId::Name("index".to_string())),
                factory(ModuleId::Name("./a.js".to_string())),
                factory(ModuleId::Name("a.js".to_string())),
            ],
        };
        let paths = assign_paths(&raw);
        assert_eq!(paths[&ModuleId::Number(0)], "0.js");
        assert_eq!(paths[&ModuleId::Name("index".to_string())], "index.js");
        assert_eq!(paths[&ModuleId::Name("./a.js".to_string())], "a.js");
        assert_eq!(paths[&ModuleId::Name("a.js".to_string())], "a-2.js");
    }

    #[test]
    fn webpack4_modules() {
        let bundle = run(
            r#"
            !function (e) {
                function n(r) {
                    var o = { exports: {} };
                    return e[r].call(o.exports, o, o.exports, n), o.exports;
                }
                n(n.s = 1);
            }([
                function (e, t, n) { n.r(t); t.value = n.o(e, "id") ? n.g : null; },
                function (e, t, n) { var a = n(0); var b = n(x); console.log(a.value); }
            ]);
            "#,
        );
        assert_eq!(bundle.kind, BundleKind::Webpack4);
        let entry = bundle.module(&ModuleId::Number(1)).unwrap();
        assert!(entry.is_entry);
        assert_eq!(entry.path, "index.js");
        assert_eq!(entry.dependencies, BTreeSet::from([ModuleId::Number(0)]));
        assert_eq!(entry.dynamic_requires, 1);
        assert!(entry.code.contains("require(\"./0.js\")"), "{}", entry.code);
        assert!(entry.code.contains("require(x)"), "{}", entry.code);

        let dep = bundle.module(&ModuleId::Number(0)).unwrap();
        assert_eq!(dep.path, "0.js");
        assert!(!dep.code.contains(".r("), "{}", dep.code);
        assert!(dep.code.contains("Object.hasOwn(module"), "{}", dep.code);
        assert!(dep.code.contains("global"), "{}", dep.code);
        assert!(dep.code.contains("exports.value"), "{}", dep.code);

        assert_eq!(
            bundle.graph.dependencies(&ModuleId::Number(1)).collect::<Vec<_>>(),
            vec![&ModuleId::Number(0)]
        );
    }

    #[test]
    fn browserify_cycle_is_kept() {
        let bundle = run(
            r#"
            (function e(t, n, r) { return e; })({
                1: [function (require, module, exports) { require("./b"); }, { "./b": 2 }],
                2: [function (r, m, x) { r("./a"); m.exports = 2; }, { "./a": 1 }]
            }, {}, [1]);
            "#,
        );
        assert_eq!(bundle.kind, BundleKind::Browserify);
        assert!(bundle.graph.has_cycle());
        let b = bundle.module(&ModuleId::Number(2)).unwrap();
        assert!(b.code.contains("require(\"./index.js\")"), "{}", b.code);
        assert!(b.code.contains("module.exports = 2"), "{}", b.code);
    }

    #[test]
    fn parameter_names_avoid_collisions() {
        let bundle = run(
            r#"
            (function (m) {
                function r(i) { return m[i](); }
                r(r.s = 0);
            })([function (e, t, n) { var module = 1; e.exports = module; }]);
            "#,
        );
        let code = &bundle.modules[0].code;
        assert!(code.contains("module2.exports = module"), "{code}");
    }

    #[test]
    fn plain_scripts_are_not_unpacked() {
        let parsed = parse("console.log(1);").unwrap();
        let mut ctx = TransformContext::new(None);
        assert!(unpack(&parsed.module, &parsed.source_map, &mut ctx).unwrap().is_none());
    }
}

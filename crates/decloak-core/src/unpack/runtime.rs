//! Bundler runtime helpers inside module factories.
//!
//! Each transform targets the factory's `require` binding through
//! [`TransformContext::target`], so a renamed or shadowed helper is still
//! recognized, and an unrelated `o.g` is not.

use std::collections::{BTreeMap, HashMap, HashSet};

use swc_ecma_ast::{Callee, Expr, Ident, Lit, MemberProp, Module, Stmt};
use swc_ecma_visit::{Visit, VisitWith};

use crate::declare_transform;
use crate::factory;
use crate::helpers::unparen;
use crate::rewrite::{self, Rewrite};
use crate::semantic::{IdentIndex, NodeId, ScopeGraph};
use crate::transforms::{
    Transform, TransformContext, TransformError, TransformGroup, TransformMetadata, TransformTag,
};

/// Matches one use of `require` and says how to rewrite it.
type Shape = fn(&Expr) -> Option<(&Ident, Rewrite)>;

struct Uses<'a> {
    index: &'a IdentIndex,
    refs: &'a HashSet<NodeId>,
    shape: Shape,
    /// Only look at whole expression statements.
    statements: bool,
    rewrites: HashMap<NodeId, Rewrite>,
}

impl Uses<'_> {
    fn check(&mut self, expr: &Expr) {
        if let Some((ident, rewrite)) = (self.shape)(expr) {
            if let Some(node) = self.index.get(ident).filter(|node| self.refs.contains(node)) {
                self.rewrites.insert(node, rewrite);
            }
        }
    }
}

impl Visit for Uses<'_> {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        if self.statements {
            if let Stmt::Expr(expr) = stmt {
                self.check(&expr.expr);
            }
        }
        stmt.visit_children_with(self);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        if !self.statements {
            self.check(expr);
        }
        expr.visit_children_with(self);
    }
}

/// Applies `shape` to every use of the targeted `require` binding.
fn rewrite_uses(module: &mut Module, ctx: &TransformContext, shape: Shape, statements: bool) -> usize {
    let Some(key) = ctx.target() else {
        return 0;
    };
    let graph = ScopeGraph::build(module);
    let Some(binding) = graph.resolve_key(key) else {
        return 0;
    };
    let refs: HashSet<NodeId> = graph.binding(binding).references.iter().map(|site| site.node).collect();
    let index = IdentIndex::build(module);
    let mut uses = Uses {
        index: &index,
        refs: &refs,
        shape,
        statements,
        rewrites: HashMap::new(),
    };
    module.visit_with(&mut uses);
    let rewrites = uses.rewrites;
    rewrite::apply(module, rewrites)
}

/// `require.name`
fn helper<'a>(expr: &'a Expr, name: &str) -> Option<&'a Ident> {
    let Expr::Member(member) = unparen(expr) else {
        return None;
    };
    match (unparen(&member.obj), &member.prop) {
        (Expr::Ident(obj), MemberProp::Ident(prop)) if &*prop.sym == name => Some(obj),
        _ => None,
    }
}

/// `require.name(args..)` with plain arguments.
fn helper_call<'a>(expr: &'a Expr, name: &str) -> Option<(&'a Ident, Vec<Expr>)> {
    let Expr::Call(call) = expr else {
        return None;
    };
    let Callee::Expr(callee) = &call.callee else {
        return None;
    };
    let require = helper(callee, name)?;
    let args = call
        .args
        .iter()
        .map(|arg| arg.spread.is_none().then(|| (*arg.expr).clone()))
        .collect::<Option<Vec<_>>>()?;
    Some((require, args))
}

declare_transform!(
    HasOwnProperty,
    name = "has-own-property",
    description = "Replace require.o with Object.hasOwn",
    group = Unpack,
    tags = [Safe]
);

impl Transform for HasOwnProperty {
    fn metadata(&self) -> &TransformMetadata {
        &self.metadata
    }

    fn run(&self, module: &mut Module, ctx: &mut TransformContext) -> Result<usize, TransformError> {
        fn shape(expr: &Expr) -> Option<(&Ident, Rewrite)> {
            let (require, args) = helper_call(expr, "o")?;
            if args.len() != 2 {
                return None;
            }
            let has_own = factory::member(factory::ident_expr("Object"), "hasOwn");
            Some((require, Rewrite::Call(factory::call(has_own, args))))
        }
        Ok(rewrite_uses(module, ctx, shape, false))
    }
}

declare_transform!(
    Global,
    name = "global",
    description = "Replace require.g with global",
    group = Unpack,
    tags = [Safe]
);

impl Transform for Global {
    fn metadata(&self) -> &TransformMetadata {
        &self.metadata
    }

    fn run(&self, module: &mut Module, ctx: &mut TransformContext) -> Result<usize, TransformError> {
        fn shape(expr: &Expr) -> Option<(&Ident, Rewrite)> {
            let require = helper(expr, "g")?;
            Some((require, Rewrite::Member(factory::ident_expr("global"))))
        }
        Ok(rewrite_uses(module, ctx, shape, false))
    }
}

declare_transform!(
    NamespaceObject,
    name = "namespace-object",
    description = "Remove require.r(exports) calls",
    group = Unpack,
    tags = [Safe]
);

impl Transform for NamespaceObject {
    fn metadata(&self) -> &TransformMetadata {
        &self.metadata
    }

    fn run(&self, module: &mut Module, ctx: &mut TransformContext) -> Result<usize, TransformError> {
        fn shape(expr: &Expr) -> Option<(&Ident, Rewrite)> {
            let (require, args) = helper_call(expr, "r")?;
            (args.len() == 1).then_some((require, Rewrite::RemoveStmt))
        }
        Ok(rewrite_uses(module, ctx, shape, true))
    }
}

/// Rewrites `require(id)` to the relative path of the module it loads.
pub struct RequirePath {
    metadata: TransformMetadata,
    /// Literal argument (as written) to module path.
    paths: BTreeMap<String, String>,
}

impl RequirePath {
    pub fn new(paths: BTreeMap<String, String>) -> Self {
        Self {
            metadata: TransformMetadata {
                name: "require-path",
                description: "Point require calls at module paths",
                group: TransformGroup::Unpack,
                tags: &[TransformTag::Safe],
            },
            paths,
        }
    }
}

/// The literal passed to `require(..)`, as a string.
pub(crate) fn require_argument(expr: &Expr) -> Option<(&Ident, String)> {
    let Expr::Call(call) = expr else {
        return None;
    };
    let Callee::Expr(callee) = &call.callee else {
        return None;
    };
    let Expr::Ident(require) = unparen(callee) else {
        return None;
    };
    let [arg] = call.args.as_slice() else {
        return None;
    };
    if arg.spread.is_some() {
        return None;
    }
    let key = match unparen(&arg.expr) {
        Expr::Lit(Lit::Num(n)) => crate::helpers::js_number_to_string(n.value),
        Expr::Lit(Lit::Str(s)) => s.value.to_string(),
        _ => return None,
    };
    Some((require, key))
}

struct RequireCalls<'a> {
    index: &'a IdentIndex,
    refs: &'a HashSet<NodeId>,
    paths: &'a BTreeMap<String, String>,
    rewrites: HashMap<NodeId, Rewrite>,
}

impl Visit for RequireCalls<'_> {
    fn visit_expr(&mut self, expr: &Expr) {
        expr.visit_children_with(self);
        let Some((require, key)) = require_argument(expr) else {
            return;
        };
        // Already rewritten.
        if self.paths.values().any(|path| *path == key) {
            return;
        }
        let (Some(path), Some(node)) = (self.paths.get(&key), self.index.get(require)) else {
            return;
        };
        if self.refs.contains(&node) {
            let call = factory::call(factory::ident_expr(&require.sym), vec![factory::str_lit(path)]);
            self.rewrites.insert(node, Rewrite::Call(call));
        }
    }
}

impl Transform for RequirePath {
    fn metadata(&self) -> &TransformMetadata {
        &self.metadata
    }

    fn run(&self, module: &mut Module, ctx: &mut TransformContext) -> Result<usize, TransformError> {
        let Some(key) = ctx.target() else {
            return Ok(0);
        };
        let graph = ScopeGraph::build(module);
        let Some(binding) = graph.resolve_key(key) else {
            return Ok(0);
        };
        let refs: HashSet<NodeId> = graph.binding(binding).references.iter().map(|site| site.node).collect();
        let index = IdentIndex::build(module);
        let mut calls = RequireCalls {
            index: &index,
            refs: &refs,
            paths: &self.paths,
            rewrites: HashMap::new(),
        };
        module.visit_with(&mut calls);
        let rewrites = calls.rewrites;
        Ok(rewrite::apply(module, rewrites))
    }
}

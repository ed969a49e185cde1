//! jsx: turns `React.createElement(type, props, ...children)` back into JSX.
//!
//! A lowercase identifier used as a component type would read as an
//! intrinsic tag once written as JSX, so its binding is renamed to a unique
//! `Component` name before the call is converted.

use swc_common::DUMMY_SP;
use swc_ecma_ast::{
    CallExpr, Callee, Expr, Ident, IdentName, JSXAttr, JSXAttrName, JSXAttrOrSpread, JSXAttrValue,
    JSXClosingElement, JSXClosingFragment, JSXElement, JSXElementChild, JSXElementName, JSXExpr,
    JSXExprContainer, JSXFragment, JSXMemberExpr, JSXObject, JSXOpeningElement,
    JSXOpeningFragment, JSXText, Lit, Module, Prop, PropOrSpread, SpreadElement,
};
use swc_ecma_visit::{Visit, VisitMut, VisitMutWith, VisitWith};
use tracing::debug;

use crate::declare_transform;
use crate::helpers::{is_member_named, prop_name_key, unparen};
use crate::rename::rename_unique;
use crate::semantic::{BindingKey, IdentIndex, ScopeGraph};
use crate::transforms::{Transform, TransformContext, TransformError, TransformMetadata};

declare_transform!(
    Jsx,
    name = "jsx",
    description = "Decompile React.createElement calls to JSX",
    group = Unminify,
    tags = [Unsafe]
);

const COMPONENT_HINT: &str = "Component";

impl Transform for Jsx {
    fn metadata(&self) -> &TransformMetadata {
        &self.metadata
    }

    fn run(&self, module: &mut Module, ctx: &mut TransformContext) -> Result<usize, TransformError> {
        let mut changes = rename_components(module, ctx)?;

        let mut visitor = JsxVisitor { changes: 0 };
        module.visit_mut_with(&mut visitor);
        changes += visitor.changes;
        Ok(changes)
    }
}

fn rename_components(module: &mut Module, ctx: &mut TransformContext) -> Result<usize, TransformError> {
    let mut graph = ScopeGraph::build(module);
    let keys = {
        let index = IdentIndex::build(module);
        let mut finder = LowercaseComponents {
            index: &index,
            graph: &graph,
            keys: Vec::new(),
        };
        module.visit_with(&mut finder);
        finder.keys
    };

    let mut renamed = 0;
    for key in keys {
        if graph.is_stale() {
            graph = ScopeGraph::build(module);
        }
        let Some(binding) = graph.resolve_key(&key) else {
            ctx.warn(format!("lost track of component `{}`", key.name), None);
            continue;
        };
        let name = rename_unique(module, &mut graph, binding, COMPONENT_HINT)?;
        debug!(from = %key.name, to = %name, "renamed component");
        renamed += 1;
    }
    Ok(renamed)
}

/// Bindings of lowercase component identifiers in convertible calls.
struct LowercaseComponents<'a> {
    index: &'a IdentIndex,
    graph: &'a ScopeGraph,
    keys: Vec<BindingKey>,
}

impl Visit for LowercaseComponents<'_> {
    fn visit_call_expr(&mut self, call: &CallExpr) {
        call.visit_children_with(self);
        let Some(Expr::Ident(ident)) = call.args.first().map(|arg| unparen(&arg.expr)) else {
            return;
        };
        if !starts_lowercase(&ident.sym) || convert(call, true).is_none() {
            return;
        }
        let binding = self
            .index
            .get(ident)
            .and_then(|node| self.graph.binding_at(node));
        if let Some(binding) = binding {
            let key = self.graph.key(binding);
            if !self.keys.contains(&key) {
                self.keys.push(key);
            }
        }
    }
}

struct JsxVisitor {
    changes: usize,
}

impl VisitMut for JsxVisitor {
    fn visit_mut_expr(&mut self, expr: &mut Expr) {
        expr.visit_mut_children_with(self);
        let Expr::Call(call) = expr else {
            return;
        };
        if let Some(jsx) = convert(call, false) {
            *expr = jsx;
            self.changes += 1;
        }
    }
}

fn starts_lowercase(name: &str) -> bool {
    name.starts_with(|c: char| c.is_ascii_lowercase())
}

/// `X.createElement`, `a.b.createElement` or `(0, X.createElement)`
fn is_create_element(callee: &Callee) -> bool {
    let Callee::Expr(callee) = callee else {
        return false;
    };
    let callee = match unparen(callee) {
        Expr::Seq(seq) if seq.exprs.len() == 2 && matches!(*seq.exprs[0], Expr::Lit(Lit::Num(_))) => {
            unparen(&seq.exprs[1])
        }
        other => other,
    };
    match callee {
        Expr::Member(member) => {
            is_member_named(&member.prop, "createElement")
                && matches!(*member.obj, Expr::Ident(_) | Expr::Member(_))
        }
        _ => false,
    }
}

fn is_fragment(expr: &Expr) -> bool {
    matches!(unparen(expr), Expr::Member(member) if is_member_named(&member.prop, "Fragment"))
}

/// Builds the JSX replacement for a `createElement` call, or `None` when
/// some part of it has no JSX spelling.
fn convert(call: &CallExpr, allow_lowercase_component: bool) -> Option<Expr> {
    if !is_create_element(&call.callee) {
        return None;
    }
    let mut args = call.args.iter();
    let ty = args.next()?;
    if ty.spread.is_some() {
        return None;
    }
    let props = args.next();
    let mut children = Vec::new();
    for arg in args {
        if arg.spread.is_some() {
            return None;
        }
        children.push(child(&arg.expr)?);
    }

    let attrs = match props {
        Some(props) if props.spread.is_none() => attributes(&props.expr)?,
        Some(_) => return None,
        None => Vec::new(),
    };

    if is_fragment(&ty.expr) {
        if !attrs.is_empty() {
            return None;
        }
        return Some(Expr::JSXFragment(JSXFragment {
            span: DUMMY_SP,
            opening: JSXOpeningFragment { span: DUMMY_SP },
            children,
            closing: JSXClosingFragment { span: DUMMY_SP },
        }));
    }

    let name = element_name(&ty.expr, allow_lowercase_component)?;
    let self_closing = children.is_empty();
    let closing = (!self_closing).then(|| JSXClosingElement {
        span: DUMMY_SP,
        name: name.clone(),
    });
    Some(Expr::JSXElement(Box::new(JSXElement {
        span: DUMMY_SP,
        opening: JSXOpeningElement {
            name,
            span: DUMMY_SP,
            attrs,
            self_closing,
            type_args: None,
        },
        children,
        closing,
    })))
}

fn element_name(expr: &Expr, allow_lowercase_component: bool) -> Option<JSXElementName> {
    match unparen(expr) {
        Expr::Lit(Lit::Str(s)) => {
            let tag: &str = &s.value;
            let valid = starts_lowercase(tag)
                && tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
            valid.then(|| JSXElementName::Ident(Ident::new_no_ctxt(s.value.clone(), DUMMY_SP)))
        }
        Expr::Ident(ident) => {
            (allow_lowercase_component || !starts_lowercase(&ident.sym)).then(|| JSXElementName::Ident(ident.clone()))
        }
        Expr::Member(_) => jsx_member(expr).map(JSXElementName::JSXMemberExpr),
        _ => None,
    }
}

fn jsx_member(expr: &Expr) -> Option<JSXMemberExpr> {
    let Expr::Member(member) = unparen(expr) else {
        return None;
    };
    let prop = match &member.prop {
        swc_ecma_ast::MemberProp::Ident(prop) => prop.clone(),
        _ => return None,
    };
    let obj = match unparen(&member.obj) {
        Expr::Ident(ident) => JSXObject::Ident(ident.clone()),
        Expr::Member(_) => JSXObject::JSXMemberExpr(Box::new(jsx_member(&member.obj)?)),
        _ => return None,
    };
    Some(JSXMemberExpr {
        span: DUMMY_SP,
        obj,
        prop,
    })
}

fn container(expr: &Expr) -> JSXExprContainer {
    JSXExprContainer {
        span: DUMMY_SP,
        expr: JSXExpr::Expr(Box::new(expr.clone())),
    }
}

fn is_attribute_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '-')
}

fn attributes(props: &Expr) -> Option<Vec<JSXAttrOrSpread>> {
    let object = match unparen(props) {
        Expr::Lit(Lit::Null(_)) => return Some(Vec::new()),
        Expr::Ident(ident) if &*ident.sym == "undefined" => return Some(Vec::new()),
        Expr::Object(object) => object,
        other => {
            return Some(vec![JSXAttrOrSpread::SpreadElement(SpreadElement {
                dot3_token: DUMMY_SP,
                expr: Box::new(other.clone()),
            })]);
        }
    };

    let mut attrs = Vec::with_capacity(object.props.len());
    for prop in &object.props {
        let attr = match prop {
            PropOrSpread::Spread(spread) => JSXAttrOrSpread::SpreadElement(SpreadElement {
                dot3_token: DUMMY_SP,
                expr: spread.expr.clone(),
            }),
            PropOrSpread::Prop(prop) => {
                let (name, value) = match &**prop {
                    Prop::KeyValue(kv) => (prop_name_key(&kv.key)?, container(&kv.value)),
                    Prop::Shorthand(ident) => (ident.sym.to_string(), container(&Expr::Ident(ident.clone()))),
                    _ => return None,
                };
                if !is_attribute_name(&name) {
                    return None;
                }
                JSXAttrOrSpread::JSXAttr(JSXAttr {
                    span: DUMMY_SP,
                    name: JSXAttrName::Ident(IdentName::new(name.into(), DUMMY_SP)),
                    value: Some(JSXAttrValue::JSXExprContainer(value)),
                })
            }
        };
        attrs.push(attr);
    }
    Some(attrs)
}

fn child(expr: &Expr) -> Option<JSXElementChild> {
    Some(match unparen(expr) {
        Expr::JSXElement(element) => JSXElementChild::JSXElement(element.clone()),
        Expr::JSXFragment(fragment) => JSXElementChild::JSXFragment(fragment.clone()),
        Expr::Lit(Lit::Str(s)) if is_plain_text(&s.value) => JSXElementChild::JSXText(JSXText {
            span: DUMMY_SP,
            value: s.value.clone(),
            raw: s.value.clone(),
        }),
        other => JSXElementChild::JSXExprContainer(container(other)),
    })
}

/// Text that means the same inside JSX as in a string literal.
fn is_plain_text(text: &str) -> bool {
    !text.is_empty()
        && text.trim() == text
        && !text.contains(['{', '}', '<', '>', '&', '\n', '\r'])
}

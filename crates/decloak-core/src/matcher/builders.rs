//! Constructor functions for [`Matcher`] trees.

use swc_ecma_ast::{AssignOp, BinaryOp, UnaryOp, UpdateOp, VarDeclKind};

use super::{ListItem, ListMatcher, Matcher, NodeRef};

pub fn any() -> Matcher {
    Matcher::Any
}

pub fn any_of(alternatives: Vec<Matcher>) -> Matcher {
    Matcher::AnyOf(alternatives)
}

pub fn all_of(matchers: Vec<Matcher>) -> Matcher {
    Matcher::AllOf(matchers)
}

pub fn not(inner: Matcher) -> Matcher {
    Matcher::Not(Box::new(inner))
}

pub fn capture(name: &'static str, inner: Matcher) -> Matcher {
    Matcher::Capture(name, Box::new(inner))
}

pub fn backref(name: &'static str) -> Matcher {
    Matcher::Backref(name)
}

pub fn predicate(f: fn(NodeRef<'_>) -> bool) -> Matcher {
    Matcher::Predicate(f)
}

pub fn ident(name: &str) -> Matcher {
    Matcher::Ident(Some(name.to_string()))
}

pub fn any_ident() -> Matcher {
    Matcher::Ident(None)
}

pub fn string(value: &str) -> Matcher {
    Matcher::Str(Some(value.to_string()))
}

pub fn any_string() -> Matcher {
    Matcher::Str(None)
}

pub fn number(value: f64) -> Matcher {
    Matcher::Num(Some(value))
}

pub fn any_number() -> Matcher {
    Matcher::Num(None)
}

pub fn boolean(value: bool) -> Matcher {
    Matcher::Bool(Some(value))
}

pub fn null() -> Matcher {
    Matcher::Null
}

pub fn this() -> Matcher {
    Matcher::This
}

pub fn unary(op: Option<UnaryOp>, arg: Matcher) -> Matcher {
    Matcher::Unary(op, Box::new(arg))
}

pub fn binary(op: Option<BinaryOp>, left: Matcher, right: Matcher) -> Matcher {
    Matcher::Binary(op, Box::new(left), Box::new(right))
}

pub fn assign(op: Option<AssignOp>, left: Matcher, right: Matcher) -> Matcher {
    Matcher::Assign(op, Box::new(left), Box::new(right))
}

pub fn update(op: Option<UpdateOp>, arg: Matcher) -> Matcher {
    Matcher::Update(op, Box::new(arg))
}

pub fn call(callee: Matcher, args: ListMatcher) -> Matcher {
    Matcher::Call(Box::new(callee), args)
}

pub fn new_expr(callee: Matcher, args: ListMatcher) -> Matcher {
    Matcher::New(Box::new(callee), args)
}

/// `obj.name`
pub fn member(obj: Matcher, name: &str) -> Matcher {
    Matcher::Member {
        obj: Box::new(obj),
        prop: Box::new(ident(name)),
        computed: Some(false),
    }
}

/// `obj[prop]`
pub fn computed_member(obj: Matcher, prop: Matcher) -> Matcher {
    Matcher::Member {
        obj: Box::new(obj),
        prop: Box::new(prop),
        computed: Some(true),
    }
}

/// `obj.prop` or `obj[prop]`
pub fn any_member(obj: Matcher, prop: Matcher) -> Matcher {
    Matcher::Member {
        obj: Box::new(obj),
        prop: Box::new(prop),
        computed: None,
    }
}

pub fn seq(exprs: ListMatcher) -> Matcher {
    Matcher::Seq(exprs)
}

pub fn cond(test: Matcher, cons: Matcher, alt: Matcher) -> Matcher {
    Matcher::Cond(Box::new(test), Box::new(cons), Box::new(alt))
}

pub fn array(elems: ListMatcher) -> Matcher {
    Matcher::Array(elems)
}

pub fn object(props: ListMatcher) -> Matcher {
    Matcher::Object(props)
}

pub fn key_value(key: Matcher, value: Matcher) -> Matcher {
    Matcher::KeyValue(Box::new(key), Box::new(value))
}

pub fn function(params: ListMatcher, body: ListMatcher) -> Matcher {
    Matcher::Function { params, body }
}

pub fn expr_stmt(expr: Matcher) -> Matcher {
    Matcher::ExprStmt(Box::new(expr))
}

pub fn ret(arg: Matcher) -> Matcher {
    Matcher::Return(Some(Box::new(arg)))
}

pub fn ret_void() -> Matcher {
    Matcher::Return(None)
}

pub fn var_decl(kind: Option<VarDeclKind>, decls: ListMatcher) -> Matcher {
    Matcher::VarDecl { kind, decls }
}

pub fn declarator(name: Matcher, init: Option<Matcher>) -> Matcher {
    Matcher::Declarator {
        name: Box::new(name),
        init: init.map(Box::new),
    }
}

pub fn if_stmt(test: Matcher, cons: Matcher, alt: Option<Matcher>) -> Matcher {
    Matcher::If {
        test: Box::new(test),
        cons: Box::new(cons),
        alt: alt.map(Box::new),
    }
}

pub fn block(stmts: ListMatcher) -> Matcher {
    Matcher::Block(stmts)
}

pub fn while_loop(test: Matcher, body: Matcher) -> Matcher {
    Matcher::While(Box::new(test), Box::new(body))
}

pub fn break_stmt() -> Matcher {
    Matcher::Break
}

pub fn continue_stmt() -> Matcher {
    Matcher::Continue
}

pub fn empty_stmt() -> Matcher {
    Matcher::Empty
}

pub fn list_any() -> ListMatcher {
    ListMatcher::Any
}

pub fn exact(items: Vec<Matcher>) -> ListMatcher {
    ListMatcher::Exact(items)
}

pub fn sequence(items: Vec<ListItem>) -> ListMatcher {
    ListMatcher::Seq(items)
}

pub fn one(m: Matcher) -> ListItem {
    ListItem::One(m)
}

pub fn zero_or_more(m: Matcher) -> ListItem {
    ListItem::ZeroOrMore(m)
}

pub fn capture_list(name: &'static str, inner: ListMatcher) -> ListMatcher {
    ListMatcher::Capture(name, Box::new(inner))
}

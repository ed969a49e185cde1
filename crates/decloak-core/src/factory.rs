//! Node construction
//!
//! Free functions used by the built-in transforms, and [`NodeFactory`], the
//! handle plugins receive to build replacement nodes.

use swc_common::{DUMMY_SP, SyntaxContext};
use swc_ecma_ast::{
    BlockStmt, Bool, CallExpr, Callee, Expr, ExprOrSpread, ExprStmt, Ident, IdentName, Lit,
    MemberExpr, MemberProp, Null, Number, ReturnStmt, Stmt, Str,
};

pub fn ident(name: &str) -> Ident {
    Ident::new_no_ctxt(name.into(), DUMMY_SP)
}

pub fn ident_expr(name: &str) -> Expr {
    Expr::Ident(ident(name))
}

pub fn str_lit(value: &str) -> Expr {
    Expr::Lit(Lit::Str(Str {
        span: DUMMY_SP,
        value: value.into(),
        raw: None,
    }))
}

pub fn num_lit(value: f64) -> Expr {
    Expr::Lit(Lit::Num(Number {
        span: DUMMY_SP,
        value,
        raw: None,
    }))
}

pub fn bool_lit(value: bool) -> Expr {
    Expr::Lit(Lit::Bool(Bool {
        span: DUMMY_SP,
        value,
    }))
}

pub fn null_lit() -> Expr {
    Expr::Lit(Lit::Null(Null { span: DUMMY_SP }))
}

pub fn undefined() -> Expr {
    ident_expr("undefined")
}

pub fn member(obj: Expr, prop: &str) -> Expr {
    Expr::Member(MemberExpr {
        span: DUMMY_SP,
        obj: Box::new(obj),
        prop: MemberProp::Ident(IdentName::new(prop.into(), DUMMY_SP)),
    })
}

pub fn call(callee: Expr, args: Vec<Expr>) -> Expr {
    Expr::Call(CallExpr {
        span: DUMMY_SP,
        callee: Callee::Expr(Box::new(callee)),
        args: args
            .into_iter()
            .map(|expr| ExprOrSpread {
                spread: None,
                expr: Box::new(expr),
            })
            .collect(),
        ctxt: SyntaxContext::empty(),
        type_args: None,
    })
}

pub fn expr_stmt(expr: Expr) -> Stmt {
    Stmt::Expr(ExprStmt {
        span: DUMMY_SP,
        expr: Box::new(expr),
    })
}

pub fn block(stmts: Vec<Stmt>) -> BlockStmt {
    BlockStmt {
        span: DUMMY_SP,
        ctxt: SyntaxContext::empty(),
        stmts,
    }
}

pub fn return_stmt(arg: Option<Expr>) -> Stmt {
    Stmt::Return(ReturnStmt {
        span: DUMMY_SP,
        arg: arg.map(Box::new),
    })
}

/// Node-construction handle handed to plugin visitors.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeFactory;

impl NodeFactory {
    pub fn ident(&self, name: &str) -> Expr {
        ident_expr(name)
    }

    pub fn string(&self, value: &str) -> Expr {
        str_lit(value)
    }

    pub fn number(&self, value: f64) -> Expr {
        num_lit(value)
    }

    pub fn boolean(&self, value: bool) -> Expr {
        bool_lit(value)
    }

    pub fn null(&self) -> Expr {
        null_lit()
    }

    pub fn member(&self, obj: Expr, prop: &str) -> Expr {
        member(obj, prop)
    }

    pub fn call(&self, callee: Expr, args: Vec<Expr>) -> Expr {
        call(callee, args)
    }

    pub fn expr_stmt(&self, expr: Expr) -> Stmt {
        expr_stmt(expr)
    }
}

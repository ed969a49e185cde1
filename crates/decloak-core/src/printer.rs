//! Code generation
//!
//! Thin wrapper around `swc_ecma_codegen` that turns a [`Module`] back into
//! source text.

use swc_common::SourceMap;
use swc_common::sync::Lrc;
use swc_ecma_ast::{Expr, ExprStmt, Module, ModuleItem, Stmt};
use swc_ecma_codegen::text_writer::JsWriter;
use swc_ecma_codegen::{Emitter, Node};

#[derive(Debug, thiserror::Error)]
pub enum PrintError {
    #[error("Failed to emit code: {0}")]
    Emit(#[from] std::io::Error),
    #[error("Emitter produced invalid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

pub fn print_module(module: &Module, source_map: &Lrc<SourceMap>) -> Result<String, PrintError> {
    let mut buf = Vec::new();
    {
        let writer = JsWriter::new(source_map.clone(), "\n", &mut buf, None);
        let mut emitter = Emitter {
            cfg: Default::default(),
            cm: source_map.clone(),
            comments: None,
            wr: writer,
        };
        module.emit_with(&mut emitter)?;
    }
    Ok(String::from_utf8(buf)?)
}

pub fn print_stmts(stmts: Vec<Stmt>, source_map: &Lrc<SourceMap>) -> Result<String, PrintError> {
    let module = Module {
        span: Default::default(),
        body: stmts.into_iter().map(ModuleItem::Stmt).collect(),
        shebang: None,
    };
    print_module(&module, source_map)
}

pub fn print_expr(expr: &Expr, source_map: &Lrc<SourceMap>) -> Result<String, PrintError> {
    let stmt = Stmt::Expr(ExprStmt {
        span: Default::default(),
        expr: Box::new(expr.clone()),
    });
    let printed = print_stmts(vec![stmt], source_map)?;
    Ok(printed.trim_end().trim_end_matches(';').to_string())
}

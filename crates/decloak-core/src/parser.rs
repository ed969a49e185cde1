//! Parser module for JavaScript source code
//!
//! Integrates with SWC for parsing obfuscated scripts and bundles into an AST.
//! Scripts and modules are both normalized to a [`Module`] so that every
//! transform works on a single root type.

use swc_common::sync::Lrc;
use swc_common::{FileName, SourceMap, Spanned};
use swc_ecma_ast::{EsVersion, Module, ModuleItem, Program};
use swc_ecma_parser::{EsSyntax, Syntax, parse_file_as_program};

#[derive(Debug, Clone, thiserror::Error)]
#[error("{message} at {line}:{column}")]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    pub span_lo: u32,
    pub span_hi: u32,
    pub message: String,
}

/// A parsed source file together with the source map its spans point into.
///
/// The source map is kept alive for the whole run: the printer and the
/// diagnostic previews both resolve spans against it.
pub struct ParsedSource {
    pub module: Module,
    pub source_map: Lrc<SourceMap>,
    pub recovered: Vec<ParseError>,
}

impl std::fmt::Debug for ParsedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParsedSource")
            .field("items", &self.module.body.len())
            .field("recovered", &self.recovered.len())
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParserBuilder {
    jsx: bool,
    filename: Option<String>,
}

impl ParserBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn jsx(mut self, enabled: bool) -> Self {
        self.jsx = enabled;
        self
    }

    pub fn filename(mut self, name: impl Into<String>) -> Self {
        self.filename = Some(name.into());
        self
    }

    pub fn build(self) -> Parser {
        Parser {
            syntax: Syntax::Es(EsSyntax {
                jsx: self.jsx,
                ..Default::default()
            }),
            filename: self.filename.unwrap_or_else(|| "input.js".to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Parser {
    syntax: Syntax,
    filename: String,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    /// Parser with JSX enabled, since bundles regularly ship JSX that
    /// survived transpilation.
    pub fn new() -> Self {
        Self::builder().jsx(true).build()
    }

    pub fn builder() -> ParserBuilder {
        ParserBuilder::new()
    }

    pub fn parse(&self, code: &str) -> Result<ParsedSource, ParseError> {
        let source_map: Lrc<SourceMap> = Default::default();
        self.parse_with_source_map(code, source_map)
    }

    /// Parses into an existing source map so that spans of several inputs
    /// can be printed by the same emitter.
    pub fn parse_with_source_map(
        &self,
        code: &str,
        source_map: Lrc<SourceMap>,
    ) -> Result<ParsedSource, ParseError> {
        let fm = source_map.new_source_file(
            FileName::Custom(self.filename.clone()).into(),
            code.to_string(),
        );

        let mut recovered_errors = Vec::new();
        let program = parse_file_as_program(
            &fm,
            self.syntax,
            EsVersion::latest(),
            None,
            &mut recovered_errors,
        )
        .map_err(|e| to_parse_error(&source_map, e))?;

        let recovered: Vec<ParseError> = recovered_errors
            .into_iter()
            .map(|e| to_parse_error(&source_map, e))
            .collect();
        for error in &recovered {
            tracing::warn!(%error, "recovered from parse error");
        }

        Ok(ParsedSource {
            module: into_module(program),
            source_map,
            recovered,
        })
    }
}

fn to_parse_error(source_map: &SourceMap, e: swc_ecma_parser::error::Error) -> ParseError {
    let span = e.span();
    let loc = source_map.lookup_char_pos(span.lo);
    ParseError {
        line: loc.line,
        column: loc.col_display,
        span_lo: span.lo.0,
        span_hi: span.hi.0,
        message: e.kind().msg().to_string(),
    }
}

/// Converts a script into a module whose items are the script's statements.
pub fn into_module(program: Program) -> Module {
    match program {
        Program::Module(module) => module,
        Program::Script(script) => Module {
            span: script.span,
            body: script.body.into_iter().map(ModuleItem::Stmt).collect(),
            shebang: script.shebang,
        },
    }
}

/// Convenience wrapper around [`Parser::new`] for the common case.
pub fn parse(code: &str) -> Result<ParsedSource, ParseError> {
    Parser::new().parse(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use swc_ecma_ast::{ModuleDecl, Stmt};

    #[test]
    fn parses_script_into_module_items() {
        let parsed = parse("var a = 1; a++;").unwrap();
        assert_eq!(parsed.module.body.len(), 2);
        assert!(matches!(parsed.module.body[0], ModuleItem::Stmt(Stmt::Decl(_))));
        assert!(parsed.recovered.is_empty());
    }

    #[test]
    fn parses_es_modules() {
        let parsed = parse("import a from 'a'; export const b = a;").unwrap();
        assert!(matches!(
            parsed.module.body[0],
            ModuleItem::ModuleDecl(ModuleDecl::Import(_))
        ));
    }

    #[test]
    fn sloppy_mode_scripts_parse() {
        let parsed = parse("with (obj) { x = 1; }").unwrap();
        assert_eq!(parsed.module.body.len(), 1);
    }

    #[test]
    fn jsx_is_enabled_by_default() {
        assert!(parse("const el = <div className=\"a\" />;").is_ok());
    }

    #[test]
    fn syntax_error_reports_position() {
        let err = parse("const = ;").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(!err.message.is_empty());
        assert!(err.to_string().contains("at 1:"));
    }
}

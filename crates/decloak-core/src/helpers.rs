//! Shared helper functions for transform implementations.

use swc_common::sync::Lrc;
use swc_common::{DUMMY_SP, SourceMap, Span, SyntaxContext};
use swc_ecma_ast::{
    Decl, Expr, Ident, Lit, MemberProp, ModuleItem, Pat, PropName, Stmt, VarDecl, VarDeclKind,
    VarDeclarator,
};
use swc_ecma_visit::{Visit, VisitMut, VisitMutWith, VisitWith};

use crate::factory;
use crate::printer::print_stmts;
use crate::semantic::{NodeId, count_idents};

const PREVIEW_LEN: usize = 100;

const RESERVED_WORDS: &[&str] = &[
    "arguments",
    "await",
    "break",
    "case",
    "catch",
    "class",
    "const",
    "continue",
    "debugger",
    "default",
    "delete",
    "do",
    "else",
    "enum",
    "eval",
    "export",
    "extends",
    "false",
    "finally",
    "for",
    "function",
    "if",
    "implements",
    "import",
    "in",
    "instanceof",
    "interface",
    "let",
    "new",
    "null",
    "package",
    "private",
    "protected",
    "public",
    "return",
    "static",
    "super",
    "switch",
    "this",
    "throw",
    "true",
    "try",
    "typeof",
    "var",
    "void",
    "while",
    "with",
    "yield",
];

pub fn is_reserved_word(name: &str) -> bool {
    RESERVED_WORDS.contains(&name)
}

/// Whether `name` may appear after a dot in a member expression.
pub fn is_identifier_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '$' || c == '_' || c.is_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '$' || c == '_' || c.is_alphanumeric())
}

/// Whether `name` can be used as a binding name.
pub fn is_valid_binding_name(name: &str) -> bool {
    is_identifier_name(name) && !is_reserved_word(name)
}

/// Turns an arbitrary hint into something usable as an identifier.
pub fn to_identifier(hint: &str) -> String {
    let mut out: String = hint
        .chars()
        .map(|c| {
            if c == '$' || c == '_' || c.is_alphanumeric() {
                c
            } else {
                '_'
            }
        })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    if is_reserved_word(&out) {
        out.insert(0, '_');
    }
    out
}

pub fn unparen(expr: &Expr) -> &Expr {
    match expr {
        Expr::Paren(paren) => unparen(&paren.expr),
        _ => expr,
    }
}

pub fn unparen_mut(expr: &mut Expr) -> &mut Expr {
    match expr {
        Expr::Paren(paren) => unparen_mut(&mut paren.expr),
        _ => expr,
    }
}

pub fn as_str_lit(expr: &Expr) -> Option<&str> {
    match unparen(expr) {
        Expr::Lit(Lit::Str(s)) => Some(s.value.as_ref()),
        _ => None,
    }
}

pub fn as_num_lit(expr: &Expr) -> Option<f64> {
    match unparen(expr) {
        Expr::Lit(Lit::Num(n)) => Some(n.value),
        _ => None,
    }
}

/// Formats a number the way `Number.prototype.toString` does for the values
/// obfuscators emit.
pub fn js_number_to_string(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if value == 0.0 {
        "0".to_string()
    } else if value.fract() == 0.0 && value.abs() < 1e21 {
        format!("{value:.0}")
    } else {
        format!("{value}")
    }
}

/// The string key of a literal or identifier property name.
pub fn prop_name_key(name: &PropName) -> Option<String> {
    match name {
        PropName::Ident(ident) => Some(ident.sym.to_string()),
        PropName::Str(s) => Some(s.value.to_string()),
        PropName::Num(n) => Some(js_number_to_string(n.value)),
        PropName::Computed(computed) => literal_key(&computed.expr),
        PropName::BigInt(_) => None,
    }
}

/// The string key of `obj.prop` or `obj["prop"]`.
pub fn member_prop_key(prop: &MemberProp) -> Option<String> {
    match prop {
        MemberProp::Ident(ident) => Some(ident.sym.to_string()),
        MemberProp::Computed(computed) => literal_key(&computed.expr),
        MemberProp::PrivateName(_) => None,
    }
}

fn literal_key(expr: &Expr) -> Option<String> {
    match unparen(expr) {
        Expr::Lit(Lit::Str(s)) => Some(s.value.to_string()),
        Expr::Lit(Lit::Num(n)) => Some(js_number_to_string(n.value)),
        _ => None,
    }
}

pub fn is_member_named(prop: &MemberProp, name: &str) -> bool {
    member_prop_key(prop).as_deref() == Some(name)
}

pub fn var_decl(kind: VarDeclKind, decls: Vec<VarDeclarator>) -> Stmt {
    Stmt::Decl(Decl::Var(Box::new(VarDecl {
        span: DUMMY_SP,
        ctxt: SyntaxContext::empty(),
        kind,
        declare: false,
        decls,
    })))
}

pub fn binding_ident_name(pat: &Pat) -> Option<&Ident> {
    match pat {
        Pat::Ident(binding) => Some(&binding.id),
        _ => None,
    }
}

pub fn is_empty_stmt(stmt: &Stmt) -> bool {
    matches!(stmt, Stmt::Empty(_))
}

pub fn is_empty_item(item: &ModuleItem) -> bool {
    matches!(item, ModuleItem::Stmt(Stmt::Empty(_)))
}

/// Module bodies and block bodies, processed by the same code.
pub trait StmtLike: Sized {
    fn as_stmt(&self) -> Option<&Stmt>;
    fn as_stmt_mut(&mut self) -> Option<&mut Stmt>;
    fn from_stmt(stmt: Stmt) -> Self;
}

impl StmtLike for Stmt {
    fn as_stmt(&self) -> Option<&Stmt> {
        Some(self)
    }

    fn as_stmt_mut(&mut self) -> Option<&mut Stmt> {
        Some(self)
    }

    fn from_stmt(stmt: Stmt) -> Self {
        stmt
    }
}

impl StmtLike for ModuleItem {
    fn as_stmt(&self) -> Option<&Stmt> {
        match self {
            ModuleItem::Stmt(stmt) => Some(stmt),
            ModuleItem::ModuleDecl(_) => None,
        }
    }

    fn as_stmt_mut(&mut self) -> Option<&mut Stmt> {
        match self {
            ModuleItem::Stmt(stmt) => Some(stmt),
            ModuleItem::ModuleDecl(_) => None,
        }
    }

    fn from_stmt(stmt: Stmt) -> Self {
        ModuleItem::Stmt(stmt)
    }
}

struct SpanStripper;

impl VisitMut for SpanStripper {
    fn visit_mut_span(&mut self, span: &mut Span) {
        *span = DUMMY_SP;
    }
}

/// Nodes that can be rendered as a one-line code preview.
pub trait Preview {
    fn preview_stmt(&self) -> Stmt;
}

impl Preview for Stmt {
    fn preview_stmt(&self) -> Stmt {
        self.clone()
    }
}

impl Preview for Expr {
    fn preview_stmt(&self) -> Stmt {
        factory::expr_stmt(self.clone())
    }
}

impl Preview for Ident {
    fn preview_stmt(&self) -> Stmt {
        factory::expr_stmt(Expr::Ident(self.clone()))
    }
}

impl Preview for VarDeclarator {
    fn preview_stmt(&self) -> Stmt {
        var_decl(VarDeclKind::Var, vec![self.clone()])
    }
}

impl Preview for Decl {
    fn preview_stmt(&self) -> Stmt {
        Stmt::Decl(self.clone())
    }
}

/// Prints `node` on a single line, truncated for diagnostics.
pub fn code_preview<N: Preview>(node: &N) -> String {
    let mut stmt = node.preview_stmt();
    stmt.visit_mut_with(&mut SpanStripper);
    let source_map: Lrc<SourceMap> = Default::default();
    let Ok(code) = print_stmts(vec![stmt], &source_map) else {
        return "<unprintable>".to_string();
    };
    let collapsed = code.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() > PREVIEW_LEN {
        let truncated: String = collapsed.chars().take(PREVIEW_LEN).collect();
        format!("{truncated}…")
    } else {
        collapsed
    }
}

/// Finds the innermost statement containing the identifier at `target`.
struct EnclosingStmt {
    target: u32,
    next: u32,
    found: Option<Stmt>,
}

impl Visit for EnclosingStmt {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        if self.next > self.target {
            return;
        }
        let count = count_idents(stmt);
        if self.next + count <= self.target {
            self.next += count;
            return;
        }
        self.found = Some(stmt.clone());
        stmt.visit_children_with(self);
    }

    fn visit_ident(&mut self, _: &Ident) {
        self.next += 1;
    }
}

/// Preview of the statement around the identifier at `node`.
pub fn preview_at(module: &swc_ecma_ast::Module, node: NodeId) -> String {
    let mut finder = EnclosingStmt {
        target: node.0,
        next: 0,
        found: None,
    };
    module.visit_with(&mut finder);
    match finder.found {
        Some(stmt) => code_preview(&stmt),
        None => format!("<identifier {node}>"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn identifier_names() {
        assert!(is_identifier_name("foo"));
        assert!(is_identifier_name("$_a1"));
        assert!(is_identifier_name("default"));
        assert!(!is_identifier_name("1a"));
        assert!(!is_identifier_name("a-b"));
        assert!(!is_identifier_name(""));
    }

    #[test]
    fn binding_names_reject_reserved_words() {
        assert!(is_valid_binding_name("module"));
        assert!(!is_valid_binding_name("default"));
        assert!(!is_valid_binding_name("arguments"));
    }

    #[test]
    fn to_identifier_sanitizes_hints() {
        assert_eq!(to_identifier("my-module"), "my_module");
        assert_eq!(to_identifier("0abc"), "_0abc");
        assert_eq!(to_identifier(""), "_");
        assert_eq!(to_identifier("class"), "_class");
    }

    #[test]
    fn number_formatting_matches_javascript() {
        assert_eq!(js_number_to_string(1.0), "1");
        assert_eq!(js_number_to_string(-3.0), "-3");
        assert_eq!(js_number_to_string(0.5), "0.5");
        assert_eq!(js_number_to_string(f64::NAN), "NaN");
        assert_eq!(js_number_to_string(-0.0), "0");
    }

    #[test]
    fn preview_is_single_line() {
        let parsed = parse("function foo(a) {\n  return a + 1;\n}").unwrap();
        let ModuleItem::Stmt(stmt) = &parsed.module.body[0] else {
            panic!("expected statement");
        };
        let preview = code_preview(stmt);
        assert!(!preview.contains('\n'));
        assert!(preview.starts_with("function foo(a) {"));
    }

    #[test]
    fn preview_at_finds_innermost_statement() {
        let parsed = parse("var a = 1;\nfunction f() { return b; }").unwrap();
        // a, f, b
        assert_eq!(preview_at(&parsed.module, NodeId(2)), "return b;");
        assert_eq!(preview_at(&parsed.module, NodeId(0)), "var a = 1;");
    }

    #[test]
    fn preview_truncates_long_code() {
        let code = format!("foo({});", "1, ".repeat(100));
        let parsed = parse(&code).unwrap();
        let ModuleItem::Stmt(stmt) = &parsed.module.body[0] else {
            panic!("expected statement");
        };
        let preview = code_preview(stmt);
        assert!(preview.ends_with('…'));
        assert_eq!(preview.chars().count(), PREVIEW_LEN + 1);
    }
}

//! Constant evaluation over literal expressions
//!
//! Evaluates the small arithmetic language obfuscators use in rotator
//! sentinels and decoder arguments. Anything outside it (identifiers, member
//! reads, unknown calls) makes the whole evaluation fail instead of guessing.

use swc_ecma_ast::{BinaryOp, Callee, Expr, Lit, UnaryOp};

use crate::helpers::{js_number_to_string, unparen};

const MAX_DEPTH: u32 = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum JsValue {
    Number(f64),
    String(String),
    Bool(bool),
    Null,
    Undefined,
}

impl JsValue {
    pub fn to_number(&self) -> f64 {
        match self {
            JsValue::Number(n) => *n,
            JsValue::String(s) => string_to_number(s),
            JsValue::Bool(b) => f64::from(u8::from(*b)),
            JsValue::Null => 0.0,
            JsValue::Undefined => f64::NAN,
        }
    }

    pub fn to_js_string(&self) -> String {
        match self {
            JsValue::Number(n) => js_number_to_string(*n),
            JsValue::String(s) => s.clone(),
            JsValue::Bool(b) => b.to_string(),
            JsValue::Null => "null".to_string(),
            JsValue::Undefined => "undefined".to_string(),
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            JsValue::Number(n) => *n != 0.0 && !n.is_nan(),
            JsValue::String(s) => !s.is_empty(),
            JsValue::Bool(b) => *b,
            JsValue::Null | JsValue::Undefined => false,
        }
    }

    fn to_int32(&self) -> i32 {
        to_uint32(self.to_number()) as i32
    }

    fn to_uint32(&self) -> u32 {
        to_uint32(self.to_number())
    }

    pub fn strict_equals(&self, other: &JsValue) -> bool {
        match (self, other) {
            (JsValue::Number(a), JsValue::Number(b)) => a == b,
            (a, b) => a == b,
        }
    }

    pub fn loose_equals(&self, other: &JsValue) -> bool {
        match (self, other) {
            (JsValue::Null | JsValue::Undefined, JsValue::Null | JsValue::Undefined) => true,
            (JsValue::Null | JsValue::Undefined, _) | (_, JsValue::Null | JsValue::Undefined) => false,
            (JsValue::String(a), JsValue::String(b)) => a == b,
            (a, b) => a.to_number() == b.to_number(),
        }
    }
}

fn to_uint32(n: f64) -> u32 {
    if !n.is_finite() {
        return 0;
    }
    n.trunc().rem_euclid(4_294_967_296.0) as u32
}

/// `ToNumber` applied to a string.
pub fn string_to_number(s: &str) -> f64 {
    let s = s.trim();
    if s.is_empty() {
        return 0.0;
    }
    let radix = match s.get(..2) {
        Some("0x" | "0X") => Some(16),
        Some("0o" | "0O") => Some(8),
        Some("0b" | "0B") => Some(2),
        _ => None,
    };
    if let Some(radix) = radix {
        let digits = &s[2..];
        if digits.is_empty() {
            return f64::NAN;
        }
        return digits.chars().try_fold(0.0, |acc, c| {
            c.to_digit(radix).map(|d| acc * f64::from(radix) + f64::from(d))
        })
        .unwrap_or(f64::NAN);
    }
    match s {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    let numeric = s
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'));
    if !numeric {
        return f64::NAN;
    }
    s.parse().unwrap_or(f64::NAN)
}

/// `parseInt(s, radix)`
pub fn parse_int(s: &str, radix: Option<u32>) -> f64 {
    let mut s = s.trim_start();
    let mut sign = 1.0;
    if let Some(rest) = s.strip_prefix('-') {
        sign = -1.0;
        s = rest;
    } else if let Some(rest) = s.strip_prefix('+') {
        s = rest;
    }
    let mut radix = radix.unwrap_or(0);
    if radix == 0 || radix == 16 {
        if let Some(rest) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            s = rest;
            radix = 16;
        }
    }
    if radix == 0 {
        radix = 10;
    }
    if !(2..=36).contains(&radix) {
        return f64::NAN;
    }
    let mut value = 0.0;
    let mut any = false;
    for c in s.chars() {
        let Some(digit) = c.to_digit(radix) else {
            break;
        };
        value = value * f64::from(radix) + f64::from(digit);
        any = true;
    }
    if any { sign * value } else { f64::NAN }
}

/// Resolves calls the evaluator does not know natively, such as decoders.
pub trait CallResolver {
    fn call(&self, callee: &str, args: &[JsValue]) -> Option<JsValue>;
}

struct NoCalls;

impl CallResolver for NoCalls {
    fn call(&self, _: &str, _: &[JsValue]) -> Option<JsValue> {
        None
    }
}

/// Evaluates a literal-only expression.
pub fn evaluate(expr: &Expr) -> Option<JsValue> {
    Evaluator::new(&NoCalls).eval(expr)
}

pub struct Evaluator<'a> {
    resolver: &'a dyn CallResolver,
    depth: u32,
}

impl<'a> Evaluator<'a> {
    pub fn new(resolver: &'a dyn CallResolver) -> Self {
        Self { resolver, depth: 0 }
    }

    pub fn eval(&mut self, expr: &Expr) -> Option<JsValue> {
        if self.depth >= MAX_DEPTH {
            return None;
        }
        self.depth += 1;
        let value = self.eval_inner(unparen(expr));
        self.depth -= 1;
        value
    }

    fn eval_inner(&mut self, expr: &Expr) -> Option<JsValue> {
        match expr {
            Expr::Lit(Lit::Num(n)) => Some(JsValue::Number(n.value)),
            Expr::Lit(Lit::Str(s)) => Some(JsValue::String(s.value.to_string())),
            Expr::Lit(Lit::Bool(b)) => Some(JsValue::Bool(b.value)),
            Expr::Lit(Lit::Null(_)) => Some(JsValue::Null),
            Expr::Ident(ident) if &*ident.sym == "undefined" => Some(JsValue::Undefined),
            Expr::Ident(ident) if &*ident.sym == "NaN" => Some(JsValue::Number(f64::NAN)),
            Expr::Ident(ident) if &*ident.sym == "Infinity" => Some(JsValue::Number(f64::INFINITY)),
            Expr::Unary(unary) => {
                let arg = self.eval(&unary.arg)?;
                Some(match unary.op {
                    UnaryOp::Minus => JsValue::Number(-arg.to_number()),
                    UnaryOp::Plus => JsValue::Number(arg.to_number()),
                    UnaryOp::Bang => JsValue::Bool(!arg.is_truthy()),
                    UnaryOp::Tilde => JsValue::Number(f64::from(!arg.to_int32())),
                    UnaryOp::Void => JsValue::Undefined,
                    _ => return None,
                })
            }
            Expr::Bin(bin) => {
                let left = self.eval(&bin.left)?;
                // Short-circuit operators only evaluate what they need.
                match bin.op {
                    BinaryOp::LogicalAnd if !left.is_truthy() => return Some(left),
                    BinaryOp::LogicalOr if left.is_truthy() => return Some(left),
                    BinaryOp::LogicalAnd | BinaryOp::LogicalOr => return self.eval(&bin.right),
                    _ => {}
                }
                let right = self.eval(&bin.right)?;
                binary(bin.op, &left, &right)
            }
            Expr::Call(call) => {
                let Callee::Expr(callee) = &call.callee else {
                    return None;
                };
                let Expr::Ident(callee) = unparen(callee) else {
                    return None;
                };
                let mut args = Vec::with_capacity(call.args.len());
                for arg in &call.args {
                    if arg.spread.is_some() {
                        return None;
                    }
                    args.push(self.eval(&arg.expr)?);
                }
                match &*callee.sym {
                    "parseInt" => {
                        let input = args.first()?.to_js_string();
                        let radix = args.get(1).map(|r| r.to_int32()).filter(|r| *r != 0);
                        Some(JsValue::Number(parse_int(&input, radix.map(|r| r as u32))))
                    }
                    "parseFloat" => {
                        let input = args.first()?.to_js_string();
                        Some(JsValue::Number(parse_float(&input)))
                    }
                    name => self.resolver.call(name, &args),
                }
            }
            _ => None,
        }
    }
}

fn parse_float(s: &str) -> f64 {
    let s = s.trim_start();
    let end = s
        .char_indices()
        .take_while(|&(i, c)| c.is_ascii_digit() || c == '.' || ((c == '-' || c == '+') && i == 0))
        .map(|(i, c)| i + c.len_utf8())
        .last()
        .unwrap_or(0);
    s[..end].parse().unwrap_or(f64::NAN)
}

fn compare(left: &JsValue, right: &JsValue) -> Option<std::cmp::Ordering> {
    match (left, right) {
        (JsValue::String(a), JsValue::String(b)) => Some(a.encode_utf16().cmp(b.encode_utf16())),
        (a, b) => a.to_number().partial_cmp(&b.to_number()),
    }
}

fn binary(op: BinaryOp, left: &JsValue, right: &JsValue) -> Option<JsValue> {
    use std::cmp::Ordering::{Equal, Greater, Less};

    let number = |n: f64| Some(JsValue::Number(n));
    match op {
        BinaryOp::Add => match (left, right) {
            (JsValue::String(_), _) | (_, JsValue::String(_)) => Some(JsValue::String(format!(
                "{}{}",
                left.to_js_string(),
                right.to_js_string()
            ))),
            _ => number(left.to_number() + right.to_number()),
        },
        BinaryOp::Sub => number(left.to_number() - right.to_number()),
        BinaryOp::Mul => number(left.to_number() * right.to_number()),
        BinaryOp::Div => number(left.to_number() / right.to_number()),
        BinaryOp::Mod => number(left.to_number() % right.to_number()),
        BinaryOp::Exp => number(left.to_number().powf(right.to_number())),
        BinaryOp::BitAnd => number(f64::from(left.to_int32() & right.to_int32())),
        BinaryOp::BitOr => number(f64::from(left.to_int32() | right.to_int32())),
        BinaryOp::BitXor => number(f64::from(left.to_int32() ^ right.to_int32())),
        BinaryOp::LShift => number(f64::from(left.to_int32().wrapping_shl(right.to_uint32() & 31))),
        BinaryOp::RShift => number(f64::from(left.to_int32() >> (right.to_uint32() & 31))),
        BinaryOp::ZeroFillRShift => number(f64::from(left.to_uint32() >> (right.to_uint32() & 31))),
        BinaryOp::EqEqEq => Some(JsValue::Bool(left.strict_equals(right))),
        BinaryOp::NotEqEq => Some(JsValue::Bool(!left.strict_equals(right))),
        BinaryOp::EqEq => Some(JsValue::Bool(left.loose_equals(right))),
        BinaryOp::NotEq => Some(JsValue::Bool(!left.loose_equals(right))),
        BinaryOp::Lt => Some(JsValue::Bool(compare(left, right) == Some(Less))),
        BinaryOp::Gt => Some(JsValue::Bool(compare(left, right) == Some(Greater))),
        BinaryOp::LtEq => Some(JsValue::Bool(matches!(compare(left, right), Some(Less | Equal)))),
        BinaryOp::GtEq => Some(JsValue::Bool(matches!(compare(left, right), Some(Greater | Equal)))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use swc_ecma_ast::{ModuleItem, Stmt};

    fn eval_str(code: &str) -> Option<JsValue> {
        let parsed = parse(code).unwrap();
        match parsed.module.body.into_iter().next() {
            Some(ModuleItem::Stmt(Stmt::Expr(stmt))) => evaluate(&stmt.expr),
            other => panic!("expected expression statement, got {other:?}"),
        }
    }

    #[test]
    fn arithmetic_and_bitwise() {
        assert_eq!(eval_str("0x10 * 2 + -3;"), Some(JsValue::Number(29.0)));
        assert_eq!(eval_str("~5;"), Some(JsValue::Number(-6.0)));
        assert_eq!(eval_str("-1 >>> 28;"), Some(JsValue::Number(15.0)));
        assert_eq!(eval_str("7 % 4 ** 1;"), Some(JsValue::Number(3.0)));
    }

    #[test]
    fn string_concatenation_and_coercion() {
        assert_eq!(eval_str("'a' + 1 + 2;"), Some(JsValue::String("a12".into())));
        assert_eq!(eval_str("'6' * '7';"), Some(JsValue::Number(42.0)));
        assert_eq!(eval_str("!'';"), Some(JsValue::Bool(true)));
    }

    #[test]
    fn equality() {
        assert_eq!(eval_str("'1' == 1;"), Some(JsValue::Bool(true)));
        assert_eq!(eval_str("'1' === 1;"), Some(JsValue::Bool(false)));
        assert_eq!(eval_str("null == undefined;"), Some(JsValue::Bool(true)));
    }

    #[test]
    fn parse_int_semantics() {
        assert_eq!(parse_int("123abc", None), 123.0);
        assert_eq!(parse_int("  -0x1f", None), -31.0);
        assert_eq!(parse_int("z", Some(36)), 35.0);
        assert!(parse_int("abc", None).is_nan());
        assert_eq!(eval_str("parseInt('42px') / 2;"), Some(JsValue::Number(21.0)));
    }

    #[test]
    fn to_number_of_strings() {
        assert_eq!(string_to_number("0x1a"), 26.0);
        assert_eq!(string_to_number(" 12 "), 12.0);
        assert_eq!(string_to_number(""), 0.0);
        assert!(string_to_number("inf").is_nan());
        assert!(string_to_number("1px").is_nan());
    }

    #[test]
    fn unknown_identifiers_fail() {
        assert_eq!(eval_str("a + 1;"), None);
        assert_eq!(eval_str("f(1);"), None);
    }

    struct Double;

    impl CallResolver for Double {
        fn call(&self, callee: &str, args: &[JsValue]) -> Option<JsValue> {
            (callee == "double").then(|| JsValue::Number(args[0].to_number() * 2.0))
        }
    }

    #[test]
    fn resolver_handles_calls() {
        let parsed = parse("double(4) + 1;").unwrap();
        let Some(ModuleItem::Stmt(Stmt::Expr(stmt))) = parsed.module.body.first() else {
            panic!("expected expression");
        };
        let value = Evaluator::new(&Double).eval(&stmt.expr);
        assert_eq!(value, Some(JsValue::Number(9.0)));
    }
}

//! Locating decoders
//!
//! A decoder is a top-level function that takes an index (and for RC4 a
//! key), shifts the index by a constant and reads the string array at it:
//!
//! ```js
//! function _0x4e2c(index, key) {
//!     var strings = _0x3f2a();
//!     return _0x4e2c = function (i, k) {
//!         i = i - 0x1a0;
//!         var value = strings[i];
//!         return value;
//!     }, _0x4e2c(index, key);
//! }
//! ```

use std::collections::HashSet;

use swc_ecma_ast::{
    ArrowExpr, AssignExpr, AssignOp, AssignTarget, BinExpr, BinaryOp, CallExpr, Callee, Decl, Expr,
    Function, Ident, Lit, MemberExpr, MemberProp, Module, ModuleItem, Pat, ReturnStmt,
    SimpleAssignTarget, Stmt, UpdateExpr, VarDeclarator,
};
use swc_ecma_visit::{Visit, VisitWith};

use super::array::{ArrayForm, EncodedArray};
use super::encoding::{Encoding, OBFUSCATOR_ALPHABET};
use super::eval::{JsValue, evaluate};
use crate::helpers::{binding_ident_name, is_member_named, unparen};
use crate::semantic::{BindingKey, ScopeGraph};

#[derive(Debug, Clone)]
pub struct Decoder {
    pub name: String,
    pub key: BindingKey,
    /// Added to the index argument before reading the array.
    pub offset: f64,
    pub encoding: Encoding,
}

impl Decoder {
    /// Reads and decodes the entry the call `decoder(args..)` would return.
    pub fn decode(&self, strings: &[String], index: f64, key: Option<&str>) -> Option<String> {
        let index = index + self.offset;
        if index.fract() != 0.0 || index < 0.0 {
            return None;
        }
        let raw = strings.get(index as usize)?;
        self.encoding.decode(raw, key)
    }
}

/// Facts gathered from one function body.
#[derive(Default)]
struct DecoderScan<'a> {
    array: &'a str,
    /// Names holding the array: the array itself, or locals initialised
    /// from the array function.
    holders: HashSet<String>,
    /// The index parameter of each scanned function, and locals copied from it.
    indexes: HashSet<String>,
    /// Locals holding the looked-up entry unchanged.
    elements: HashSet<String>,
    /// Locals computed from the entry.
    derived: HashSet<String>,
    indexes_array: bool,
    /// The array is read at some other position, or the index is rewritten
    /// in a way the offset does not capture.
    rejected: bool,
    returns_element: bool,
    returns_derived: bool,
    offset: Option<f64>,
    has_alphabet: bool,
    has_mod_256: bool,
    xor: Option<u32>,
}

impl<'a> DecoderScan<'a> {
    fn new(array: &'a EncodedArray) -> Self {
        let mut holders = HashSet::new();
        if array.form == ArrayForm::Variable {
            holders.insert(array.name.clone());
        }
        Self {
            array: &array.name,
            holders,
            ..Default::default()
        }
    }

    fn is_array_call(&self, expr: &Expr) -> bool {
        match unparen(expr) {
            Expr::Call(call) => match &call.callee {
                Callee::Expr(callee) => {
                    matches!(unparen(callee), Expr::Ident(ident) if &*ident.sym == self.array)
                }
                _ => false,
            },
            _ => false,
        }
    }

    fn is_holder(&self, expr: &Expr) -> bool {
        match unparen(expr) {
            Expr::Ident(ident) => self.holders.contains(&*ident.sym),
            other => self.is_array_call(other),
        }
    }

    fn is_index(&self, expr: &Expr) -> bool {
        matches!(unparen(expr), Expr::Ident(ident) if self.indexes.contains(&*ident.sym))
    }

    /// `holder[index]`
    fn is_lookup(&self, member: &MemberExpr) -> bool {
        match &member.prop {
            MemberProp::Computed(prop) => self.is_holder(&member.obj) && self.is_index(&prop.expr),
            _ => false,
        }
    }

    /// The entry itself: a lookup or a local holding it.
    fn is_element(&self, expr: &Expr) -> bool {
        match unparen(expr) {
            Expr::Member(member) => self.is_lookup(member),
            Expr::Ident(ident) => self.elements.contains(&*ident.sym),
            _ => false,
        }
    }

    fn carries_element(&self, expr: &Expr) -> bool {
        let mut carries = CarriesElement { scan: self, found: false };
        expr.visit_with(&mut carries);
        carries.found
    }

    /// Records what `name` holds after it is assigned `value`.
    fn track(&mut self, name: &str, value: &Expr, op: AssignOp) {
        let element = op == AssignOp::Assign && self.is_element(value);
        let derived = !element
            && (self.carries_element(value) || (op != AssignOp::Assign && self.flows(name)));
        self.elements.remove(name);
        self.derived.remove(name);
        if element {
            self.elements.insert(name.to_string());
        } else if derived {
            self.derived.insert(name.to_string());
        }
    }

    fn flows(&self, name: &str) -> bool {
        self.elements.contains(name) || self.derived.contains(name)
    }

    /// `index = index ± N`, `index -= N` or `index += N` ahead of the lookup.
    /// Any other write ahead of the lookup moves the index out of reach.
    fn index_write(&mut self, op: AssignOp, target: &str, right: &Expr) {
        if self.indexes_array {
            return;
        }
        match offset_of(op, target, right) {
            Some(offset) if self.offset.is_none() => self.offset = Some(offset),
            _ => self.rejected = true,
        }
    }
}

struct CarriesElement<'s, 'a> {
    scan: &'s DecoderScan<'a>,
    found: bool,
}

impl Visit for CarriesElement<'_, '_> {
    fn visit_ident(&mut self, ident: &Ident) {
        self.found |= self.scan.flows(&ident.sym);
    }

    fn visit_member_expr(&mut self, member: &MemberExpr) {
        self.found |= self.scan.is_lookup(member);
        member.visit_children_with(self);
    }

    fn visit_function(&mut self, _: &Function) {}

    fn visit_arrow_expr(&mut self, _: &ArrowExpr) {}
}

fn offset_of(assign_op: AssignOp, target: &str, right: &Expr) -> Option<f64> {
    let (sign, amount) = match assign_op {
        AssignOp::SubAssign => (-1.0, right),
        AssignOp::AddAssign => (1.0, right),
        AssignOp::Assign => match unparen(right) {
            Expr::Bin(bin) if matches!(unparen(&bin.left), Expr::Ident(i) if &*i.sym == target) => {
                match bin.op {
                    BinaryOp::Sub => (-1.0, &*bin.right),
                    BinaryOp::Add => (1.0, &*bin.right),
                    _ => return None,
                }
            }
            _ => return None,
        },
        _ => return None,
    };
    match evaluate(amount)? {
        JsValue::Number(n) => Some(sign * n),
        _ => None,
    }
}

impl Visit for DecoderScan<'_> {
    fn visit_function(&mut self, function: &Function) {
        if let Some(index) = function.params.first().and_then(|param| binding_ident_name(&param.pat)) {
            self.indexes.insert(index.sym.to_string());
        }
        function.visit_children_with(self);
    }

    fn visit_var_declarator(&mut self, declarator: &VarDeclarator) {
        declarator.visit_children_with(self);
        let Some(name) = binding_ident_name(&declarator.name) else {
            return;
        };
        let name = &*name.sym;
        if self.indexes.contains(name) {
            self.rejected |= !self.indexes_array;
            return;
        }
        let Some(init) = &declarator.init else {
            return;
        };
        if self.is_holder(init) {
            self.holders.insert(name.to_string());
        } else if self.is_index(init) {
            self.indexes.insert(name.to_string());
        } else if let Expr::Bin(bin) = unparen(init) {
            // var j = index - N;
            if let Expr::Ident(index) = unparen(&bin.left) {
                if self.indexes.contains(&*index.sym) && self.offset.is_none() && !self.indexes_array {
                    if let Some(offset) = offset_of(AssignOp::Assign, &index.sym, init) {
                        self.offset = Some(offset);
                        self.indexes.insert(name.to_string());
                        return;
                    }
                }
            }
        }
        self.track(name, init, AssignOp::Assign);
    }

    fn visit_assign_expr(&mut self, assign: &AssignExpr) {
        assign.visit_children_with(self);
        if let AssignTarget::Simple(SimpleAssignTarget::Ident(target)) = &assign.left {
            let name = &*target.id.sym;
            if self.indexes.contains(name) {
                self.index_write(assign.op, name, &assign.right);
            } else {
                self.track(name, &assign.right, assign.op);
            }
        }
    }

    fn visit_update_expr(&mut self, update: &UpdateExpr) {
        if self.is_index(&update.arg) {
            self.rejected |= !self.indexes_array;
        }
        update.visit_children_with(self);
    }

    fn visit_member_expr(&mut self, member: &MemberExpr) {
        if let MemberProp::Computed(prop) = &member.prop {
            if self.is_holder(&member.obj) {
                if self.is_index(&prop.expr) {
                    self.indexes_array = true;
                } else if !matches!(unparen(&prop.expr), Expr::Lit(Lit::Num(_))) {
                    self.rejected = true;
                }
            }
        }
        member.visit_children_with(self);
    }

    fn visit_return_stmt(&mut self, ret: &ReturnStmt) {
        if let Some(arg) = &ret.arg {
            if self.is_element(arg) {
                self.returns_element = true;
            } else if self.carries_element(arg) {
                self.returns_derived = true;
            }
        }
        ret.visit_children_with(self);
    }

    fn visit_bin_expr(&mut self, bin: &BinExpr) {
        if bin.op == BinaryOp::Mod {
            if let Some(JsValue::Number(n)) = evaluate(&bin.right) {
                self.has_mod_256 |= n == 256.0;
            }
        }
        bin.visit_children_with(self);
    }

    fn visit_call_expr(&mut self, call: &CallExpr) {
        // String.fromCharCode(s.charCodeAt(i) ^ n)
        if let Callee::Expr(callee) = &call.callee {
            if let Expr::Member(member) = unparen(callee) {
                let from_char_code = is_member_named(&member.prop, "fromCharCode")
                    && matches!(unparen(&member.obj), Expr::Ident(i) if &*i.sym == "String");
                if from_char_code {
                    for arg in &call.args {
                        if let Expr::Bin(bin) = unparen(&arg.expr) {
                            if bin.op == BinaryOp::BitXor {
                                let key = evaluate(&bin.right).or_else(|| evaluate(&bin.left));
                                if let Some(JsValue::Number(n)) = key {
                                    self.xor = Some(n as u32);
                                }
                            }
                        }
                    }
                }
            }
        }
        call.visit_children_with(self);
    }

    fn visit_lit(&mut self, lit: &Lit) {
        if let Lit::Str(s) = lit {
            let alphabet = OBFUSCATOR_ALPHABET.trim_end_matches('=');
            self.has_alphabet |= s.value.starts_with(alphabet);
        }
    }
}

fn scan(function: &Function, array: &EncodedArray) -> Option<(f64, Encoding)> {
    let params = function
        .params
        .iter()
        .filter(|param| matches!(param.pat, Pat::Ident(_)))
        .count();
    if params == 0 || params != function.params.len() || params > 2 {
        return None;
    }
    let mut scan = DecoderScan::new(array);
    function.visit_with(&mut scan);
    if !scan.indexes_array || scan.rejected {
        return None;
    }
    let encoding = match (scan.has_alphabet, scan.xor) {
        (true, _) if scan.has_mod_256 && params == 2 => Encoding::Rc4,
        (true, _) => Encoding::Base64,
        (false, Some(key)) => Encoding::Xor(key),
        (false, None) => Encoding::None,
    };
    // Without an encoding the entry must come back untouched.
    let returns = match encoding {
        Encoding::None => scan.returns_element,
        _ => scan.returns_element || scan.returns_derived,
    };
    returns.then_some((scan.offset.unwrap_or(0.0), encoding))
}

/// Top-level decoders reading `array`, in source order.
pub fn find_decoders(module: &Module, graph: &ScopeGraph, array: &EncodedArray) -> Vec<Decoder> {
    let mut decoders = Vec::new();
    for item in &module.body {
        let candidate = match item {
            ModuleItem::Stmt(Stmt::Decl(Decl::Fn(decl))) if *decl.ident.sym != *array.name => {
                Some((decl.ident.sym.to_string(), &*decl.function))
            }
            // var decoder = function (index) { ... };
            ModuleItem::Stmt(Stmt::Decl(Decl::Var(var))) if var.decls.len() == 1 => {
                let declarator = &var.decls[0];
                match (binding_ident_name(&declarator.name), declarator.init.as_deref().map(unparen)) {
                    (Some(name), Some(Expr::Fn(f))) => Some((name.sym.to_string(), &*f.function)),
                    _ => None,
                }
            }
            _ => None,
        };
        let Some((name, function)) = candidate else {
            continue;
        };
        let Some((offset, encoding)) = scan(function, array) else {
            continue;
        };
        let Some(id) = graph.lookup(&name, graph.root_scope()) else {
            continue;
        };
        decoders.push(Decoder {
            key: graph.key(id),
            name,
            offset,
            encoding,
        });
    }
    decoders
}

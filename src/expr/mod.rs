//! Sandboxed boolean expressions over request data.
//!
//! Rule files and programmatic handlers can match on the parsed JSON body
//! with small comparison expressions:
//!
//! ```text
//! body.user.age >= 18 && body.user.roles[0] == "admin"
//! body.total > 100 || body.vip == true
//! ```
//!
//! Expressions are parsed once into an [`Expr`] and evaluated against a root
//! JSON object (the matcher supplies `{"body": <parsed body>}`). Missing
//! paths resolve to `null`, never an error. Evaluation is a bounded tree
//! walk: source length and nesting depth are capped, and there are no calls,
//! no arithmetic, and no side effects.

mod lexer;
mod parser;

use std::borrow::Cow;
use std::fmt;

use serde_json::Value;
use thiserror::Error;

use parser::{Ast, CmpOp, PathSeg};

/// Longest accepted expression source, in bytes.
pub const MAX_SOURCE_LEN: usize = 4096;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("expression too long ({0} bytes, max {MAX_SOURCE_LEN})")]
    TooLong(usize),

    #[error("expression nested too deeply")]
    TooDeep,

    #[error("parse error at byte {pos}: {message}")]
    Parse { pos: usize, message: String },

    #[error("type error: {0}")]
    Type(String),

    #[error("expression did not evaluate to a boolean")]
    NotBoolean,
}

/// A parsed, reusable match expression.
#[derive(Debug, Clone)]
pub struct Expr {
    ast: Ast,
    source: String,
}

impl Expr {
    /// Parse `source`, enforcing the sandbox limits.
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        if source.len() > MAX_SOURCE_LEN {
            return Err(ExprError::TooLong(source.len()));
        }
        let tokens = lexer::tokenize(source)?;
        if tokens.is_empty() {
            return Err(ExprError::Parse { pos: 0, message: "empty expression".into() });
        }
        let ast = parser::parse(&tokens)?;
        Ok(Self { ast, source: source.to_string() })
    }

    /// Evaluate against a root object. The result must be a boolean.
    pub fn eval(&self, root: &Value) -> Result<bool, ExprError> {
        match eval_node(&self.ast, root)?.as_ref() {
            Value::Bool(b) => Ok(*b),
            _ => Err(ExprError::NotBoolean),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Resolve a bare dotted/indexed path (`headers.x-request-id`, `body.items[0]`)
/// inside `root`. Missing segments resolve to `null`.
///
/// Used by response templating, which shares the path syntax but not the
/// boolean grammar.
pub fn lookup_path<'a>(root: &'a Value, path: &str) -> Result<&'a Value, ExprError> {
    if path.len() > MAX_SOURCE_LEN {
        return Err(ExprError::TooLong(path.len()));
    }
    let tokens = lexer::tokenize(path)?;
    let ast = parser::parse(&tokens)?;
    match ast {
        Ast::Path(segs) => Ok(walk(root, &segs)),
        _ => Err(ExprError::Parse { pos: 0, message: "expected a plain path".into() }),
    }
}

static NULL: Value = Value::Null;

fn walk<'a>(root: &'a Value, segs: &[PathSeg]) -> &'a Value {
    let mut at = root;
    for seg in segs {
        at = match seg {
            PathSeg::Key(k) => at.get(k.as_str()).unwrap_or(&NULL),
            PathSeg::Index(i) => at.get(*i).unwrap_or(&NULL),
        };
    }
    at
}

fn eval_node<'v>(node: &'v Ast, root: &'v Value) -> Result<Cow<'v, Value>, ExprError> {
    match node {
        Ast::Literal(v) => Ok(Cow::Borrowed(v)),
        Ast::Path(segs) => Ok(Cow::Borrowed(walk(root, segs))),
        Ast::Not(inner) => {
            let v = eval_node(inner, root)?;
            match v.as_ref() {
                Value::Bool(b) => Ok(Cow::Owned(Value::Bool(!b))),
                other => Err(type_err("!", other)),
            }
        }
        Ast::And(l, r) => {
            if !expect_bool("&&", eval_node(l, root)?.as_ref())? {
                return Ok(Cow::Owned(Value::Bool(false)));
            }
            let rhs = expect_bool("&&", eval_node(r, root)?.as_ref())?;
            Ok(Cow::Owned(Value::Bool(rhs)))
        }
        Ast::Or(l, r) => {
            if expect_bool("||", eval_node(l, root)?.as_ref())? {
                return Ok(Cow::Owned(Value::Bool(true)));
            }
            let rhs = expect_bool("||", eval_node(r, root)?.as_ref())?;
            Ok(Cow::Owned(Value::Bool(rhs)))
        }
        Ast::Cmp(op, l, r) => {
            let lv = eval_node(l, root)?;
            let rv = eval_node(r, root)?;
            compare(*op, lv.as_ref(), rv.as_ref()).map(|b| Cow::Owned(Value::Bool(b)))
        }
    }
}

fn expect_bool(op: &str, v: &Value) -> Result<bool, ExprError> {
    match v {
        Value::Bool(b) => Ok(*b),
        other => Err(type_err(op, other)),
    }
}

fn type_err(op: &str, got: &Value) -> ExprError {
    ExprError::Type(format!("'{op}' expects a boolean, got {}", kind(got)))
}

fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn compare(op: CmpOp, l: &Value, r: &Value) -> Result<bool, ExprError> {
    match op {
        CmpOp::Eq => Ok(values_equal(l, r)),
        CmpOp::Ne => Ok(!values_equal(l, r)),
        CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => {
            // Ordering is defined for number/number and string/string only.
            if let (Some(a), Some(b)) = (l.as_f64(), r.as_f64()) {
                Ok(apply_order(op, a.partial_cmp(&b)))
            } else if let (Value::String(a), Value::String(b)) = (l, r) {
                Ok(apply_order(op, a.partial_cmp(b)))
            } else {
                Err(ExprError::Type(format!(
                    "cannot order {} against {}",
                    kind(l),
                    kind(r)
                )))
            }
        }
    }
}

/// Equality that treats `1` and `1.0` as the same number; everything else is
/// deep JSON equality.
fn values_equal(l: &Value, r: &Value) -> bool {
    if let (Some(a), Some(b)) = (l.as_f64(), r.as_f64()) {
        return a == b;
    }
    l == r
}

fn apply_order(op: CmpOp, ord: Option<std::cmp::Ordering>) -> bool {
    use std::cmp::Ordering::*;
    match (op, ord) {
        (CmpOp::Lt, Some(Less)) => true,
        (CmpOp::Le, Some(Less | Equal)) => true,
        (CmpOp::Gt, Some(Greater)) => true,
        (CmpOp::Ge, Some(Greater | Equal)) => true,
        // NaN comparisons are simply false.
        _ => false,
    }
}

//! Recursive-descent parser for match expressions.
//!
//! Grammar (loosest binding first):
//!
//! ```text
//! expr       := and ("||" and)*
//! and        := unary ("&&" unary)*
//! unary      := "!" unary | comparison
//! comparison := operand (cmp-op operand)?
//! operand    := literal | path | "(" expr ")"
//! path       := ident ("." ident | "[" integer "]")*
//! literal    := number | string | "true" | "false" | "null"
//! ```

use serde_json::Value;

use super::ExprError;
use super::lexer::{Spanned, Token};

pub(super) const MAX_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Ast {
    Literal(Value),
    Path(Vec<PathSeg>),
    Not(Box<Ast>),
    And(Box<Ast>, Box<Ast>),
    Or(Box<Ast>, Box<Ast>),
    Cmp(CmpOp, Box<Ast>, Box<Ast>),
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum PathSeg {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

pub(super) fn parse(tokens: &[Spanned]) -> Result<Ast, ExprError> {
    let mut p = Parser { tokens, at: 0 };
    let ast = p.expr(0)?;
    if let Some(extra) = p.peek() {
        return Err(ExprError::Parse {
            pos: extra.pos,
            message: format!("unexpected trailing {:?}", extra.token),
        });
    }
    Ok(ast)
}

struct Parser<'t> {
    tokens: &'t [Spanned],
    at: usize,
}

impl<'t> Parser<'t> {
    fn peek(&self) -> Option<&'t Spanned> {
        self.tokens.get(self.at)
    }

    fn next(&mut self) -> Option<&'t Spanned> {
        let t = self.tokens.get(self.at);
        self.at += 1;
        t
    }

    fn eat(&mut self, want: &Token) -> bool {
        if self.peek().map(|s| &s.token) == Some(want) {
            self.at += 1;
            true
        } else {
            false
        }
    }

    fn err_here(&self, message: impl Into<String>) -> ExprError {
        let pos = self
            .peek()
            .map(|s| s.pos)
            .or_else(|| self.tokens.last().map(|s| s.pos + 1))
            .unwrap_or(0);
        ExprError::Parse { pos, message: message.into() }
    }

    fn guard(&self, depth: usize) -> Result<(), ExprError> {
        if depth > MAX_DEPTH {
            return Err(ExprError::TooDeep);
        }
        Ok(())
    }

    fn expr(&mut self, depth: usize) -> Result<Ast, ExprError> {
        self.guard(depth)?;
        let mut left = self.and(depth + 1)?;
        while self.eat(&Token::Or) {
            let right = self.and(depth + 1)?;
            left = Ast::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self, depth: usize) -> Result<Ast, ExprError> {
        self.guard(depth)?;
        let mut left = self.unary(depth + 1)?;
        while self.eat(&Token::And) {
            let right = self.unary(depth + 1)?;
            left = Ast::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self, depth: usize) -> Result<Ast, ExprError> {
        self.guard(depth)?;
        if self.eat(&Token::Not) {
            let inner = self.unary(depth + 1)?;
            return Ok(Ast::Not(Box::new(inner)));
        }
        self.comparison(depth + 1)
    }

    fn comparison(&mut self, depth: usize) -> Result<Ast, ExprError> {
        self.guard(depth)?;
        let left = self.operand(depth + 1)?;
        let op = match self.peek().map(|s| &s.token) {
            Some(Token::Eq) => CmpOp::Eq,
            Some(Token::Ne) => CmpOp::Ne,
            Some(Token::Lt) => CmpOp::Lt,
            Some(Token::Le) => CmpOp::Le,
            Some(Token::Gt) => CmpOp::Gt,
            Some(Token::Ge) => CmpOp::Ge,
            _ => return Ok(left),
        };
        self.at += 1;
        let right = self.operand(depth + 1)?;
        Ok(Ast::Cmp(op, Box::new(left), Box::new(right)))
    }

    fn operand(&mut self, depth: usize) -> Result<Ast, ExprError> {
        self.guard(depth)?;
        let spanned = match self.next() {
            Some(s) => s,
            None => return Err(self.err_here("unexpected end of expression")),
        };

        match &spanned.token {
            Token::LParen => {
                let inner = self.expr(depth + 1)?;
                if !self.eat(&Token::RParen) {
                    return Err(self.err_here("expected ')'"));
                }
                Ok(inner)
            }
            Token::Number(n) => Ok(Ast::Literal(number_value(*n))),
            Token::Str(s) => Ok(Ast::Literal(Value::String(s.clone()))),
            Token::Ident(name) => match name.as_str() {
                "true" => Ok(Ast::Literal(Value::Bool(true))),
                "false" => Ok(Ast::Literal(Value::Bool(false))),
                "null" => Ok(Ast::Literal(Value::Null)),
                _ => self.path(name.clone()),
            },
            other => Err(ExprError::Parse {
                pos: spanned.pos,
                message: format!("unexpected {other:?}"),
            }),
        }
    }

    fn path(&mut self, root: String) -> Result<Ast, ExprError> {
        let mut segs = vec![PathSeg::Key(root)];
        loop {
            if self.eat(&Token::Dot) {
                match self.next().map(|s| &s.token) {
                    Some(Token::Ident(key)) => segs.push(PathSeg::Key(key.clone())),
                    _ => return Err(self.err_here("expected key after '.'")),
                }
            } else if self.eat(&Token::LBracket) {
                let idx = match self.next().map(|s| &s.token) {
                    Some(Token::Number(n)) if n.fract() == 0.0 && *n >= 0.0 => *n as usize,
                    _ => return Err(self.err_here("expected non-negative integer index")),
                };
                if !self.eat(&Token::RBracket) {
                    return Err(self.err_here("expected ']'"));
                }
                segs.push(PathSeg::Index(idx));
            } else {
                break;
            }
        }
        Ok(Ast::Path(segs))
    }
}

/// Numbers with no fractional part compare cleanly against JSON integers.
fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < (i64::MAX as f64) {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}

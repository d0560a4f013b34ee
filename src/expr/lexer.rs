//! Tokenizer for match expressions.

use super::ExprError;

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    Not,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A token plus the byte offset it started at, for error messages.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct Spanned {
    pub token: Token,
    pub pos: usize,
}

pub(super) fn tokenize(src: &str) -> Result<Vec<Spanned>, ExprError> {
    let bytes = src.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let start = i;
        let c = bytes[i] as char;

        match c {
            ' ' | '\t' | '\r' | '\n' => {
                i += 1;
            }
            '(' => {
                out.push(Spanned { token: Token::LParen, pos: start });
                i += 1;
            }
            ')' => {
                out.push(Spanned { token: Token::RParen, pos: start });
                i += 1;
            }
            '[' => {
                out.push(Spanned { token: Token::LBracket, pos: start });
                i += 1;
            }
            ']' => {
                out.push(Spanned { token: Token::RBracket, pos: start });
                i += 1;
            }
            '.' => {
                out.push(Spanned { token: Token::Dot, pos: start });
                i += 1;
            }
            '&' => {
                if bytes.get(i + 1) == Some(&b'&') {
                    out.push(Spanned { token: Token::And, pos: start });
                    i += 2;
                } else {
                    return Err(parse_err(start, "expected '&&'"));
                }
            }
            '|' => {
                if bytes.get(i + 1) == Some(&b'|') {
                    out.push(Spanned { token: Token::Or, pos: start });
                    i += 2;
                } else {
                    return Err(parse_err(start, "expected '||'"));
                }
            }
            '=' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    out.push(Spanned { token: Token::Eq, pos: start });
                    i += 2;
                } else {
                    return Err(parse_err(start, "expected '==' (assignment is not supported)"));
                }
            }
            '!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    out.push(Spanned { token: Token::Ne, pos: start });
                    i += 2;
                } else {
                    out.push(Spanned { token: Token::Not, pos: start });
                    i += 1;
                }
            }
            '<' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    out.push(Spanned { token: Token::Le, pos: start });
                    i += 2;
                } else {
                    out.push(Spanned { token: Token::Lt, pos: start });
                    i += 1;
                }
            }
            '>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    out.push(Spanned { token: Token::Ge, pos: start });
                    i += 2;
                } else {
                    out.push(Spanned { token: Token::Gt, pos: start });
                    i += 1;
                }
            }
            '\'' | '"' => {
                let (s, next) = lex_string(src, i, c)?;
                out.push(Spanned { token: Token::Str(s), pos: start });
                i = next;
            }
            '-' | '0'..='9' => {
                let (n, next) = lex_number(src, i)?;
                out.push(Spanned { token: Token::Number(n), pos: start });
                i = next;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let (ident, next) = lex_ident(src, i);
                out.push(Spanned { token: Token::Ident(ident), pos: start });
                i = next;
            }
            other => {
                return Err(parse_err(start, &format!("unexpected character '{other}'")));
            }
        }
    }

    Ok(out)
}

fn parse_err(pos: usize, message: &str) -> ExprError {
    ExprError::Parse { pos, message: message.to_string() }
}

fn lex_string(src: &str, start: usize, quote: char) -> Result<(String, usize), ExprError> {
    let bytes = src.as_bytes();
    let mut out = String::new();
    let mut i = start + 1;

    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            '\\' => {
                let esc = bytes.get(i + 1).map(|b| *b as char);
                match esc {
                    Some('\\') => out.push('\\'),
                    Some('\'') => out.push('\''),
                    Some('"') => out.push('"'),
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(other) => {
                        return Err(parse_err(i, &format!("unknown escape '\\{other}'")));
                    }
                    None => return Err(parse_err(i, "dangling escape at end of input")),
                }
                i += 2;
            }
            c if c == quote => return Ok((out, i + 1)),
            // Non-ASCII is copied through byte-wise via the char boundary.
            _ => {
                let ch_len = src[i..].chars().next().map(char::len_utf8).unwrap_or(1);
                out.push_str(&src[i..i + ch_len]);
                i += ch_len;
            }
        }
    }

    Err(parse_err(start, "unterminated string literal"))
}

fn lex_number(src: &str, start: usize) -> Result<(f64, usize), ExprError> {
    let bytes = src.as_bytes();
    let mut i = start;

    if bytes[i] == b'-' {
        i += 1;
    }
    let digits_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i == digits_start {
        return Err(parse_err(start, "expected digits after '-'"));
    }
    if i < bytes.len() && bytes[i] == b'.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit) {
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
    }

    src[start..i]
        .parse::<f64>()
        .map(|n| (n, i))
        .map_err(|e| parse_err(start, &format!("bad number: {e}")))
}

fn lex_ident(src: &str, start: usize) -> (String, usize) {
    let bytes = src.as_bytes();
    let mut i = start + 1;
    // Hyphens are allowed inside identifiers so header keys like
    // `x-request-id` can appear in paths without quoting.
    while i < bytes.len() {
        let b = bytes[i];
        if b.is_ascii_alphanumeric() || b == b'_' || b == b'-' {
            i += 1;
        } else {
            break;
        }
    }
    (src[start..i].to_string(), i)
}

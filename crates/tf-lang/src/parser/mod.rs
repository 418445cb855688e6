use std::fmt;

use winnow::error::{ContextError, StrContext};
use winnow::prelude::*;

mod expr;

use crate::ast::Expr;
use crate::parse_utils::{UNCLOSED_PAREN, UNTERMINATED_STRING, is_token_char, ws_skip};


// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntaxErrorKind {
    Empty,
    UnbalancedParen,
    UnexpectedToken,
    UnterminatedString,
    IllegalCharacter,
    UnexpectedEnd,
}

impl fmt::Display for SyntaxErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyntaxErrorKind::Empty => "empty expression",
            SyntaxErrorKind::UnbalancedParen => "unbalanced parenthesis",
            SyntaxErrorKind::UnexpectedToken => "unexpected token",
            SyntaxErrorKind::UnterminatedString => "unterminated string literal",
            SyntaxErrorKind::IllegalCharacter => "illegal character",
            SyntaxErrorKind::UnexpectedEnd => "unexpected end of expression",
        };
        f.write_str(s)
    }
}

/// Rejected expression text. `offset` is the byte position of the offending
/// input (the opening quote for an unterminated string).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("syntax error at offset {offset}: {message}")]
pub struct SyntaxError {
    pub offset: usize,
    pub kind: SyntaxErrorKind,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Public entry point
// ---------------------------------------------------------------------------

/// Parse expression text into an [`Expr`]. The whole input must be consumed.
pub fn parse_expr(text: &str) -> Result<Expr, SyntaxError> {
    if text.trim().is_empty() {
        return Err(SyntaxError {
            offset: 0,
            kind: SyntaxErrorKind::Empty,
            message: SyntaxErrorKind::Empty.to_string(),
        });
    }
    (ws_skip, expr::expression, ws_skip)
        .map(|(_, e, _)| e)
        .parse(text)
        .map_err(|e| classify(text, e.offset(), e.inner()))
}

// ---------------------------------------------------------------------------
// Error classification
// ---------------------------------------------------------------------------

fn classify(text: &str, offset: usize, err: &ContextError) -> SyntaxError {
    let has_label = |label: &str| {
        err.context()
            .any(|c| matches!(c, StrContext::Label(l) if *l == label))
    };
    let expected: Vec<String> = err
        .context()
        .filter_map(|c| match c {
            StrContext::Expected(v) => Some(v.to_string()),
            _ => None,
        })
        .collect();

    let rest = &text[offset..];
    let found = rest.chars().next();

    let (kind, offset) = if has_label(UNTERMINATED_STRING) {
        let open = text[..offset].rfind('"').unwrap_or(offset);
        (SyntaxErrorKind::UnterminatedString, open)
    } else if rest.trim().is_empty() {
        if has_label(UNCLOSED_PAREN) {
            (SyntaxErrorKind::UnbalancedParen, offset)
        } else {
            (SyntaxErrorKind::UnexpectedEnd, offset)
        }
    } else {
        match found {
            Some(c) if !is_token_char(c) => (SyntaxErrorKind::IllegalCharacter, offset),
            Some(')') if closes_nothing(text, offset) => (SyntaxErrorKind::UnbalancedParen, offset),
            _ => (SyntaxErrorKind::UnexpectedToken, offset),
        }
    };

    let mut message = kind.to_string();
    if let Some(c) = found.filter(|_| kind != SyntaxErrorKind::UnterminatedString) {
        message.push_str(&format!(" {c:?}"));
    }
    if !expected.is_empty() {
        message.push_str(&format!("; expected {}", expected.join(" or ")));
    }

    SyntaxError {
        offset,
        kind,
        message,
    }
}

/// True when the `)` at `offset` has no matching `(` before it.
fn closes_nothing(text: &str, offset: usize) -> bool {
    let mut depth = 0i32;
    let mut in_string = false;
    for c in text[..offset].chars() {
        match c {
            '"' => in_string = !in_string,
            '(' if !in_string => depth += 1,
            ')' if !in_string => depth -= 1,
            _ => {}
        }
    }
    depth <= 0
}

use winnow::ascii::multispace0;
use winnow::combinator::{cut_err, fail, opt};
use winnow::error::{ContextError, ErrMode, StrContext, StrContextValue};
use winnow::prelude::*;
use winnow::token::{literal, one_of, take_while};

/// Label attached to a string literal whose closing quote is missing.
pub const UNTERMINATED_STRING: &str = "unterminated string";
/// Label attached to a `(` that never finds its `)`.
pub const UNCLOSED_PAREN: &str = "closing parenthesis";

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

pub fn ident<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    // First character must be alphabetic or underscore (not digit).
    if !input.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        return Err(ErrMode::Backtrack(ContextError::new()));
    }
    take_while(1.., |c: char| c.is_ascii_alphanumeric() || c == '_').parse_next(input)
}

// ---------------------------------------------------------------------------
// Strings
// ---------------------------------------------------------------------------

pub fn quoted_string(input: &mut &str) -> ModalResult<String> {
    literal("\"").parse_next(input)?;
    let content = take_while(0.., |c: char| c != '"').parse_next(input)?;
    cut_err(literal("\""))
        .context(StrContext::Label(UNTERMINATED_STRING))
        .context(StrContext::Expected(StrContextValue::Description(
            "closing quote",
        )))
        .parse_next(input)?;
    Ok(content.to_string())
}

// ---------------------------------------------------------------------------
// Whitespace
// ---------------------------------------------------------------------------

pub fn ws_skip(input: &mut &str) -> ModalResult<()> {
    multispace0.parse_next(input)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Number literal
// ---------------------------------------------------------------------------

/// Parse a decimal number: digits, optional fraction, optional exponent
/// (`1`, `2.5`, `6.02e23`, `1E-3`).
pub fn number_literal(input: &mut &str) -> ModalResult<f64> {
    let start = *input;
    take_while(1.., |c: char| c.is_ascii_digit()).parse_next(input)?;
    if opt(literal(".")).parse_next(input)?.is_some() {
        cut_err(take_while(1.., |c: char| c.is_ascii_digit()))
            .context(StrContext::Expected(StrContextValue::Description(
                "digits after decimal point",
            )))
            .parse_next(input)?;
    }
    exponent.parse_next(input)?;

    let text = &start[..start.len() - input.len()];
    match text.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => {
            // Report the literal itself, not the position after it.
            *input = start;
            cut_err(fail)
                .context(StrContext::Expected(StrContextValue::Description(
                    "finite number",
                )))
                .parse_next(input)
        }
    }
}

/// Optional `e[+-]digits` suffix. An `e` not followed by digits is left in
/// place for the caller to reject.
fn exponent(input: &mut &str) -> ModalResult<()> {
    let saved = *input;
    if opt(one_of(['e', 'E'])).parse_next(input)?.is_none() {
        return Ok(());
    }
    let _ = opt(one_of(['+', '-'])).parse_next(input)?;
    if !input.starts_with(|c: char| c.is_ascii_digit()) {
        *input = saved;
        return Ok(());
    }
    take_while(1.., |c: char| c.is_ascii_digit()).parse_next(input)?;
    Ok(())
}

/// True for characters that can start or continue some token of the
/// expression language.
pub fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || c.is_whitespace()
        || matches!(c, '_' | '.' | '"' | '+' | '-' | '*' | '/' | '^' | '(' | ')' | ',')
}

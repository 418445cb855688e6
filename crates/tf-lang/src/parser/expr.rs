use winnow::combinator::{alt, cut_err, opt};
use winnow::error::{StrContext, StrContextValue};
use winnow::prelude::*;
use winnow::token::literal;

use crate::ast::*;
use crate::parse_utils::{UNCLOSED_PAREN, ident, number_literal, quoted_string, ws_skip};

// ---------------------------------------------------------------------------
// Public entry: full expression
// ---------------------------------------------------------------------------

pub(crate) fn expression(input: &mut &str) -> ModalResult<Expr> {
    add_expr.parse_next(input)
}

// ---------------------------------------------------------------------------
// Precedence levels (lowest to highest)
// ---------------------------------------------------------------------------

/// `add_expr = mul_expr { ("+" | "-") mul_expr }`
fn add_expr(input: &mut &str) -> ModalResult<Expr> {
    let mut left = mul_expr.parse_next(input)?;
    loop {
        ws_skip.parse_next(input)?;
        let op = opt(alt((
            literal("+").value(BinOp::Add),
            literal("-").value(BinOp::Sub),
        )))
        .parse_next(input)?;
        if let Some(op) = op {
            ws_skip.parse_next(input)?;
            let right = cut_err(mul_expr).parse_next(input)?;
            left = Expr::BinOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        } else {
            break;
        }
    }
    Ok(left)
}

/// `mul_expr = unary_expr { ("*" | "/") unary_expr }`
fn mul_expr(input: &mut &str) -> ModalResult<Expr> {
    let mut left = unary_expr.parse_next(input)?;
    loop {
        ws_skip.parse_next(input)?;
        let op = opt(alt((
            literal("*").value(BinOp::Mul),
            literal("/").value(BinOp::Div),
        )))
        .parse_next(input)?;
        if let Some(op) = op {
            ws_skip.parse_next(input)?;
            let right = cut_err(unary_expr).parse_next(input)?;
            left = Expr::BinOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        } else {
            break;
        }
    }
    Ok(left)
}

/// `unary_expr = "-" unary_expr | pow_expr`
///
/// Negation binds looser than `^`, so `-2^2` is `-(2^2)`.
fn unary_expr(input: &mut &str) -> ModalResult<Expr> {
    if opt(literal("-")).parse_next(input)?.is_some() {
        ws_skip.parse_next(input)?;
        let inner = cut_err(unary_expr).parse_next(input)?;
        Ok(Expr::Neg(Box::new(inner)))
    } else {
        pow_expr.parse_next(input)
    }
}

/// `pow_expr = primary [ "^" unary_expr ]`
///
/// Right-associative: the exponent recurses through `unary_expr`, which
/// also admits a negative exponent (`2^-1`).
fn pow_expr(input: &mut &str) -> ModalResult<Expr> {
    let base = primary.parse_next(input)?;
    ws_skip.parse_next(input)?;
    if opt(literal("^")).parse_next(input)?.is_some() {
        ws_skip.parse_next(input)?;
        let exp = cut_err(unary_expr).parse_next(input)?;
        return Ok(Expr::BinOp {
            op: BinOp::Pow,
            left: Box::new(base),
            right: Box::new(exp),
        });
    }
    Ok(base)
}

// ---------------------------------------------------------------------------
// Primary
// ---------------------------------------------------------------------------

fn primary(input: &mut &str) -> ModalResult<Expr> {
    alt((
        number_literal.map(Expr::Number),
        quoted_string.map(Expr::StringLit),
        paren_expr,
        ident_primary,
    ))
    .context(StrContext::Expected(StrContextValue::Description(
        "expression",
    )))
    .parse_next(input)
}

fn paren_expr(input: &mut &str) -> ModalResult<Expr> {
    literal("(").parse_next(input)?;
    ws_skip.parse_next(input)?;
    let inner = cut_err(expression).parse_next(input)?;
    ws_skip.parse_next(input)?;
    close_paren.parse_next(input)?;
    Ok(inner)
}

/// Function call when followed by `(`, variable reference otherwise.
fn ident_primary(input: &mut &str) -> ModalResult<Expr> {
    let name = ident.parse_next(input)?;
    ws_skip.parse_next(input)?;

    if opt(literal("(")).parse_next(input)?.is_some() {
        return parse_func_call_args(name.to_string(), input);
    }

    Ok(Expr::Var(name.to_string()))
}

fn parse_func_call_args(name: String, input: &mut &str) -> ModalResult<Expr> {
    ws_skip.parse_next(input)?;

    if opt(literal(")")).parse_next(input)?.is_some() {
        return Ok(Expr::FuncCall { name, args: vec![] });
    }

    let mut args = vec![cut_err(expression).parse_next(input)?];
    loop {
        ws_skip.parse_next(input)?;
        if opt(literal(",")).parse_next(input)?.is_some() {
            ws_skip.parse_next(input)?;
            args.push(cut_err(expression).parse_next(input)?);
        } else {
            break;
        }
    }
    close_paren.parse_next(input)?;

    Ok(Expr::FuncCall { name, args })
}

fn close_paren(input: &mut &str) -> ModalResult<()> {
    cut_err(literal(")"))
        .context(StrContext::Label(UNCLOSED_PAREN))
        .context(StrContext::Expected(StrContextValue::CharLiteral(')')))
        .void()
        .parse_next(input)
}

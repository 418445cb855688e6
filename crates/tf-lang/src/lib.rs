pub mod ast;
pub mod parse_utils;
mod parser;

pub use ast::{BinOp, Expr};
pub use parser::{SyntaxError, SyntaxErrorKind, parse_expr};

use std::collections::BTreeSet;
use std::fmt;

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Pow => "^",
        }
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

/// Parsed synthetic-variable expression. Built once per expression text and
/// shared read-only between evaluations.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Number literal (integer, decimal or exponent form).
    Number(f64),
    /// Double-quoted string literal; only meaningful as a call argument.
    StringLit(String),
    /// Bare identifier resolved against the variable mapping.
    Var(String),
    /// Binary arithmetic.
    BinOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Unary negation.
    Neg(Box<Expr>),
    /// Function call: `name(args...)`.
    FuncCall { name: String, args: Vec<Expr> },
}

impl Expr {
    /// Visit this node and every descendant, parents before children.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Expr)) {
        visit(self);
        match self {
            Expr::Number(_) | Expr::StringLit(_) | Expr::Var(_) => {}
            Expr::BinOp { left, right, .. } => {
                left.walk(visit);
                right.walk(visit);
            }
            Expr::Neg(inner) => inner.walk(visit),
            Expr::FuncCall { args, .. } => {
                for arg in args {
                    arg.walk(visit);
                }
            }
        }
    }

    /// Names of all variables referenced by the expression.
    pub fn variables(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.walk(&mut |e| {
            if let Expr::Var(name) = e {
                out.insert(name.as_str());
            }
        });
        out
    }

    /// All function-call nodes, in pre-order.
    pub fn calls(&self) -> Vec<&Expr> {
        let mut out = Vec::new();
        self.walk(&mut |e| {
            if matches!(e, Expr::FuncCall { .. }) {
                out.push(e);
            }
        });
        out
    }
}

/// Canonical, fully parenthesised rendering. Re-parsing the output yields an
/// equal tree.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(n) => write!(f, "{n}"),
            Expr::StringLit(s) => write!(f, "\"{s}\""),
            Expr::Var(name) => f.write_str(name),
            Expr::BinOp { op, left, right } => write!(f, "({left} {op} {right})"),
            Expr::Neg(inner) => write!(f, "(-{inner})"),
            Expr::FuncCall { name, args } => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
        }
    }
}

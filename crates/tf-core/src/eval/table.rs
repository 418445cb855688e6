use std::fmt;

use tf_lang::Expr;

use crate::error::EvalError;
use crate::functions::{logic, math, stats};
use crate::telemetry::Sample;

pub type PureFn = fn(&[f64]) -> Result<f64, EvalError>;
pub type WindowedFn = fn(&[Sample]) -> Result<f64, EvalError>;

#[derive(Debug, Clone, Copy)]
pub enum FunctionKind {
    /// Evaluated arguments in, number out.
    Pure(PureFn),
    /// `fn("variable", "window")` over the device's history.
    Windowed(WindowedFn),
    /// `if(cond, then, else)`; only the selected branch is evaluated.
    Conditional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(self, n: usize) -> bool {
        match self {
            Arity::Exact(k) => n == k,
            Arity::AtLeast(k) => n >= k,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(k) => write!(f, "{k}"),
            Arity::AtLeast(k) => write!(f, "{k}+"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Math,
    Logic,
    Statistical,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Category::Math => "math",
            Category::Logic => "logic",
            Category::Statistical => "statistical",
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FunctionSpec {
    pub name: &'static str,
    pub category: Category,
    pub arity: Arity,
    pub kind: FunctionKind,
}

impl FunctionSpec {
    pub fn is_windowed(&self) -> bool {
        matches!(self.kind, FunctionKind::Windowed(_))
    }
}

const fn pure(name: &'static str, arity: Arity, f: PureFn) -> FunctionSpec {
    FunctionSpec {
        name,
        category: Category::Math,
        arity,
        kind: FunctionKind::Pure(f),
    }
}

const fn logical(name: &'static str, arity: Arity, f: PureFn) -> FunctionSpec {
    FunctionSpec {
        name,
        category: Category::Logic,
        arity,
        kind: FunctionKind::Pure(f),
    }
}

const fn windowed(name: &'static str, f: WindowedFn) -> FunctionSpec {
    FunctionSpec {
        name,
        category: Category::Statistical,
        arity: Arity::Exact(2),
        kind: FunctionKind::Windowed(f),
    }
}

/// Every function the expression language knows.
pub static FUNCTIONS: &[FunctionSpec] = &[
    pure("sqrt", Arity::Exact(1), math::sqrt),
    pure("pow", Arity::Exact(2), math::pow),
    pure("abs", Arity::Exact(1), math::abs),
    pure("log", Arity::Exact(1), math::ln),
    pure("log10", Arity::Exact(1), math::log10),
    pure("exp", Arity::Exact(1), math::exp),
    pure("sin", Arity::Exact(1), math::sin),
    pure("cos", Arity::Exact(1), math::cos),
    pure("tan", Arity::Exact(1), math::tan),
    pure("asin", Arity::Exact(1), math::asin),
    pure("acos", Arity::Exact(1), math::acos),
    pure("atan", Arity::Exact(1), math::atan),
    pure("round", Arity::Exact(1), math::round),
    pure("floor", Arity::Exact(1), math::floor),
    pure("ceil", Arity::Exact(1), math::ceil),
    pure("min", Arity::AtLeast(1), math::min),
    pure("max", Arity::AtLeast(1), math::max),
    FunctionSpec {
        name: "if",
        category: Category::Logic,
        arity: Arity::Exact(3),
        kind: FunctionKind::Conditional,
    },
    logical("and", Arity::AtLeast(2), logic::and),
    logical("or", Arity::AtLeast(2), logic::or),
    logical("not", Arity::Exact(1), logic::not),
    windowed("avg", stats::avg),
    windowed("movingAvg", stats::avg),
    windowed("stddev", stats::stddev),
    windowed("sum", stats::sum),
    windowed("count", stats::count),
    windowed("min", stats::min),
    windowed("minTime", stats::min),
    windowed("max", stats::max),
    windowed("maxTime", stats::max),
    windowed("rate", stats::rate),
    windowed("percentChange", stats::percent_change),
    windowed("median", stats::median),
];

/// Find the function a call refers to. Names are case-insensitive. When a
/// name has both a numeric and a windowed form (`min`, `max`), two string
/// literal arguments select the windowed one.
pub fn resolve(table: &'static [FunctionSpec], name: &str, args: &[Expr]) -> Option<&'static FunctionSpec> {
    let history_shaped =
        args.len() == 2 && args.iter().all(|a| matches!(a, Expr::StringLit(_)));
    let mut candidates = table.iter().filter(|f| f.name.eq_ignore_ascii_case(name));
    let first = candidates.next()?;
    match candidates.find(|f| f.is_windowed() == history_shaped) {
        Some(better) if first.is_windowed() != history_shaped => Some(better),
        _ => Some(first),
    }
}

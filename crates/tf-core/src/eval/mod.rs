//! Expression evaluation.
//!
//! An [`Expr`] is evaluated against a variable mapping and, for windowed
//! functions, an [`EvalContext`]. Each call gets its own context; the
//! evaluator holds no mutable state and can be shared freely.

use tf_lang::{BinOp, Expr, parse_expr};

use crate::error::EvalError;
use crate::functions::logic;
use crate::history::{HistoryAccessor, HistoryRequest};
use crate::telemetry::Variables;
use crate::time_window::TimeWindow;

pub mod table;

pub use table::{Arity, Category, FUNCTIONS, FunctionKind, FunctionSpec};


/// Per-call evaluation scope: whose history, as of when, read through what.
#[derive(Clone, Copy)]
pub struct EvalContext<'a> {
    pub device_id: &'a str,
    pub now_ms: i64,
    pub history: &'a dyn HistoryAccessor,
}

impl<'a> EvalContext<'a> {
    pub fn new(device_id: &'a str, now_ms: i64, history: &'a dyn HistoryAccessor) -> Self {
        Self {
            device_id,
            now_ms,
            history,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Evaluator {
    functions: &'static [FunctionSpec],
}

impl Default for Evaluator {
    fn default() -> Self {
        Self {
            functions: FUNCTIONS,
        }
    }
}

impl Evaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn functions(&self) -> &'static [FunctionSpec] {
        self.functions
    }

    /// Parse and evaluate in one step.
    pub fn evaluate(
        &self,
        text: &str,
        vars: &dyn Variables,
        ctx: Option<&EvalContext<'_>>,
    ) -> Result<f64, EvalError> {
        let expr = parse_expr(text)?;
        self.eval(&expr, vars, ctx)
    }

    pub fn eval(
        &self,
        expr: &Expr,
        vars: &dyn Variables,
        ctx: Option<&EvalContext<'_>>,
    ) -> Result<f64, EvalError> {
        match expr {
            Expr::Number(n) => Ok(*n),
            Expr::StringLit(s) => Err(stray_string(s)),
            Expr::Var(name) => vars
                .get(name)
                .ok_or_else(|| EvalError::UnknownVariable(name.clone())),
            Expr::Neg(inner) => Ok(-self.eval(inner, vars, ctx)?),
            Expr::BinOp { op, left, right } => {
                let l = self.eval(left, vars, ctx)?;
                let r = self.eval(right, vars, ctx)?;
                let v = match op {
                    BinOp::Add => l + r,
                    BinOp::Sub => l - r,
                    BinOp::Mul => l * r,
                    BinOp::Div => {
                        if r == 0.0 {
                            return Err(EvalError::DivisionByZero);
                        }
                        l / r
                    }
                    BinOp::Pow => l.powf(r),
                };
                finite(v, || format!("{l} {op} {r}"))
            }
            Expr::FuncCall { name, args } => self.call(name, args, vars, ctx),
        }
    }

    fn call(
        &self,
        name: &str,
        args: &[Expr],
        vars: &dyn Variables,
        ctx: Option<&EvalContext<'_>>,
    ) -> Result<f64, EvalError> {
        let spec = self.lookup(name, args)?;
        match spec.kind {
            FunctionKind::Pure(f) => {
                let values = args
                    .iter()
                    .map(|a| self.eval(a, vars, ctx))
                    .collect::<Result<Vec<_>, _>>()?;
                finite(f(&values)?, || format!("{name}{values:?}"))
            }
            FunctionKind::Conditional => {
                let branch = if logic::truthy(self.eval(&args[0], vars, ctx)?) {
                    &args[1]
                } else {
                    &args[2]
                };
                self.eval(branch, vars, ctx)
            }
            FunctionKind::Windowed(f) => {
                let (variable, window) = windowed_args(name, args)?;
                let ctx = ctx.ok_or_else(|| EvalError::MissingContext(name.to_string()))?;
                let samples = ctx
                    .history
                    .samples(ctx.device_id, variable, window, ctx.now_ms)?;
                finite(f(&samples)?, || format!("{name}(\"{variable}\", \"{window}\")"))
            }
        }
    }

    fn lookup(&self, name: &str, args: &[Expr]) -> Result<&'static FunctionSpec, EvalError> {
        let spec = table::resolve(self.functions, name, args)
            .ok_or_else(|| EvalError::Argument(format!("unknown function `{name}`")))?;
        if !spec.arity.accepts(args.len()) {
            return Err(EvalError::Argument(format!(
                "{}() takes {} argument(s), got {}",
                spec.name,
                spec.arity,
                args.len()
            )));
        }
        Ok(spec)
    }

    /// Definition-time checks that need no data: every call names a known
    /// function with a valid arity, windowed calls have literal variable and
    /// window arguments, and string literals appear nowhere else.
    pub fn validate(&self, expr: &Expr) -> Result<(), EvalError> {
        match expr {
            Expr::Number(_) | Expr::Var(_) => Ok(()),
            Expr::StringLit(s) => Err(stray_string(s)),
            Expr::Neg(inner) => self.validate(inner),
            Expr::BinOp { left, right, .. } => {
                self.validate(left)?;
                self.validate(right)
            }
            Expr::FuncCall { name, args } => {
                let spec = self.lookup(name, args)?;
                if spec.is_windowed() {
                    windowed_args(name, args).map(|_| ())
                } else {
                    args.iter().try_for_each(|a| self.validate(a))
                }
            }
        }
    }

    /// Windowed reads the expression will make, deduplicated and sorted.
    /// Calls that would fail validation are left out; evaluating them
    /// reports the error.
    pub fn history_requests(&self, expr: &Expr) -> Vec<HistoryRequest> {
        let mut out = Vec::new();
        for call in expr.calls() {
            let Expr::FuncCall { name, args } = call else {
                continue;
            };
            let Ok(spec) = self.lookup(name, args) else {
                continue;
            };
            if !spec.is_windowed() {
                continue;
            }
            if let Ok((variable, window)) = windowed_args(name, args) {
                out.push(HistoryRequest {
                    variable: variable.to_string(),
                    window,
                });
            }
        }
        out.sort();
        out.dedup();
        out
    }
}

// ---------------------------------------------------------------------------
// helpers
// ---------------------------------------------------------------------------

fn windowed_args<'e>(name: &str, args: &'e [Expr]) -> Result<(&'e str, TimeWindow), EvalError> {
    match args {
        [Expr::StringLit(variable), Expr::StringLit(token)] => {
            Ok((variable.as_str(), token.parse()?))
        }
        _ => Err(EvalError::Argument(format!(
            "{name}() expects (\"variable\", \"window\") string arguments"
        ))),
    }
}

fn stray_string(s: &str) -> EvalError {
    EvalError::Argument(format!(
        "string literal \"{s}\" is only allowed as a statistical function argument"
    ))
}

fn finite(v: f64, what: impl FnOnce() -> String) -> Result<f64, EvalError> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(EvalError::Argument(format!("{} is not a finite number", what())))
    }
}

use derive_more::From;
use orion_error::{ErrorCode, StructError, UvsReason};
use tf_lang::SyntaxError;

#[derive(Debug, Clone, PartialEq, thiserror::Error, From)]
pub enum CoreReason {
    #[error("synthetic definition error")]
    Definition,
    #[error("rule build error")]
    RuleBuild,
    #[error("{0}")]
    Uvs(UvsReason),
}

impl ErrorCode for CoreReason {
    fn error_code(&self) -> i32 {
        match self {
            Self::Definition => 1001,
            Self::RuleBuild => 1002,
            Self::Uvs(u) => u.error_code(),
        }
    }
}

pub type CoreError = StructError<CoreReason>;
pub type CoreResult<T> = Result<T, CoreError>;

// ---------------------------------------------------------------------------
// Evaluation errors
// ---------------------------------------------------------------------------

/// Failure of a single expression evaluation or statistical function call.
///
/// These are per-evaluation outcomes: the ingestion path records them and
/// moves on, so they carry plain data rather than a [`StructError`] chain.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error("unknown variable `{0}`")]
    UnknownVariable(String),
    #[error("function `{0}` needs an evaluation context")]
    MissingContext(String),
    #[error("unknown time window {0:?} (expected 5m, 15m, 1h, 24h, 7d or 30d)")]
    UnknownTimeWindow(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("insufficient data: {0}")]
    InsufficientData(String),
    #[error("argument error: {0}")]
    Argument(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl EvalError {
    /// Stable short name used in logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            EvalError::Syntax(_) => "syntax",
            EvalError::UnknownVariable(_) => "unknown_variable",
            EvalError::MissingContext(_) => "missing_context",
            EvalError::UnknownTimeWindow(_) => "unknown_time_window",
            EvalError::DivisionByZero => "division_by_zero",
            EvalError::InsufficientData(_) => "insufficient_data",
            EvalError::Argument(_) => "argument",
            EvalError::StoreUnavailable(_) => "store_unavailable",
        }
    }
}

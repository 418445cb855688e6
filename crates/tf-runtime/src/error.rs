use derive_more::From;
use orion_error::{ErrorCode, StructError, UvsReason};
use tf_core::CoreReason;

/// Structural failures of the runtime. Per-point and per-cycle failures are
/// logged and counted instead; they never surface here.
#[derive(Debug, Clone, PartialEq, thiserror::Error, From)]
pub enum RuntimeReason {
    /// Binding the receiver or the metrics exporter.
    #[error("listen error")]
    Listen,
    /// Opening an output sink file.
    #[error("sink open error")]
    Sink,
    #[error("shutdown error")]
    Shutdown,
    #[error("{0}")]
    Core(CoreReason),
    #[error("{0}")]
    Uvs(UvsReason),
}

impl ErrorCode for RuntimeReason {
    fn error_code(&self) -> i32 {
        match self {
            Self::Listen => 2001,
            Self::Sink => 2002,
            Self::Shutdown => 2003,
            Self::Core(c) => c.error_code(),
            Self::Uvs(u) => u.error_code(),
        }
    }
}

pub type RuntimeError = StructError<RuntimeReason>;
pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_reasons_keep_their_codes() {
        assert_eq!(RuntimeReason::from(CoreReason::Definition).error_code(), 1001);
        assert_eq!(RuntimeReason::from(CoreReason::RuleBuild).error_code(), 1002);
        assert_eq!(RuntimeReason::Listen.error_code(), 2001);
    }
}

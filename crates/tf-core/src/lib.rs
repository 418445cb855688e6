pub mod alert;
pub mod cache;
pub mod error;
pub mod eval;
pub mod fleet;
pub mod functions;
pub mod history;
pub mod rule;
pub mod store;
pub mod synthetic;
pub mod telemetry;
pub mod time_window;

pub use error::{CoreError, CoreReason, CoreResult, EvalError};
pub use telemetry::{DerivedValue, Sample, TelemetryPoint};
pub use time_window::TimeWindow;

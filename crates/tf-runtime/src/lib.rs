#[macro_use]
mod log_macros;

pub(crate) mod alert_task;
pub(crate) mod derived_task;
pub mod error;
pub mod ingest;
pub mod lifecycle;
pub mod metrics;
pub mod receiver;
pub mod rule_task;
pub mod tracing_init;

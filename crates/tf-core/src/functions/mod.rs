//! Built-in function implementations. Arity is checked by the evaluator's
//! function table before any of these run.

pub mod logic;
pub mod math;
pub mod stats;

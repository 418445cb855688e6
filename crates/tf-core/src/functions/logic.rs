//! Boolean helpers over numbers: non-zero is true, results are `1` or `0`.
//! `if` is not here; the evaluator handles it so only the taken branch runs.

use crate::error::EvalError;

pub fn truthy(x: f64) -> bool {
    x != 0.0
}

fn flag(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

pub fn and(args: &[f64]) -> Result<f64, EvalError> {
    Ok(flag(args.iter().all(|x| truthy(*x))))
}

pub fn or(args: &[f64]) -> Result<f64, EvalError> {
    Ok(flag(args.iter().any(|x| truthy(*x))))
}

pub fn not(args: &[f64]) -> Result<f64, EvalError> {
    Ok(flag(!truthy(args[0])))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truth_tables() {
        assert_eq!(and(&[1.0, 2.0, -3.0]).unwrap(), 1.0);
        assert_eq!(and(&[1.0, 0.0]).unwrap(), 0.0);
        assert_eq!(or(&[0.0, 0.0]).unwrap(), 0.0);
        assert_eq!(or(&[0.0, 0.5]).unwrap(), 1.0);
        assert_eq!(not(&[0.0]).unwrap(), 1.0);
        assert_eq!(not(&[7.0]).unwrap(), 0.0);
    }
}

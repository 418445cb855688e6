use crate::error::EvalError;

fn domain(name: &str, x: f64, expected: &str) -> EvalError {
    EvalError::Argument(format!("{name}({x}) is undefined; argument must be {expected}"))
}

pub fn sqrt(args: &[f64]) -> Result<f64, EvalError> {
    let x = args[0];
    if x < 0.0 {
        return Err(domain("sqrt", x, "non-negative"));
    }
    Ok(x.sqrt())
}

pub fn pow(args: &[f64]) -> Result<f64, EvalError> {
    Ok(args[0].powf(args[1]))
}

pub fn abs(args: &[f64]) -> Result<f64, EvalError> {
    Ok(args[0].abs())
}

pub fn ln(args: &[f64]) -> Result<f64, EvalError> {
    let x = args[0];
    if x <= 0.0 {
        return Err(domain("log", x, "positive"));
    }
    Ok(x.ln())
}

pub fn log10(args: &[f64]) -> Result<f64, EvalError> {
    let x = args[0];
    if x <= 0.0 {
        return Err(domain("log10", x, "positive"));
    }
    Ok(x.log10())
}

pub fn exp(args: &[f64]) -> Result<f64, EvalError> {
    Ok(args[0].exp())
}

pub fn sin(args: &[f64]) -> Result<f64, EvalError> {
    Ok(args[0].sin())
}

pub fn cos(args: &[f64]) -> Result<f64, EvalError> {
    Ok(args[0].cos())
}

pub fn tan(args: &[f64]) -> Result<f64, EvalError> {
    Ok(args[0].tan())
}

pub fn asin(args: &[f64]) -> Result<f64, EvalError> {
    let x = args[0];
    if !(-1.0..=1.0).contains(&x) {
        return Err(domain("asin", x, "within [-1, 1]"));
    }
    Ok(x.asin())
}

pub fn acos(args: &[f64]) -> Result<f64, EvalError> {
    let x = args[0];
    if !(-1.0..=1.0).contains(&x) {
        return Err(domain("acos", x, "within [-1, 1]"));
    }
    Ok(x.acos())
}

pub fn atan(args: &[f64]) -> Result<f64, EvalError> {
    Ok(args[0].atan())
}

/// Half away from zero: `round(2.5) == 3`, `round(-2.5) == -3`.
pub fn round(args: &[f64]) -> Result<f64, EvalError> {
    Ok(args[0].round())
}

pub fn floor(args: &[f64]) -> Result<f64, EvalError> {
    Ok(args[0].floor())
}

pub fn ceil(args: &[f64]) -> Result<f64, EvalError> {
    Ok(args[0].ceil())
}

pub fn min(args: &[f64]) -> Result<f64, EvalError> {
    Ok(args.iter().copied().fold(f64::INFINITY, f64::min))
}

pub fn max(args: &[f64]) -> Result<f64, EvalError> {
    Ok(args.iter().copied().fold(f64::NEG_INFINITY, f64::max))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors() {
        assert!(matches!(sqrt(&[-1.0]), Err(EvalError::Argument(_))));
        assert!(matches!(ln(&[0.0]), Err(EvalError::Argument(_))));
        assert!(matches!(log10(&[-3.0]), Err(EvalError::Argument(_))));
        assert!(matches!(asin(&[1.5]), Err(EvalError::Argument(_))));
        assert!(matches!(acos(&[-1.01]), Err(EvalError::Argument(_))));
    }

    #[test]
    fn values() {
        assert_eq!(sqrt(&[16.0]).unwrap(), 4.0);
        assert_eq!(pow(&[2.0, 10.0]).unwrap(), 1024.0);
        assert_eq!(log10(&[1000.0]).unwrap(), 3.0);
        assert_eq!(abs(&[-7.5]).unwrap(), 7.5);
        assert_eq!(floor(&[-1.5]).unwrap(), -2.0);
        assert_eq!(ceil(&[1.2]).unwrap(), 2.0);
        assert_eq!(min(&[3.0, -1.0, 2.0]).unwrap(), -1.0);
        assert_eq!(max(&[3.0, -1.0, 2.0]).unwrap(), 3.0);
        assert_eq!(asin(&[1.0]).unwrap(), std::f64::consts::FRAC_PI_2);
    }

    #[test]
    fn round_half_away_from_zero() {
        assert_eq!(round(&[2.5]).unwrap(), 3.0);
        assert_eq!(round(&[-2.5]).unwrap(), -3.0);
        assert_eq!(round(&[2.4999]).unwrap(), 2.0);
    }
}

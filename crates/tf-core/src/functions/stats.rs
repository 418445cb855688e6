//! Windowed statistics over ascending samples of one variable.
//!
//! Every function here is read-only over its input slice.

use crate::error::EvalError;
use crate::telemetry::Sample;

const HOUR_MS: f64 = 3_600_000.0;

fn need(samples: &[Sample], min: usize, what: &str) -> Result<(), EvalError> {
    if samples.len() < min {
        return Err(EvalError::InsufficientData(format!(
            "{what} needs at least {min} sample(s), got {}",
            samples.len()
        )));
    }
    Ok(())
}

fn mean(samples: &[Sample]) -> f64 {
    samples.iter().map(|s| s.value).sum::<f64>() / samples.len() as f64
}

/// Arithmetic mean. Also serves `movingAvg`.
pub fn avg(samples: &[Sample]) -> Result<f64, EvalError> {
    need(samples, 1, "avg")?;
    Ok(mean(samples))
}

/// Population standard deviation (divides by N).
pub fn stddev(samples: &[Sample]) -> Result<f64, EvalError> {
    need(samples, 2, "stddev")?;
    let m = mean(samples);
    let var = samples.iter().map(|s| (s.value - m).powi(2)).sum::<f64>() / samples.len() as f64;
    Ok(var.sqrt())
}

pub fn sum(samples: &[Sample]) -> Result<f64, EvalError> {
    Ok(samples.iter().map(|s| s.value).sum())
}

pub fn count(samples: &[Sample]) -> Result<f64, EvalError> {
    Ok(samples.len() as f64)
}

pub fn min(samples: &[Sample]) -> Result<f64, EvalError> {
    need(samples, 1, "min")?;
    Ok(samples.iter().map(|s| s.value).fold(f64::INFINITY, f64::min))
}

pub fn max(samples: &[Sample]) -> Result<f64, EvalError> {
    need(samples, 1, "max")?;
    Ok(samples.iter().map(|s| s.value).fold(f64::NEG_INFINITY, f64::max))
}

/// Change per hour between the first and last sample, using their actual
/// timestamps rather than the nominal window length.
pub fn rate(samples: &[Sample]) -> Result<f64, EvalError> {
    need(samples, 2, "rate")?;
    let (first, last) = (samples[0], samples[samples.len() - 1]);
    let elapsed_hours = (last.ts_ms - first.ts_ms) as f64 / HOUR_MS;
    if elapsed_hours == 0.0 {
        return Err(EvalError::DivisionByZero);
    }
    Ok((last.value - first.value) / elapsed_hours)
}

/// `(last - first) / first * 100`.
pub fn percent_change(samples: &[Sample]) -> Result<f64, EvalError> {
    need(samples, 2, "percentChange")?;
    let (first, last) = (samples[0].value, samples[samples.len() - 1].value);
    if first == 0.0 {
        return Err(EvalError::DivisionByZero);
    }
    Ok((last - first) / first * 100.0)
}

/// Middle value of a sorted copy; mean of the two middles for even N.
pub fn median(samples: &[Sample]) -> Result<f64, EvalError> {
    need(samples, 1, "median")?;
    let mut values: Vec<f64> = samples.iter().map(|s| s.value).collect();
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len().is_multiple_of(2) {
        Ok((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Ok(values[mid])
    }
}

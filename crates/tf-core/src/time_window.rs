use std::fmt;
use std::str::FromStr;

use crate::error::EvalError;

const MINUTE_MS: i64 = 60_000;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;

/// Fixed lookback windows accepted by the statistical functions.
///
/// Variants are declared shortest first, so the derived ordering matches
/// the ordering of their durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimeWindow {
    FiveMinutes,
    FifteenMinutes,
    OneHour,
    OneDay,
    SevenDays,
    ThirtyDays,
}

impl TimeWindow {
    pub const ALL: [TimeWindow; 6] = [
        TimeWindow::FiveMinutes,
        TimeWindow::FifteenMinutes,
        TimeWindow::OneHour,
        TimeWindow::OneDay,
        TimeWindow::SevenDays,
        TimeWindow::ThirtyDays,
    ];

    pub fn token(self) -> &'static str {
        match self {
            TimeWindow::FiveMinutes => "5m",
            TimeWindow::FifteenMinutes => "15m",
            TimeWindow::OneHour => "1h",
            TimeWindow::OneDay => "24h",
            TimeWindow::SevenDays => "7d",
            TimeWindow::ThirtyDays => "30d",
        }
    }

    pub fn as_millis(self) -> i64 {
        match self {
            TimeWindow::FiveMinutes => 5 * MINUTE_MS,
            TimeWindow::FifteenMinutes => 15 * MINUTE_MS,
            TimeWindow::OneHour => HOUR_MS,
            TimeWindow::OneDay => DAY_MS,
            TimeWindow::SevenDays => 7 * DAY_MS,
            TimeWindow::ThirtyDays => 30 * DAY_MS,
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for TimeWindow {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TimeWindow::ALL
            .into_iter()
            .find(|w| w.token() == s)
            .ok_or_else(|| EvalError::UnknownTimeWindow(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_strictly_increase() {
        for pair in TimeWindow::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(pair[0].as_millis() < pair[1].as_millis(), "{}", pair[1]);
        }
    }

    #[test]
    fn tokens_parse_back() {
        for w in TimeWindow::ALL {
            assert_eq!(w.token().parse::<TimeWindow>().unwrap(), w);
        }
        assert_eq!("24h".parse::<TimeWindow>().unwrap().as_millis(), 86_400_000);
    }

    #[test]
    fn unknown_token_rejected() {
        for bad in ["1d", "5M", "", "60m", "1w"] {
            let err = bad.parse::<TimeWindow>().unwrap_err();
            assert_eq!(err, EvalError::UnknownTimeWindow(bad.to_string()));
        }
    }
}

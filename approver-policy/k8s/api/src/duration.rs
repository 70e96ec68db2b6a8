//! Parses Go-style duration strings (`1h30m`, `2160h`, `90s`) as they appear
//! in cert-manager resources.

use std::{fmt, str::FromStr, time::Duration};

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParseError {
    #[error("empty duration")]
    Empty,

    #[error("negative durations are not supported")]
    Negative,

    #[error("missing unit in {0:?}; expected one of 'ns', 'us', 'ms', 's', 'm', or 'h'")]
    MissingUnit(String),

    #[error("unknown unit {0:?}; expected one of 'ns', 'us', 'ms', 's', 'm', or 'h'")]
    UnknownUnit(String),

    #[error("invalid number {0:?}")]
    InvalidNumber(String),

    #[error("duration {0:?} is out of range")]
    Overflow(String),
}

/// A non-negative duration parsed from the Go `time.ParseDuration` format.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct GoDuration(Duration);

// === impl GoDuration ===

impl GoDuration {
    #[inline]
    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl From<Duration> for GoDuration {
    fn from(d: Duration) -> Self {
        Self(d)
    }
}

impl From<GoDuration> for Duration {
    fn from(GoDuration(d): GoDuration) -> Self {
        d
    }
}

impl FromStr for GoDuration {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseError::Empty);
        }
        if s.starts_with('-') {
            return Err(ParseError::Negative);
        }
        let mut rest = s.strip_prefix('+').unwrap_or(s);
        if rest == "0" {
            return Ok(Self(Duration::ZERO));
        }

        let mut total = Duration::ZERO;
        while !rest.is_empty() {
            let unit_at = rest
                .find(|c: char| c.is_alphabetic())
                .ok_or_else(|| ParseError::MissingUnit(s.to_string()))?;
            let (number, tail) = rest.split_at(unit_at);
            let unit_len = tail
                .find(|c: char| !c.is_alphabetic())
                .unwrap_or(tail.len());
            let (unit, tail) = tail.split_at(unit_len);

            let value = number
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite() && *v >= 0.0)
                .ok_or_else(|| ParseError::InvalidNumber(number.to_string()))?;
            let overflow = || ParseError::Overflow(s.to_string());
            let term = Duration::try_from_secs_f64(unit_base(unit)?.as_secs_f64() * value)
                .map_err(|_| overflow())?;
            total = total.checked_add(term).ok_or_else(overflow)?;
            rest = tail;
        }

        Ok(Self(total))
    }
}

/// Formats like Go's `time.Duration.String`, with sub-second precision
/// truncated to milliseconds.
impl fmt::Display for GoDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = self.0;
        if d.is_zero() {
            return f.write_str("0s");
        }
        if d < Duration::from_secs(1) {
            return write!(f, "{}ms", d.as_millis());
        }

        let secs = d.as_secs();
        let (hours, minutes, seconds) = (secs / 3600, (secs / 60) % 60, secs % 60);
        if hours > 0 {
            write!(f, "{hours}h")?;
        }
        if hours > 0 || minutes > 0 {
            write!(f, "{minutes}m")?;
        }
        match d.subsec_millis() {
            0 => write!(f, "{seconds}s"),
            millis => {
                let frac = format!("{millis:03}");
                write!(f, "{seconds}.{}s", frac.trim_end_matches('0'))
            }
        }
    }
}

fn unit_base(unit: &str) -> Result<Duration, ParseError> {
    let base = match unit {
        "ns" => Duration::from_nanos(1),
        // Both the micro sign and the Greek mu are accepted by Go.
        "us" | "\u{00b5}s" | "\u{03bc}s" => Duration::from_micros(1),
        "ms" => Duration::from_millis(1),
        "s" => Duration::from_secs(1),
        "m" => Duration::from_secs(60),
        "h" => Duration::from_secs(60 * 60),
        _ => return Err(ParseError::UnknownUnit(unit.to_string())),
    };
    Ok(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn parse(s: &str) -> Result<Duration, ParseError> {
        s.parse::<GoDuration>().map(Into::into)
    }

    #[test]
    fn parses_go_durations() {
        assert_eq!(parse("0"), Ok(Duration::ZERO));
        assert_eq!(parse("90s"), Ok(Duration::from_secs(90)));
        assert_eq!(parse("1h30m"), Ok(Duration::from_secs(90 * 60)));
        assert_eq!(parse("2160h"), Ok(Duration::from_secs(2160 * 3600)));
        assert_eq!(parse("1.5h"), Ok(Duration::from_secs(90 * 60)));
        assert_eq!(parse("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse("+5m"), Ok(Duration::from_secs(300)));
    }

    #[test]
    fn formats_like_go() {
        let fmt = |d: Duration| GoDuration::from(d).to_string();
        assert_eq!(fmt(Duration::ZERO), "0s");
        assert_eq!(fmt(Duration::from_millis(250)), "250ms");
        assert_eq!(fmt(Duration::from_millis(1500)), "1.5s");
        assert_eq!(fmt(Duration::from_secs(90)), "1m30s");
        assert_eq!(fmt(Duration::from_secs(3600)), "1h0m0s");
        assert_eq!(fmt(Duration::from_secs(2160 * 3600)), "2160h0m0s");
    }

    #[test]
    fn rejects_malformed_durations() {
        assert_eq!(parse(""), Err(ParseError::Empty));
        assert_eq!(parse("-1h"), Err(ParseError::Negative));
        assert_eq!(parse("10"), Err(ParseError::MissingUnit("10".into())));
        assert_eq!(parse("3d"), Err(ParseError::UnknownUnit("d".into())));
        assert_eq!(parse("1.2.3h"), Err(ParseError::InvalidNumber("1.2.3".into())));
    }

    #[rstest]
    #[case("100000000000000000000h")]
    #[case("5000000000000000h5000000000000000h")]
    fn rejects_out_of_range_durations(#[case] input: &str) {
        assert_eq!(parse(input), Err(ParseError::Overflow(input.to_string())));
    }
}

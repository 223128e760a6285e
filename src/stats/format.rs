use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TrainerError;

/// How a statistic is rendered in log lines and CSV cells.
///
/// Parses the brace format strings used in experiment configs:
/// `{:06d}` is a zero-padded integer of width 6, `{:.6f}` and `{:12.10f}`
/// are floats with 6 and 10 decimals (the width of the latter is ignored).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatFormat {
    Integer { width: usize },
    Float { precision: usize },
}

impl StatFormat {
    pub const DEFAULT_FLOAT: StatFormat = StatFormat::Float { precision: 6 };
    pub const EPISODE: StatFormat = StatFormat::Integer { width: 6 };

    /// Renders `value`. NaN is written as `nan` in both variants.
    pub fn render(&self, value: f64) -> String {
        if value.is_nan() {
            return "nan".to_string();
        }
        match *self {
            StatFormat::Integer { width } => format!("{:0width$}", value.round() as i64, width = width),
            StatFormat::Float { precision } => format!("{:.precision$}", value, precision = precision),
        }
    }
}

impl Default for StatFormat {
    fn default() -> Self {
        StatFormat::DEFAULT_FLOAT
    }
}

impl fmt::Display for StatFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatFormat::Integer { width } => write!(f, "{{:0{}d}}", width),
            StatFormat::Float { precision } => write!(f, "{{:.{}f}}", precision),
        }
    }
}

impl FromStr for StatFormat {
    type Err = TrainerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || TrainerError::invalid_config("statistics format", format!("unsupported format `{}`", s));

        let body = s
            .trim()
            .strip_prefix("{:")
            .and_then(|rest| rest.strip_suffix('}'))
            .ok_or_else(bad)?;

        if let Some(spec) = body.strip_suffix('d') {
            let width = if spec.is_empty() {
                0
            } else {
                spec.trim_start_matches('0').parse::<usize>().unwrap_or(0)
            };
            return Ok(StatFormat::Integer { width });
        }

        if let Some(spec) = body.strip_suffix('f') {
            let precision = match spec.split_once('.') {
                Some((_, p)) => p.parse::<usize>().map_err(|_| bad())?,
                None => 6,
            };
            return Ok(StatFormat::Float { precision });
        }

        Err(bad())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_config_format_strings() {
        assert_eq!("{:06d}".parse::<StatFormat>().unwrap(), StatFormat::Integer { width: 6 });
        assert_eq!("{:d}".parse::<StatFormat>().unwrap(), StatFormat::Integer { width: 0 });
        assert_eq!("{:12.10f}".parse::<StatFormat>().unwrap(), StatFormat::Float { precision: 10 });
        assert_eq!("{:.4f}".parse::<StatFormat>().unwrap(), StatFormat::Float { precision: 4 });
        assert!("%d".parse::<StatFormat>().is_err());
        assert!("{:x}".parse::<StatFormat>().is_err());
    }

    #[test]
    fn renders_values() {
        assert_eq!(StatFormat::EPISODE.render(42.0), "000042");
        assert_eq!(StatFormat::Float { precision: 3 }.render(0.12345), "0.123");
        assert_eq!(StatFormat::Float { precision: 3 }.render(f64::NAN), "nan");
    }

    #[test]
    fn display_round_trips_through_parse() {
        for fmt in [StatFormat::Integer { width: 4 }, StatFormat::Float { precision: 2 }] {
            assert_eq!(fmt.to_string().parse::<StatFormat>().unwrap(), fmt);
        }
    }
}

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Execution accuracy: share of items whose result sets match, in percent.
    Accuracy,
    /// Valid efficiency score: match-gated timing ratio, square-rooted and averaged, in percent.
    Ves,
}

impl Metric {
    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Accuracy => "accuracy",
            Metric::Ves => "ves",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "accuracy" => Some(Metric::Accuracy),
            "ves" => Some(Metric::Ves),
            _ => None,
        }
    }

    /// `accuracy.json` / `ves.json` in the experiment directory.
    pub fn scores_file_name(self) -> String {
        format!("{}.json", self.as_str())
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricParseError {
    raw: String,
}

impl fmt::Display for MetricParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid metric {:?} (expected accuracy|ves)",
            self.raw.as_str()
        )
    }
}

impl std::error::Error for MetricParseError {}

impl FromStr for Metric {
    type Err = MetricParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Metric::parse(s.trim()).ok_or_else(|| MetricParseError { raw: s.to_string() })
    }
}

#[cfg(feature = "clap")]
impl clap::ValueEnum for Metric {
    fn value_variants<'a>() -> &'a [Self] {
        &[Metric::Accuracy, Metric::Ves]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(clap::builder::PossibleValue::new(self.as_str()))
    }
}

/// Aggregates per-item values into a percentage. Empty input scores 0.
pub fn compute_metric(metric: Metric, values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    match metric {
        Metric::Accuracy => values.iter().sum::<f64>() / n * 100.0,
        Metric::Ves => values.iter().map(|v| v.max(0.0).sqrt()).sum::<f64>() / n * 100.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display_agree() {
        for m in [Metric::Accuracy, Metric::Ves] {
            assert_eq!(Metric::parse(m.as_str()), Some(m));
            assert_eq!(m.to_string().parse::<Metric>(), Ok(m));
        }
        assert!("bleu".parse::<Metric>().is_err());
        assert_eq!(Metric::Ves.scores_file_name(), "ves.json");
    }

    #[test]
    fn accuracy_is_mean_percent() {
        assert_eq!(compute_metric(Metric::Accuracy, &[1.0, 0.0, 1.0, 1.0]), 75.0);
        assert_eq!(compute_metric(Metric::Accuracy, &[]), 0.0);
    }

    #[test]
    fn ves_is_mean_of_square_roots() {
        let v = compute_metric(Metric::Ves, &[4.0, 0.0]);
        assert!((v - 100.0).abs() < 1e-9);
        assert_eq!(compute_metric(Metric::Ves, &[]), 0.0);
    }
}

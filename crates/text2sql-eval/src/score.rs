use text2sql_contracts::{EXCEPTION_PREFIX, FUNCTION_TIMED_OUT};

use crate::timeout::TimeoutError;

/// Metric value for one item plus the reason it is not a full score, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemScore {
    pub value: f64,
    pub error: Option<String>,
}

impl ItemScore {
    pub fn failed(failure: &ScoreFailure) -> Self {
        Self {
            value: 0.0,
            error: Some(failure.sentinel()),
        }
    }
}

/// Why an item could not be scored. Always absorbed into a zero score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScoreFailure {
    TimedOut,
    Exception(String),
}

impl ScoreFailure {
    /// Error string recorded in the predictions file.
    pub fn sentinel(&self) -> String {
        match self {
            ScoreFailure::TimedOut => FUNCTION_TIMED_OUT.to_string(),
            ScoreFailure::Exception(msg) => format!("{EXCEPTION_PREFIX}{msg}"),
        }
    }
}

impl From<TimeoutError> for ScoreFailure {
    fn from(err: TimeoutError) -> Self {
        match err {
            TimeoutError::Elapsed(_) => ScoreFailure::TimedOut,
            other => ScoreFailure::Exception(other.to_string()),
        }
    }
}

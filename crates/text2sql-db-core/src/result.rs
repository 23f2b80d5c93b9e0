use serde::Serialize;

use crate::Row;

pub const TIMED_OUT_ERROR: &str = "interrupted: execution deadline exceeded";

/// Normalized outcome of one execution attempt.
///
/// Exactly one of `rows` / `error` is set. `elapsed_seconds` covers the statement execution and
/// row fetch only; it is `None` when nothing was executed (the database could not be opened, or
/// the deadline had already passed).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub rows: Option<Vec<Row>>,
    pub error: Option<String>,
    pub elapsed_seconds: Option<f64>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub timed_out: bool,
}

impl ExecutionResult {
    pub fn success(rows: Vec<Row>, elapsed_seconds: f64) -> Self {
        Self {
            rows: Some(rows),
            error: None,
            elapsed_seconds: Some(elapsed_seconds),
            timed_out: false,
        }
    }

    pub fn failure(error: impl Into<String>, elapsed_seconds: Option<f64>) -> Self {
        Self {
            rows: None,
            error: Some(error.into()),
            elapsed_seconds,
            timed_out: false,
        }
    }

    pub fn timed_out(elapsed_seconds: Option<f64>) -> Self {
        Self {
            rows: None,
            error: Some(TIMED_OUT_ERROR.to_string()),
            elapsed_seconds,
            timed_out: true,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

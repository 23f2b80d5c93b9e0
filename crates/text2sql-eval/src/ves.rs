use text2sql_db_core::{DbTarget, Deadline, ExecutionResult, Executor};

use crate::compare::match_sqls;
use crate::score::{ItemScore, ScoreFailure};
use crate::trim::{mean, trim_outliers};

/// Floor applied to measured times so a ratio never divides by zero.
const MIN_TIMING_SECONDS: f64 = 1e-9;

/// Scores one item for VES.
///
/// Non-matching items score 0 with the comparison error. Matching items score the trimmed mean
/// of `gold_time / predicted_time` over `iterations` paired runs, so faster predictions score
/// above 1.
pub fn iterated_execution<E: Executor + ?Sized>(
    executor: &E,
    predicted_sql: &str,
    gold_sql: &str,
    db: &DbTarget,
    iterations: u32,
    deadline: Deadline,
) -> Result<ItemScore, ScoreFailure> {
    let outcome = match_sqls(executor, predicted_sql, gold_sql, db, deadline)?;
    if !outcome.is_match {
        return Ok(ItemScore {
            value: 0.0,
            error: outcome.error,
        });
    }

    let ratios = timing_ratios(executor, predicted_sql, gold_sql, db, iterations, deadline)?;
    let kept = trim_outliers(&ratios);
    Ok(ItemScore {
        value: mean(&kept).unwrap_or(0.0),
        error: None,
    })
}

/// Runs gold then predicted `iterations` times (at least once) and returns the time ratios.
pub fn timing_ratios<E: Executor + ?Sized>(
    executor: &E,
    predicted_sql: &str,
    gold_sql: &str,
    db: &DbTarget,
    iterations: u32,
    deadline: Deadline,
) -> Result<Vec<f64>, ScoreFailure> {
    let n = iterations.max(1);
    let mut ratios = Vec::with_capacity(n as usize);
    for _ in 0..n {
        if deadline.expired() {
            return Err(ScoreFailure::TimedOut);
        }
        let gold = elapsed_of(&executor.execute(gold_sql, db, deadline), "gold")?;
        let predicted = elapsed_of(&executor.execute(predicted_sql, db, deadline), "predicted")?;
        ratios.push(gold.max(MIN_TIMING_SECONDS) / predicted.max(MIN_TIMING_SECONDS));
    }
    Ok(ratios)
}

fn elapsed_of(result: &ExecutionResult, which: &str) -> Result<f64, ScoreFailure> {
    if result.timed_out {
        return Err(ScoreFailure::TimedOut);
    }
    if let Some(error) = &result.error {
        return Err(ScoreFailure::Exception(format!(
            "{which} SQL failed while timing: {error}"
        )));
    }
    result
        .elapsed_seconds
        .ok_or_else(|| ScoreFailure::Exception(format!("{which} SQL reported no timing")))
}

use std::collections::HashSet;

use text2sql_contracts::TABLE_MISMATCH;
use text2sql_db_core::{DbTarget, Deadline, Executor, Row};

use crate::score::ScoreFailure;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchOutcome {
    pub is_match: bool,
    pub error: Option<String>,
}

/// Executes both queries and compares their results as sets of distinct rows.
///
/// Row order and duplicate rows are ignored. A failing predicted query is a plain mismatch
/// carrying its error; the gold query is not run in that case. A failing gold query means the
/// item cannot be judged and is reported as a [`ScoreFailure`].
pub fn match_sqls<E: Executor + ?Sized>(
    executor: &E,
    predicted_sql: &str,
    gold_sql: &str,
    db: &DbTarget,
    deadline: Deadline,
) -> Result<MatchOutcome, ScoreFailure> {
    let predicted = executor.execute(predicted_sql, db, deadline);
    if predicted.timed_out {
        return Err(ScoreFailure::TimedOut);
    }
    if let Some(error) = predicted.error {
        return Ok(MatchOutcome {
            is_match: false,
            error: Some(error),
        });
    }

    let gold = executor.execute(gold_sql, db, deadline);
    if gold.timed_out {
        return Err(ScoreFailure::TimedOut);
    }
    if let Some(error) = gold.error {
        return Err(ScoreFailure::Exception(format!("gold SQL failed: {error}")));
    }

    let predicted_rows = predicted.rows.unwrap_or_default();
    let gold_rows = gold.rows.unwrap_or_default();
    if same_row_set(&predicted_rows, &gold_rows) {
        Ok(MatchOutcome {
            is_match: true,
            error: None,
        })
    } else {
        Ok(MatchOutcome {
            is_match: false,
            error: Some(TABLE_MISMATCH.to_string()),
        })
    }
}

pub fn same_row_set(a: &[Row], b: &[Row]) -> bool {
    let a: HashSet<&Row> = a.iter().collect();
    let b: HashSet<&Row> = b.iter().collect();
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;
    use text2sql_db_core::{Cell, ExecutionResult};

    struct Scripted;

    impl Executor for Scripted {
        fn execute(&self, sql: &str, _db: &DbTarget, _deadline: Deadline) -> ExecutionResult {
            let int = |v: i64| vec![Cell::Integer(v)];
            match sql {
                "ab" => ExecutionResult::success(vec![int(1), int(2)], 0.01),
                "ba" => ExecutionResult::success(vec![int(2), int(1), int(1)], 0.01),
                "a" => ExecutionResult::success(vec![int(1)], 0.01),
                "real" => ExecutionResult::success(vec![vec![Cell::Real(1.0)]], 0.01),
                "slow" => ExecutionResult::timed_out(Some(1.0)),
                "panic" => panic!("gold must not run"),
                _ => ExecutionResult::failure(format!("no such table: {sql}"), Some(0.0)),
            }
        }
    }

    fn run(pred: &str, gold: &str) -> Result<MatchOutcome, ScoreFailure> {
        match_sqls(
            &Scripted,
            pred,
            gold,
            &DbTarget::parse(":memory:"),
            Deadline::none(),
        )
    }

    #[test]
    fn order_and_duplicates_are_ignored() {
        let out = run("ba", "ab").unwrap();
        assert!(out.is_match);
        assert_eq!(out.error, None);
    }

    #[test]
    fn numerically_equal_cells_match() {
        assert!(run("real", "a").unwrap().is_match);
    }

    #[test]
    fn different_sets_are_a_table_mismatch() {
        let out = run("a", "ab").unwrap();
        assert!(!out.is_match);
        assert_eq!(out.error.as_deref(), Some("Table mismatch"));
    }

    #[test]
    fn predicted_error_skips_gold() {
        let out = run("bogus", "panic").unwrap();
        assert!(!out.is_match);
        assert_eq!(out.error.as_deref(), Some("no such table: bogus"));
    }

    #[test]
    fn gold_failures_are_not_judgeable() {
        assert!(matches!(run("a", "bogus"), Err(ScoreFailure::Exception(_))));
        assert_eq!(run("a", "slow"), Err(ScoreFailure::TimedOut));
        assert_eq!(run("slow", "a"), Err(ScoreFailure::TimedOut));
    }
}

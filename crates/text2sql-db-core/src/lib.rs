//! Backend-neutral SQL execution types shared by every executor.
//!
//! An [`Executor`] turns SQL text into an [`ExecutionResult`]. Driver failures are data, never
//! panics or `Err`s: the evaluator and the decoding loop inspect `ExecutionResult::error`.

mod cell;
mod deadline;
mod result;
mod target;

pub use cell::{Cell, Row};
pub use deadline::Deadline;
pub use result::ExecutionResult;
pub use target::{sqlite_dsn_to_path, sqlite_path_to_dsn, DbTarget};

use std::sync::Arc;

/// Runs one SQL statement against a database and reports rows, error and elapsed time.
///
/// Implementations must stop working on a statement once `deadline` has passed and report it
/// through [`ExecutionResult::timed_out`].
pub trait Executor: Send + Sync {
    fn execute(&self, sql: &str, db: &DbTarget, deadline: Deadline) -> ExecutionResult;
}

impl<E: Executor + ?Sized> Executor for &E {
    fn execute(&self, sql: &str, db: &DbTarget, deadline: Deadline) -> ExecutionResult {
        (**self).execute(sql, db, deadline)
    }
}

impl<E: Executor + ?Sized> Executor for Box<E> {
    fn execute(&self, sql: &str, db: &DbTarget, deadline: Deadline) -> ExecutionResult {
        (**self).execute(sql, db, deadline)
    }
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn execute(&self, sql: &str, db: &DbTarget, deadline: Deadline) -> ExecutionResult {
        (**self).execute(sql, db, deadline)
    }
}

pub fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .and_then(|v| match v.trim() {
            "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
            "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

pub fn env_u32_nonzero(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .filter(|&v| v != 0)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    impl Executor for Fixed {
        fn execute(&self, sql: &str, _db: &DbTarget, _deadline: Deadline) -> ExecutionResult {
            ExecutionResult::success(vec![vec![Cell::Text(sql.to_string())]], 0.0)
        }
    }

    #[test]
    fn executor_is_usable_through_smart_pointers() {
        let db = DbTarget::parse(":memory:");
        let boxed: Box<dyn Executor> = Box::new(Fixed);
        let shared: Arc<dyn Executor> = Arc::new(Fixed);
        for exec in [&boxed as &dyn Executor, &shared as &dyn Executor] {
            let r = exec.execute("SELECT 1", &db, Deadline::none());
            assert_eq!(r.rows, Some(vec![vec![Cell::Text("SELECT 1".into())]]));
        }
    }

    #[test]
    fn env_helpers_fall_back_on_garbage() {
        std::env::set_var("TEXT2SQL_DB_CORE_TEST_BOOL", "maybe");
        std::env::set_var("TEXT2SQL_DB_CORE_TEST_U32", "0");
        assert!(env_bool("TEXT2SQL_DB_CORE_TEST_BOOL", true));
        assert_eq!(env_u32_nonzero("TEXT2SQL_DB_CORE_TEST_U32", 7), 7);
        std::env::set_var("TEXT2SQL_DB_CORE_TEST_BOOL", "no");
        std::env::set_var("TEXT2SQL_DB_CORE_TEST_U32", "42");
        assert!(!env_bool("TEXT2SQL_DB_CORE_TEST_BOOL", true));
        assert_eq!(env_u32_nonzero("TEXT2SQL_DB_CORE_TEST_U32", 7), 42);
    }
}

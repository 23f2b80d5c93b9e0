use std::fmt;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use text2sql_db_core::Deadline;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeoutError {
    Elapsed(Duration),
    WorkerPanicked,
    Spawn(String),
}

impl fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutError::Elapsed(d) => write!(f, "timed out after {:.3}s", d.as_secs_f64()),
            TimeoutError::WorkerPanicked => f.write_str("worker thread panicked"),
            TimeoutError::Spawn(e) => write!(f, "failed to spawn worker thread: {e}"),
        }
    }
}

impl std::error::Error for TimeoutError {}

/// Runs `f` on a worker thread and waits at most `timeout` for its answer.
///
/// `f` receives the matching [`Deadline`] so it can stop cooperatively (SQLite statements are
/// interrupted at that point). The caller is released when the timeout elapses even if `f` keeps
/// running; its late result is discarded.
pub fn run_with_timeout<T, F>(timeout: Duration, f: F) -> Result<T, TimeoutError>
where
    T: Send + 'static,
    F: FnOnce(Deadline) -> T + Send + 'static,
{
    let deadline = Deadline::after(timeout);
    let (tx, rx) = mpsc::sync_channel::<T>(1);
    std::thread::Builder::new()
        .name("text2sql-timed".to_string())
        .spawn(move || {
            let _ = tx.send(f(deadline));
        })
        .map_err(|e| TimeoutError::Spawn(e.to_string()))?;

    match rx.recv_timeout(timeout) {
        Ok(v) => Ok(v),
        Err(RecvTimeoutError::Timeout) => Err(TimeoutError::Elapsed(timeout)),
        Err(RecvTimeoutError::Disconnected) => Err(TimeoutError::WorkerPanicked),
    }
}

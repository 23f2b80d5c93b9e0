use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use text2sql_db_core::{
    env_bool, env_u32_nonzero, Cell, DbTarget, Deadline, ExecutionResult, Executor,
};
use tracing::{debug, warn};

use crate::conn::{Connection, OpenMode, SqliteError};

pub const ENV_BUSY_TIMEOUT_MS: &str = "TEXT2SQL_SQLITE_BUSY_TIMEOUT_MS";
pub const ENV_TUNED: &str = "TEXT2SQL_SQLITE_TUNED";
pub const ENV_WARN_FULL_SCAN: &str = "TEXT2SQL_SQLITE_WARN_FULL_SCAN";
pub const ENV_READONLY: &str = "TEXT2SQL_SQLITE_READONLY";

const TUNING_PRAGMAS: &str = "PRAGMA journal_mode = WAL;\
 PRAGMA synchronous = NORMAL;\
 PRAGMA cache_size = -64000;\
 PRAGMA temp_store = MEMORY;";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteConfig {
    /// How long to wait on a locked database file; never longer than the caller's deadline.
    pub busy_timeout_ms: u32,
    /// Apply WAL / cache tuning pragmas to every opened connection.
    pub tuned: bool,
    /// Run `EXPLAIN QUERY PLAN` first and log a warning on full table scans.
    pub warn_full_scan: bool,
    pub readonly: bool,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            tuned: false,
            warn_full_scan: false,
            readonly: false,
        }
    }
}

impl SqliteConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            busy_timeout_ms: env_u32_nonzero(ENV_BUSY_TIMEOUT_MS, d.busy_timeout_ms),
            tuned: env_bool(ENV_TUNED, d.tuned),
            warn_full_scan: env_bool(ENV_WARN_FULL_SCAN, d.warn_full_scan),
            readonly: env_bool(ENV_READONLY, d.readonly),
        }
    }

    pub fn with_busy_timeout_ms(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }

    pub fn with_tuned(mut self, tuned: bool) -> Self {
        self.tuned = tuned;
        self
    }

    pub fn with_warn_full_scan(mut self, warn: bool) -> Self {
        self.warn_full_scan = warn;
        self
    }

    pub fn with_readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    fn open_mode(&self) -> OpenMode {
        if self.readonly {
            OpenMode::ReadOnly
        } else {
            OpenMode::ReadWrite
        }
    }
}

/// Opens a new connection for every statement.
#[derive(Debug, Clone, Default)]
pub struct SqliteExecutor {
    config: SqliteConfig,
}

impl SqliteExecutor {
    pub fn new(config: SqliteConfig) -> Self {
        Self { config }
    }

    pub fn from_env() -> Self {
        Self::new(SqliteConfig::from_env())
    }

    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    pub fn open(&self, db: &DbTarget) -> Result<Connection, SqliteError> {
        let path = sqlite_target_path(db)?;
        let conn = Connection::open(path, self.config.open_mode())?;
        if self.config.tuned {
            if let Err(err) = conn.execute_batch(TUNING_PRAGMAS) {
                debug!(db = %db, error = %err, "sqlite tuning pragmas not applied");
            }
        }
        Ok(conn)
    }
}

impl Executor for SqliteExecutor {
    fn execute(&self, sql: &str, db: &DbTarget, deadline: Deadline) -> ExecutionResult {
        if deadline.expired() {
            return ExecutionResult::timed_out(None);
        }
        let conn = match self.open(db) {
            Ok(c) => c,
            Err(err) => return ExecutionResult::failure(err.to_string(), None),
        };
        run_statement(&conn, sql, deadline, &self.config)
    }
}

/// Reuses one open connection for every statement; calls are serialized on an internal lock.
///
/// A `:memory:` session keeps its tables across calls, which makes it the executor of choice for
/// fixtures that are built in-process.
#[derive(Debug)]
pub struct SqliteSession {
    conn: Mutex<Connection>,
    config: SqliteConfig,
}

impl SqliteSession {
    pub fn new(conn: Connection, config: SqliteConfig) -> Self {
        Self {
            conn: Mutex::new(conn),
            config,
        }
    }

    pub fn open(db: &DbTarget, config: SqliteConfig) -> Result<Self, SqliteError> {
        let conn = SqliteExecutor::new(config.clone()).open(db)?;
        Ok(Self::new(conn, config))
    }

    pub fn into_connection(self) -> Connection {
        self.conn.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

impl Executor for SqliteSession {
    fn execute(&self, sql: &str, db: &DbTarget, deadline: Deadline) -> ExecutionResult {
        if deadline.expired() {
            return ExecutionResult::timed_out(None);
        }
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        if !serves_target(conn.path(), db) {
            return ExecutionResult::failure(
                format!(
                    "session is bound to {}, cannot execute against {db}",
                    conn.path().display()
                ),
                None,
            );
        }
        run_statement(&conn, sql, deadline, &self.config)
    }
}

fn sqlite_target_path(db: &DbTarget) -> Result<&Path, SqliteError> {
    match db {
        DbTarget::Sqlite(path) => Ok(path),
        DbTarget::Dsn(dsn) => Err(SqliteError {
            code: libsqlite3_sys::SQLITE_CANTOPEN,
            message: format!("unsupported database for the SQLite executor: {dsn}"),
        }),
    }
}

fn canonicalize_best_effort(p: &Path) -> PathBuf {
    p.canonicalize().unwrap_or_else(|_| p.to_path_buf())
}

fn serves_target(bound: &Path, db: &DbTarget) -> bool {
    match db.sqlite_path() {
        Some(p) if p == bound => true,
        Some(p) => canonicalize_best_effort(p) == canonicalize_best_effort(bound),
        None => false,
    }
}

fn run_statement(
    conn: &Connection,
    sql: &str,
    deadline: Deadline,
    config: &SqliteConfig,
) -> ExecutionResult {
    let busy_ms = match deadline.remaining() {
        Some(left) => config
            .busy_timeout_ms
            .min(u32::try_from(left.as_millis()).unwrap_or(u32::MAX)),
        None => config.busy_timeout_ms,
    };
    conn.busy_timeout(busy_ms);

    if config.warn_full_scan {
        warn_on_full_scan(conn, sql, deadline);
    }

    let started = Instant::now();
    let res = conn.query(sql, deadline);
    let elapsed = started.elapsed().as_secs_f64();

    match res {
        Ok(rows) => ExecutionResult::success(rows, elapsed),
        Err(err) if deadline.is_bounded() && (err.is_interrupt() || deadline.expired()) => {
            debug!(elapsed, "statement interrupted at deadline");
            ExecutionResult::timed_out(Some(elapsed))
        }
        Err(err) => ExecutionResult::failure(err.to_string(), Some(elapsed)),
    }
}

fn warn_on_full_scan(conn: &Connection, sql: &str, deadline: Deadline) {
    let Ok(plan) = conn.query(&format!("EXPLAIN QUERY PLAN {sql}"), deadline) else {
        return;
    };
    let scans: Vec<&str> = plan
        .iter()
        .filter_map(|row| match row.last() {
            Some(Cell::Text(detail)) => Some(detail.as_str()),
            _ => None,
        })
        .filter(|detail| is_full_scan(detail))
        .collect();
    if !scans.is_empty() {
        warn!(
            plan = %scans.join("; "),
            "full table scan detected; consider adding an index"
        );
    }
}

fn is_full_scan(detail: &str) -> bool {
    let detail = detail.trim();
    (detail.starts_with("SCAN ") || detail.starts_with("SCAN TABLE "))
        && !detail.contains("INDEX")
}

use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use libsqlite3_sys as sqlite;
use text2sql_db_core::{Cell, Deadline, Row};

const SQLITE_OK: c_int = sqlite::SQLITE_OK as c_int;
const SQLITE_ROW: c_int = sqlite::SQLITE_ROW as c_int;
const SQLITE_DONE: c_int = sqlite::SQLITE_DONE as c_int;
const SQLITE_MISUSE: c_int = sqlite::SQLITE_MISUSE as c_int;
const SQLITE_INTERRUPT: c_int = sqlite::SQLITE_INTERRUPT as c_int;

/// VM instructions between deadline checks.
const PROGRESS_OPS: c_int = 1_000;

const MULTI_STATEMENT_ERROR: &str = "You can only execute one statement at a time.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteError {
    pub code: i32,
    pub message: String,
}

impl SqliteError {
    fn misuse(message: &str) -> Self {
        Self {
            code: SQLITE_MISUSE,
            message: message.to_string(),
        }
    }

    pub fn is_interrupt(&self) -> bool {
        self.code & 0xff == SQLITE_INTERRUPT
    }
}

impl fmt::Display for SqliteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for SqliteError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
    /// Read-write, creating the file when missing.
    Create,
}

impl OpenMode {
    fn flags(self) -> c_int {
        match self {
            OpenMode::ReadOnly => sqlite::SQLITE_OPEN_READONLY,
            OpenMode::ReadWrite => sqlite::SQLITE_OPEN_READWRITE,
            OpenMode::Create => sqlite::SQLITE_OPEN_READWRITE | sqlite::SQLITE_OPEN_CREATE,
        }
    }
}

/// Owned SQLite connection handle. Statements run in autocommit mode, so DML is committed as
/// soon as it completes.
pub struct Connection {
    db: *mut sqlite::sqlite3,
    path: PathBuf,
}

// The handle is only ever used by one thread at a time (`&mut`-free API, callers wrap it in a
// `Mutex` to share), and the bundled library is built in serialized threading mode.
unsafe impl Send for Connection {}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("path", &self.path)
            .finish()
    }
}

struct Statement(*mut sqlite::sqlite3_stmt);

impl Drop for Statement {
    fn drop(&mut self) {
        unsafe {
            let _ = sqlite::sqlite3_finalize(self.0);
        }
    }
}

/// Installs a deadline-checking progress handler for the lifetime of the guard.
struct ProgressGuard {
    db: *mut sqlite::sqlite3,
}

impl ProgressGuard {
    fn install(db: *mut sqlite::sqlite3, deadline: &Instant) -> Self {
        unsafe {
            sqlite::sqlite3_progress_handler(
                db,
                PROGRESS_OPS,
                Some(deadline_progress),
                deadline as *const Instant as *mut c_void,
            );
        }
        Self { db }
    }
}

impl Drop for ProgressGuard {
    fn drop(&mut self) {
        unsafe {
            sqlite::sqlite3_progress_handler(self.db, 0, None, std::ptr::null_mut());
        }
    }
}

unsafe extern "C" fn deadline_progress(arg: *mut c_void) -> c_int {
    let deadline = &*(arg as *const Instant);
    if Instant::now() >= *deadline {
        1
    } else {
        0
    }
}

impl Connection {
    pub fn open(path: &Path, mode: OpenMode) -> Result<Self, SqliteError> {
        let Some(path_str) = path.to_str() else {
            return Err(SqliteError::misuse("database path is not valid UTF-8"));
        };
        let cpath = CString::new(path_str)
            .map_err(|_| SqliteError::misuse("database path contains a NUL byte"))?;

        let mut db: *mut sqlite::sqlite3 = std::ptr::null_mut();
        let rc =
            unsafe { sqlite::sqlite3_open_v2(cpath.as_ptr(), &mut db, mode.flags(), std::ptr::null()) };
        if rc != SQLITE_OK || db.is_null() {
            let err = SqliteError {
                code: rc,
                message: unsafe { last_errmsg(db, rc) },
            };
            if !db.is_null() {
                unsafe {
                    let _ = sqlite::sqlite3_close(db);
                }
            }
            return Err(err);
        }

        Ok(Self {
            db,
            path: path.to_path_buf(),
        })
    }

    pub fn open_in_memory() -> Result<Self, SqliteError> {
        Self::open(Path::new(":memory:"), OpenMode::Create)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn busy_timeout(&self, ms: u32) {
        let ms = ms.min(c_int::MAX as u32) as c_int;
        unsafe {
            let _ = sqlite::sqlite3_busy_timeout(self.db, ms);
        }
    }

    /// Runs every statement in `sql`, discarding any rows.
    pub fn execute_batch(&self, sql: &str) -> Result<(), SqliteError> {
        let sql_c =
            CString::new(sql).map_err(|_| SqliteError::misuse("SQL text contains a NUL byte"))?;
        let mut errmsg: *mut c_char = std::ptr::null_mut();
        let rc = unsafe {
            sqlite::sqlite3_exec(
                self.db,
                sql_c.as_ptr(),
                None,
                std::ptr::null_mut(),
                &mut errmsg,
            )
        };
        if rc == SQLITE_OK {
            return Ok(());
        }
        let message = if errmsg.is_null() {
            unsafe { last_errmsg(self.db, rc) }
        } else {
            let m = unsafe { CStr::from_ptr(errmsg).to_string_lossy().into_owned() };
            unsafe { sqlite::sqlite3_free(errmsg as *mut c_void) };
            m
        };
        Err(SqliteError { code: rc, message })
    }

    /// Runs exactly one statement and fetches all of its rows.
    ///
    /// A bounded `deadline` interrupts the statement once it passes; the error then satisfies
    /// [`SqliteError::is_interrupt`]. Text that holds only whitespace or comments yields no rows.
    pub fn query(&self, sql: &str, deadline: Deadline) -> Result<Vec<Row>, SqliteError> {
        let sql_c =
            CString::new(sql).map_err(|_| SqliteError::misuse("SQL text contains a NUL byte"))?;

        let deadline_at = deadline.instant();
        let _progress = deadline_at
            .as_ref()
            .map(|at| ProgressGuard::install(self.db, at));

        let mut raw: *mut sqlite::sqlite3_stmt = std::ptr::null_mut();
        let mut tail: *const c_char = std::ptr::null();
        let rc = unsafe {
            sqlite::sqlite3_prepare_v2(self.db, sql_c.as_ptr(), -1, &mut raw, &mut tail)
        };
        if rc != SQLITE_OK {
            if !raw.is_null() {
                drop(Statement(raw));
            }
            return Err(self.error(rc));
        }
        if raw.is_null() {
            return Ok(Vec::new());
        }
        let stmt = Statement(raw);

        if !tail.is_null() {
            let rest = unsafe { CStr::from_ptr(tail) }.to_string_lossy();
            if self.holds_statement(&rest) {
                return Err(SqliteError::misuse(MULTI_STATEMENT_ERROR));
            }
        }

        unsafe { self.read_rows(&stmt) }
    }

    fn holds_statement(&self, rest: &str) -> bool {
        let rest = rest.trim_matches(|c: char| c.is_whitespace() || c == ';');
        if rest.is_empty() {
            return false;
        }
        let Ok(rest_c) = CString::new(rest) else {
            return true;
        };
        let mut raw: *mut sqlite::sqlite3_stmt = std::ptr::null_mut();
        let rc = unsafe {
            sqlite::sqlite3_prepare_v2(
                self.db,
                rest_c.as_ptr(),
                -1,
                &mut raw,
                std::ptr::null_mut(),
            )
        };
        if raw.is_null() {
            return rc != SQLITE_OK;
        }
        drop(Statement(raw));
        true
    }

    unsafe fn read_rows(&self, stmt: &Statement) -> Result<Vec<Row>, SqliteError> {
        let col_count = sqlite::sqlite3_column_count(stmt.0).max(0) as usize;
        let mut rows: Vec<Row> = Vec::new();
        loop {
            let rc = sqlite::sqlite3_step(stmt.0);
            if rc == SQLITE_DONE {
                break;
            }
            if rc != SQLITE_ROW {
                return Err(self.error(rc));
            }

            let mut row: Row = Vec::with_capacity(col_count);
            for i in 0..col_count {
                let i = i as c_int;
                let cell = match sqlite::sqlite3_column_type(stmt.0, i) {
                    sqlite::SQLITE_INTEGER => Cell::Integer(sqlite::sqlite3_column_int64(stmt.0, i)),
                    sqlite::SQLITE_FLOAT => Cell::Real(sqlite::sqlite3_column_double(stmt.0, i)),
                    sqlite::SQLITE_TEXT => {
                        let ptr = sqlite::sqlite3_column_text(stmt.0, i);
                        let n = sqlite::sqlite3_column_bytes(stmt.0, i);
                        if ptr.is_null() || n <= 0 {
                            Cell::Text(String::new())
                        } else {
                            let slice = std::slice::from_raw_parts(ptr, n as usize);
                            Cell::Text(String::from_utf8_lossy(slice).into_owned())
                        }
                    }
                    sqlite::SQLITE_BLOB => {
                        let ptr = sqlite::sqlite3_column_blob(stmt.0, i);
                        let n = sqlite::sqlite3_column_bytes(stmt.0, i);
                        if ptr.is_null() || n <= 0 {
                            Cell::Blob(Vec::new())
                        } else {
                            let slice = std::slice::from_raw_parts(ptr as *const u8, n as usize);
                            Cell::Blob(slice.to_vec())
                        }
                    }
                    _ => Cell::Null,
                };
                row.push(cell);
            }
            rows.push(row);
        }
        Ok(rows)
    }

    fn error(&self, rc: c_int) -> SqliteError {
        SqliteError {
            code: rc,
            message: unsafe { last_errmsg(self.db, rc) },
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        unsafe {
            let _ = sqlite::sqlite3_close(self.db);
        }
    }
}

unsafe fn last_errmsg(db: *mut sqlite::sqlite3, rc: c_int) -> String {
    let msg = if db.is_null() {
        sqlite::sqlite3_errstr(rc)
    } else {
        sqlite::sqlite3_errmsg(db)
    };
    if msg.is_null() {
        return format!("sqlite error {rc}");
    }
    CStr::from_ptr(msg).to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn query_reads_every_storage_class() {
        let conn = Connection::open_in_memory().unwrap();
        let rows = conn
            .query("SELECT 1, 2.5, 'txt', x'0102', NULL", Deadline::none())
            .unwrap();
        assert_eq!(
            rows,
            vec![vec![
                Cell::Integer(1),
                Cell::Real(2.5),
                Cell::Text("txt".into()),
                Cell::Blob(vec![1, 2]),
                Cell::Null,
            ]]
        );
    }

    #[test]
    fn trailing_semicolons_and_comments_are_one_statement() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(conn.query("SELECT 1;  ", Deadline::none()).unwrap().len(), 1);
        assert_eq!(conn.query("SELECT 1; -- done", Deadline::none()).unwrap().len(), 1);
        assert!(conn.query("   ", Deadline::none()).unwrap().is_empty());
    }

    #[test]
    fn second_statement_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        let err = conn.query("SELECT 1; SELECT 2", Deadline::none()).unwrap_err();
        assert_eq!(err.message, MULTI_STATEMENT_ERROR);
    }

    #[test]
    fn runaway_statement_is_interrupted_at_deadline() {
        let conn = Connection::open_in_memory().unwrap();
        let started = Instant::now();
        let err = conn
            .query(
                "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) SELECT count(*) FROM c",
                Deadline::after(Duration::from_millis(100)),
            )
            .unwrap_err();
        assert!(err.is_interrupt(), "unexpected error: {err:?}");
        assert!(started.elapsed() < Duration::from_secs(10));

        // The handler is removed afterwards.
        assert_eq!(conn.query("SELECT 1", Deadline::none()).unwrap().len(), 1);
    }

    #[test]
    fn open_readonly_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = Connection::open(&dir.path().join("missing.sqlite"), OpenMode::ReadOnly)
            .unwrap_err();
        assert!(!err.message.is_empty());
    }

    #[test]
    fn execute_batch_reports_errors() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t(id INTEGER); INSERT INTO t VALUES (1);")
            .unwrap();
        let err = conn.execute_batch("INSERT INTO nope VALUES (1)").unwrap_err();
        assert!(err.message.contains("no such table"), "{err}");
    }
}

use std::fmt;
use std::path::{Path, PathBuf};

use text2sql_contracts::SQLITE_DSN_PREFIX;

/// Which database a statement runs against, parsed from a record's `db_path` field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DbTarget {
    /// SQLite database file (or `:memory:`), from a bare path or a `sqlite:///` DSN.
    Sqlite(PathBuf),
    /// Any other connection string; only executors for that backend can serve it.
    Dsn(String),
}

impl DbTarget {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Some(path) = raw.strip_prefix(SQLITE_DSN_PREFIX) {
            return DbTarget::Sqlite(PathBuf::from(path));
        }
        if raw.contains("://") {
            return DbTarget::Dsn(raw.to_string());
        }
        DbTarget::Sqlite(PathBuf::from(raw))
    }

    pub fn sqlite_path(&self) -> Option<&Path> {
        match self {
            DbTarget::Sqlite(p) => Some(p),
            DbTarget::Dsn(_) => None,
        }
    }

    pub fn is_memory(&self) -> bool {
        self.sqlite_path()
            .is_some_and(|p| p.as_os_str() == ":memory:")
    }
}

impl fmt::Display for DbTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbTarget::Sqlite(p) => write!(f, "{}", p.display()),
            DbTarget::Dsn(d) => f.write_str(d),
        }
    }
}

impl From<&str> for DbTarget {
    fn from(raw: &str) -> Self {
        DbTarget::parse(raw)
    }
}

fn absolute_best_effort(p: &Path) -> PathBuf {
    if p.is_absolute() {
        return p.to_path_buf();
    }
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(p)
}

/// `sqlite:///<absolute path>`; strings that already are SQLite DSNs pass through.
pub fn sqlite_path_to_dsn(path: &str) -> String {
    if path.starts_with(SQLITE_DSN_PREFIX) {
        return path.to_string();
    }
    format!(
        "{SQLITE_DSN_PREFIX}{}",
        absolute_best_effort(Path::new(path)).display()
    )
}

/// Absolute filesystem path of a `sqlite:///` DSN; anything else is returned as a path unchanged.
pub fn sqlite_dsn_to_path(dsn: &str) -> PathBuf {
    match dsn.strip_prefix(SQLITE_DSN_PREFIX) {
        Some(rest) => absolute_best_effort(Path::new(rest)),
        None => PathBuf::from(dsn),
    }
}

//! SQLite-backed [`Executor`](text2sql_db_core::Executor) built directly on `libsqlite3-sys`.
//!
//! Two executors share the same statement runner:
//! - [`SqliteExecutor`] opens a fresh connection for every call (no pooling), so concurrent
//!   items never share connection state.
//! - [`SqliteSession`] wraps one already-open [`Connection`] and reuses it for every call.
//!
//! Statements are hard-cancelled once the caller's deadline passes: a progress handler
//! interrupts the virtual machine, so the calling thread never stays blocked on a runaway query.

mod conn;
mod executor;
mod schema;

pub use conn::{Connection, OpenMode, SqliteError};
pub use executor::{SqliteConfig, SqliteExecutor, SqliteSession};
pub use schema::schema_prompt;

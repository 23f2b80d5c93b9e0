use text2sql_db_core::{Cell, Deadline};

use crate::conn::{Connection, SqliteError};

/// `CREATE TABLE` statements of every user table, newline-joined in `sqlite_master` order.
///
/// Used to build the schema section of a text-to-SQL prompt. `sqlite_sequence` is skipped.
pub fn schema_prompt(conn: &Connection) -> Result<String, SqliteError> {
    let rows = conn.query(
        "SELECT name, sql FROM sqlite_master WHERE type = 'table'",
        Deadline::none(),
    )?;
    let mut out: Vec<String> = Vec::with_capacity(rows.len());
    for row in rows {
        let name = match row.first() {
            Some(Cell::Text(n)) => n.as_str(),
            _ => continue,
        };
        if name == "sqlite_sequence" {
            continue;
        }
        match row.get(1) {
            Some(Cell::Text(sql)) => out.push(sql.clone()),
            _ => out.push("Schema does not exist".to_string()),
        }
    }
    Ok(out.join("\n"))
}

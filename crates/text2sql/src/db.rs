use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use text2sql_contracts::TEXT2SQL_EXEC_REPORT_SCHEMA_VERSION;
use text2sql_db_core::{DbTarget, Deadline, ExecutionResult, Executor};
use text2sql_db_sqlite::{schema_prompt, SqliteExecutor};

use crate::util;

#[derive(Debug, Args)]
pub struct ExecArgs {
    /// SQLite database path or `sqlite:///` DSN.
    #[arg(long, value_name = "PATH|DSN")]
    pub db: String,

    /// SQL statement to execute.
    #[arg(long, value_name = "SQL")]
    pub sql: String,

    /// Interrupt the statement after this many seconds.
    #[arg(long, value_name = "N")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Args)]
pub struct SchemaArgs {
    /// SQLite database path or `sqlite:///` DSN.
    #[arg(long, value_name = "PATH|DSN")]
    pub db: String,
}

#[derive(Debug, Serialize)]
struct ExecReport<'a> {
    schema_version: &'static str,
    db: String,
    sql: &'a str,
    result: &'a ExecutionResult,
}

pub fn cmd_exec(args: ExecArgs) -> Result<ExitCode> {
    let db = DbTarget::parse(&args.db);
    let deadline = args
        .timeout_secs
        .map(|s| Deadline::after(Duration::from_secs(s)))
        .unwrap_or_default();
    let result = SqliteExecutor::from_env().execute(&args.sql, &db, deadline);

    util::emit_report(&ExecReport {
        schema_version: TEXT2SQL_EXEC_REPORT_SCHEMA_VERSION,
        db: db.to_string(),
        sql: &args.sql,
        result: &result,
    })?;
    Ok(if result.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

pub fn cmd_schema(args: SchemaArgs) -> Result<ExitCode> {
    let db = DbTarget::parse(&args.db);
    let conn = SqliteExecutor::from_env()
        .open(&db)
        .with_context(|| format!("open database: {db}"))?;
    let schema = schema_prompt(&conn).with_context(|| format!("read schema: {db}"))?;
    println!("{schema}");
    Ok(ExitCode::SUCCESS)
}

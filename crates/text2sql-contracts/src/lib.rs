//! Shared, version-pinned identifiers for machine-readable I/O.
//!
//! File names, record field names and sentinel error strings live here so the evaluator,
//! the generation driver and the CLI agree on the on-disk artifacts of an experiment.

pub const TEXT2SQL_EVAL_REPORT_SCHEMA_VERSION: &str = "text2sql.eval.report@0.1.0";
pub const TEXT2SQL_GENERATE_REPORT_SCHEMA_VERSION: &str = "text2sql.generate.report@0.1.0";
pub const TEXT2SQL_EXEC_REPORT_SCHEMA_VERSION: &str = "text2sql.exec.report@0.1.0";

/// Per-item predictions file written by both generation and evaluation runs.
pub const PREDICTIONS_FILE_NAME: &str = "predict.json";

pub const FIELD_QUESTION: &str = "question";
pub const FIELD_GENERATED: &str = "generated";
pub const FIELD_GOLD_SQL: &str = "SQL";
pub const FIELD_DB_PATH: &str = "db_path";
pub const FIELD_ERROR: &str = "error";

/// Group key that always carries the size-weighted headline score.
pub const OVERALL_GROUP: &str = "overall";

pub const TABLE_MISMATCH: &str = "Table mismatch";
pub const FUNCTION_TIMED_OUT: &str = "Function Timed Out";
pub const EXCEPTION_PREFIX: &str = "Exception: ";

/// Marker that ends the instruction part of a text-to-SQL prompt.
pub const SQL_PROMPT_MARKER: &str = "# SQL:";

pub const SQLITE_DSN_PREFIX: &str = "sqlite:///";

pub const DEFAULT_META_TIMEOUT_SECS: u64 = 1000;
pub const DEFAULT_VES_ITERATIONS: u32 = 10;
pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_MAX_NEW_TOKENS: u32 = 256;

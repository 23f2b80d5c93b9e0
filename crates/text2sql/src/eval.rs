use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use text2sql_contracts::{
    DEFAULT_META_TIMEOUT_SECS, DEFAULT_VES_ITERATIONS, FUNCTION_TIMED_OUT,
    TEXT2SQL_EVAL_REPORT_SCHEMA_VERSION,
};
use text2sql_db_sqlite::SqliteExecutor;
use text2sql_eval::{
    load_responses_with_bytes, EvalConfig, Evaluator, GroupedScore, Metric,
};

use crate::util;

#[derive(Debug, Args)]
pub struct EvalArgs {
    /// JSON array of responses with `generated`, `SQL` and `db_path` keys.
    #[arg(long, value_name = "PATH")]
    pub predictions: PathBuf,

    /// Directory receiving `<metric>.json` and `predict.json`.
    #[arg(long, value_name = "DIR")]
    pub experiment_dir: PathBuf,

    #[arg(long, value_enum, default_value_t = Metric::Accuracy)]
    pub metric: Metric,

    /// Response key to group scores by (e.g. `difficulty`).
    #[arg(long, value_name = "FIELD")]
    pub group_by: Option<String>,

    /// Wall-clock budget per item, in seconds.
    #[arg(long, value_name = "N", default_value_t = DEFAULT_META_TIMEOUT_SECS)]
    pub timeout_secs: u64,

    /// Timed runs per matching item (VES only).
    #[arg(long, value_name = "N", default_value_t = DEFAULT_VES_ITERATIONS)]
    pub iterations: u32,

    /// Items scored concurrently.
    #[arg(long, value_name = "N", default_value_t = 1)]
    pub jobs: usize,
}

#[derive(Debug, Serialize)]
struct EvalReport {
    schema_version: &'static str,
    metric: Metric,
    predictions: String,
    predictions_sha256_hex: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    group_by: Option<String>,
    scores: GroupedScore,
    summary: EvalSummary,
    scores_path: String,
    predictions_path: String,
}

#[derive(Debug, Serialize)]
struct EvalSummary {
    items: usize,
    errors: usize,
    timed_out: usize,
    elapsed_secs: f64,
}

pub fn cmd_eval(args: EvalArgs) -> Result<ExitCode> {
    let (bytes, records) = load_responses_with_bytes(&args.predictions)?;

    let mut config = EvalConfig::new(args.metric)
        .with_timeout(Duration::from_secs(args.timeout_secs))
        .with_iterations(args.iterations)
        .with_jobs(args.jobs);
    if let Some(field) = &args.group_by {
        config = config.with_group_by(field.clone());
    }

    let evaluator = Evaluator::new(SqliteExecutor::from_env(), &args.experiment_dir);
    let run = evaluator.evaluate(records, &config)?;

    let timed_out = run
        .responses
        .iter()
        .filter(|r| r.error.as_deref() == Some(FUNCTION_TIMED_OUT))
        .count();
    let summary = EvalSummary {
        items: run.responses.len(),
        errors: run.error_count(),
        timed_out,
        elapsed_secs: run.elapsed.as_secs_f64(),
    };
    util::emit_report(&EvalReport {
        schema_version: TEXT2SQL_EVAL_REPORT_SCHEMA_VERSION,
        metric: args.metric,
        predictions: args.predictions.display().to_string(),
        predictions_sha256_hex: util::sha256_hex(&bytes),
        group_by: args.group_by,
        scores: run.scores,
        summary,
        scores_path: run.scores_path.display().to_string(),
        predictions_path: run.predictions_path.display().to_string(),
    })?;
    Ok(ExitCode::SUCCESS)
}

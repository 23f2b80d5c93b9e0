use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use text2sql_contracts::{
    DEFAULT_MAX_NEW_TOKENS, DEFAULT_MAX_RETRIES, DEFAULT_META_TIMEOUT_SECS,
    TEXT2SQL_GENERATE_REPORT_SCHEMA_VERSION,
};
use text2sql_db_core::Executor;
use text2sql_db_sqlite::SqliteExecutor;
use text2sql_eval::{
    generate_and_save, load_dataset, CommandGenerator, DecodeOptions, GenerateOptions,
    GenerationParams,
};

use crate::util;

#[derive(Debug, Args)]
pub struct GenerateArgs {
    /// JSON array of dataset entries with `prompt` and `db_path` keys.
    #[arg(long, value_name = "PATH")]
    pub dataset: PathBuf,

    /// Directory receiving `predict.json`.
    #[arg(long, value_name = "DIR")]
    pub experiment_dir: PathBuf,

    /// Program that reads a JSON request on stdin and prints the completion on stdout.
    #[arg(long, value_name = "PROG")]
    pub generator_cmd: PathBuf,

    /// Argument passed to the generator program (repeatable).
    #[arg(long = "generator-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub generator_args: Vec<String>,

    /// Generation attempts per item.
    #[arg(long, value_name = "N", default_value_t = DEFAULT_MAX_RETRIES)]
    pub max_retries: u32,

    /// Generate once per item without executing the result.
    #[arg(long)]
    pub no_execution_guidance: bool,

    /// Regenerate even if the experiment directory already holds predictions.
    #[arg(long)]
    pub force: bool,

    #[arg(long, value_name = "F", default_value_t = 0.0)]
    pub temperature: f64,

    #[arg(long, value_name = "N", default_value_t = DEFAULT_MAX_NEW_TOKENS)]
    pub max_new_tokens: u32,

    /// Kill the generator program after this many seconds.
    #[arg(long, value_name = "N", default_value_t = DEFAULT_META_TIMEOUT_SECS)]
    pub generation_timeout_secs: u64,

    /// Interrupt a validation query after this many seconds.
    #[arg(long, value_name = "N", default_value_t = DEFAULT_META_TIMEOUT_SECS)]
    pub execution_timeout_secs: u64,

    /// Keep raw completions instead of extracting the SQL statement.
    #[arg(long)]
    pub no_postprocess: bool,
}

#[derive(Debug, Serialize)]
struct GenerateReport {
    schema_version: &'static str,
    dataset: String,
    predictions_path: String,
    from_cache: bool,
    execution_guidance: bool,
    summary: GenerateSummary,
}

#[derive(Debug, Serialize)]
struct GenerateSummary {
    items: usize,
    validated: usize,
    exhausted: usize,
    empty: usize,
    elapsed_secs: f64,
}

pub fn cmd_generate(args: GenerateArgs) -> Result<ExitCode> {
    let dataset = load_dataset(&args.dataset)?;

    let generator = CommandGenerator::new(&args.generator_cmd)
        .with_args(args.generator_args)
        .with_timeout(Duration::from_secs(args.generation_timeout_secs));

    let options = GenerateOptions {
        decode: DecodeOptions {
            max_retries: args.max_retries,
            params: GenerationParams {
                temperature: args.temperature,
                max_new_tokens: args.max_new_tokens,
            },
            postprocess: !args.no_postprocess,
            execution_timeout: Some(Duration::from_secs(args.execution_timeout_secs)),
        },
        force: args.force,
    };

    let executor = SqliteExecutor::from_env();
    let guidance: Option<&dyn Executor> = if args.no_execution_guidance {
        None
    } else {
        Some(&executor)
    };
    let run = generate_and_save(&args.experiment_dir, dataset, &generator, guidance, &options)?;

    let summary = GenerateSummary {
        items: run.records.len(),
        validated: run.validated,
        exhausted: run.exhausted,
        empty: run.records.iter().filter(|r| r.generated.is_empty()).count(),
        elapsed_secs: run.elapsed.as_secs_f64(),
    };
    util::emit_report(&GenerateReport {
        schema_version: TEXT2SQL_GENERATE_REPORT_SCHEMA_VERSION,
        dataset: args.dataset.display().to_string(),
        predictions_path: run.predictions_path.display().to_string(),
        from_cache: run.from_cache,
        execution_guidance: guidance.is_some(),
        summary,
    })?;
    Ok(ExitCode::SUCCESS)
}

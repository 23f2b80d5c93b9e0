//! Scoring and generation drivers for text-to-SQL experiments.
//!
//! - [`match_sqls`] decides execution accuracy by comparing distinct result rows.
//! - [`trim_outliers`] and [`iterated_execution`] produce the timing ratio behind VES.
//! - [`Evaluator`] scores a batch under per-item timeouts, groups and aggregates the scores,
//!   and persists both the scores and the per-item predictions.
//! - [`decode_with_execution_guidance`] drives a [`Generator`] with one-shot self-correction
//!   from execution errors, and [`generate_and_save`] runs it over a dataset.

mod compare;
mod decode;
mod evaluator;
mod generate;
mod generator;
mod metric;
mod persist;
mod pool;
mod postprocess;
mod response;
mod score;
mod timeout;
mod trim;
mod ves;

pub use compare::{match_sqls, same_row_set, MatchOutcome};
pub use decode::{corrective_prompt, decode_with_execution_guidance, DecodeOptions, DecodeOutcome};
pub use evaluator::{aggregate, score_item, EvalConfig, EvalRun, Evaluator, GroupedScore};
pub use generate::{generate_and_save, DatasetRecord, GenerateOptions, GenerateRun, GeneratedRecord};
pub use generator::{CommandGenerator, GenerationParams, Generator, TimeoutGenerator};
pub use metric::{compute_metric, Metric, MetricParseError};
pub use persist::{
    load_dataset, load_responses, load_responses_with_bytes, read_json, read_json_with_bytes,
    write_json_pretty,
};
pub use postprocess::extract_sql;
pub use response::{ResponseRecord, ScoredResponse};
pub use score::{ItemScore, ScoreFailure};
pub use timeout::{run_with_timeout, TimeoutError};
pub use trim::{mean, population_std_dev, trim_outliers};
pub use ves::{iterated_execution, timing_ratios};

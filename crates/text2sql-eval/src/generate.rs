use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use text2sql_contracts::PREDICTIONS_FILE_NAME;
use text2sql_db_core::{DbTarget, Executor};
use tracing::{info, warn};

use crate::decode::{decode_with_execution_guidance, DecodeOptions};
use crate::generator::Generator;
use crate::persist::{read_json, write_json_pretty};
use crate::postprocess::extract_sql;

/// One dataset entry to generate SQL for. Other keys (question, gold `SQL`, grouping labels)
/// are carried through to the predictions file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub prompt: String,
    pub db_path: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedRecord {
    #[serde(flatten)]
    pub record: DatasetRecord,
    pub generated: String,
}

#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub decode: DecodeOptions,
    /// Regenerate even when the experiment directory already holds predictions.
    pub force: bool,
}

#[derive(Debug, Clone)]
pub struct GenerateRun {
    pub records: Vec<GeneratedRecord>,
    pub predictions_path: PathBuf,
    pub from_cache: bool,
    /// Items whose final SQL executed cleanly (0 without an executor or from cache).
    pub validated: usize,
    /// Items that used up every attempt.
    pub exhausted: usize,
    pub elapsed: Duration,
}

/// Generates SQL for every dataset record and writes `predict.json` into `experiment_dir`.
///
/// With an executor each item goes through execution-guided decoding; without one the backend
/// is called once per item. A backend error on an item leaves its `generated` field empty.
/// An existing predictions file is returned as-is unless `options.force` is set.
pub fn generate_and_save<G: Generator + ?Sized>(
    experiment_dir: &Path,
    dataset: Vec<DatasetRecord>,
    generator: &G,
    executor: Option<&dyn Executor>,
    options: &GenerateOptions,
) -> Result<GenerateRun> {
    let started = Instant::now();
    let predictions_path = experiment_dir.join(PREDICTIONS_FILE_NAME);
    if !options.force && predictions_path.is_file() {
        let records: Vec<GeneratedRecord> = read_json(&predictions_path)?;
        info!(
            path = %predictions_path.display(),
            items = records.len(),
            "reusing existing predictions"
        );
        return Ok(GenerateRun {
            records,
            predictions_path,
            from_cache: true,
            validated: 0,
            exhausted: 0,
            elapsed: started.elapsed(),
        });
    }

    info!(
        items = dataset.len(),
        guided = executor.is_some(),
        "generating predictions"
    );
    let mut records = Vec::with_capacity(dataset.len());
    let mut validated = 0;
    let mut exhausted = 0;
    for (idx, record) in dataset.into_iter().enumerate() {
        let generated = match executor {
            Some(executor) => {
                let db = DbTarget::parse(&record.db_path);
                let outcome = decode_with_execution_guidance(
                    &record.prompt,
                    &db,
                    generator,
                    executor,
                    &options.decode,
                );
                if outcome.is_success() {
                    validated += 1;
                } else {
                    exhausted += 1;
                }
                outcome.into_sql()
            }
            None => match generator.generate(&record.prompt, &options.decode.params) {
                Ok(text) if options.decode.postprocess => extract_sql(&text),
                Ok(text) => text,
                Err(err) => {
                    warn!(item = idx, error = %format!("{err:#}"), "generation failed");
                    String::new()
                }
            },
        };
        records.push(GeneratedRecord { record, generated });
    }

    write_json_pretty(&predictions_path, &records)?;
    let run = GenerateRun {
        records,
        predictions_path,
        from_cache: false,
        validated,
        exhausted,
        elapsed: started.elapsed(),
    };
    info!(
        path = %run.predictions_path.display(),
        validated = run.validated,
        exhausted = run.exhausted,
        elapsed_secs = run.elapsed.as_secs_f64(),
        "predictions written"
    );
    Ok(run)
}

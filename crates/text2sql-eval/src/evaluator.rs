use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use text2sql_contracts::{
    DEFAULT_META_TIMEOUT_SECS, DEFAULT_VES_ITERATIONS, OVERALL_GROUP, PREDICTIONS_FILE_NAME,
};
use text2sql_db_core::{DbTarget, Deadline, Executor};
use tracing::{debug, info};

use crate::compare::match_sqls;
use crate::metric::{compute_metric, Metric};
use crate::persist::write_json_pretty;
use crate::pool::map_indexed;
use crate::response::{ResponseRecord, ScoredResponse};
use crate::score::{ItemScore, ScoreFailure};
use crate::timeout::run_with_timeout;
use crate::ves::iterated_execution;

#[derive(Debug, Clone, PartialEq)]
pub struct EvalConfig {
    pub metric: Metric,
    /// Record key to group scores by.
    pub group_by: Option<String>,
    /// Wall-clock budget for scoring one item.
    pub timeout: Duration,
    /// Timed runs per matching item (VES only).
    pub iterations: u32,
    /// Items scored concurrently.
    pub jobs: usize,
}

impl EvalConfig {
    pub fn new(metric: Metric) -> Self {
        Self {
            metric,
            group_by: None,
            timeout: Duration::from_secs(DEFAULT_META_TIMEOUT_SECS),
            iterations: DEFAULT_VES_ITERATIONS,
            jobs: 1,
        }
    }

    pub fn with_group_by(mut self, key: impl Into<String>) -> Self {
        self.group_by = Some(key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }
}

/// Per-group scores plus the size-weighted `overall`.
///
/// Serializes as one flat object, `overall` last. A data group literally named `overall` is
/// shadowed by the headline score.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupedScore {
    groups: BTreeMap<String, (f64, usize)>,
    overall: f64,
}

impl GroupedScore {
    pub fn overall(&self) -> f64 {
        self.overall
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        if key == OVERALL_GROUP {
            return Some(self.overall);
        }
        self.groups.get(key).map(|(score, _)| *score)
    }

    pub fn group_size(&self, key: &str) -> Option<usize> {
        self.groups.get(key).map(|(_, n)| *n)
    }

    pub fn groups(&self) -> impl Iterator<Item = (&str, f64)> {
        self.groups
            .iter()
            .map(|(k, (score, _))| (k.as_str(), *score))
    }
}

impl Serialize for GroupedScore {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        for (k, score) in self.groups() {
            map.serialize_entry(k, &score)?;
        }
        map.serialize_entry(OVERALL_GROUP, &self.overall)?;
        map.end()
    }
}

/// Aggregates scored responses, optionally grouped by a record key.
///
/// `overall` is `Σ(group_score · group_size) / total`, which equals the ungrouped score.
/// Records without the key fall into a `null` group. A data group literally named `overall` is
/// reported as `overall (group)` so it cannot collide with the aggregate entry.
pub fn aggregate(
    metric: Metric,
    responses: &[ScoredResponse],
    group_by: Option<&str>,
) -> GroupedScore {
    let Some(field) = group_by else {
        let values: Vec<f64> = responses.iter().map(|r| r.value).collect();
        return GroupedScore {
            groups: BTreeMap::new(),
            overall: compute_metric(metric, &values),
        };
    };

    let mut buckets: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for r in responses {
        let key = r
            .record
            .group_key(field)
            .map(|k| {
                if k == OVERALL_GROUP {
                    format!("{OVERALL_GROUP} (group)")
                } else {
                    k
                }
            })
            .unwrap_or_else(|| "null".to_string());
        buckets.entry(key).or_default().push(r.value);
    }

    let mut weighted = 0.0;
    let mut groups = BTreeMap::new();
    for (key, values) in buckets {
        let score = compute_metric(metric, &values);
        weighted += score * values.len() as f64;
        groups.insert(key, (score, values.len()));
    }
    let overall = if responses.is_empty() {
        0.0
    } else {
        weighted / responses.len() as f64
    };
    GroupedScore { groups, overall }
}

/// Scores one item against `deadline` without the outer wall-clock guard.
pub fn score_item<E: Executor + ?Sized>(
    executor: &E,
    metric: Metric,
    record: &ResponseRecord,
    iterations: u32,
    deadline: Deadline,
) -> Result<ItemScore, ScoreFailure> {
    let db = DbTarget::parse(&record.db_path);
    match metric {
        Metric::Accuracy => {
            let outcome = match_sqls(
                executor,
                &record.generated_sql,
                &record.gold_sql,
                &db,
                deadline,
            )?;
            Ok(ItemScore {
                value: if outcome.is_match { 1.0 } else { 0.0 },
                error: outcome.error,
            })
        }
        Metric::Ves => iterated_execution(
            executor,
            &record.generated_sql,
            &record.gold_sql,
            &db,
            iterations,
            deadline,
        ),
    }
}

#[derive(Debug, Clone)]
pub struct EvalRun {
    pub scores: GroupedScore,
    /// Scored responses in input order.
    pub responses: Vec<ScoredResponse>,
    pub scores_path: PathBuf,
    pub predictions_path: PathBuf,
    pub elapsed: Duration,
}

impl EvalRun {
    pub fn error_count(&self) -> usize {
        self.responses.iter().filter(|r| r.error.is_some()).count()
    }
}

/// Scores batches of responses and writes `<metric>.json` and `predict.json` into the
/// experiment directory.
pub struct Evaluator<E> {
    executor: Arc<E>,
    experiment_dir: PathBuf,
}

impl<E: Executor + 'static> Evaluator<E> {
    pub fn new(executor: E, experiment_dir: impl Into<PathBuf>) -> Self {
        Self::from_shared(Arc::new(executor), experiment_dir)
    }

    pub fn from_shared(executor: Arc<E>, experiment_dir: impl Into<PathBuf>) -> Self {
        Self {
            executor,
            experiment_dir: experiment_dir.into(),
        }
    }

    pub fn experiment_dir(&self) -> &Path {
        &self.experiment_dir
    }

    /// Scores one record under the configured wall-clock timeout.
    ///
    /// Never fails: timeouts, gold failures and worker panics become a zero score with a
    /// sentinel error.
    pub fn score(&self, record: &ResponseRecord, config: &EvalConfig) -> ScoredResponse {
        let executor = Arc::clone(&self.executor);
        let metric = config.metric;
        let iterations = config.iterations;
        let owned = record.clone();
        let outcome = run_with_timeout(config.timeout, move |deadline| {
            score_item(&*executor, metric, &owned, iterations, deadline)
        });
        let item = match outcome {
            Ok(Ok(item)) => item,
            Ok(Err(failure)) => ItemScore::failed(&failure),
            Err(err) => ItemScore::failed(&ScoreFailure::from(err)),
        };
        ScoredResponse::new(record.clone(), metric, item)
    }

    pub fn evaluate(&self, records: Vec<ResponseRecord>, config: &EvalConfig) -> Result<EvalRun> {
        if let Some(field) = config.group_by.as_deref() {
            if let Some(idx) = records.iter().position(|r| r.field(field).is_none()) {
                bail!("group-by key {field:?} is not present in response #{idx}");
            }
        }

        let started = Instant::now();
        info!(
            items = records.len(),
            metric = %config.metric,
            jobs = config.jobs,
            timeout_secs = config.timeout.as_secs_f64(),
            "scoring responses"
        );
        let responses = map_indexed(config.jobs, &records, |idx, record| {
            let scored = self.score(record, config);
            debug!(
                item = idx,
                value = scored.value,
                error = scored.error.as_deref().unwrap_or(""),
                "scored"
            );
            scored
        });

        let scores = aggregate(config.metric, &responses, config.group_by.as_deref());
        let scores_path = self.experiment_dir.join(config.metric.scores_file_name());
        let predictions_path = self.experiment_dir.join(PREDICTIONS_FILE_NAME);
        write_json_pretty(&scores_path, &scores)?;
        write_json_pretty(&predictions_path, &responses)?;

        let run = EvalRun {
            scores,
            responses,
            scores_path,
            predictions_path,
            elapsed: started.elapsed(),
        };
        info!(
            overall = run.scores.overall(),
            errors = run.error_count(),
            elapsed_secs = run.elapsed.as_secs_f64(),
            "evaluation finished"
        );
        Ok(run)
    }
}

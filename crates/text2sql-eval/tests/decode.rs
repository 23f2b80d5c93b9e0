use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use serde_json::{json, Map, Value};
use text2sql_db_core::{DbTarget, Deadline, ExecutionResult, Executor};
use text2sql_db_sqlite::{Connection, OpenMode, SqliteExecutor};
use text2sql_eval::{
    corrective_prompt, decode_with_execution_guidance, generate_and_save, DatasetRecord,
    DecodeOptions, DecodeOutcome, GenerateOptions, GenerationParams, Generator,
};

/// Replays canned completions and records the prompts it was given.
struct Scripted {
    outputs: Mutex<VecDeque<Result<String, String>>>,
    prompts: Mutex<Vec<String>>,
}

impl Scripted {
    fn new<I: IntoIterator<Item = Result<&'static str, &'static str>>>(outputs: I) -> Self {
        Self {
            outputs: Mutex::new(
                outputs
                    .into_iter()
                    .map(|r| r.map(str::to_string).map_err(str::to_string))
                    .collect(),
            ),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl Generator for Scripted {
    fn generate(&self, prompt: &str, _params: &GenerationParams) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        match self.outputs.lock().unwrap().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(msg)) => bail!("{msg}"),
            None => Ok("SELECT 'fallback'".to_string()),
        }
    }
}

/// Rejects any statement mentioning `bad_col` and counts executions.
#[derive(Default)]
struct Validator {
    calls: AtomicUsize,
}

impl Executor for Validator {
    fn execute(&self, sql: &str, _db: &DbTarget, _deadline: Deadline) -> ExecutionResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if sql.contains("bad_col") {
            ExecutionResult::failure("no such column: bad_col", Some(0.0))
        } else {
            ExecutionResult::success(vec![], 0.0)
        }
    }
}

const PROMPT: &str = "Tables: t(id)\nQuestion: list ids\n# SQL:";

fn db() -> DbTarget {
    DbTarget::parse("unused.sqlite")
}

fn options(max_retries: u32) -> DecodeOptions {
    DecodeOptions {
        max_retries,
        postprocess: false,
        ..DecodeOptions::default()
    }
}

#[test]
fn corrective_prompt_is_built_once_and_reused() {
    let generator = Scripted::new([
        Ok("SELECT bad_col FROM t"),
        Ok("SELECT bad_col, id FROM t"),
        Ok("SELECT id FROM t"),
    ]);
    let exec = Validator::default();
    let out = decode_with_execution_guidance(PROMPT, &db(), &generator, &exec, &options(3));

    assert_eq!(
        out,
        DecodeOutcome::Success {
            sql: "SELECT id FROM t".into(),
            attempts: 3
        }
    );
    let prompts = generator.prompts();
    assert_eq!(prompts.len(), 3);
    assert_eq!(prompts[0], PROMPT);
    let expected = corrective_prompt(PROMPT, "SELECT bad_col FROM t", "no such column: bad_col");
    assert_eq!(prompts[1], expected);
    assert_eq!(prompts[2], expected);
    assert_eq!(exec.calls.load(Ordering::SeqCst), 3);
}

#[test]
fn clean_first_attempt_stops_immediately() {
    let generator = Scripted::new([Ok("SELECT id FROM t")]);
    let exec = Validator::default();
    let out = decode_with_execution_guidance(PROMPT, &db(), &generator, &exec, &options(5));
    assert!(out.is_success());
    assert_eq!(out.attempts(), 1);
    assert_eq!(generator.prompts(), vec![PROMPT.to_string()]);
    assert_eq!(exec.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn always_failing_sql_is_returned_after_n_attempts() {
    for n in [1u32, 2, 4] {
        let generator = Scripted::new((0..10).map(|_| Ok("SELECT bad_col FROM t")));
        let exec = Validator::default();
        let out = decode_with_execution_guidance(PROMPT, &db(), &generator, &exec, &options(n));
        assert_eq!(
            out,
            DecodeOutcome::Exhausted {
                sql: "SELECT bad_col FROM t".into(),
                attempts: n
            }
        );
        assert_eq!(generator.prompts().len(), n as usize);
    }
}

#[test]
fn zero_retries_still_makes_one_attempt() {
    let generator = Scripted::new([Ok("SELECT id FROM t")]);
    let out =
        decode_with_execution_guidance(PROMPT, &db(), &generator, &Validator::default(), &options(0));
    assert_eq!(out.attempts(), 1);
    assert!(out.is_success());
}

#[test]
fn backend_errors_use_up_attempts_without_correction() {
    let generator = Scripted::new([Err("backend unavailable"), Ok("SELECT id FROM t")]);
    let exec = Validator::default();
    let out = decode_with_execution_guidance(PROMPT, &db(), &generator, &exec, &options(3));
    assert_eq!(out.attempts(), 2);
    assert_eq!(generator.prompts(), vec![PROMPT.to_string(), PROMPT.to_string()]);
    assert_eq!(exec.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn completions_are_postprocessed_before_execution() {
    let generator = Scripted::new([Ok("Here you go:\n```sql\nSELECT id FROM t\n```")]);
    let opts = DecodeOptions {
        max_retries: 2,
        ..DecodeOptions::default()
    };
    let out = decode_with_execution_guidance(PROMPT, &db(), &generator, &Validator::default(), &opts);
    assert_eq!(out.sql(), "SELECT id FROM t");
}

const RUNAWAY_CTE: &str =
    "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) SELECT count(*) FROM c";

#[test]
fn runaway_queries_are_interrupted_and_count_as_failures() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("runaway.sqlite");
    Connection::open(&path, OpenMode::Create)
        .unwrap()
        .execute_batch("CREATE TABLE t(id INTEGER);")
        .unwrap();
    let target = DbTarget::parse(path.to_str().unwrap());

    let generator = Scripted::new((0..5).map(|_| Ok(RUNAWAY_CTE)));
    let opts = DecodeOptions {
        max_retries: 2,
        execution_timeout: Some(Duration::from_millis(200)),
        postprocess: false,
        ..DecodeOptions::default()
    };
    let started = Instant::now();
    let out = decode_with_execution_guidance(
        PROMPT,
        &target,
        &generator,
        &SqliteExecutor::default(),
        &opts,
    );

    assert_eq!(
        out,
        DecodeOutcome::Exhausted {
            sql: RUNAWAY_CTE.into(),
            attempts: 2
        }
    );
    assert!(started.elapsed() < Duration::from_secs(5));
    let prompts = generator.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[1].contains("## Error Message"));
}

fn dataset(db: &Path) -> Vec<DatasetRecord> {
    let mut extra = Map::new();
    extra.insert("SQL".into(), json!("SELECT id FROM t"));
    extra.insert("difficulty".into(), json!("simple"));
    vec![DatasetRecord {
        prompt: PROMPT.to_string(),
        db_path: db.display().to_string(),
        extra,
    }]
}

#[test]
fn batch_generation_validates_against_sqlite_and_caches() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("gen.sqlite");
    Connection::open(&db, OpenMode::Create)
        .unwrap()
        .execute_batch("CREATE TABLE t(id INTEGER); INSERT INTO t VALUES (1);")
        .unwrap();
    let exp = dir.path().join("exp");
    let exec = SqliteExecutor::default();

    let generator = Scripted::new([Ok("SELECT nope FROM t"), Ok("SELECT id FROM t")]);
    let run = generate_and_save(
        &exp,
        dataset(&db),
        &generator,
        Some(&exec),
        &GenerateOptions::default(),
    )
    .unwrap();
    assert!(!run.from_cache);
    assert_eq!(run.validated, 1);
    assert_eq!(run.records[0].generated, "SELECT id FROM t");

    let saved: Vec<Value> =
        serde_json::from_slice(&std::fs::read(exp.join("predict.json")).unwrap()).unwrap();
    assert_eq!(saved[0]["generated"], "SELECT id FROM t");
    assert_eq!(saved[0]["SQL"], "SELECT id FROM t");
    assert_eq!(saved[0]["difficulty"], "simple");

    let untouched = Scripted::new([]);
    let cached = generate_and_save(
        &exp,
        dataset(&db),
        &untouched,
        Some(&exec),
        &GenerateOptions::default(),
    )
    .unwrap();
    assert!(cached.from_cache);
    assert_eq!(cached.records, run.records);
    assert!(untouched.prompts().is_empty());

    let forced = generate_and_save(
        &exp,
        dataset(&db),
        &Scripted::new([Ok("SELECT 2")]),
        None,
        &GenerateOptions {
            force: true,
            ..GenerateOptions::default()
        },
    )
    .unwrap();
    assert!(!forced.from_cache);
    assert_eq!(forced.records[0].generated, "SELECT 2");
}

#[test]
fn plain_generation_keeps_going_after_backend_errors() {
    let dir = tempfile::tempdir().unwrap();
    let mut data = dataset(Path::new("x.sqlite"));
    data.push(data[0].clone());
    let generator = Scripted::new([Err("rate limited"), Ok("SELECT 1")]);
    let run = generate_and_save(
        dir.path(),
        data,
        &generator,
        None,
        &GenerateOptions::default(),
    )
    .unwrap();
    assert_eq!(run.records[0].generated, "");
    assert_eq!(run.records[1].generated, "SELECT 1");
}

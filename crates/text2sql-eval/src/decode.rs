use std::borrow::Cow;
use std::time::Duration;

use text2sql_contracts::{DEFAULT_MAX_RETRIES, DEFAULT_META_TIMEOUT_SECS, SQL_PROMPT_MARKER};
use text2sql_db_core::{DbTarget, Deadline, Executor};
use tracing::{debug, warn};

use crate::generator::{GenerationParams, Generator};
use crate::postprocess::extract_sql;

#[derive(Debug, Clone, PartialEq)]
pub struct DecodeOptions {
    /// Generation attempts per item. 0 is treated as 1.
    pub max_retries: u32,
    pub params: GenerationParams,
    /// Run [`extract_sql`] over every completion.
    pub postprocess: bool,
    /// Deadline for each validation execution; `None` lets a statement run unbounded.
    pub execution_timeout: Option<Duration>,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            params: GenerationParams::default(),
            postprocess: true,
            execution_timeout: Some(Duration::from_secs(DEFAULT_META_TIMEOUT_SECS)),
        }
    }
}

/// Final state of one decoding session. Both variants carry the last generated SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    Success { sql: String, attempts: u32 },
    Exhausted { sql: String, attempts: u32 },
}

impl DecodeOutcome {
    pub fn sql(&self) -> &str {
        match self {
            DecodeOutcome::Success { sql, .. } | DecodeOutcome::Exhausted { sql, .. } => sql,
        }
    }

    pub fn into_sql(self) -> String {
        match self {
            DecodeOutcome::Success { sql, .. } | DecodeOutcome::Exhausted { sql, .. } => sql,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            DecodeOutcome::Success { attempts, .. } | DecodeOutcome::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DecodeOutcome::Success { .. })
    }
}

#[derive(Debug)]
struct DecodingAttempt {
    index: u32,
    sql: String,
    error: String,
}

/// Builds the self-correction prompt from the instruction part of `original_prompt`.
pub fn corrective_prompt(original_prompt: &str, sql: &str, error: &str) -> String {
    let existing = original_prompt
        .split(SQL_PROMPT_MARKER)
        .next()
        .unwrap_or_default()
        .trim();
    format!(
        "\n{existing}\n\n# Generated SQL: {sql}\n\n## Error Message\n\n{error}\n\n\
         Carefully review the original question and error message, then rewrite the SQL query \
         to address the identified issues. Ensure your corrected query uses correct column names, \
         follows proper SQL syntax, and accurately answers the original question without \
         introducing new errors.\n\n{SQL_PROMPT_MARKER} "
    )
}

/// Generates SQL for `prompt`, validating each attempt by executing it against `db`.
///
/// The first execution error replaces the prompt with a [`corrective_prompt`]; that corrective
/// prompt is then reused unchanged for every later attempt. A backend error uses up an attempt
/// without changing the prompt. When all attempts fail the last generated SQL is returned as
/// [`DecodeOutcome::Exhausted`].
pub fn decode_with_execution_guidance<G, E>(
    prompt: &str,
    db: &DbTarget,
    generator: &G,
    executor: &E,
    options: &DecodeOptions,
) -> DecodeOutcome
where
    G: Generator + ?Sized,
    E: Executor + ?Sized,
{
    let max_attempts = options.max_retries.max(1);
    let mut current: Cow<'_, str> = Cow::Borrowed(prompt);
    let mut corrected = false;
    let mut last_sql = String::new();
    let mut last_failure: Option<DecodingAttempt> = None;

    for index in 0..max_attempts {
        let sql = match generator.generate(&current, &options.params) {
            Ok(text) if options.postprocess => extract_sql(&text),
            Ok(text) => text,
            Err(err) => {
                warn!(attempt = index + 1, error = %format!("{err:#}"), "generation failed");
                last_failure = Some(DecodingAttempt {
                    index,
                    sql: last_sql.clone(),
                    error: format!("generation failed: {err:#}"),
                });
                continue;
            }
        };

        let deadline = options
            .execution_timeout
            .map(Deadline::after)
            .unwrap_or_default();
        let result = executor.execute(&sql, db, deadline);
        let Some(error) = result.error else {
            debug!(attempt = index + 1, "generated SQL executed cleanly");
            return DecodeOutcome::Success {
                sql,
                attempts: index + 1,
            };
        };

        debug!(attempt = index + 1, error = %error, "generated SQL failed to execute");
        if !corrected {
            current = Cow::Owned(corrective_prompt(prompt, &sql, &error));
            corrected = true;
        }
        last_sql = sql.clone();
        last_failure = Some(DecodingAttempt { index, sql, error });
    }

    if let Some(failure) = &last_failure {
        warn!(
            attempts = max_attempts,
            last_attempt = failure.index + 1,
            last_error = %failure.error,
            sql = %failure.sql,
            "execution-guided decoding exhausted its attempts"
        );
    }
    DecodeOutcome::Exhausted {
        sql: last_sql,
        attempts: max_attempts,
    }
}

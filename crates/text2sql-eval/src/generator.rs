use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use text2sql_contracts::{DEFAULT_MAX_NEW_TOKENS, DEFAULT_META_TIMEOUT_SECS};
use text2sql_db_core::Deadline;
use tracing::debug;

use crate::timeout::run_with_timeout;

const MAX_GENERATOR_OUTPUT_BYTES: usize = 8 * 1024 * 1024;
const GENERATOR_POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationParams {
    pub temperature: f64,
    pub max_new_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
        }
    }
}

/// A text generation backend: prompt in, raw completion out.
pub trait Generator: Send + Sync {
    fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String>;
}

impl<G: Generator + ?Sized> Generator for &G {
    fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String> {
        (**self).generate(prompt, params)
    }
}

impl<G: Generator + ?Sized> Generator for Box<G> {
    fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String> {
        (**self).generate(prompt, params)
    }
}

impl<G: Generator + ?Sized> Generator for Arc<G> {
    fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String> {
        (**self).generate(prompt, params)
    }
}

/// Bounds every call of the wrapped backend by a wall-clock timeout.
pub struct TimeoutGenerator<G: ?Sized> {
    inner: Arc<G>,
    timeout: Duration,
}

impl<G: Generator + ?Sized + 'static> TimeoutGenerator<G> {
    pub fn new(inner: Arc<G>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl<G: Generator + ?Sized + 'static> Generator for TimeoutGenerator<G> {
    fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String> {
        let inner = Arc::clone(&self.inner);
        let prompt = prompt.to_string();
        let params = params.clone();
        match run_with_timeout(self.timeout, move |_| inner.generate(&prompt, &params)) {
            Ok(out) => out,
            Err(err) => Err(anyhow::Error::new(err).context("generation backend")),
        }
    }
}

#[derive(Serialize)]
struct CommandRequest<'a> {
    prompt: &'a str,
    temperature: f64,
    max_new_tokens: u32,
}

/// Runs an external program per prompt.
///
/// The program receives `{"prompt", "temperature", "max_new_tokens"}` as JSON on stdin and must
/// print the completion on stdout and exit 0. It is killed when it outlives `timeout`, which
/// defaults to the per-item budget.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandGenerator {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: Duration::from_secs(DEFAULT_META_TIMEOUT_SECS),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Generator for CommandGenerator {
    fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String> {
        let request = serde_json::to_vec(&CommandRequest {
            prompt,
            temperature: params.temperature,
            max_new_tokens: params.max_new_tokens,
        })
        .context("encode generator request")?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawn generator: {}", self.program.display()))?;

        let mut stdin = child.stdin.take().context("take generator stdin")?;
        let stdout = child.stdout.take().context("take generator stdout")?;
        let stderr = child.stderr.take().context("take generator stderr")?;

        // A child that exits without reading stdin is not an error here; its exit status is.
        let stdin_thread = std::thread::spawn(move || {
            let _ = stdin.write_all(&request);
        });
        let stdout_thread =
            std::thread::spawn(move || read_capped(stdout, MAX_GENERATOR_OUTPUT_BYTES));
        let stderr_thread =
            std::thread::spawn(move || read_capped(stderr, MAX_GENERATOR_OUTPUT_BYTES));

        // Grandchildren may still hold the pipes after a kill; the reader threads finish alone.
        let Some(status) = wait_within(&mut child, self.timeout)? else {
            bail!(
                "generator timed out after {:.3}s: {}",
                self.timeout.as_secs_f64(),
                self.program.display()
            );
        };

        let _ = stdin_thread.join();
        let (out, out_truncated) = stdout_thread
            .join()
            .map_err(|_| anyhow::anyhow!("generator stdout reader panicked"))?
            .context("read generator stdout")?;
        let (err, _) = stderr_thread
            .join()
            .map_err(|_| anyhow::anyhow!("generator stderr reader panicked"))?
            .context("read generator stderr")?;

        if !status.success() {
            bail!(
                "generator exited with {status}: {}",
                String::from_utf8_lossy(&err).trim()
            );
        }
        if out_truncated {
            bail!("generator output exceeded {MAX_GENERATOR_OUTPUT_BYTES} bytes");
        }
        let text = String::from_utf8_lossy(&out).trim().to_string();
        debug!(bytes = text.len(), "generator returned");
        Ok(text)
    }
}

/// Polls the generator process until it exits or `budget` elapses; a process still running at
/// the deadline is killed and `None` comes back.
fn wait_within(child: &mut Child, budget: Duration) -> Result<Option<ExitStatus>> {
    let deadline = Deadline::after(budget);
    while !deadline.expired() {
        if let Some(status) = child.try_wait().context("poll generator")? {
            return Ok(Some(status));
        }
        let pause = deadline
            .remaining()
            .map_or(GENERATOR_POLL_INTERVAL, |left| left.min(GENERATOR_POLL_INTERVAL));
        std::thread::sleep(pause);
    }
    if let Some(status) = child.try_wait().context("poll generator")? {
        return Ok(Some(status));
    }
    let _ = child.kill();
    child.wait().context("reap generator after kill")?;
    Ok(None)
}

/// Collects at most `cap` bytes of a generator stream. The rest is drained so the child never
/// blocks on a full pipe; the flag reports whether anything was dropped.
fn read_capped(reader: impl Read, cap: usize) -> std::io::Result<(Vec<u8>, bool)> {
    let mut limited = reader.take(cap as u64 + 1);
    let mut buf = Vec::new();
    limited.read_to_end(&mut buf)?;
    if buf.len() <= cap {
        return Ok((buf, false));
    }
    buf.truncate(cap);
    std::io::copy(&mut limited.into_inner(), &mut std::io::sink())?;
    Ok((buf, true))
}

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::core::Environment;
use crate::error::TaskError;
use crate::namespace::Claim;

/// A single named build step.
///
/// Tasks are defined once when the pipeline is assembled and may be invoked
/// many times afterwards: once for the initial build and again whenever one of
/// their watched files changes.
pub trait Task: Send + Sync {
    /// Unique name, also used on the command line (`kumitate run <name>`).
    fn name(&self) -> &str;

    /// Runs the task once.
    fn run(&self, ctx: &TaskContext<'_>) -> Result<Report, TaskError>;

    /// Globs whose changes should re-trigger this task in watch mode.
    fn watched(&self) -> Vec<String> {
        vec![]
    }

    /// Parts of the output directory this task writes to, relative to its
    /// root.
    fn claims(&self) -> Vec<Claim> {
        vec![]
    }

    /// Whether connected browsers should reload after this task ran.
    fn reloads(&self) -> bool {
        false
    }
}

/// The context passed to every task execution.
pub struct TaskContext<'a> {
    /// Access to global settings.
    pub env: &'a Environment,
    /// Tracing span assigned to this task.
    pub(crate) span: tracing::Span,
}

impl<'a> TaskContext<'a> {
    pub fn new(env: &'a Environment) -> Self {
        Self {
            env,
            span: tracing::Span::current(),
        }
    }

    pub(crate) fn set_message(&self, msg: &str) {
        use tracing_indicatif::span_ext::IndicatifSpanExt;
        self.span.pb_set_message(msg);
    }
}

/// The result of a successful task run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    /// Every file written to the output directory.
    pub outputs: Vec<Utf8PathBuf>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, path: impl Into<Utf8PathBuf>) {
        self.outputs.push(path.into());
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

/// Writes `data` to `path`, creating parent directories first.
pub(crate) fn write_output(path: &Utf8Path, data: impl AsRef<[u8]>) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }

    fs::write(path, data)
}

/// Escapes the literal part of a glob so paths such as temp directories can't
/// be misread as patterns.
pub(crate) fn glob_in(dir: &Utf8Path, pattern: &str) -> String {
    let base = glob::Pattern::escape(dir.as_str());
    format!("{}/{}", base.trim_end_matches('/'), pattern)
}

/// Expands a list of glob patterns into a sorted, de-duplicated file list.
pub(crate) fn expand_globs(patterns: &[String]) -> Result<Vec<Utf8PathBuf>, TaskError> {
    let mut paths = Vec::new();

    for pattern in patterns {
        for path in glob::glob(pattern)? {
            let path = Utf8PathBuf::try_from(path?)?;
            if path.is_file() {
                paths.push(path);
            }
        }
    }

    paths.sort();
    paths.dedup();
    Ok(paths)
}

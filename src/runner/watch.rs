//! Development mode is implemented as a three-part system:
//!
//! 1. **File watcher**: Uses the `notify` crate to monitor the source
//!    directories recursively, with debouncing so one save triggers one run.
//! 2. **WebSocket server**: [`LiveReload`] keeps persistent connections
//!    with open browser tabs.
//! 3. **Client script**: The [`Environment`](crate::Environment) provides a
//!    snippet which the markup task injects into the page. It connects to the
//!    WebSocket server and listens for a `"reload"` message.
//!
//! ## The Loop
//!
//! Changes are coalesced and rebuilds serialized: while a rebuild is running,
//! new events pile up in the channel. Before the next rebuild all pending
//! batches are drained and merged, so each affected task runs at most once per
//! round no matter how many of its files changed.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, channel};
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use glob::{MatchOptions, Pattern};
use notify::{EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{DebounceEventResult, Debouncer, RecommendedCache, new_debouncer};

use super::LiveReload;
#[cfg(feature = "server")]
use super::http::HttpServer;
use crate::config::Config;
use crate::core::Environment;
use crate::error::{KumitateError, WatchError};
use crate::runner::Diagnostics;
use crate::{Pipeline, utils};

const DEBOUNCE: Duration = Duration::from_millis(250);

const MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Watch globs resolved to absolute patterns, each mapped to its task.
#[derive(Debug, Default)]
pub struct Bindings {
    patterns: Vec<(Pattern, String)>,
    roots: Vec<Utf8PathBuf>,
}

impl Bindings {
    /// Resolves the watch bindings of every task in the pipeline.
    ///
    /// Globs which can't be resolved are logged and left out.
    pub fn resolve(pipeline: &Pipeline) -> Self {
        let mut patterns = Vec::new();
        let mut roots = HashSet::new();

        for binding in pipeline.bindings() {
            match resolve_watch_path(&binding.glob) {
                Ok((root, pattern)) => {
                    roots.insert(root);
                    patterns.push((pattern, binding.task));
                }
                Err(e) => {
                    tracing::error!("{}", WatchError::Resolve(binding.glob, e));
                }
            }
        }

        Self {
            patterns,
            // Collapse watched paths to reduce the number of watches
            roots: collapse_watch_paths(roots),
        }
    }

    /// Directories which need to be watched recursively.
    pub fn roots(&self) -> &[Utf8PathBuf] {
        &self.roots
    }

    /// Names of the tasks bound to any of `paths`.
    pub fn tasks_for<P: AsRef<Path>>(&self, paths: &[P]) -> BTreeSet<String> {
        let mut tasks = BTreeSet::new();

        for path in paths {
            for (pattern, task) in &self.patterns {
                if pattern.matches_path_with(path.as_ref(), MATCH) {
                    tasks.insert(task.clone());
                }
            }
        }

        tasks
    }
}

/// The result of one rebuild round.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Rebuild {
    /// Tasks which were run, sorted.
    pub ran: Vec<String>,
    /// Tasks which failed or were skipped, sorted.
    pub failed: Vec<String>,
    /// Whether a reload was broadcast to the browsers.
    pub reload: bool,
}

struct Serving {
    reload: LiveReload,
    events: Receiver<DebounceEventResult>,
    debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
    #[cfg(feature = "server")]
    http: HttpServer,
}

enum State {
    Idle,
    Serving(Box<Serving>),
}

/// A development session: the pipeline together with the dev server and the
/// file watcher.
///
/// A session starts idle. [`Session::start`] runs the whole pipeline once,
/// opens the servers and installs the watcher; [`Session::run`] then keeps
/// rebuilding on changes. Dropping the session or calling [`Session::stop`]
/// releases everything.
pub struct Session {
    pipeline: Pipeline,
    config: Config,
    env: Environment,
    bindings: Bindings,
    state: State,
}

impl Session {
    pub fn new(pipeline: Pipeline, config: Config) -> Self {
        let bindings = Bindings::resolve(&pipeline);

        Self {
            pipeline,
            config,
            env: Environment::watch(None),
            bindings,
            state: State::Idle,
        }
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    pub fn is_serving(&self) -> bool {
        matches!(self.state, State::Serving(_))
    }

    /// The live-reload port, once serving.
    pub fn reload_port(&self) -> Option<u16> {
        match &self.state {
            State::Serving(serving) => Some(serving.reload.port()),
            State::Idle => None,
        }
    }

    /// The HTTP port, once serving.
    #[cfg(feature = "server")]
    pub fn http_port(&self) -> Option<u16> {
        match &self.state {
            State::Serving(serving) => Some(serving.http.port()),
            State::Idle => None,
        }
    }

    /// Runs the initial build and starts serving.
    ///
    /// The session starts serving even if some tasks failed, so the errors
    /// can be fixed while it is running; the initial diagnostics are returned
    /// for inspection.
    pub fn start(&mut self) -> Result<Diagnostics, KumitateError> {
        if self.is_serving() {
            return Err(WatchError::AlreadyServing.into());
        }

        let reload = LiveReload::bind(self.config.server.reload_port).map_err(WatchError::Io)?;
        self.env = Environment::watch(Some(reload.port()));

        tracing::info!("running initial build...");
        let diagnostics = self.pipeline.run(&self.env)?;

        let (tx, events) = channel();
        let mut debouncer = new_debouncer(DEBOUNCE, None, tx).map_err(WatchError::Notify)?;

        for root in self.bindings.roots() {
            tracing::info!("watching {}", root);
            debouncer
                .watch(root, RecursiveMode::Recursive)
                .map_err(WatchError::Notify)?;
        }

        #[cfg(feature = "server")]
        let http = HttpServer::start(self.config.paths.dist.clone(), self.config.server.http_port)
            .map_err(WatchError::Io)?;

        self.state = State::Serving(Box::new(Serving {
            reload,
            events,
            debouncer,
            #[cfg(feature = "server")]
            http,
        }));

        tracing::info!("initial build completed, now watching for changes...");
        Ok(diagnostics)
    }

    /// Rebuilds on file changes until the watcher shuts down.
    pub fn run(&mut self) -> Result<(), KumitateError> {
        loop {
            let State::Serving(serving) = &self.state else {
                return Ok(());
            };

            let paths = drain_changes(&serving.events)?;
            if paths.is_empty() {
                continue;
            }

            if let Err(e) = self.handle_changes(&paths) {
                tracing::error!("error while rebuilding: {e}");
            }
        }
    }

    /// Re-runs the tasks bound to `paths`, each at most once, and tells the
    /// browsers to reload if one of them changed what they display.
    pub fn handle_changes<P: AsRef<Path>>(&self, paths: &[P]) -> Result<Rebuild, KumitateError> {
        let tasks: Vec<_> = self.bindings.tasks_for(paths).into_iter().collect();
        if tasks.is_empty() {
            return Ok(Rebuild::default());
        }

        tracing::info!(tasks = ?tasks, "change detected, re-running tasks...");
        let start = Instant::now();
        let diagnostics = self.pipeline.run_tasks(&tasks, &self.env)?;

        let reload = diagnostics.succeeded().into_iter().any(|name| {
            self.pipeline
                .find(name)
                .is_some_and(|index| self.pipeline.graph[index].reloads())
        });

        if reload && let State::Serving(serving) = &self.state {
            serving.reload.broadcast();
        }

        let mut failed: Vec<String> = diagnostics
            .failed()
            .into_iter()
            .chain(diagnostics.skipped())
            .map(String::from)
            .collect();
        failed.sort();

        tracing::info!("rebuild finished {}", utils::as_overhead(start));

        Ok(Rebuild {
            ran: tasks,
            failed,
            reload,
        })
    }

    /// Stops the watcher and both servers and returns to idle.
    pub fn stop(&mut self) {
        if let State::Serving(serving) = std::mem::replace(&mut self.state, State::Idle) {
            let serving = *serving;

            drop(serving.debouncer);
            drop(serving.events);
            serving.reload.stop();
            #[cfg(feature = "server")]
            drop(serving.http);

            self.env = Environment::watch(None);
            tracing::info!("session stopped");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Blocks for the next batch of events, then merges it with every batch which
/// is already pending. Returns the changed paths, each once.
fn drain_changes(events: &Receiver<DebounceEventResult>) -> Result<Vec<PathBuf>, WatchError> {
    let mut batches = vec![events.recv().map_err(WatchError::Recv)?];
    while let Ok(batch) = events.try_recv() {
        batches.push(batch);
    }

    let mut paths = BTreeSet::new();
    for batch in batches {
        match batch {
            Ok(events) => {
                for de in events {
                    if matches!(
                        de.event.kind,
                        EventKind::Create(..) | EventKind::Modify(..) | EventKind::Remove(..)
                    ) {
                        paths.extend(de.event.paths.iter().cloned());
                    }
                }
            }
            Err(errors) => {
                for e in errors {
                    tracing::error!("watch error: {e}");
                }
            }
        }
    }

    Ok(paths.into_iter().collect())
}

/// Splits a glob string into a canonicalized static root path (for
/// watching) and a compiled absolute Pattern (for matching).
///
/// A root which doesn't exist yet is replaced by its closest existing
/// ancestor, so directories created later are still picked up.
pub fn resolve_watch_path(glob_str: impl AsRef<str>) -> anyhow::Result<(Utf8PathBuf, Pattern)> {
    let path = Utf8Path::new(glob_str.as_ref());

    // Split path into static root and dynamic suffix (containing wildcards)
    let components: Vec<_> = path.components().collect();
    let split_idx = components
        .iter()
        .position(|c| c.as_str().contains(['*', '?', '[']))
        .unwrap_or(components.len());

    let root_part: Utf8PathBuf = components.iter().take(split_idx).collect();
    let suffix_part: Utf8PathBuf = components.iter().skip(split_idx).collect();

    let mut existing = match root_part.as_str() {
        "" => Utf8Path::new("."),
        _ => root_part.as_path(),
    };
    let mut missing = Vec::new();
    while !existing.exists() {
        let name = existing
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("no part of '{root_part}' exists"))?;
        missing.push(name);
        existing = existing.parent().unwrap_or(Utf8Path::new("."));
        if existing.as_str().is_empty() {
            existing = Utf8Path::new(".");
        }
    }

    let mut absolute_root = existing.canonicalize_utf8()?;
    let watch_root = absolute_root.clone();
    for name in missing.iter().rev() {
        absolute_root.push(name);
    }

    // A concrete file is matched as is, its parent is watched so atomic
    // writes are caught.
    let (watch_root, match_pattern) =
        if suffix_part.as_str().is_empty() && absolute_root.is_file() {
            let parent = absolute_root
                .parent()
                .unwrap_or(&absolute_root)
                .to_path_buf();
            (parent, Pattern::escape(absolute_root.as_str()))
        } else {
            let escaped = Pattern::escape(absolute_root.as_str());
            let pattern = match suffix_part.as_str() {
                "" => escaped,
                suffix => format!("{}/{}", escaped.trim_end_matches('/'), suffix),
            };
            (watch_root, pattern)
        };

    let pattern = Pattern::new(&match_pattern)?;

    Ok((watch_root, pattern))
}

/// Reduces a set of paths to the minimal set of watch roots.
///
/// If we watch `/a` and `/a/b`, we only need to watch `/a` because
/// the watcher is recursive.
fn collapse_watch_paths(paths: HashSet<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    let mut paths: Vec<_> = paths.into_iter().collect();
    paths.sort();

    let mut filtered = Vec::new();
    for path in paths {
        if let Some(last) = filtered.last()
            && path.starts_with(last)
        {
            continue;
        }
        filtered.push(path);
    }

    filtered
}

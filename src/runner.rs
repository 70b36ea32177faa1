mod diagnostics;
#[cfg(feature = "server")]
mod http;
#[cfg(feature = "live")]
mod reload;
#[cfg(feature = "live")]
mod watch;

use std::collections::{HashMap, HashSet};
use std::sync::mpsc::channel;
use std::time::{Duration, Instant};

use indicatif::ProgressStyle;
use petgraph::Direction;
use petgraph::graph::NodeIndex;
use tracing::{Level, Span};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::core::Environment;
use crate::error::TaskError;
use crate::task::{Report, TaskContext};
use crate::Pipeline;

pub use diagnostics::{Diagnostics, Outcome, TaskExecution};

#[cfg(feature = "live")]
pub use reload::LiveReload;
#[cfg(feature = "live")]
pub use watch::{Bindings, Rebuild, Session};

type Finished = (NodeIndex, Result<Report, TaskError>, Instant, Duration);

/// Executes the selected part of the task graph on a rayon thread pool.
///
/// Tasks are started as soon as all of their predecessors which are also
/// selected have completed:
/// 1. The number of selected predecessors is counted for each selected task.
/// 2. Tasks with no pending predecessors are spawned.
/// 3. The calling thread waits for results. When a task succeeds, the pending
///    count of each dependent is decremented and the ones reaching zero are
///    spawned.
/// 4. When a task fails, every selected task downstream of it is marked as
///    skipped instead.
/// 5. The loop ends once every selected task either completed or was skipped.
///
/// The waiting happens on the calling thread, outside of the pool, so every
/// worker stays free for tasks. `pool` defaults to the global one.
///
/// Task failures are reported through [`crate::report`] and recorded in the
/// returned diagnostics; they don't make this function fail.
pub(crate) fn run_tasks_parallel(
    pipeline: &Pipeline,
    env: &Environment,
    nodes_to_run: &HashSet<NodeIndex>,
    pool: Option<&rayon::ThreadPool>,
) -> anyhow::Result<Diagnostics> {
    if nodes_to_run.is_empty() {
        return Ok(Diagnostics::default());
    }

    let root_span = tracing::span!(Level::INFO, "building_tasks");
    root_span.pb_set_length(nodes_to_run.len() as u64);
    root_span.pb_set_style(&get_style_bar()?);
    root_span.pb_set_message("Running tasks...");
    let _enter = root_span.enter();

    let pb_style = get_style_task()?;

    let executions = match pool {
        Some(pool) => pool.in_place_scope(|s| {
            schedule(s, pipeline, env, nodes_to_run, &pb_style, &root_span)
        }),
        None => rayon::in_place_scope(|s| {
            schedule(s, pipeline, env, nodes_to_run, &pb_style, &root_span)
        }),
    }?;

    let diagnostics = Diagnostics { executions };

    if diagnostics.is_success() {
        tracing::info!("Build complete!");
    } else {
        tracing::error!(failed = ?diagnostics.failed(), "Build finished with errors");
    }

    Ok(diagnostics)
}

fn schedule<'scope>(
    s: &rayon::Scope<'scope>,
    pipeline: &Pipeline,
    env: &'scope Environment,
    nodes_to_run: &HashSet<NodeIndex>,
    pb_style: &ProgressStyle,
    root_span: &Span,
) -> anyhow::Result<HashMap<NodeIndex, TaskExecution>> {
    let graph = &pipeline.graph;

    let mut dependency_counts: HashMap<NodeIndex, usize> = nodes_to_run
        .iter()
        .map(|&i| {
            (
                i,
                graph
                    .neighbors_directed(i, Direction::Incoming)
                    .filter(|dep| nodes_to_run.contains(dep))
                    .count(),
            )
        })
        .collect();

    let total_tasks = nodes_to_run.len();
    let mut completed_tasks = 0;
    let mut executions = HashMap::new();

    let (result_sender, result_receiver) = channel::<Finished>();

    let spawn_task = |index: NodeIndex| {
        let task = graph[index].clone();
        let sender = result_sender.clone();
        let pb_style = pb_style.clone();

        s.spawn(move |_| {
            let span = tracing::span!(Level::INFO, "task", name = task.name());
            span.pb_set_style(&pb_style);
            span.pb_set_message(&format!("Running {}", task.name()));
            let _enter = span.enter();

            let context = TaskContext {
                env,
                span: span.clone(),
            };

            let start_time = Instant::now();

            // Tasks only share immutable state, a panicking task can't
            // leave anything half-updated for the others.
            let output = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                task.run(&context)
            })) {
                Ok(result) => result,
                Err(panic) => {
                    let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                        s.to_string()
                    } else if let Some(s) = panic.downcast_ref::<String>() {
                        s.clone()
                    } else {
                        String::from("unknown payload")
                    };

                    Err(TaskError::Panic(msg))
                }
            };

            let elapsed = start_time.elapsed();

            // The receiver outlives the scope, sending can't fail.
            let _ = sender.send((index, output, start_time, elapsed));
        });
    };

    for &index in nodes_to_run {
        if dependency_counts.get(&index).copied().unwrap_or(0) == 0 {
            spawn_task(index);
        }
    }

    while completed_tasks < total_tasks {
        let (index, output, start, duration) = result_receiver.recv()?;
        let name = graph[index].name().to_string();

        completed_tasks += 1;
        root_span.pb_inc(1);

        let outcome = match output {
            Ok(report) => {
                tracing::info!(
                    task = %name,
                    outputs = report.outputs.len(),
                    "finished in {}",
                    crate::utils::as_overhead(start)
                );

                for dependent in graph.neighbors_directed(index, Direction::Outgoing) {
                    if let Some(count) = dependency_counts.get_mut(&dependent) {
                        *count -= 1;
                        if *count == 0 {
                            spawn_task(dependent);
                        }
                    }
                }

                Outcome::Done(report)
            }
            Err(error) => {
                crate::report::task_failed(&name, &error);

                // Walk only through selected tasks: anything reached this
                // way still waits on the failed task and was never spawned.
                let mut stack = vec![index];
                while let Some(node) = stack.pop() {
                    for dependent in graph.neighbors_directed(node, Direction::Outgoing) {
                        if !matches!(dependency_counts.get(&dependent), Some(&n) if n > 0) {
                            continue;
                        }

                        dependency_counts.remove(&dependent);
                        stack.push(dependent);

                        tracing::warn!(task = graph[dependent].name(), "skipped, '{name}' failed");

                        executions.insert(
                            dependent,
                            TaskExecution {
                                name: graph[dependent].name().to_string(),
                                start,
                                duration: Duration::ZERO,
                                outcome: Outcome::Skipped,
                            },
                        );
                        completed_tasks += 1;
                        root_span.pb_inc(1);
                    }
                }

                Outcome::Failed(error)
            }
        };

        executions.insert(
            index,
            TaskExecution {
                name,
                start,
                duration,
                outcome,
            },
        );
    }

    Ok(executions)
}

fn get_style_bar() -> Result<ProgressStyle, indicatif::style::TemplateError> {
    Ok(ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")?
        .progress_chars("=>-"))
}

fn get_style_task() -> Result<ProgressStyle, indicatif::style::TemplateError> {
    ProgressStyle::default_spinner().template("{spinner:.green} {msg}")
}

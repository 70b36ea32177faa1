use std::collections::HashMap;
use std::time::{Duration, Instant};

use petgraph::graph::NodeIndex;

use crate::error::TaskError;
use crate::task::Report;

/// How a single task run ended.
#[derive(Debug)]
pub enum Outcome {
    Done(Report),
    Failed(TaskError),
    /// Not started because a task it depends on failed.
    Skipped,
}

#[derive(Debug)]
pub struct TaskExecution {
    pub name: String,
    pub start: Instant,
    pub duration: Duration,
    pub outcome: Outcome,
}

/// Results and timings of one pipeline run.
#[derive(Debug, Default)]
pub struct Diagnostics {
    /// A map of task node indices to their execution metrics.
    pub executions: HashMap<NodeIndex, TaskExecution>,
}

impl Diagnostics {
    pub fn is_success(&self) -> bool {
        self.executions
            .values()
            .all(|exec| matches!(exec.outcome, Outcome::Done(_)))
    }

    /// Names of the tasks that failed, sorted.
    pub fn failed(&self) -> Vec<&str> {
        self.names(|outcome| matches!(outcome, Outcome::Failed(_)))
    }

    /// Names of the tasks that were skipped, sorted.
    pub fn skipped(&self) -> Vec<&str> {
        self.names(|outcome| matches!(outcome, Outcome::Skipped))
    }

    /// Names of the tasks that completed, sorted.
    pub fn succeeded(&self) -> Vec<&str> {
        self.names(|outcome| matches!(outcome, Outcome::Done(_)))
    }

    fn names(&self, filter: impl Fn(&Outcome) -> bool) -> Vec<&str> {
        let mut names: Vec<_> = self
            .executions
            .values()
            .filter(|exec| filter(&exec.outcome))
            .map(|exec| exec.name.as_str())
            .collect();
        names.sort();
        names
    }
}

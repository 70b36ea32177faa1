use std::collections::HashSet;
use std::sync::Arc;

use petgraph::Graph;
use petgraph::graph::NodeIndex;

use crate::core::Environment;
use crate::error::KumitateError;
use crate::namespace;
use crate::runner::{Diagnostics, run_tasks_parallel};
use crate::task::Task;

/// A series/parallel composition of tasks.
///
/// Steps in a [`Step::Series`] run strictly in order, each waiting for the
/// previous one to finish. Steps in a [`Step::Parallel`] group start together
/// and the group completes when all of them have completed.
pub enum Step {
    Task(Arc<dyn Task>),
    Series(Vec<Step>),
    Parallel(Vec<Step>),
}

impl Step {
    pub fn task(task: impl Task + 'static) -> Self {
        Step::Task(Arc::new(task))
    }
}

pub fn series(steps: impl IntoIterator<Item = Step>) -> Step {
    Step::Series(steps.into_iter().collect())
}

pub fn parallel(steps: impl IntoIterator<Item = Step>) -> Step {
    Step::Parallel(steps.into_iter().collect())
}

/// Maps a file glob to the task it re-triggers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchBinding {
    pub glob: String,
    pub task: String,
}

/// An assembled, validated task graph.
///
/// Series composition is flattened into graph edges: every task finishing a
/// step points at every task starting the next one. The resulting graph is
/// executed by a scheduler which starts a task as soon as all its
/// predecessors have completed.
pub struct Pipeline {
    pub(crate) graph: Graph<Arc<dyn Task>, ()>,
}

impl Pipeline {
    /// Assembles `step` into a graph and validates it.
    ///
    /// Task names must be unique and the output claims of different tasks
    /// must not overlap.
    pub fn new(step: Step) -> Result<Self, KumitateError> {
        let mut graph = Graph::new();
        add_step(&mut graph, step);

        if let Err(cycle) = petgraph::algo::toposort(&graph, None) {
            return Err(KumitateError::Cycle(graph[cycle.node_id()].name().to_string()));
        }

        let mut names = HashSet::new();
        for task in graph.node_weights() {
            if !names.insert(task.name()) {
                return Err(KumitateError::DuplicateTask(task.name().to_string()));
            }
        }

        namespace::validate(graph.node_weights().flat_map(|task| {
            task.claims()
                .into_iter()
                .map(move |claim| (task.name(), claim))
        }))?;

        Ok(Self { graph })
    }

    /// All tasks, in insertion order.
    pub fn tasks(&self) -> impl Iterator<Item = &dyn Task> {
        self.graph.node_weights().map(|task| task.as_ref())
    }

    pub(crate) fn find(&self, name: &str) -> Option<NodeIndex> {
        self.graph
            .node_indices()
            .find(|&index| self.graph[index].name() == name)
    }

    /// The table of watch bindings declared by the tasks.
    pub fn bindings(&self) -> Vec<WatchBinding> {
        self.tasks()
            .flat_map(|task| {
                task.watched().into_iter().map(|glob| WatchBinding {
                    glob,
                    task: task.name().to_string(),
                })
            })
            .collect()
    }

    /// Runs every task of the pipeline once.
    pub fn run(&self, env: &Environment) -> Result<Diagnostics, KumitateError> {
        let all = self.graph.node_indices().collect();
        Ok(run_tasks_parallel(self, env, &all, None)?)
    }

    /// Runs only the named tasks, keeping the pipeline's ordering between them.
    pub fn run_tasks<S: AsRef<str>>(
        &self,
        names: &[S],
        env: &Environment,
    ) -> Result<Diagnostics, KumitateError> {
        let mut nodes = HashSet::new();
        for name in names {
            let name = name.as_ref();
            let index = self
                .find(name)
                .ok_or_else(|| KumitateError::UnknownTask(name.to_string()))?;
            nodes.insert(index);
        }

        Ok(run_tasks_parallel(self, env, &nodes, None)?)
    }
}

/// Adds `step` to the graph, returning the nodes it starts and ends with.
fn add_step(
    graph: &mut Graph<Arc<dyn Task>, ()>,
    step: Step,
) -> (Vec<NodeIndex>, Vec<NodeIndex>) {
    match step {
        Step::Task(task) => {
            let index = graph.add_node(task);
            (vec![index], vec![index])
        }
        Step::Parallel(steps) => {
            let mut heads = Vec::new();
            let mut tails = Vec::new();

            for step in steps {
                let (h, t) = add_step(graph, step);
                heads.extend(h);
                tails.extend(t);
            }

            (heads, tails)
        }
        Step::Series(steps) => {
            let mut heads: Vec<NodeIndex> = Vec::new();
            let mut tails: Vec<NodeIndex> = Vec::new();

            for step in steps {
                let (h, t) = add_step(graph, step);

                // empty groups don't break the chain
                if h.is_empty() {
                    continue;
                }

                for &from in &tails {
                    for &to in &h {
                        graph.add_edge(from, to, ());
                    }
                }

                if heads.is_empty() {
                    heads = h;
                }
                tails = t;
            }

            (heads, tails)
        }
    }
}

impl std::fmt::Display for Pipeline {
    /// Renders the graph as a Mermaid diagram.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        for index in self.graph.node_indices() {
            let task = &self.graph[index];
            let name = task.name().replace('"', "\\\""); // Simple escape
            writeln!(f, "    {:?}[\"{}\"]", index.index(), name)?;
        }

        for edge in self.graph.raw_edges() {
            writeln!(
                f,
                "    {:?} --> {:?}",
                edge.source().index(),
                edge.target().index()
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::namespace::Claim;
    use crate::task::{Report, TaskContext};
    use crate::error::TaskError;

    pub(crate) struct Named(pub &'static str, pub Vec<Claim>);

    impl Task for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn run(&self, _: &TaskContext<'_>) -> Result<Report, TaskError> {
            Ok(Report::new())
        }

        fn claims(&self) -> Vec<Claim> {
            self.1.clone()
        }

        fn watched(&self) -> Vec<String> {
            vec![format!("src/{}/**", self.0)]
        }
    }

    fn named(name: &'static str) -> Step {
        Step::task(Named(name, vec![]))
    }

    fn edges(pipeline: &Pipeline) -> Vec<(String, String)> {
        let mut edges: Vec<_> = pipeline
            .graph
            .raw_edges()
            .iter()
            .map(|e| {
                (
                    pipeline.graph[e.source()].name().to_string(),
                    pipeline.graph[e.target()].name().to_string(),
                )
            })
            .collect();
        edges.sort();
        edges
    }

    #[test]
    fn test_series_of_parallel() {
        let pipeline = Pipeline::new(series([
            named("clean"),
            parallel([named("a"), named("b")]),
            named("styles"),
        ]))
        .unwrap();

        let pair = |a: &str, b: &str| (a.to_string(), b.to_string());
        assert_eq!(
            edges(&pipeline),
            vec![
                pair("a", "styles"),
                pair("b", "styles"),
                pair("clean", "a"),
                pair("clean", "b"),
            ]
        );
    }

    #[test]
    fn test_empty_groups_are_transparent() {
        let pipeline =
            Pipeline::new(series([named("clean"), parallel([]), named("styles")])).unwrap();

        assert_eq!(
            edges(&pipeline),
            vec![("clean".to_string(), "styles".to_string())]
        );
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = Pipeline::new(parallel([named("a"), named("a")]));
        assert!(matches!(result, Err(KumitateError::DuplicateTask(name)) if name == "a"));
    }

    #[test]
    fn test_overlapping_claims_rejected() {
        let result = Pipeline::new(parallel([
            Step::task(Named("html", vec![Claim::File("index.html".into())])),
            Step::task(Named("resources", vec![Claim::File("index.html".into())])),
        ]));

        assert!(matches!(result, Err(KumitateError::Claim(_))));
    }

    #[test]
    fn test_bindings_and_unknown_task() {
        let pipeline = Pipeline::new(parallel([named("a"), named("b")])).unwrap();

        assert_eq!(
            pipeline.bindings(),
            vec![
                WatchBinding {
                    glob: "src/a/**".into(),
                    task: "a".into()
                },
                WatchBinding {
                    glob: "src/b/**".into(),
                    task: "b".into()
                },
            ]
        );

        let env = Environment::build();
        assert!(matches!(
            pipeline.run_tasks(&["nope"], &env),
            Err(KumitateError::UnknownTask(_))
        ));
    }

    #[test]
    fn test_mermaid() {
        let pipeline = Pipeline::new(series([named("clean"), named("styles")])).unwrap();
        let text = pipeline.to_string();

        assert!(text.starts_with("graph LR\n"));
        assert!(text.contains("0[\"clean\"]"));
        assert!(text.contains("0 --> 1"));
    }
}

//! Execution of compiled graphs.
//!
//! A [`CompiledGraph`] advances one node at a time from its entry point:
//!
//! 1. If the next node is declared as an interrupt point, stop and return
//!    [`RunOutcome::Suspended`] with a [`Checkpoint`].
//! 2. If the run's cancellation token fired, stop with [`RunError::Cancelled`].
//! 3. If the node-visit budget is spent, stop with
//!    [`RunError::RecursionLimitExceeded`].
//! 4. Run the node on a snapshot, merge its delta, then follow the node's edge.
//!
//! A conditional edge whose router returns [`RouteDecision::Parallel`] runs
//! every selected node concurrently on the same snapshot, checks their deltas
//! for conflicting single-writer fields, merges them in branch declaration
//! order and continues at the fan-out's join.
//!
//! Every error carries the state as it was when the run stopped.

use crate::proposalgraph::checkpoint::Checkpoint;
use crate::proposalgraph::config::RunConfig;
use crate::proposalgraph::event::{EventHandler, GraphEvent};
use crate::proposalgraph::graph::{Edge, FanOut, Node, Target};
use crate::proposalgraph::router::RouteDecision;
use crate::proposalgraph::state::{GraphState, MergeError};
use futures_util::future::try_join_all;
use std::collections::{BTreeSet, HashMap};
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// How a run ended without error.
#[derive(Debug, Clone)]
pub enum RunOutcome<S> {
    Completed {
        state: S,
        /// Executed node names in order.
        trace: Vec<String>,
    },
    /// Paused before `checkpoint.pending_node`.
    Suspended {
        state: S,
        checkpoint: Checkpoint,
        trace: Vec<String>,
    },
}

impl<S> RunOutcome<S> {
    pub fn state(&self) -> &S {
        match self {
            RunOutcome::Completed { state, .. } | RunOutcome::Suspended { state, .. } => state,
        }
    }

    pub fn into_state(self) -> S {
        match self {
            RunOutcome::Completed { state, .. } | RunOutcome::Suspended { state, .. } => state,
        }
    }

    pub fn trace(&self) -> &[String] {
        match self {
            RunOutcome::Completed { trace, .. } | RunOutcome::Suspended { trace, .. } => trace,
        }
    }

    pub fn checkpoint(&self) -> Option<&Checkpoint> {
        match self {
            RunOutcome::Suspended { checkpoint, .. } => Some(checkpoint),
            RunOutcome::Completed { .. } => None,
        }
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, RunOutcome::Suspended { .. })
    }
}

/// Why a run stopped early.
#[derive(Debug)]
pub enum RunError<S> {
    /// A node (or its collaborator) returned an error.
    NodeFailed {
        node: String,
        source: Box<dyn Error + Send + Sync>,
        state: S,
        trace: Vec<String>,
    },
    /// More node visits were needed than the run allows. Indicates a routing
    /// cycle with no reachable exit or a budget set too low.
    RecursionLimitExceeded {
        limit: usize,
        next: String,
        state: S,
        trace: Vec<String>,
    },
    Cancelled {
        next: String,
        state: S,
        trace: Vec<String>,
    },
    MergeConflict {
        node: String,
        source: MergeError,
        state: S,
        trace: Vec<String>,
    },
    /// A router produced an outcome the edge cannot map.
    UnresolvableRoute {
        from: String,
        reason: String,
        state: S,
        trace: Vec<String>,
    },
    /// Resume was attempted with a state or checkpoint this graph did not produce.
    CheckpointMismatch { reason: String, state: S },
}

impl<S> RunError<S> {
    /// State at the point of interruption.
    pub fn state(&self) -> &S {
        match self {
            RunError::NodeFailed { state, .. }
            | RunError::RecursionLimitExceeded { state, .. }
            | RunError::Cancelled { state, .. }
            | RunError::MergeConflict { state, .. }
            | RunError::UnresolvableRoute { state, .. }
            | RunError::CheckpointMismatch { state, .. } => state,
        }
    }

    pub fn into_state(self) -> S {
        match self {
            RunError::NodeFailed { state, .. }
            | RunError::RecursionLimitExceeded { state, .. }
            | RunError::Cancelled { state, .. }
            | RunError::MergeConflict { state, .. }
            | RunError::UnresolvableRoute { state, .. }
            | RunError::CheckpointMismatch { state, .. } => state,
        }
    }

    pub fn trace(&self) -> &[String] {
        match self {
            RunError::NodeFailed { trace, .. }
            | RunError::RecursionLimitExceeded { trace, .. }
            | RunError::Cancelled { trace, .. }
            | RunError::MergeConflict { trace, .. }
            | RunError::UnresolvableRoute { trace, .. } => trace.as_slice(),
            RunError::CheckpointMismatch { .. } => &[],
        }
    }
}

impl<S> fmt::Display for RunError<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunError::NodeFailed { node, source, .. } => {
                write!(f, "Node '{}' failed: {}", node, source)
            }
            RunError::RecursionLimitExceeded { limit, next, .. } => write!(
                f,
                "Recursion limit of {} node visits exceeded before '{}'",
                limit, next
            ),
            RunError::Cancelled { next, .. } => write!(f, "Run cancelled before '{}'", next),
            RunError::MergeConflict { node, source, .. } => {
                write!(f, "Could not merge result of '{}': {}", node, source)
            }
            RunError::UnresolvableRoute { from, reason, .. } => {
                write!(f, "Cannot route out of '{}': {}", from, reason)
            }
            RunError::CheckpointMismatch { reason, .. } => {
                write!(f, "Checkpoint mismatch: {}", reason)
            }
        }
    }
}

impl<S: fmt::Debug> Error for RunError<S> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RunError::NodeFailed { source, .. } => Some(source.as_ref()),
            RunError::MergeConflict { source, .. } => Some(source),
            _ => None,
        }
    }
}

enum Step {
    Exit,
    Node(String),
    Parallel { branches: Vec<String>, join: Target },
}

struct Cursor<S> {
    state: S,
    trace: Vec<String>,
    steps: usize,
    run_id: String,
}

/// An executable graph produced by [`StateGraph::compile`](crate::graph::StateGraph::compile).
pub struct CompiledGraph<S: GraphState> {
    name: String,
    nodes: HashMap<String, Arc<dyn Node<S>>>,
    order: Vec<String>,
    edges: HashMap<String, Edge<S>>,
    fan_outs: HashMap<String, FanOut>,
    entry: String,
    interrupts: BTreeSet<String>,
    run_config: RunConfig,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl<S: GraphState> CompiledGraph<S> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        name: String,
        nodes: HashMap<String, Arc<dyn Node<S>>>,
        order: Vec<String>,
        edges: HashMap<String, Edge<S>>,
        fan_outs: HashMap<String, FanOut>,
        entry: String,
        interrupts: BTreeSet<String>,
        run_config: RunConfig,
    ) -> Self {
        Self {
            name,
            nodes,
            order,
            edges,
            fan_outs,
            entry,
            interrupts,
            run_config,
            event_handler: None,
        }
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    pub fn set_event_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.event_handler = Some(handler);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry_point(&self) -> &str {
        &self.entry
    }

    /// Node names in registration order.
    pub fn node_names(&self) -> &[String] {
        &self.order
    }

    pub fn interrupt_points(&self) -> impl Iterator<Item = &str> {
        self.interrupts.iter().map(String::as_str)
    }

    /// Static target of `from`, or the mapped targets of its conditional edge.
    pub fn successors(&self, from: &str) -> Vec<Target> {
        match self.edges.get(from) {
            Some(Edge::Static(target)) => vec![target.clone()],
            Some(Edge::Conditional { mapping, .. }) => {
                let unique: BTreeSet<Target> = mapping.values().cloned().collect();
                unique.into_iter().collect()
            }
            None => Vec::new(),
        }
    }

    /// Outcome label → target for a conditional edge.
    pub fn route_table(&self, from: &str) -> Option<Vec<(String, Target)>> {
        match self.edges.get(from) {
            Some(Edge::Conditional { mapping, .. }) => Some(
                mapping
                    .iter()
                    .map(|(label, target)| (label.clone(), target.clone()))
                    .collect(),
            ),
            _ => None,
        }
    }

    pub fn default_run_config(&self) -> RunConfig {
        self.run_config
    }

    /// Run from the entry point with the graph's default configuration.
    pub async fn invoke(&self, state: S) -> Result<RunOutcome<S>, RunError<S>> {
        self.invoke_with(state, &self.run_config, None).await
    }

    pub async fn invoke_with(
        &self,
        state: S,
        config: &RunConfig,
        cancel: Option<&CancellationToken>,
    ) -> Result<RunOutcome<S>, RunError<S>> {
        let run_id = Uuid::new_v4().to_string();
        log::info!(
            "graph '{}' run {} starting at '{}'",
            self.name,
            run_id,
            self.entry
        );
        self.emit(GraphEvent::RunStarted {
            graph: self.name.clone(),
            run_id: run_id.clone(),
            entry: self.entry.clone(),
        })
        .await;

        let cursor = Cursor {
            state,
            trace: Vec::new(),
            steps: 0,
            run_id,
        };
        self.execute(cursor, self.entry.clone(), false, config, cancel)
            .await
    }

    /// Continue a suspended run.
    ///
    /// `state` must be exactly the state returned with `checkpoint`. `input`
    /// is merged first, then execution continues at the pending node, which
    /// runs even though it is an interrupt point.
    pub async fn resume(
        &self,
        state: S,
        checkpoint: &Checkpoint,
        input: S::Delta,
    ) -> Result<RunOutcome<S>, RunError<S>> {
        self.resume_with(state, checkpoint, input, &self.run_config, None)
            .await
    }

    pub async fn resume_with(
        &self,
        mut state: S,
        checkpoint: &Checkpoint,
        input: S::Delta,
        config: &RunConfig,
        cancel: Option<&CancellationToken>,
    ) -> Result<RunOutcome<S>, RunError<S>> {
        if checkpoint.graph != self.name {
            return Err(RunError::CheckpointMismatch {
                reason: format!(
                    "checkpoint belongs to graph '{}', not '{}'",
                    checkpoint.graph, self.name
                ),
                state,
            });
        }
        if !self.nodes.contains_key(&checkpoint.pending_node) {
            return Err(RunError::CheckpointMismatch {
                reason: format!("unknown pending node '{}'", checkpoint.pending_node),
                state,
            });
        }
        if !checkpoint.matches(&state) {
            return Err(RunError::CheckpointMismatch {
                reason: "state differs from the suspended state".to_string(),
                state,
            });
        }

        if let Err(e) = state.merge(input) {
            return Err(RunError::MergeConflict {
                node: checkpoint.pending_node.clone(),
                source: e,
                state,
                trace: Vec::new(),
            });
        }

        log::info!(
            "graph '{}' run {} resuming at '{}'",
            self.name,
            checkpoint.run_id,
            checkpoint.pending_node
        );
        self.emit(GraphEvent::Resumed {
            graph: self.name.clone(),
            run_id: checkpoint.run_id.clone(),
            at: checkpoint.pending_node.clone(),
        })
        .await;

        let cursor = Cursor {
            state,
            trace: Vec::new(),
            steps: 0,
            run_id: checkpoint.run_id.clone(),
        };
        self.execute(cursor, checkpoint.pending_node.clone(), true, config, cancel)
            .await
    }

    async fn execute(
        &self,
        mut cursor: Cursor<S>,
        start: String,
        resuming: bool,
        config: &RunConfig,
        cancel: Option<&CancellationToken>,
    ) -> Result<RunOutcome<S>, RunError<S>> {
        let mut current = start;
        let mut skip_interrupt = resuming;

        loop {
            if self.interrupts.contains(&current) && !skip_interrupt {
                return self.suspend(cursor, current).await;
            }
            skip_interrupt = false;

            self.guard(&cursor, &current, 1, config, cancel).await?;
            cursor = self.run_node(cursor, &current).await?;

            let step = match self.resolve(&current, &cursor.state).await {
                Ok(step) => step,
                Err(reason) => return Err(self.unresolvable(cursor, &current, reason)),
            };

            match step {
                Step::Exit => return Ok(self.complete(cursor).await),
                Step::Node(next) => current = next,
                Step::Parallel { branches, join } => {
                    let label = branches.join(",");
                    self.guard(&cursor, &label, branches.len(), config, cancel)
                        .await?;
                    cursor = self.run_parallel(cursor, &current, branches).await?;
                    match join {
                        Target::End => return Ok(self.complete(cursor).await),
                        Target::Node(next) => current = next,
                    }
                }
            }
        }
    }

    async fn guard(
        &self,
        cursor: &Cursor<S>,
        next: &str,
        visits: usize,
        config: &RunConfig,
        cancel: Option<&CancellationToken>,
    ) -> Result<(), RunError<S>> {
        if cancel.is_some_and(|token| token.is_cancelled()) {
            log::info!("graph '{}' cancelled before '{}'", self.name, next);
            self.emit(GraphEvent::Cancelled {
                graph: self.name.clone(),
                run_id: cursor.run_id.clone(),
                next: next.to_string(),
            })
            .await;
            return Err(RunError::Cancelled {
                next: next.to_string(),
                state: cursor.state.clone(),
                trace: cursor.trace.clone(),
            });
        }
        if cursor.steps + visits > config.recursion_limit {
            log::error!(
                "graph '{}' exceeded recursion limit {} before '{}'",
                self.name,
                config.recursion_limit,
                next
            );
            return Err(RunError::RecursionLimitExceeded {
                limit: config.recursion_limit,
                next: next.to_string(),
                state: cursor.state.clone(),
                trace: cursor.trace.clone(),
            });
        }
        Ok(())
    }

    async fn run_node(&self, mut cursor: Cursor<S>, name: &str) -> Result<Cursor<S>, RunError<S>> {
        let Some(node) = self.nodes.get(name) else {
            return Err(self.unresolvable(cursor, name, format!("unknown node '{}'", name)));
        };

        cursor.steps += 1;
        log::debug!("graph '{}' step {}: '{}'", self.name, cursor.steps, name);
        self.emit(GraphEvent::NodeStarted {
            graph: self.name.clone(),
            node: name.to_string(),
            step: cursor.steps,
        })
        .await;

        let delta = match node.run(&cursor.state).await {
            Ok(delta) => delta,
            Err(source) => {
                log::error!("graph '{}' node '{}' failed: {}", self.name, name, source);
                return Err(RunError::NodeFailed {
                    node: name.to_string(),
                    source,
                    state: cursor.state,
                    trace: cursor.trace,
                });
            }
        };

        if let Err(source) = cursor.state.merge(delta) {
            return Err(RunError::MergeConflict {
                node: name.to_string(),
                source,
                state: cursor.state,
                trace: cursor.trace,
            });
        }
        cursor.trace.push(name.to_string());

        self.emit(GraphEvent::NodeCompleted {
            graph: self.name.clone(),
            node: name.to_string(),
            step: cursor.steps,
        })
        .await;
        Ok(cursor)
    }

    async fn run_parallel(
        &self,
        mut cursor: Cursor<S>,
        from: &str,
        branches: Vec<String>,
    ) -> Result<Cursor<S>, RunError<S>> {
        let mut runnable = Vec::with_capacity(branches.len());
        for branch in &branches {
            match self.nodes.get(branch) {
                Some(node) => runnable.push((branch.clone(), node.clone())),
                None => {
                    return Err(self.unresolvable(cursor, from, format!("unknown node '{}'", branch)))
                }
            }
        }

        for (branch, _) in &runnable {
            cursor.steps += 1;
            self.emit(GraphEvent::NodeStarted {
                graph: self.name.clone(),
                node: branch.clone(),
                step: cursor.steps,
            })
            .await;
        }

        let snapshot = &cursor.state;
        let results = try_join_all(runnable.iter().map(|(branch, node)| async move {
            node.run(snapshot)
                .await
                .map(|delta| (branch.clone(), delta))
                .map_err(|e| (branch.clone(), e))
        }))
        .await;

        let deltas = match results {
            Ok(deltas) => deltas,
            Err((branch, source)) => {
                log::error!(
                    "graph '{}' parallel node '{}' failed: {}",
                    self.name,
                    branch,
                    source
                );
                return Err(RunError::NodeFailed {
                    node: branch,
                    source,
                    state: cursor.state,
                    trace: cursor.trace,
                });
            }
        };

        let mut writers: HashMap<String, String> = HashMap::new();
        for (branch, delta) in &deltas {
            for field in S::exclusive_writes(delta) {
                if let Some(first) = writers.get(&field) {
                    let source = MergeError::ConflictingWrite {
                        field,
                        first: first.clone(),
                        second: branch.clone(),
                    };
                    return Err(RunError::MergeConflict {
                        node: branch.clone(),
                        source,
                        state: cursor.state,
                        trace: cursor.trace,
                    });
                }
                writers.insert(field, branch.clone());
            }
        }

        for (branch, delta) in deltas {
            if let Err(source) = cursor.state.merge(delta) {
                return Err(RunError::MergeConflict {
                    node: branch,
                    source,
                    state: cursor.state,
                    trace: cursor.trace,
                });
            }
            cursor.trace.push(branch);
        }

        for branch in &branches {
            self.emit(GraphEvent::NodeCompleted {
                graph: self.name.clone(),
                node: branch.clone(),
                step: cursor.steps,
            })
            .await;
        }
        Ok(cursor)
    }

    async fn resolve(&self, from: &str, state: &S) -> Result<Step, String> {
        let (router, mapping, fallback) = match self.edges.get(from) {
            None => return Err("no outgoing edge".to_string()),
            Some(Edge::Static(Target::End)) => return Ok(Step::Exit),
            Some(Edge::Static(Target::Node(next))) => return Ok(Step::Node(next.clone())),
            Some(Edge::Conditional {
                router,
                mapping,
                fallback,
            }) => (router, mapping, fallback),
        };

        let decision = match router.route(state) {
            Ok(decision) => decision,
            Err(e) => {
                log::warn!(
                    "graph '{}' router after '{}' failed ({}), falling back to '{}'",
                    self.name,
                    from,
                    e,
                    fallback
                );
                self.emit(GraphEvent::RoutingFallback {
                    graph: self.name.clone(),
                    from: from.to_string(),
                    fallback: fallback.clone(),
                    reason: e.to_string(),
                })
                .await;
                RouteDecision::Single(fallback.clone())
            }
        };

        let outcomes = match decision {
            RouteDecision::Single(outcome) => vec![outcome],
            RouteDecision::Parallel(outcomes) if outcomes.is_empty() => {
                return Err("router returned an empty parallel set".to_string())
            }
            RouteDecision::Parallel(outcomes) => outcomes,
        };

        let mut targets = Vec::with_capacity(outcomes.len());
        for outcome in &outcomes {
            match mapping.get(outcome) {
                Some(target) => targets.push(target.clone()),
                None => return Err(format!("outcome '{}' is not mapped", outcome)),
            }
        }

        self.emit(GraphEvent::RouteTaken {
            graph: self.name.clone(),
            from: from.to_string(),
            outcome: outcomes.join(","),
            targets: targets.iter().map(|t| t.name().to_string()).collect(),
        })
        .await;

        if targets.len() == 1 {
            return Ok(match targets.remove(0) {
                Target::End => Step::Exit,
                Target::Node(next) => Step::Node(next),
            });
        }

        let fan_out = self
            .fan_outs
            .get(from)
            .ok_or_else(|| format!("no parallel fan-out declared for '{}'", from))?;
        let mut branches = Vec::with_capacity(targets.len());
        for (outcome, target) in outcomes.iter().zip(targets) {
            match target {
                Target::Node(branch) if fan_out.outcomes.contains(outcome) => {
                    branches.push(branch)
                }
                _ => {
                    return Err(format!(
                        "outcome '{}' is not part of the fan-out from '{}'",
                        outcome, from
                    ))
                }
            }
        }

        self.emit(GraphEvent::ParallelFanOut {
            graph: self.name.clone(),
            from: from.to_string(),
            branches: branches.clone(),
            join: fan_out.join.name().to_string(),
        })
        .await;
        Ok(Step::Parallel {
            branches,
            join: fan_out.join.clone(),
        })
    }

    async fn suspend(&self, cursor: Cursor<S>, before: String) -> Result<RunOutcome<S>, RunError<S>> {
        let checkpoint = match Checkpoint::capture(
            &self.name,
            &cursor.run_id,
            &before,
            &cursor.state,
            cursor.steps,
        ) {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                return Err(RunError::NodeFailed {
                    node: before,
                    source: Box::new(e),
                    state: cursor.state,
                    trace: cursor.trace,
                })
            }
        };

        log::info!(
            "graph '{}' run {} suspended before '{}'",
            self.name,
            cursor.run_id,
            before
        );
        self.emit(GraphEvent::Suspended {
            graph: self.name.clone(),
            run_id: cursor.run_id.clone(),
            before,
        })
        .await;

        Ok(RunOutcome::Suspended {
            state: cursor.state,
            checkpoint,
            trace: cursor.trace,
        })
    }

    async fn complete(&self, cursor: Cursor<S>) -> RunOutcome<S> {
        log::info!(
            "graph '{}' run {} completed after {} steps",
            self.name,
            cursor.run_id,
            cursor.steps
        );
        self.emit(GraphEvent::RunCompleted {
            graph: self.name.clone(),
            run_id: cursor.run_id,
            steps: cursor.steps,
        })
        .await;
        RunOutcome::Completed {
            state: cursor.state,
            trace: cursor.trace,
        }
    }

    fn unresolvable(&self, cursor: Cursor<S>, from: &str, reason: String) -> RunError<S> {
        log::error!(
            "graph '{}' cannot route out of '{}': {}",
            self.name,
            from,
            reason
        );
        RunError::UnresolvableRoute {
            from: from.to_string(),
            reason,
            state: cursor.state,
            trace: cursor.trace,
        }
    }

    async fn emit(&self, event: GraphEvent) {
        if let Some(handler) = &self.event_handler {
            handler.on_graph_event(&event).await;
        }
    }
}

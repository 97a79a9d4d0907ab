//! Graph definition: nodes as data, edges as a table from node to target.
//!
//! A [`StateGraph`] is an inspectable description of a workflow. Nodes are
//! registered under names, each node has exactly one outgoing edge, and an
//! edge is either static or conditional (a [`Router`] plus a mapping from
//! outcome labels to targets, with a fallback label used when the router
//! reports a [`RoutingError`]). Nothing runs until the graph is compiled into
//! a [`CompiledGraph`](crate::engine::CompiledGraph).
//!
//! ```rust
//! use proposalgraph::graph::{FnNode, StateGraph, Target, END};
//! use proposalgraph::router::RouteDecision;
//! use proposalgraph::state::{ProposalState, StateDelta};
//!
//! let mut graph = StateGraph::<ProposalState>::new("tiny");
//! graph
//!     .add_node("draft", FnNode::new(|_state: ProposalState| async {
//!         Ok(StateDelta { final_report: Some("draft".into()), ..StateDelta::default() })
//!     }))
//!     .add_node("polish", FnNode::new(|_state: ProposalState| async { Ok(StateDelta::default()) }))
//!     .set_entry_point("draft")
//!     .add_conditional_edges(
//!         "draft",
//!         |state: &ProposalState| {
//!             Ok(RouteDecision::single(if state.final_report.len() > 10 { "done" } else { "again" }))
//!         },
//!         [("done", Target::End), ("again", Target::node("polish"))],
//!         "done",
//!     )
//!     .add_edge("polish", END);
//!
//! let compiled = graph.compile().expect("valid topology");
//! assert_eq!(compiled.entry_point(), "draft");
//! ```

use crate::proposalgraph::config::RunConfig;
use crate::proposalgraph::engine::CompiledGraph;
use crate::proposalgraph::router::{RouteDecision, RoutingError};
use crate::proposalgraph::state::GraphState;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// Reserved target name for the graph's exit.
pub const END: &str = "__end__";

/// One unit of work in a graph.
///
/// Receives a read-only snapshot and returns a delta for the engine to merge.
#[async_trait]
pub trait Node<S: GraphState>: Send + Sync {
    async fn run(&self, state: &S) -> Result<S::Delta, Box<dyn Error + Send + Sync>>;
}

/// Node backed by an async closure taking an owned snapshot.
pub struct FnNode<S, F> {
    func: F,
    _state: PhantomData<fn(S)>,
}

impl<S, F> FnNode<S, F> {
    pub fn new<Fut>(func: F) -> Self
    where
        S: GraphState,
        F: Fn(S) -> Fut + Send + Sync,
        Fut: Future<Output = Result<S::Delta, Box<dyn Error + Send + Sync>>> + Send,
    {
        Self {
            func,
            _state: PhantomData,
        }
    }
}

#[async_trait]
impl<S, F, Fut> Node<S> for FnNode<S, F>
where
    S: GraphState,
    F: Fn(S) -> Fut + Send + Sync,
    Fut: Future<Output = Result<S::Delta, Box<dyn Error + Send + Sync>>> + Send,
{
    async fn run(&self, state: &S) -> Result<S::Delta, Box<dyn Error + Send + Sync>> {
        (self.func)(state.clone()).await
    }
}

/// Pure predicate choosing the next outcome(s) from state.
pub trait Router<S>: Send + Sync {
    fn route(&self, state: &S) -> Result<RouteDecision, RoutingError>;
}

impl<S, F> Router<S> for F
where
    F: Fn(&S) -> Result<RouteDecision, RoutingError> + Send + Sync,
{
    fn route(&self, state: &S) -> Result<RouteDecision, RoutingError> {
        self(state)
    }
}

/// Where an edge leads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Target {
    Node(String),
    End,
}

impl Target {
    pub fn node(name: impl Into<String>) -> Self {
        Target::Node(name.into())
    }

    pub fn name(&self) -> &str {
        match self {
            Target::Node(name) => name,
            Target::End => END,
        }
    }
}

impl From<&str> for Target {
    fn from(name: &str) -> Self {
        if name == END {
            Target::End
        } else {
            Target::Node(name.to_string())
        }
    }
}

impl From<String> for Target {
    fn from(name: String) -> Self {
        Target::from(name.as_str())
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub(crate) enum Edge<S> {
    Static(Target),
    Conditional {
        router: Box<dyn Router<S>>,
        mapping: BTreeMap<String, Target>,
        fallback: String,
    },
}

/// Outcomes of one conditional edge that may be taken together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FanOut {
    pub outcomes: BTreeSet<String>,
    pub join: Target,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    MissingEntryPoint,
    DuplicateNode(String),
    DuplicateEdge(String),
    /// `context` references a node that was never added.
    UnknownNode { context: String, name: String },
    /// A node with no outgoing edge.
    MissingEdge(String),
    /// The fallback label is not in the edge's mapping.
    InvalidFallback { from: String, fallback: String },
    InvalidInterrupt(String),
    /// A fan-out branch does not lead statically to the declared join.
    ParallelWithoutJoin { from: String, branch: String },
    ZeroRecursionLimit,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::MissingEntryPoint => write!(f, "Graph has no entry point"),
            CompileError::DuplicateNode(name) => write!(f, "Node '{}' added twice", name),
            CompileError::DuplicateEdge(name) => {
                write!(f, "Node '{}' has more than one outgoing edge", name)
            }
            CompileError::UnknownNode { context, name } => {
                write!(f, "{} references unknown node '{}'", context, name)
            }
            CompileError::MissingEdge(name) => write!(f, "Node '{}' has no outgoing edge", name),
            CompileError::InvalidFallback { from, fallback } => write!(
                f,
                "Fallback '{}' on edge from '{}' is not a mapped outcome",
                fallback, from
            ),
            CompileError::InvalidInterrupt(name) => {
                write!(f, "Cannot interrupt before '{}'", name)
            }
            CompileError::ParallelWithoutJoin { from, branch } => write!(
                f,
                "Parallel branch '{}' from '{}' does not lead to the declared join",
                branch, from
            ),
            CompileError::ZeroRecursionLimit => write!(f, "Recursion limit must be at least 1"),
        }
    }
}

impl Error for CompileError {}

/// Builder for a [`CompiledGraph`].
pub struct StateGraph<S: GraphState> {
    name: String,
    nodes: HashMap<String, Arc<dyn Node<S>>>,
    order: Vec<String>,
    edges: HashMap<String, Edge<S>>,
    fan_outs: HashMap<String, FanOut>,
    entry: Option<String>,
    interrupts: BTreeSet<String>,
    run_config: RunConfig,
    problems: Vec<CompileError>,
}

impl<S: GraphState> StateGraph<S> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: HashMap::new(),
            order: Vec::new(),
            edges: HashMap::new(),
            fan_outs: HashMap::new(),
            entry: None,
            interrupts: BTreeSet::new(),
            run_config: RunConfig::default(),
            problems: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_node(&mut self, name: impl Into<String>, node: impl Node<S> + 'static) -> &mut Self {
        self.add_shared_node(name, Arc::new(node))
    }

    pub fn add_shared_node(&mut self, name: impl Into<String>, node: Arc<dyn Node<S>>) -> &mut Self {
        let name = name.into();
        if name == END || self.nodes.contains_key(&name) {
            self.problems.push(CompileError::DuplicateNode(name));
            return self;
        }
        self.order.push(name.clone());
        self.nodes.insert(name, node);
        self
    }

    pub fn set_entry_point(&mut self, name: impl Into<String>) -> &mut Self {
        self.entry = Some(name.into());
        self
    }

    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<Target>) -> &mut Self {
        self.insert_edge(from.into(), Edge::Static(to.into()))
    }

    /// Route out of `from` with `router`. `fallback` must be one of the mapped
    /// outcome labels; it is used whenever the router returns an error.
    pub fn add_conditional_edges<I, L>(
        &mut self,
        from: impl Into<String>,
        router: impl Router<S> + 'static,
        mapping: I,
        fallback: &str,
    ) -> &mut Self
    where
        I: IntoIterator<Item = (L, Target)>,
        L: Into<String>,
    {
        let edge = Edge::Conditional {
            router: Box::new(router),
            mapping: mapping.into_iter().map(|(l, t)| (l.into(), t)).collect(),
            fallback: fallback.to_string(),
        };
        self.insert_edge(from.into(), edge)
    }

    /// Allow the conditional edge out of `from` to take several of `outcomes`
    /// at once. Each of their targets must have a static edge to `join`.
    pub fn add_fan_out<I, L>(
        &mut self,
        from: impl Into<String>,
        outcomes: I,
        join: impl Into<Target>,
    ) -> &mut Self
    where
        I: IntoIterator<Item = L>,
        L: Into<String>,
    {
        let fan_out = FanOut {
            outcomes: outcomes.into_iter().map(Into::into).collect(),
            join: join.into(),
        };
        self.fan_outs.insert(from.into(), fan_out);
        self
    }

    /// Suspend the run before `name` executes.
    pub fn interrupt_before(&mut self, name: impl Into<String>) -> &mut Self {
        self.interrupts.insert(name.into());
        self
    }

    pub fn set_run_config(&mut self, config: RunConfig) -> &mut Self {
        self.run_config = config;
        self
    }

    fn insert_edge(&mut self, from: String, edge: Edge<S>) -> &mut Self {
        if self.edges.contains_key(&from) {
            self.problems.push(CompileError::DuplicateEdge(from));
        } else {
            self.edges.insert(from, edge);
        }
        self
    }

    fn check_target(&self, context: &str, target: &Target) -> Result<(), CompileError> {
        match target {
            Target::End => Ok(()),
            Target::Node(name) if self.nodes.contains_key(name) => Ok(()),
            Target::Node(name) => Err(CompileError::UnknownNode {
                context: context.to_string(),
                name: name.clone(),
            }),
        }
    }

    fn validate(&self) -> Result<(), CompileError> {
        if let Some(problem) = self.problems.first() {
            return Err(problem.clone());
        }
        let entry = self.entry.as_ref().ok_or(CompileError::MissingEntryPoint)?;
        self.check_target("entry point", &Target::node(entry.clone()))?;

        for name in &self.order {
            if !self.edges.contains_key(name) {
                return Err(CompileError::MissingEdge(name.clone()));
            }
        }

        for (from, edge) in &self.edges {
            let context = format!("edge from '{}'", from);
            self.check_target(&context, &Target::node(from.clone()))?;
            match edge {
                Edge::Static(target) => self.check_target(&context, target)?,
                Edge::Conditional {
                    mapping, fallback, ..
                } => {
                    for target in mapping.values() {
                        self.check_target(&context, target)?;
                    }
                    if !mapping.contains_key(fallback) {
                        return Err(CompileError::InvalidFallback {
                            from: from.clone(),
                            fallback: fallback.clone(),
                        });
                    }
                }
            }
        }

        for (from, fan_out) in &self.fan_outs {
            let context = format!("fan-out from '{}'", from);
            self.check_target(&context, &fan_out.join)?;
            let mapping = match self.edges.get(from) {
                Some(Edge::Conditional { mapping, .. }) => mapping,
                _ => {
                    return Err(CompileError::UnknownNode {
                        context,
                        name: format!("conditional edge from {}", from),
                    })
                }
            };
            for outcome in &fan_out.outcomes {
                let branch = match mapping.get(outcome) {
                    Some(Target::Node(branch)) => branch,
                    _ => {
                        return Err(CompileError::ParallelWithoutJoin {
                            from: from.clone(),
                            branch: outcome.clone(),
                        })
                    }
                };
                let joins = matches!(self.edges.get(branch), Some(Edge::Static(t)) if *t == fan_out.join);
                if !joins || self.interrupts.contains(branch) {
                    return Err(CompileError::ParallelWithoutJoin {
                        from: from.clone(),
                        branch: branch.clone(),
                    });
                }
            }
        }

        for name in &self.interrupts {
            if !self.nodes.contains_key(name) {
                return Err(CompileError::InvalidInterrupt(name.clone()));
            }
        }

        if self.run_config.recursion_limit == 0 {
            return Err(CompileError::ZeroRecursionLimit);
        }
        Ok(())
    }

    pub fn compile(self) -> Result<CompiledGraph<S>, CompileError> {
        self.validate()?;
        let entry = self.entry.ok_or(CompileError::MissingEntryPoint)?;
        log::debug!(
            "compiled graph '{}' with {} nodes, entry '{}'",
            self.name,
            self.nodes.len(),
            entry
        );
        Ok(CompiledGraph::from_parts(
            self.name,
            self.nodes,
            self.order,
            self.edges,
            self.fan_outs,
            entry,
            self.interrupts,
            self.run_config,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proposalgraph::state::{ProposalState, StateDelta};

    struct Noop;

    #[async_trait]
    impl Node<ProposalState> for Noop {
        async fn run(
            &self,
            _state: &ProposalState,
        ) -> Result<StateDelta, Box<dyn Error + Send + Sync>> {
            Ok(StateDelta::default())
        }
    }

    fn noop() -> Noop {
        Noop
    }

    #[test]
    fn missing_entry_point() {
        let mut graph = StateGraph::<ProposalState>::new("g");
        graph.add_node("a", noop()).add_edge("a", END);
        assert!(matches!(graph.compile(), Err(CompileError::MissingEntryPoint)));
    }

    #[test]
    fn unknown_edge_target() {
        let mut graph = StateGraph::<ProposalState>::new("g");
        graph
            .add_node("a", noop())
            .set_entry_point("a")
            .add_edge("a", "ghost");
        assert!(matches!(
            graph.compile(),
            Err(CompileError::UnknownNode { name, .. }) if name == "ghost"
        ));
    }

    #[test]
    fn node_without_edge() {
        let mut graph = StateGraph::<ProposalState>::new("g");
        graph
            .add_node("a", noop())
            .add_node("b", noop())
            .set_entry_point("a")
            .add_edge("a", END);
        assert_eq!(
            graph.compile().err(),
            Some(CompileError::MissingEdge("b".into()))
        );
    }

    #[test]
    fn fallback_must_be_mapped() {
        let mut graph = StateGraph::<ProposalState>::new("g");
        graph.add_node("a", noop()).set_entry_point("a").add_conditional_edges(
            "a",
            |_: &ProposalState| Ok(RouteDecision::single("x")),
            [("x", Target::End)],
            "y",
        );
        assert!(matches!(
            graph.compile(),
            Err(CompileError::InvalidFallback { .. })
        ));
    }

    #[test]
    fn fan_out_requires_common_join() {
        let mut graph = StateGraph::<ProposalState>::new("g");
        graph
            .add_node("split", noop())
            .add_node("left", noop())
            .add_node("right", noop())
            .add_node("join", noop())
            .set_entry_point("split")
            .add_conditional_edges(
                "split",
                |_: &ProposalState| {
                    Ok(RouteDecision::Parallel(vec!["l".into(), "r".into()]))
                },
                [("l", Target::node("left")), ("r", Target::node("right"))],
                "l",
            )
            .add_fan_out("split", ["l", "r"], "join")
            .add_edge("left", "join")
            .add_edge("right", END)
            .add_edge("join", END);
        assert_eq!(
            graph.compile().err(),
            Some(CompileError::ParallelWithoutJoin {
                from: "split".into(),
                branch: "right".into()
            })
        );
    }

    #[test]
    fn duplicate_node_and_zero_limit() {
        let mut graph = StateGraph::<ProposalState>::new("g");
        graph.add_node("a", noop()).add_node("a", noop());
        assert_eq!(
            graph.compile().err(),
            Some(CompileError::DuplicateNode("a".into()))
        );

        let mut graph = StateGraph::<ProposalState>::new("g");
        graph
            .add_node("a", noop())
            .set_entry_point("a")
            .add_edge("a", END)
            .set_run_config(RunConfig { recursion_limit: 0 });
        assert_eq!(graph.compile().err(), Some(CompileError::ZeroRecursionLimit));
    }
}

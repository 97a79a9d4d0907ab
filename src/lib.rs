//! # proposalgraph
//!
//! proposalgraph reviews grant proposals with a pipeline of LLM-backed agents
//! wired together as an explicit, inspectable directed graph.
//!
//! The crate is layered as follows:
//!
//! * **State**: [`state::ProposalState`] is the one record threaded through a
//!   run. Nodes never mutate it; they return a [`state::StateDelta`] that the
//!   engine merges, and every field declares whether it has a single writer or
//!   is append-only so concurrent branches cannot silently overwrite each other.
//! * **Graphs**: [`graph::StateGraph`] holds nodes as data and edges as a table
//!   from node to target. Conditional edges pair a [`graph::Router`] with an
//!   outcome mapping and a fallback label.
//! * **Engine**: [`engine::CompiledGraph`] walks the graph, fans out over
//!   parallel router decisions, enforces a per-invocation node-visit ceiling,
//!   honours cancellation between nodes, and suspends before interrupt points
//!   with a [`checkpoint::Checkpoint`] that [`engine::CompiledGraph::resume`]
//!   accepts later.
//! * **Debates**: [`debate`] builds the bounded proponent/opponent/judge graph
//!   and [`debate_controller::DebateController`] runs a feasibility and an
//!   innovation debate for every discipline, concurrently within a discipline
//!   and in order across disciplines.
//! * **Pipeline**: [`pipeline::GraphSetup`] assembles the full review topology
//!   and [`ProposalGraph`] wraps it with run, cancel and resume entry points.
//! * **Collaborators**: LLM backends implement [`client_wrapper::ClientWrapper`],
//!   tools implement [`tool_protocol::ToolProtocol`] (or are registered as
//!   closures on [`tool_protocols::CustomToolProtocol`]).
//!
//! ## Getting Started
//!
//! ```rust,no_run
//! use proposalgraph::client_wrapper::ClientWrapper;
//! use proposalgraph::config::PipelineConfig;
//! use proposalgraph::roster::{AgentRoster, Toolkit};
//! use proposalgraph::ProposalGraph;
//! use std::sync::Arc;
//!
//! # async fn demo(
//! #     quick: Arc<dyn ClientWrapper>,
//! #     deep: Arc<dyn ClientWrapper>,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! proposalgraph::init_logger();
//!
//! let review = ProposalGraph::new(
//!     AgentRoster::new(quick, deep),
//!     Toolkit::new(),
//!     PipelineConfig { max_debate_rounds: 2, ..PipelineConfig::default() },
//! )?;
//!
//! let outcome = review.run("Assess the attached proposal", &["feasibility"]).await?;
//! println!("{:?}", outcome.trace());
//! # Ok(())
//! # }
//! ```

use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

/// Initialise the global [`env_logger`] subscriber exactly once.
///
/// Output is controlled with `RUST_LOG`, e.g. `RUST_LOG=proposalgraph=debug`.
///
/// ```rust
/// proposalgraph::init_logger();
/// log::info!("Logger is ready");
/// ```
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        env_logger::init();
    });
}

pub mod proposalgraph;

pub use proposalgraph::agent;
pub use proposalgraph::agent::Agent;
pub use proposalgraph::checkpoint;
pub use proposalgraph::checkpoint::{Checkpoint, SuspendedRun};
pub use proposalgraph::client_wrapper;
pub use proposalgraph::client_wrapper::{AgentReply, ClientWrapper, Message, Role, TokenUsage};
pub use proposalgraph::config;
pub use proposalgraph::config::{ConfigError, PipelineConfig, RunConfig};
pub use proposalgraph::debate;
pub use proposalgraph::debate_controller;
pub use proposalgraph::engine;
pub use proposalgraph::engine::{CompiledGraph, RunError, RunOutcome};
pub use proposalgraph::event;
pub use proposalgraph::event::{AgentEvent, EventHandler, GraphEvent};
pub use proposalgraph::graph;
pub use proposalgraph::graph::{StateGraph, Target, END};
pub use proposalgraph::nodes;
pub use proposalgraph::pipeline;
pub use proposalgraph::prompts;
pub use proposalgraph::propagation;
pub use proposalgraph::propagation::Propagator;
pub use proposalgraph::proposal_graph;
pub use proposalgraph::roster;
pub use proposalgraph::router;
pub use proposalgraph::router::{RouteDecision, RoutingError};
pub use proposalgraph::state;
pub use proposalgraph::state::{DebateState, ProposalState, StateDelta};
pub use proposalgraph::tool_protocol;
pub use proposalgraph::tool_protocols;
pub use proposalgraph::ProposalGraph;

//! Top-level entry point for reviewing a proposal.
//!
//! ```rust,no_run
//! use proposalgraph::config::PipelineConfig;
//! use proposalgraph::engine::RunOutcome;
//! use proposalgraph::proposal_graph::ProposalGraph;
//! use proposalgraph::roster::{AgentRoster, Toolkit};
//! # use proposalgraph::client_wrapper::ClientWrapper;
//! # use std::sync::Arc;
//!
//! # async fn demo(client: Arc<dyn ClientWrapper>) -> Result<(), Box<dyn std::error::Error>> {
//! let review = ProposalGraph::new(
//!     AgentRoster::single(client),
//!     Toolkit::new(),
//!     PipelineConfig::default(),
//! )?;
//!
//! let mut outcome = review
//!     .run("Review the attached soil microbiome proposal", &["academic", "social"])
//!     .await?;
//!
//! while let RunOutcome::Suspended { state, checkpoint, .. } = outcome {
//!     println!("reviewer needed: {}", state.reflection_decision);
//!     outcome = review
//!         .resume_with_feedback(state, &checkpoint, "Tighten the budget discussion")
//!         .await?;
//! }
//! println!("{}", outcome.state().final_report);
//! # Ok(())
//! # }
//! ```

use crate::proposalgraph::checkpoint::{Checkpoint, SuspendedRun};
use crate::proposalgraph::config::PipelineConfig;
use crate::proposalgraph::engine::{CompiledGraph, RunError, RunOutcome};
use crate::proposalgraph::event::EventHandler;
use crate::proposalgraph::pipeline::{GraphSetup, SetupError};
use crate::proposalgraph::propagation::Propagator;
use crate::proposalgraph::roster::{AgentRoster, Toolkit};
use crate::proposalgraph::state::{ProposalState, StateDelta};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub type ReviewResult = Result<RunOutcome<ProposalState>, RunError<ProposalState>>;

/// A compiled review pipeline, reusable across runs.
pub struct ProposalGraph {
    graph: CompiledGraph<ProposalState>,
    propagator: Propagator,
}

impl ProposalGraph {
    pub fn new(
        roster: AgentRoster,
        toolkit: Toolkit,
        config: PipelineConfig,
    ) -> Result<Self, SetupError> {
        Self::from_setup(GraphSetup::new(roster, toolkit, config.clone()), &config)
    }

    pub fn with_event_handler(
        roster: AgentRoster,
        toolkit: Toolkit,
        config: PipelineConfig,
        handler: Arc<dyn EventHandler>,
    ) -> Result<Self, SetupError> {
        let setup = GraphSetup::new(roster, toolkit, config.clone()).with_event_handler(handler);
        Self::from_setup(setup, &config)
    }

    fn from_setup(setup: GraphSetup, config: &PipelineConfig) -> Result<Self, SetupError> {
        Ok(Self {
            graph: setup.setup_graph()?,
            propagator: Propagator::new(config.recursion_limit),
        })
    }

    pub fn graph(&self) -> &CompiledGraph<ProposalState> {
        &self.graph
    }

    pub fn propagator(&self) -> &Propagator {
        &self.propagator
    }

    /// Review `prompt` from a fresh state.
    pub async fn run(&self, prompt: &str, interests: &[&str]) -> ReviewResult {
        let state = self.propagator.create_initial_state(prompt, interests);
        self.graph
            .invoke_with(state, &self.propagator.graph_args(), None)
            .await
    }

    /// Like [`run`](Self::run), stopping between nodes once `cancel` fires.
    pub async fn run_cancellable(
        &self,
        prompt: &str,
        interests: &[&str],
        cancel: &CancellationToken,
    ) -> ReviewResult {
        let state = self.propagator.create_initial_state(prompt, interests);
        self.graph
            .invoke_with(state, &self.propagator.graph_args(), Some(cancel))
            .await
    }

    /// Continue a run suspended for human review.
    pub async fn resume_with_feedback(
        &self,
        state: ProposalState,
        checkpoint: &Checkpoint,
        feedback: &str,
    ) -> ReviewResult {
        self.graph
            .resume_with(
                state,
                checkpoint,
                StateDelta::human_feedback(feedback),
                &self.propagator.graph_args(),
                None,
            )
            .await
    }

    /// Continue a run restored with [`SuspendedRun::load`].
    pub async fn resume_saved(&self, saved: SuspendedRun<ProposalState>, feedback: &str) -> ReviewResult {
        let SuspendedRun { checkpoint, state } = saved;
        self.resume_with_feedback(state, &checkpoint, feedback).await
    }
}

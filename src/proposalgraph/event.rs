//! Graph and agent event system.
//!
//! Implement [`EventHandler`] to observe a run as it happens: node boundaries,
//! routing decisions (including fallbacks on malformed recommendations),
//! parallel fan-out, debate progress, suspension and resumption.
//!
//! Both handler methods default to no-ops. The handler is shared as
//! `Arc<dyn EventHandler>` and is propagated from the top-level graph into the
//! debate sub-graphs and the agents they call.
//!
//! ```text
//! RunStarted
//!   NodeStarted { intention_node }
//!   NodeCompleted { intention_node }
//!   RouteTaken { from: intention_node, outcome: structure }
//!   ...
//!   DebateStarted { discipline: Biology, track: feasibility }
//!     DebateTurn { round_count: 1 } ...
//!   DebateJudged { discipline: Biology, track: feasibility }
//!   ...
//!   Suspended { before: human_review_node }
//! ```
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use proposalgraph::event::{EventHandler, GraphEvent};
//!
//! struct PrintHandler;
//!
//! #[async_trait]
//! impl EventHandler for PrintHandler {
//!     async fn on_graph_event(&self, event: &GraphEvent) {
//!         if let GraphEvent::RoutingFallback { from, reason, .. } = event {
//!             eprintln!("router at {} fell back: {}", from, reason);
//!         }
//!     }
//! }
//! ```

use crate::proposalgraph::client_wrapper::TokenUsage;
use async_trait::async_trait;

/// Events emitted by an [`Agent`](crate::agent::Agent) around each invocation.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// Fired before the backend is called.
    InvokeStarted {
        agent_id: String,
        model: String,
        /// Number of log entries handed to the backend.
        message_count: usize,
    },
    /// Fired after the backend returned successfully.
    InvokeCompleted {
        agent_id: String,
        tokens_used: Option<TokenUsage>,
        tool_calls: usize,
        response_length: usize,
    },
    /// A `{"tool_call": ...}` fragment was lifted out of plain-text output.
    ToolCallParsed { agent_id: String, tool_name: String },
    /// A self-contained agent loop hit its tool iteration cap.
    ToolIterationsExhausted { agent_id: String, iterations: usize },
}

/// Events emitted by a compiled graph during `invoke` / `resume`.
#[derive(Debug, Clone)]
pub enum GraphEvent {
    RunStarted {
        graph: String,
        run_id: String,
        entry: String,
    },
    NodeStarted {
        graph: String,
        node: String,
        step: usize,
    },
    NodeCompleted {
        graph: String,
        node: String,
        step: usize,
    },
    /// A conditional edge resolved to `outcome`, leading to `targets`.
    RouteTaken {
        graph: String,
        from: String,
        outcome: String,
        targets: Vec<String>,
    },
    /// A router returned an error and the edge's fallback outcome was used.
    RoutingFallback {
        graph: String,
        from: String,
        fallback: String,
        reason: String,
    },
    /// A router returned several outcomes; the nodes run concurrently.
    ParallelFanOut {
        graph: String,
        from: String,
        branches: Vec<String>,
        join: String,
    },
    DebateStarted { discipline: String, track: String },
    DebateTurn {
        discipline: String,
        track: String,
        side: String,
        round_count: usize,
    },
    DebateJudged {
        discipline: String,
        track: String,
        round_count: usize,
    },
    /// Execution paused before `before`; the caller must resume.
    Suspended {
        graph: String,
        run_id: String,
        before: String,
    },
    Resumed {
        graph: String,
        run_id: String,
        at: String,
    },
    Cancelled {
        graph: String,
        run_id: String,
        next: String,
    },
    RunCompleted {
        graph: String,
        run_id: String,
        steps: usize,
    },
}

/// Receives events from graphs and agents.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_agent_event(&self, _event: &AgentEvent) {}

    async fn on_graph_event(&self, _event: &GraphEvent) {}
}

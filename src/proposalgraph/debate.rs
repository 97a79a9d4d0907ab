//! Bounded two-sided debates.
//!
//! One debate graph exists per [`DebateTrack`]. It runs on a [`DebateScope`]:
//! a private copy of the run state for one discipline plus a fresh
//! [`DebateState`]. Its topology is fixed:
//!
//! ```text
//!            ┌────── tools ──────┐            ┌────── tools ──────┐
//!            ▼                   │            ▼                   │
//! start ─► proponent ──continue──┼─► opponent ──continue──► proponent ...
//!            │                   │            │
//!            └──── end ──► judge ◄──── end ───┘
//!                            │
//!                           END
//! ```
//!
//! After every turn the router checks the round cap first (`round_count >=
//! 2 × max_rounds` always ends the debate), then the finalize signal, then
//! pending tool calls. Tool rounds return to the same speaker and do not
//! count as a turn. The judge is the only way out.

use crate::proposalgraph::agent::Agent;
use crate::proposalgraph::client_wrapper::Message;
use crate::proposalgraph::config::RunConfig;
use crate::proposalgraph::engine::{CompiledGraph, RunError, RunOutcome};
use crate::proposalgraph::event::{EventHandler, GraphEvent};
use crate::proposalgraph::graph::{CompileError, Node, StateGraph, Target, END};
use crate::proposalgraph::nodes::ToolNode;
use crate::proposalgraph::prompts;
use crate::proposalgraph::router::{debate_outcome, outcome, RouteDecision, RoutingError};
use crate::proposalgraph::state::{
    DebateSide, DebateState, DebateTrack, GraphState, MergeError, MessageState, ProposalState,
};
use crate::proposalgraph::tool_protocol::ToolRegistry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::Arc;

pub const PROPONENT: &str = "proponent";
pub const OPPONENT: &str = "opponent";
pub const PROPONENT_TOOLS: &str = "proponent_tools";
pub const OPPONENT_TOOLS: &str = "opponent_tools";
pub const JUDGE: &str = "judge";

/// State of one debate sub-graph run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateScope {
    /// Private copy of the run state with `current_discipline` set.
    pub context: ProposalState,
    pub track: DebateTrack,
    pub max_rounds: usize,
    pub debate: DebateState,
}

impl DebateScope {
    pub fn new(context: ProposalState, track: DebateTrack, max_rounds: usize) -> Self {
        Self {
            context,
            track,
            max_rounds,
            debate: DebateState::default(),
        }
    }

    pub fn discipline(&self) -> &str {
        &self.context.current_discipline
    }

    /// Total turns after which the judge is forced.
    pub fn turn_cap(&self) -> usize {
        self.max_rounds * 2
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DebateDelta {
    pub messages: Vec<Message>,
    /// A completed turn. Absent for tool requests.
    pub argument: Option<(DebateSide, String)>,
    pub judge_summary: Option<String>,
}

impl GraphState for DebateScope {
    type Delta = DebateDelta;

    fn merge(&mut self, delta: DebateDelta) -> Result<(), MergeError> {
        self.context.message_log.extend(delta.messages);
        if let Some((side, argument)) = delta.argument {
            if self.debate.is_judged() {
                return Err(MergeError::Rejected(
                    "debate already has a verdict".to_string(),
                ));
            }
            self.debate.record_turn(side, argument);
        }
        if let Some(summary) = delta.judge_summary {
            self.debate.judge_summary = summary;
        }
        Ok(())
    }

    fn exclusive_writes(delta: &DebateDelta) -> Vec<String> {
        let mut fields = Vec::new();
        if delta.argument.is_some() {
            fields.push("debate.turn".to_string());
        }
        if delta.judge_summary.is_some() {
            fields.push("debate.judge_summary".to_string());
        }
        fields
    }
}

impl MessageState for DebateScope {
    fn message_log(&self) -> &[Message] {
        &self.context.message_log
    }

    fn delta_appending(messages: Vec<Message>) -> DebateDelta {
        DebateDelta {
            messages,
            ..DebateDelta::default()
        }
    }
}

/// The three agents of one debate track.
#[derive(Clone)]
pub struct DebateAgents {
    pub proponent: Arc<Agent>,
    pub opponent: Arc<Agent>,
    pub judge: Arc<Agent>,
}

/// One side's turn.
pub struct DebateTurnNode {
    agent: Arc<Agent>,
    side: DebateSide,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl DebateTurnNode {
    pub fn new(agent: Arc<Agent>, side: DebateSide) -> Self {
        Self {
            agent,
            side,
            event_handler: None,
        }
    }

    pub fn with_event_handler(mut self, handler: Option<Arc<dyn EventHandler>>) -> Self {
        self.event_handler = handler;
        self
    }
}

#[async_trait]
impl Node<DebateScope> for DebateTurnNode {
    async fn run(&self, scope: &DebateScope) -> Result<DebateDelta, Box<dyn Error + Send + Sync>> {
        let context = prompts::render_context(&scope.context);
        let reply = self
            .agent
            .invoke(Some(&context), scope.message_log())
            .await?;

        if reply.has_tool_calls() {
            return Ok(DebateDelta {
                messages: vec![reply.into_message(&self.agent.id)],
                ..DebateDelta::default()
            });
        }

        if let Some(handler) = &self.event_handler {
            handler
                .on_graph_event(&GraphEvent::DebateTurn {
                    discipline: scope.discipline().to_string(),
                    track: scope.track.as_str().to_string(),
                    side: self.side.as_str().to_string(),
                    round_count: scope.debate.round_count + 1,
                })
                .await;
        }

        let argument = reply.content.clone();
        Ok(DebateDelta {
            messages: vec![reply.into_message(&self.agent.id)],
            argument: Some((self.side, argument)),
            judge_summary: None,
        })
    }
}

/// Reads the transcript and writes the verdict.
pub struct DebateJudgeNode {
    agent: Arc<Agent>,
}

impl DebateJudgeNode {
    pub fn new(agent: Arc<Agent>) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl Node<DebateScope> for DebateJudgeNode {
    async fn run(&self, scope: &DebateScope) -> Result<DebateDelta, Box<dyn Error + Send + Sync>> {
        let context = prompts::render_context(&scope.context);
        let transcript = if scope.debate.full_history.is_empty() {
            "(no arguments were made)".to_string()
        } else {
            scope.debate.full_history.join("\n\n")
        };
        let request = Message::human(format!(
            "Debate on {} for {} after {} turns:\n\n{}",
            scope.track,
            scope.discipline(),
            scope.debate.round_count,
            transcript
        ));

        let reply = self.agent.invoke(Some(&context), &[request]).await?;
        let summary = reply.content.clone();
        Ok(DebateDelta {
            messages: vec![reply.into_message(&self.agent.id)],
            argument: None,
            judge_summary: Some(summary),
        })
    }
}

fn route_turn(scope: &DebateScope) -> Result<RouteDecision, RoutingError> {
    let decision = debate_outcome(
        scope.debate.round_count,
        scope.turn_cap(),
        scope.last_message(),
    );
    Ok(RouteDecision::single(decision.label()))
}

/// Assemble and compile the debate graph for `track`.
pub fn build_debate_graph(
    track: DebateTrack,
    agents: DebateAgents,
    tools: Arc<ToolRegistry>,
    run_config: RunConfig,
    event_handler: Option<Arc<dyn EventHandler>>,
) -> Result<CompiledGraph<DebateScope>, CompileError> {
    let mut graph = StateGraph::<DebateScope>::new(format!("{}_debate", track));
    graph
        .add_node(
            PROPONENT,
            DebateTurnNode::new(agents.proponent, DebateSide::Proponent)
                .with_event_handler(event_handler.clone()),
        )
        .add_node(
            OPPONENT,
            DebateTurnNode::new(agents.opponent, DebateSide::Opponent)
                .with_event_handler(event_handler.clone()),
        )
        .add_node(PROPONENT_TOOLS, ToolNode::<DebateScope>::new(tools.clone()))
        .add_node(OPPONENT_TOOLS, ToolNode::<DebateScope>::new(tools))
        .add_node(JUDGE, DebateJudgeNode::new(agents.judge))
        .set_entry_point(PROPONENT)
        .add_conditional_edges(
            PROPONENT,
            route_turn,
            [
                (outcome::CONTINUE, Target::node(OPPONENT)),
                (outcome::END, Target::node(JUDGE)),
                (outcome::TOOLS, Target::node(PROPONENT_TOOLS)),
            ],
            outcome::END,
        )
        .add_conditional_edges(
            OPPONENT,
            route_turn,
            [
                (outcome::CONTINUE, Target::node(PROPONENT)),
                (outcome::END, Target::node(JUDGE)),
                (outcome::TOOLS, Target::node(OPPONENT_TOOLS)),
            ],
            outcome::END,
        )
        .add_edge(PROPONENT_TOOLS, PROPONENT)
        .add_edge(OPPONENT_TOOLS, OPPONENT)
        .add_edge(JUDGE, END)
        .set_run_config(run_config);

    let compiled = graph.compile()?;
    Ok(match event_handler {
        Some(handler) => compiled.with_event_handler(handler),
        None => compiled,
    })
}

/// Run a debate to its verdict.
pub async fn run_debate(
    graph: &CompiledGraph<DebateScope>,
    scope: DebateScope,
    config: &RunConfig,
) -> Result<(DebateState, Vec<String>), RunError<DebateScope>> {
    match graph.invoke_with(scope, config, None).await? {
        RunOutcome::Completed { state, trace } => Ok((state.debate, trace)),
        RunOutcome::Suspended { state, trace, .. } => Err(RunError::UnresolvableRoute {
            from: graph.name().to_string(),
            reason: "debate graphs have no suspension point".to_string(),
            state,
            trace,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_counts_turns_but_not_tool_rounds() {
        let mut scope = DebateScope::new(ProposalState::default(), DebateTrack::Innovation, 1);
        scope
            .merge(DebateDelta {
                messages: vec![Message::agent("p", "need data")],
                ..DebateDelta::default()
            })
            .unwrap();
        assert_eq!(scope.debate.round_count, 0);

        scope
            .merge(DebateDelta {
                messages: vec![Message::agent("p", "novel")],
                argument: Some((DebateSide::Proponent, "novel".into())),
                judge_summary: None,
            })
            .unwrap();
        assert_eq!(scope.debate.round_count, 1);
        assert_eq!(scope.message_log().len(), 2);
    }

    #[test]
    fn router_forces_end_at_cap() {
        let mut scope = DebateScope::new(ProposalState::default(), DebateTrack::Feasibility, 1);
        scope.context.message_log.push(Message::agent("p", "argument"));
        assert_eq!(
            route_turn(&scope),
            Ok(RouteDecision::single(outcome::CONTINUE))
        );
        scope.debate.round_count = 2;
        assert_eq!(route_turn(&scope), Ok(RouteDecision::single(outcome::END)));
    }

    #[test]
    fn no_turns_after_verdict() {
        let mut scope = DebateScope::new(ProposalState::default(), DebateTrack::Feasibility, 1);
        scope.debate.judge_summary = "done".into();
        let err = scope
            .merge(DebateDelta {
                argument: Some((DebateSide::Opponent, "late".into())),
                ..DebateDelta::default()
            })
            .unwrap_err();
        assert!(matches!(err, MergeError::Rejected(_)));
    }
}

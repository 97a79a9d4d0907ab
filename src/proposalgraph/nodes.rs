//! Node implementations for the proposal pipeline.
//!
//! | Node | Reads | Writes |
//! |------|-------|--------|
//! | [`AgentNode`] | message log, rendered context | one agent message, its [`StageOutput`] field |
//! | [`ToolNode`] | pending tool calls on the last message | one tool message per call |
//! | [`MessageTrimNode`] | message log | compaction, a "Continue" nudge |
//! | [`HumanReviewNode`] | `human_feedback` | nothing |
//! | [`ParallelAnalystNode`] | message log, rendered context | one agent message, its report |

use crate::proposalgraph::agent::Agent;
use crate::proposalgraph::client_wrapper::{AgentReply, Message};
use crate::proposalgraph::graph::Node;
use crate::proposalgraph::prompts;
use crate::proposalgraph::router::extract_json_object;
use crate::proposalgraph::state::{
    AnalysisTrack, Compaction, MessageState, ProposalState, StateDelta,
};
use crate::proposalgraph::tool_protocol::ToolRegistry;
use async_trait::async_trait;
use std::error::Error;
use std::marker::PhantomData;
use std::sync::Arc;

/// Which state field an agent's answer is stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutput {
    IntentionDecision,
    ResearchStructure,
    ExecutionPlan,
    Report(AnalysisTrack),
    FinalAnalysisSummary,
    ReflectionDecision,
    FeedbackRoutingDecision,
    FinalReport,
}

impl StageOutput {
    /// Fill the field for `reply` into `delta`.
    fn write(&self, reply: &AgentReply, delta: &mut StateDelta) {
        let content = reply.content.clone();
        match self {
            StageOutput::IntentionDecision => delta.intention_decision = Some(content),
            StageOutput::ResearchStructure => delta.research_structure = Some(content),
            StageOutput::ExecutionPlan => delta.execution_plan = Some(content),
            StageOutput::Report(track) => {
                if *track == AnalysisTrack::Interdisciplinary {
                    let disciplines = parse_disciplines(&content);
                    if !disciplines.is_empty() {
                        delta.interdisciplinary_results = Some(disciplines);
                    }
                }
                delta.analysis_reports.insert(*track, content);
            }
            StageOutput::FinalAnalysisSummary => delta.final_analysis_summary = Some(content),
            StageOutput::ReflectionDecision => delta.reflection_decision = Some(content),
            StageOutput::FeedbackRoutingDecision => {
                delta.feedback_routing_decision = Some(content)
            }
            StageOutput::FinalReport => delta.final_report = Some(content),
        }
    }
}

/// Invokes an agent once over the run's message log.
///
/// Replies that request tools are appended without touching the output
/// field; the stage's tool node and router take it from there.
pub struct AgentNode {
    agent: Arc<Agent>,
    output: StageOutput,
}

impl AgentNode {
    pub fn new(agent: Arc<Agent>, output: StageOutput) -> Self {
        Self { agent, output }
    }
}

#[async_trait]
impl Node<ProposalState> for AgentNode {
    async fn run(
        &self,
        state: &ProposalState,
    ) -> Result<StateDelta, Box<dyn Error + Send + Sync>> {
        let context = prompts::render_context(state);
        let reply = self.agent.invoke(Some(&context), &state.message_log).await?;

        let mut delta = StateDelta::default();
        if !reply.has_tool_calls() {
            self.output.write(&reply, &mut delta);
        }
        delta.messages.push(reply.into_message(&self.agent.id));
        Ok(delta)
    }
}

/// Executes the tool calls pending on the last message.
///
/// Results are appended in call order. A last message without tool calls
/// produces an empty delta.
pub struct ToolNode<S> {
    registry: Arc<ToolRegistry>,
    _state: PhantomData<fn(S)>,
}

impl<S> ToolNode<S> {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            _state: PhantomData,
        }
    }
}

#[async_trait]
impl<S: MessageState> Node<S> for ToolNode<S> {
    async fn run(&self, state: &S) -> Result<S::Delta, Box<dyn Error + Send + Sync>> {
        let calls = match state.last_message() {
            Some(msg) if msg.has_tool_calls() => msg.tool_calls.clone(),
            _ => return Ok(S::delta_appending(Vec::new())),
        };

        let outcomes = self.registry.execute_calls(&calls).await?;
        let messages = outcomes
            .into_iter()
            .map(|o| Message::tool(o.call.id.clone(), o.call.name.clone(), o.render()))
            .collect();
        Ok(S::delta_appending(messages))
    }
}

/// Compacts the message log between turns of a stage loop.
///
/// Keeps the seed request and the last `keep_last` entries, then nudges the
/// agent to continue.
pub struct MessageTrimNode {
    keep_last: usize,
}

impl MessageTrimNode {
    pub fn new(keep_last: usize) -> Self {
        Self { keep_last }
    }
}

#[async_trait]
impl Node<ProposalState> for MessageTrimNode {
    async fn run(
        &self,
        _state: &ProposalState,
    ) -> Result<StateDelta, Box<dyn Error + Send + Sync>> {
        Ok(StateDelta {
            messages: vec![Message::human("Continue")],
            compaction: Some(Compaction {
                retain_head: 1,
                retain_tail: self.keep_last,
            }),
            ..StateDelta::default()
        })
    }
}

/// Runs after a resume. The reviewer's input was already merged by the engine.
pub struct HumanReviewNode;

#[async_trait]
impl Node<ProposalState> for HumanReviewNode {
    async fn run(
        &self,
        state: &ProposalState,
    ) -> Result<StateDelta, Box<dyn Error + Send + Sync>> {
        if state.human_feedback.trim().is_empty() {
            log::warn!("human review resumed without feedback");
        } else {
            log::info!("human review feedback: {}", state.human_feedback);
        }
        Ok(StateDelta::default())
    }
}

/// Self-contained analyst used on the parallel path after planning.
pub struct ParallelAnalystNode {
    agent: Arc<Agent>,
    track: AnalysisTrack,
    max_tool_iterations: usize,
}

impl ParallelAnalystNode {
    pub fn new(agent: Arc<Agent>, track: AnalysisTrack, max_tool_iterations: usize) -> Self {
        Self {
            agent,
            track,
            max_tool_iterations,
        }
    }
}

#[async_trait]
impl Node<ProposalState> for ParallelAnalystNode {
    async fn run(
        &self,
        state: &ProposalState,
    ) -> Result<StateDelta, Box<dyn Error + Send + Sync>> {
        let context = prompts::render_context(state);
        let run = self
            .agent
            .run_with_tools(Some(&context), &state.message_log, self.max_tool_iterations)
            .await?;
        log::debug!(
            "{} analyst finished after {} tool rounds",
            self.track,
            run.tool_rounds
        );

        let mut delta = StateDelta::default();
        StageOutput::Report(self.track).write(&run.reply, &mut delta);
        delta.messages.push(run.reply.into_message(&self.agent.id));
        Ok(delta)
    }
}

/// Disciplines named by the interdisciplinary stage.
///
/// Accepts `{"disciplines": [...]}` anywhere in the text, or a line starting
/// with `DISCIPLINES:` listing names separated by commas. Order is kept and
/// duplicates are dropped.
pub fn parse_disciplines(text: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();

    let mut rest = text;
    while let Some(fragment) = extract_json_object(rest) {
        let offset = rest.find(fragment).unwrap_or(0) + fragment.len();
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(fragment) {
            if let Some(list) = value.get("disciplines").and_then(|v| v.as_array()) {
                found = list
                    .iter()
                    .filter_map(|v| v.as_str())
                    .map(|s| s.trim().to_string())
                    .collect();
                break;
            }
        }
        rest = &rest[offset..];
    }

    if found.is_empty() {
        const PREFIX: &str = "DISCIPLINES:";
        if let Some(line) = text.lines().map(str::trim).find(|l| {
            l.get(..PREFIX.len())
                .is_some_and(|p| p.eq_ignore_ascii_case(PREFIX))
        }) {
            found = line[PREFIX.len()..]
                .split(',')
                .map(|s| s.trim().trim_end_matches('.').to_string())
                .collect();
        }
    }

    let mut unique = Vec::with_capacity(found.len());
    for name in found {
        if !name.is_empty() && !unique.contains(&name) {
            unique.push(name);
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disciplines_from_json() {
        let text = "Analysis... {\"disciplines\": [\"Biology\", \"Economics\", \"Biology\"]} <FINALIZE>";
        assert_eq!(parse_disciplines(text), vec!["Biology", "Economics"]);
    }

    #[test]
    fn disciplines_from_line() {
        let text = "Summary of overlap.\nDisciplines: Ecology, Data Science.\nFINALIZE";
        assert_eq!(parse_disciplines(text), vec!["Ecology", "Data Science"]);
    }

    #[test]
    fn disciplines_skip_unrelated_json() {
        let text = "{\"score\": 3} then {\"disciplines\": [\"Law\"]}";
        assert_eq!(parse_disciplines(text), vec!["Law"]);
        assert!(parse_disciplines("nothing here").is_empty());
    }

    #[tokio::test]
    async fn trim_node_compacts_and_nudges() {
        let mut state = ProposalState::default();
        state.message_log.push(Message::human("seed"));
        for i in 0..8 {
            state.message_log.push(Message::agent("a", format!("draft {}", i)));
        }

        let delta = MessageTrimNode::new(2).run(&state).await.unwrap();
        crate::proposalgraph::state::GraphState::merge(&mut state, delta).unwrap();

        let contents: Vec<&str> = state.message_log.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(
            contents,
            vec![
                "seed",
                "[6 earlier messages compacted]",
                "draft 6",
                "draft 7",
                "Continue"
            ]
        );
    }
}

//! Assembly of the full proposal review graph.
//!
//! ```text
//! intention_node ──output──► output_node ──► END
//!      │
//!  structure
//!      ▼
//! structure_node ─► planning_node ──parallel──► 4 × parallel analysts ──┐
//!                        │                                               │
//!                    sequential                                          │
//!                        ▼                                               │
//!   academic ─► social ─► future_influence ─► interdisciplinary ─┐       │
//!   (each stage loops agent ⇄ tools / trim until it finalizes)   ▼       ▼
//!                                                     debate_controller
//!                                                            ▼
//!                                                      final_analyst
//!                                                            ▼
//!                                   generator ◄─generate── reflection
//!                                      │                     │ review
//!                                      ▼                     ▼
//!                                     END        ‖ human_review_node  (interrupt)
//!                                                            ▼
//!                                                    feedback_analysis ──► any stage,
//!                                                                          debate or generator
//! ```

use crate::proposalgraph::config::{ConfigError, PipelineConfig};
use crate::proposalgraph::debate::build_debate_graph;
use crate::proposalgraph::debate_controller::DebateController;
use crate::proposalgraph::engine::CompiledGraph;
use crate::proposalgraph::event::EventHandler;
use crate::proposalgraph::graph::{CompileError, StateGraph, Target, END};
use crate::proposalgraph::nodes::{
    AgentNode, HumanReviewNode, MessageTrimNode, ParallelAnalystNode, StageOutput, ToolNode,
};
use crate::proposalgraph::roster::{AgentRole, AgentRoster, Toolkit};
use crate::proposalgraph::router::{
    feedback_outcome, intention_outcome, outcome, reflection_outcome, stage_outcome,
    RouteDecision, RoutingError,
};
use crate::proposalgraph::state::{AnalysisTrack, DebateTrack, MessageState, ProposalState};
use std::error::Error;
use std::fmt;
use std::sync::Arc;

pub const GRAPH_NAME: &str = "proposal_review";

pub const INTENTION_NODE: &str = "intention_node";
pub const OUTPUT_NODE: &str = "output_node";
pub const STRUCTURE_NODE: &str = "structure_node";
pub const PLANNING_NODE: &str = "planning_node";
pub const DEBATE_CONTROLLER: &str = "debate_controller";
pub const FINAL_ANALYST: &str = "final_analyst";
pub const REFLECTION: &str = "reflection";
pub const HUMAN_REVIEW_NODE: &str = "human_review_node";
pub const FEEDBACK_ANALYSIS: &str = "feedback_analysis";
pub const GENERATOR: &str = "generator";

/// Stage name of a sequential analysis track, also its feedback target.
pub fn stage_name(track: AnalysisTrack) -> &'static str {
    match track {
        AnalysisTrack::Academic => "academic_analysis",
        AnalysisTrack::Social => "social_analysis",
        AnalysisTrack::FutureInfluence => "future_influence",
        AnalysisTrack::Interdisciplinary => "interdisciplinary",
    }
}

pub fn stage_agent_node(track: AnalysisTrack) -> String {
    format!("{}_node", stage_name(track))
}

pub fn stage_tools_node(track: AnalysisTrack) -> String {
    format!("{}_tools", stage_name(track))
}

pub fn stage_trim_node(track: AnalysisTrack) -> String {
    format!("{}_trim", stage_name(track))
}

pub fn parallel_analyst_node(track: AnalysisTrack) -> String {
    format!("parallel_{}_analyst", track)
}

/// `output` skips analysis entirely.
pub fn should_output(state: &ProposalState) -> Result<RouteDecision, RoutingError> {
    Ok(RouteDecision::single(intention_outcome(state.last_message())))
}

/// Sequential stages by default, all analysts at once when enabled.
pub fn route_after_planning(parallel_analysts: bool) -> impl Fn(&ProposalState) -> Result<RouteDecision, RoutingError> {
    move |_state: &ProposalState| {
        if parallel_analysts {
            Ok(RouteDecision::Parallel(
                AnalysisTrack::ALL
                    .iter()
                    .map(|t| t.as_str().to_string())
                    .collect(),
            ))
        } else {
            Ok(RouteDecision::single(outcome::SEQUENTIAL))
        }
    }
}

/// Finalize, then pending tools, then trim.
pub fn route_stage(state: &ProposalState) -> Result<RouteDecision, RoutingError> {
    Ok(RouteDecision::single(stage_outcome(state.last_message()).label()))
}

pub fn route_after_reflection(state: &ProposalState) -> Result<RouteDecision, RoutingError> {
    reflection_outcome(state.last_message()).map(RouteDecision::single)
}

pub fn route_after_feedback(state: &ProposalState) -> Result<RouteDecision, RoutingError> {
    feedback_outcome(state.last_message()).map(RouteDecision::single)
}

/// Failure to assemble the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum SetupError {
    Config(ConfigError),
    Compile(CompileError),
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupError::Config(e) => write!(f, "{}", e),
            SetupError::Compile(e) => write!(f, "Failed to compile graph: {}", e),
        }
    }
}

impl Error for SetupError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SetupError::Config(e) => Some(e),
            SetupError::Compile(e) => Some(e),
        }
    }
}

impl From<ConfigError> for SetupError {
    fn from(e: ConfigError) -> Self {
        SetupError::Config(e)
    }
}

impl From<CompileError> for SetupError {
    fn from(e: CompileError) -> Self {
        SetupError::Compile(e)
    }
}

/// Wires agents, tools and routers into the compiled review graph.
pub struct GraphSetup {
    roster: AgentRoster,
    toolkit: Toolkit,
    config: PipelineConfig,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl GraphSetup {
    pub fn new(roster: AgentRoster, toolkit: Toolkit, config: PipelineConfig) -> Self {
        Self {
            roster,
            toolkit,
            config,
            event_handler: None,
        }
    }

    /// Receive events from the main graph, the debate graphs and every agent.
    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.roster.set_event_handler(handler.clone());
        self.event_handler = Some(handler);
        self
    }

    fn debate_controller(&self) -> Result<DebateController, CompileError> {
        let run_config = self.config.run_config();
        let mut graphs = Vec::with_capacity(2);
        for track in [DebateTrack::Feasibility, DebateTrack::Innovation] {
            let tools = self.toolkit.debate(track);
            let graph = build_debate_graph(
                track,
                self.roster.debate_agents(track, tools.clone()),
                tools,
                run_config,
                self.event_handler.clone(),
            )?;
            graphs.push(Arc::new(graph));
        }
        let innovation = graphs.pop().ok_or(CompileError::MissingEntryPoint)?;
        let feasibility = graphs.pop().ok_or(CompileError::MissingEntryPoint)?;

        Ok(
            DebateController::new(feasibility, innovation, self.config.max_debate_rounds, run_config)
                .with_max_concurrent_disciplines(self.config.max_concurrent_disciplines)
                .with_event_handler(self.event_handler.clone()),
        )
    }

    fn stage(&self, role: AgentRole, output: StageOutput) -> AgentNode {
        AgentNode::new(self.roster.agent(role, None), output)
    }

    fn add_analysis_stage(&self, graph: &mut StateGraph<ProposalState>, track: AnalysisTrack) {
        let tools = self.toolkit.analysis(track);
        let agent = self.roster.agent(AgentRole::Analyst(track), Some(tools.clone()));
        let agent_node = stage_agent_node(track);
        let tools_node = stage_tools_node(track);
        let trim_node = stage_trim_node(track);
        let next = match track.next() {
            Some(next) => stage_agent_node(next),
            None => DEBATE_CONTROLLER.to_string(),
        };

        graph
            .add_node(agent_node.clone(), AgentNode::new(agent, StageOutput::Report(track)))
            .add_node(tools_node.clone(), ToolNode::<ProposalState>::new(tools))
            .add_node(trim_node.clone(), MessageTrimNode::new(self.config.trim_keep_last))
            .add_conditional_edges(
                agent_node.clone(),
                route_stage,
                [
                    (outcome::FINALIZE, Target::node(next)),
                    (outcome::TOOLS, Target::node(tools_node.clone())),
                    (outcome::TRIM, Target::node(trim_node.clone())),
                ],
                outcome::TRIM,
            )
            .add_edge(tools_node, agent_node.clone())
            .add_edge(trim_node, agent_node);
    }

    fn add_parallel_analysts(&self, graph: &mut StateGraph<ProposalState>) {
        for track in AnalysisTrack::ALL {
            let tools = self.toolkit.analysis(track);
            let agent = self.roster.agent(AgentRole::Analyst(track), Some(tools));
            let name = parallel_analyst_node(track);
            graph
                .add_node(
                    name.clone(),
                    ParallelAnalystNode::new(agent, track, self.config.max_tool_iterations),
                )
                .add_edge(name, DEBATE_CONTROLLER);
        }
    }

    /// Validate the configuration and compile the graph.
    pub fn setup_graph(&self) -> Result<CompiledGraph<ProposalState>, SetupError> {
        self.config.validate()?;

        let mut graph = StateGraph::<ProposalState>::new(GRAPH_NAME);
        graph
            .add_node(
                INTENTION_NODE,
                self.stage(AgentRole::Intention, StageOutput::IntentionDecision),
            )
            .add_node(OUTPUT_NODE, self.stage(AgentRole::Output, StageOutput::FinalReport))
            .add_node(
                STRUCTURE_NODE,
                self.stage(AgentRole::Structure, StageOutput::ResearchStructure),
            )
            .add_node(
                PLANNING_NODE,
                self.stage(AgentRole::Planning, StageOutput::ExecutionPlan),
            )
            .add_node(DEBATE_CONTROLLER, self.debate_controller()?)
            .add_node(
                FINAL_ANALYST,
                self.stage(AgentRole::FinalAnalyst, StageOutput::FinalAnalysisSummary),
            )
            .add_node(
                REFLECTION,
                self.stage(AgentRole::Reflection, StageOutput::ReflectionDecision),
            )
            .add_node(HUMAN_REVIEW_NODE, HumanReviewNode)
            .add_node(
                FEEDBACK_ANALYSIS,
                self.stage(AgentRole::FeedbackAnalysis, StageOutput::FeedbackRoutingDecision),
            )
            .add_node(GENERATOR, self.stage(AgentRole::Generator, StageOutput::FinalReport));

        for track in AnalysisTrack::ALL {
            self.add_analysis_stage(&mut graph, track);
        }
        self.add_parallel_analysts(&mut graph);

        let mut after_planning = vec![(
            outcome::SEQUENTIAL.to_string(),
            Target::node(stage_agent_node(AnalysisTrack::Academic)),
        )];
        after_planning.extend(
            AnalysisTrack::ALL
                .iter()
                .map(|t| (t.as_str().to_string(), Target::node(parallel_analyst_node(*t)))),
        );

        let after_feedback = AnalysisTrack::ALL
            .iter()
            .map(|t| (stage_name(*t), Target::node(stage_agent_node(*t))))
            .chain([
                ("debate", Target::node(DEBATE_CONTROLLER)),
                (outcome::GENERATE, Target::node(GENERATOR)),
            ]);

        graph
            .set_entry_point(INTENTION_NODE)
            .add_conditional_edges(
                INTENTION_NODE,
                should_output,
                [
                    (outcome::OUTPUT, Target::node(OUTPUT_NODE)),
                    (outcome::STRUCTURE, Target::node(STRUCTURE_NODE)),
                ],
                outcome::STRUCTURE,
            )
            .add_edge(OUTPUT_NODE, END)
            .add_edge(STRUCTURE_NODE, PLANNING_NODE)
            .add_conditional_edges(
                PLANNING_NODE,
                route_after_planning(self.config.parallel_analysts),
                after_planning,
                outcome::SEQUENTIAL,
            )
            .add_fan_out(
                PLANNING_NODE,
                AnalysisTrack::ALL.iter().map(|t| t.as_str()),
                DEBATE_CONTROLLER,
            )
            .add_edge(DEBATE_CONTROLLER, FINAL_ANALYST)
            .add_edge(FINAL_ANALYST, REFLECTION)
            .add_conditional_edges(
                REFLECTION,
                route_after_reflection,
                [
                    (outcome::REVIEW, Target::node(HUMAN_REVIEW_NODE)),
                    (outcome::GENERATE, Target::node(GENERATOR)),
                ],
                outcome::GENERATE,
            )
            .interrupt_before(HUMAN_REVIEW_NODE)
            .add_edge(HUMAN_REVIEW_NODE, FEEDBACK_ANALYSIS)
            .add_conditional_edges(
                FEEDBACK_ANALYSIS,
                route_after_feedback,
                after_feedback,
                outcome::GENERATE,
            )
            .add_edge(GENERATOR, END)
            .set_run_config(self.config.run_config());

        let compiled = graph.compile()?;
        log::info!(
            "proposal graph ready: {} nodes, parallel analysts {}",
            compiled.node_names().len(),
            if self.config.parallel_analysts { "on" } else { "off" }
        );
        Ok(match &self.event_handler {
            Some(handler) => compiled.with_event_handler(handler.clone()),
            None => compiled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proposalgraph::client_wrapper::{AgentReply, ClientWrapper, Message};
    use crate::proposalgraph::tool_protocol::ToolMetadata;
    use async_trait::async_trait;

    struct Silent;

    #[async_trait]
    impl ClientWrapper for Silent {
        async fn send_message(
            &self,
            _messages: &[Message],
            _tools: Option<&[ToolMetadata]>,
        ) -> Result<AgentReply, Box<dyn Error + Send + Sync>> {
            Ok(AgentReply::text("FINALIZE"))
        }

        fn model_name(&self) -> &str {
            "silent"
        }
    }

    fn setup(config: PipelineConfig) -> GraphSetup {
        GraphSetup::new(AgentRoster::single(Arc::new(Silent)), Toolkit::new(), config)
    }

    #[test]
    fn topology_has_one_interrupt_and_the_feedback_table() {
        let graph = setup(PipelineConfig::default()).setup_graph().unwrap();
        assert_eq!(graph.entry_point(), INTENTION_NODE);
        assert_eq!(graph.interrupt_points().collect::<Vec<_>>(), vec![HUMAN_REVIEW_NODE]);

        let table = graph.route_table(FEEDBACK_ANALYSIS).unwrap();
        assert!(table.contains(&(
            "academic_analysis".to_string(),
            Target::node("academic_analysis_node")
        )));
        assert!(table.contains(&("debate".to_string(), Target::node(DEBATE_CONTROLLER))));
        assert!(table.contains(&("generate".to_string(), Target::node(GENERATOR))));

        assert_eq!(
            graph.successors("interdisciplinary_node"),
            vec![
                Target::node(DEBATE_CONTROLLER),
                Target::node("interdisciplinary_tools"),
                Target::node("interdisciplinary_trim"),
            ]
        );
    }

    #[test]
    fn invalid_config_is_rejected() {
        let err = setup(PipelineConfig {
            max_debate_rounds: 0,
            ..PipelineConfig::default()
        })
        .setup_graph()
        .err()
        .unwrap();
        assert!(matches!(err, SetupError::Config(_)));
    }

    #[test]
    fn planning_router_switches_on_config() {
        let state = ProposalState::default();
        assert_eq!(
            route_after_planning(false)(&state),
            Ok(RouteDecision::single(outcome::SEQUENTIAL))
        );
        match route_after_planning(true)(&state) {
            Ok(RouteDecision::Parallel(outcomes)) => assert_eq!(outcomes.len(), 4),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn feedback_router_rejects_unknown_targets() {
        let mut state = ProposalState::default();
        state
            .message_log
            .push(Message::agent("feedback_analysis", "{\"next_step\": \"budget\"}"));
        assert!(matches!(
            route_after_feedback(&state),
            Err(RoutingError::InvalidTarget { .. })
        ));
    }
}

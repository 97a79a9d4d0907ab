//! Which client, prompt and tools each pipeline role gets.
//!
//! Roles are served by one of two clients: a quick model for high-volume turn
//! taking (stage loops, debate turns) and a deep model for the steps that
//! weigh everything produced so far (planning, judging, synthesis,
//! reflection, report generation). Individual roles can be pointed at another
//! client, and any role's default prompt can be replaced.

use crate::proposalgraph::agent::Agent;
use crate::proposalgraph::client_wrapper::ClientWrapper;
use crate::proposalgraph::debate::DebateAgents;
use crate::proposalgraph::event::EventHandler;
use crate::proposalgraph::prompts;
use crate::proposalgraph::state::{AnalysisTrack, DebateSide, DebateTrack};
use crate::proposalgraph::tool_protocol::ToolRegistry;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Every LLM-backed role in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentRole {
    Intention,
    Output,
    Structure,
    Planning,
    Analyst(AnalysisTrack),
    Debater(DebateTrack, DebateSide),
    Judge(DebateTrack),
    FinalAnalyst,
    Reflection,
    FeedbackAnalysis,
    Generator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    Quick,
    Deep,
}

impl AgentRole {
    pub fn tier(&self) -> ModelTier {
        match self {
            AgentRole::Planning
            | AgentRole::Judge(_)
            | AgentRole::FinalAnalyst
            | AgentRole::Reflection
            | AgentRole::Generator => ModelTier::Deep,
            _ => ModelTier::Quick,
        }
    }

    /// Message author name for this role.
    pub fn id(&self) -> String {
        match self {
            AgentRole::Intention => "intention".to_string(),
            AgentRole::Output => "output".to_string(),
            AgentRole::Structure => "structure".to_string(),
            AgentRole::Planning => "planning".to_string(),
            AgentRole::Analyst(track) => format!("{}_analyst", track),
            AgentRole::Debater(track, side) => format!("{}_{}", track, side.as_str()),
            AgentRole::Judge(track) => format!("{}_judge", track),
            AgentRole::FinalAnalyst => "final_analyst".to_string(),
            AgentRole::Reflection => "reflection".to_string(),
            AgentRole::FeedbackAnalysis => "feedback_analysis".to_string(),
            AgentRole::Generator => "generator".to_string(),
        }
    }

    fn display_name(&self) -> String {
        match self {
            AgentRole::Intention => "the Intention Analyst".to_string(),
            AgentRole::Output => "the Direct Responder".to_string(),
            AgentRole::Structure => "the Proposal Structure Extractor".to_string(),
            AgentRole::Planning => "the Review Planner".to_string(),
            AgentRole::Analyst(track) => format!("the {} Analyst", title_case(track.as_str())),
            AgentRole::Debater(track, side) => format!(
                "the {} {}",
                title_case(track.as_str()),
                title_case(side.as_str())
            ),
            AgentRole::Judge(track) => format!("the {} Judge", title_case(track.as_str())),
            AgentRole::FinalAnalyst => "the Final Analyst".to_string(),
            AgentRole::Reflection => "the Reflection Reviewer".to_string(),
            AgentRole::FeedbackAnalysis => "the Feedback Analyst".to_string(),
            AgentRole::Generator => "the Report Writer".to_string(),
        }
    }

    fn default_prompt(&self) -> String {
        match self {
            AgentRole::Intention => prompts::INTENTION.to_string(),
            AgentRole::Output => prompts::OUTPUT.to_string(),
            AgentRole::Structure => prompts::STRUCTURE.to_string(),
            AgentRole::Planning => prompts::PLANNING.to_string(),
            AgentRole::Analyst(track) => prompts::analysis(*track),
            AgentRole::Debater(track, side) => prompts::debater(*track, *side),
            AgentRole::Judge(track) => prompts::judge(*track),
            AgentRole::FinalAnalyst => prompts::FINAL_ANALYST.to_string(),
            AgentRole::Reflection => prompts::REFLECTION.to_string(),
            AgentRole::FeedbackAnalysis => prompts::FEEDBACK_ANALYSIS.to_string(),
            AgentRole::Generator => prompts::GENERATOR.to_string(),
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}

fn title_case(snake: &str) -> String {
    snake
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Clients and prompts for every [`AgentRole`].
#[derive(Clone)]
pub struct AgentRoster {
    quick_think_llm: Arc<dyn ClientWrapper>,
    deep_think_llm: Arc<dyn ClientWrapper>,
    clients: HashMap<AgentRole, Arc<dyn ClientWrapper>>,
    prompts: HashMap<AgentRole, String>,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl AgentRoster {
    pub fn new(
        quick_think_llm: Arc<dyn ClientWrapper>,
        deep_think_llm: Arc<dyn ClientWrapper>,
    ) -> Self {
        Self {
            quick_think_llm,
            deep_think_llm,
            clients: HashMap::new(),
            prompts: HashMap::new(),
            event_handler: None,
        }
    }

    /// One client for every role.
    pub fn single(client: Arc<dyn ClientWrapper>) -> Self {
        Self::new(client.clone(), client)
    }

    pub fn with_client(mut self, role: AgentRole, client: Arc<dyn ClientWrapper>) -> Self {
        self.clients.insert(role, client);
        self
    }

    pub fn with_prompt(mut self, role: AgentRole, prompt: impl Into<String>) -> Self {
        self.prompts.insert(role, prompt.into());
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    pub fn set_event_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.event_handler = Some(handler);
    }

    pub fn client_for(&self, role: AgentRole) -> Arc<dyn ClientWrapper> {
        if let Some(client) = self.clients.get(&role) {
            return client.clone();
        }
        match role.tier() {
            ModelTier::Quick => self.quick_think_llm.clone(),
            ModelTier::Deep => self.deep_think_llm.clone(),
        }
    }

    pub fn prompt_for(&self, role: AgentRole) -> String {
        self.prompts
            .get(&role)
            .cloned()
            .unwrap_or_else(|| role.default_prompt())
    }

    /// Build the agent for `role`, equipped with `tools` if given.
    pub fn agent(&self, role: AgentRole, tools: Option<Arc<ToolRegistry>>) -> Arc<Agent> {
        let mut agent = Agent::new(role.id(), role.display_name(), self.client_for(role))
            .with_system_prompt(self.prompt_for(role))
            .with_metadata("role", role.id());
        if let Some(tools) = tools {
            agent = agent.with_tools(tools);
        }
        if let Some(handler) = &self.event_handler {
            agent.set_event_handler(handler.clone());
        }
        log::debug!(
            "built agent '{}' on model '{}'",
            agent.id,
            agent.client().model_name()
        );
        Arc::new(agent)
    }

    /// Proponent, opponent and judge for one debate track.
    pub fn debate_agents(&self, track: DebateTrack, tools: Arc<ToolRegistry>) -> DebateAgents {
        DebateAgents {
            proponent: self.agent(
                AgentRole::Debater(track, DebateSide::Proponent),
                Some(tools.clone()),
            ),
            opponent: self.agent(AgentRole::Debater(track, DebateSide::Opponent), Some(tools)),
            judge: self.agent(AgentRole::Judge(track), None),
        }
    }
}

/// Tool registries per analysis stage and per debate track.
///
/// Every slot starts empty. An empty registry means the stage's agents are
/// not offered tools and its tool node never has work.
#[derive(Clone, Default)]
pub struct Toolkit {
    pub academic: Arc<ToolRegistry>,
    pub social: Arc<ToolRegistry>,
    pub future_influence: Arc<ToolRegistry>,
    pub interdisciplinary: Arc<ToolRegistry>,
    pub feasibility: Arc<ToolRegistry>,
    pub innovation: Arc<ToolRegistry>,
}

impl Toolkit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_analysis_tools(mut self, track: AnalysisTrack, registry: ToolRegistry) -> Self {
        let registry = Arc::new(registry);
        match track {
            AnalysisTrack::Academic => self.academic = registry,
            AnalysisTrack::Social => self.social = registry,
            AnalysisTrack::FutureInfluence => self.future_influence = registry,
            AnalysisTrack::Interdisciplinary => self.interdisciplinary = registry,
        }
        self
    }

    pub fn with_debate_tools(mut self, track: DebateTrack, registry: ToolRegistry) -> Self {
        let registry = Arc::new(registry);
        match track {
            DebateTrack::Feasibility => self.feasibility = registry,
            DebateTrack::Innovation => self.innovation = registry,
        }
        self
    }

    pub fn analysis(&self, track: AnalysisTrack) -> Arc<ToolRegistry> {
        match track {
            AnalysisTrack::Academic => self.academic.clone(),
            AnalysisTrack::Social => self.social.clone(),
            AnalysisTrack::FutureInfluence => self.future_influence.clone(),
            AnalysisTrack::Interdisciplinary => self.interdisciplinary.clone(),
        }
    }

    pub fn debate(&self, track: DebateTrack) -> Arc<ToolRegistry> {
        match track {
            DebateTrack::Feasibility => self.feasibility.clone(),
            DebateTrack::Innovation => self.innovation.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proposalgraph::client_wrapper::{AgentReply, Message};
    use crate::proposalgraph::tool_protocol::ToolMetadata;
    use async_trait::async_trait;
    use std::error::Error;

    struct Named(&'static str);

    #[async_trait]
    impl ClientWrapper for Named {
        async fn send_message(
            &self,
            _messages: &[Message],
            _tools: Option<&[ToolMetadata]>,
        ) -> Result<AgentReply, Box<dyn Error + Send + Sync>> {
            Ok(AgentReply::text(self.0))
        }

        fn model_name(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn tiers_pick_clients_and_overrides_win() {
        let roster = AgentRoster::new(Arc::new(Named("quick")), Arc::new(Named("deep")))
            .with_client(AgentRole::Reflection, Arc::new(Named("special")));

        let analyst = AgentRole::Analyst(AnalysisTrack::Social);
        assert_eq!(roster.client_for(analyst).model_name(), "quick");
        assert_eq!(roster.client_for(AgentRole::Generator).model_name(), "deep");
        assert_eq!(roster.client_for(AgentRole::Reflection).model_name(), "special");
    }

    #[test]
    fn role_ids_and_prompt_overrides() {
        let roster = AgentRoster::single(Arc::new(Named("m")))
            .with_prompt(AgentRole::Output, "Answer in one sentence.");
        assert_eq!(
            AgentRole::Debater(DebateTrack::Innovation, DebateSide::Opponent).id(),
            "innovation_opponent"
        );
        assert_eq!(AgentRole::Analyst(AnalysisTrack::FutureInfluence).id(), "future_influence_analyst");
        assert_eq!(roster.prompt_for(AgentRole::Output), "Answer in one sentence.");
        assert!(roster.prompt_for(AgentRole::Reflection).contains("recommendation"));

        let judge = roster.agent(AgentRole::Judge(DebateTrack::Feasibility), None);
        assert_eq!(judge.name, "the Feasibility Judge");
        assert!(judge.tools().is_none());
    }

    #[test]
    fn toolkit_slots_start_empty() {
        let kit = Toolkit::new().with_debate_tools(DebateTrack::Innovation, ToolRegistry::empty());
        assert!(kit.analysis(AnalysisTrack::Academic).is_empty());
        assert!(kit.debate(DebateTrack::Innovation).is_empty());
    }
}

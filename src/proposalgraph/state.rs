//! Shared run state and how it evolves.
//!
//! Nodes never mutate state directly. They receive a `&S` snapshot and return
//! a delta; the engine merges deltas with [`GraphState::merge`]. When several
//! branches run in parallel their deltas are checked against each other first:
//! a field with a single declared writer may only be written by one branch per
//! fan-out, while the message log is append-only and concatenated in branch
//! declaration order.
//!
//! ```text
//! ProposalState ──snapshot──► Node::run ──► StateDelta ──merge──► ProposalState
//! ```

use crate::proposalgraph::client_wrapper::Message;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;

/// State threaded through a compiled graph.
pub trait GraphState:
    Clone + Send + Sync + fmt::Debug + Serialize + DeserializeOwned + 'static
{
    /// What a node returns.
    type Delta: Send + Default + fmt::Debug + 'static;

    /// Fold one delta into the state.
    fn merge(&mut self, delta: Self::Delta) -> Result<(), MergeError>;

    /// Names of single-writer fields the delta writes.
    ///
    /// The engine rejects a parallel join in which two branches report the
    /// same name.
    fn exclusive_writes(_delta: &Self::Delta) -> Vec<String> {
        Vec::new()
    }
}

/// States that carry a role-tagged message log routers can inspect.
pub trait MessageState: GraphState {
    fn message_log(&self) -> &[Message];

    /// A delta that only appends `messages`.
    fn delta_appending(messages: Vec<Message>) -> Self::Delta;

    fn last_message(&self) -> Option<&Message> {
        self.message_log().last()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MergeError {
    /// Two branches of the same fan-out wrote one single-writer field.
    ConflictingWrite {
        field: String,
        first: String,
        second: String,
    },
    /// A delta cannot be applied to this state.
    Rejected(String),
}

impl fmt::Display for MergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeError::ConflictingWrite {
                field,
                first,
                second,
            } => write!(
                f,
                "Conflicting writes to '{}' from parallel nodes '{}' and '{}'",
                field, first, second
            ),
            MergeError::Rejected(msg) => write!(f, "Delta rejected: {}", msg),
        }
    }
}

impl Error for MergeError {}

/// Named analysis report slots, one per sequential analysis stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisTrack {
    Academic,
    Social,
    FutureInfluence,
    Interdisciplinary,
}

impl AnalysisTrack {
    /// Stage order.
    pub const ALL: [AnalysisTrack; 4] = [
        AnalysisTrack::Academic,
        AnalysisTrack::Social,
        AnalysisTrack::FutureInfluence,
        AnalysisTrack::Interdisciplinary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisTrack::Academic => "academic",
            AnalysisTrack::Social => "social",
            AnalysisTrack::FutureInfluence => "future_influence",
            AnalysisTrack::Interdisciplinary => "interdisciplinary",
        }
    }

    /// The stage that runs after this one, if any.
    pub fn next(&self) -> Option<AnalysisTrack> {
        match self {
            AnalysisTrack::Academic => Some(AnalysisTrack::Social),
            AnalysisTrack::Social => Some(AnalysisTrack::FutureInfluence),
            AnalysisTrack::FutureInfluence => Some(AnalysisTrack::Interdisciplinary),
            AnalysisTrack::Interdisciplinary => None,
        }
    }
}

impl fmt::Display for AnalysisTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two debates held for every discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebateTrack {
    Feasibility,
    Innovation,
}

impl DebateTrack {
    pub fn as_str(&self) -> &'static str {
        match self {
            DebateTrack::Feasibility => "feasibility",
            DebateTrack::Innovation => "innovation",
        }
    }
}

impl fmt::Display for DebateTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebateSide {
    Proponent,
    Opponent,
}

impl DebateSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            DebateSide::Proponent => "proponent",
            DebateSide::Opponent => "opponent",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            DebateSide::Proponent => "Proponent",
            DebateSide::Opponent => "Opponent",
        }
    }
}

impl fmt::Display for DebateSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transcript and verdict of one debate (one discipline, one track).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebateState {
    pub proponent_history: Vec<String>,
    pub opponent_history: Vec<String>,
    /// Interleaved transcript in turn order, each entry prefixed with its side.
    pub full_history: Vec<String>,
    /// Completed turns, both sides counted.
    pub round_count: usize,
    pub judge_summary: String,
}

impl DebateState {
    /// Record one completed turn.
    pub fn record_turn(&mut self, side: DebateSide, argument: String) {
        self.full_history
            .push(format!("{}: {}", side.label(), argument));
        match side {
            DebateSide::Proponent => self.proponent_history.push(argument),
            DebateSide::Opponent => self.opponent_history.push(argument),
        }
        self.round_count += 1;
    }

    /// Side expected to speak next.
    pub fn next_speaker(&self) -> DebateSide {
        if self.round_count % 2 == 0 {
            DebateSide::Proponent
        } else {
            DebateSide::Opponent
        }
    }

    pub fn is_judged(&self) -> bool {
        !self.judge_summary.is_empty()
    }
}

/// Both debates for one discipline. Never partially populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisciplineDebate {
    pub discipline: String,
    pub feasibility: DebateState,
    pub innovation: DebateState,
}

impl DisciplineDebate {
    pub fn track(&self, track: DebateTrack) -> &DebateState {
        match track {
            DebateTrack::Feasibility => &self.feasibility,
            DebateTrack::Innovation => &self.innovation,
        }
    }

    /// `{discipline: {"feasibility": ..., "innovation": ...}}`
    pub fn as_mapping(&self) -> serde_json::Value {
        let mut tracks = serde_json::Map::new();
        tracks.insert(
            DebateTrack::Feasibility.as_str().to_string(),
            serde_json::to_value(&self.feasibility).unwrap_or(serde_json::Value::Null),
        );
        tracks.insert(
            DebateTrack::Innovation.as_str().to_string(),
            serde_json::to_value(&self.innovation).unwrap_or(serde_json::Value::Null),
        );
        let mut outer = serde_json::Map::new();
        outer.insert(self.discipline.clone(), serde_json::Value::Object(tracks));
        serde_json::Value::Object(outer)
    }
}

/// The record threaded through the proposal pipeline.
///
/// Maps are ordered so serialisation (and therefore checkpoint digests) is
/// deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProposalState {
    pub message_log: Vec<Message>,
    pub research_topic: String,
    pub intention_decision: String,
    pub research_structure: String,
    pub execution_plan: String,
    pub analysis_reports: BTreeMap<AnalysisTrack, String>,
    pub interdisciplinary_results: Vec<String>,
    /// Scratch field, only meaningful inside one debate scope.
    pub current_discipline: String,
    pub debate_results: Vec<DisciplineDebate>,
    pub final_analysis_summary: String,
    pub reflection_decision: String,
    pub human_feedback: String,
    pub feedback_routing_decision: String,
    pub final_report: String,
}

impl ProposalState {
    pub fn report(&self, track: AnalysisTrack) -> Option<&str> {
        self.analysis_reports.get(&track).map(String::as_str)
    }
}

/// Removes the middle of the message log, keeping its head and tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Compaction {
    pub retain_head: usize,
    pub retain_tail: usize,
}

impl Compaction {
    /// Apply to `log`. Returns how many entries were removed.
    ///
    /// The removed span is replaced by one system entry noting its size.
    pub fn apply(&self, log: &mut Vec<Message>) -> usize {
        let keep = self.retain_head + self.retain_tail;
        if log.len() <= keep {
            return 0;
        }
        let removed = log.len() - keep;
        let tail = log.split_off(log.len() - self.retain_tail);
        log.truncate(self.retain_head);
        log.push(Message::system(format!(
            "[{} earlier messages compacted]",
            removed
        )));
        log.extend(tail);
        removed
    }
}

/// A node's contribution to [`ProposalState`].
///
/// `None` leaves a field untouched; `Some` overwrites it. `messages` are
/// appended after any `compaction` is applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateDelta {
    pub messages: Vec<Message>,
    pub compaction: Option<Compaction>,
    pub research_topic: Option<String>,
    pub intention_decision: Option<String>,
    pub research_structure: Option<String>,
    pub execution_plan: Option<String>,
    pub analysis_reports: BTreeMap<AnalysisTrack, String>,
    pub interdisciplinary_results: Option<Vec<String>>,
    pub current_discipline: Option<String>,
    pub debate_results: Option<Vec<DisciplineDebate>>,
    pub final_analysis_summary: Option<String>,
    pub reflection_decision: Option<String>,
    pub human_feedback: Option<String>,
    pub feedback_routing_decision: Option<String>,
    pub final_report: Option<String>,
}

impl StateDelta {
    pub fn message(message: Message) -> Self {
        Self {
            messages: vec![message],
            ..Self::default()
        }
    }

    pub fn with_report(mut self, track: AnalysisTrack, report: impl Into<String>) -> Self {
        self.analysis_reports.insert(track, report.into());
        self
    }

    /// Delta carrying reviewer input for a suspended run.
    pub fn human_feedback(feedback: impl Into<String>) -> Self {
        let feedback = feedback.into();
        Self {
            messages: vec![Message::human(feedback.clone()).with_name("human_reviewer")],
            human_feedback: Some(feedback),
            ..Self::default()
        }
    }

    /// Fields of [`ProposalState`] this delta writes.
    pub fn written_fields(&self) -> Vec<StateField> {
        let mut fields = Vec::new();
        if !self.messages.is_empty() {
            fields.push(StateField::MessageLog);
        }
        if self.compaction.is_some() {
            fields.push(StateField::MessageCompaction);
        }
        let scalars = [
            (self.research_topic.is_some(), StateField::ResearchTopic),
            (self.intention_decision.is_some(), StateField::IntentionDecision),
            (self.research_structure.is_some(), StateField::ResearchStructure),
            (self.execution_plan.is_some(), StateField::ExecutionPlan),
            (
                self.interdisciplinary_results.is_some(),
                StateField::InterdisciplinaryResults,
            ),
            (self.current_discipline.is_some(), StateField::CurrentDiscipline),
            (self.debate_results.is_some(), StateField::DebateResults),
            (
                self.final_analysis_summary.is_some(),
                StateField::FinalAnalysisSummary,
            ),
            (self.reflection_decision.is_some(), StateField::ReflectionDecision),
            (self.human_feedback.is_some(), StateField::HumanFeedback),
            (
                self.feedback_routing_decision.is_some(),
                StateField::FeedbackRoutingDecision,
            ),
            (self.final_report.is_some(), StateField::FinalReport),
        ];
        fields.extend(scalars.into_iter().filter(|(set, _)| *set).map(|(_, f)| f));
        fields.extend(self.analysis_reports.keys().map(|t| StateField::AnalysisReport(*t)));
        fields
    }
}

/// Addressable fields of [`ProposalState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateField {
    MessageLog,
    MessageCompaction,
    ResearchTopic,
    IntentionDecision,
    ResearchStructure,
    ExecutionPlan,
    AnalysisReport(AnalysisTrack),
    InterdisciplinaryResults,
    CurrentDiscipline,
    DebateResults,
    FinalAnalysisSummary,
    ReflectionDecision,
    HumanFeedback,
    FeedbackRoutingDecision,
    FinalReport,
}

/// Who may write a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOwnership {
    /// Exactly one stage writes it; overwrite on merge.
    SingleWriter { writer: &'static str },
    /// Any node may append; concurrent appends are concatenated in branch order.
    AppendOnly,
}

impl StateField {
    pub fn ownership(&self) -> FieldOwnership {
        use FieldOwnership::*;
        match self {
            StateField::MessageLog => AppendOnly,
            StateField::MessageCompaction => SingleWriter {
                writer: "message trimming",
            },
            StateField::ResearchTopic => SingleWriter {
                writer: "create_initial_state",
            },
            StateField::IntentionDecision => SingleWriter {
                writer: "intention_node",
            },
            StateField::ResearchStructure => SingleWriter {
                writer: "structure_node",
            },
            StateField::ExecutionPlan => SingleWriter {
                writer: "planning_node",
            },
            StateField::AnalysisReport(AnalysisTrack::Academic) => SingleWriter {
                writer: "academic analysis",
            },
            StateField::AnalysisReport(AnalysisTrack::Social) => SingleWriter {
                writer: "social analysis",
            },
            StateField::AnalysisReport(AnalysisTrack::FutureInfluence) => SingleWriter {
                writer: "future influence analysis",
            },
            StateField::AnalysisReport(AnalysisTrack::Interdisciplinary)
            | StateField::InterdisciplinaryResults => SingleWriter {
                writer: "interdisciplinary analysis",
            },
            StateField::CurrentDiscipline | StateField::DebateResults => SingleWriter {
                writer: "debate_controller",
            },
            StateField::FinalAnalysisSummary => SingleWriter {
                writer: "final_analyst",
            },
            StateField::ReflectionDecision => SingleWriter {
                writer: "reflection",
            },
            StateField::HumanFeedback => SingleWriter {
                writer: "human_review_node",
            },
            StateField::FeedbackRoutingDecision => SingleWriter {
                writer: "feedback_analysis",
            },
            StateField::FinalReport => SingleWriter {
                writer: "report generation",
            },
        }
    }
}

impl fmt::Display for StateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateField::MessageLog => f.write_str("message_log"),
            StateField::MessageCompaction => f.write_str("message_log.compaction"),
            StateField::ResearchTopic => f.write_str("research_topic"),
            StateField::IntentionDecision => f.write_str("intention_decision"),
            StateField::ResearchStructure => f.write_str("research_structure"),
            StateField::ExecutionPlan => f.write_str("execution_plan"),
            StateField::AnalysisReport(track) => write!(f, "analysis_reports.{}", track),
            StateField::InterdisciplinaryResults => f.write_str("interdisciplinary_results"),
            StateField::CurrentDiscipline => f.write_str("current_discipline"),
            StateField::DebateResults => f.write_str("debate_results"),
            StateField::FinalAnalysisSummary => f.write_str("final_analysis_summary"),
            StateField::ReflectionDecision => f.write_str("reflection_decision"),
            StateField::HumanFeedback => f.write_str("human_feedback"),
            StateField::FeedbackRoutingDecision => f.write_str("feedback_routing_decision"),
            StateField::FinalReport => f.write_str("final_report"),
        }
    }
}

fn overwrite(slot: &mut String, value: Option<String>) {
    if let Some(value) = value {
        *slot = value;
    }
}

impl GraphState for ProposalState {
    type Delta = StateDelta;

    fn merge(&mut self, delta: StateDelta) -> Result<(), MergeError> {
        if let Some(compaction) = delta.compaction {
            let removed = compaction.apply(&mut self.message_log);
            log::debug!("compacted {} message log entries", removed);
        }
        self.message_log.extend(delta.messages);

        overwrite(&mut self.research_topic, delta.research_topic);
        overwrite(&mut self.intention_decision, delta.intention_decision);
        overwrite(&mut self.research_structure, delta.research_structure);
        overwrite(&mut self.execution_plan, delta.execution_plan);
        self.analysis_reports.extend(delta.analysis_reports);
        if let Some(results) = delta.interdisciplinary_results {
            self.interdisciplinary_results = results;
        }
        overwrite(&mut self.current_discipline, delta.current_discipline);
        if let Some(results) = delta.debate_results {
            self.debate_results = results;
        }
        overwrite(&mut self.final_analysis_summary, delta.final_analysis_summary);
        overwrite(&mut self.reflection_decision, delta.reflection_decision);
        overwrite(&mut self.human_feedback, delta.human_feedback);
        overwrite(
            &mut self.feedback_routing_decision,
            delta.feedback_routing_decision,
        );
        overwrite(&mut self.final_report, delta.final_report);
        Ok(())
    }

    fn exclusive_writes(delta: &StateDelta) -> Vec<String> {
        delta
            .written_fields()
            .into_iter()
            .filter(|f| matches!(f.ownership(), FieldOwnership::SingleWriter { .. }))
            .map(|f| f.to_string())
            .collect()
    }
}

impl MessageState for ProposalState {
    fn message_log(&self) -> &[Message] {
        &self.message_log
    }

    fn delta_appending(messages: Vec<Message>) -> StateDelta {
        StateDelta {
            messages,
            ..StateDelta::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_appends_messages_and_overwrites_scalars() {
        let mut state = ProposalState::default();
        state.research_structure = "old".into();

        state
            .merge(StateDelta {
                messages: vec![Message::agent("structure", "outline")],
                research_structure: Some("new".into()),
                ..StateDelta::default()
            })
            .unwrap();

        assert_eq!(state.message_log.len(), 1);
        assert_eq!(state.research_structure, "new");
        assert!(state.execution_plan.is_empty());
    }

    #[test]
    fn compaction_keeps_head_and_tail() {
        let mut log: Vec<Message> = (0..10).map(|i| Message::human(i.to_string())).collect();
        let removed = Compaction {
            retain_head: 1,
            retain_tail: 3,
        }
        .apply(&mut log);

        assert_eq!(removed, 6);
        let contents: Vec<&str> = log.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(
            contents,
            vec!["0", "[6 earlier messages compacted]", "7", "8", "9"]
        );
    }

    #[test]
    fn short_log_is_not_compacted() {
        let mut log = vec![Message::human("a"), Message::human("b")];
        let removed = Compaction {
            retain_head: 1,
            retain_tail: 4,
        }
        .apply(&mut log);
        assert_eq!(removed, 0);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn message_appends_are_not_exclusive() {
        let delta = StateDelta::message(Message::human("x")).with_report(AnalysisTrack::Social, "r");
        let exclusive = ProposalState::exclusive_writes(&delta);
        assert_eq!(exclusive, vec!["analysis_reports.social".to_string()]);
    }

    #[test]
    fn debate_turns_alternate_and_count() {
        let mut debate = DebateState::default();
        assert_eq!(debate.next_speaker(), DebateSide::Proponent);
        debate.record_turn(DebateSide::Proponent, "viable".into());
        debate.record_turn(DebateSide::Opponent, "too costly".into());

        assert_eq!(debate.round_count, 2);
        assert_eq!(debate.next_speaker(), DebateSide::Proponent);
        assert_eq!(debate.full_history[1], "Opponent: too costly");
        assert_eq!(debate.opponent_history, vec!["too costly".to_string()]);
    }

    #[test]
    fn discipline_mapping_shape() {
        let entry = DisciplineDebate {
            discipline: "Biology".into(),
            feasibility: DebateState::default(),
            innovation: DebateState::default(),
        };
        let mapping = entry.as_mapping();
        assert!(mapping["Biology"]["feasibility"].is_object());
        assert!(mapping["Biology"]["innovation"].is_object());
    }

    #[test]
    fn state_serializes_deterministically() {
        let mut state = ProposalState::default();
        state
            .analysis_reports
            .insert(AnalysisTrack::Social, "s".into());
        state
            .analysis_reports
            .insert(AnalysisTrack::Academic, "a".into());
        let a = serde_json::to_string(&state).unwrap();
        let b = serde_json::to_string(&state.clone()).unwrap();
        assert_eq!(a, b);
        assert!(a.find("academic").unwrap() < a.find("social").unwrap());
    }
}

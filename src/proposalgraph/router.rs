//! Routing predicates.
//!
//! Every function here reads state and returns an outcome label. None of them
//! mutate anything or perform I/O. Predicates over free text (finalize signals,
//! pending tool calls) cannot fail. Predicates over structured recommendations
//! return [`RoutingError`] on malformed input; the graph maps that error to the
//! edge's fallback outcome and logs it.

use crate::proposalgraph::client_wrapper::Message;
use std::error::Error;
use std::fmt;

/// Tokens that end an analysis stage or a debate.
pub const FINALIZE_TOKENS: &[&str] = &[
    "<FINALIZE>",
    "FINALIZE",
    "DONE",
    "完成",
    "结束",
    "生成报告",
    "生成结果",
];

/// Tokens that make the intention stage skip straight to output.
pub const DIRECT_OUTPUT_TOKENS: &[&str] = &[
    "<FINALIZE>",
    "FINALIZE",
    "DONE",
    "完成",
    "直接输出",
    "生成结果",
    "生成报告",
];

/// Targets the feedback analysis stage may send a resumed run to.
pub const FEEDBACK_TARGETS: &[&str] = &[
    "academic_analysis",
    "social_analysis",
    "future_influence",
    "interdisciplinary",
    "debate",
    "generate",
];

/// Outcome labels used on conditional edges.
pub mod outcome {
    pub const FINALIZE: &str = "finalize";
    pub const TOOLS: &str = "tools";
    pub const TRIM: &str = "trim";
    pub const CONTINUE: &str = "continue";
    pub const END: &str = "end";
    pub const OUTPUT: &str = "output";
    pub const STRUCTURE: &str = "structure";
    pub const GENERATE: &str = "generate";
    pub const REVIEW: &str = "review";
    pub const SEQUENTIAL: &str = "sequential";
}

/// A router's decision: one outcome, or several outcomes whose targets run
/// concurrently on the same snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    Single(String),
    Parallel(Vec<String>),
}

impl RouteDecision {
    pub fn single(outcome: impl Into<String>) -> Self {
        RouteDecision::Single(outcome.into())
    }

    pub fn outcomes(&self) -> Vec<&str> {
        match self {
            RouteDecision::Single(o) => vec![o.as_str()],
            RouteDecision::Parallel(os) => os.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RoutingError {
    /// No message to inspect.
    EmptyLog,
    /// The latest entry is not a JSON object.
    MalformedRecommendation(String),
    /// The object lacks the key the router needs.
    MissingKey(&'static str),
    /// The value is not one of the permitted targets.
    InvalidTarget { key: &'static str, value: String },
}

impl fmt::Display for RoutingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingError::EmptyLog => write!(f, "Message log is empty"),
            RoutingError::MalformedRecommendation(msg) => {
                write!(f, "Malformed recommendation: {}", msg)
            }
            RoutingError::MissingKey(key) => write!(f, "Recommendation is missing '{}'", key),
            RoutingError::InvalidTarget { key, value } => {
                write!(f, "Invalid value '{}' for '{}'", value, key)
            }
        }
    }
}

impl Error for RoutingError {}

/// Case-insensitive substring test for any of `tokens` in `text`.
pub fn contains_signal(text: &str, tokens: &[&str]) -> bool {
    let upper = text.to_uppercase();
    tokens
        .iter()
        .any(|token| upper.contains(&token.to_uppercase()))
}

pub fn is_finalize_signal(text: &str) -> bool {
    contains_signal(text, FINALIZE_TOKENS)
}

/// True when the entry carries pending tool invocations.
pub fn has_pending_tool_calls(message: &Message) -> bool {
    message.has_tool_calls()
}

/// Three-way stage outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Finalize,
    Tools,
    Trim,
}

impl StageOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            StageOutcome::Finalize => outcome::FINALIZE,
            StageOutcome::Tools => outcome::TOOLS,
            StageOutcome::Trim => outcome::TRIM,
        }
    }
}

/// Finalize beats tool calls, tool calls beat trimming.
///
/// An empty log trims, which loops back into the stage's agent.
pub fn stage_outcome(last: Option<&Message>) -> StageOutcome {
    match last {
        Some(msg) if is_finalize_signal(&msg.content) => StageOutcome::Finalize,
        Some(msg) if has_pending_tool_calls(msg) => StageOutcome::Tools,
        _ => StageOutcome::Trim,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebateOutcome {
    /// Switch speaker.
    Continue,
    /// Go to the judge.
    End,
    /// Run the speaker's tools, then return to the same speaker.
    Tools,
}

impl DebateOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            DebateOutcome::Continue => outcome::CONTINUE,
            DebateOutcome::End => outcome::END,
            DebateOutcome::Tools => outcome::TOOLS,
        }
    }
}

/// Round cap first, then the stage priority order.
pub fn debate_outcome(round_count: usize, turn_cap: usize, last: Option<&Message>) -> DebateOutcome {
    if round_count >= turn_cap {
        return DebateOutcome::End;
    }
    match stage_outcome(last) {
        StageOutcome::Finalize => DebateOutcome::End,
        StageOutcome::Tools => DebateOutcome::Tools,
        StageOutcome::Trim => DebateOutcome::Continue,
    }
}

/// `output` when the latest entry asks to skip analysis, `structure` otherwise.
pub fn intention_outcome(last: Option<&Message>) -> &'static str {
    match last {
        Some(msg) if contains_signal(&msg.content, DIRECT_OUTPUT_TOKENS) => outcome::OUTPUT,
        _ => outcome::STRUCTURE,
    }
}

/// Find the first balanced `{...}` block in `text`.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Structured recommendation carried by `message`.
///
/// A native payload wins. Otherwise the content must be a JSON object, either
/// alone or embedded in prose.
pub fn recommendation_payload(message: &Message) -> Result<serde_json::Value, RoutingError> {
    if let Some(payload) = &message.payload {
        return if payload.is_object() {
            Ok(payload.clone())
        } else {
            Err(RoutingError::MalformedRecommendation(
                "payload is not an object".into(),
            ))
        };
    }

    let content = message.content.trim();
    let parsed = serde_json::from_str::<serde_json::Value>(content).or_else(|first_err| {
        extract_json_object(content)
            .ok_or_else(|| RoutingError::MalformedRecommendation(first_err.to_string()))
            .and_then(|fragment| {
                serde_json::from_str(fragment)
                    .map_err(|e| RoutingError::MalformedRecommendation(e.to_string()))
            })
    })?;

    if parsed.is_object() {
        Ok(parsed)
    } else {
        Err(RoutingError::MalformedRecommendation(
            "expected a JSON object".into(),
        ))
    }
}

fn string_key(
    payload: &serde_json::Value,
    key: &'static str,
) -> Result<String, RoutingError> {
    match payload.get(key) {
        None | Some(serde_json::Value::Null) => Err(RoutingError::MissingKey(key)),
        Some(serde_json::Value::String(s)) => Ok(s.trim().to_lowercase()),
        Some(other) => Err(RoutingError::InvalidTarget {
            key,
            value: other.to_string(),
        }),
    }
}

/// Reads `{"recommendation": "generate" | "review"}`.
pub fn reflection_outcome(last: Option<&Message>) -> Result<&'static str, RoutingError> {
    let payload = recommendation_payload(last.ok_or(RoutingError::EmptyLog)?)?;
    let value = string_key(&payload, "recommendation")?;
    match value.as_str() {
        "review" => Ok(outcome::REVIEW),
        "generate" => Ok(outcome::GENERATE),
        _ => Err(RoutingError::InvalidTarget {
            key: "recommendation",
            value,
        }),
    }
}

/// Reads `{"next_step": ...}` and checks it against [`FEEDBACK_TARGETS`].
pub fn feedback_outcome(last: Option<&Message>) -> Result<&'static str, RoutingError> {
    let payload = recommendation_payload(last.ok_or(RoutingError::EmptyLog)?)?;
    let value = string_key(&payload, "next_step")?;
    FEEDBACK_TARGETS
        .iter()
        .find(|target| **target == value)
        .copied()
        .ok_or(RoutingError::InvalidTarget {
            key: "next_step",
            value,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proposalgraph::tool_protocol::ToolCall;

    fn with_tool_call(content: &str) -> Message {
        Message::agent("a", content).with_tool_calls(vec![ToolCall::new(
            "search",
            serde_json::json!({}),
        )])
    }

    #[test]
    fn finalize_matches_case_insensitively() {
        assert!(is_finalize_signal("We are done."));
        assert!(is_finalize_signal("<finalize>"));
        assert!(is_finalize_signal("分析完成"));
        assert!(is_finalize_signal("请生成报告"));
        assert!(!is_finalize_signal("the project was abandoned"));
        assert!(!is_finalize_signal("keep going"));
    }

    #[test]
    fn finalize_beats_tool_calls() {
        let msg = with_tool_call("FINALIZE now");
        assert_eq!(stage_outcome(Some(&msg)), StageOutcome::Finalize);
        let msg = with_tool_call("searching");
        assert_eq!(stage_outcome(Some(&msg)), StageOutcome::Tools);
        assert_eq!(
            stage_outcome(Some(&Message::agent("a", "thinking"))),
            StageOutcome::Trim
        );
        assert_eq!(stage_outcome(None), StageOutcome::Trim);
    }

    #[test]
    fn debate_cap_dominates() {
        let plain = Message::agent("p", "another argument");
        assert_eq!(debate_outcome(2, 2, Some(&plain)), DebateOutcome::End);
        assert_eq!(
            debate_outcome(2, 2, Some(&with_tool_call("x"))),
            DebateOutcome::End
        );
        assert_eq!(debate_outcome(1, 2, Some(&plain)), DebateOutcome::Continue);
        assert_eq!(
            debate_outcome(0, 2, Some(&Message::agent("p", "DONE"))),
            DebateOutcome::End
        );
    }

    #[test]
    fn intention_direct_output() {
        assert_eq!(
            intention_outcome(Some(&Message::agent("i", "直接输出"))),
            outcome::OUTPUT
        );
        assert_eq!(
            intention_outcome(Some(&Message::agent("i", "needs analysis"))),
            outcome::STRUCTURE
        );
    }

    #[test]
    fn reflection_parses_embedded_json() {
        let msg = Message::agent("r", "Verdict: {\"recommendation\": \"Review\"}");
        assert_eq!(reflection_outcome(Some(&msg)), Ok(outcome::REVIEW));
    }

    #[test]
    fn reflection_rejects_non_json() {
        let msg = Message::agent("r", "I think it is fine");
        assert!(matches!(
            reflection_outcome(Some(&msg)),
            Err(RoutingError::MalformedRecommendation(_))
        ));
        assert_eq!(reflection_outcome(None), Err(RoutingError::EmptyLog));
    }

    #[test]
    fn feedback_validates_allow_list() {
        let ok = Message::agent("f", "{\"next_step\": \"academic_analysis\"}");
        assert_eq!(feedback_outcome(Some(&ok)), Ok("academic_analysis"));

        let bad = Message::agent("f", "{\"next_step\": \"rm -rf\"}");
        assert!(matches!(
            feedback_outcome(Some(&bad)),
            Err(RoutingError::InvalidTarget { .. })
        ));

        let missing = Message::agent("f", "{\"other\": 1}");
        assert_eq!(
            feedback_outcome(Some(&missing)),
            Err(RoutingError::MissingKey("next_step"))
        );
    }

    #[test]
    fn payload_wins_over_content() {
        let msg = Message::agent("f", "free text")
            .with_payload(serde_json::json!({"next_step": "debate"}));
        assert_eq!(feedback_outcome(Some(&msg)), Ok("debate"));
    }

    #[test]
    fn extract_handles_braces_in_strings() {
        let text = "x {\"a\": \"}{\", \"b\": {\"c\": 1}} y";
        assert_eq!(
            extract_json_object(text),
            Some("{\"a\": \"}{\", \"b\": {\"c\": 1}}")
        );
    }
}

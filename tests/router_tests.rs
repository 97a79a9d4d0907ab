use proposalgraph::client_wrapper::Message;
use proposalgraph::router::{
    debate_outcome, feedback_outcome, intention_outcome, outcome, reflection_outcome,
    stage_outcome, DebateOutcome, RoutingError, StageOutcome, FEEDBACK_TARGETS, FINALIZE_TOKENS,
};
use proposalgraph::tool_protocol::ToolCall;

fn requesting_tools(content: &str) -> Message {
    Message::agent("analyst", content).with_tool_calls(vec![ToolCall::new(
        "scholar_search",
        serde_json::json!({"q": "soil"}),
    )])
}

#[test]
fn test_finalize_wins_over_tool_calls_for_every_token() {
    for token in FINALIZE_TOKENS {
        for variant in [token.to_string(), token.to_lowercase()] {
            let content = format!("The report is complete. {}", variant);
            let msg = requesting_tools(&content);
            assert_eq!(
                stage_outcome(Some(&msg)),
                StageOutcome::Finalize,
                "token {:?}",
                variant
            );
            assert_eq!(debate_outcome(0, 4, Some(&msg)), DebateOutcome::End);
        }
    }
}

#[test]
fn test_stage_priority_tools_then_trim() {
    let tools = requesting_tools("Looking up citations");
    assert_eq!(stage_outcome(Some(&tools)), StageOutcome::Tools);
    assert_eq!(stage_outcome(Some(&tools)).label(), outcome::TOOLS);

    let plain = Message::agent("analyst", "Half way through the methods section.");
    assert_eq!(stage_outcome(Some(&plain)), StageOutcome::Trim);
    assert_eq!(stage_outcome(None), StageOutcome::Trim);
}

#[test]
fn test_finalize_matches_inside_longer_words() {
    for content in ["Analysis FINALIZED.", "ANALYSIS_DONE", "status:done_ok", "Report finalized, see above."] {
        let msg = Message::agent("analyst", content);
        assert_eq!(stage_outcome(Some(&msg)), StageOutcome::Finalize, "{:?}", content);
        assert_eq!(debate_outcome(0, 4, Some(&msg)), DebateOutcome::End);
    }
    let msg = Message::agent("analyst", "Half way through the budget section.");
    assert_eq!(stage_outcome(Some(&msg)), StageOutcome::Trim);
}

#[test]
fn test_round_cap_dominates_everything() {
    let plain = Message::agent("opponent", "I disagree with that estimate.");
    let tools = requesting_tools("Need more data");
    for cap in [2, 4, 6] {
        assert_eq!(debate_outcome(cap - 1, cap, Some(&plain)), DebateOutcome::Continue);
        assert_eq!(debate_outcome(cap, cap, Some(&plain)), DebateOutcome::End);
        assert_eq!(debate_outcome(cap, cap, Some(&tools)), DebateOutcome::End);
        assert_eq!(debate_outcome(cap + 3, cap, None), DebateOutcome::End);
    }
    assert_eq!(debate_outcome(1, 2, Some(&tools)), DebateOutcome::Tools);
}

#[test]
fn test_intention_tokens() {
    let direct = Message::agent("intention", "简单问候，直接输出");
    assert_eq!(intention_outcome(Some(&direct)), outcome::OUTPUT);
    let full = Message::agent("intention", "Needs structure extraction and planning.");
    assert_eq!(intention_outcome(Some(&full)), outcome::STRUCTURE);
    assert_eq!(intention_outcome(None), outcome::STRUCTURE);
}

#[test]
fn test_reflection_parsing() {
    let embedded = Message::agent(
        "reflection",
        "Scores below.\n```json\n{\"confidence_score\": 85, \"recommendation\": \"Generate\"}\n```",
    );
    assert_eq!(reflection_outcome(Some(&embedded)), Ok(outcome::GENERATE));

    let structured = Message::agent("reflection", "")
        .with_payload(serde_json::json!({"recommendation": "review"}));
    assert_eq!(reflection_outcome(Some(&structured)), Ok(outcome::REVIEW));

    let prose = Message::agent("reflection", "Looks fine to me.");
    assert!(matches!(
        reflection_outcome(Some(&prose)),
        Err(RoutingError::MalformedRecommendation(_))
    ));

    let missing = Message::agent("reflection", "{\"confidence_score\": 40}");
    assert_eq!(
        reflection_outcome(Some(&missing)),
        Err(RoutingError::MissingKey("recommendation"))
    );
    assert_eq!(reflection_outcome(None), Err(RoutingError::EmptyLog));
}

#[test]
fn test_feedback_allow_list() {
    for target in FEEDBACK_TARGETS {
        let msg = Message::agent("feedback_analysis", format!("{{\"next_step\": \"{}\"}}", target));
        assert_eq!(feedback_outcome(Some(&msg)), Ok(*target));
    }

    let invalid = Message::agent("feedback_analysis", "{\"next_step\": \"delete_everything\"}");
    assert_eq!(
        feedback_outcome(Some(&invalid)),
        Err(RoutingError::InvalidTarget {
            key: "next_step",
            value: "delete_everything".to_string()
        })
    );

    let wrong_type = Message::agent("feedback_analysis", "{\"next_step\": 3}");
    assert!(matches!(
        feedback_outcome(Some(&wrong_type)),
        Err(RoutingError::InvalidTarget { .. })
    ));
}

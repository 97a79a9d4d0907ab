use async_trait::async_trait;
use proposalgraph::config::RunConfig;
use proposalgraph::engine::{RunError, RunOutcome};
use proposalgraph::event::{EventHandler, GraphEvent};
use proposalgraph::graph::{CompileError, FnNode, Node, StateGraph, Target, END};
use proposalgraph::router::{RouteDecision, RoutingError};
use proposalgraph::state::{AnalysisTrack, MergeError, ProposalState, StateDelta};
use std::error::Error;
use std::sync::{Arc, Mutex};

/// Writes one analysis report.
struct Report(AnalysisTrack, &'static str);

#[async_trait]
impl Node<ProposalState> for Report {
    async fn run(&self, _state: &ProposalState) -> Result<StateDelta, Box<dyn Error + Send + Sync>> {
        Ok(StateDelta::default().with_report(self.0, self.1))
    }
}

/// Writes `final_report`.
struct Final(&'static str);

#[async_trait]
impl Node<ProposalState> for Final {
    async fn run(&self, _state: &ProposalState) -> Result<StateDelta, Box<dyn Error + Send + Sync>> {
        Ok(StateDelta {
            final_report: Some(self.0.to_string()),
            ..StateDelta::default()
        })
    }
}

fn fan_out_all(_state: &ProposalState) -> Result<RouteDecision, RoutingError> {
    Ok(RouteDecision::Parallel(vec!["a".into(), "b".into()]))
}

#[tokio::test]
async fn test_parallel_branches_merge_into_one_snapshot() {
    let mut graph = StateGraph::<ProposalState>::new("fan");
    graph
        .add_node("start", Final(""))
        .add_node("academic", Report(AnalysisTrack::Academic, "rigorous"))
        .add_node("social", Report(AnalysisTrack::Social, "broad"))
        .add_node("join", Final("joined"))
        .set_entry_point("start")
        .add_conditional_edges(
            "start",
            fan_out_all,
            [("a", Target::node("academic")), ("b", Target::node("social"))],
            "a",
        )
        .add_fan_out("start", ["a", "b"], "join")
        .add_edge("academic", "join")
        .add_edge("social", "join")
        .add_edge("join", END);

    let outcome = graph.compile().unwrap().invoke(ProposalState::default()).await.unwrap();
    assert_eq!(outcome.trace(), ["start", "academic", "social", "join"]);
    let state = outcome.state();
    assert_eq!(state.report(AnalysisTrack::Academic), Some("rigorous"));
    assert_eq!(state.report(AnalysisTrack::Social), Some("broad"));
    assert_eq!(state.final_report, "joined");
}

#[tokio::test]
async fn test_parallel_branches_writing_same_field_conflict() {
    let mut graph = StateGraph::<ProposalState>::new("clash");
    graph
        .add_node("start", Final(""))
        .add_node("left", Final("left"))
        .add_node("right", Final("right"))
        .add_node("join", Final("joined"))
        .set_entry_point("start")
        .add_conditional_edges(
            "start",
            fan_out_all,
            [("a", Target::node("left")), ("b", Target::node("right"))],
            "a",
        )
        .add_fan_out("start", ["a", "b"], "join")
        .add_edge("left", "join")
        .add_edge("right", "join")
        .add_edge("join", END);

    match graph.compile().unwrap().invoke(ProposalState::default()).await {
        Err(RunError::MergeConflict {
            source: MergeError::ConflictingWrite { field, first, second },
            state,
            ..
        }) => {
            assert_eq!(field, "final_report");
            assert_eq!(first, "left");
            assert_eq!(second, "right");
            // Neither branch was merged.
            assert!(state.final_report.is_empty());
        }
        other => panic!("expected merge conflict, got {:?}", other.map(|o| o.trace().to_vec())),
    }
}

#[tokio::test]
async fn test_cycle_without_exit_hits_recursion_limit() {
    let mut graph = StateGraph::<ProposalState>::new("loop");
    graph
        .add_node("ping", Final("ping"))
        .add_node("pong", Final("pong"))
        .set_entry_point("ping")
        .add_edge("ping", "pong")
        .add_edge("pong", "ping");
    let compiled = graph.compile().unwrap();

    let err = compiled
        .invoke_with(ProposalState::default(), &RunConfig { recursion_limit: 5 }, None)
        .await
        .err()
        .unwrap();
    match err {
        RunError::RecursionLimitExceeded {
            limit,
            next,
            state,
            trace,
        } => {
            assert_eq!(limit, 5);
            assert_eq!(next, "pong");
            assert_eq!(trace.len(), 5);
            assert_eq!(state.final_report, "ping");
        }
        other => panic!("expected recursion limit, got {}", other),
    }
}

#[tokio::test]
async fn test_unmapped_outcome_is_unresolvable() {
    let mut graph = StateGraph::<ProposalState>::new("stray");
    graph
        .add_node("only", Final("x"))
        .set_entry_point("only")
        .add_conditional_edges(
            "only",
            |_state: &ProposalState| Ok(RouteDecision::single("elsewhere")),
            [("done", Target::End)],
            "done",
        );

    let err = graph
        .compile()
        .unwrap()
        .invoke(ProposalState::default())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, RunError::UnresolvableRoute { ref from, .. } if from == "only"));
    assert_eq!(err.state().final_report, "x");
    assert_eq!(err.trace(), ["only"]);
}

#[tokio::test]
async fn test_router_error_takes_fallback_and_is_reported() {
    #[derive(Default)]
    struct Fallbacks(Mutex<Vec<String>>);

    #[async_trait]
    impl EventHandler for Fallbacks {
        async fn on_graph_event(&self, event: &GraphEvent) {
            if let GraphEvent::RoutingFallback { fallback, .. } = event {
                self.0.lock().unwrap().push(fallback.clone());
            }
        }
    }

    let mut graph = StateGraph::<ProposalState>::new("fallback");
    graph
        .add_node("decide", Final("maybe"))
        .add_node("generate", Final("generated"))
        .add_node("review", Final("reviewed"))
        .set_entry_point("decide")
        .add_conditional_edges(
            "decide",
            |_state: &ProposalState| Err(RoutingError::MalformedRecommendation("not json".into())),
            [
                ("generate", Target::node("generate")),
                ("review", Target::node("review")),
            ],
            "generate",
        )
        .add_edge("generate", END)
        .add_edge("review", END);

    let events = Arc::new(Fallbacks::default());
    let compiled = graph.compile().unwrap().with_event_handler(events.clone());
    let outcome = compiled.invoke(ProposalState::default()).await.unwrap();

    assert_eq!(outcome.state().final_report, "generated");
    assert_eq!(*events.0.lock().unwrap(), vec!["generate".to_string()]);
}

#[tokio::test]
async fn test_interrupt_suspends_and_resume_runs_pending_node() {
    let mut graph = StateGraph::<ProposalState>::new("review");
    graph
        .add_node("draft", Final("draft"))
        .add_node(
            "review",
            FnNode::new(|state: ProposalState| async move {
                Ok(StateDelta {
                    final_report: Some(format!("{} + {}", state.final_report, state.human_feedback)),
                    ..StateDelta::default()
                })
            }),
        )
        .set_entry_point("draft")
        .add_edge("draft", "review")
        .add_edge("review", END)
        .interrupt_before("review");
    let compiled = graph.compile().unwrap();

    let RunOutcome::Suspended {
        state,
        checkpoint,
        trace,
    } = compiled.invoke(ProposalState::default()).await.unwrap()
    else {
        panic!("expected suspension");
    };
    assert_eq!(trace, vec!["draft"]);
    assert_eq!(checkpoint.pending_node, "review");
    assert_eq!(checkpoint.steps_taken, 1);

    let done = compiled
        .resume(state, &checkpoint, StateDelta::human_feedback("cite more"))
        .await
        .unwrap();
    assert_eq!(done.trace(), ["review"]);
    assert_eq!(done.state().final_report, "draft + cite more");
}

#[test]
fn test_compile_rejects_broken_topologies() {
    let mut unknown = StateGraph::<ProposalState>::new("g");
    unknown
        .add_node("a", Final("a"))
        .set_entry_point("a")
        .add_edge("a", "missing");
    assert!(matches!(
        unknown.compile().err(),
        Some(CompileError::UnknownNode { ref name, .. }) if name == "missing"
    ));

    let mut no_edge = StateGraph::<ProposalState>::new("g");
    no_edge.add_node("a", Final("a")).set_entry_point("a");
    assert_eq!(no_edge.compile().err(), Some(CompileError::MissingEdge("a".into())));

    let mut bad_fallback = StateGraph::<ProposalState>::new("g");
    bad_fallback
        .add_node("a", Final("a"))
        .set_entry_point("a")
        .add_conditional_edges(
            "a",
            |_state: &ProposalState| Ok(RouteDecision::single("x")),
            [("x", Target::End)],
            "generate",
        );
    assert!(matches!(
        bad_fallback.compile().err(),
        Some(CompileError::InvalidFallback { .. })
    ));

    let mut no_join = StateGraph::<ProposalState>::new("g");
    no_join
        .add_node("a", Final("a"))
        .add_node("b", Final("b"))
        .add_node("c", Final("c"))
        .set_entry_point("a")
        .add_conditional_edges(
            "a",
            fan_out_all,
            [("a", Target::node("b")), ("b", Target::node("c"))],
            "a",
        )
        .add_fan_out("a", ["a", "b"], END)
        .add_edge("b", END)
        .add_edge("c", "b");
    assert_eq!(
        no_join.compile().err(),
        Some(CompileError::ParallelWithoutJoin {
            from: "a".into(),
            branch: "c".into()
        })
    );

    let mut bad_interrupt = StateGraph::<ProposalState>::new("g");
    bad_interrupt
        .add_node("a", Final("a"))
        .set_entry_point("a")
        .add_edge("a", END)
        .interrupt_before("human");
    assert_eq!(
        bad_interrupt.compile().err(),
        Some(CompileError::InvalidInterrupt("human".into()))
    );

    let mut zero = StateGraph::<ProposalState>::new("g");
    zero.add_node("a", Final("a"))
        .set_entry_point("a")
        .add_edge("a", END)
        .set_run_config(RunConfig { recursion_limit: 0 });
    assert_eq!(zero.compile().err(), Some(CompileError::ZeroRecursionLimit));
}

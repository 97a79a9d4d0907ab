//! Run entry: the initial state and the invocation arguments.

use crate::proposalgraph::client_wrapper::Message;
use crate::proposalgraph::config::RunConfig;
use crate::proposalgraph::state::ProposalState;

/// Builds the state a run starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Propagator {
    recursion_limit: usize,
}

impl Default for Propagator {
    fn default() -> Self {
        Self::new(RunConfig::default().recursion_limit)
    }
}

impl Propagator {
    pub fn new(recursion_limit: usize) -> Self {
        Self { recursion_limit }
    }

    /// A fresh state for `prompt`.
    ///
    /// Deterministic in its inputs. The message log holds exactly one human
    /// turn naming the request and the focus areas, `research_topic` holds the
    /// same text, and every other field is empty.
    pub fn create_initial_state(&self, prompt: &str, interests: &[&str]) -> ProposalState {
        let request = format!(
            "User request: {}\nFocus areas: {}",
            prompt.trim(),
            interests.join(", ")
        );
        ProposalState {
            message_log: vec![Message::human(request.clone())],
            research_topic: request,
            ..ProposalState::default()
        }
    }

    pub fn graph_args(&self) -> RunConfig {
        RunConfig {
            recursion_limit: self.recursion_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_seeds_one_turn() {
        let state = Propagator::default().create_initial_state("find grants on X", &["academic"]);
        assert_eq!(state.message_log.len(), 1);
        let seed = &state.message_log[0].content;
        assert!(seed.contains('X'));
        assert!(seed.contains("academic"));
        assert!(state.analysis_reports.is_empty());
        assert!(state.debate_results.is_empty());
        assert!(state.final_report.is_empty());
    }

    #[test]
    fn graph_args_carry_the_limit() {
        assert_eq!(Propagator::new(42).graph_args().recursion_limit, 42);
    }
}

//! Configuration for the proposal pipeline.
//!
//! Like the rest of the crate, configuration is a plain struct the caller
//! builds however it wants. No file formats are parsed here.
//!
//! ```rust
//! use proposalgraph::config::PipelineConfig;
//!
//! let config = PipelineConfig {
//!     max_debate_rounds: 2,
//!     parallel_analysts: true,
//!     ..PipelineConfig::default()
//! };
//! assert!(config.validate().is_ok());
//! assert_eq!(config.debate_turn_cap(), 4);
//! ```

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

/// Run invocation arguments handed to a compiled graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Maximum node visits per `invoke` / `resume` call.
    pub recursion_limit: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            recursion_limit: 100,
        }
    }
}

/// Knobs for the assembled proposal pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Debate rounds per side. A debate ends after at most twice this many turns.
    pub max_debate_rounds: usize,
    /// Node-visit ceiling for the top-level graph and for each debate sub-graph.
    pub recursion_limit: usize,
    /// Entries kept at the tail of the message log by trimming nodes.
    pub trim_keep_last: usize,
    /// Take the parallel analyst fan-out after planning instead of the
    /// sequential stages.
    pub parallel_analysts: bool,
    /// Disciplines debated at the same time. `1` processes them strictly in order.
    pub max_concurrent_disciplines: usize,
    /// Tool round-trips a self-contained analyst may make before it must answer.
    pub max_tool_iterations: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_debate_rounds: 1,
            recursion_limit: 100,
            trim_keep_last: 4,
            parallel_analysts: false,
            max_concurrent_disciplines: 1,
            max_tool_iterations: 5,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_debate_rounds == 0 {
            return Err(ConfigError::Invalid(
                "max_debate_rounds must be at least 1".into(),
            ));
        }
        if self.recursion_limit == 0 {
            return Err(ConfigError::Invalid("recursion_limit must be at least 1".into()));
        }
        if self.max_concurrent_disciplines == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_disciplines must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Total turns (both sides) after which a debate is forced to the judge.
    pub fn debate_turn_cap(&self) -> usize {
        self.max_debate_rounds * 2
    }

    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            recursion_limit: self.recursion_limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.run_config().recursion_limit, 100);
    }

    #[test]
    fn zero_debate_rounds_rejected() {
        let config = PipelineConfig {
            max_debate_rounds: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}

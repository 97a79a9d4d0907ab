//! Per-discipline debate fan-out and fan-in.
//!
//! For every discipline in `interdisciplinary_results` the controller makes a
//! private copy of the run state, sets `current_discipline`, seeds the copy's
//! message log with `Starting debates for discipline: <name>`, and runs the
//! feasibility and innovation debates on it concurrently. Both must finish;
//! if either fails the pair fails and the error names the discipline and
//! track.
//!
//! Disciplines are processed in order. With `max_concurrent_disciplines > 1`
//! several disciplines are in flight at once, but results are still collected
//! in input order, so `debate_results[i]` always belongs to
//! `interdisciplinary_results[i]`.

use crate::proposalgraph::client_wrapper::Message;
use crate::proposalgraph::config::RunConfig;
use crate::proposalgraph::debate::{run_debate, DebateScope};
use crate::proposalgraph::engine::{CompiledGraph, RunError};
use crate::proposalgraph::event::{EventHandler, GraphEvent};
use crate::proposalgraph::graph::Node;
use crate::proposalgraph::state::{
    DebateState, DebateTrack, DisciplineDebate, ProposalState, StateDelta,
};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt, TryStreamExt};
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// A debate that did not reach a verdict.
#[derive(Debug)]
pub struct DebateError {
    pub discipline: String,
    pub track: DebateTrack,
    pub source: RunError<DebateScope>,
}

impl fmt::Display for DebateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} debate for discipline '{}' failed: {}",
            self.track, self.discipline, self.source
        )
    }
}

impl Error for DebateError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.source)
    }
}

/// Runs both debate graphs for every discipline.
pub struct DebateController {
    feasibility: Arc<CompiledGraph<DebateScope>>,
    innovation: Arc<CompiledGraph<DebateScope>>,
    max_rounds: usize,
    max_concurrent_disciplines: usize,
    run_config: RunConfig,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl DebateController {
    pub fn new(
        feasibility: Arc<CompiledGraph<DebateScope>>,
        innovation: Arc<CompiledGraph<DebateScope>>,
        max_rounds: usize,
        run_config: RunConfig,
    ) -> Self {
        Self {
            feasibility,
            innovation,
            max_rounds,
            max_concurrent_disciplines: 1,
            run_config,
            event_handler: None,
        }
    }

    pub fn with_max_concurrent_disciplines(mut self, limit: usize) -> Self {
        self.max_concurrent_disciplines = limit.max(1);
        self
    }

    pub fn with_event_handler(mut self, handler: Option<Arc<dyn EventHandler>>) -> Self {
        self.event_handler = handler;
        self
    }

    fn graph(&self, track: DebateTrack) -> &CompiledGraph<DebateScope> {
        match track {
            DebateTrack::Feasibility => &self.feasibility,
            DebateTrack::Innovation => &self.innovation,
        }
    }

    async fn emit(&self, event: GraphEvent) {
        if let Some(handler) = &self.event_handler {
            handler.on_graph_event(&event).await;
        }
    }

    async fn run_track(
        &self,
        scoped: &ProposalState,
        discipline: &str,
        track: DebateTrack,
    ) -> Result<DebateState, DebateError> {
        self.emit(GraphEvent::DebateStarted {
            discipline: discipline.to_string(),
            track: track.as_str().to_string(),
        })
        .await;

        let scope = DebateScope::new(scoped.clone(), track, self.max_rounds);
        let (debate, trace) = run_debate(self.graph(track), scope, &self.run_config)
            .await
            .map_err(|source| {
                log::error!(
                    "{} debate for '{}' failed: {}",
                    track,
                    discipline,
                    source
                );
                DebateError {
                    discipline: discipline.to_string(),
                    track,
                    source,
                }
            })?;

        log::debug!(
            "{} debate for '{}' finished after {} turns ({} nodes)",
            track,
            discipline,
            debate.round_count,
            trace.len()
        );
        self.emit(GraphEvent::DebateJudged {
            discipline: discipline.to_string(),
            track: track.as_str().to_string(),
            round_count: debate.round_count,
        })
        .await;
        Ok(debate)
    }

    /// Both debates for one discipline, on a private copy of `state`.
    pub async fn run_discipline(
        &self,
        state: &ProposalState,
        discipline: &str,
    ) -> Result<DisciplineDebate, DebateError> {
        let mut scoped = state.clone();
        scoped.current_discipline = discipline.to_string();
        scoped.message_log.push(Message::system(format!(
            "Starting debates for discipline: {}",
            discipline
        )));

        let (feasibility, innovation) = tokio::try_join!(
            self.run_track(&scoped, discipline, DebateTrack::Feasibility),
            self.run_track(&scoped, discipline, DebateTrack::Innovation),
        )?;

        Ok(DisciplineDebate {
            discipline: discipline.to_string(),
            feasibility,
            innovation,
        })
    }

    /// One entry per discipline, in input order.
    pub async fn run_all(&self, state: &ProposalState) -> Result<Vec<DisciplineDebate>, DebateError> {
        let pending: Vec<_> = state
            .interdisciplinary_results
            .iter()
            .map(|discipline| self.run_discipline(state, discipline))
            .collect();
        stream::iter(pending)
            .buffered(self.max_concurrent_disciplines)
            .try_collect()
            .await
    }
}

#[async_trait]
impl Node<ProposalState> for DebateController {
    async fn run(
        &self,
        state: &ProposalState,
    ) -> Result<StateDelta, Box<dyn Error + Send + Sync>> {
        if state.interdisciplinary_results.is_empty() {
            log::warn!("no disciplines identified, skipping debates");
        }
        let results = self.run_all(state).await?;
        log::info!("debates completed for {} disciplines", results.len());

        let names: Vec<&str> = results.iter().map(|r| r.discipline.as_str()).collect();
        let note = Message::system(format!(
            "Debates completed for {} disciplines: {}",
            results.len(),
            names.join(", ")
        ));
        Ok(StateDelta {
            messages: vec![note],
            debate_results: Some(results),
            ..StateDelta::default()
        })
    }
}

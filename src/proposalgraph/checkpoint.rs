//! Suspension markers for interrupted runs.
//!
//! When a compiled graph reaches a node declared with
//! [`interrupt_before`](crate::graph::StateGraph::interrupt_before) it stops and
//! hands back the state together with a [`Checkpoint`]. The checkpoint names
//! the pending node and pins the exact state it was taken from with a SHA-256
//! digest of the state's JSON form, so a resume against a different or
//! modified state is rejected.
//!
//! [`SuspendedRun`] bundles both for storage between processes:
//!
//! ```rust
//! use proposalgraph::checkpoint::{Checkpoint, SuspendedRun};
//! use proposalgraph::state::ProposalState;
//!
//! # fn main() -> std::io::Result<()> {
//! let dir = tempfile::tempdir()?;
//! let path = dir.path().join("run.json");
//!
//! let state = ProposalState::default();
//! let checkpoint = Checkpoint::capture("proposal", "run-1", "human_review_node", &state, 12)?;
//! SuspendedRun::new(checkpoint, state).save(&path)?;
//!
//! let restored: SuspendedRun<ProposalState> = SuspendedRun::load(&path)?;
//! assert!(restored.checkpoint.matches(&restored.state));
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::Path;
use uuid::Uuid;

/// SHA-256 over the state's JSON encoding, lowercase hex.
pub fn state_digest<S: Serialize>(state: &S) -> io::Result<String> {
    let bytes = serde_json::to_vec(state)
        .map_err(|e| io::Error::other(format!("Failed to serialize state: {}", e)))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Marker identifying where a suspended run will continue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub run_id: String,
    pub graph: String,
    /// Node that runs first on resume.
    pub pending_node: String,
    pub created_at: DateTime<Utc>,
    pub state_digest: String,
    /// Node visits spent before suspending.
    pub steps_taken: usize,
}

impl Checkpoint {
    pub fn capture<S: Serialize>(
        graph: &str,
        run_id: &str,
        pending_node: &str,
        state: &S,
        steps_taken: usize,
    ) -> io::Result<Self> {
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            graph: graph.to_string(),
            pending_node: pending_node.to_string(),
            created_at: Utc::now(),
            state_digest: state_digest(state)?,
            steps_taken,
        })
    }

    /// True when `state` is byte-for-byte the state this checkpoint was taken from.
    pub fn matches<S: Serialize>(&self, state: &S) -> bool {
        state_digest(state)
            .map(|digest| digest == self.state_digest)
            .unwrap_or(false)
    }
}

/// A checkpoint with its state, persisted as one JSON document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspendedRun<S> {
    pub checkpoint: Checkpoint,
    pub state: S,
}

impl<S: Serialize + DeserializeOwned> SuspendedRun<S> {
    pub fn new(checkpoint: Checkpoint, state: S) -> Self {
        Self { checkpoint, state }
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::other(format!("Failed to serialize suspended run: {}", e)))?;
        fs::write(path, json)
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        let json = fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Failed to parse suspended run: {}", e),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proposalgraph::client_wrapper::Message;
    use crate::proposalgraph::state::ProposalState;

    #[test]
    fn digest_tracks_state_changes() {
        let mut state = ProposalState::default();
        let checkpoint = Checkpoint::capture("g", "r", "review", &state, 3).unwrap();
        assert!(checkpoint.matches(&state));
        assert_eq!(checkpoint.state_digest.len(), 64);

        state.message_log.push(Message::human("tampered"));
        assert!(!checkpoint.matches(&state));
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("run.json");

        let mut state = ProposalState::default();
        state.research_topic = "coral reef restoration".into();
        let checkpoint = Checkpoint::capture("proposal", "run-7", "human_review_node", &state, 9)
            .unwrap();
        SuspendedRun::new(checkpoint.clone(), state.clone())
            .save(&path)
            .unwrap();

        let loaded: SuspendedRun<ProposalState> = SuspendedRun::load(&path).unwrap();
        assert_eq!(loaded.checkpoint, checkpoint);
        assert_eq!(loaded.state, state);
        assert!(loaded.checkpoint.matches(&loaded.state));
    }

    #[test]
    fn load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "not json").unwrap();
        let err = SuspendedRun::<ProposalState>::load(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}

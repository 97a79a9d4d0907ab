// src/proposalgraph/mod.rs

pub mod agent;
pub mod checkpoint;
pub mod client_wrapper;
pub mod config;
pub mod debate;
pub mod debate_controller;
pub mod engine;
pub mod event;
pub mod graph;
pub mod nodes;
pub mod pipeline;
pub mod prompts;
pub mod propagation;
pub mod proposal_graph;
pub mod roster;
pub mod router;
pub mod state;
pub mod tool_protocol;
pub mod tool_protocols;

pub use proposal_graph::ProposalGraph;

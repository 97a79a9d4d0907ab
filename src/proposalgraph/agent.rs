//! LLM-backed agents used by stage and debate nodes.
//!
//! An [`Agent`] pairs an identity (name, expertise, personality) and a system
//! prompt with a [`ClientWrapper`] and, optionally, the [`ToolRegistry`] of the
//! stage it serves. It holds no conversation state: callers pass the relevant
//! slice of the run's message log on every call.
//!
//! Two entry points are provided:
//!
//! - [`Agent::invoke`] makes exactly one backend call. Pending tool calls are
//!   returned to the caller, which in a graph means the router sends the run to
//!   the stage's tool node.
//! - [`Agent::run_with_tools`] executes tool calls itself, up to a fixed number
//!   of round-trips. Parallel analysts use it because they cannot loop through
//!   graph edges.
//!
//! Providers without native tool calling may ask for a tool in plain text with
//! `{"tool_call": {"name": "...", "parameters": {...}}}`. Such fragments are
//! lifted into structured [`ToolCall`]s.
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use proposalgraph::agent::Agent;
//! use proposalgraph::client_wrapper::{AgentReply, ClientWrapper, Message};
//! use proposalgraph::tool_protocol::ToolMetadata;
//! use std::error::Error;
//! use std::sync::Arc;
//!
//! struct Fixed;
//!
//! #[async_trait]
//! impl ClientWrapper for Fixed {
//!     async fn send_message(
//!         &self,
//!         _messages: &[Message],
//!         _tools: Option<&[ToolMetadata]>,
//!     ) -> Result<AgentReply, Box<dyn Error + Send + Sync>> {
//!         Ok(AgentReply::text("The methodology section is thin. FINALIZE"))
//!     }
//!     fn model_name(&self) -> &str {
//!         "fixed"
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
//! let agent = Agent::new("academic", "Academic Analyst", Arc::new(Fixed))
//!     .with_expertise("Research methodology")
//!     .with_system_prompt("Assess the academic merit of the proposal.");
//!
//! let reply = agent.invoke(None, &[Message::human("Review this proposal")]).await?;
//! assert!(reply.content.contains("FINALIZE"));
//! # Ok(())
//! # }
//! ```

use crate::proposalgraph::client_wrapper::{AgentReply, ClientWrapper, Message, TokenUsage};
use crate::proposalgraph::event::{AgentEvent, EventHandler};
use crate::proposalgraph::router::extract_json_object;
use crate::proposalgraph::tool_protocol::{ToolCall, ToolMetadata, ToolRegistry};
use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;

/// Result of [`Agent::run_with_tools`].
#[derive(Debug, Clone)]
pub struct AgentRun {
    /// The final reply. Never carries pending tool calls.
    pub reply: AgentReply,
    /// Agent tool requests and tool results produced along the way, in order.
    pub transcript: Vec<Message>,
    pub tool_rounds: usize,
}

/// An LLM participant with identity, prompt and optional tools.
pub struct Agent {
    /// Stable identifier, used as the message author name.
    pub id: String,
    /// Human-readable display name embedded in the system prompt.
    pub name: String,
    pub expertise: Option<String>,
    pub personality: Option<String>,
    pub metadata: HashMap<String, String>,
    system_prompt: String,
    client: Arc<dyn ClientWrapper>,
    tool_registry: Option<Arc<ToolRegistry>>,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl Agent {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        client: Arc<dyn ClientWrapper>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            expertise: None,
            personality: None,
            metadata: HashMap::new(),
            system_prompt: String::new(),
            client,
            tool_registry: None,
            event_handler: None,
        }
    }

    pub fn with_expertise(mut self, expertise: impl Into<String>) -> Self {
        self.expertise = Some(expertise.into());
        self
    }

    pub fn with_personality(mut self, personality: impl Into<String>) -> Self {
        self.personality = Some(personality.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Give the agent a stage's tools. An empty registry is treated as none.
    pub fn with_tools(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.tool_registry = if registry.is_empty() {
            None
        } else {
            Some(registry)
        };
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    pub fn set_event_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.event_handler = Some(handler);
    }

    pub fn client(&self) -> &Arc<dyn ClientWrapper> {
        &self.client
    }

    pub fn tools(&self) -> Option<&Arc<ToolRegistry>> {
        self.tool_registry.as_ref()
    }

    pub fn tool_metadata(&self) -> Vec<ToolMetadata> {
        self.tool_registry
            .as_ref()
            .map(|r| r.list_tools())
            .unwrap_or_default()
    }

    fn augment_system_prompt(&self, context: Option<&str>, tools: &[ToolMetadata]) -> String {
        let mut prompt = format!("You are {}.\n", self.name);
        if let Some(expertise) = &self.expertise {
            prompt.push_str(&format!("Your expertise: {}\n", expertise));
        }
        if let Some(personality) = &self.personality {
            prompt.push_str(&format!("Your approach: {}\n", personality));
        }
        if !self.system_prompt.is_empty() {
            prompt.push('\n');
            prompt.push_str(&self.system_prompt);
            prompt.push('\n');
        }
        if let Some(context) = context.filter(|c| !c.trim().is_empty()) {
            prompt.push_str("\n## Context\n");
            prompt.push_str(context);
            prompt.push('\n');
        }
        if !tools.is_empty() {
            prompt.push_str("\nYou have access to the following tools:\n");
            for tool in tools {
                prompt.push_str(&format!("- {}: {}\n", tool.name, tool.description));
            }
            prompt.push_str(
                "If your interface cannot call tools directly, respond with \
                 {\"tool_call\": {\"name\": \"tool_name\", \"parameters\": {...}}}\n",
            );
        }
        prompt
    }

    /// One backend call over `history`, preceded by the agent's system prompt
    /// and `context`.
    pub async fn invoke(
        &self,
        context: Option<&str>,
        history: &[Message],
    ) -> Result<AgentReply, Box<dyn Error + Send + Sync>> {
        let tools = self.tool_metadata();
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(Message::system(self.augment_system_prompt(context, &tools)));
        messages.extend_from_slice(history);

        self.emit(AgentEvent::InvokeStarted {
            agent_id: self.id.clone(),
            model: self.client.model_name().to_string(),
            message_count: messages.len(),
        })
        .await;

        let tool_slice = if tools.is_empty() {
            None
        } else {
            Some(tools.as_slice())
        };
        let mut reply = self.client.send_message(&messages, tool_slice).await?;

        if !reply.has_tool_calls() && tool_slice.is_some() {
            if let Some(call) = parse_tool_call(&reply.content) {
                log::debug!("agent '{}' requested tool '{}' in text", self.id, call.name);
                self.emit(AgentEvent::ToolCallParsed {
                    agent_id: self.id.clone(),
                    tool_name: call.name.clone(),
                })
                .await;
                reply.tool_calls = vec![call];
            }
        }

        if reply.tokens_used.is_none() {
            reply.tokens_used = self.client.get_last_usage();
        }

        self.emit(AgentEvent::InvokeCompleted {
            agent_id: self.id.clone(),
            tokens_used: reply.tokens_used.clone(),
            tool_calls: reply.tool_calls.len(),
            response_length: reply.content.len(),
        })
        .await;

        Ok(reply)
    }

    /// Invoke repeatedly, executing requested tools in between, until the
    /// model answers without tool calls or `max_iterations` tool rounds have run.
    ///
    /// When the cap is hit the last reply is returned with its tool calls
    /// dropped and a warning appended.
    pub async fn run_with_tools(
        &self,
        context: Option<&str>,
        history: &[Message],
        max_iterations: usize,
    ) -> Result<AgentRun, Box<dyn Error + Send + Sync>> {
        let mut conversation = history.to_vec();
        let mut transcript = Vec::new();
        let mut tool_rounds = 0;
        let mut usage: Option<TokenUsage> = None;

        loop {
            let mut reply = self.invoke(context, &conversation).await?;
            usage = match (usage, reply.tokens_used.take()) {
                (Some(total), Some(step)) => Some(total.combine(&step)),
                (total, step) => total.or(step),
            };

            let registry = match &self.tool_registry {
                Some(registry) if reply.has_tool_calls() => registry,
                _ => {
                    reply.tool_calls.clear();
                    reply.tokens_used = usage;
                    return Ok(AgentRun {
                        reply,
                        transcript,
                        tool_rounds,
                    });
                }
            };

            if tool_rounds >= max_iterations {
                log::warn!(
                    "agent '{}' reached {} tool iterations without answering",
                    self.id,
                    max_iterations
                );
                self.emit(AgentEvent::ToolIterationsExhausted {
                    agent_id: self.id.clone(),
                    iterations: tool_rounds,
                })
                .await;
                reply.tool_calls.clear();
                reply.content = format!(
                    "{}\n\n[Warning: Maximum tool iterations reached]",
                    reply.content
                );
                reply.tokens_used = usage;
                return Ok(AgentRun {
                    reply,
                    transcript,
                    tool_rounds,
                });
            }

            tool_rounds += 1;
            let outcomes = registry.execute_calls(&reply.tool_calls).await?;
            let request = Message::agent(self.id.clone(), reply.content.clone())
                .with_tool_calls(reply.tool_calls.clone());
            conversation.push(request.clone());
            transcript.push(request);
            for outcome in outcomes {
                let msg = Message::tool(outcome.call.id.clone(), outcome.call.name.clone(), outcome.render());
                conversation.push(msg.clone());
                transcript.push(msg);
            }
        }
    }

    async fn emit(&self, event: AgentEvent) {
        if let Some(handler) = &self.event_handler {
            handler.on_agent_event(&event).await;
        }
    }
}

/// Lift `{"tool_call": {"name": ..., "parameters": ...}}` out of free text.
///
/// Only the first fragment is used.
pub fn parse_tool_call(response: &str) -> Option<ToolCall> {
    let start = response.find("{\"tool_call\"")?;
    let fragment = extract_json_object(&response[start..])?;
    let parsed: serde_json::Value = serde_json::from_str(fragment).ok()?;
    let call = parsed.get("tool_call")?;
    let name = call.get("name")?.as_str()?;
    let parameters = call
        .get("parameters")
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}));
    Some(ToolCall::new(name, parameters))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tool_call_inside_prose() {
        let text = "Let me check. {\"tool_call\": {\"name\": \"scholar\", \"parameters\": {\"q\": \"{x}\"}}} thanks";
        let call = parse_tool_call(text).unwrap();
        assert_eq!(call.name, "scholar");
        assert_eq!(call.arguments["q"], "{x}");
    }

    #[test]
    fn ignores_text_without_tool_call() {
        assert!(parse_tool_call("no tools needed {\"a\": 1}").is_none());
        assert!(parse_tool_call("{\"tool_call\": {\"parameters\": {}}}").is_none());
    }
}

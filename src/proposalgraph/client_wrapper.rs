//! The agent invocation boundary.
//!
//! A [`ClientWrapper`] is a thin adapter around one LLM backend. The graph never
//! talks to a provider directly: every stage node, debate speaker and judge goes
//! through `send_message(messages, tools)` and receives an [`AgentReply`] that is
//! either plain text, a structured payload (for the reflection and feedback
//! stages), or a non-empty list of pending [`ToolCall`]s.
//!
//! Conversation state is not kept here. The run-level [`Message`] log lives in
//! the shared state and is handed to the client in full on every call.
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use proposalgraph::client_wrapper::{AgentReply, ClientWrapper, Message};
//! use proposalgraph::tool_protocol::ToolMetadata;
//! use std::error::Error;
//!
//! struct EchoClient;
//!
//! #[async_trait]
//! impl ClientWrapper for EchoClient {
//!     async fn send_message(
//!         &self,
//!         messages: &[Message],
//!         _tools: Option<&[ToolMetadata]>,
//!     ) -> Result<AgentReply, Box<dyn Error + Send + Sync>> {
//!         let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
//!         Ok(AgentReply::text(last))
//!     }
//!
//!     fn model_name(&self) -> &str {
//!         "echo"
//!     }
//! }
//! ```

use crate::proposalgraph::tool_protocol::{ToolCall, ToolMetadata};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::sync::Mutex;

/// Who produced a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Framework or operator instructions.
    System,
    /// The end user or the human reviewer.
    Human,
    /// Output of an LLM-backed agent.
    Agent,
    /// Result of a tool execution, tied to a tool call id.
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::Human => "human",
            Role::Agent => "agent",
            Role::Tool => "tool",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How many tokens were spent on prompt vs. completion.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub total_tokens: usize,
}

impl TokenUsage {
    /// Sum two usage reports.
    pub fn combine(&self, other: &TokenUsage) -> TokenUsage {
        TokenUsage {
            input_tokens: self.input_tokens + other.input_tokens,
            output_tokens: self.output_tokens + other.output_tokens,
            total_tokens: self.total_tokens + other.total_tokens,
        }
    }
}

/// One role-tagged entry of the run's message log.
///
/// Order is the only addressing scheme: routers look at the last entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Agent or tool name that produced this entry, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Pending tool invocations requested by an agent turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// For [`Role::Tool`] entries, the id of the call this answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Structured content (e.g. a recommendation object) when the agent
    /// produced one instead of, or in addition to, plain text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
            payload: None,
        }
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self::new(Role::Human, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// An agent turn attributed to `name`.
    pub fn agent(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(Role::Agent, content).with_name(name)
    }

    /// A tool result answering the call identified by `call_id`.
    pub fn tool(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut msg = Self::new(Role::Tool, content).with_name(tool_name);
        msg.tool_call_id = Some(call_id.into());
        msg
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// True when this entry carries one or more tool invocations still to run.
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// What a [`ClientWrapper`] returns for one invocation.
#[derive(Debug, Clone, Default)]
pub struct AgentReply {
    /// Plain-text content. May be empty when only tool calls were produced.
    pub content: String,
    /// Structured content, when the backend returned a JSON object natively.
    pub payload: Option<serde_json::Value>,
    /// Tool invocations requested by the model. Empty means none.
    pub tool_calls: Vec<ToolCall>,
    /// Usage for this call if the backend reports it.
    pub tokens_used: Option<TokenUsage>,
}

impl AgentReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn structured(payload: serde_json::Value) -> Self {
        Self {
            content: payload.to_string(),
            payload: Some(payload),
            ..Self::default()
        }
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Convert into a log entry attributed to `agent_name`.
    pub fn into_message(self, agent_name: &str) -> Message {
        let mut msg = Message::agent(agent_name, self.content).with_tool_calls(self.tool_calls);
        msg.payload = self.payload;
        msg
    }
}

/// Trait defining the interface to an LLM backend.
#[async_trait]
pub trait ClientWrapper: Send + Sync {
    /// Invoke the model with the full conversation and the tools it may call.
    ///
    /// `tools` is `None` when the calling node exposes no tools.
    async fn send_message(
        &self,
        messages: &[Message],
        tools: Option<&[ToolMetadata]>,
    ) -> Result<AgentReply, Box<dyn Error + Send + Sync>>;

    /// Identifier of the backing model, used in logs and events.
    fn model_name(&self) -> &str;

    /// Usage from the last `send_message` call.
    fn get_last_usage(&self) -> Option<TokenUsage> {
        self.usage_slot()
            .and_then(|slot| slot.lock().ok().and_then(|u| u.clone()))
    }

    /// Wrappers that track usage return their slot here.
    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_into_message_keeps_tool_calls_and_payload() {
        let reply = AgentReply::structured(serde_json::json!({"recommendation": "review"}))
            .with_tool_calls(vec![ToolCall::new("search", serde_json::json!({"q": "x"}))]);
        let msg = reply.into_message("reflection");

        assert_eq!(msg.role, Role::Agent);
        assert_eq!(msg.name.as_deref(), Some("reflection"));
        assert!(msg.has_tool_calls());
        assert_eq!(msg.payload.unwrap()["recommendation"], "review");
    }

    #[test]
    fn tool_message_links_call_id() {
        let msg = Message::tool("call_1", "search", "ok");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn usage_combines() {
        let a = TokenUsage {
            input_tokens: 1,
            output_tokens: 2,
            total_tokens: 3,
        };
        let b = a.combine(&a);
        assert_eq!(b.total_tokens, 6);
    }
}

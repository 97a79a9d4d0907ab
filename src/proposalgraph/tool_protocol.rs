//! Tool execution boundary.
//!
//! Analysis stages and debate speakers may ask for external collaborators
//! (academic search, web search, market data, ...). Those collaborators are
//! reached through the [`ToolProtocol`] trait and grouped per stage in a
//! [`ToolRegistry`]. The graph only ever sees:
//!
//! ```text
//! Message.tool_calls ──► ToolRegistry::execute_calls ──► [ToolOutcome] ──► Role::Tool messages
//! ```
//!
//! Results are returned in call order so the message log mirrors the order in
//! which the model asked for them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// A single tool invocation requested by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlates the call with its [`Role::Tool`](crate::client_wrapper::Role::Tool) result.
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

impl ToolCall {
    /// Create a call with a freshly generated id.
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: format!("call_{}", Uuid::new_v4().simple()),
            name: name.into(),
            arguments,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// Result of one tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: serde_json::Value,
    pub error: Option<String>,
    /// Protocol specific extras (timing, source, cost).
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ToolResult {
    pub fn success(output: serde_json::Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
            metadata: HashMap::new(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: serde_json::Value::Null,
            error: Some(error.into()),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ToolParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ToolParameterType,
    pub description: Option<String>,
    pub required: bool,
}

impl ToolParameter {
    pub fn new(name: impl Into<String>, param_type: ToolParameterType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: None,
            required: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Describes a tool to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

impl ToolMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, param: ToolParameter) -> Self {
        self.parameters.push(param);
        self
    }
}

/// Transport for a family of tools.
#[async_trait]
pub trait ToolProtocol: Send + Sync {
    async fn execute(
        &self,
        tool_name: &str,
        parameters: serde_json::Value,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>>;

    async fn list_tools(&self) -> Result<Vec<ToolMetadata>, Box<dyn Error + Send + Sync>>;

    /// Protocol identifier (e.g. "custom", "scholar-api").
    fn protocol_name(&self) -> &str;
}

/// Error types for tool operations
#[derive(Debug, Clone)]
pub enum ToolError {
    /// The model asked for a tool this registry does not expose.
    NotFound(String),
    /// The tool ran and reported an application level failure.
    ExecutionFailed(String),
    /// Arguments failed validation.
    InvalidParameters(String),
    /// Transport or backend failure.
    ProtocolError(String),
}

impl ToolError {
    /// Errors the model can recover from by reading the failure message.
    ///
    /// Anything else is a collaborator failure and aborts the node.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ToolError::NotFound(_) | ToolError::InvalidParameters(_))
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::NotFound(name) => write!(f, "Tool not found: {}", name),
            ToolError::ExecutionFailed(msg) => write!(f, "Tool execution failed: {}", msg),
            ToolError::InvalidParameters(msg) => write!(f, "Invalid parameters: {}", msg),
            ToolError::ProtocolError(msg) => write!(f, "Protocol error: {}", msg),
        }
    }
}

impl Error for ToolError {}

/// A tool bound to the protocol that executes it.
#[derive(Clone)]
pub struct Tool {
    metadata: ToolMetadata,
    protocol: Arc<dyn ToolProtocol>,
}

impl Tool {
    pub fn new(metadata: ToolMetadata, protocol: Arc<dyn ToolProtocol>) -> Self {
        Self { metadata, protocol }
    }

    pub fn metadata(&self) -> &ToolMetadata {
        &self.metadata
    }

    pub async fn execute(
        &self,
        parameters: serde_json::Value,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
        self.protocol.execute(&self.metadata.name, parameters).await
    }
}

/// The executed call together with what it produced.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub call: ToolCall,
    pub result: ToolResult,
}

impl ToolOutcome {
    /// Text handed back to the model in the matching tool message.
    pub fn render(&self) -> String {
        if self.result.success {
            format!(
                "Tool '{}' executed successfully. Result: {}",
                self.call.name,
                serde_json::to_string_pretty(&self.result.output)
                    .unwrap_or_else(|_| self.result.output.to_string())
            )
        } else {
            format!(
                "Tool '{}' failed. Error: {}",
                self.call.name,
                self.result.error.as_deref().unwrap_or("Unknown error")
            )
        }
    }
}

/// Tools available to one stage, keyed by name.
///
/// Listing order is by name so prompts stay stable across runs.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Tool>,
}

impl ToolRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Insert or replace a tool definition.
    pub fn add_tool(&mut self, tool: Tool) {
        self.tools.insert(tool.metadata.name.clone(), tool);
    }

    pub fn get_tool(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn list_tools(&self) -> Vec<ToolMetadata> {
        self.tools.values().map(|t| t.metadata.clone()).collect()
    }

    /// Register every tool a protocol advertises. Returns how many were added.
    pub async fn discover(
        &mut self,
        protocol: Arc<dyn ToolProtocol>,
    ) -> Result<usize, Box<dyn Error + Send + Sync>> {
        let advertised = protocol.list_tools().await?;
        let count = advertised.len();
        for metadata in advertised {
            log::debug!(
                "registering tool '{}' from protocol '{}'",
                metadata.name,
                protocol.protocol_name()
            );
            self.add_tool(Tool::new(metadata, protocol.clone()));
        }
        Ok(count)
    }

    pub async fn execute_tool(
        &self,
        tool_name: &str,
        parameters: serde_json::Value,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
        let tool = self
            .tools
            .get(tool_name)
            .ok_or_else(|| ToolError::NotFound(tool_name.to_string()))?;
        tool.execute(parameters).await
    }

    /// Execute calls sequentially, preserving call order in the output.
    ///
    /// Unknown tools and rejected arguments become failed [`ToolResult`]s so
    /// the model can react to them. Any other error aborts the batch.
    pub async fn execute_calls(
        &self,
        calls: &[ToolCall],
    ) -> Result<Vec<ToolOutcome>, Box<dyn Error + Send + Sync>> {
        let mut outcomes = Vec::with_capacity(calls.len());
        for call in calls {
            let result = match self.execute_tool(&call.name, call.arguments.clone()).await {
                Ok(result) => result,
                Err(e) => {
                    let recoverable = e
                        .downcast_ref::<ToolError>()
                        .filter(|tool_err| tool_err.is_recoverable())
                        .map(|tool_err| tool_err.to_string());
                    match recoverable {
                        Some(reason) => {
                            log::warn!("tool call '{}' rejected: {}", call.name, reason);
                            ToolResult::failure(reason)
                        }
                        None => return Err(e),
                    }
                }
            };
            outcomes.push(ToolOutcome {
                call: call.clone(),
                result,
            });
        }
        Ok(outcomes)
    }
}

//! In-process tool protocol backed by Rust closures.
//!
//! Concrete collaborators (scholar search, news, market data) are outside this
//! crate. Applications wire them in by registering closures on a
//! [`CustomToolProtocol`] and discovering it into a stage's
//! [`ToolRegistry`](crate::tool_protocol::ToolRegistry).
//!
//! ```rust
//! use proposalgraph::tool_protocol::{ToolMetadata, ToolRegistry, ToolResult};
//! use proposalgraph::tool_protocols::CustomToolProtocol;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let protocol = Arc::new(CustomToolProtocol::new());
//! protocol
//!     .register_tool(
//!         ToolMetadata::new("citation_count", "Count citations for a DOI"),
//!         Arc::new(|params| {
//!             let doi = params["doi"].as_str().unwrap_or_default();
//!             Ok(ToolResult::success(serde_json::json!({"doi": doi, "count": 42})))
//!         }),
//!     )
//!     .await;
//!
//! let mut registry = ToolRegistry::empty();
//! registry.discover(protocol).await?;
//! assert_eq!(registry.len(), 1);
//! # Ok(())
//! # }
//! ```

use crate::proposalgraph::tool_protocol::{ToolError, ToolMetadata, ToolProtocol, ToolResult};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::error::Error;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Synchronous tool function.
pub type ToolFunction =
    Arc<dyn Fn(JsonValue) -> Result<ToolResult, Box<dyn Error + Send + Sync>> + Send + Sync>;

/// Asynchronous tool function.
pub type AsyncToolFunction = Arc<
    dyn Fn(
            JsonValue,
        )
            -> Pin<Box<dyn Future<Output = Result<ToolResult, Box<dyn Error + Send + Sync>>> + Send>>
        + Send
        + Sync,
>;

#[derive(Clone)]
enum Handler {
    Sync(ToolFunction),
    Async(AsyncToolFunction),
}

struct Registration {
    metadata: ToolMetadata,
    handler: Handler,
}

/// Closure-backed [`ToolProtocol`].
///
/// Registering a name twice replaces the earlier handler.
pub struct CustomToolProtocol {
    name: String,
    tools: RwLock<HashMap<String, Registration>>,
}

impl CustomToolProtocol {
    pub fn new() -> Self {
        Self::named("custom")
    }

    /// Create a protocol reported under `name` in logs.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tools: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register_tool(&self, metadata: ToolMetadata, function: ToolFunction) {
        self.insert(metadata, Handler::Sync(function)).await;
    }

    pub async fn register_async_tool(&self, metadata: ToolMetadata, function: AsyncToolFunction) {
        self.insert(metadata, Handler::Async(function)).await;
    }

    pub async fn unregister_tool(&self, name: &str) {
        self.tools.write().await.remove(name);
    }

    async fn insert(&self, metadata: ToolMetadata, handler: Handler) {
        let name = metadata.name.clone();
        self.tools
            .write()
            .await
            .insert(name, Registration { metadata, handler });
    }
}

impl Default for CustomToolProtocol {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolProtocol for CustomToolProtocol {
    async fn execute(
        &self,
        tool_name: &str,
        parameters: JsonValue,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
        // Clone the handler out so the lock is not held across the call.
        let handler = {
            let tools = self.tools.read().await;
            tools.get(tool_name).map(|r| r.handler.clone())
        };

        match handler {
            Some(Handler::Sync(func)) => func(parameters),
            Some(Handler::Async(func)) => func(parameters).await,
            None => Err(Box::new(ToolError::NotFound(tool_name.to_string()))),
        }
    }

    async fn list_tools(&self) -> Result<Vec<ToolMetadata>, Box<dyn Error + Send + Sync>> {
        let tools = self.tools.read().await;
        let mut listed: Vec<ToolMetadata> = tools.values().map(|r| r.metadata.clone()).collect();
        listed.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listed)
    }

    fn protocol_name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sync_and_async_tools_execute() {
        let protocol = CustomToolProtocol::new();
        protocol
            .register_tool(
                ToolMetadata::new("double", "Double a number"),
                Arc::new(|params| {
                    let n = params["n"].as_f64().unwrap_or(0.0);
                    Ok(ToolResult::success(serde_json::json!(n * 2.0)))
                }),
            )
            .await;
        protocol
            .register_async_tool(
                ToolMetadata::new("lookup", "Pretend remote lookup"),
                Arc::new(|params| {
                    Box::pin(async move {
                        Ok(ToolResult::success(serde_json::json!({"key": params["key"]})))
                    })
                }),
            )
            .await;

        let doubled = protocol
            .execute("double", serde_json::json!({"n": 4}))
            .await
            .unwrap();
        assert_eq!(doubled.output, serde_json::json!(8.0));

        let looked_up = protocol
            .execute("lookup", serde_json::json!({"key": "grant"}))
            .await
            .unwrap();
        assert_eq!(looked_up.output["key"], "grant");

        let listed = protocol.list_tools().await.unwrap();
        assert_eq!(listed[0].name, "double");
        assert_eq!(listed[1].name, "lookup");
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let protocol = CustomToolProtocol::new();
        let err = protocol
            .execute("nope", serde_json::json!({}))
            .await
            .unwrap_err();
        let tool_err = err.downcast_ref::<ToolError>().unwrap();
        assert!(tool_err.is_recoverable());
    }
}

//! Handler interface consumed by the engine, and the category lookup table
//! that routes a tool name to the handler responsible for it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use thiserror::Error;
use toolgate_core::{EngineError, ExecutionContext, ToolCategory};

use crate::registry::ToolRegistry;

/// Whatever a handler raised. `message` and `code` drive retry classification.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
    pub code: Option<String>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl From<HandlerError> for EngineError {
    fn from(err: HandlerError) -> Self {
        EngineError::Handler {
            message: err.message,
            code: err.code,
        }
    }
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn invoke(
        &self,
        tool_name: &str,
        arguments: &Map<String, Value>,
        context: &ExecutionContext,
    ) -> Result<Value, HandlerError>;
}

/// Resolves handlers by tool name first, then by the tool's category.
pub struct HandlerTable {
    registry: Arc<ToolRegistry>,
    by_category: RwLock<HashMap<ToolCategory, Arc<dyn ToolHandler>>>,
    by_tool: RwLock<HashMap<String, Arc<dyn ToolHandler>>>,
}

impl HandlerTable {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            by_category: RwLock::new(HashMap::new()),
            by_tool: RwLock::new(HashMap::new()),
        }
    }

    pub fn register_category(&self, category: ToolCategory, handler: Arc<dyn ToolHandler>) {
        self.by_category.write().insert(category, handler);
    }

    pub fn register_tool(&self, tool_name: impl Into<String>, handler: Arc<dyn ToolHandler>) {
        self.by_tool.write().insert(tool_name.into(), handler);
    }

    pub fn resolve(&self, tool_name: &str) -> Option<Arc<dyn ToolHandler>> {
        if let Some(handler) = self.by_tool.read().get(tool_name) {
            return Some(handler.clone());
        }
        let category = self.registry.lookup(tool_name)?.category;
        self.by_category.read().get(&category).cloned()
    }
}

#[async_trait]
impl ToolHandler for HandlerTable {
    async fn invoke(
        &self,
        tool_name: &str,
        arguments: &Map<String, Value>,
        context: &ExecutionContext,
    ) -> Result<Value, HandlerError> {
        let handler = self.resolve(tool_name).ok_or_else(|| {
            HandlerError::new(format!("No handler registered for tool: {}", tool_name))
                .with_code("NO_HANDLER")
        })?;
        handler.invoke(tool_name, arguments, context).await
    }
}

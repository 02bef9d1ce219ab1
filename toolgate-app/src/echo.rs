use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use toolgate_core::{ExecutionContext, ToolCategory};
use toolgate_tools::{HandlerError, HandlerTable, ToolHandler, ToolRegistry};
use tracing::debug;

/// Dry-run handler: reports what would have been invoked.
pub struct EchoHandler;

#[async_trait]
impl ToolHandler for EchoHandler {
    async fn invoke(
        &self,
        tool_name: &str,
        arguments: &Map<String, Value>,
        context: &ExecutionContext,
    ) -> Result<Value, HandlerError> {
        debug!("Dry run of {} for {}", tool_name, context.user_id);
        Ok(json!({
            "tool": tool_name,
            "arguments": arguments,
            "userId": context.user_id,
            "dryRun": true
        }))
    }
}

/// Every category routed to [`EchoHandler`].
pub fn dry_run_handlers(registry: Arc<ToolRegistry>) -> HandlerTable {
    let table = HandlerTable::new(registry);
    for category in ToolCategory::ALL {
        table.register_category(category, Arc::new(EchoHandler));
    }
    table
}

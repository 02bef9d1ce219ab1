use async_trait::async_trait;

use crate::history::ExecutionHistoryEntry;

/// External store for finished executions. The executor hands entries over on
/// a detached task; a slow or failing sink never affects the call result.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn log(&self, entry: ExecutionHistoryEntry);
}

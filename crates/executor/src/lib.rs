pub mod audit;
pub mod executor;
pub mod history;
pub mod monitor;
pub mod retry;
pub mod sandbox;
pub mod vfs;

pub use audit::AuditSink;
pub use executor::{ExecutionResult, ExecutionStatistics, ToolExecutor};
pub use history::{ExecutionHistory, ExecutionHistoryEntry, ExecutionMetrics, ExecutionOutcome};
pub use monitor::{
    ElapsedMonitor, ResourceLimits, ResourceMonitor, ResourceSnapshot, ResourceUsage,
    SystemResourceMonitor,
};
pub use retry::RetryPolicy;
pub use sandbox::{SandboxContext, SandboxResult, ToolSandbox};
pub use vfs::{VfsError, VirtualFileSystem};

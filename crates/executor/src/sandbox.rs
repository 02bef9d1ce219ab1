//! Per-invocation isolation boundary around a handler call.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::time::{timeout, Instant};
use toolgate_core::{
    EngineConfig, EngineError, ExecutionContext, Severity, Violation, ViolationKind,
};
use toolgate_policy::{
    ApiRestrictions, FileSystemIsolation, NetworkIsolation, PermissionCheck, PermissionManager,
    PolicyViolation,
};
use toolgate_tools::ToolHandler;
use tracing::{debug, error, warn};

use crate::vfs::VirtualFileSystem;

const PATH_KEY_HINTS: &[&str] = &["path", "file", "directory"];
const NETWORK_KEY_HINTS: &[&str] = &["url", "domain", "endpoint"];

/// State of one sandboxed invocation. Never outlives it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxContext {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub execution_count: u32,
    pub violations: Vec<Violation>,
    pub network_requests: u32,
    pub api_calls: u32,
}

impl SandboxContext {
    fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            execution_count: 0,
            violations: Vec::new(),
            network_requests: 0,
            api_calls: 0,
        }
    }

    fn record(&mut self, violation: Violation) {
        self.violations.push(violation);
    }
}

#[derive(Debug, Clone)]
pub struct SandboxResult {
    pub success: bool,
    pub result: Option<Value>,
    pub error: Option<EngineError>,
    pub violations: Vec<Violation>,
    pub execution_time: Duration,
    pub sandbox_context: SandboxContext,
}

impl SandboxResult {
    pub fn into_outcome(self) -> Result<Value, EngineError> {
        match (self.result, self.error) {
            (_, Some(err)) => Err(err),
            (Some(value), None) => Ok(value),
            (None, None) => Err(EngineError::Internal(
                "sandbox finished without a result".to_string(),
            )),
        }
    }
}

/// Clears the invocation's scratch storage and bookkeeping even if the
/// surrounding future is dropped mid-flight.
struct SandboxGuard<'a> {
    sandbox: &'a ToolSandbox,
    id: String,
}

impl Drop for SandboxGuard<'_> {
    fn drop(&mut self) {
        self.sandbox.vfs.clear(&self.id);
        self.sandbox.active.lock().remove(&self.id);
    }
}

pub struct ToolSandbox {
    enabled: bool,
    timeout: Duration,
    filesystem: FileSystemIsolation,
    network: NetworkIsolation,
    api: ApiRestrictions,
    permissions: Arc<PermissionManager>,
    vfs: Arc<VirtualFileSystem>,
    active: Mutex<HashSet<String>>,
}

impl ToolSandbox {
    pub fn new(config: &EngineConfig, permissions: Arc<PermissionManager>) -> Self {
        Self {
            enabled: config.sandbox_mode,
            timeout: config.timeout(),
            filesystem: FileSystemIsolation::from_config(&config.isolation),
            network: NetworkIsolation::from_config(&config.isolation),
            api: ApiRestrictions::from_config(&config.isolation),
            permissions,
            vfs: Arc::new(VirtualFileSystem::from_config(&config.virtual_fs)),
            active: Mutex::new(HashSet::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn vfs(&self) -> Arc<VirtualFileSystem> {
        self.vfs.clone()
    }

    pub fn active_sandboxes(&self) -> usize {
        self.active.lock().len()
    }

    /// Blocked or not allow-listed tool names never reach a handler.
    pub fn tool_allowed(&self, tool_name: &str) -> bool {
        self.api.is_allowed(tool_name)
    }

    pub async fn execute_tool(
        &self,
        handler: Arc<dyn ToolHandler>,
        tool_name: &str,
        arguments: &Map<String, Value>,
        context: &ExecutionContext,
    ) -> SandboxResult {
        let started = Instant::now();
        let mut sandbox = SandboxContext::new();

        let outcome = if self.enabled {
            self.active.lock().insert(sandbox.id.clone());
            let _guard = SandboxGuard {
                sandbox: self,
                id: sandbox.id.clone(),
            };
            debug!("Sandbox {} opened for {}", sandbox.id, tool_name);

            match self.enforce_policies(tool_name, arguments, context, &mut sandbox) {
                Ok(()) => {
                    let mut scoped = context.clone();
                    scoped.sandbox_id = Some(sandbox.id.clone());
                    self.invoke(handler, tool_name, arguments.clone(), scoped, &mut sandbox)
                        .await
                }
                Err(err) => Err(err),
            }
        } else {
            self.invoke(handler, tool_name, arguments.clone(), context.clone(), &mut sandbox)
                .await
        };

        let (result, error) = match outcome {
            Ok(value) => (Some(value), None),
            Err(err) => (None, Some(err)),
        };

        SandboxResult {
            success: error.is_none(),
            result,
            error,
            violations: sandbox.violations.clone(),
            execution_time: started.elapsed(),
            sandbox_context: sandbox,
        }
    }

    /// Fail-fast: the first failing check records one violation and stops.
    fn enforce_policies(
        &self,
        tool_name: &str,
        arguments: &Map<String, Value>,
        context: &ExecutionContext,
        sandbox: &mut SandboxContext,
    ) -> Result<(), EngineError> {
        if !self.tool_allowed(tool_name) {
            return Err(self.reject(
                sandbox,
                tool_name,
                PolicyViolation {
                    kind: ViolationKind::Api,
                    message: format!("Tool not allowed in sandbox: {}", tool_name),
                },
            ));
        }

        for (key, value) in arguments {
            let key_lower = key.to_lowercase();

            if PATH_KEY_HINTS.iter().any(|h| key_lower.contains(h)) {
                for path in string_values(value) {
                    if let Err(v) = self.filesystem.check(path) {
                        return Err(self.reject(sandbox, tool_name, v));
                    }
                }
            }

            if NETWORK_KEY_HINTS.iter().any(|h| key_lower.contains(h)) {
                for target in string_values(value) {
                    let checked = self
                        .network
                        .check_request_budget(sandbox.network_requests)
                        .and_then(|_| self.network.check_url(target));
                    match checked {
                        Ok(domain) => {
                            sandbox.network_requests += 1;
                            debug!("Sandbox {} admitted request to {}", sandbox.id, domain);
                        }
                        Err(v) => return Err(self.reject(sandbox, tool_name, v)),
                    }
                }
            }
        }

        let api_check = self
            .api
            .check_call_budget(sandbox.api_calls)
            .and_then(|_| self.api.check(tool_name));
        if let Err(v) = api_check {
            return Err(self.reject(sandbox, tool_name, v));
        }
        sandbox.api_calls += 1;

        if let PermissionCheck::Denied { required } =
            self.permissions.check(tool_name, &context.permissions)
        {
            return Err(self.reject(
                sandbox,
                tool_name,
                PolicyViolation {
                    kind: ViolationKind::Permission,
                    message: format!(
                        "Missing permission for {}: requires one of {:?}",
                        tool_name, required
                    ),
                },
            ));
        }

        Ok(())
    }

    fn reject(
        &self,
        sandbox: &mut SandboxContext,
        tool_name: &str,
        violation: PolicyViolation,
    ) -> EngineError {
        warn!(
            "Sandbox {} violation ({}) for {}: {}",
            sandbox.id, violation.kind, tool_name, violation.message
        );
        sandbox.record(
            Violation::new(violation.kind, Severity::High, violation.message.clone())
                .with_details(json!({"tool": tool_name, "sandboxId": sandbox.id})),
        );
        EngineError::SandboxViolation {
            kind: violation.kind,
            message: violation.message,
        }
    }

    /// Runs the handler on its own task so a panic cannot take the caller down.
    /// On timeout the task is aborted and whatever it would have produced is dropped.
    async fn invoke(
        &self,
        handler: Arc<dyn ToolHandler>,
        tool_name: &str,
        arguments: Map<String, Value>,
        context: ExecutionContext,
        sandbox: &mut SandboxContext,
    ) -> Result<Value, EngineError> {
        sandbox.execution_count += 1;
        let name = tool_name.to_string();
        let mut task =
            tokio::spawn(async move { handler.invoke(&name, &arguments, &context).await });

        match timeout(self.timeout, &mut task).await {
            Ok(Ok(result)) => result.map_err(EngineError::from),
            Ok(Err(join_err)) => {
                if join_err.is_panic() {
                    error!("Tool execution panicked: {}", tool_name);
                    Err(EngineError::Internal(format!("handler for {} panicked", tool_name)))
                } else {
                    error!("Tool execution cancelled: {}", tool_name);
                    Err(EngineError::Internal(format!("handler for {} was cancelled", tool_name)))
                }
            }
            Err(_) => {
                task.abort();
                let ms = self.timeout.as_millis() as u64;
                warn!("Tool execution timed out after {}ms: {}", ms, tool_name);
                sandbox.record(
                    Violation::new(
                        ViolationKind::Resource,
                        Severity::Medium,
                        format!("Execution exceeded timeout of {}ms", ms),
                    )
                    .with_details(json!({"tool": tool_name, "timeoutMs": ms})),
                );
                Err(EngineError::Timeout(ms))
            }
        }
    }
}

fn string_values(value: &Value) -> Vec<&str> {
    match value {
        Value::String(s) => vec![s.as_str()],
        Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

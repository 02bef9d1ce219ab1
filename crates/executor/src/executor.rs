//! Orchestrates one tool call from lookup to history.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use toolgate_core::{
    EngineConfig, EngineError, EngineResult, ExecutionContext, ToolCall, ToolCallError,
    ToolDefinition, Violation,
};
use toolgate_policy::PermissionManager;
use toolgate_tools::{ToolHandler, ToolRegistry, ToolStats};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::AuditSink;
use crate::history::{ExecutionHistory, ExecutionHistoryEntry, ExecutionMetrics, ExecutionOutcome};
use crate::monitor::{ResourceLimits, ResourceMonitor, ResourceUsage, SystemResourceMonitor};
use crate::retry::RetryPolicy;
use crate::sandbox::ToolSandbox;

/// Caller-facing outcome of one call. Every path through the executor
/// produces one of these.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub call_id: String,
    pub tool_name: String,
    pub success: bool,
    pub result: Option<Value>,
    pub error: Option<ToolCallError>,
    pub execution_time: Duration,
    pub attempts: u32,
    pub warnings: Vec<String>,
    pub violations: Vec<Violation>,
    pub sandbox_id: Option<String>,
    pub resource_usage: ResourceUsage,
}

impl ExecutionResult {
    fn rejected(call: &ToolCall, error: ToolCallError, execution_time: Duration) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            success: false,
            result: None,
            error: Some(error),
            execution_time,
            attempts: 0,
            warnings: Vec::new(),
            violations: Vec::new(),
            sandbox_id: None,
            resource_usage: ResourceUsage::default(),
        }
    }

    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStatistics {
    pub total_executions: u64,
    pub successful: u64,
    pub failed: u64,
    pub success_rate: f64,
    pub average_execution_time: Duration,
    pub per_tool: BTreeMap<String, ToolStats>,
    pub active_executions: usize,
    pub active_sandboxes: usize,
    pub history_size: usize,
}

/// What the retry loop hands back to the executor.
struct Attempts {
    outcome: EngineResult<Value>,
    count: u32,
    violations: Vec<Violation>,
    sandbox_id: Option<String>,
    network_requests: u32,
}

/// Active-execution bookkeeping. Each claim carries a token so a guard never
/// removes an entry re-claimed after `cancel_execution`.
struct ActiveGuard<'a> {
    active: &'a Mutex<HashMap<String, u64>>,
    id: String,
    token: u64,
}

impl<'a> ActiveGuard<'a> {
    fn claim(active: &'a Mutex<HashMap<String, u64>>, id: &str, token: u64) -> Option<Self> {
        let mut map = active.lock();
        if map.contains_key(id) {
            return None;
        }
        map.insert(id.to_string(), token);
        Some(Self {
            active,
            id: id.to_string(),
            token,
        })
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        let mut map = self.active.lock();
        if map.get(&self.id) == Some(&self.token) {
            map.remove(&self.id);
        }
    }
}

pub struct ToolExecutor {
    config: EngineConfig,
    registry: Arc<ToolRegistry>,
    permissions: Arc<PermissionManager>,
    sandbox: ToolSandbox,
    handler: Arc<dyn ToolHandler>,
    monitor: Arc<dyn ResourceMonitor>,
    limits: ResourceLimits,
    retry: RetryPolicy,
    active: Mutex<HashMap<String, u64>>,
    next_token: AtomicU64,
    history: Mutex<ExecutionHistory>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl ToolExecutor {
    /// Tools already in `registry` have their permission requirements copied
    /// into the sandbox's permission table.
    pub fn new(
        config: EngineConfig,
        registry: Arc<ToolRegistry>,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        let permissions = Arc::new(PermissionManager::new());
        for name in registry.list() {
            if let Some(tool) = registry.lookup(&name) {
                permissions.set_required(name, tool.permissions.clone());
            }
        }

        Self {
            sandbox: ToolSandbox::new(&config, permissions.clone()),
            limits: ResourceLimits::from(&config.limits),
            retry: RetryPolicy::from_config(&config),
            history: Mutex::new(ExecutionHistory::new(config.history_capacity)),
            monitor: Arc::new(SystemResourceMonitor::new()),
            active: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(0),
            audit: None,
            config,
            registry,
            permissions,
            handler,
        }
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn ResourceMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn permissions(&self) -> &Arc<PermissionManager> {
        &self.permissions
    }

    pub fn sandbox(&self) -> &ToolSandbox {
        &self.sandbox
    }

    pub fn register_tool(&self, tool: ToolDefinition) -> EngineResult<()> {
        let name = tool.name.clone();
        let required = tool.permissions.clone();
        self.registry.register(tool)?;
        self.permissions.set_required(name, required);
        Ok(())
    }

    pub fn unregister_tool(&self, name: &str) -> bool {
        self.permissions.remove(name);
        self.registry.unregister(name)
    }

    pub async fn execute_tool(
        &self,
        call: &mut ToolCall,
        context: &ExecutionContext,
    ) -> ExecutionResult {
        let started = Instant::now();
        info!(
            "Executing tool: {} (call {}) for user {}",
            call.name, call.id, context.user_id
        );

        // 1. Lookup
        let Some(tool) = self.registry.lookup(&call.name) else {
            let err = EngineError::ToolNotFound(call.name.clone());
            return self.reject(call, context, started, err, false);
        };

        // 2. Registry-level authorization
        if !self.registry.has_permission(&call.name, &context.permissions) {
            let err = EngineError::PermissionDenied(format!(
                "{} requires one of {:?}",
                call.name, tool.permissions
            ));
            return self.reject(call, context, started, err, true);
        }

        // 5. Claimed before the rate-limit slot so a duplicate leaves no trace.
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let Some(_active) = ActiveGuard::claim(&self.active, &call.id, token) else {
            warn!("Call {} is already executing; rejecting duplicate", call.id);
            let err = EngineError::ExecutionInProgress(call.id.clone());
            return ExecutionResult::rejected(call, ToolCallError::from(&err), started.elapsed());
        };

        // 3. Rate limit
        if self.config.enable_rate_limiting {
            if let Err(err) = self.registry.check_rate_limit(&call.name) {
                return self.reject(call, context, started, err, true);
            }
        } else {
            self.registry.note_call(&call.name);
        }

        // 4. Parameters
        if let Err(err) = self.registry.validate_arguments(&call.name, &call.arguments) {
            return self.reject(call, context, started, err, true);
        }

        // The registry may have been mutated directly; the looked-up definition wins.
        let stored = self.permissions.required_for(&call.name);
        if stored.as_deref() != Some(tool.permissions.as_slice()) {
            self.permissions
                .set_required(call.name.clone(), tool.permissions.clone());
        }

        // 6. Start
        call.mark_executing();
        let snapshot = self.monitor.start();

        // 7. Invoke with retry
        let attempts = self.invoke_with_retry(call, context).await;

        // 8. Measure and inspect the result
        let mut usage = self.monitor.stop(snapshot);
        usage.network_requests = attempts.network_requests;
        let mut warnings = Vec::new();
        if !self.monitor.check_limits(&usage, &self.limits) {
            warn!("Tool {} exceeded resource limits: {:?}", call.name, usage);
            warnings.push(format!(
                "Resource limits exceeded (elapsed {:?}, memory delta {} bytes)",
                usage.elapsed, usage.memory_delta_bytes
            ));
        }
        let outcome = attempts
            .outcome
            .and_then(|value| inspect_result(value, &mut warnings));

        // 9. History and stats
        let elapsed = started.elapsed();
        let success = outcome.is_ok();
        let (result, error, history_outcome) = match outcome {
            Ok(value) => {
                call.complete(value.clone(), elapsed);
                info!("Tool {} completed in {:?}", call.name, elapsed);
                (
                    Some(value.clone()),
                    None,
                    ExecutionOutcome::Success { result: value },
                )
            }
            Err(err) => {
                let error = ToolCallError::from(&err);
                call.fail(error.clone(), elapsed);
                warn!("Tool {} failed after {} attempt(s): {}", call.name, attempts.count, err);
                (
                    None,
                    Some(error.clone()),
                    ExecutionOutcome::Failure { error },
                )
            }
        };

        self.registry.record_execution(&call.name, success, elapsed);
        self.record_history(
            call,
            context,
            history_outcome,
            ExecutionMetrics {
                execution_time: elapsed,
                attempts: attempts.count,
                memory_delta_bytes: usage.memory_delta_bytes,
                violations: attempts.violations.len(),
            },
        );

        // 10. `_active` releases the call id on return
        ExecutionResult {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            success,
            result,
            error,
            execution_time: elapsed,
            attempts: attempts.count,
            warnings,
            violations: attempts.violations,
            sandbox_id: attempts.sandbox_id,
            resource_usage: usage,
        }
    }

    /// Runs `calls` in chunks of `max_concurrent_executions`. A chunk starts
    /// only after the previous one has fully settled. Results keep input order.
    pub async fn execute_tools(
        &self,
        calls: &mut [ToolCall],
        context: &ExecutionContext,
    ) -> Vec<ExecutionResult> {
        let chunk_size = self.config.max_concurrent_executions.max(1);
        let mut results = Vec::with_capacity(calls.len());

        for chunk in calls.chunks_mut(chunk_size) {
            debug!("Dispatching batch of {} calls", chunk.len());
            let batch = chunk
                .iter_mut()
                .map(|call| self.execute_tool(call, context));
            results.extend(join_all(batch).await);
        }
        results
    }

    /// Bookkeeping only: a running handler is not interrupted.
    pub fn cancel_execution(&self, call_id: &str) -> bool {
        let removed = self.active.lock().remove(call_id).is_some();
        if removed {
            info!("Cancelled execution bookkeeping for call {}", call_id);
        }
        removed
    }

    pub fn active_executions(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.active.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn get_execution_history(
        &self,
        tool_name: Option<&str>,
        user_id: Option<&str>,
        limit: Option<usize>,
    ) -> Vec<ExecutionHistoryEntry> {
        self.history.lock().query(tool_name, user_id, limit)
    }

    pub fn get_execution_statistics(&self) -> ExecutionStatistics {
        let per_tool = self.registry.all_stats();

        let total_executions: u64 = per_tool.values().map(|s| s.total_calls).sum();
        let successful: u64 = per_tool.values().map(|s| s.successful_calls).sum();
        let failed: u64 = per_tool.values().map(|s| s.failed_calls).sum();
        let (success_rate, average_execution_time) = if total_executions == 0 {
            (0.0, Duration::ZERO)
        } else {
            let weighted: f64 = per_tool
                .values()
                .map(|s| s.average_execution_time.as_secs_f64() * s.total_calls as f64)
                .sum();
            (
                successful as f64 / total_executions as f64,
                Duration::from_secs_f64(weighted / total_executions as f64),
            )
        };

        ExecutionStatistics {
            total_executions,
            successful,
            failed,
            success_rate,
            average_execution_time,
            per_tool,
            active_executions: self.active.lock().len(),
            active_sandboxes: self.sandbox.active_sandboxes(),
            history_size: self.history.lock().len(),
        }
    }

    pub fn clear_history(&self) {
        self.history.lock().clear();
        info!("Execution history cleared");
    }

    async fn invoke_with_retry(&self, call: &ToolCall, context: &ExecutionContext) -> Attempts {
        let mut count = 0;
        let mut violations = Vec::new();
        let mut network_requests = 0;
        let mut sandbox_id = None;

        loop {
            count += 1;
            let result = self
                .sandbox
                .execute_tool(self.handler.clone(), &call.name, &call.arguments, context)
                .await;

            violations.extend(result.violations.iter().cloned());
            network_requests += result.sandbox_context.network_requests;
            if self.sandbox.is_enabled() {
                sandbox_id = Some(result.sandbox_context.id.clone());
            }

            match result.into_outcome() {
                Err(err) if self.retry.should_retry(&err, count) => {
                    let delay = self.retry.delay_for(count);
                    warn!(
                        "Tool {} failed (attempt {}/{}): {}; retrying in {:?}",
                        call.name,
                        count,
                        self.retry.max_attempts(),
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                outcome => {
                    return Attempts {
                        outcome,
                        count,
                        violations,
                        sandbox_id,
                        network_requests,
                    }
                }
            }
        }
    }

    /// Failure before the handler ran. Stats are only kept for known tools.
    fn reject(
        &self,
        call: &mut ToolCall,
        context: &ExecutionContext,
        started: Instant,
        err: EngineError,
        known_tool: bool,
    ) -> ExecutionResult {
        let elapsed = started.elapsed();
        warn!("Tool call {} ({}) rejected: {}", call.id, call.name, err);

        let error = ToolCallError::from(&err);
        call.fail(error.clone(), elapsed);
        if known_tool {
            self.registry.record_execution(&call.name, false, elapsed);
        }
        self.record_history(
            call,
            context,
            ExecutionOutcome::Failure {
                error: error.clone(),
            },
            ExecutionMetrics {
                execution_time: elapsed,
                ..Default::default()
            },
        );

        ExecutionResult::rejected(call, error, elapsed)
    }

    fn record_history(
        &self,
        call: &ToolCall,
        context: &ExecutionContext,
        outcome: ExecutionOutcome,
        metrics: ExecutionMetrics,
    ) {
        let entry = ExecutionHistoryEntry {
            id: Uuid::new_v4().to_string(),
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            user_id: context.user_id.clone(),
            parameters: call.arguments.clone(),
            outcome,
            metrics,
            timestamp: Utc::now(),
            cached: false,
        };

        // Fire and forget
        if let Some(audit) = &self.audit {
            let audit = audit.clone();
            let audit_entry = entry.clone();
            tokio::spawn(async move {
                audit.log(audit_entry).await;
            });
        }

        self.history.lock().push(entry);
    }
}

/// A result must be a JSON object. An embedded `error`, or `success: false`
/// without one, is surfaced as a warning only.
fn inspect_result(value: Value, warnings: &mut Vec<String>) -> EngineResult<Value> {
    let Some(object) = value.as_object() else {
        return Err(EngineError::InvalidResult(format!(
            "expected an object, got {}",
            json_kind(&value)
        )));
    };

    match object.get("error") {
        Some(err) if !err.is_null() => {
            let message = err.as_str().map(str::to_string).unwrap_or_else(|| err.to_string());
            warnings.push(format!("Tool reported an error: {}", message));
        }
        _ => {
            if object.get("success") == Some(&Value::Bool(false)) {
                warnings.push("Tool reported success=false without an error".to_string());
            }
        }
    }
    Ok(value)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_inspect_result_rejects_non_objects() {
        let mut warnings = Vec::new();
        for value in [Value::Null, json!([1, 2]), json!("ok"), json!(3)] {
            let err = inspect_result(value, &mut warnings).unwrap_err();
            assert_eq!(err.code(), "INVALID_RESULT");
            assert!(!err.is_retryable());
        }
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_inspect_result_warnings() {
        let mut warnings = Vec::new();
        inspect_result(json!({"error": "quota nearly used"}), &mut warnings).unwrap();
        inspect_result(json!({"success": false}), &mut warnings).unwrap();
        inspect_result(json!({"success": true, "error": null}), &mut warnings).unwrap();

        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("quota nearly used"));
        assert!(warnings[1].contains("success=false"));
    }

    #[test]
    fn test_active_guard_token() {
        let active = Mutex::new(HashMap::new());
        let first = ActiveGuard::claim(&active, "call-1", 1).unwrap();
        assert!(ActiveGuard::claim(&active, "call-1", 2).is_none());

        // cancel, then a new claim for the same id
        active.lock().remove("call-1");
        let second = ActiveGuard::claim(&active, "call-1", 3).unwrap();

        drop(first);
        assert!(active.lock().contains_key("call-1"));
        drop(second);
        assert!(active.lock().is_empty());
    }
}

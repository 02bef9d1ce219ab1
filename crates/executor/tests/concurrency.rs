#[cfg(test)]
mod concurrency_tests {
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{json, Map, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;
    use toolgate_core::*;
    use toolgate_executor::*;
    use toolgate_tools::{HandlerError, ToolHandler, ToolRegistry};

    /// Tracks invocation instants and how many calls overlap.
    #[derive(Default)]
    struct TimedHandler {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        started_at: Mutex<Vec<Instant>>,
        finished: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ToolHandler for TimedHandler {
        async fn invoke(
            &self,
            tool_name: &str,
            arguments: &Map<String, Value>,
            _context: &ExecutionContext,
        ) -> Result<Value, HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.started_at.lock().push(Instant::now());

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let delay = arguments.get("delay_ms").and_then(Value::as_u64).unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if let Some(label) = arguments.get("label").and_then(Value::as_str) {
                self.finished.lock().push(label.to_string());
            }

            match tool_name {
                "flaky" => Err(HandlerError::new("upstream request timeout")),
                "refused" => Err(HandlerError::new("connect failed").with_code("ECONNREFUSED")),
                "broken" => Err(HandlerError::new("invalid argument")),
                _ => Ok(json!({"ok": true})),
            }
        }
    }

    fn tool(name: &str) -> ToolDefinition {
        ToolDefinition::new(name, format!("{name} for tests"), ToolCategory::Utility)
            .with_permissions(["USE_TOOLS"])
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new("user-1", ["USE_TOOLS"])
    }

    fn setup(config: EngineConfig) -> (ToolExecutor, Arc<TimedHandler>) {
        let handler = Arc::new(TimedHandler::default());
        let executor = ToolExecutor::new(config, Arc::new(ToolRegistry::new()), handler.clone())
            .with_monitor(Arc::new(ElapsedMonitor));
        (executor, handler)
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_window_slides() {
        let (executor, handler) = setup(EngineConfig::default());
        executor.register_tool(tool("ping").with_rate_limit(3)).unwrap();

        for i in 0..3 {
            let mut call = ToolCall::new(format!("c{i}"), "ping", json!({}));
            assert!(executor.execute_tool(&mut call, &ctx()).await.success);
        }

        let mut fourth = ToolCall::new("c3", "ping", json!({}));
        let result = executor.execute_tool(&mut fourth, &ctx()).await;
        assert_eq!(result.error_code(), Some("RATE_LIMIT_EXCEEDED"));
        assert!(result.error.unwrap().retryable);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);

        tokio::time::advance(Duration::from_secs(61)).await;

        let mut later = ToolCall::new("c4", "ping", json!({}));
        assert!(executor.execute_tool(&mut later, &ctx()).await.success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiting_can_be_disabled() {
        let config = EngineConfig {
            enable_rate_limiting: false,
            ..Default::default()
        };
        let (executor, _) = setup(config);
        executor.register_tool(tool("ping").with_rate_limit(1)).unwrap();

        for i in 0..3 {
            let mut call = ToolCall::new(format!("c{i}"), "ping", json!({}));
            assert!(executor.execute_tool(&mut call, &ctx()).await.success);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retried_with_linear_backoff() {
        let (executor, handler) = setup(EngineConfig::default());
        executor.register_tool(tool("flaky")).unwrap();

        let mut call = ToolCall::new("c1", "flaky", json!({}));
        let result = executor.execute_tool(&mut call, &ctx()).await;

        assert!(!result.success);
        assert_eq!(result.attempts, 4);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 4);
        let error = result.error.unwrap();
        assert_eq!(error.message, "upstream request timeout");
        assert!(error.retryable);

        let started = handler.started_at.lock();
        let gaps: Vec<_> = started.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            gaps,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(3)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_classifies_error_codes() {
        let config = EngineConfig {
            retry_attempts: 1,
            retry_delay: 10,
            ..Default::default()
        };
        let (executor, handler) = setup(config);
        executor.register_tool(tool("refused")).unwrap();
        executor.register_tool(tool("broken")).unwrap();

        let mut refused = ToolCall::new("c1", "refused", json!({}));
        assert_eq!(executor.execute_tool(&mut refused, &ctx()).await.attempts, 2);

        let mut broken = ToolCall::new("c2", "broken", json!({}));
        assert_eq!(executor.execute_tool(&mut broken, &ctx()).await.attempts, 1);

        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_timeout_is_retried() {
        let config = EngineConfig {
            default_timeout: 100,
            retry_attempts: 2,
            retry_delay: 10,
            ..Default::default()
        };
        let (executor, handler) = setup(config);
        executor.register_tool(tool("slow")).unwrap();

        let mut call = ToolCall::new("c1", "slow", json!({"delay_ms": 5_000}));
        let result = executor.execute_tool(&mut call, &ctx()).await;

        assert_eq!(result.error_code(), Some("TIMEOUT"));
        assert_eq!(result.attempts, 3);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.violations.len(), 3);
        assert!(result
            .violations
            .iter()
            .all(|v| v.kind == ViolationKind::Resource && v.severity == Severity::Medium));
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_call_id_is_not_reentrant() {
        let (executor, handler) = setup(EngineConfig::default());
        executor.register_tool(tool("slow")).unwrap();

        let mut first = ToolCall::new("shared", "slow", json!({"delay_ms": 500}));
        let mut second = ToolCall::new("shared", "slow", json!({"delay_ms": 500}));
        let context = ctx();

        let (a, b) = tokio::join!(
            executor.execute_tool(&mut first, &context),
            executor.execute_tool(&mut second, &context)
        );

        assert!(a.success);
        assert_eq!(b.error_code(), Some("EXECUTION_IN_PROGRESS"));
        assert!(!b.error.unwrap().retryable);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);

        // rejected duplicate leaves the call and the history untouched
        assert_eq!(second.status, ToolCallStatus::Pending);
        assert_eq!(executor.get_execution_history(None, None, None).len(), 1);
        assert!(executor.active_executions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_execution_is_bookkeeping_only() {
        let (executor, handler) = setup(EngineConfig::default());
        executor.register_tool(tool("slow")).unwrap();

        let mut call = ToolCall::new("c1", "slow", json!({"delay_ms": 1_000}));
        let context = ctx();
        let (result, cancelled) = tokio::join!(executor.execute_tool(&mut call, &context), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let active = executor.active_executions();
            (active, executor.cancel_execution("c1"))
        });

        assert_eq!(cancelled.0, vec!["c1".to_string()]);
        assert!(cancelled.1);
        // the handler still ran to completion
        assert!(result.success);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert!(!executor.cancel_execution("c1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_bounded_and_ordered() {
        let (executor, handler) = setup(EngineConfig::default());
        executor.register_tool(tool("work")).unwrap();

        // call 3 sits in the first chunk and is the slowest; call 7 is fast
        let mut calls: Vec<_> = (0..12)
            .map(|i| {
                let delay = if i == 2 { 900 } else { 50 + (i as u64 % 5) * 10 };
                ToolCall::new(
                    format!("call-{i}"),
                    "work",
                    json!({"delay_ms": delay, "label": format!("call-{i}")}),
                )
            })
            .collect();

        let results = executor.execute_tools(&mut calls, &ctx()).await;

        assert_eq!(results.len(), 12);
        assert!(results.iter().all(|r| r.success));
        let ids: Vec<_> = results.iter().map(|r| r.call_id.clone()).collect();
        let expected: Vec<_> = (0..12).map(|i| format!("call-{i}")).collect();
        assert_eq!(ids, expected);

        assert_eq!(handler.max_in_flight.load(Ordering::SeqCst), 5);
        let finished = handler.finished.lock();
        let pos = |label: &str| finished.iter().position(|l| l == label).unwrap();
        assert!(pos("call-2") > pos("call-0"));
        // chunk boundaries hold: the slow call finishes before chunk two starts
        assert!(pos("call-2") < pos("call-5"));
        assert!(calls.iter().all(|c| c.status == ToolCallStatus::Completed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_mixed_outcomes() {
        let config = EngineConfig {
            max_concurrent_executions: 2,
            ..Default::default()
        };
        let (executor, _) = setup(config);
        executor.register_tool(tool("work")).unwrap();
        executor.register_tool(tool("broken")).unwrap();

        let mut calls = vec![
            ToolCall::new("a", "work", json!({})),
            ToolCall::new("b", "broken", json!({})),
            ToolCall::new("c", "missing", json!({})),
        ];
        let results = executor.execute_tools(&mut calls, &ctx()).await;

        let codes: Vec<_> = results.iter().map(|r| r.error_code()).collect();
        assert_eq!(codes, vec![None, Some("HANDLER_ERROR"), Some("TOOL_NOT_FOUND")]);
        assert_eq!(calls[1].status, ToolCallStatus::Failed);
    }
}

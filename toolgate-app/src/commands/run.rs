use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use toolgate_core::{EngineConfig, ExecutionContext};
use toolgate_executor::{ExecutionResult, ToolExecutor};
use toolgate_tools::ToolRegistry;
use tracing::{info, warn};

use crate::audit::JsonlAuditSink;
use crate::catalog::{load_calls, Catalog};
use crate::echo::dry_run_handlers;

pub struct RunOptions {
    pub catalog: PathBuf,
    pub calls: PathBuf,
    pub user: String,
    pub permissions: Vec<String>,
    pub audit_log: Option<PathBuf>,
}

/// Dry-runs every call in the calls file through the full engine pipeline,
/// with all categories routed to the echo handler.
pub async fn run(config: EngineConfig, options: &RunOptions) -> Result<Vec<ExecutionResult>> {
    println!("🧪 Dry run: {}", options.calls.display());
    println!("👤 User: {} {:?}\n", options.user, options.permissions);

    // Catalog goes in before the executor exists so the permission table is seeded from it.
    let registry = Arc::new(ToolRegistry::new());
    let report = Catalog::load(&options.catalog)?.register_into(&registry);
    for (name, err) in &report.rejected {
        warn!("Skipping catalog entry {}: {}", name, err);
    }
    info!("{} tools registered", report.registered.len());

    let handlers = Arc::new(dry_run_handlers(registry.clone()));
    let mut executor = ToolExecutor::new(config, registry, handlers);

    let sink = match &options.audit_log {
        Some(path) => Some(Arc::new(open_sink(path)?)),
        None => None,
    };
    if let Some(sink) = &sink {
        executor = executor.with_audit_sink(sink.clone());
    }

    let mut calls = load_calls(&options.calls)?;
    let context = ExecutionContext::new(options.user.clone(), options.permissions.iter().cloned());
    let results = executor.execute_tools(&mut calls, &context).await;

    for result in &results {
        print_result(result);
    }

    let stats = executor.get_execution_statistics();
    println!(
        "\n{} succeeded, {} failed ({:.0}% success)",
        stats.successful,
        stats.failed,
        stats.success_rate * 100.0
    );

    if let Some(sink) = &sink {
        let expected = executor.get_execution_statistics().history_size;
        if !sink.drain(expected, Duration::from_secs(2)).await {
            warn!("Audit log {} may be incomplete", sink.path().display());
        }
    }

    Ok(results)
}

fn open_sink(path: &Path) -> Result<JsonlAuditSink> {
    JsonlAuditSink::new(path).with_context(|| format!("Failed to open audit log {}", path.display()))
}

fn print_result(result: &ExecutionResult) {
    match &result.error {
        None => {
            println!(
                "  ✓ {} {} ({:?}, {} attempt(s))",
                result.call_id, result.tool_name, result.execution_time, result.attempts
            );
            for warning in &result.warnings {
                println!("    ⚠️  {}", warning);
            }
        }
        Some(error) => {
            println!(
                "  ✗ {} {} [{}] {}",
                result.call_id, result.tool_name, error.code, error.message
            );
            for violation in &result.violations {
                println!(
                    "    🛡️  {} ({:?}): {}",
                    violation.kind, violation.severity, violation.message
                );
            }
        }
    }
}

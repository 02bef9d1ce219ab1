use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// Per-tool counters plus the sliding window used for rate limiting and reporting.
#[derive(Debug, Clone, Default)]
pub(crate) struct ExecutionStats {
    total_calls: u64,
    successful_calls: u64,
    failed_calls: u64,
    average_execution_time: Duration,
    recent_calls: VecDeque<Instant>,
    last_called_at: Option<DateTime<Utc>>,
}

impl ExecutionStats {
    pub(crate) fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.recent_calls.front() {
            if now.duration_since(oldest) >= window {
                self.recent_calls.pop_front();
            } else {
                break;
            }
        }
    }

    /// Reserves a slot in the window unless `limit` is already reached.
    pub(crate) fn try_acquire(&mut self, now: Instant, window: Duration, limit: usize) -> bool {
        self.prune(now, window);
        if self.recent_calls.len() >= limit {
            return false;
        }
        self.note(now, window);
        true
    }

    /// Records an admitted call in the window without any limit.
    pub(crate) fn note(&mut self, now: Instant, window: Duration) {
        self.prune(now, window);
        self.recent_calls.push_back(now);
        self.last_called_at = Some(Utc::now());
    }

    pub(crate) fn record(&mut self, success: bool, elapsed: Duration) {
        self.total_calls += 1;
        if success {
            self.successful_calls += 1;
        } else {
            self.failed_calls += 1;
        }

        // running mean: avg += (x - avg) / n
        let n = self.total_calls as f64;
        let avg = self.average_execution_time.as_secs_f64();
        let next = avg + (elapsed.as_secs_f64() - avg) / n;
        self.average_execution_time = Duration::from_secs_f64(next.max(0.0));
        self.last_called_at = Some(Utc::now());
    }

    pub(crate) fn snapshot(&self, now: Instant, window: Duration) -> ToolStats {
        ToolStats {
            total_calls: self.total_calls,
            successful_calls: self.successful_calls,
            failed_calls: self.failed_calls,
            average_execution_time: self.average_execution_time,
            recent_calls: self
                .recent_calls
                .iter()
                .filter(|t| now.duration_since(**t) < window)
                .count(),
            last_called_at: self.last_called_at,
        }
    }
}

/// Point-in-time copy of a tool's statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolStats {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub average_execution_time: Duration,
    /// Calls inside the current rate-limit window.
    pub recent_calls: usize,
    pub last_called_at: Option<DateTime<Utc>>,
}

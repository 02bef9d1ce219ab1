use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use toolgate_core::ToolCallError;

pub const DEFAULT_HISTORY_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ExecutionOutcome {
    Success { result: Value },
    Failure { error: ToolCallError },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetrics {
    pub execution_time: Duration,
    pub attempts: u32,
    pub memory_delta_bytes: i64,
    pub violations: usize,
}

/// Immutable record of one finished invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionHistoryEntry {
    pub id: String,
    pub call_id: String,
    pub tool_name: String,
    pub user_id: String,
    pub parameters: Map<String, Value>,
    pub outcome: ExecutionOutcome,
    pub metrics: ExecutionMetrics,
    pub timestamp: DateTime<Utc>,
    pub cached: bool,
}

impl ExecutionHistoryEntry {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ExecutionOutcome::Success { .. })
    }
}

/// Bounded ring buffer; the oldest entry is evicted once capacity is reached.
#[derive(Debug)]
pub struct ExecutionHistory {
    entries: VecDeque<ExecutionHistoryEntry>,
    capacity: usize,
}

impl ExecutionHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn push(&mut self, entry: ExecutionHistoryEntry) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Oldest first; `limit` keeps the most recent matches.
    pub fn query(
        &self,
        tool_name: Option<&str>,
        user_id: Option<&str>,
        limit: Option<usize>,
    ) -> Vec<ExecutionHistoryEntry> {
        let matching: Vec<_> = self
            .entries
            .iter()
            .filter(|e| tool_name.map_or(true, |t| e.tool_name == t))
            .filter(|e| user_id.map_or(true, |u| e.user_id == u))
            .collect();

        let skip = limit.map_or(0, |l| matching.len().saturating_sub(l));
        matching.into_iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for ExecutionHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(call_id: &str, tool: &str, user: &str) -> ExecutionHistoryEntry {
        ExecutionHistoryEntry {
            id: format!("h-{call_id}"),
            call_id: call_id.to_string(),
            tool_name: tool.to_string(),
            user_id: user.to_string(),
            parameters: Map::new(),
            outcome: ExecutionOutcome::Success { result: json!({}) },
            metrics: ExecutionMetrics::default(),
            timestamp: Utc::now(),
            cached: false,
        }
    }

    #[test]
    fn test_ring_buffer_evicts_oldest() {
        let mut history = ExecutionHistory::new(3);
        for i in 0..5 {
            history.push(entry(&format!("c{i}"), "t", "u"));
        }
        assert_eq!(history.len(), 3);
        let ids: Vec<_> = history.query(None, None, None).into_iter().map(|e| e.call_id).collect();
        assert_eq!(ids, vec!["c2", "c3", "c4"]);
    }

    #[test]
    fn test_filters_and_limit() {
        let mut history = ExecutionHistory::default();
        history.push(entry("1", "ban", "alice"));
        history.push(entry("2", "kick", "alice"));
        history.push(entry("3", "ban", "bob"));
        history.push(entry("4", "ban", "alice"));

        assert_eq!(history.query(Some("ban"), None, None).len(), 3);
        assert_eq!(history.query(Some("ban"), Some("alice"), None).len(), 2);

        let latest = history.query(None, Some("alice"), Some(2));
        let ids: Vec<_> = latest.iter().map(|e| e.call_id.as_str()).collect();
        assert_eq!(ids, vec!["2", "4"]);
    }

    #[test]
    fn test_outcome_serialization_tag() {
        let value = serde_json::to_value(entry("1", "t", "u")).unwrap();
        assert_eq!(value["outcome"]["status"], "success");
        assert_eq!(value["callId"], "1");
    }
}

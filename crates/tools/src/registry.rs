use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::{json, Map, Value};
use tokio::time::Instant;
use toolgate_core::{
    EngineError, EngineResult, ParameterSpec, ParameterType, SafetyLevel, ToolCategory,
    ToolDefinition,
};
use toolgate_policy::has_any_permission;
use tracing::{debug, info, warn};

use crate::stats::{ExecutionStats, ToolStats, RATE_LIMIT_WINDOW};
use crate::validator::{CompiledPatterns, ParameterValidator};

#[derive(Default)]
struct Catalog {
    tools: HashMap<String, Arc<ToolDefinition>>,
    patterns: HashMap<String, Arc<CompiledPatterns>>,
    categories: HashMap<ToolCategory, BTreeSet<String>>,
}

/// Catalog of tool definitions plus per-tool execution statistics.
pub struct ToolRegistry {
    catalog: RwLock<Catalog>,
    stats: Mutex<HashMap<String, ExecutionStats>>,
    rate_limit_window: Duration,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::with_rate_limit_window(RATE_LIMIT_WINDOW)
    }

    pub fn with_rate_limit_window(window: Duration) -> Self {
        Self {
            catalog: RwLock::new(Catalog::default()),
            stats: Mutex::new(HashMap::new()),
            rate_limit_window: window,
        }
    }

    /// Returns every problem with a definition; empty means it can be registered.
    pub fn validate_definition(tool: &ToolDefinition) -> Vec<String> {
        let mut problems = Vec::new();

        if tool.name.trim().is_empty() {
            problems.push("tool name cannot be empty".to_string());
        }
        if tool.description.trim().is_empty() {
            problems.push("tool description cannot be empty".to_string());
        }
        if tool.permissions.iter().any(|p| p.trim().is_empty()) {
            problems.push("permission names cannot be empty".to_string());
        }
        if let Some(limit) = tool.safety.rate_limit {
            if limit.requests_per_minute == 0 {
                problems.push("rateLimit.requestsPerMinute must be at least 1".to_string());
            }
        }

        let mut seen = BTreeSet::new();
        for param in &tool.parameters {
            if !seen.insert(param.name.as_str()) {
                problems.push(format!("duplicate parameter: {}", param.name));
            }
            problems.extend(ParameterValidator::validate_definition(param));
        }

        problems
    }

    pub fn register(&self, tool: ToolDefinition) -> EngineResult<()> {
        let problems = Self::validate_definition(&tool);
        if !problems.is_empty() {
            warn!("Rejected definition for {}: {:?}", tool.name, problems);
            return Err(EngineError::InvalidDefinition(problems));
        }

        let mut catalog = self.catalog.write();
        if catalog.tools.contains_key(&tool.name) {
            return Err(EngineError::DuplicateTool(tool.name));
        }

        info!("Registered tool: {} ({})", tool.name, tool.category);
        catalog
            .categories
            .entry(tool.category)
            .or_default()
            .insert(tool.name.clone());
        catalog.patterns.insert(
            tool.name.clone(),
            Arc::new(CompiledPatterns::compile(&tool.parameters)),
        );
        catalog.tools.insert(tool.name.clone(), Arc::new(tool));
        Ok(())
    }

    /// Registers an untyped catalog entry (JSON or YAML converted to JSON).
    pub fn register_value(&self, value: Value) -> EngineResult<()> {
        self.register(ToolDefinition::from_value(value)?)
    }

    /// Idempotent. Statistics are kept so reporting survives re-registration.
    pub fn unregister(&self, name: &str) -> bool {
        let mut catalog = self.catalog.write();
        let Some(tool) = catalog.tools.remove(name) else {
            return false;
        };
        catalog.patterns.remove(name);

        if let Some(names) = catalog.categories.get_mut(&tool.category) {
            names.remove(name);
            if names.is_empty() {
                catalog.categories.remove(&tool.category);
            }
        }
        info!("Unregistered tool: {}", name);
        true
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<ToolDefinition>> {
        self.catalog.read().tools.get(name).cloned()
    }

    /// Validates call arguments against the registered definition, reusing
    /// the patterns compiled at registration.
    pub fn validate_arguments(&self, name: &str, arguments: &Map<String, Value>) -> EngineResult<()> {
        let (tool, patterns) = {
            let catalog = self.catalog.read();
            let tool = catalog
                .tools
                .get(name)
                .cloned()
                .ok_or_else(|| EngineError::ToolNotFound(name.to_string()))?;
            let patterns = catalog.patterns.get(name).cloned().unwrap_or_default();
            (tool, patterns)
        };
        ParameterValidator::validate_with_patterns(&tool.parameters, &patterns, arguments)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.catalog.read().tools.contains_key(name)
    }

    pub fn by_category(&self, category: ToolCategory) -> Vec<Arc<ToolDefinition>> {
        let catalog = self.catalog.read();
        catalog
            .categories
            .get(&category)
            .map(|names| {
                names
                    .iter()
                    .filter_map(|n| catalog.tools.get(n).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn categories(&self) -> Vec<ToolCategory> {
        let mut categories: Vec<_> = self.catalog.read().categories.keys().copied().collect();
        categories.sort_by_key(|c| c.as_str());
        categories
    }

    pub fn by_safety_level(&self, level: SafetyLevel) -> Vec<Arc<ToolDefinition>> {
        let mut tools: Vec<_> = self
            .catalog
            .read()
            .tools
            .values()
            .filter(|t| t.safety.level == level)
            .cloned()
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Case-insensitive substring match over name, description and tags.
    pub fn search(&self, query: &str) -> Vec<Arc<ToolDefinition>> {
        let query = query.to_lowercase();
        let mut tools: Vec<_> = self
            .catalog
            .read()
            .tools
            .values()
            .filter(|t| {
                t.name.to_lowercase().contains(&query)
                    || t.description.to_lowercase().contains(&query)
                    || t.tags.iter().any(|tag| tag.to_lowercase().contains(&query))
            })
            .cloned()
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// True iff the caller holds at least one of the tool's required permissions.
    pub fn has_permission(&self, name: &str, granted: &[String]) -> bool {
        self.lookup(name)
            .map(|tool| has_any_permission(&tool.permissions, granted))
            .unwrap_or(false)
    }

    /// Checks the sliding window and, when the call is admitted, records it.
    pub fn check_rate_limit(&self, name: &str) -> EngineResult<()> {
        let tool = self
            .lookup(name)
            .ok_or_else(|| EngineError::ToolNotFound(name.to_string()))?;
        let mut stats = self.stats.lock();
        let entry = stats.entry(name.to_string()).or_default();
        let Some(limit) = tool.safety.rate_limit else {
            entry.note(Instant::now(), self.rate_limit_window);
            return Ok(());
        };

        let admitted = entry.try_acquire(
            Instant::now(),
            self.rate_limit_window,
            limit.requests_per_minute as usize,
        );

        if admitted {
            Ok(())
        } else {
            warn!(
                "Rate limit exceeded for {} ({} per minute)",
                name, limit.requests_per_minute
            );
            Err(EngineError::RateLimitExceeded {
                tool: name.to_string(),
                limit: limit.requests_per_minute,
            })
        }
    }

    /// Counts an admitted call in the window without enforcing any limit.
    pub fn note_call(&self, name: &str) {
        self.stats
            .lock()
            .entry(name.to_string())
            .or_default()
            .note(Instant::now(), self.rate_limit_window);
    }

    pub fn record_execution(&self, name: &str, success: bool, elapsed: Duration) {
        debug!("Recording execution of {}: success={} in {:?}", name, success, elapsed);
        self.stats
            .lock()
            .entry(name.to_string())
            .or_default()
            .record(success, elapsed);
    }

    pub fn stats(&self, name: &str) -> Option<ToolStats> {
        let now = Instant::now();
        self.stats
            .lock()
            .get(name)
            .map(|s| s.snapshot(now, self.rate_limit_window))
    }

    pub fn all_stats(&self) -> BTreeMap<String, ToolStats> {
        let now = Instant::now();
        self.stats
            .lock()
            .iter()
            .map(|(name, s)| (name.clone(), s.snapshot(now, self.rate_limit_window)))
            .collect()
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<_> = self.catalog.read().tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn count(&self) -> usize {
        self.catalog.read().tools.len()
    }

    /// Function-calling schemas in the shape LLM providers expect.
    pub fn schemas(&self) -> Vec<Value> {
        let catalog = self.catalog.read();
        let mut tools: Vec<_> = catalog.tools.values().collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
            .into_iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": parameters_schema(&tool.parameters)
                    }
                })
            })
            .collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn parameters_schema(params: &[ParameterSpec]) -> Value {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();

    for param in params {
        let mut prop = serde_json::Map::new();
        prop.insert("type".into(), json!(param.param_type.as_str()));
        if !param.description.is_empty() {
            prop.insert("description".into(), json!(param.description));
        }
        if let Some(rules) = &param.validation {
            if let Some(pattern) = &rules.pattern {
                prop.insert("pattern".into(), json!(pattern));
            }
            if let Some(min) = rules.min {
                prop.insert("minimum".into(), json!(min));
            }
            if let Some(max) = rules.max {
                prop.insert("maximum".into(), json!(max));
            }
            let (min_key, max_key) = if param.param_type == ParameterType::Array {
                ("minItems", "maxItems")
            } else {
                ("minLength", "maxLength")
            };
            if let Some(min) = rules.min_length {
                prop.insert(min_key.into(), json!(min));
            }
            if let Some(max) = rules.max_length {
                prop.insert(max_key.into(), json!(max));
            }
            if let Some(values) = &rules.allowed_values {
                prop.insert("enum".into(), json!(values));
            }
        }
        properties.insert(param.name.clone(), Value::Object(prop));
        if param.required {
            required.push(param.name.clone());
        }
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": required
    })
}

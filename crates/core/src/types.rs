use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    Discord,
    Moderation,
    Utility,
    Information,
    Memory,
    System,
}

impl ToolCategory {
    pub const ALL: [ToolCategory; 6] = [
        ToolCategory::Discord,
        ToolCategory::Moderation,
        ToolCategory::Utility,
        ToolCategory::Information,
        ToolCategory::Memory,
        ToolCategory::System,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolCategory::Discord => "discord",
            ToolCategory::Moderation => "moderation",
            ToolCategory::Utility => "utility",
            ToolCategory::Information => "information",
            ToolCategory::Memory => "memory",
            ToolCategory::System => "system",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == raw)
    }
}

impl fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyLevel {
    Safe,
    Restricted,
    Dangerous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimit {
    pub requests_per_minute: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafetyConfig {
    pub level: SafetyLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimit>,
}

impl SafetyConfig {
    pub fn new(level: SafetyLevel) -> Self {
        Self {
            level,
            rate_limit: None,
        }
    }
}

/// Closed set of argument types a tool parameter may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParameterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterType::String => "string",
            ParameterType::Number => "number",
            ParameterType::Boolean => "boolean",
            ParameterType::Array => "array",
            ParameterType::Object => "object",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "string" => Some(ParameterType::String),
            "number" => Some(ParameterType::Number),
            "boolean" => Some(ParameterType::Boolean),
            "array" => Some(ParameterType::Array),
            "object" => Some(ParameterType::Object),
            _ => None,
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ParameterType::String => value.is_string(),
            ParameterType::Number => value.is_number(),
            ParameterType::Boolean => value.is_boolean(),
            ParameterType::Array => value.is_array(),
            ParameterType::Object => value.is_object(),
        }
    }
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterValidation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ParameterValidation>,
}

impl ParameterSpec {
    pub fn new(name: impl Into<String>, param_type: ParameterType) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: false,
            description: String::new(),
            validation: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_validation(mut self, validation: ParameterValidation) -> Self {
        self.validation = Some(validation);
        self
    }
}

/// Declarative description of a tool. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub category: ToolCategory,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    #[serde(default)]
    pub permissions: Vec<String>,
    pub safety: SafetyConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        category: ToolCategory,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            category,
            parameters: Vec::new(),
            permissions: Vec::new(),
            safety: SafetyConfig::new(SafetyLevel::Safe),
            tags: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, parameter: ParameterSpec) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions = permissions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_safety_level(mut self, level: SafetyLevel) -> Self {
        self.safety.level = level;
        self
    }

    pub fn with_rate_limit(mut self, requests_per_minute: u32) -> Self {
        self.safety.rate_limit = Some(RateLimit {
            requests_per_minute,
        });
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Builds a definition from an untyped document (JSON or YAML catalog entry).
    ///
    /// Structural problems are reported together as
    /// [`EngineError::InvalidDefinition`] instead of a bare serde message.
    pub fn from_value(value: Value) -> Result<Self, EngineError> {
        let Some(obj) = value.as_object() else {
            return Err(EngineError::InvalidDefinition(vec![
                "definition must be an object".into(),
            ]));
        };

        let mut problems = Vec::new();
        for field in ["name", "description", "category", "safety"] {
            if obj.get(field).map_or(true, Value::is_null) {
                problems.push(format!("missing required field: {field}"));
            }
        }

        if let Some(raw) = obj.get("category").and_then(Value::as_str) {
            if ToolCategory::parse(raw).is_none() {
                problems.push(format!("unknown category: {raw}"));
            }
        }

        match obj.get("parameters") {
            None => {}
            Some(Value::Array(items)) => {
                for (idx, item) in items.iter().enumerate() {
                    check_raw_parameter(idx, item, &mut problems);
                }
            }
            Some(_) => problems.push("parameters must be a list".into()),
        }

        if !problems.is_empty() {
            return Err(EngineError::InvalidDefinition(problems));
        }

        serde_json::from_value(value)
            .map_err(|e| EngineError::InvalidDefinition(vec![e.to_string()]))
    }
}

fn check_raw_parameter(idx: usize, item: &Value, problems: &mut Vec<String>) {
    let label = item
        .get("name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("#{idx}"));

    let Some(obj) = item.as_object() else {
        problems.push(format!("parameter {label} must be an object"));
        return;
    };

    match obj.get("type").and_then(Value::as_str) {
        Some(raw) if ParameterType::parse(raw).is_some() => {}
        Some(raw) => problems.push(format!("parameter {label}: unsupported type '{raw}'")),
        None => problems.push(format!("parameter {label}: missing type")),
    }

    if !matches!(obj.get("required"), Some(Value::Bool(_))) {
        problems.push(format!("parameter {label}: 'required' must be a boolean"));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

impl ToolCallStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ToolCallStatus::Completed | ToolCallStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallError {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl From<&EngineError> for ToolCallError {
    fn from(err: &EngineError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

/// One concrete request to invoke a tool. Mutated in place by the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
    #[serde(default = "pending")]
    pub status: ToolCallStatus,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<ToolCallError>,
    #[serde(default)]
    pub execution_time: Option<Duration>,
}

fn pending() -> ToolCallStatus {
    ToolCallStatus::Pending
}

impl ToolCall {
    /// Non-object `arguments` are treated as an empty argument map.
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            status: ToolCallStatus::Pending,
            result: None,
            error: None,
            execution_time: None,
        }
    }

    pub fn mark_executing(&mut self) {
        self.status = ToolCallStatus::Executing;
    }

    pub fn complete(&mut self, result: Value, elapsed: Duration) {
        self.status = ToolCallStatus::Completed;
        self.result = Some(result);
        self.error = None;
        self.execution_time = Some(elapsed);
    }

    pub fn fail(&mut self, error: ToolCallError, elapsed: Duration) {
        self.status = ToolCallStatus::Failed;
        self.result = None;
        self.error = Some(error);
        self.execution_time = Some(elapsed);
    }
}

/// Caller identity and granted capabilities for one invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub user_id: String,
    #[serde(default)]
    pub guild_id: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    /// Set by the sandbox on its private copy so handlers can reach scratch storage.
    #[serde(default)]
    pub sandbox_id: Option<String>,
}

impl ExecutionContext {
    pub fn new<I, S>(user_id: impl Into<String>, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            user_id: user_id.into(),
            guild_id: None,
            channel_id: None,
            permissions: permissions.into_iter().map(Into::into).collect(),
            request_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            sandbox_id: None,
        }
    }

    pub fn with_guild(mut self, guild_id: impl Into<String>) -> Self {
        self.guild_id = Some(guild_id.into());
        self
    }

    pub fn with_channel(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = Some(channel_id.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationKind {
    Network,
    Filesystem,
    Api,
    Resource,
    Permission,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ViolationKind::Network => "network",
            ViolationKind::Filesystem => "filesystem",
            ViolationKind::Api => "api",
            ViolationKind::Resource => "resource",
            ViolationKind::Permission => "permission",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A recorded breach of an isolation policy during one sandboxed invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub details: Value,
}

impl Violation {
    pub fn new(kind: ViolationKind, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            message: message.into(),
            timestamp: Utc::now(),
            details: Value::Null,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_definition_from_value() {
        let def = ToolDefinition::from_value(json!({
            "name": "create_role",
            "description": "Create a guild role",
            "category": "discord",
            "permissions": ["MANAGE_ROLES"],
            "safety": {"level": "restricted", "rateLimit": {"requestsPerMinute": 5}},
            "parameters": [
                {"name": "name", "type": "string", "required": true, "description": "Role name",
                 "validation": {"minLength": 1, "maxLength": 100}}
            ]
        }))
        .unwrap();

        assert_eq!(def.category, ToolCategory::Discord);
        assert_eq!(def.safety.level, SafetyLevel::Restricted);
        assert_eq!(def.safety.rate_limit.unwrap().requests_per_minute, 5);
        assert_eq!(def.parameters[0].param_type, ParameterType::String);
        assert_eq!(
            def.parameters[0].validation.as_ref().unwrap().max_length,
            Some(100)
        );
    }

    #[test]
    fn test_definition_from_value_reports_all_problems() {
        let err = ToolDefinition::from_value(json!({
            "name": "broken",
            "parameters": [
                {"name": "a", "type": "date", "required": true},
                {"name": "b", "type": "string", "required": "yes"}
            ]
        }))
        .unwrap_err();

        let EngineError::InvalidDefinition(problems) = err else {
            panic!("expected InvalidDefinition");
        };
        assert!(problems.iter().any(|p| p.contains("description")));
        assert!(problems.iter().any(|p| p.contains("category")));
        assert!(problems.iter().any(|p| p.contains("safety")));
        assert!(problems.iter().any(|p| p.contains("unsupported type 'date'")));
        assert!(problems.iter().any(|p| p.contains("'required' must be a boolean")));
    }

    #[test]
    fn test_definition_parameters_not_a_list() {
        let err = ToolDefinition::from_value(json!({
            "name": "x",
            "description": "d",
            "category": "utility",
            "safety": {"level": "safe"},
            "parameters": {"a": 1}
        }))
        .unwrap_err();
        assert!(err.to_string().contains("parameters must be a list"));
    }

    #[test]
    fn test_tool_call_lifecycle() {
        let mut call = ToolCall::new("c1", "echo", json!({"message": "hi"}));
        assert_eq!(call.status, ToolCallStatus::Pending);
        assert!(!call.status.is_terminal());

        call.mark_executing();
        assert_eq!(call.status, ToolCallStatus::Executing);

        call.complete(json!({"ok": true}), Duration::from_millis(3));
        assert!(call.status.is_terminal());
        assert_eq!(call.execution_time, Some(Duration::from_millis(3)));
    }

    #[test]
    fn test_tool_call_non_object_arguments() {
        let call = ToolCall::new("c1", "echo", json!("oops"));
        assert!(call.arguments.is_empty());
    }

    #[test]
    fn test_parameter_type_matches() {
        assert!(ParameterType::Number.matches(&json!(1.5)));
        assert!(!ParameterType::Number.matches(&json!("1")));
        assert!(ParameterType::Array.matches(&json!([])));
        assert!(!ParameterType::Object.matches(&json!([])));
    }
}

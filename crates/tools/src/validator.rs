//! Parameter checks, both at registration (is the declaration coherent?) and
//! at call time (do the arguments satisfy the declaration?).

use std::collections::HashMap;

use regex::Regex;
use serde_json::{Map, Value};
use toolgate_core::{EngineError, EngineResult, ParameterSpec, ParameterType};

/// `pattern` rules compiled once per definition, keyed by parameter name.
#[derive(Debug, Clone, Default)]
pub struct CompiledPatterns {
    patterns: HashMap<String, Regex>,
}

impl CompiledPatterns {
    /// Patterns that fail to compile are left out; `validate_definition` reports them.
    pub fn compile(params: &[ParameterSpec]) -> Self {
        let patterns = params
            .iter()
            .filter_map(|spec| {
                let pattern = spec.validation.as_ref()?.pattern.as_ref()?;
                Regex::new(pattern).ok().map(|re| (spec.name.clone(), re))
            })
            .collect();
        Self { patterns }
    }

    pub fn get(&self, parameter: &str) -> Option<&Regex> {
        self.patterns.get(parameter)
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

pub struct ParameterValidator;

impl ParameterValidator {
    /// Returns every problem with the declaration; empty means valid.
    pub fn validate_definition(spec: &ParameterSpec) -> Vec<String> {
        let mut problems = Vec::new();
        let name = &spec.name;

        if name.trim().is_empty() {
            problems.push("parameter name cannot be empty".to_string());
        }

        let Some(rules) = &spec.validation else {
            return problems;
        };
        let ty = spec.param_type;

        if let Some(pattern) = &rules.pattern {
            if ty != ParameterType::String {
                problems.push(format!(
                    "parameter {name}: pattern is only valid for string parameters"
                ));
            } else if let Err(e) = Regex::new(pattern) {
                problems.push(format!("parameter {name}: invalid pattern: {e}"));
            }
        }

        if (rules.min.is_some() || rules.max.is_some()) && ty != ParameterType::Number {
            problems.push(format!(
                "parameter {name}: min/max are only valid for number parameters"
            ));
        }
        if let (Some(min), Some(max)) = (rules.min, rules.max) {
            if min > max {
                problems.push(format!("parameter {name}: min ({min}) exceeds max ({max})"));
            }
        }

        if (rules.min_length.is_some() || rules.max_length.is_some())
            && !matches!(ty, ParameterType::String | ParameterType::Array)
        {
            problems.push(format!(
                "parameter {name}: minLength/maxLength are only valid for string or array parameters"
            ));
        }
        if let (Some(min), Some(max)) = (rules.min_length, rules.max_length) {
            if min > max {
                problems.push(format!(
                    "parameter {name}: minLength ({min}) exceeds maxLength ({max})"
                ));
            }
        }

        if let Some(values) = &rules.allowed_values {
            if values.is_empty() {
                problems.push(format!("parameter {name}: enum cannot be empty"));
            }
            if values.iter().any(|v| !ty.matches(v)) {
                problems.push(format!(
                    "parameter {name}: enum values must be of type {ty}"
                ));
            }
        }

        problems
    }

    /// Collects every violated rule rather than stopping at the first.
    /// Compiles patterns on the spot; registered tools go through
    /// `validate_with_patterns` and reuse the registry's compiled set.
    pub fn validate_arguments(
        params: &[ParameterSpec],
        arguments: &Map<String, Value>,
    ) -> EngineResult<()> {
        Self::validate_with_patterns(params, &CompiledPatterns::compile(params), arguments)
    }

    pub fn validate_with_patterns(
        params: &[ParameterSpec],
        patterns: &CompiledPatterns,
        arguments: &Map<String, Value>,
    ) -> EngineResult<()> {
        let mut errors = Vec::new();

        for spec in params {
            match arguments.get(&spec.name) {
                None | Some(Value::Null) => {
                    if spec.required {
                        errors.push(format!("Missing required parameter: {}", spec.name));
                    }
                }
                Some(value) => Self::check_value(spec, patterns, value, &mut errors),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(EngineError::Validation(errors))
        }
    }

    fn check_value(
        spec: &ParameterSpec,
        patterns: &CompiledPatterns,
        value: &Value,
        errors: &mut Vec<String>,
    ) {
        let name = &spec.name;

        if !spec.param_type.matches(value) {
            errors.push(format!(
                "Parameter {} must be of type {}",
                name, spec.param_type
            ));
            return;
        }

        let Some(rules) = &spec.validation else {
            return;
        };

        if let Some(n) = value.as_f64() {
            if let Some(min) = rules.min {
                if n < min {
                    errors.push(format!("Parameter {} must be at least {}", name, min));
                }
            }
            if let Some(max) = rules.max {
                if n > max {
                    errors.push(format!("Parameter {} must be at most {}", name, max));
                }
            }
        }

        let length = match value {
            Value::String(s) => Some((s.chars().count(), "characters")),
            Value::Array(items) => Some((items.len(), "items")),
            _ => None,
        };
        if let Some((len, unit)) = length {
            if let Some(min) = rules.min_length {
                if len < min {
                    errors.push(format!(
                        "Parameter {} must contain at least {} {}",
                        name, min, unit
                    ));
                }
            }
            if let Some(max) = rules.max_length {
                if len > max {
                    errors.push(format!(
                        "Parameter {} must contain at most {} {}",
                        name, max, unit
                    ));
                }
            }
        }

        if let (Some(pattern), Some(s)) = (&rules.pattern, value.as_str()) {
            match patterns.get(name) {
                Some(re) if !re.is_match(s) => {
                    errors.push(format!("Parameter {} does not match pattern {}", name, pattern));
                }
                Some(_) => {}
                None => errors.push(format!("Parameter {} has an invalid pattern: {}", name, pattern)),
            }
        }

        if let Some(allowed) = &rules.allowed_values {
            if !allowed.contains(value) {
                errors.push(format!(
                    "Parameter {} must be one of {}",
                    name,
                    Value::Array(allowed.clone())
                ));
            }
        }
    }
}

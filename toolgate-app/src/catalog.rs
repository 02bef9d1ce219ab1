//! YAML (or JSON) tool catalogs and call files.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use toolgate_core::{EngineError, ToolCall};
use toolgate_tools::ToolRegistry;
use tracing::warn;

/// Entries stay untyped until registration so every structural problem is
/// reported by the registry rather than as a bare parse error.
#[derive(Debug, Default, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub tools: Vec<Value>,
}

#[derive(Debug, Default)]
pub struct CatalogReport {
    pub registered: Vec<String>,
    pub rejected: Vec<(String, EngineError)>,
}

impl CatalogReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

impl Catalog {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog {}", path.display()))?;
        Self::from_yaml_str(&content)
            .with_context(|| format!("Failed to parse catalog {}", path.display()))
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            bail!("Catalog is empty");
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Registers every entry it can; the rest are reported, not fatal.
    pub fn register_into(&self, registry: &ToolRegistry) -> CatalogReport {
        let mut report = CatalogReport::default();

        for (index, entry) in self.tools.iter().enumerate() {
            let label = entry
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("entry #{}", index + 1));

            match registry.register_value(entry.clone()) {
                Ok(()) => report.registered.push(label),
                Err(err) => {
                    warn!("Catalog entry {} rejected: {}", label, err);
                    report.rejected.push((label, err));
                }
            }
        }
        report
    }
}

#[derive(Debug, Deserialize)]
struct CallFile {
    calls: Vec<CallSpec>,
}

#[derive(Debug, Deserialize)]
struct CallSpec {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Calls without an `id` get `call-<n>`, numbered from 1.
pub fn load_calls(path: impl AsRef<Path>) -> Result<Vec<ToolCall>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read calls file {}", path.display()))?;
    let file: CallFile = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse calls file {}", path.display()))?;

    Ok(file
        .calls
        .into_iter()
        .enumerate()
        .map(|(index, spec)| {
            let id = spec.id.unwrap_or_else(|| format!("call-{}", index + 1));
            ToolCall::new(id, spec.name, spec.arguments)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
tools:
  - name: send_message
    description: Send a message to a channel
    category: discord
    permissions: [SEND_MESSAGES]
    safety:
      level: safe
      rateLimit:
        requestsPerMinute: 20
    parameters:
      - name: channel_id
        type: string
        required: true
      - name: content
        type: string
        required: true
        validation:
          maxLength: 2000
  - name: broken
    description: Unknown category
    category: weather
    permissions: [USE_TOOLS]
    safety:
      level: safe
  - description: no name at all
"#;

    #[test]
    fn test_register_reports_each_entry() {
        let catalog = Catalog::from_yaml_str(CATALOG).unwrap();
        let registry = ToolRegistry::new();
        let report = catalog.register_into(&registry);

        assert_eq!(report.registered, vec!["send_message"]);
        assert_eq!(report.rejected.len(), 2);
        assert_eq!(report.rejected[0].0, "broken");
        assert_eq!(report.rejected[0].1.code(), "INVALID_DEFINITION");
        assert_eq!(report.rejected[1].0, "entry #3");
        assert!(!report.is_clean());

        let tool = registry.lookup("send_message").unwrap();
        assert_eq!(tool.parameters.len(), 2);
        assert_eq!(tool.safety.rate_limit.unwrap().requests_per_minute, 20);
    }

    #[test]
    fn test_duplicate_entry_rejected() {
        let catalog = Catalog::from_yaml_str(CATALOG).unwrap();
        let registry = ToolRegistry::new();
        catalog.register_into(&registry);

        let again = catalog.register_into(&registry);
        assert!(again.registered.is_empty());
        assert_eq!(again.rejected[0].1, EngineError::DuplicateTool("send_message".into()));
    }

    #[test]
    fn test_empty_catalog() {
        assert!(Catalog::from_yaml_str("  \n").is_err());
        assert!(Catalog::from_yaml_str("tools: []").unwrap().tools.is_empty());
    }
}

use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionCheck {
    Allowed,
    Denied { required: Vec<String> },
}

impl PermissionCheck {
    pub fn is_allowed(&self) -> bool {
        matches!(self, PermissionCheck::Allowed)
    }
}

/// At-least-one semantics: the caller needs any one of the required
/// capabilities. An empty requirement needs nothing.
pub fn has_any_permission(required: &[String], granted: &[String]) -> bool {
    required.is_empty() || required.iter().any(|r| granted.contains(r))
}

/// Tool name -> capability set required to invoke it.
///
/// The executor seeds this table from each tool definition at registration,
/// so the sandbox re-check and the registry gate read the same requirements.
pub struct PermissionManager {
    tool_permissions: RwLock<HashMap<String, Vec<String>>>,
}

impl PermissionManager {
    pub fn new() -> Self {
        Self {
            tool_permissions: RwLock::new(HashMap::new()),
        }
    }

    pub fn set_required(&self, tool_name: impl Into<String>, permissions: Vec<String>) {
        let tool_name = tool_name.into();
        debug!("Required permissions for {}: {:?}", tool_name, permissions);
        self.tool_permissions.write().insert(tool_name, permissions);
    }

    pub fn remove(&self, tool_name: &str) -> bool {
        self.tool_permissions.write().remove(tool_name).is_some()
    }

    pub fn required_for(&self, tool_name: &str) -> Option<Vec<String>> {
        self.tool_permissions.read().get(tool_name).cloned()
    }

    /// Tools without an entry are unrestricted here; the registry gate still applies.
    pub fn check(&self, tool_name: &str, granted: &[String]) -> PermissionCheck {
        let table = self.tool_permissions.read();
        match table.get(tool_name) {
            Some(required) if !has_any_permission(required, granted) => PermissionCheck::Denied {
                required: required.clone(),
            },
            _ => PermissionCheck::Allowed,
        }
    }
}

impl Default for PermissionManager {
    fn default() -> Self {
        Self::new()
    }
}

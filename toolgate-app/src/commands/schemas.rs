use std::path::Path;

use anyhow::Result;
use serde_json::Value;
use toolgate_tools::ToolRegistry;
use tracing::warn;

use crate::catalog::Catalog;

/// Prints function-calling schemas for every valid catalog entry.
pub fn run(catalog_path: &Path) -> Result<Vec<Value>> {
    let catalog = Catalog::load(catalog_path)?;
    let registry = ToolRegistry::new();
    let report = catalog.register_into(&registry);
    if !report.is_clean() {
        warn!(
            "{} catalog entries skipped; run `toolgate check` for details",
            report.rejected.len()
        );
    }

    let schemas = registry.schemas();
    println!("{}", serde_json::to_string_pretty(&schemas)?);
    Ok(schemas)
}

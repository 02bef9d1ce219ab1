use std::path::Path;

use anyhow::{bail, Result};
use toolgate_tools::ToolRegistry;

use crate::catalog::{Catalog, CatalogReport};

pub fn run(catalog_path: &Path) -> Result<CatalogReport> {
    println!("🔍 Checking catalog: {}\n", catalog_path.display());

    let catalog = Catalog::load(catalog_path)?;
    let registry = ToolRegistry::new();
    let report = catalog.register_into(&registry);

    for name in &report.registered {
        println!("  ✓ {}", name);
    }
    for (name, err) in &report.rejected {
        println!("  ✗ {} [{}] {}", name, err.code(), err);
    }
    println!(
        "\n{} registered, {} rejected",
        report.registered.len(),
        report.rejected.len()
    );

    if !report.is_clean() {
        bail!("{} catalog entries rejected", report.rejected.len());
    }
    Ok(report)
}

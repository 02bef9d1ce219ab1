pub mod check;
pub mod run;
pub mod schemas;

use std::path::Path;

use anyhow::{Context, Result};
use toolgate_core::EngineConfig;

/// File values (or defaults), then environment overrides, then validation.
pub fn load_engine_config(path: Option<&Path>) -> Result<EngineConfig> {
    let mut config = match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load engine config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

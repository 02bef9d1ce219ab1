pub mod config;
pub mod error;
pub mod types;

pub use config::{EngineConfig, IsolationConfig, LimitsConfig, VirtualFsConfig};
pub use error::{is_transient_failure, EngineError, EngineResult};
pub use types::*;

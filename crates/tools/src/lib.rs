pub mod handler;
pub mod registry;
pub mod stats;
pub mod validator;

pub use handler::{HandlerError, HandlerTable, ToolHandler};
pub use registry::ToolRegistry;
pub use stats::{ToolStats, RATE_LIMIT_WINDOW};
pub use validator::{CompiledPatterns, ParameterValidator};

pub mod audit;
pub mod catalog;
pub mod cli;
pub mod commands;
pub mod echo;

pub use audit::{AuditError, JsonlAuditSink};
pub use catalog::{load_calls, Catalog, CatalogReport};
pub use cli::{Command, Invocation};
pub use echo::{dry_run_handlers, EchoHandler};

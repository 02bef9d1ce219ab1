use thiserror::Error;

use crate::types::ViolationKind;

/// Message fragments and error codes that mark a failure as transient.
const TRANSIENT_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "network",
    "rate limit",
    "temporary",
    "econnreset",
    "etimedout",
    "econnrefused",
    "epipe",
    "eai_again",
];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool already registered: {0}")]
    DuplicateTool(String),

    #[error("Invalid tool definition: {}", .0.join("; "))]
    InvalidDefinition(Vec<String>),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Rate limit exceeded for {tool}: {limit} requests per minute")]
    RateLimitExceeded { tool: String, limit: u32 },

    #[error("Validation error: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Execution already in progress: {0}")]
    ExecutionInProgress(String),

    #[error("Sandbox violation ({kind}): {message}")]
    SandboxViolation { kind: ViolationKind, message: String },

    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    #[error("{message}")]
    Handler {
        message: String,
        code: Option<String>,
    },

    #[error("Invalid tool result: {0}")]
    InvalidResult(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn code(&self) -> &str {
        match self {
            EngineError::ToolNotFound(_) => "TOOL_NOT_FOUND",
            EngineError::DuplicateTool(_) => "DUPLICATE_TOOL",
            EngineError::InvalidDefinition(_) => "INVALID_DEFINITION",
            EngineError::PermissionDenied(_) => "PERMISSION_DENIED",
            EngineError::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            EngineError::Validation(_) => "VALIDATION_ERROR",
            EngineError::ExecutionInProgress(_) => "EXECUTION_IN_PROGRESS",
            EngineError::SandboxViolation { .. } => "SANDBOX_VIOLATION",
            EngineError::Timeout(_) => "TIMEOUT",
            EngineError::Handler { code, .. } => code.as_deref().unwrap_or("HANDLER_ERROR"),
            EngineError::InvalidResult(_) => "INVALID_RESULT",
            EngineError::Config(_) => "CONFIG_ERROR",
            EngineError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Structural errors and sandbox violations are never retryable, whatever
    /// their message says. Handler errors are classified by message and code.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Timeout(_) | EngineError::RateLimitExceeded { .. } => true,
            EngineError::Handler { message, code } => {
                is_transient_failure(message, code.as_deref())
            }
            _ => false,
        }
    }

    pub fn handler(message: impl Into<String>) -> Self {
        EngineError::Handler {
            message: message.into(),
            code: None,
        }
    }
}

pub fn is_transient_failure(message: &str, code: Option<&str>) -> bool {
    let message = message.to_lowercase();
    let code = code.map(str::to_lowercase).unwrap_or_default();
    TRANSIENT_PATTERNS
        .iter()
        .any(|p| message.contains(p) || code.contains(p))
}

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum AgentError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Tool execution failed: {0}")]
    ExecutionError(String),

    #[error("Duplicate tool registration: {0}")]
    DuplicateTool(String),

    #[error("Invalid graph: {0}")]
    GraphConfig(String),

    #[error("Conversation precondition violated: {0}")]
    Precondition(String),

    #[error("Structured output does not conform to schema: {0}")]
    SchemaValidation(String),

    #[error("Turn limit of {0} exceeded")]
    TurnLimitExceeded(usize),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AgentResult<T> = Result<T, AgentError>;

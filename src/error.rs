//! Error types for the analysis orchestrator

use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Tool Errors
    // =============================

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Duplicate tool: {0}")]
    DuplicateTool(String),

    #[error("Tool timed out: {0}")]
    ToolTimeout(String),

    // =============================
    // Collaborator Errors
    // =============================

    #[error("LLM provider error: {0}")]
    Provider(String),

    #[error("LLM provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Data store error: {0}")]
    DataStore(String),

    #[error("Data store unavailable: {0}")]
    DataStoreUnavailable(String),

    // =============================
    // Orchestration Errors
    // =============================

    #[error("Planning exhausted: {0}")]
    PlanningExhausted(String),

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Session error: {0}")]
    SessionError(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

impl OrchestrationError {
    /// Errors that abort the whole turn instead of being recorded as a gap.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OrchestrationError::DataStoreUnavailable(_)
                | OrchestrationError::ProviderUnavailable(_)
        )
    }

    /// Transient provider failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            OrchestrationError::ProviderUnavailable(_) => true,
            OrchestrationError::HttpError(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Stable short name, used in tool results and API payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestrationError::Validation(_) => "validation",
            OrchestrationError::ToolExecution(_) => "tool_execution",
            OrchestrationError::ToolNotFound(_) => "tool_not_found",
            OrchestrationError::DuplicateTool(_) => "duplicate_tool",
            OrchestrationError::ToolTimeout(_) => "tool_timeout",
            OrchestrationError::Provider(_) => "provider",
            OrchestrationError::ProviderUnavailable(_) => "provider_unavailable",
            OrchestrationError::DataStore(_) => "data_store",
            OrchestrationError::DataStoreUnavailable(_) => "data_store_unavailable",
            OrchestrationError::PlanningExhausted(_) => "planning_exhausted",
            OrchestrationError::InvalidPlan(_) => "invalid_plan",
            OrchestrationError::InvalidTransition(_) => "invalid_transition",
            OrchestrationError::SessionError(_) => "session",
            OrchestrationError::Config(_) => "config",
            OrchestrationError::SerializationError(_) => "serialization",
            OrchestrationError::HttpError(_) => "http",
            OrchestrationError::DatabaseError(_) => "database",
        }
    }
}

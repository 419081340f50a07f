//! Core error types.

use thiserror::Error;

/// Errors raised while compiling a workflow definition into a blueprint.
///
/// These are configuration defects. They surface once, when the blueprint is
/// first built, and are meant to abort host startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("{definition}: a startup rule for '{message}' is already registered")]
    DuplicateStart {
        definition: &'static str,
        message: &'static str,
    },

    #[error("{definition}: a transition rule for '{message}' in state '{state}' is already registered")]
    DuplicateTransfer {
        definition: &'static str,
        state: &'static str,
        message: &'static str,
    },

    #[error("{definition}: target state of the '{message}' rule in state '{state}' is already set")]
    TargetAlreadySet {
        definition: &'static str,
        state: &'static str,
        message: &'static str,
    },

    #[error("{definition}: a correlation selector for '{message}' is already registered")]
    DuplicateCorrelation {
        definition: &'static str,
        message: &'static str,
    },

    #[error("{definition}: name is already used by another workflow definition")]
    DuplicateDefinitionName { definition: &'static str },

    #[error(
        "{definition}: correlation selectors do not match the observed messages (missing: [{}], extra: [{}])",
        .missing.join(", "),
        .extra.join(", ")
    )]
    CorrelationMismatch {
        definition: &'static str,
        /// Observed message types without a selector.
        missing: Vec<&'static str>,
        /// Selectors for message types no rule observes.
        extra: Vec<&'static str>,
    },
}

/// Errors from blueprint execution and dispatch.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("blueprint build failed: {0}")]
    Build(#[from] BuildError),

    #[error("{definition}: correlation id extracted from '{message}' is blank")]
    BlankCorrelationId {
        definition: &'static str,
        message: &'static str,
    },

    #[error("{definition}: no correlation selector for '{message}'")]
    MissingCorrelation {
        definition: &'static str,
        message: &'static str,
    },

    #[error("{definition}: stored state ordinal {ordinal} is not a member of the state set")]
    UnknownStateOrdinal {
        definition: &'static str,
        ordinal: i32,
    },

    #[error("service not registered: {service}")]
    ServiceNotRegistered { service: &'static str },

    #[error("{definition}: action #{index} for '{message}' failed: {source}")]
    ActionFailed {
        definition: &'static str,
        message: &'static str,
        index: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("concurrency conflict on {correlation_id}/{definition}: expected version {expected}, actual {actual}")]
    Conflict {
        correlation_id: String,
        definition: String,
        expected: u64,
        actual: u64,
    },

    #[error("instance already exists: {correlation_id}/{definition}")]
    InstanceExists {
        correlation_id: String,
        definition: String,
    },

    #[error("instance not found: {correlation_id}/{definition}")]
    InstanceNotFound {
        correlation_id: String,
        definition: String,
    },

    #[error("unit of work already committed")]
    AlreadyCommitted,

    #[error("cached blueprint for {definition} has a different state type")]
    BlueprintTypeMismatch { definition: &'static str },

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Returns whether redelivering the message may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::Conflict { .. }
                | CoreError::InstanceExists { .. }
                | CoreError::Persistence(_)
                | CoreError::Transport(_)
        )
    }

    /// Returns a stable code suitable for logs and dead-letter headers.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::Build(_) => "BUILD_FAILED",
            CoreError::BlankCorrelationId { .. } => "BLANK_CORRELATION_ID",
            CoreError::MissingCorrelation { .. } => "MISSING_CORRELATION",
            CoreError::UnknownStateOrdinal { .. } => "UNKNOWN_STATE",
            CoreError::ServiceNotRegistered { .. } => "SERVICE_NOT_REGISTERED",
            CoreError::ActionFailed { .. } => "ACTION_FAILED",
            CoreError::Cancelled => "CANCELLED",
            CoreError::Conflict { .. } => "CONFLICT",
            CoreError::InstanceExists { .. } => "CONFLICT",
            CoreError::InstanceNotFound { .. } => "INSTANCE_NOT_FOUND",
            CoreError::AlreadyCommitted => "ALREADY_COMMITTED",
            CoreError::BlueprintTypeMismatch { .. } => "BUILD_FAILED",
            CoreError::Persistence(_) => "PERSISTENCE_ERROR",
            CoreError::Transport(_) => "TRANSPORT_ERROR",
            CoreError::Json(_) => "BAD_MESSAGE",
        }
    }
}

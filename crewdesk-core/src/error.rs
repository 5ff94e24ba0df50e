//! Error types for the agent core.

/// Error returned by tool dispatch.
///
/// Tool errors are reported back to the model as `tool_result` events with
/// an `error` payload - they never abort the turn and never surface as a
/// transport failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolError {
    /// The requested tool does not exist in this turn's registry.
    #[error("unknown tool: {name}")]
    NotFound { name: String },

    /// The arguments failed JSON parsing or schema validation.
    #[error("invalid arguments for tool '{name}': {reason}")]
    InvalidArguments { name: String, reason: String },

    /// The tool exists but the effective capability set does not permit it.
    #[error("tool '{name}' is disabled")]
    Disabled { name: String },

    /// The handler exceeded its timeout.
    #[error("tool '{name}' timed out after {timeout_ms}ms")]
    Timeout { name: String, timeout_ms: u64 },

    /// The handler ran and failed.
    #[error("{message}")]
    Failed { message: String },
}

impl ToolError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "unknown_tool",
            Self::InvalidArguments { .. } => "invalid_arguments",
            Self::Disabled { .. } => "disabled",
            Self::Timeout { .. } => "timeout",
            Self::Failed { .. } => "tool_failure",
        }
    }

    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    pub fn invalid_arguments(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn disabled(name: impl Into<String>) -> Self {
        Self::Disabled { name: name.into() }
    }

    pub fn timeout(name: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            name: name.into(),
            timeout_ms,
        }
    }

    pub fn failed(message: impl std::fmt::Display) -> Self {
        Self::Failed {
            message: message.to_string(),
        }
    }
}

/// Errors that abort a turn.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The provider call failed.
    #[error("provider failure: {0}")]
    ProviderFailure(String),

    /// The provider call exceeded its overall budget.
    #[error("provider timeout")]
    ProviderTimeout,

    /// The client went away; the turn aborted at a step boundary.
    #[error("turn cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_error_codes() {
        assert_eq!(ToolError::not_found("x").error_code(), "unknown_tool");
        assert_eq!(
            ToolError::invalid_arguments("x", "bad").error_code(),
            "invalid_arguments"
        );
        assert_eq!(ToolError::disabled("x").error_code(), "disabled");
        assert_eq!(ToolError::timeout("x", 100).error_code(), "timeout");
        assert_eq!(ToolError::failed("boom").error_code(), "tool_failure");
    }

    #[test]
    fn test_display_mentions_tool_name() {
        let err = ToolError::timeout("shell_run", 60_000);
        assert!(err.to_string().contains("shell_run"));
        assert!(err.to_string().contains("60000"));
    }
}

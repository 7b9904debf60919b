//! Error types for Vidya

use thiserror::Error;

/// Result type alias using Vidya's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Vidya error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Registry errors (E001-E099)
    #[error("No agent matches input type '{input_type}' and tags {tags:?}. Check the [agents] section of your configuration.")]
    NoCandidate { input_type: String, tags: Vec<String> },

    #[error("Agent '{0}' is not registered")]
    AgentNotFound(String),

    // Knowledge source errors (E100-E199), recovered locally by the cascade
    #[error("Knowledge source '{0}' timed out")]
    SourceTimeout(String),

    #[error("Knowledge source '{source_id}' unavailable: {reason}")]
    SourceUnavailable { source_id: String, reason: String },

    // Agent invocation errors (E200-E299)
    #[error("Agent '{0}' timed out")]
    AgentTimeout(String),

    #[error("Agent '{agent_id}' reported failure: {message}")]
    AgentApplication { agent_id: String, message: String },

    // Feedback errors (E300-E399)
    #[error("Feedback for task '{0}' was already submitted")]
    DuplicateFeedback(String),

    #[error("Task '{0}' not found in the replay buffer")]
    UnknownTask(String),

    #[error("Rating {0} is out of range (expected 0.0..=1.0)")]
    InvalidRating(f64),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Database errors (E400-E499)
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    // Network errors (E500-E599)
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoCandidate { .. } => "E001",
            Self::AgentNotFound(_) => "E002",
            Self::SourceTimeout(_) => "E100",
            Self::SourceUnavailable { .. } => "E101",
            Self::AgentTimeout(_) => "E200",
            Self::AgentApplication { .. } => "E201",
            Self::DuplicateFeedback(_) => "E300",
            Self::UnknownTask(_) => "E301",
            Self::InvalidRating(_) => "E302",
            Self::DatabaseError(_) => "E400",
            Self::NetworkError(_) => "E500",
            Self::ConfigError(_) => "E600",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Whether this error is transient and absorbed by the layer that saw it,
    /// rather than surfaced to the caller.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::SourceTimeout(_)
                | Self::SourceUnavailable { .. }
                | Self::AgentTimeout(_)
                | Self::AgentApplication { .. }
        )
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::NoCandidate { .. } => {
                Some("Add an agent with matching tags to the configuration".to_string())
            }
            Self::SourceUnavailable { source_id, .. } => {
                Some(format!("Check connectivity to knowledge source '{source_id}'"))
            }
            Self::DuplicateFeedback(_) => {
                Some("Feedback is applied exactly once per task".to_string())
            }
            Self::InvalidRating(_) => Some("Ratings must be between 0.0 and 1.0".to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        let err = Error::NoCandidate {
            input_type: "text".to_string(),
            tags: vec!["summarize".to_string()],
        };
        assert_eq!(err.code(), "E001");
        assert_eq!(Error::SourceTimeout("q1".to_string()).code(), "E100");
        assert_eq!(Error::DuplicateFeedback("t1".to_string()).code(), "E300");
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::SourceTimeout("q1".to_string()).is_transient());
        assert!(Error::AgentTimeout("a1".to_string()).is_transient());
        assert!(!Error::DuplicateFeedback("t1".to_string()).is_transient());
        assert!(
            !Error::NoCandidate {
                input_type: "text".to_string(),
                tags: vec![],
            }
            .is_transient()
        );
    }

    #[test]
    fn test_suggestions() {
        let err = Error::InvalidRating(1.5);
        assert!(err.suggestion().is_some());
        assert!(Error::Other("oops".to_string()).suggestion().is_none());
    }
}

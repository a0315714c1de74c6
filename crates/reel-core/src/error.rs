/// Core error types for the Reel player.

/// A specialized Result type for Reel operations.
pub type ReelResult<T> = Result<T, ReelError>;

/// Top-level error type encompassing all Reel subsystems.
#[derive(Debug, thiserror::Error)]
pub enum ReelError {
    /// Malformed animation data, rejected at load time.
    #[error("parse error: {message} (in {directive})")]
    Parse { message: String, directive: String },

    #[error("backend init error: {0}")]
    BackendInit(String),

    /// The presentation pool had no drawable this frame. Transient.
    #[error("drawable unavailable")]
    DrawableUnavailable,

    /// Terminal: no rendering path is left.
    #[error("backend failed: {0}")]
    BackendFailed(String),

    /// A frame was produced for dimensions that no longer apply.
    #[error("frame discarded: produced before a resize")]
    ResizeRace,

    #[error("invalid slot transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("document validation error: {0}")]
    Validation(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Other(String),
}

impl ReelError {
    /// Create a parse error attributed to a directive (e.g. `"logo.opacity"`).
    pub fn parse(message: impl Into<String>, directive: impl Into<String>) -> Self {
        ReelError::Parse {
            message: message.into(),
            directive: directive.into(),
        }
    }

    pub fn invalid_transition(from: impl std::fmt::Debug, to: impl std::fmt::Debug) -> Self {
        ReelError::InvalidTransition {
            from: format!("{:?}", from),
            to: format!("{:?}", to),
        }
    }

    /// Whether the error ends playback for good.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReelError::BackendFailed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        let err = ReelError::parse("duration must be positive", "logo.opacity");
        assert_eq!(
            err.to_string(),
            "parse error: duration must be positive (in logo.opacity)"
        );
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = ReelError::invalid_transition("Free", "Presenting");
        assert!(err.to_string().contains("\"Free\" -> \"Presenting\""));
    }

    #[test]
    fn test_only_backend_failed_is_terminal() {
        assert!(ReelError::BackendFailed("software init".into()).is_terminal());
        assert!(!ReelError::DrawableUnavailable.is_terminal());
        assert!(!ReelError::ResizeRace.is_terminal());
    }
}

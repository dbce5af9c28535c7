use crate::cards::CardSourceError;

/// Failure of a participant action against a planning poker session.
///
/// Every variant leaves the session untouched and nothing is broadcast.
/// The coordinator never retries; the caller decides whether to resubmit.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum CoordinatorError {
    #[error("no active planning poker session")]
    SessionNotFound,

    #[error("only the host may perform this action")]
    NotHost,

    #[error("user {0} has not joined this session")]
    NotParticipant(String),

    #[error("invalid action: {0}")]
    InvalidAction(String),

    #[error("card source failure: {0}")]
    AdapterFailure(String),
}

impl CoordinatorError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidAction(reason.into())
    }

    /// Short classification string for logging, metrics and wire error codes.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::SessionNotFound => "session_not_found",
            Self::NotHost => "not_host",
            Self::NotParticipant(_) => "not_participant",
            Self::InvalidAction(_) => "invalid_action",
            Self::AdapterFailure(_) => "adapter_failure",
        }
    }
}

impl From<CardSourceError> for CoordinatorError {
    fn from(e: CardSourceError) -> Self {
        Self::AdapterFailure(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_strings() {
        assert_eq!(CoordinatorError::SessionNotFound.error_kind(), "session_not_found");
        assert_eq!(CoordinatorError::NotHost.error_kind(), "not_host");
        assert_eq!(
            CoordinatorError::NotParticipant("u1".into()).error_kind(),
            "not_participant"
        );
        assert_eq!(CoordinatorError::invalid("nope").error_kind(), "invalid_action");
        assert_eq!(
            CoordinatorError::AdapterFailure("db down".into()).error_kind(),
            "adapter_failure"
        );
    }

    #[test]
    fn card_source_error_maps_to_adapter_failure() {
        let err: CoordinatorError = CardSourceError::Unavailable("timeout".into()).into();
        assert!(matches!(err, CoordinatorError::AdapterFailure(ref m) if m.contains("timeout")));
    }

    #[test]
    fn display_includes_reason() {
        let err = CoordinatorError::invalid("vote value 7 is not allowed");
        assert_eq!(err.to_string(), "invalid action: vote value 7 is not allowed");
    }
}

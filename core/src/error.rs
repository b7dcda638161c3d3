use thiserror::Error;

use crate::session::SessionState;
use crate::symptoms::SymptomId;

/// A knowledge-base call that did not complete with a usable answer.
/// Always recoverable: the session stays where it was and the user may retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connection refused, timeout, DNS failure
    #[error("knowledge base request failed: {0}")]
    Request(String),
    /// Non-2xx response
    #[error("knowledge base returned status {status}: {message}")]
    Status { status: u16, message: String },
    /// Response body did not match the query contract
    #[error("malformed knowledge base response: {0}")]
    Malformed(String),
}

impl TransportError {
    /// Idempotent reads are safe to repeat after connection faults and
    /// server errors; client errors will not change on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Request(_) => true,
            TransportError::Status { status, .. } => *status >= 500,
            TransportError::Malformed(_) => false,
        }
    }
}

/// Errors surfaced by the diagnostic session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Operation not permitted in the current state
    #[error("`{operation}` is not permitted while the session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
    /// Select/reject named a symptom that is not currently offered
    #[error("symptom {0} is not among the current candidates")]
    UnknownSymptom(SymptomId),
    /// The outstanding call was discarded by a reset
    #[error("operation superseded by a session reset")]
    Superseded,
    #[error("diagnostic session has shut down")]
    Closed,
}

impl SessionError {
    /// Contract violations mean the caller drove the session wrongly; they
    /// are not retryable and should abort the caller.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            SessionError::InvalidState { .. } | SessionError::UnknownSymptom(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_transport_errors() {
        assert!(TransportError::Request("timeout".into()).is_retryable());
        assert!(
            TransportError::Status {
                status: 503,
                message: "unavailable".into()
            }
            .is_retryable()
        );
        assert!(
            !TransportError::Status {
                status: 404,
                message: "no such crop".into()
            }
            .is_retryable()
        );
        assert!(!TransportError::Malformed("bad json".into()).is_retryable());
    }

    #[test]
    fn contract_violations_are_flagged() {
        let err = SessionError::InvalidState {
            operation: "confirm",
            state: SessionState::AwaitingAnswer,
        };
        assert!(err.is_contract_violation());
        assert_eq!(
            err.to_string(),
            "`confirm` is not permitted while the session is awaiting_answer"
        );
        assert!(!SessionError::Superseded.is_contract_violation());
        assert!(
            !SessionError::from(TransportError::Request("refused".into()))
                .is_contract_violation()
        );
    }
}

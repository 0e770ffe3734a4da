use std::io;

use roundtable_model::ErrorKind;

use crate::agent::ParticipantId;
use crate::model_client::ModelClientError;

/// A failure that ends a conversation early.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The model endpoint rejected the credential.
    #[error("authentication failed: {0}")]
    Authentication(#[source] ModelClientError),
    /// The model endpoint kept rate limiting until retries ran out.
    #[error("rate limited after {} attempt(s): {}", .0.attempts, .0.message)]
    RateLimit(#[source] ModelClientError),
    /// Any other model failure.
    #[error("model request failed: {0}")]
    Model(#[source] ModelClientError),
    /// The human input channel reached its end.
    #[error("human input closed")]
    InputClosed,
    /// Reading human input failed.
    #[error("failed to read human input: {0}")]
    Input(#[source] io::Error),
    /// An agent kept requesting tools without ever replying.
    #[error("`{agent}` exceeded {limit} tool rounds in one turn")]
    ToolRoundsExceeded {
        /// The agent whose turn was stopped.
        agent: ParticipantId,
        /// The configured bound.
        limit: usize,
    },
}

impl RunError {
    /// Returns a short name for the kind of failure.
    pub fn kind(&self) -> &'static str {
        match self {
            RunError::Authentication(_) => "AuthenticationError",
            RunError::RateLimit(_) => "RateLimitError",
            RunError::Model(_) => "ModelError",
            RunError::InputClosed | RunError::Input(_) => "InputError",
            RunError::ToolRoundsExceeded { .. } => "ToolRoundsExceeded",
        }
    }
}

impl From<ModelClientError> for RunError {
    fn from(err: ModelClientError) -> Self {
        match err.kind {
            ErrorKind::Authentication => RunError::Authentication(err),
            ErrorKind::RateLimitExceeded => RunError::RateLimit(err),
            _ => RunError::Model(err),
        }
    }
}

/// A team or agent that cannot be built.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    /// A team needs at least one participant.
    #[error("a team needs at least one participant")]
    NoParticipants,
    /// Two participants share an id.
    #[error("duplicate participant `{0}`")]
    DuplicateParticipant(ParticipantId),
    /// A handoff names a participant that is not in the team.
    #[error("`{agent}` hands off to unknown participant `{target}`")]
    UnknownHandoffTarget {
        /// The agent offering the handoff.
        agent: ParticipantId,
        /// The missing participant.
        target: ParticipantId,
    },
    /// Two tools (or a tool and a handoff) of one agent share a name.
    #[error("`{agent}` has more than one function named `{name}`")]
    DuplicateFunction {
        /// The agent.
        agent: ParticipantId,
        /// The clashing name.
        name: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_error_classification() {
        let err = |kind| ModelClientError {
            kind,
            message: "boom".to_owned(),
            attempts: 3,
        };
        let run_err = RunError::from(err(ErrorKind::RateLimitExceeded));
        assert_eq!(run_err.kind(), "RateLimitError");
        assert_eq!(run_err.to_string(), "rate limited after 3 attempt(s): boom");
        assert_eq!(
            RunError::from(err(ErrorKind::Authentication)).kind(),
            "AuthenticationError"
        );
        assert_eq!(RunError::from(err(ErrorKind::Timeout)).kind(), "ModelError");
        assert_eq!(RunError::from(err(ErrorKind::Moderated)).kind(), "ModelError");
    }
}

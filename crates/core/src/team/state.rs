use std::fmt::{self, Display};

use crate::agent::ParticipantId;

/// Where a conversation is in its turn cycle.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TurnState {
    /// Waiting for the named participant to take its turn.
    AwaitingTurn(ParticipantId),
    /// Waiting on a model reply or human input.
    Processing,
    /// Waiting on tool results inside an agent turn.
    AwaitingToolResult,
    /// The conversation is over. Terminal.
    Terminated,
}

impl TurnState {
    /// Returns `true` if moving from `self` to `next` is allowed.
    pub fn can_transition_to(&self, next: &TurnState) -> bool {
        use TurnState::*;

        match (self, next) {
            (Terminated, _) => false,
            (_, Terminated) => true,
            (AwaitingTurn(_), Processing) => true,
            (Processing, AwaitingTurn(_) | AwaitingToolResult) => true,
            (AwaitingToolResult, Processing) => true,
            _ => false,
        }
    }

    #[inline]
    pub(crate) fn transition(&mut self, next: TurnState) {
        debug_assert!(
            self.can_transition_to(&next),
            "illegal transition from {self} to {next}"
        );
        trace!("turn state: {self} -> {next}");
        *self = next;
    }
}

impl Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnState::AwaitingTurn(id) => write!(f, "AWAITING_TURN({id})"),
            TurnState::Processing => write!(f, "PROCESSING"),
            TurnState::AwaitingToolResult => write!(f, "AWAITING_TOOL_RESULT"),
            TurnState::Terminated => write!(f, "TERMINATED"),
        }
    }
}

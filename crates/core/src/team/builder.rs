use std::collections::HashSet;

use super::{DEFAULT_MAX_TOOL_ROUNDS, Team};
use crate::agent::Participant;
use crate::error::BuildError;
use crate::termination::Termination;

/// [`Team`] builder.
pub struct TeamBuilder {
    participants: Vec<Participant>,
    termination: Termination,
    max_tool_rounds: usize,
}

impl TeamBuilder {
    #[inline]
    pub(super) fn new() -> Self {
        Self {
            participants: vec![],
            termination: Termination::new(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }

    /// Adds a participant. Participants take turns in the order they are
    /// added.
    #[inline]
    pub fn with_participant<P: Into<Participant>>(mut self, participant: P) -> Self {
        self.participants.push(participant.into());
        self
    }

    /// Sets the stop conditions.
    #[inline]
    pub fn with_termination<T: Into<Termination>>(mut self, termination: T) -> Self {
        self.termination = termination.into();
        self
    }

    /// Bounds how many tool rounds an agent may run in one turn.
    #[inline]
    pub fn with_max_tool_rounds(mut self, max_tool_rounds: usize) -> Self {
        self.max_tool_rounds = max_tool_rounds;
        self
    }

    /// Builds the team.
    ///
    /// Fails if there are no participants, two participants share an id, or
    /// a handoff names someone outside the team.
    pub fn build(self) -> Result<Team, BuildError> {
        if self.participants.is_empty() {
            return Err(BuildError::NoParticipants);
        }

        let mut ids = HashSet::with_capacity(self.participants.len());
        for participant in &self.participants {
            if !ids.insert(participant.id()) {
                return Err(BuildError::DuplicateParticipant(
                    participant.id().clone(),
                ));
            }
        }

        for participant in &self.participants {
            let Participant::Assistant(agent) = participant else {
                continue;
            };
            if let Some(handoff) =
                agent.handoffs().iter().find(|h| !ids.contains(&h.target))
            {
                return Err(BuildError::UnknownHandoffTarget {
                    agent: agent.id().clone(),
                    target: handoff.target.clone(),
                });
            }
        }

        if self.termination.conditions().is_empty() {
            warn!("team has no termination condition, it only stops on failure");
        }

        Ok(Team {
            participants: self.participants,
            termination: self.termination,
            max_tool_rounds: self.max_tool_rounds,
        })
    }
}

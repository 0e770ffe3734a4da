//! Stop conditions for a conversation.

use std::fmt::{self, Display};
use std::ops::BitOr;

use crate::agent::ParticipantId;
use crate::transcript::{Message, Transcript};

/// A single stop condition.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TerminationCondition {
    /// Fires when a message hands the conversation to the given participant.
    HandoffTo(ParticipantId),
    /// Fires when a message's text contains the sentinel.
    TextMention(String),
    /// Fires once the transcript holds at least this many messages.
    MaxMessages(usize),
}

impl TerminationCondition {
    /// Checks this condition against a freshly appended message.
    ///
    /// `transcript` already contains `message`.
    pub fn is_satisfied(&self, transcript: &Transcript, message: &Message) -> bool {
        match self {
            TerminationCondition::HandoffTo(target) => {
                message.is_handoff_to(target)
            }
            TerminationCondition::TextMention(sentinel) => message
                .content()
                .text()
                .is_some_and(|text| text.contains(sentinel.as_str())),
            TerminationCondition::MaxMessages(limit) => {
                transcript.len() >= *limit
            }
        }
    }
}

impl Display for TerminationCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationCondition::HandoffTo(target) => {
                write!(f, "handoff to `{target}`")
            }
            TerminationCondition::TextMention(sentinel) => {
                write!(f, "text mention of `{sentinel}`")
            }
            TerminationCondition::MaxMessages(limit) => {
                write!(f, "{limit} messages reached")
            }
        }
    }
}

/// A set of stop conditions combined with OR.
///
/// Build one with the `|` operator:
///
/// ```
/// use roundtable_core::{ParticipantId, TerminationCondition};
///
/// let termination = TerminationCondition::HandoffTo(ParticipantId::new("user"))
///     | TerminationCondition::TextMention("TERMINATE".to_owned());
/// assert_eq!(termination.conditions().len(), 2);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Termination {
    conditions: Vec<TerminationCondition>,
}

impl Termination {
    /// Creates a set that never fires.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the conditions in evaluation order.
    #[inline]
    pub fn conditions(&self) -> &[TerminationCondition] {
        &self.conditions
    }

    /// Returns the first condition satisfied by `message`, if any.
    pub fn check(
        &self,
        transcript: &Transcript,
        message: &Message,
    ) -> Option<&TerminationCondition> {
        self.conditions
            .iter()
            .find(|condition| condition.is_satisfied(transcript, message))
    }

    /// Returns `true` if any condition is satisfied by `message`.
    #[inline]
    pub fn evaluate(&self, transcript: &Transcript, message: &Message) -> bool {
        self.check(transcript, message).is_some()
    }
}

impl From<TerminationCondition> for Termination {
    #[inline]
    fn from(condition: TerminationCondition) -> Self {
        Self {
            conditions: vec![condition],
        }
    }
}

impl FromIterator<TerminationCondition> for Termination {
    fn from_iter<I: IntoIterator<Item = TerminationCondition>>(iter: I) -> Self {
        Self {
            conditions: iter.into_iter().collect(),
        }
    }
}

impl BitOr for TerminationCondition {
    type Output = Termination;

    #[inline]
    fn bitor(self, rhs: Self) -> Termination {
        Termination {
            conditions: vec![self, rhs],
        }
    }
}

impl BitOr<TerminationCondition> for Termination {
    type Output = Termination;

    #[inline]
    fn bitor(mut self, rhs: TerminationCondition) -> Termination {
        self.conditions.push(rhs);
        self
    }
}

impl BitOr for Termination {
    type Output = Termination;

    #[inline]
    fn bitor(mut self, rhs: Self) -> Termination {
        self.conditions.extend(rhs.conditions);
        self
    }
}

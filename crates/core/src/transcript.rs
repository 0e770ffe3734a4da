//! The conversation transcript.

use std::fmt::{self, Display};

use chrono::{DateTime, Utc};
use roundtable_model::{
    ModelMessage, OpaqueMessage, ToolCallRequest, ToolCallResult,
};

use crate::agent::ParticipantId;

/// The role a message plays in the conversation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// Instructions for a model.
    System,
    /// Input from a human, including the initial task.
    User,
    /// Output from a model-backed agent.
    Assistant,
    /// Results of tool calls.
    ToolResult,
}

/// The outcome of one tool call.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ToolResultEntry {
    /// The id of the call this result answers.
    pub call_id: String,
    /// The name of the tool that was called.
    pub name: String,
    /// The tool output, or the rendered error.
    pub content: String,
    /// Whether the call failed.
    pub is_error: bool,
}

/// A request from an agent to hand the conversation to another participant.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct HandoffRequest {
    /// The participant that takes the next turn.
    pub target: ParticipantId,
    /// The handoff message.
    pub message: String,
    /// The model's call to the handoff function.
    pub call: ToolCallRequest,
}

/// The payload of a transcript entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Content {
    /// Plain text.
    Text(String),
    /// Tool calls requested by a model, with the text it produced alongside.
    ToolCalls {
        /// Text the model produced before the calls, if any.
        thought: Option<String>,
        /// The calls, in the order the model issued them.
        calls: Vec<ToolCallRequest>,
    },
    /// Results for a batch of tool calls, in request order.
    ToolResults(Vec<ToolResultEntry>),
    /// A transfer of control.
    Handoff(HandoffRequest),
}

impl Content {
    /// Returns the text a reader would see, if this content carries any.
    ///
    /// Tool calls and tool results are not text-bearing.
    #[inline]
    pub fn text(&self) -> Option<&str> {
        match self {
            Content::Text(text) => Some(text),
            Content::Handoff(handoff) => Some(&handoff.message),
            Content::ToolCalls { .. } | Content::ToolResults(_) => None,
        }
    }
}

impl Display for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Content::Text(text) => f.write_str(text),
            Content::ToolCalls { thought, calls } => {
                if let Some(thought) = thought {
                    writeln!(f, "{thought}")?;
                }
                for (idx, call) in calls.iter().enumerate() {
                    if idx > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "-> {}({}) [{}]", call.name, call.arguments, call.id)?;
                }
                Ok(())
            }
            Content::ToolResults(results) => {
                for (idx, result) in results.iter().enumerate() {
                    if idx > 0 {
                        writeln!(f)?;
                    }
                    let marker = if result.is_error { "!!" } else { "<-" };
                    write!(
                        f,
                        "{marker} {} [{}]: {}",
                        result.name, result.call_id, result.content
                    )?;
                }
                Ok(())
            }
            Content::Handoff(handoff) => {
                write!(f, "{} (handoff to {})", handoff.message, handoff.target)
            }
        }
    }
}

/// An entry in the transcript. Immutable once appended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    sender: ParticipantId,
    role: Role,
    content: Content,
    timestamp: DateTime<Utc>,
    opaque: Option<OpaqueMessage>,
}

impl Message {
    /// Creates a message stamped with the current time.
    pub fn new(sender: ParticipantId, role: Role, content: Content) -> Self {
        Self {
            sender,
            role,
            content,
            timestamp: Utc::now(),
            opaque: None,
        }
    }

    /// Attaches the provider's raw message.
    #[inline]
    pub(crate) fn with_opaque(mut self, opaque: Option<OpaqueMessage>) -> Self {
        self.opaque = opaque;
        self
    }

    /// Returns the participant that produced this message.
    #[inline]
    pub fn sender(&self) -> &ParticipantId {
        &self.sender
    }

    /// Returns the role of this message.
    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns the payload.
    #[inline]
    pub fn content(&self) -> &Content {
        &self.content
    }

    /// Returns when the message was appended.
    #[inline]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Returns the provider's raw message, if one was kept.
    #[inline]
    pub fn opaque(&self) -> Option<&OpaqueMessage> {
        self.opaque.as_ref()
    }

    /// Returns `true` if this message hands the conversation to `target`.
    #[inline]
    pub fn is_handoff_to(&self, target: &ParticipantId) -> bool {
        matches!(&self.content, Content::Handoff(h) if &h.target == target)
    }
}

impl Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "---------- {} ----------", self.sender)?;
        write!(f, "{}", self.content)
    }
}

/// The ordered, append-only log of a conversation.
///
/// Only the team running the conversation appends to it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    /// Creates an empty transcript.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of messages.
    #[inline]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` if nothing has been appended.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Returns the messages in append order.
    #[inline]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Returns the most recent message.
    #[inline]
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Iterates over the messages in append order.
    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.messages.iter()
    }

    pub(crate) fn push(&mut self, message: Message) -> &Message {
        self.messages.push(message);
        let idx = self.messages.len() - 1;
        &self.messages[idx]
    }

    /// Builds the model context for `agent`.
    ///
    /// The agent's own entries are replayed as assistant and tool messages,
    /// preferring the provider's raw message when one was kept. Text from
    /// everyone else becomes user input. Tool traffic of other participants
    /// is not part of this agent's context.
    pub fn to_model_messages(
        &self,
        agent: &ParticipantId,
        system_message: Option<&str>,
    ) -> Vec<ModelMessage> {
        let mut messages = Vec::with_capacity(self.messages.len() + 1);
        if let Some(system_message) = system_message {
            messages.push(ModelMessage::System(system_message.to_owned()));
        }

        for msg in &self.messages {
            if &msg.sender != agent {
                if let Some(text) = msg.content.text() {
                    messages.push(ModelMessage::User(text.to_owned()));
                }
                continue;
            }

            match &msg.content {
                Content::Text(text) => messages.push(match &msg.opaque {
                    Some(opaque) if msg.role == Role::Assistant => {
                        ModelMessage::Opaque(opaque.clone())
                    }
                    _ if msg.role == Role::Assistant => {
                        ModelMessage::Assistant(text.clone())
                    }
                    _ => ModelMessage::User(text.clone()),
                }),
                Content::ToolCalls { thought, calls } => {
                    messages.push(match &msg.opaque {
                        Some(opaque) => ModelMessage::Opaque(opaque.clone()),
                        None => ModelMessage::ToolCalls {
                            thought: thought.clone(),
                            calls: calls.clone(),
                        },
                    })
                }
                Content::ToolResults(results) => {
                    messages.extend(results.iter().map(|result| {
                        ModelMessage::Tool(ToolCallResult {
                            id: result.call_id.clone(),
                            content: result.content.clone(),
                            is_error: result.is_error,
                        })
                    }))
                }
                Content::Handoff(handoff) => {
                    // Replayed as a completed call so the history stays well
                    // formed if the conversation comes back to this agent.
                    messages.push(ModelMessage::ToolCalls {
                        thought: None,
                        calls: vec![handoff.call.clone()],
                    });
                    messages.push(ModelMessage::Tool(ToolCallResult {
                        id: handoff.call.id.clone(),
                        content: handoff.message.clone(),
                        is_error: false,
                    }));
                }
            }
        }
        messages
    }
}

impl<'a> IntoIterator for &'a Transcript {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn weather_transcript() -> Transcript {
        let agent = ParticipantId::new("Weather_agent");
        let user = ParticipantId::new("user");
        let call = ToolCallRequest {
            id: "call_1".to_owned(),
            name: "get_forecast".to_owned(),
            arguments: json!({ "state": "TX" }),
        };

        let mut transcript = Transcript::new();
        transcript.push(Message::new(
            user.clone(),
            Role::User,
            Content::Text("Whats the weather of Texas?".to_owned()),
        ));
        transcript.push(
            Message::new(
                agent.clone(),
                Role::Assistant,
                Content::ToolCalls {
                    thought: None,
                    calls: vec![call.clone()],
                },
            )
            .with_opaque(Some(OpaqueMessage::new("msg:1", ()))),
        );
        transcript.push(Message::new(
            agent.clone(),
            Role::ToolResult,
            Content::ToolResults(vec![ToolResultEntry {
                call_id: "call_1".to_owned(),
                name: "get_forecast".to_owned(),
                content: "Sunny, 31C".to_owned(),
                is_error: false,
            }]),
        ));
        transcript.push(Message::new(
            agent.clone(),
            Role::Assistant,
            Content::Handoff(HandoffRequest {
                target: user,
                message: "Transfer to user.".to_owned(),
                call: ToolCallRequest {
                    id: "call_2".to_owned(),
                    name: "transfer_to_user".to_owned(),
                    arguments: json!({}),
                },
            }),
        ));
        transcript
    }

    #[test]
    fn test_agent_context() {
        let transcript = weather_transcript();
        let messages = transcript.to_model_messages(
            &ParticipantId::new("Weather_agent"),
            Some("Be helpful."),
        );

        assert_eq!(messages.len(), 6);
        assert_eq!(messages[0], ModelMessage::System("Be helpful.".to_owned()));
        assert_eq!(
            messages[1],
            ModelMessage::User("Whats the weather of Texas?".to_owned())
        );
        assert!(
            matches!(&messages[2], ModelMessage::Opaque(o) if o.id() == "msg:1")
        );
        assert!(matches!(
            &messages[3],
            ModelMessage::Tool(ToolCallResult { id, is_error: false, .. })
                if id == "call_1"
        ));
        assert!(matches!(
            &messages[4],
            ModelMessage::ToolCalls { calls, .. } if calls[0].id == "call_2"
        ));
        assert!(matches!(
            &messages[5],
            ModelMessage::Tool(ToolCallResult { id, content, .. })
                if id == "call_2" && content == "Transfer to user."
        ));
    }

    #[test]
    fn test_other_participant_context() {
        let transcript = weather_transcript();
        let messages =
            transcript.to_model_messages(&ParticipantId::new("user"), None);
        assert_eq!(
            messages,
            vec![
                ModelMessage::User("Whats the weather of Texas?".to_owned()),
                ModelMessage::User("Transfer to user.".to_owned()),
            ]
        );
    }

    #[test]
    fn test_text_bearing_content() {
        let transcript = weather_transcript();
        let texts: Vec<_> =
            transcript.iter().map(|m| m.content().text()).collect();
        assert_eq!(
            texts,
            vec![
                Some("Whats the weather of Texas?"),
                None,
                None,
                Some("Transfer to user."),
            ]
        );
    }

    #[test]
    fn test_display() {
        let transcript = weather_transcript();
        let rendered: Vec<String> =
            transcript.iter().map(|m| m.to_string()).collect();
        assert_eq!(
            rendered[1],
            "---------- Weather_agent ----------\n\
             -> get_forecast({\"state\":\"TX\"}) [call_1]"
        );
        assert_eq!(
            rendered[2],
            "---------- Weather_agent ----------\n\
             <- get_forecast [call_1]: Sunny, 31C"
        );
    }
}

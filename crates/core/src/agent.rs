//! Conversation participants.

mod builder;

use std::borrow::Borrow;
use std::fmt::{self, Display};

use roundtable_model::ModelTool;
use schemars::{JsonSchema, schema_for};
use serde_json::Value;

pub use builder::{AgentBuilder, DEFAULT_TOOL_TIMEOUT};

use crate::io::HumanInput;
use crate::model_client::ModelClient;
use crate::tool::Executor as ToolExecutor;

/// The system message used when an agent is built without one.
pub const DEFAULT_SYSTEM_MESSAGE: &str = "You are a helpful AI assistant. \
Solve tasks using your tools. \
Reply with TERMINATE when the task has been completed.";

/// The prompt shown to a human when it is their turn.
pub const DEFAULT_INPUT_PROMPT: &str = "Enter your response: ";

/// Identifies a participant within a team.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Creates an id from a name.
    #[inline]
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self(name.into())
    }

    /// Returns the name.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    #[inline]
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ParticipantId {
    #[inline]
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl Borrow<str> for ParticipantId {
    #[inline]
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A transfer of control offered to the model as a function tool.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Handoff {
    /// The participant that takes over.
    pub target: ParticipantId,
    /// The message recorded when the handoff happens.
    pub message: String,
    /// The function name the model calls to hand off.
    pub name: String,
    /// The function description shown to the model.
    pub description: String,
}

/// The handoff function takes no arguments.
#[derive(JsonSchema)]
#[allow(dead_code)]
struct HandoffArguments {}

impl Handoff {
    /// Creates a handoff to `target`, recording `message` when taken.
    pub fn new<T: Into<ParticipantId>, S: Into<String>>(
        target: T,
        message: S,
    ) -> Self {
        let target = target.into();
        Self {
            name: format!("transfer_to_{}", target.as_str().to_lowercase()),
            description: format!("Handoff to {target}."),
            message: message.into(),
            target,
        }
    }

    /// Returns the function definition offered to the model.
    pub fn definition(&self) -> ModelTool {
        let mut parameters = schema_for!(HandoffArguments).to_value();
        if let Value::Object(object) = &mut parameters {
            object.remove("$schema");
            object.remove("title");
        }
        ModelTool {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters,
        }
    }
}

/// An automated participant backed by a model.
pub struct AssistantAgent {
    pub(crate) id: ParticipantId,
    pub(crate) system_message: Option<String>,
    pub(crate) model_client: ModelClient,
    pub(crate) tools: ToolExecutor,
    pub(crate) handoffs: Vec<Handoff>,
}

impl AssistantAgent {
    /// Returns the id of this agent.
    #[inline]
    pub fn id(&self) -> &ParticipantId {
        &self.id
    }

    /// Returns the handoffs this agent may request.
    #[inline]
    pub fn handoffs(&self) -> &[Handoff] {
        &self.handoffs
    }

    /// Returns every function the model is offered, tools first.
    pub fn tool_definitions(&self) -> Vec<ModelTool> {
        let mut definitions = self.tools.definitions();
        definitions.extend(self.handoffs.iter().map(Handoff::definition));
        definitions
    }
}

/// A participant that relays turns to a human.
pub struct HumanProxy {
    pub(crate) id: ParticipantId,
    pub(crate) prompt: String,
    pub(crate) input: Box<dyn HumanInput>,
}

impl HumanProxy {
    /// Creates a human proxy reading from `input`.
    pub fn new<I, H>(id: I, input: H) -> Self
    where
        I: Into<ParticipantId>,
        H: HumanInput + 'static,
    {
        Self {
            id: id.into(),
            prompt: DEFAULT_INPUT_PROMPT.to_owned(),
            input: Box::new(input),
        }
    }

    /// Replaces the prompt shown before reading input.
    #[inline]
    pub fn with_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.prompt = prompt.into();
        self
    }

    /// Returns the id of this proxy.
    #[inline]
    pub fn id(&self) -> &ParticipantId {
        &self.id
    }
}

/// A member of a team.
pub enum Participant {
    /// A model-backed agent.
    Assistant(AssistantAgent),
    /// A human behind an input channel.
    Human(HumanProxy),
}

impl Participant {
    /// Returns the id of this participant.
    #[inline]
    pub fn id(&self) -> &ParticipantId {
        match self {
            Participant::Assistant(agent) => &agent.id,
            Participant::Human(human) => &human.id,
        }
    }

    /// Returns `true` for human proxies.
    #[inline]
    pub fn is_human(&self) -> bool {
        matches!(self, Participant::Human(_))
    }
}

impl From<AssistantAgent> for Participant {
    #[inline]
    fn from(agent: AssistantAgent) -> Self {
        Participant::Assistant(agent)
    }
}

impl From<HumanProxy> for Participant {
    #[inline]
    fn from(human: HumanProxy) -> Self {
        Participant::Human(human)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handoff_definition() {
        let handoff = Handoff::new("User", "Transfer to user.");
        assert_eq!(handoff.name, "transfer_to_user");
        assert_eq!(handoff.target, ParticipantId::new("User"));

        let definition = handoff.definition();
        assert_eq!(definition.name, "transfer_to_user");
        assert_eq!(definition.description, "Handoff to User.");
        assert_eq!(definition.parameters["type"], "object");
        assert!(definition.parameters.get("$schema").is_none());
    }
}

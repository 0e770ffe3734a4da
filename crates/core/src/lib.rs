//! Core logic of a tool-augmented conversation: participants, the transcript,
//! termination conditions, tool execution and the turn-taking loop.

#![deny(missing_docs)]
#![deny(clippy::missing_safety_doc)]

#[macro_use]
extern crate tracing;

mod agent;
mod error;
mod io;
mod model_client;
mod team;
mod termination;
pub mod tool;
pub mod transcript;

pub use agent::{
    AgentBuilder, AssistantAgent, DEFAULT_INPUT_PROMPT, DEFAULT_SYSTEM_MESSAGE,
    DEFAULT_TOOL_TIMEOUT, Handoff, HumanProxy, Participant, ParticipantId,
};
pub use error::{BuildError, RunError};
pub use io::{HumanInput, TracingSink, TranscriptSink};
pub use model_client::{
    DEFAULT_REQUEST_TIMEOUT, ModelClientError, ModelReply, RetryPolicy,
};
pub use team::{
    DEFAULT_MAX_TOOL_ROUNDS, RunResult, StopReason, Team, TeamBuilder,
    TurnState,
};
pub use termination::{Termination, TerminationCondition};
pub use tokio_util::sync::CancellationToken;
pub use transcript::{
    Content, HandoffRequest, Message, Role, ToolResultEntry, Transcript,
};

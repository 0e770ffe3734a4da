//! The turn-taking loop.

mod builder;
mod state;

use roundtable_model::ModelRequest;
use tokio_util::sync::CancellationToken;

pub use builder::TeamBuilder;
pub use state::TurnState;

use crate::agent::{AssistantAgent, HumanProxy, Participant, ParticipantId};
use crate::error::RunError;
use crate::io::TranscriptSink;
use crate::model_client::ModelReply;
use crate::termination::{Termination, TerminationCondition};
use crate::transcript::{Content, Message, Role, Transcript};

/// The number of tool rounds an agent may run in one turn unless configured
/// otherwise.
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 16;

/// Why a run stopped.
#[derive(Debug)]
pub enum StopReason {
    /// A termination condition fired.
    Condition(TerminationCondition),
    /// The run was cancelled.
    Cancelled,
    /// The run failed.
    Failed(RunError),
}

/// The outcome of [`Team::run`].
#[derive(Debug)]
pub struct RunResult {
    /// Everything appended during the run.
    pub transcript: Transcript,
    /// The number of participant turns started.
    pub turns: usize,
    /// Why the run stopped.
    pub stop: StopReason,
}

impl RunResult {
    /// Returns the condition that ended the run, if one did.
    #[inline]
    pub fn condition(&self) -> Option<&TerminationCondition> {
        match &self.stop {
            StopReason::Condition(condition) => Some(condition),
            _ => None,
        }
    }

    /// Returns the failure that ended the run, if one did.
    #[inline]
    pub fn error(&self) -> Option<&RunError> {
        match &self.stop {
            StopReason::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// A fixed group of participants taking turns on one conversation.
///
/// Participants act in a strict cycle in the order they were added. A
/// handoff makes its target the next participant instead. The run stops on
/// the first appended message that satisfies the termination set.
pub struct Team {
    participants: Vec<Participant>,
    termination: Termination,
    max_tool_rounds: usize,
}

impl Team {
    /// Returns a builder.
    #[inline]
    pub fn builder() -> TeamBuilder {
        TeamBuilder::new()
    }

    /// Returns the participants in turn order.
    #[inline]
    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    /// Returns the stop conditions.
    #[inline]
    pub fn termination(&self) -> &Termination {
        &self.termination
    }

    /// Runs one conversation on `task`.
    ///
    /// The task is appended first, on behalf of the first human participant,
    /// and is evaluated like any other message. Every append is recorded to
    /// `sink`. Cancelling `cancel` stops the run at the next suspension
    /// point without appending anything from the interrupted operation.
    pub async fn run<S: Into<String>>(
        &mut self,
        task: S,
        sink: &mut dyn TranscriptSink,
        cancel: &CancellationToken,
    ) -> RunResult {
        let Self {
            participants,
            termination,
            max_tool_rounds,
        } = self;

        let mut recorder = Recorder {
            transcript: Transcript::new(),
            sink,
            termination,
        };
        let mut state = TurnState::AwaitingTurn(participants[0].id().clone());
        let mut turns = 0;

        let stop = drive(
            participants,
            &mut recorder,
            &mut state,
            &mut turns,
            *max_tool_rounds,
            task.into(),
            cancel,
        )
        .await;
        state.transition(TurnState::Terminated);

        match &stop {
            StopReason::Condition(condition) => {
                info!("conversation ended by {condition} after {turns} turn(s)")
            }
            StopReason::Cancelled => info!("conversation cancelled"),
            StopReason::Failed(err) => {
                error!("conversation failed ({}): {err}", err.kind())
            }
        }
        if let Err(err) = recorder.sink.flush() {
            warn!("failed to flush transcript sink: {err}");
        }

        RunResult {
            transcript: recorder.transcript,
            turns,
            stop,
        }
    }
}

/// Owns the transcript for the duration of a run.
struct Recorder<'a> {
    transcript: Transcript,
    sink: &'a mut dyn TranscriptSink,
    termination: &'a Termination,
}

impl Recorder<'_> {
    /// Appends, records and evaluates one message.
    fn append(&mut self, message: Message) -> Option<TerminationCondition> {
        self.transcript.push(message);
        let message = self.transcript.last()?;
        if let Err(err) = self.sink.record(message) {
            warn!("failed to record message: {err}");
        }
        self.termination.check(&self.transcript, message).cloned()
    }

    #[inline]
    fn append_or_stop(&mut self, message: Message, then: Flow) -> Flow {
        match self.append(message) {
            Some(condition) => Flow::Stop(StopReason::Condition(condition)),
            None => then,
        }
    }
}

enum Flow {
    Next,
    HandoffTo(ParticipantId),
    Stop(StopReason),
}

async fn drive(
    participants: &mut [Participant],
    recorder: &mut Recorder<'_>,
    state: &mut TurnState,
    turns: &mut usize,
    max_tool_rounds: usize,
    task: String,
    cancel: &CancellationToken,
) -> StopReason {
    if cancel.is_cancelled() {
        return StopReason::Cancelled;
    }

    let task_sender = participants
        .iter()
        .find(|p| p.is_human())
        .map(|p| p.id().clone())
        .unwrap_or_else(|| ParticipantId::new("user"));
    let task = Message::new(task_sender, Role::User, Content::Text(task));
    if let Flow::Stop(stop) = recorder.append_or_stop(task, Flow::Next) {
        return stop;
    }

    let mut idx = 0;
    loop {
        if cancel.is_cancelled() {
            return StopReason::Cancelled;
        }
        *turns += 1;

        let flow = match &mut participants[idx] {
            Participant::Assistant(agent) => {
                debug!("turn {turns}: agent `{}`", agent.id());
                run_agent_turn(agent, recorder, state, max_tool_rounds, cancel)
                    .await
            }
            Participant::Human(human) => {
                debug!("turn {turns}: human `{}`", human.id());
                run_human_turn(human, recorder, state, cancel).await
            }
        };

        let next_in_order = (idx + 1) % participants.len();
        idx = match flow {
            Flow::Stop(stop) => return stop,
            Flow::Next => next_in_order,
            Flow::HandoffTo(target) => {
                match participants.iter().position(|p| p.id() == &target) {
                    Some(target_idx) => target_idx,
                    None => {
                        warn!("no participant `{target}`, continuing in order");
                        next_in_order
                    }
                }
            }
        };
        state.transition(TurnState::AwaitingTurn(participants[idx].id().clone()));
    }
}

async fn run_agent_turn(
    agent: &AssistantAgent,
    recorder: &mut Recorder<'_>,
    state: &mut TurnState,
    max_tool_rounds: usize,
    cancel: &CancellationToken,
) -> Flow {
    let tools = agent.tool_definitions();
    let mut rounds = 0;

    loop {
        state.transition(TurnState::Processing);
        let req = ModelRequest {
            messages: recorder.transcript.to_model_messages(
                &agent.id,
                agent.system_message.as_deref(),
            ),
            tools: tools.clone(),
        };

        let reply = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Flow::Stop(StopReason::Cancelled),
            reply = agent.model_client.complete(req, &agent.handoffs) => reply,
        };
        let reply = match reply {
            Ok(reply) => reply,
            Err(err) => return Flow::Stop(StopReason::Failed(err.into())),
        };

        match reply {
            ModelReply::Text { text, opaque } => {
                let msg = Message::new(
                    agent.id.clone(),
                    Role::Assistant,
                    Content::Text(text),
                )
                .with_opaque(opaque);
                return recorder.append_or_stop(msg, Flow::Next);
            }
            ModelReply::Handoff(handoff) => {
                let target = handoff.target.clone();
                info!("`{}` hands off to `{target}`", agent.id);
                let msg = Message::new(
                    agent.id.clone(),
                    Role::Assistant,
                    Content::Handoff(handoff),
                );
                return recorder.append_or_stop(msg, Flow::HandoffTo(target));
            }
            ModelReply::ToolCalls {
                thought,
                calls,
                opaque,
            } => {
                rounds += 1;
                if rounds > max_tool_rounds {
                    return Flow::Stop(StopReason::Failed(
                        RunError::ToolRoundsExceeded {
                            agent: agent.id.clone(),
                            limit: max_tool_rounds,
                        },
                    ));
                }

                let msg = Message::new(
                    agent.id.clone(),
                    Role::Assistant,
                    Content::ToolCalls {
                        thought,
                        calls: calls.clone(),
                    },
                )
                .with_opaque(opaque);
                if let Some(condition) = recorder.append(msg) {
                    return Flow::Stop(StopReason::Condition(condition));
                }

                state.transition(TurnState::AwaitingToolResult);
                let results = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Flow::Stop(StopReason::Cancelled),
                    results = agent.tools.invoke_all(&calls) => results,
                };
                let msg = Message::new(
                    agent.id.clone(),
                    Role::ToolResult,
                    Content::ToolResults(results),
                );
                if let Some(condition) = recorder.append(msg) {
                    return Flow::Stop(StopReason::Condition(condition));
                }
            }
        }
    }
}

async fn run_human_turn(
    human: &mut HumanProxy,
    recorder: &mut Recorder<'_>,
    state: &mut TurnState,
    cancel: &CancellationToken,
) -> Flow {
    state.transition(TurnState::Processing);
    let input = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Flow::Stop(StopReason::Cancelled),
        input = human.input.read_input(&human.prompt) => input,
    };
    let text = match input {
        Ok(Some(text)) => text,
        Ok(None) => return Flow::Stop(StopReason::Failed(RunError::InputClosed)),
        Err(err) => return Flow::Stop(StopReason::Failed(RunError::Input(err))),
    };

    let msg = Message::new(human.id.clone(), Role::User, Content::Text(text));
    recorder.append_or_stop(msg, Flow::Next)
}

use roundtable_core::tool::Tool;
use roundtable_core::{
    AgentBuilder, BuildError, CancellationToken, Handoff, HumanInput,
    HumanProxy, ParticipantId, RunResult, Team, TerminationCondition,
    TranscriptSink,
};
use roundtable_mcp::Registry;
use roundtable_model::ModelProvider;
use roundtable_openai_model::{OpenAIConfigBuilder, OpenAIProvider};

use crate::config::{Config, ConfigError};

/// The name of the model-backed agent.
pub const AGENT_NAME: &str = "Weather_agent";

/// The name of the human participant.
pub const USER_NAME: &str = "user";

/// What the agent says when it hands the conversation back.
pub const HANDOFF_MESSAGE: &str = "Transfer to user.";

/// A failure before or around a conversation.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// The configuration is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The tool server could not be used.
    #[error("tool discovery failed: {0}")]
    Discovery(#[from] roundtable_mcp::Error),
    /// The participants do not form a valid team.
    #[error("invalid team: {0}")]
    Build(#[from] BuildError),
    /// Cancelled before the conversation started.
    #[error("cancelled")]
    Cancelled,
}

impl AppError {
    /// Returns a short name for the kind of failure.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Config(_) | AppError::Build(_) => "ConfigurationError",
            AppError::Discovery(roundtable_mcp::Error::Connection(_)) => {
                "ConnectionError"
            }
            AppError::Discovery(roundtable_mcp::Error::Protocol(_)) => {
                "ProtocolError"
            }
            AppError::Discovery(roundtable_mcp::Error::Invocation(_)) => {
                "InvocationError"
            }
            AppError::Cancelled => "Cancelled",
        }
    }
}

/// Creates the chat completion provider described by `config`.
pub fn model_provider(config: &Config) -> OpenAIProvider {
    let model_config = OpenAIConfigBuilder::with_api_key(&config.api_key)
        .with_model(&config.model)
        .with_base_url(&config.base_url)
        .build();
    OpenAIProvider::new(model_config)
}

/// Assembles the agent, the human proxy and the stop conditions.
pub fn build_team<P, T, I, H>(
    config: &Config,
    provider: P,
    tools: I,
    input: H,
) -> Result<Team, BuildError>
where
    P: ModelProvider + 'static,
    T: Tool,
    I: IntoIterator<Item = T>,
    H: HumanInput + 'static,
{
    let agent = AgentBuilder::with_model_provider(AGENT_NAME, provider)
        .with_tools(tools)
        .with_handoff(Handoff::new(USER_NAME, HANDOFF_MESSAGE))
        .with_retry_policy(config.retry_policy.clone())
        .with_request_timeout(config.model_timeout)
        .with_tool_timeout(config.server.timeout())
        .build()?;

    let mut termination = TerminationCondition::HandoffTo(ParticipantId::new(
        USER_NAME,
    )) | TerminationCondition::TextMention(config.sentinel.clone());
    if let Some(max_messages) = config.max_messages {
        termination = termination | TerminationCondition::MaxMessages(max_messages);
    }

    Team::builder()
        .with_participant(agent)
        .with_participant(HumanProxy::new(USER_NAME, input))
        .with_termination(termination)
        .build()
}

/// Discovers the server's tools, then runs one conversation on the
/// configured task.
///
/// Nothing is sent to the model unless discovery succeeds.
pub async fn run<P, H>(
    config: &Config,
    provider: P,
    input: H,
    sink: &mut dyn TranscriptSink,
    cancel: &CancellationToken,
) -> Result<RunResult, AppError>
where
    P: ModelProvider + 'static,
    H: HumanInput + 'static,
{
    let registry = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(AppError::Cancelled),
        registry = Registry::discover(&config.server) => registry?,
    };
    let tools = registry.into_tools();
    let names: Vec<&str> = tools.iter().map(|tool| tool.name()).collect();
    info!(
        "available tools from {}: {}",
        config.server.url(),
        names.join(", ")
    );

    let mut team = build_team(config, provider, tools, input)?;
    Ok(team.run(config.task.clone(), sink, cancel).await)
}

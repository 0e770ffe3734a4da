use std::collections::HashSet;
use std::time::Duration;

use roundtable_model::ModelProvider;

use super::{AssistantAgent, DEFAULT_SYSTEM_MESSAGE, Handoff, ParticipantId};
use crate::error::BuildError;
use crate::model_client::{ModelClient, RetryPolicy};
use crate::tool::{AnyTool, Executor as ToolExecutor, Tool, ToolObject};

/// The timeout applied to each tool call unless configured otherwise.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// [`AssistantAgent`] builder.
pub struct AgentBuilder {
    id: ParticipantId,
    model_client: ModelClient,
    system_message: Option<String>,
    tools: Vec<Box<dyn ToolObject>>,
    handoffs: Vec<Handoff>,
    tool_timeout: Option<Duration>,
}

impl AgentBuilder {
    /// Creates a new builder for an agent named `id`, backed by the
    /// specified model provider.
    #[inline]
    pub fn with_model_provider<I, P>(id: I, provider: P) -> Self
    where
        I: Into<ParticipantId>,
        P: ModelProvider + 'static,
    {
        Self {
            id: id.into(),
            model_client: ModelClient::new(provider),
            system_message: Some(DEFAULT_SYSTEM_MESSAGE.to_owned()),
            tools: vec![],
            handoffs: vec![],
            tool_timeout: Some(DEFAULT_TOOL_TIMEOUT),
        }
    }

    /// Replaces the system message.
    #[inline]
    pub fn with_system_message<S: Into<String>>(mut self, message: S) -> Self {
        self.system_message = Some(message.into());
        self
    }

    /// Sends requests without a system message.
    #[inline]
    pub fn without_system_message(mut self) -> Self {
        self.system_message = None;
        self
    }

    /// Registers a tool.
    #[inline]
    pub fn with_tool<T: Tool>(mut self, tool: T) -> Self {
        self.tools.push(Box::new(AnyTool(tool)));
        self
    }

    /// Registers every tool in `tools`.
    #[inline]
    pub fn with_tools<T, I>(mut self, tools: I) -> Self
    where
        T: Tool,
        I: IntoIterator<Item = T>,
    {
        self.tools.extend(
            tools
                .into_iter()
                .map(|tool| Box::new(AnyTool(tool)) as Box<dyn ToolObject>),
        );
        self
    }

    /// Offers a handoff to the model.
    #[inline]
    pub fn with_handoff(mut self, handoff: Handoff) -> Self {
        self.handoffs.push(handoff);
        self
    }

    /// Sets how rate-limited model requests are retried.
    #[inline]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.model_client.set_retry_policy(retry_policy);
        self
    }

    /// Sets the timeout of each model request attempt.
    #[inline]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.model_client.set_timeout(Some(timeout));
        self
    }

    /// Sets the timeout of each tool call.
    #[inline]
    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = Some(timeout);
        self
    }

    /// Builds the agent.
    ///
    /// Fails if two tools, or a tool and a handoff, share a name.
    pub fn build(self) -> Result<AssistantAgent, BuildError> {
        let mut names = HashSet::new();
        let tool_names = self.tools.iter().map(|tool| tool.name());
        let handoff_names = self.handoffs.iter().map(|h| h.name.as_str());
        for name in tool_names.chain(handoff_names) {
            if !names.insert(name) {
                return Err(BuildError::DuplicateFunction {
                    agent: self.id.clone(),
                    name: name.to_owned(),
                });
            }
        }

        debug!(
            "built agent `{}` with {} tool(s) and {} handoff(s)",
            self.id,
            self.tools.len(),
            self.handoffs.len()
        );
        Ok(AssistantAgent {
            id: self.id,
            system_message: self.system_message,
            model_client: self.model_client,
            tools: ToolExecutor::with_tools(self.tools)
                .with_timeout(self.tool_timeout),
            handoffs: self.handoffs,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::future::ready;

    use roundtable_test_model::TestModelProvider;
    use serde_json::{Value, json};

    use super::*;
    use crate::tool::ToolResult;

    struct Named {
        name: &'static str,
        schema: Value,
    }

    impl Tool for Named {
        type Input = Value;

        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "Does nothing."
        }

        fn parameter_schema(&self) -> &Value {
            &self.schema
        }

        fn execute(
            &self,
            _input: Self::Input,
        ) -> impl Future<Output = ToolResult> + Send + 'static {
            ready(Ok(String::new()))
        }
    }

    fn named(name: &'static str) -> Named {
        Named {
            name,
            schema: json!({ "type": "object" }),
        }
    }

    #[test]
    fn test_tool_definitions() {
        let agent = AgentBuilder::with_model_provider(
            "Weather_agent",
            TestModelProvider::default(),
        )
        .with_tools([named("get_forecast"), named("get_alerts")])
        .with_handoff(Handoff::new("user", "Transfer to user."))
        .build()
        .unwrap();

        let names: Vec<_> = agent
            .tool_definitions()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, ["get_forecast", "get_alerts", "transfer_to_user"]);
        assert_eq!(agent.system_message.as_deref(), Some(DEFAULT_SYSTEM_MESSAGE));
    }

    #[test]
    fn test_duplicate_names() {
        let err = AgentBuilder::with_model_provider(
            "Weather_agent",
            TestModelProvider::default(),
        )
        .with_tool(named("transfer_to_user"))
        .with_handoff(Handoff::new("user", "Transfer to user."))
        .build()
        .err()
        .unwrap();
        assert_eq!(
            err,
            BuildError::DuplicateFunction {
                agent: ParticipantId::new("Weather_agent"),
                name: "transfer_to_user".to_owned(),
            }
        );
    }
}

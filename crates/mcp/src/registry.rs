use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use roundtable_core::tool::{Error as ToolError, Tool, ToolResult};
use serde_json::Value;

use crate::connection::Connection;
use crate::proto::{CallToolParams, CallToolResult};
use crate::{Error, ServerConfig};

/// The tools discovered on one server, with the connections they use.
pub struct Registry {
    connections: Vec<Arc<Connection>>,
    tools: Vec<McpTool>,
}

impl Registry {
    /// Connects to the server, performs the handshake and lists its tools.
    ///
    /// The whole exchange is bounded by the configured timeout. Tool names
    /// are guaranteed to be unique.
    pub async fn discover(config: &ServerConfig) -> Result<Self, Error> {
        let timeout = config.timeout;
        match tokio::time::timeout(timeout, Self::connect(config)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Connection(format!(
                "no answer from {} within {timeout:?}",
                config.url
            ))),
        }
    }

    async fn connect(config: &ServerConfig) -> Result<Self, Error> {
        let client = Client::builder()
            .connect_timeout(config.timeout)
            .build()
            .map_err(|err| Error::Connection(format!("{err}")))?;

        let mut connections = Vec::with_capacity(config.connections);
        for _ in 0..config.connections {
            let connection =
                Connection::open(&client, &config.url, &config.headers).await?;
            connection.initialize().await?;
            connections.push(Arc::new(connection));
        }

        let Some(first) = connections.first() else {
            return Err(Error::Connection("no connection configured".to_owned()));
        };
        let definitions = first.list_tools().await?;

        let mut names = HashSet::with_capacity(definitions.len());
        for definition in &definitions {
            if !names.insert(definition.name.as_str()) {
                return Err(Error::Protocol(format!(
                    "duplicate tool name `{}`",
                    definition.name
                )));
            }
        }

        let tools: Vec<_> = definitions
            .into_iter()
            .enumerate()
            .map(|(idx, definition)| McpTool {
                name: definition.name,
                description: definition.description.unwrap_or_default(),
                schema: definition.input_schema,
                connection: Arc::clone(&connections[idx % connections.len()]),
                timeout: config.timeout,
            })
            .collect();
        info!(
            "discovered {} tool(s) on {} over {} connection(s)",
            tools.len(),
            config.url,
            connections.len()
        );

        Ok(Self { connections, tools })
    }

    /// Returns the discovered tools.
    #[inline]
    pub fn tools(&self) -> &[McpTool] {
        &self.tools
    }

    /// Returns the number of open connections.
    #[inline]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Takes the tools out. The connections stay open as long as a tool
    /// referring to them is alive.
    #[inline]
    pub fn into_tools(self) -> Vec<McpTool> {
        self.tools
    }
}

/// Shorthand for [`Registry::discover`].
#[inline]
pub async fn discover(config: &ServerConfig) -> Result<Registry, Error> {
    Registry::discover(config).await
}

/// A tool living on a remote server.
#[derive(Clone)]
pub struct McpTool {
    name: String,
    description: String,
    schema: Value,
    connection: Arc<Connection>,
    timeout: Duration,
}

impl std::fmt::Debug for McpTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl McpTool {
    /// Calls the tool with `arguments` on its connection.
    ///
    /// Every failure, the server flagging the result as an error included,
    /// is reported as [`Error::Invocation`].
    pub async fn invoke(&self, arguments: Value) -> Result<String, Error> {
        invoke(
            Arc::clone(&self.connection),
            self.name.clone(),
            arguments,
            self.timeout,
        )
        .await
    }
}

async fn invoke(
    connection: Arc<Connection>,
    name: String,
    arguments: Value,
    timeout: Duration,
) -> Result<String, Error> {
    let params = serde_json::to_value(CallToolParams {
        name: &name,
        arguments,
    })
    .map_err(|err| Error::Invocation(format!("{err}")))?;

    let message = tokio::time::timeout(
        timeout,
        connection.request("tools/call", Some(params)),
    )
    .await
    .map_err(|_| {
        Error::Invocation(format!("`{name}` did not answer within {timeout:?}"))
    })?
    .map_err(|err| Error::Invocation(err.message().to_owned()))?;

    let result = message.into_result().map_err(|err| {
        Error::Invocation(format!("{} ({})", err.message, err.code))
    })?;
    let result: CallToolResult = serde_json::from_value(result)
        .map_err(|err| Error::Invocation(format!("unexpected result: {err}")))?;

    let text = result.render();
    if result.is_error {
        return Err(Error::Invocation(text));
    }
    Ok(text)
}

impl Tool for McpTool {
    type Input = Value;

    #[inline]
    fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    fn description(&self) -> &str {
        &self.description
    }

    #[inline]
    fn parameter_schema(&self) -> &Value {
        &self.schema
    }

    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let connection = Arc::clone(&self.connection);
        let name = self.name.clone();
        let timeout = self.timeout;
        async move {
            invoke(connection, name, input, timeout).await.map_err(|err| {
                ToolError::execution_error().with_reason(err.message())
            })
        }
    }
}

use std::collections::HashMap;
use std::future::ready;
use std::pin::Pin;
use std::time::Duration;

use futures_util::future::join_all;
use roundtable_model::{ModelTool, ToolCallRequest};
use serde_json::Value;
use tracing::Instrument;

use crate::tool::{Error, ToolObject, ToolResult};
use crate::transcript::ToolResultEntry;

type BoxedToolFuture = Pin<Box<dyn Future<Output = ToolResult> + Send>>;

/// An executor that handles tool call requests from the model.
pub struct Executor {
    // Kept in registration order so the model sees a stable tool list.
    tools: Vec<Box<dyn ToolObject>>,
    index: HashMap<String, usize>,
    timeout: Option<Duration>,
}

impl Executor {
    /// Creates an executor. Tool names must already be unique.
    pub fn with_tools(tools: Vec<Box<dyn ToolObject>>) -> Self {
        let index = tools
            .iter()
            .enumerate()
            .map(|(idx, tool)| (tool.name().to_owned(), idx))
            .collect();
        Self {
            tools,
            index,
            timeout: None,
        }
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[inline]
    pub fn definitions(&self) -> Vec<ModelTool> {
        self.tools.iter().map(|tool| tool.definition()).collect()
    }

    /// Starts every requested call, handing each future to `spawner` along
    /// with its call id.
    ///
    /// Requests naming an unknown tool get a future that resolves to a
    /// `NotFound` error, and requests whose arguments did not parse get an
    /// `InvalidInput` error, so every request is answered.
    pub fn handle_requests<S>(&self, requests: &[ToolCallRequest], spawner: S)
    where
        S: FnMut(&ToolCallRequest, BoxedToolFuture),
    {
        let mut spawner = spawner;

        let span = debug_span!("tool executor");
        let _enter = span.enter();
        for req in requests {
            let Some(tool) = self.index.get(&req.name).map(|&i| &self.tools[i])
            else {
                warn!("tool not found: {}", req.name);
                let err = Error::not_found()
                    .with_reason(format!("no tool named `{}`", req.name));
                spawner(req, Box::pin(ready(Err(err))));
                continue;
            };
            // Providers keep unparsable argument text as a string.
            if let Value::String(raw) = &req.arguments {
                warn!("malformed arguments for `{}`: {raw}", req.name);
                let err = Error::invalid_input()
                    .with_reason(format!("malformed arguments: {raw}"));
                spawner(req, Box::pin(ready(Err(err))));
                continue;
            }
            trace!("spawning a tool ({}) with args: {:?}", req.id, req.arguments);
            let fut = tool.execute(req.arguments.clone());
            let fut = match self.timeout {
                Some(timeout) => with_timeout(fut, timeout),
                None => fut,
            };
            spawner(
                req,
                Box::pin(fut.instrument(debug_span!("tool", name = %req.name))),
            );
        }
    }

    /// Runs all requested calls concurrently and returns one result per
    /// request, in request order.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. Dropping the future drops every call that
    /// is still in flight.
    pub async fn invoke_all(
        &self,
        requests: &[ToolCallRequest],
    ) -> Vec<ToolResultEntry> {
        let mut pending = Vec::with_capacity(requests.len());
        self.handle_requests(requests, |req, fut| {
            pending.push((req.id.clone(), req.name.clone(), fut));
        });

        let (meta, futs): (Vec<_>, Vec<_>) = pending
            .into_iter()
            .map(|(id, name, fut)| ((id, name), fut))
            .unzip();
        let results = join_all(futs).await;

        meta.into_iter()
            .zip(results)
            .map(|((call_id, name), result)| match result {
                Ok(content) => ToolResultEntry {
                    call_id,
                    name,
                    content,
                    is_error: false,
                },
                Err(err) => {
                    debug!("tool `{name}` ({call_id}) failed: {err}");
                    ToolResultEntry {
                        call_id,
                        name,
                        content: format!("Error: {}", err.reason()),
                        is_error: true,
                    }
                }
            })
            .collect()
    }
}

fn with_timeout(fut: BoxedToolFuture, timeout: Duration) -> BoxedToolFuture {
    Box::pin(async move {
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout()
                .with_reason(format!("no result after {timeout:?}"))),
        }
    })
}

#[cfg(test)]
mod tests {
    use std::future::pending;

    use serde::Deserialize;
    use serde_json::{Value, json};

    use super::*;
    use crate::tool::{AnyTool, Tool};

    struct Forecast {
        schema: Value,
    }

    #[derive(Deserialize)]
    struct ForecastInput {
        state: String,
    }

    impl Tool for Forecast {
        type Input = ForecastInput;

        fn name(&self) -> &str {
            "get_forecast"
        }

        fn description(&self) -> &str {
            "Returns the forecast for a US state."
        }

        fn parameter_schema(&self) -> &Value {
            &self.schema
        }

        fn execute(
            &self,
            input: Self::Input,
        ) -> impl Future<Output = ToolResult> + Send + 'static {
            ready(match input.state.as_str() {
                "TX" => Ok("Sunny, 31C".to_owned()),
                other => Err(Error::execution_error()
                    .with_reason(format!("unknown state {other}"))),
            })
        }
    }

    struct Stuck {
        schema: Value,
    }

    impl Tool for Stuck {
        type Input = Value;

        fn name(&self) -> &str {
            "stuck"
        }

        fn description(&self) -> &str {
            "Never returns."
        }

        fn parameter_schema(&self) -> &Value {
            &self.schema
        }

        fn execute(
            &self,
            _input: Self::Input,
        ) -> impl Future<Output = ToolResult> + Send + 'static {
            pending()
        }
    }

    fn executor() -> Executor {
        Executor::with_tools(vec![
            Box::new(AnyTool(Forecast {
                schema: json!({ "type": "object" }),
            })),
            Box::new(AnyTool(Stuck {
                schema: json!({ "type": "object" }),
            })),
        ])
    }

    fn call(id: &str, name: &str, arguments: Value) -> ToolCallRequest {
        ToolCallRequest {
            id: id.to_owned(),
            name: name.to_owned(),
            arguments,
        }
    }

    #[test]
    fn test_definitions_keep_order() {
        let names: Vec<_> =
            executor().definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, ["get_forecast", "stuck"]);
    }

    #[test]
    fn test_handle_requests() {
        let executor = executor();
        let mut spawned_ids: Vec<String> = vec![];
        executor.handle_requests(
            &[
                call("call_1", "get_forecast", json!({ "state": "TX" })),
                call("call_2", "read_file", json!({})),
            ],
            |req, _future| spawned_ids.push(req.id.clone()),
        );
        assert_eq!(spawned_ids, ["call_1", "call_2"]);
    }

    #[tokio::test]
    async fn test_invoke_all_in_request_order() {
        let results = executor()
            .invoke_all(&[
                call("call_1", "get_forecast", json!({ "state": "CA" })),
                call("call_2", "get_forecast", json!({ "state": "TX" })),
                call("call_3", "get_forecast", json!({ "city": "Austin" })),
                call("call_4", "read_file", json!({})),
            ])
            .await;

        let ids: Vec<_> = results.iter().map(|r| r.call_id.as_str()).collect();
        assert_eq!(ids, ["call_1", "call_2", "call_3", "call_4"]);
        assert!(results[0].is_error);
        assert_eq!(results[0].content, "Error: unknown state CA");
        assert!(!results[1].is_error);
        assert_eq!(results[1].content, "Sunny, 31C");
        assert!(results[2].is_error);
        assert!(results[2].content.contains("state"));
        assert!(results[3].is_error);
        assert_eq!(results[3].content, "Error: no tool named `read_file`");
    }

    #[tokio::test]
    async fn test_malformed_arguments() {
        let results = executor()
            .invoke_all(&[
                call("call_1", "get_forecast", json!("{\"state\": \"TX")),
                // Would never return if it were started.
                call("call_2", "stuck", json!("{")),
            ])
            .await;
        assert!(results[0].is_error);
        assert_eq!(
            results[0].content,
            "Error: malformed arguments: {\"state\": \"TX"
        );
        assert!(results[1].is_error);
        assert_eq!(results[1].content, "Error: malformed arguments: {");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let executor = executor().with_timeout(Some(Duration::from_secs(5)));
        let results = executor
            .invoke_all(&[
                call("call_1", "stuck", json!({})),
                call("call_2", "get_forecast", json!({ "state": "TX" })),
            ])
            .await;
        assert!(results[0].is_error);
        assert!(results[0].content.starts_with("Error: no result after"));
        assert_eq!(results[1].content, "Sunny, 31C");
    }
}

//! A local fake model for testing purpose.

mod preset;

use std::collections::VecDeque;
use std::error::Error as StdError;
use std::fmt::{self, Debug, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use roundtable_model::{
    ErrorKind, ModelFinishReason, ModelProvider, ModelProviderError,
    ModelRequest, ModelResponse, ModelResponseEvent, OpaqueMessage,
};
use tokio::time::{Sleep, sleep};

pub use preset::*;

#[derive(Debug)]
pub struct Error {
    message: &'static str,
    kind: ErrorKind,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

pub struct TestModelResponse {
    seq: usize,
    events: VecDeque<PresetEvent>,
    has_tool_call: bool,
    completed: bool,
    delay: Duration,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl ModelResponse for TestModelResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.get_mut();
        if this.completed {
            // In case this method is called after completion.
            return Poll::Ready(Ok(None));
        }

        let delay = this.delay;
        let sleep = this.sleep.get_or_insert_with(|| Box::pin(sleep(delay)));
        ready!(sleep.as_mut().poll(cx));
        this.sleep = None;

        let event = match this.events.pop_front() {
            Some(PresetEvent::MessageDelta(msg)) => {
                ModelResponseEvent::MessageDelta(msg)
            }
            Some(PresetEvent::ToolCall(req)) => ModelResponseEvent::ToolCall(req),
            None => {
                this.completed = true;
                ModelResponseEvent::Completed(if this.has_tool_call {
                    ModelFinishReason::ToolCalls
                } else {
                    ModelFinishReason::Stop
                })
            }
        };
        Poll::Ready(Ok(Some(event)))
    }

    fn make_opaque_message(&self) -> Option<OpaqueMessage> {
        let id = format!("msg:{}", self.seq);
        Some(OpaqueMessage::new(id.clone(), id))
    }
}

#[derive(Default)]
struct Script {
    responses: VecDeque<PresetResponse>,
    failed_attempts: u64,
    served: usize,
    requests: Vec<ModelRequest>,
}

/// A local fake model for testing purpose.
///
/// Before sending requests, queue up the responses the model should give.
/// Every request consumes the response at the front of the queue, unless the
/// response is configured to fail first. When the queue is empty, requests
/// fail with [`ErrorKind::Other`].
///
/// Clones share the same script, so a test can keep one handle to inspect
/// the recorded requests after giving the other one away.
///
/// # Note
///
/// This type is not optimized for production use, there are heavy memory
/// copies involved. You should only use it for testing.
#[derive(Clone, Default)]
pub struct TestModelProvider {
    script: Arc<Mutex<Script>>,
    delay: Option<Duration>,
}

impl TestModelProvider {
    #[inline]
    pub fn add_assistant_response_step(&mut self, preset: PresetResponse) {
        self.script().responses.push_back(preset);
    }

    #[inline]
    pub fn set_delay(&mut self, duration: Duration) {
        self.delay = Some(duration);
    }

    /// Returns every request received so far, failed attempts included.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.script().requests.clone()
    }

    /// Returns the number of scripted responses not consumed yet.
    pub fn remaining_steps(&self) -> usize {
        self.script().responses.len()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn next_response(&self, req: &ModelRequest) -> Result<TestModelResponse, Error> {
        let mut script = self.script();
        script.requests.push(req.clone());

        let Some(preset) = script.responses.front() else {
            return Err(Error {
                message: "no enough steps",
                kind: ErrorKind::Other,
            });
        };

        let failure_kind =
            preset.failure_kind.unwrap_or(ErrorKind::RateLimitExceeded);
        match preset.failures {
            Some(0) => {
                return Err(Error {
                    message: "preset failure",
                    kind: failure_kind,
                });
            }
            Some(failures) if script.failed_attempts < failures => {
                script.failed_attempts += 1;
                return Err(Error {
                    message: "preset failure",
                    kind: failure_kind,
                });
            }
            _ => {}
        }

        let Some(preset) = script.responses.pop_front() else {
            unreachable!("front element was just checked");
        };
        script.failed_attempts = 0;
        script.served += 1;

        let has_tool_call = preset
            .events
            .iter()
            .any(|event| matches!(event, PresetEvent::ToolCall(_)));
        Ok(TestModelResponse {
            seq: script.served,
            events: preset.events.into(),
            has_tool_call,
            completed: false,
            delay: self.delay.unwrap_or(Duration::from_millis(1)),
            sleep: None,
        })
    }
}

impl ModelProvider for TestModelProvider {
    type Error = crate::Error;
    type Response = TestModelResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        ready(self.next_response(req))
    }
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;
    use std::pin::pin;

    use roundtable_model::{ModelMessage, ModelTool, ToolCallRequest};
    use serde_json::json;

    use super::*;

    async fn collect_response(
        resp: TestModelResponse,
    ) -> (String, Option<ToolCallRequest>, ModelFinishReason, OpaqueMessage)
    {
        let mut resp = pin!(resp);
        let mut msg = String::new();
        let mut tool_call = None;
        let reason = loop {
            let event = poll_fn(|cx| resp.as_mut().poll_next_event(cx))
                .await
                .unwrap()
                .unwrap();
            match event {
                ModelResponseEvent::Completed(reason) => break reason,
                ModelResponseEvent::MessageDelta(delta) => {
                    msg.push_str(&delta);
                }
                ModelResponseEvent::ToolCall(req) => tool_call = Some(req),
            }
        };
        (msg, tool_call, reason, resp.make_opaque_message().unwrap())
    }

    fn request() -> ModelRequest {
        ModelRequest {
            messages: vec![ModelMessage::User("Weather in Texas?".to_owned())],
            tools: vec![ModelTool {
                name: "get_weather".to_owned(),
                description: "Looks up the weather".to_owned(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "city": { "type": "string" }
                    }
                }),
            }],
        }
    }

    #[tokio::test]
    async fn test_send_request() {
        let mut provider = TestModelProvider::default();
        provider.add_assistant_response_step(PresetResponse::with_events([
            PresetEvent::MessageDelta("Let me ".to_owned()),
            PresetEvent::MessageDelta("check.".to_owned()),
            PresetEvent::ToolCall(ToolCallRequest {
                id: "call_1".to_owned(),
                name: "get_weather".to_owned(),
                arguments: json!({ "city": "Texas" }),
            }),
        ]));
        provider.add_assistant_response_step(PresetResponse::text("Sunny."));

        let resp = provider.send_request(&request()).await.unwrap();
        let (msg, tool_call, reason, opaque) = collect_response(resp).await;
        assert_eq!(msg, "Let me check.");
        assert_eq!(tool_call.unwrap().arguments, json!({ "city": "Texas" }));
        assert_eq!(reason, ModelFinishReason::ToolCalls);
        assert_eq!(opaque.id(), "msg:1");

        let resp = provider.send_request(&request()).await.unwrap();
        let (msg, tool_call, reason, _) = collect_response(resp).await;
        assert_eq!(msg, "Sunny.");
        assert!(tool_call.is_none());
        assert_eq!(reason, ModelFinishReason::Stop);

        assert_eq!(provider.requests().len(), 2);
        assert_eq!(provider.remaining_steps(), 0);
        assert!(provider.send_request(&request()).await.is_err());
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let mut provider = TestModelProvider::default();
        provider.add_assistant_response_step(
            PresetResponse::text("Finally.").with_failures(2),
        );

        for _ in 0..2 {
            let err = provider.send_request(&request()).await.err().unwrap();
            assert_eq!(err.kind(), ErrorKind::RateLimitExceeded);
        }
        assert!(provider.send_request(&request()).await.is_ok());
        assert_eq!(provider.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure() {
        let mut provider = TestModelProvider::default();
        provider.add_assistant_response_step(
            PresetResponse::text("Never.")
                .with_failures(0)
                .with_failure_kind(ErrorKind::Authentication),
        );

        for _ in 0..5 {
            let err = provider.send_request(&request()).await.err().unwrap();
            assert_eq!(err.kind(), ErrorKind::Authentication);
        }
        assert_eq!(provider.remaining_steps(), 1);
    }
}

use std::collections::VecDeque;
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::task::{self, Poll, ready};
use std::time::Duration;

use roundtable_model::{
    ErrorKind, ModelFinishReason, ModelMessage, ModelProvider,
    ModelProviderError, ModelRequest, ModelResponse, ModelResponseEvent,
    ModelTool, ToolCallRequest,
};
use serde_json::json;
use tokio::time::{Sleep, sleep};

#[derive(Debug)]
struct FakeModelProviderError(ErrorKind);

impl Display for FakeModelProviderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Error for FakeModelProviderError {}

impl ModelProviderError for FakeModelProviderError {
    fn kind(&self) -> ErrorKind {
        self.0
    }
}

/// Calls the first tool it is offered, or answers in text if there is none.
#[derive(Debug)]
struct FakeModelResponse {
    events: VecDeque<ModelResponseEvent>,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl FakeModelResponse {
    fn new(req: &ModelRequest) -> Self {
        let mut events = VecDeque::new();
        match req.tools.first() {
            Some(tool) => {
                events.push_back(ModelResponseEvent::ToolCall(
                    ToolCallRequest {
                        id: "call_0".to_owned(),
                        name: tool.name.clone(),
                        arguments: json!({ "city": "Texas" }),
                    },
                ));
                events.push_back(ModelResponseEvent::Completed(
                    ModelFinishReason::ToolCalls,
                ));
            }
            None => {
                for word in ["It is ", "sunny. ", "TERMINATE"] {
                    events.push_back(ModelResponseEvent::MessageDelta(
                        word.to_owned(),
                    ));
                }
                events.push_back(ModelResponseEvent::Completed(
                    ModelFinishReason::Stop,
                ));
            }
        }
        Self {
            events,
            sleep: None,
        }
    }
}

impl ModelResponse for FakeModelResponse {
    type Error = FakeModelProviderError;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.get_mut();
        let sleep = this
            .sleep
            .get_or_insert_with(|| Box::pin(sleep(Duration::from_millis(1))));
        ready!(sleep.as_mut().poll(cx));
        this.sleep = None;
        Poll::Ready(Ok(this.events.pop_front()))
    }
}

struct FakeModelProvider;

impl ModelProvider for FakeModelProvider {
    type Error = FakeModelProviderError;
    type Response = FakeModelResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        let result = match req.messages.last() {
            Some(ModelMessage::User(_)) => Ok(FakeModelResponse::new(req)),
            _ => Err(FakeModelProviderError(ErrorKind::RateLimitExceeded)),
        };
        ready(result)
    }
}

mod tests {
    use std::future::poll_fn;

    use super::*;

    async fn collect(mut resp: FakeModelResponse) -> Vec<ModelResponseEvent> {
        let mut events = vec![];
        while let Some(event) =
            poll_fn(|cx| Pin::new(&mut resp).poll_next_event(cx))
                .await
                .unwrap()
        {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_text_completion() {
        let req = ModelRequest {
            messages: vec![ModelMessage::User("Weather?".to_owned())],
            tools: vec![],
        };
        let resp = FakeModelProvider.send_request(&req).await.unwrap();

        let mut text = String::new();
        let mut finish = None;
        for event in collect(resp).await {
            match event {
                ModelResponseEvent::MessageDelta(delta) => {
                    text.push_str(&delta)
                }
                ModelResponseEvent::Completed(reason) => finish = Some(reason),
                ModelResponseEvent::ToolCall(_) => {
                    unreachable!("no tools were offered")
                }
            }
        }
        assert_eq!(text, "It is sunny. TERMINATE");
        assert_eq!(finish, Some(ModelFinishReason::Stop));
    }

    #[tokio::test]
    async fn test_tool_call_completion() {
        let req = ModelRequest {
            messages: vec![ModelMessage::User("Weather?".to_owned())],
            tools: vec![ModelTool {
                name: "get_weather".to_owned(),
                description: "Looks up the weather".to_owned(),
                parameters: json!({ "type": "object" }),
            }],
        };
        let resp = FakeModelProvider.send_request(&req).await.unwrap();
        let events = collect(resp).await;
        assert_eq!(events.len(), 2);
        let ModelResponseEvent::ToolCall(call) = &events[0] else {
            panic!("expected a tool call, got {:?}", events[0]);
        };
        assert_eq!(call.name, "get_weather");
        assert_eq!(
            events[1],
            ModelResponseEvent::Completed(ModelFinishReason::ToolCalls)
        );
    }

    #[tokio::test]
    async fn test_error_kind() {
        let req = ModelRequest {
            messages: vec![],
            tools: vec![],
        };
        let err = FakeModelProvider.send_request(&req).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimitExceeded);
        assert!(err.kind().is_retryable());
    }
}

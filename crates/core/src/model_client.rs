use std::fmt::{self, Debug};
use std::future::poll_fn;
use std::pin::{Pin, pin};
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use roundtable_model::{
    ErrorKind, ModelFinishReason, ModelProvider, ModelProviderError,
    ModelRequest, ModelResponse, ModelResponseEvent, OpaqueMessage,
    ToolCallRequest,
};
use tracing::Instrument;

use crate::agent::Handoff;
use crate::transcript::HandoffRequest;

/// The timeout applied to each model request unless configured otherwise.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

type SendRequestResult = Result<ModelClientResponse, ModelClientError>;
type BoxedSendRequestFuture =
    Pin<Box<dyn Future<Output = SendRequestResult> + Send>>;
type HandlerFn = Arc<dyn Fn(ModelRequest) -> BoxedSendRequestFuture + Send + Sync>;

/// How rate-limited model requests are retried.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_interval: Duration,
    multiplier: f64,
    max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_secs(1),
            multiplier: 2.0,
            max_interval: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    #[inline]
    pub fn never() -> Self {
        Self::default().with_max_attempts(1)
    }

    /// Sets the total number of attempts, the first one included.
    #[inline]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Sets the delay before the first retry.
    #[inline]
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    /// Sets the upper bound of a single delay.
    #[inline]
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Returns the total number of attempts.
    #[inline]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_multiplier(self.multiplier)
            .with_max_interval(self.max_interval)
            .with_max_elapsed_time(None)
            .build()
    }
}

/// A model request that failed for good.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ModelClientError {
    /// The kind reported by the provider.
    pub kind: ErrorKind,
    /// A human-readable description.
    pub message: String,
    /// The number of attempts made.
    pub attempts: u32,
}

impl ModelClientError {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            attempts: 1,
        }
    }

    fn from_provider<E: ModelProviderError>(err: E) -> Self {
        Self::new(err.kind(), format!("{err}"))
    }
}

/// A model reply, classified.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelReply {
    /// A final text reply.
    Text {
        /// The reply text.
        text: String,
        /// The provider's raw message.
        opaque: Option<OpaqueMessage>,
    },
    /// The model wants tools to run before it continues.
    ToolCalls {
        /// Text produced alongside the calls, if any.
        thought: Option<String>,
        /// The requested calls.
        calls: Vec<ToolCallRequest>,
        /// The provider's raw message.
        opaque: Option<OpaqueMessage>,
    },
    /// The model hands the conversation to another participant.
    Handoff(HandoffRequest),
}

/// A wrapper around a model provider that retries, times out and classifies
/// requests, and provides a type-erased interface for the other modules.
#[derive(Clone)]
pub struct ModelClient {
    handler_fn: HandlerFn,
    retry_policy: RetryPolicy,
    timeout: Option<Duration>,
}

impl Debug for ModelClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelClient")
            .field("retry_policy", &self.retry_policy)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ModelClient {
    #[inline]
    pub fn new<P: ModelProvider + 'static>(provider: P) -> Self {
        // We have to erase the type `P`, since `ModelClient` doesn't have a
        // generic parameter and we don't want it either.
        let handler_fn: HandlerFn = Arc::new(move |req| {
            let fut = provider.send_request(&req);
            Box::pin(
                async move {
                    trace!("got a request: {:?}", req);
                    let resp_or_err = fut.await;
                    handle_response::<P>(resp_or_err).await
                }
                .instrument(trace_span!("model client req")),
            )
        });
        Self {
            handler_fn,
            retry_policy: RetryPolicy::default(),
            timeout: Some(DEFAULT_REQUEST_TIMEOUT),
        }
    }

    #[inline]
    pub fn set_retry_policy(&mut self, retry_policy: RetryPolicy) {
        self.retry_policy = retry_policy;
    }

    #[inline]
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Sends a request and classifies the reply.
    ///
    /// Rate-limited attempts are retried with exponential backoff until the
    /// policy runs out of attempts. Each attempt has its own timeout.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. The response stops streaming further
    /// events when this operation is cancelled.
    pub async fn complete(
        &self,
        req: ModelRequest,
        handoffs: &[Handoff],
    ) -> Result<ModelReply, ModelClientError> {
        let mut backoff = self.retry_policy.backoff();
        let mut attempts = 0;
        loop {
            attempts += 1;
            let result = self.send_once(req.clone()).await;
            let err = match result {
                Ok(resp) => {
                    return classify(resp, handoffs).map_err(|mut err| {
                        err.attempts = attempts;
                        err
                    });
                }
                Err(err) => ModelClientError { attempts, ..err },
            };

            if !err.kind.is_retryable()
                || attempts >= self.retry_policy.max_attempts
            {
                error!("model request failed after {attempts} attempt(s): {err}");
                return Err(err);
            }
            let Some(delay) = backoff.next_backoff() else {
                return Err(err);
            };
            warn!("{err}, retrying in {delay:?} (attempt {attempts})");
            tokio::time::sleep(delay).await;
        }
    }

    async fn send_once(&self, req: ModelRequest) -> SendRequestResult {
        let fut = (self.handler_fn)(req);
        let Some(timeout) = self.timeout else {
            return fut.await;
        };
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ModelClientError::new(
                ErrorKind::Timeout,
                format!("no complete response after {timeout:?}"),
            )),
        }
    }
}

/// A completely received response from the provider.
#[derive(Clone, Debug)]
struct ModelClientResponse {
    transcript: String,
    opaque_msg: Option<OpaqueMessage>,
    tool_calls: Vec<ToolCallRequest>,
    finish_reason: Option<ModelFinishReason>,
}

async fn handle_response<P: ModelProvider + 'static>(
    resp_or_err: Result<P::Response, P::Error>,
) -> SendRequestResult {
    let resp = match resp_or_err {
        Ok(resp) => resp,
        Err(err) => {
            debug!("got an error: {err:?}");
            return Err(ModelClientError::from_provider(err));
        }
    };

    let mut transcript = String::new();
    let opaque_msg;
    let mut tool_calls = Vec::new();
    let mut finish_reason = None;

    trace!("start receiving events");

    let mut pinned_resp = pin!(resp);
    loop {
        let event_or_err =
            poll_fn(|cx| pinned_resp.as_mut().poll_next_event(cx)).await;
        let event = match event_or_err {
            Ok(event) => event,
            Err(err) => {
                debug!("got an error: {err:?}");
                return Err(ModelClientError::from_provider(err));
            }
        };

        let Some(event) = event else {
            // The request has been handled gracefully without errors,
            // now try getting the opaque message for this response.
            opaque_msg = pinned_resp.make_opaque_message();
            break;
        };
        trace!("got an event: {event:?}");

        match event {
            ModelResponseEvent::MessageDelta(msg) => transcript.push_str(&msg),
            ModelResponseEvent::ToolCall(req) => tool_calls.push(req),
            ModelResponseEvent::Completed(reason) => {
                finish_reason = Some(reason);
            }
        }
    }

    trace!("finished a request");

    Ok(ModelClientResponse {
        transcript,
        opaque_msg,
        tool_calls,
        finish_reason,
    })
}

fn classify(
    resp: ModelClientResponse,
    handoffs: &[Handoff],
) -> Result<ModelReply, ModelClientError> {
    if resp.finish_reason == Some(ModelFinishReason::ContentFilter) {
        return Err(ModelClientError::new(
            ErrorKind::Moderated,
            "the response was blocked by the content filter",
        ));
    }

    if resp.tool_calls.is_empty() {
        return Ok(ModelReply::Text {
            text: resp.transcript,
            opaque: resp.opaque_msg,
        });
    }

    let handoff = resp.tool_calls.iter().enumerate().find_map(|(idx, call)| {
        handoffs.iter().find(|h| h.name == call.name).map(|h| (idx, h))
    });
    if let Some((idx, handoff)) = handoff {
        if resp.tool_calls.len() > 1 {
            warn!(
                "dropping {} tool call(s) issued together with `{}`",
                resp.tool_calls.len() - 1,
                handoff.name
            );
        }
        let mut tool_calls = resp.tool_calls;
        return Ok(ModelReply::Handoff(HandoffRequest {
            target: handoff.target.clone(),
            message: handoff.message.clone(),
            call: tool_calls.swap_remove(idx),
        }));
    }

    Ok(ModelReply::ToolCalls {
        thought: Some(resp.transcript).filter(|t| !t.is_empty()),
        calls: resp.tool_calls,
        opaque: resp.opaque_msg,
    })
}

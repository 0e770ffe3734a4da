use reqwest::header::{self, HeaderMap};
use reqwest::{Client, Url};
use roundtable_sse::{Chunks, Sse};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::Error;
use crate::proto::{
    InitializeParams, InitializeResult, JsonRpcMessage, JsonRpcRequest,
    ListToolsResult, ToolDefinition,
};

struct Channel {
    sse: Sse,
    next_id: u64,
}

/// One event stream plus the endpoint its requests are posted to.
///
/// The channel lock is held from the POST until the matching response has
/// been read, so there is at most one request in flight per connection.
pub(crate) struct Connection {
    client: Client,
    post_url: Url,
    headers: HeaderMap,
    channel: Mutex<Channel>,
}

impl Connection {
    /// Opens the event stream and waits for the `endpoint` event.
    pub async fn open(
        client: &Client,
        url: &Url,
        headers: &HeaderMap,
    ) -> Result<Self, Error> {
        debug!("opening event stream at {url}");
        let resp = client
            .get(url.clone())
            .headers(headers.clone())
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|err| {
                Error::Connection(format!("failed to reach {url}: {err}"))
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Connection(format!(
                "{url} answered with HTTP {status}"
            )));
        }

        let mut sse = Sse::new(Chunks::from_response(resp));
        let endpoint = loop {
            let event = sse
                .next_event()
                .await
                .map_err(|err| Error::Connection(format!("{err}")))?
                .ok_or_else(|| {
                    Error::Connection(
                        "event stream closed before announcing an endpoint"
                            .to_owned(),
                    )
                })?;
            if event.kind() == "endpoint" {
                break event.data;
            }
            trace!("skipping event before endpoint: {event:?}");
        };

        let post_url = url.join(endpoint.trim()).map_err(|err| {
            Error::Protocol(format!("invalid endpoint `{endpoint}`: {err}"))
        })?;
        debug!("posting messages to {post_url}");

        Ok(Self {
            client: client.clone(),
            post_url,
            headers: headers.clone(),
            channel: Mutex::new(Channel { sse, next_id: 0 }),
        })
    }

    /// Performs the `initialize` handshake.
    pub async fn initialize(&self) -> Result<(), Error> {
        let params = serde_json::to_value(InitializeParams::new())
            .map_err(|err| Error::Protocol(format!("{err}")))?;
        let result = self
            .request("initialize", Some(params))
            .await?
            .into_result()
            .map_err(|err| {
                Error::Protocol(format!(
                    "initialize rejected ({}): {}",
                    err.code, err.message
                ))
            })?;
        let result: InitializeResult = parse(result)?;
        info!(
            "connected to {:?} (protocol {})",
            result.server_info,
            result.protocol_version.as_deref().unwrap_or("unknown")
        );
        self.notify("notifications/initialized").await
    }

    /// Lists every tool, following pagination.
    pub async fn list_tools(&self) -> Result<Vec<ToolDefinition>, Error> {
        let mut tools = vec![];
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor
                .take()
                .map(|cursor| serde_json::json!({ "cursor": cursor }));
            let result = self
                .request("tools/list", params)
                .await?
                .into_result()
                .map_err(|err| {
                    Error::Protocol(format!(
                        "tools/list rejected ({}): {}",
                        err.code, err.message
                    ))
                })?;
            let page: ListToolsResult = parse(result)?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(tools),
            }
        }
    }

    /// Sends a request and waits for its response.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. A response that arrives after the caller
    /// gave up is skipped by the next request.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcMessage, Error> {
        let mut channel = self.channel.lock().await;
        channel.next_id += 1;
        let id = channel.next_id;

        trace!("-> {method} ({id})");
        self.post(&JsonRpcRequest::new(id, method, params)).await?;

        loop {
            let event = channel
                .sse
                .next_event()
                .await
                .map_err(|err| Error::Connection(format!("{err}")))?
                .ok_or_else(|| {
                    Error::Connection("event stream closed".to_owned())
                })?;
            if event.kind() != "message" {
                trace!("skipping `{}` event", event.kind());
                continue;
            }
            let message: JsonRpcMessage = serde_json::from_str(&event.data)
                .map_err(|err| {
                    Error::Protocol(format!("malformed message: {err}"))
                })?;
            if message.answers(id) {
                trace!("<- {method} ({id})");
                return Ok(message);
            }
            trace!("skipping unrelated message: {}", event.data);
        }
    }

    async fn notify(&self, method: &str) -> Result<(), Error> {
        let _channel = self.channel.lock().await;
        self.post(&JsonRpcRequest::notification(method)).await
    }

    async fn post<T: Serialize>(&self, body: &T) -> Result<(), Error> {
        let resp = self
            .client
            .post(self.post_url.clone())
            .headers(self.headers.clone())
            .json(body)
            .send()
            .await
            .map_err(|err| {
                Error::Connection(format!("failed to post message: {err}"))
            })?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Connection(format!(
                "message rejected with HTTP {status}: {body}"
            )));
        }
        Ok(())
    }
}

fn parse<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, Error> {
    serde_json::from_value(value)
        .map_err(|err| Error::Protocol(format!("unexpected result: {err}")))
}

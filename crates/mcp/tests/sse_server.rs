use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use futures_util::Stream;
use roundtable_core::tool::Tool;
use roundtable_mcp::{Error, HeaderMap, HeaderValue, Registry, ServerConfig, Url};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, mpsc};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;

#[derive(Clone, Default)]
struct FakeServer {
    sessions: Arc<Mutex<Vec<mpsc::UnboundedSender<Event>>>>,
    tool_calls: Arc<AtomicUsize>,
    saw_header: Arc<AtomicUsize>,
    // Never announces the message endpoint.
    silent: bool,
    // Lists the same tool on both pages.
    duplicate_names: bool,
}

async fn sse_handler(
    State(server): State<FakeServer>,
    headers: axum::http::HeaderMap,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    if headers.get("x-api-token").is_some() {
        server.saw_header.fetch_add(1, Ordering::SeqCst);
    }

    let (tx, rx) = mpsc::unbounded_channel::<Event>();
    let mut sessions = server.sessions.lock().await;
    if !server.silent {
        tx.send(Event::default().comment("hello")).ok();
        tx.send(
            Event::default()
                .event("endpoint")
                .data(format!("/messages?session={}", sessions.len())),
        )
        .ok();
    }
    sessions.push(tx);

    Sse::new(UnboundedReceiverStream::new(rx).map(Ok))
}

fn tool(name: &str, description: &str) -> Value {
    json!({
        "name": name,
        "description": description,
        "inputSchema": {
            "type": "object",
            "properties": { "state": { "type": "string" } }
        }
    })
}

async fn message_handler(
    State(server): State<FakeServer>,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> StatusCode {
    let Some(id) = body.get("id").cloned() else {
        // Notifications need no answer.
        return StatusCode::ACCEPTED;
    };
    let method = body["method"].as_str().unwrap_or_default();
    let response = match method {
        "initialize" => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "protocolVersion": "2024-11-05",
                "capabilities": { "tools": {} },
                "serverInfo": { "name": "weather", "version": "1.0.0" }
            }
        }),
        "tools/list" => {
            let result = match body["params"]["cursor"].as_str() {
                None => json!({
                    "tools": [tool("get_forecast", "Forecast for a US state.")],
                    "nextCursor": "page-2"
                }),
                Some(_) if server.duplicate_names => json!({
                    "tools": [tool("get_forecast", "Same name again.")]
                }),
                Some(_) => json!({
                    "tools": [tool("get_alerts", "Weather alerts for a US state.")]
                }),
            };
            json!({ "jsonrpc": "2.0", "id": id, "result": result })
        }
        "tools/call" => {
            server.tool_calls.fetch_add(1, Ordering::SeqCst);
            let state = body["params"]["arguments"]["state"]
                .as_str()
                .unwrap_or_default();
            match body["params"]["name"].as_str() {
                Some("get_forecast") => json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {
                        "content": [
                            { "type": "text", "text": format!("Sunny in {state}, 31C") },
                            { "type": "text", "text": "Wind 5mph" }
                        ],
                        "isError": false
                    }
                }),
                Some("get_alerts") => json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {
                        "content": [{ "type": "text", "text": "alert feed offline" }],
                        "isError": true
                    }
                }),
                _ => json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": { "code": -32602, "message": "Unknown tool" }
                }),
            }
        }
        _ => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": -32601, "message": "Method not found" }
        }),
    };

    let session: usize = query
        .get("session")
        .and_then(|s| s.parse().ok())
        .unwrap_or_default();
    let sessions = server.sessions.lock().await;
    let Some(tx) = sessions.get(session) else {
        return StatusCode::NOT_FOUND;
    };
    // Traffic the client must skip before it sees its answer.
    let log = json!({
        "jsonrpc": "2.0",
        "method": "notifications/message",
        "params": { "level": "info", "data": "working" }
    });
    tx.send(Event::default().data(log.to_string())).ok();
    tx.send(Event::default().event("ping").data("{}")).ok();
    let stale = json!({ "jsonrpc": "2.0", "id": 9999, "result": {} });
    tx.send(Event::default().data(stale.to_string())).ok();
    tx.send(Event::default().data(response.to_string())).ok();
    StatusCode::ACCEPTED
}

async fn serve(server: FakeServer) -> SocketAddr {
    let app = Router::new()
        .route("/sse", get(sse_handler))
        .route("/messages", post(message_handler))
        .with_state(server);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn config(addr: SocketAddr) -> ServerConfig {
    let url = Url::parse(&format!("http://{addr}/sse")).unwrap();
    let mut headers = HeaderMap::new();
    headers.insert("content-type", HeaderValue::from_static("application/json"));
    headers.insert("x-api-token", HeaderValue::from_static("secret"));
    ServerConfig::new(url)
        .with_headers(headers)
        .with_timeout(Duration::from_secs(5))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn discovers_and_invokes_tools() {
    let server = FakeServer::default();
    let addr = serve(server.clone()).await;

    let registry = Registry::discover(&config(addr)).await.unwrap();
    let names: Vec<_> = registry.tools().iter().map(|t| t.name()).collect();
    assert_eq!(names, ["get_forecast", "get_alerts"]);
    assert_eq!(registry.tools()[0].description(), "Forecast for a US state.");
    assert_eq!(registry.tools()[0].parameter_schema()["type"], "object");
    assert_eq!(server.saw_header.load(Ordering::SeqCst), 1);

    let forecast = &registry.tools()[0];
    let text = forecast.invoke(json!({ "state": "Texas" })).await.unwrap();
    assert_eq!(text, "Sunny in Texas, 31C\nWind 5mph");

    let alerts = &registry.tools()[1];
    let err = alerts.invoke(json!({ "state": "Texas" })).await.unwrap_err();
    assert_eq!(err, Error::Invocation("alert feed offline".to_owned()));

    // Through the core tool interface the failure becomes a tool error.
    let err = alerts.execute(json!({})).await.unwrap_err();
    assert_eq!(err.reason(), "alert feed offline");

    assert_eq!(server.tool_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_calls_on_a_pool() {
    let server = FakeServer::default();
    let addr = serve(server.clone()).await;

    let registry = Registry::discover(&config(addr).with_connections(2))
        .await
        .unwrap();
    assert_eq!(registry.connection_count(), 2);
    assert_eq!(server.sessions.lock().await.len(), 2);

    let tools = registry.into_tools();
    let (a, b, c) = tokio::join!(
        tools[0].invoke(json!({ "state": "Texas" })),
        tools[0].invoke(json!({ "state": "Ohio" })),
        tools[1].invoke(json!({})),
    );
    assert_eq!(a.unwrap(), "Sunny in Texas, 31C\nWind 5mph");
    assert_eq!(b.unwrap(), "Sunny in Ohio, 31C\nWind 5mph");
    assert!(matches!(c, Err(Error::Invocation(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejects_duplicate_names() {
    let server = FakeServer {
        duplicate_names: true,
        ..Default::default()
    };
    let addr = serve(server).await;

    let err = Registry::discover(&config(addr)).await.err().unwrap();
    assert!(matches!(err, Error::Protocol(message) if message.contains("get_forecast")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn discovery_times_out() {
    let server = FakeServer {
        silent: true,
        ..Default::default()
    };
    let addr = serve(server).await;

    let config = config(addr).with_timeout(Duration::from_millis(200));
    let err = Registry::discover(&config).await.err().unwrap();
    assert!(matches!(err, Error::Connection(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreachable_server() {
    // Grab a free port and release it again.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = Registry::discover(&config(addr)).await.err().unwrap();
    assert!(matches!(err, Error::Connection(_)));
}

//! A client for tool servers speaking MCP over HTTP and server-sent events.
//!
//! The client opens the server's event stream, learns where to post
//! JSON-RPC messages from the `endpoint` event, performs the `initialize`
//! handshake and lists the available tools. Each discovered tool implements
//! [`roundtable_core::tool::Tool`], so it can be handed to an agent as is.

#[macro_use]
extern crate tracing;

mod config;
mod connection;
mod error;
mod proto;
mod registry;

pub use config::{DEFAULT_TIMEOUT, ServerConfig};
pub use error::Error;
pub use proto::PROTOCOL_VERSION;
pub use registry::{McpTool, Registry, discover};
pub use reqwest::Url;
pub use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

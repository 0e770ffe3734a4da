//! A tool-augmented conversation between a model-backed agent and a human.
//!
//! The crate wires the pieces together: it reads the configuration,
//! discovers the tools on an MCP server, and runs one conversation in the
//! terminal. The binary is a thin wrapper around [`run`].

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod app;
mod config;
#[cfg(feature = "cli")]
mod console;
mod input;
#[cfg(feature = "cli")]
mod logging;

pub use app::{
    AGENT_NAME, AppError, HANDOFF_MESSAGE, USER_NAME, build_team,
    model_provider, run,
};
pub use config::{Args, Config, ConfigError, DEFAULT_TASK};
#[cfg(feature = "cli")]
pub use console::ConsoleSink;
pub use input::StdinInput;
#[cfg(feature = "cli")]
pub use logging::Logging;

/// Re-exports of [`roundtable_core`] crate.
pub mod core {
    pub use roundtable_core::*;
}

/// Re-exports of [`roundtable_mcp`] crate.
pub mod mcp {
    pub use roundtable_mcp::*;
}

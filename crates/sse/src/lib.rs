//! A minimal server-sent events reader shared by the streaming clients.

#[macro_use]
extern crate tracing;

mod chunks;
mod sse;

pub use chunks::{Chunks, Error as ChunksError};
pub use sse::{Error, Event, Sse};

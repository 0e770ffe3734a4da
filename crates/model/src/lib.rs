//! An abstraction layer for chat-completion models.
//!
//! This crate establishes an unified protocol for the conversation core to
//! interact with remote completion endpoints, so that the core can switch
//! between providers without modifying its own code.
//!
//! Types in this crate don't define any behavior, instead they are the
//! constraints that the implementors should adhere to.

#![deny(missing_docs)]

mod error;
mod opaque;
mod provider;
mod request;
mod response;

pub use error::*;
pub use opaque::*;
pub use provider::*;
pub use request::*;
pub use response::*;

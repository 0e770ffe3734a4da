//! Seams between a running conversation and the outside world.

use std::collections::VecDeque;
use std::io;

use async_trait::async_trait;

use crate::transcript::Message;

/// Receives every message as it is appended to the transcript.
///
/// Errors are logged by the caller and never stop the conversation.
pub trait TranscriptSink: Send {
    /// Records one message.
    fn record(&mut self, message: &Message) -> io::Result<()>;

    /// Flushes buffered output. Called once when the run ends.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A sink that emits every message as a `tracing` event.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl TranscriptSink for TracingSink {
    fn record(&mut self, message: &Message) -> io::Result<()> {
        info!(
            sender = %message.sender(),
            role = ?message.role(),
            "{}",
            message.content()
        );
        Ok(())
    }
}

/// Collects clones of the appended messages.
impl TranscriptSink for Vec<Message> {
    #[inline]
    fn record(&mut self, message: &Message) -> io::Result<()> {
        self.push(message.clone());
        Ok(())
    }
}

/// The source of a human participant's turns.
#[async_trait]
pub trait HumanInput: Send {
    /// Shows `prompt` and waits for one response.
    ///
    /// Returns `None` once the input is exhausted.
    async fn read_input(&mut self, prompt: &str) -> io::Result<Option<String>>;
}

/// Replays canned responses in order.
#[async_trait]
impl HumanInput for VecDeque<String> {
    async fn read_input(&mut self, prompt: &str) -> io::Result<Option<String>> {
        trace!("scripted input for prompt {prompt:?}");
        Ok(self.pop_front())
    }
}

/// Error type for the tool registry client.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The server could not be reached, or went away.
    #[error("connection error: {0}")]
    Connection(String),
    /// The server sent something this client does not understand.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// A tool call failed. The message is meant for the model.
    #[error("invocation error: {0}")]
    Invocation(String),
}

impl Error {
    /// Returns the message without the kind prefix.
    #[inline]
    pub fn message(&self) -> &str {
        match self {
            Error::Connection(message)
            | Error::Protocol(message)
            | Error::Invocation(message) => message,
        }
    }
}

use std::collections::VecDeque;
use std::fmt::{self, Display};

use bytes::Bytes;
use reqwest::Response;

/// Failure while pulling bytes from the underlying body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Error {
    message: String,
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to read body chunk: {}", self.message)
    }
}

impl std::error::Error for Error {}

/// An adapter for streaming byte chunks.
#[derive(Debug)]
pub enum Chunks {
    /// Chunks of a live HTTP response body.
    Response(Response),
    /// Chunks held in memory, mostly useful for tests and fixtures.
    Memory(VecDeque<Bytes>),
}

impl Chunks {
    #[inline]
    pub fn from_response(response: Response) -> Self {
        Chunks::Response(response)
    }

    #[inline]
    pub fn from_vec_deque(vec: VecDeque<Bytes>) -> Self {
        Chunks::Memory(vec)
    }

    /// Returns the next chunk, or `None` once the body is exhausted.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe, a cancelled call loses no bytes.
    #[inline]
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, Error> {
        match self {
            Chunks::Response(response) => {
                response.chunk().await.map_err(|err| Error {
                    message: err.to_string(),
                })
            }
            Chunks::Memory(vec) => Ok(vec.pop_front()),
        }
    }
}

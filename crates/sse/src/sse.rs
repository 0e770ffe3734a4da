use std::fmt::{self, Display};

use super::{Chunks, ChunksError};

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    ChunksError(ChunksError),
    InvalidPayload,
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ChunksError(err) => err.fmt(f),
            Error::InvalidPayload => write!(f, "event stream is not valid UTF-8"),
        }
    }
}

impl std::error::Error for Error {}

/// A dispatched server-sent event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    /// The `event` field, `None` means the default `message` type.
    pub event: Option<String>,
    /// The `data` lines joined with `\n`.
    pub data: String,
}

impl Event {
    /// Returns the event type, defaulting to `message`.
    #[inline]
    pub fn kind(&self) -> &str {
        self.event.as_deref().unwrap_or("message")
    }
}

/// A type for reading server-sent events from a chunk stream.
pub struct Sse {
    buf: Vec<u8>,
    chunks: Chunks,
}

impl Sse {
    #[inline]
    pub fn new(chunks: Chunks) -> Self {
        Self {
            buf: Vec::new(),
            chunks,
        }
    }

    /// Returns the next event, or `None` once the stream has ended.
    ///
    /// Bytes after the last complete event are dropped at end of stream.
    pub async fn next_event(&mut self) -> Result<Option<Event>, Error> {
        loop {
            // Drain what is already buffered before touching the stream,
            // a long-lived stream may stay silent for a long time.
            if let Some(event) = self.try_parse_event()? {
                return Ok(Some(event));
            }

            let Some(bytes) =
                self.chunks.next_chunk().await.map_err(Error::ChunksError)?
            else {
                return Ok(None);
            };
            self.buf.extend_from_slice(&bytes);
        }
    }

    fn try_parse_event(&mut self) -> Result<Option<Event>, Error> {
        // For `end-of-line`, we handle line feed and carriage return + line
        // feed. A lone carriage return is not treated as a line break.
        //
        // event         = *( comment / field ) end-of-line
        // comment       = colon *any-char end-of-line
        // field         = 1*name-char [ colon [ space ] *any-char ] end-of-line
        while let Some((block_end, consumed)) = find_event_end(&self.buf) {
            // Consumed before decoding, so a bad block is skipped.
            let block: Vec<u8> =
                self.buf.drain(..consumed).take(block_end).collect();
            let block =
                str::from_utf8(&block).map_err(|_| Error::InvalidPayload)?;
            let event = parse_block(block);

            match event {
                Some(event) => return Ok(Some(event)),
                // Blocks without data are not dispatched.
                None => continue,
            }
        }
        Ok(None)
    }
}

/// Finds the blank line that terminates the first event in `buf`.
///
/// Returns the length of the event block and the number of bytes to consume.
fn find_event_end(buf: &[u8]) -> Option<(usize, usize)> {
    let mut line_start = 0;
    for (idx, byte) in buf.iter().enumerate() {
        if *byte != b'\n' {
            continue;
        }
        let line = &buf[line_start..idx];
        if line.is_empty() || line == b"\r" {
            return Some((line_start, idx + 1));
        }
        line_start = idx + 1;
    }
    None
}

fn parse_block(block: &str) -> Option<Event> {
    let mut event = None;
    let mut data: Option<String> = None;

    for line in block.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => {
                (field, value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line, ""),
        };
        match field {
            "event" => event = Some(value.to_owned()),
            "data" => match &mut data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => data = Some(value.to_owned()),
            },
            _ => trace!("ignoring sse field: {field}"),
        }
    }

    Some(Event { event, data: data? })
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn sse_from(chunks: &[&'static [u8]]) -> Sse {
        Sse::new(Chunks::from_vec_deque(
            chunks.iter().copied().map(Bytes::from_static).collect(),
        ))
    }

    #[tokio::test]
    async fn test_normal_events() {
        let mut sse = sse_from(&[b"data: hello\n\n", b"data: bye\n\n"]);
        assert_eq!(sse.next_event().await.unwrap().unwrap().data, "hello");
        assert_eq!(sse.next_event().await.unwrap().unwrap().data, "bye");
        assert_eq!(sse.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_quirk_streaming() {
        let mut sse = sse_from(&[b"data:", b" hello\n", b"\n"]);
        assert_eq!(sse.next_event().await.unwrap().unwrap().data, "hello");
        assert_eq!(sse.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_named_events_with_crlf() {
        let mut sse = sse_from(&[
            b": ping\r\n\r\n",
            b"event: endpoint\r\ndata: /messages/?session_id=abc\r",
            b"\n\r\nevent: message\r\nid: 7\r\ndata: {\"a\":\r\ndata: 1}\r\n\r\n",
        ]);

        let event = sse.next_event().await.unwrap().unwrap();
        assert_eq!(event.kind(), "endpoint");
        assert_eq!(event.data, "/messages/?session_id=abc");

        let event = sse.next_event().await.unwrap().unwrap();
        assert_eq!(event.kind(), "message");
        assert_eq!(event.data, "{\"a\":\n1}");

        assert_eq!(sse.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_buffered_events_do_not_wait_for_more_data() {
        // Both events arrive in one chunk; the second must be served from the
        // buffer even though the stream has nothing more.
        let mut sse = sse_from(&[b"data: 1\n\ndata: 2\n\n"]);
        assert_eq!(sse.next_event().await.unwrap().unwrap().data, "1");
        assert_eq!(sse.next_event().await.unwrap().unwrap().data, "2");
        assert_eq!(sse.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_incomplete_and_invalid_data() {
        let mut sse = sse_from(&[b"xxxxxx\n\n"]);
        assert_eq!(sse.next_event().await.unwrap(), None);

        let mut sse = sse_from(&[b"data: hello\n", b"data: bye\n"]);
        assert_eq!(sse.next_event().await.unwrap(), None);

        let mut sse = sse_from(&[b"data: \xff\xfe\n\n"]);
        assert_eq!(sse.next_event().await.unwrap_err(), Error::InvalidPayload);
    }

    #[tokio::test]
    async fn test_recovers_after_invalid_event() {
        let mut sse = sse_from(&[b"data: \xff\n\n", b"data: ok\n\n"]);
        assert_eq!(sse.next_event().await.unwrap_err(), Error::InvalidPayload);
        assert_eq!(sse.next_event().await.unwrap().unwrap().data, "ok");
        assert_eq!(sse.next_event().await.unwrap(), None);

        // Same when both blocks arrive in one chunk.
        let mut sse = sse_from(&[b"data: \xff\n\ndata: ok\n\n"]);
        assert_eq!(sse.next_event().await.unwrap_err(), Error::InvalidPayload);
        assert_eq!(sse.next_event().await.unwrap().unwrap().data, "ok");
    }
}

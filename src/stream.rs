//! Incremental decoding of `data: {json}` event streams.
//!
//! Chat-completion endpoints answer with a byte stream of records separated
//! by a blank line. Chunk boundaries fall anywhere: inside a multi-byte
//! character, inside the `data:` marker, or between the two newlines of the
//! separator. [`SseParser`] carries whatever is incomplete over to the next
//! chunk, and [`TokenStream`] drives it from any [`Read`].

use crate::RelayError;
use crate::parse::parse_lenient;
use std::collections::VecDeque;
use std::io::{ErrorKind, Read};

const RECORD_SEPARATOR: &str = "\n\n";
const DATA_MARKER: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";
const CONTENT_POINTER: &str = "/choices/0/delta/content";
const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Push-based parser turning raw chunks into content tokens.
///
/// ```
/// use agent_relay::SseParser;
///
/// let mut parser = SseParser::new();
/// assert!(parser.push(b"data: {\"choices\":[{\"delta\":{\"content\":\"he").is_empty());
/// assert_eq!(parser.push(b"llo\"}}]}\n\ndata: [DONE]\n\n"), vec!["hello"]);
/// ```
#[derive(Debug, Default)]
pub struct SseParser {
    /// Leading bytes of a character split by the last chunk boundary.
    partial_char: Vec<u8>,
    buffer: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return the tokens of every record it completed,
    /// in stream order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.decode(chunk);

        let mut tokens = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].find(RECORD_SEPARATOR) {
            let end = start + offset;
            if let Some(token) = record_token(&self.buffer[start..end]) {
                tokens.push(token);
            }
            start = end + RECORD_SEPARATOR.len();
        }
        self.buffer.replace_range(..start, "");
        tokens
    }

    /// End of input. An unterminated trailing record is dropped, never
    /// emitted.
    pub fn finish(&mut self) {
        if !self.buffer.trim().is_empty() || !self.partial_char.is_empty() {
            tracing::trace!(
                bytes = self.buffer.len() + self.partial_char.len(),
                "discarding unterminated stream tail"
            );
        }
        self.buffer.clear();
        self.partial_char.clear();
    }

    fn decode(&mut self, chunk: &[u8]) {
        let mut pending = std::mem::take(&mut self.partial_char);
        pending.extend_from_slice(chunk);

        let mut rest: &[u8] = &pending;
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    return;
                }
                Err(err) => {
                    let (valid, invalid) = rest.split_at(err.valid_up_to());
                    self.buffer.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(len) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            rest = &invalid[len..];
                        }
                        None => {
                            // Incomplete sequence at the end: wait for the next chunk.
                            self.partial_char = invalid.to_vec();
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Extract the content fragment of one complete record, if it has one.
fn record_token(record: &str) -> Option<String> {
    let payload = record.strip_prefix(DATA_MARKER)?.trim();
    if payload.is_empty() || payload == DONE_SENTINEL {
        return None;
    }
    let Some(value) = parse_lenient(payload) else {
        tracing::trace!(payload, "skipping malformed stream record");
        return None;
    };
    value
        .pointer(CONTENT_POINTER)
        .and_then(|content| content.as_str())
        .filter(|content| !content.is_empty())
        .map(str::to_owned)
}

/// Lazy iterator over the content tokens of a streamed response body.
///
/// Reads the underlying reader one chunk at a time, only when the tokens of
/// the previous chunk have been consumed. A read error is yielded once and
/// ends the iteration; tokens already yielded stay yielded.
pub struct TokenStream<R> {
    reader: R,
    parser: SseParser,
    ready: VecDeque<String>,
    chunk: Vec<u8>,
    finished: bool,
}

impl<R: Read> TokenStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            parser: SseParser::new(),
            ready: VecDeque::new(),
            chunk: vec![0; READ_CHUNK_BYTES],
            finished: false,
        }
    }
}

impl<R: Read> Iterator for TokenStream<R> {
    type Item = Result<String, RelayError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(token) = self.ready.pop_front() {
                return Some(Ok(token));
            }
            if self.finished {
                return None;
            }

            match self.reader.read(&mut self.chunk) {
                Ok(0) => {
                    self.finished = true;
                    self.parser.finish();
                }
                Ok(n) => self.ready.extend(self.parser.push(&self.chunk[..n])),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e.into()));
                }
            }
        }
    }
}

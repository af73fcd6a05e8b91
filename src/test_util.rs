//! Scripted stand-ins for the network, shared by the unit tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Read};

use serde_json::json;

use crate::client::ChatRequest;
use crate::error::RelayError;
use crate::transport::{HttpResponse, Transport};

pub(crate) fn sse_record(token: &str) -> String {
    let chunk = json!({ "choices": [{ "index": 0, "delta": { "content": token } }] });
    format!("data: {chunk}\n\n")
}

/// Encode `tokens` as a complete stream, sentinel included.
pub(crate) fn sse_body(tokens: &[&str]) -> Vec<u8> {
    let mut body: String = tokens.iter().map(|t| sse_record(t)).collect();
    body.push_str("data: [DONE]\n\n");
    body.into_bytes()
}

/// Serves `data` in fixed-size chunks, optionally failing once drained.
pub(crate) struct ChunkedReader {
    data: Vec<u8>,
    pos: usize,
    chunk: usize,
    failure: Option<String>,
}

impl ChunkedReader {
    pub(crate) fn new(data: Vec<u8>, chunk: usize) -> Self {
        Self {
            data,
            pos: 0,
            chunk: chunk.max(1),
            failure: None,
        }
    }

    pub(crate) fn fail_at_end(mut self, msg: impl Into<String>) -> Self {
        self.failure = Some(msg.into());
        self
    }
}

impl Read for ChunkedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.data.len() {
            if let Some(msg) = self.failure.take() {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, msg));
            }
            return Ok(0);
        }
        let n = self.chunk.min(buf.len()).min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

pub(crate) enum Reply {
    Stream {
        body: Vec<u8>,
        chunk: usize,
        failure: Option<String>,
    },
    Status {
        status: u16,
        status_text: String,
        body: String,
    },
    NoBody,
    Refused(String),
}

impl Reply {
    pub(crate) fn tokens(tokens: &[&str]) -> Self {
        Reply::Stream {
            body: sse_body(tokens),
            chunk: 5,
            failure: None,
        }
    }

    /// Streams `tokens`, then fails the read instead of ending cleanly.
    pub(crate) fn partial(tokens: &[&str], error: &str) -> Self {
        let body: String = tokens.iter().map(|t| sse_record(t)).collect();
        Reply::Stream {
            body: body.into_bytes(),
            chunk: 5,
            failure: Some(error.to_string()),
        }
    }

    pub(crate) fn status(status: u16, status_text: &str, body: &str) -> Self {
        Reply::Status {
            status,
            status_text: status_text.to_string(),
            body: body.to_string(),
        }
    }
}

pub(crate) struct SentRequest {
    pub(crate) url: String,
    pub(crate) api_key: String,
    pub(crate) request: ChatRequest,
}

/// Answers each request with the next scripted reply and records what was
/// sent.
pub(crate) struct ScriptedTransport {
    replies: RefCell<VecDeque<Reply>>,
    sent: RefCell<Vec<SentRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
            sent: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn sent(&self) -> std::cell::Ref<'_, Vec<SentRequest>> {
        self.sent.borrow()
    }
}

impl Transport for ScriptedTransport {
    fn post_json(
        &self,
        url: &str,
        api_key: &str,
        request: &ChatRequest,
    ) -> Result<HttpResponse, RelayError> {
        self.sent.borrow_mut().push(SentRequest {
            url: url.to_string(),
            api_key: api_key.to_string(),
            request: request.clone(),
        });

        let reply = self
            .replies
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| RelayError::network("no scripted reply left"))?;

        match reply {
            Reply::Stream {
                body,
                chunk,
                failure,
            } => {
                let mut reader = ChunkedReader::new(body, chunk);
                reader.failure = failure;
                Ok(HttpResponse {
                    status: 200,
                    status_text: "OK".into(),
                    body: Some(Box::new(reader)),
                })
            }
            Reply::Status {
                status,
                status_text,
                body,
            } => Ok(HttpResponse {
                status,
                status_text,
                body: Some(Box::new(io::Cursor::new(body.into_bytes()))),
            }),
            Reply::NoBody => Ok(HttpResponse {
                status: 200,
                status_text: "OK".into(),
                body: None,
            }),
            Reply::Refused(msg) => Err(RelayError::network(msg)),
        }
    }
}

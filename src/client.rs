use serde::{Deserialize, Serialize};
use std::io::Read;
use tracing::debug;

use crate::error::RelayError;
use crate::stream::TokenStream;
use crate::transport::Transport;

/// Where completions are requested, and with which key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Endpoint {
    pub base_url: String,
    pub api_key: String,
}

impl Endpoint {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Both the base URL and the key are present.
    pub fn is_complete(&self) -> bool {
        !self.base_url.trim().is_empty() && !self.api_key.trim().is_empty()
    }

    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim().trim_end_matches('/'))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Body of a chat-completion request. Always asks for a streamed answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    stream: bool,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            stream: true,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.stream
    }

    /// Content of the first message with the given role.
    pub fn content_of(&self, role: Role) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == role)
            .map(|m| m.content.as_str())
    }
}

/// Issues single streaming completion calls. No retries.
pub struct CompletionClient<T> {
    transport: T,
}

impl<T: Transport> CompletionClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send `request` and call `on_token` for every content token, in order,
    /// until the body is drained.
    ///
    /// A non-success status fails before any token is delivered. A failure
    /// mid-stream is returned as is; tokens already delivered are not
    /// retracted.
    pub fn stream(
        &self,
        endpoint: &Endpoint,
        request: &ChatRequest,
        mut on_token: impl FnMut(&str),
    ) -> Result<(), RelayError> {
        let url = endpoint.completions_url();
        debug!(
            %url,
            model = %request.model,
            messages = request.messages.len(),
            "sending streaming completion request"
        );

        let mut response = self.transport.post_json(&url, &endpoint.api_key, request)?;

        if !response.is_success() {
            let body = response.body.take().map(read_lossy).unwrap_or_default();
            debug!(status = response.status, "completion request rejected");
            return Err(RelayError::Transport {
                status: response.status,
                status_text: response.status_text,
                body,
            });
        }

        let reader = response.body.ok_or(RelayError::StreamUnsupported)?;

        let mut tokens = 0usize;
        for token in TokenStream::new(reader) {
            on_token(&token?);
            tokens += 1;
        }

        debug!(tokens, "completion stream drained");
        Ok(())
    }
}

/// Best-effort read of an error body. Whatever arrived before a read
/// failure is kept.
fn read_lossy(mut reader: Box<dyn Read>) -> String {
    let mut bytes = Vec::new();
    if let Err(e) = reader.read_to_end(&mut bytes) {
        debug!(error = %e, "error body truncated");
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{Reply, ScriptedTransport};

    fn endpoint() -> Endpoint {
        Endpoint::new("https://llm.example/v1/", "sk-test")
    }

    fn request() -> ChatRequest {
        ChatRequest::new(
            "gpt-test",
            vec![ChatMessage::system("be brief"), ChatMessage::user("hello")],
        )
    }

    #[test]
    fn completions_url_joins_base() {
        assert_eq!(
            endpoint().completions_url(),
            "https://llm.example/v1/chat/completions"
        );
        assert_eq!(
            Endpoint::new("http://localhost:8080", "k").completions_url(),
            "http://localhost:8080/chat/completions"
        );
    }

    #[test]
    fn incomplete_endpoints() {
        assert!(endpoint().is_complete());
        assert!(!Endpoint::new("", "k").is_complete());
        assert!(!Endpoint::new("http://x", "  ").is_complete());
        assert!(!Endpoint::default().is_complete());
    }

    #[test]
    fn request_serializes_with_stream_flag() {
        let value = serde_json::to_value(request()).unwrap();
        assert_eq!(value["stream"], true);
        assert_eq!(value["model"], "gpt-test");
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "hello");
    }

    #[test]
    fn streams_tokens_in_order() {
        let transport = ScriptedTransport::new(vec![Reply::tokens(&["a", "b", "c"])]);
        let client = CompletionClient::new(&transport);

        let mut seen = Vec::new();
        client
            .stream(&endpoint(), &request(), |t| seen.push(t.to_string()))
            .unwrap();

        assert_eq!(seen, ["a", "b", "c"]);
        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].url, "https://llm.example/v1/chat/completions");
        assert_eq!(sent[0].api_key, "sk-test");
        assert!(sent[0].request.is_streaming());
    }

    #[test]
    fn empty_stream_still_succeeds() {
        let transport = ScriptedTransport::new(vec![Reply::tokens(&[])]);
        let client = CompletionClient::new(&transport);
        let mut count = 0;
        client.stream(&endpoint(), &request(), |_| count += 1).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn non_success_status_fails_before_streaming() {
        let transport = ScriptedTransport::new(vec![Reply::status(
            429,
            "Too Many Requests",
            "{\"error\":\"slow down\"}",
        )]);
        let client = CompletionClient::new(&transport);

        let mut called = false;
        let err = client
            .stream(&endpoint(), &request(), |_| called = true)
            .unwrap_err();

        assert!(!called);
        assert_eq!(
            err.to_string(),
            "HTTP 429 Too Many Requests - {\"error\":\"slow down\"}"
        );
        assert!(matches!(err, RelayError::Transport { status: 429, .. }));
    }

    #[test]
    fn missing_body_is_a_capability_error() {
        let transport = ScriptedTransport::new(vec![Reply::NoBody]);
        let client = CompletionClient::new(&transport);
        let err = client.stream(&endpoint(), &request(), |_| {}).unwrap_err();
        assert!(matches!(err, RelayError::StreamUnsupported));
    }

    #[test]
    fn mid_stream_failure_keeps_delivered_tokens() {
        let transport =
            ScriptedTransport::new(vec![Reply::partial(&["kept", " too"], "connection reset")]);
        let client = CompletionClient::new(&transport);

        let mut seen = String::new();
        let err = client
            .stream(&endpoint(), &request(), |t| seen.push_str(t))
            .unwrap_err();

        assert_eq!(seen, "kept too");
        assert_eq!(err.to_string(), "connection reset");
    }

    #[test]
    fn send_failure_propagates_verbatim() {
        let transport = ScriptedTransport::new(vec![Reply::Refused("dns failure".into())]);
        let client = CompletionClient::new(&transport);
        let err = client.stream(&endpoint(), &request(), |_| {}).unwrap_err();
        assert_eq!(err.to_string(), "dns failure");
    }
}

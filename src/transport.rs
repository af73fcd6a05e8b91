use std::io::Read;
use std::time::Duration;

use crate::client::ChatRequest;
use crate::error::RelayError;
use ureq::Agent;

/// Status line and body of an HTTP response, before anything is read.
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    /// `None` when the transport cannot hand out the body incrementally.
    pub body: Option<Box<dyn Read>>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends one chat-completion request and returns the response unread.
///
/// Implementations must not turn non-success statuses into errors; the
/// [`crate::CompletionClient`] reads the body of a failed response itself.
pub trait Transport {
    fn post_json(
        &self,
        url: &str,
        api_key: &str,
        request: &ChatRequest,
    ) -> Result<HttpResponse, RelayError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn post_json(
        &self,
        url: &str,
        api_key: &str,
        request: &ChatRequest,
    ) -> Result<HttpResponse, RelayError> {
        (**self).post_json(url, api_key, request)
    }
}

/// Blocking HTTP transport on a shared `ureq` agent.
///
/// Only the connect phase has a timeout. Once a stream starts it runs to
/// completion or failure.
pub struct UreqTransport {
    agent: Agent,
}

impl UreqTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        let config = Agent::config_builder()
            .timeout_connect(Some(connect_timeout))
            .http_status_as_error(false)
            .build();

        Self {
            agent: config.into(),
        }
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl Transport for UreqTransport {
    fn post_json(
        &self,
        url: &str,
        api_key: &str,
        request: &ChatRequest,
    ) -> Result<HttpResponse, RelayError> {
        let response = self
            .agent
            .post(url)
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Accept", "text/event-stream")
            .send_json(request)?;

        let status = response.status();
        Ok(HttpResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            body: Some(Box::new(response.into_body().into_reader())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ChatMessage;

    fn request() -> ChatRequest {
        ChatRequest::new("test-model", vec![ChatMessage::user("hi")])
    }

    #[test]
    fn unreachable_host_is_a_network_error() {
        let result =
            UreqTransport::default().post_json("http://localhost:1/nope", "key", &request());
        assert!(matches!(result, Err(RelayError::Network(_))));
    }

    #[test]
    fn success_range() {
        let response = |status| HttpResponse {
            status,
            status_text: String::new(),
            body: None,
        };
        assert!(response(200).is_success());
        assert!(response(204).is_success());
        assert!(!response(199).is_success());
        assert!(!response(301).is_success());
        assert!(!response(500).is_success());
    }
}

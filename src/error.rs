use crate::pipeline::Stage;
use thiserror::Error;

/// Error type for the relay, with variants designed around where the
/// failure came from and whether anything can be done about it.
///
/// Nothing in the crate retries automatically. The [`crate::Runner`] is the
/// only place that turns one of these into pipeline state.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Credentials are missing or the config file cannot be used. Raised
    /// before any network call.
    #[error("{0}")]
    Config(String),

    /// The endpoint answered with a non-success status. Carries the body
    /// verbatim.
    #[error("HTTP {status} {status_text} - {body}")]
    Transport {
        status: u16,
        status_text: String,
        body: String,
    },

    /// The transport handed back a response without a readable body.
    #[error("Streaming not supported by this transport.")]
    StreamUnsupported,

    /// The request could not be sent, or reading the body failed mid-stream.
    #[error("{0}")]
    Network(String),

    /// A user-facing guard failed. The pipeline does not move.
    #[error("{0}")]
    Validation(String),

    /// The requested operation is not allowed from the current stage.
    #[error("cannot {action} while the pipeline is in the {actual} stage")]
    InvalidStage { action: &'static str, actual: Stage },
}

impl From<ureq::Error> for RelayError {
    fn from(e: ureq::Error) -> Self {
        RelayError::Network(e.to_string())
    }
}

impl From<std::io::Error> for RelayError {
    fn from(e: std::io::Error) -> Self {
        RelayError::Network(e.to_string())
    }
}

impl RelayError {
    /// Create a [`Config`](RelayError::Config) error.
    pub fn config(msg: impl Into<String>) -> Self {
        RelayError::Config(msg.into())
    }

    /// Create a [`Validation`](RelayError::Validation) error.
    pub fn validation(msg: impl Into<String>) -> Self {
        RelayError::Validation(msg.into())
    }

    /// Create a [`Network`](RelayError::Network) error.
    pub fn network(msg: impl Into<String>) -> Self {
        RelayError::Network(msg.into())
    }

    /// The error raised when base URL or API key are absent.
    pub fn missing_credentials() -> Self {
        RelayError::config("Configure the LLM base URL and API key first.")
    }

    /// True for the guard failures that leave the pipeline where it was.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            RelayError::Validation(_) | RelayError::InvalidStage { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- constructors ---

    #[test]
    fn config_constructor() {
        let err = RelayError::config("no key");
        assert!(matches!(err, RelayError::Config(msg) if msg == "no key"));
    }

    #[test]
    fn validation_constructor() {
        let err = RelayError::validation("pick something");
        assert!(matches!(err, RelayError::Validation(msg) if msg == "pick something"));
    }

    #[test]
    fn network_constructor() {
        let err = RelayError::network("reset by peer");
        assert!(matches!(err, RelayError::Network(msg) if msg == "reset by peer"));
    }

    // --- Display ---

    #[test]
    fn display_transport_keeps_body_verbatim() {
        let err = RelayError::Transport {
            status: 401,
            status_text: "Unauthorized".into(),
            body: "{\"error\":\"bad key\"}".into(),
        };
        assert_eq!(
            err.to_string(),
            "HTTP 401 Unauthorized - {\"error\":\"bad key\"}"
        );
    }

    #[test]
    fn display_missing_credentials() {
        assert_eq!(
            RelayError::missing_credentials().to_string(),
            "Configure the LLM base URL and API key first."
        );
    }

    #[test]
    fn display_stream_unsupported() {
        assert_eq!(
            RelayError::StreamUnsupported.to_string(),
            "Streaming not supported by this transport."
        );
    }

    #[test]
    fn display_invalid_stage() {
        let err = RelayError::InvalidStage {
            action: "execute agents",
            actual: Stage::Idle,
        };
        assert_eq!(
            err.to_string(),
            "cannot execute agents while the pipeline is in the idle stage"
        );
    }

    // --- From conversions ---

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset");
        let err: RelayError = io_err.into();
        assert!(matches!(err, RelayError::Network(msg) if msg.contains("connection reset")));
    }

    #[test]
    fn validation_classification() {
        assert!(RelayError::validation("x").is_validation());
        assert!(!RelayError::network("x").is_validation());
        assert!(!RelayError::missing_credentials().is_validation());
    }
}

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MonitorError>;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("classifier error: {0}")]
    Classifier(String),
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid URL `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("all {endpoints} endpoint(s) exhausted for {context}: {last_error}")]
    EndpointsExhausted {
        context: String,
        endpoints: usize,
        last_error: String,
    },
    #[error("{context} timed out after {timeout_ms}ms")]
    Timeout { context: String, timeout_ms: u64 },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    Missing(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("no usable chains selected")]
    NoUsableChains,
}

impl MonitorError {
    /// Transport faults escalate to Backoff/Reinit in the worker loop;
    /// everything else is handled item-locally or surfaced as fatal.
    pub fn is_transport(&self) -> bool {
        matches!(self, MonitorError::Transport(_))
    }
}

use naive_padding::PaddingError;
use naive_upstream::UpstreamError;
use thiserror::Error;

/// Configuration errors, surfaced at startup only (spec.md §7).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("config must declare at least one `listen` entry")]
    NoListeners,

    #[error("concurrency must be at least 1")]
    InvalidConcurrency,

    #[error("unknown protocol in listen entry: {0}")]
    UnknownProtocol(String),

    #[error("redir mode is only supported on linux")]
    UnsupportedPlatform,
}

/// The orchestrator's (component G) unified error type. Every closed
/// connection is logged with one of these as its "close reason"
/// (spec.md §7).
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("protocol framing error: {0}")]
    Framing(String),

    #[error("authentication failed")]
    Authentication,

    #[error("unsupported feature requested: {0}")]
    UnsupportedFeature(String),

    #[error("upstream tunnel open failed: {0}")]
    UpstreamOpen(#[from] UpstreamError),

    #[error("padding codec error: {0}")]
    Padding(#[from] PaddingError),

    #[error("transport i/o error: {0}")]
    Io(#[from] std::io::Error),
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("invalid upstream proxy url: {0}")]
    InvalidUrl(String),

    #[error("tcp connect to upstream failed: {0}")]
    Connect(#[source] std::io::Error),

    #[error("tls handshake with upstream failed: {0}")]
    TlsHandshake(#[source] std::io::Error),

    #[error("http handshake with upstream failed: {0}")]
    HttpHandshake(#[source] hyper::Error),

    #[error("CONNECT request failed: {0}")]
    Request(#[source] hyper::Error),

    #[error("upstream rejected CONNECT with status {0}")]
    NonSuccessStatus(hyper::StatusCode),

    #[error("upstream did not offer a tunnel body to upgrade")]
    NoUpgrade(#[source] hyper::Error),

    #[error("extra-headers block contains an invalid header line: {0}")]
    InvalidExtraHeader(String),
}

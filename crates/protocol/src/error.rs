use thiserror::Error;

/// Errors shared by anything that parses the data model's string forms
/// (protocol names, padding-type tokens, endpoint strings).
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown client protocol: {0}")]
    UnknownProtocol(String),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

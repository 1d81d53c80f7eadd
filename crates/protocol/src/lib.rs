//! Shared data model for the naive forward proxy.
//!
//! Every other crate in the workspace depends on this one for the handful of
//! types that cross component boundaries: the client-facing protocol tag,
//! the two tunnel endpoints, and the padding vocabulary negotiated with the
//! upstream proxy.

mod endpoint;
mod error;

pub use endpoint::{TargetEndpoint, UpstreamEndpoint};
pub use error::ProtocolError;

/// Which client-facing protocol accepted a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientProtocol {
    Socks5,
    Http,
    Redir,
}

impl ClientProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientProtocol::Socks5 => "socks5",
            ClientProtocol::Http => "http",
            ClientProtocol::Redir => "redir",
        }
    }
}

impl std::str::FromStr for ClientProtocol {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "socks5" => Ok(ClientProtocol::Socks5),
            "http" => Ok(ClientProtocol::Http),
            "redir" => Ok(ClientProtocol::Redir),
            other => Err(ProtocolError::UnknownProtocol(other.to_string())),
        }
    }
}

/// Which leg of a connection a padding codec is installed on.
///
/// `Client` is the socket accepted from the SOCKS5/HTTP/redir client;
/// `Server` is the socket opened to the upstream proxy. Exactly one of the
/// two, or neither, carries the padding codec for a given connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Client,
    Server,
}

/// The padding scheme negotiated with an upstream proxy (or a padding-aware
/// client in HTTP mode). `Variant1` is the only padded scheme this
/// implementation speaks; it is the value sent and expected in the
/// `Padding-Type-Request` / `Padding-Type-Reply` headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaddingType {
    None,
    Variant1,
}

impl PaddingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaddingType::None => "none",
            PaddingType::Variant1 => "naive-padding-v1",
        }
    }

    /// The padding types this implementation is willing to advertise, in
    /// preference order, for a `Padding-Type-Request` header.
    pub fn supported() -> &'static [PaddingType] {
        &[PaddingType::Variant1]
    }

    pub fn parse(s: &str) -> Option<PaddingType> {
        match s.trim() {
            "naive-padding-v1" => Some(PaddingType::Variant1),
            "none" => Some(PaddingType::None),
            _ => None,
        }
    }
}

/// Process-wide, per-upstream knowledge of whether an upstream has ever been
/// observed to support padding. Transitions are monotonic: once a value
/// leaves `Unknown` it never changes again for that upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaddingSupport {
    Unknown,
    Capable,
    Incapable,
}

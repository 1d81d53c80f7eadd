use std::pin::Pin;

use naive_protocol::TargetEndpoint;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::UpstreamError;

/// A connected, bidirectional byte stream to a target, obtained by CONNECTing
/// through the configured upstream proxy.
pub type TunnelStream = Pin<Box<dyn AsyncReadWrite>>;

/// Convenience alias so `TunnelStream` doesn't need two separate trait
/// bounds spelled out at every call site.
pub trait AsyncReadWrite: AsyncRead + AsyncWrite + Send {}
impl<T: AsyncRead + AsyncWrite + Send + ?Sized> AsyncReadWrite for T {}

/// Component F: a contract over the external HTTP/TLS stack. The
/// orchestrator (component G) depends only on this trait, never on the
/// concrete `hyper`/`tokio-rustls` types, so the core protocol logic stays
/// decoupled from the upstream transport's implementation.
pub trait TunnelOpener: Send + Sync {
    /// Opens an authenticated tunnel to `target` through the configured
    /// upstream proxy. `extra_headers` is the verbatim CRLF-delimited header
    /// block from configuration; it is injected into the CONNECT request
    /// before it is sent, alongside a `Padding-Type-Request` header listing
    /// the padding types this process supports. `id` selects which of the
    /// `concurrency` pooled sessions serves the request (`id mod K`).
    async fn open_tunnel(
        &self,
        id: u64,
        target: &TargetEndpoint,
        extra_headers: &str,
    ) -> Result<TunnelStream, UpstreamError>;
}

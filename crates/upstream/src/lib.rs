//! Upstream tunnel opener for the naive forward proxy (component F).
//!
//! Wraps `hyper` + `tokio-rustls` behind the [`TunnelOpener`] trait so the
//! rest of the core (D/E/G, plus `naive-padding`'s A/B/C) never touches
//! `hyper` directly. Owns the per-listener pool of round-robined upstream
//! sessions and the `Padding-Type-Request`/`Padding-Type-Reply` handshake
//! that feeds `naive_padding::PaddingRegistry`.

mod error;
mod headers;
mod opener;
mod pool;
mod tunnel;

pub use error::UpstreamError;
pub use headers::parse_extra_headers;
pub use opener::HyperTunnelOpener;
pub use pool::{Session, SessionPool};
pub use tunnel::{TunnelOpener, TunnelStream};

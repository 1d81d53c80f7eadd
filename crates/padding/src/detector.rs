use std::sync::Arc;

use naive_protocol::{ClientProtocol, Direction, PaddingSupport, UpstreamEndpoint};

use crate::registry::PaddingRegistry;

/// What the detector has decided, or whether it is still waiting on one
/// side's capability to become known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Pending,
    Padded(Direction),
    NotPadded,
}

/// Per-connection resolver combining the client protocol, the client's own
/// advertised padding support (HTTP mode only) and the upstream registry
/// (component B) into a single padded-direction decision.
///
/// Mirrors the original `PaddingDetectorDelegate`: created at accept time,
/// fed the client's capability once component E has parsed it, then
/// consulted once the upstream tunnel is open and the registry has an
/// answer for this listener's `UpstreamEndpoint`.
pub struct PaddingDetector {
    protocol: ClientProtocol,
    upstream: UpstreamEndpoint,
    registry: Arc<PaddingRegistry>,
    client_support: PaddingSupport,
}

impl PaddingDetector {
    pub fn new(
        protocol: ClientProtocol,
        upstream: UpstreamEndpoint,
        registry: Arc<PaddingRegistry>,
    ) -> Self {
        Self {
            protocol,
            upstream,
            registry,
            // Socks5/Redir have no header channel to advertise support on;
            // treat them as permanently Incapable so the table's Socks5/
            // Redir rows (which only look at server support) fall out of
            // the same Http-shaped match below.
            client_support: PaddingSupport::Incapable,
        }
    }

    /// Invoked by component E once it has parsed the client's
    /// `Padding-Type-Request` header. Never called for Socks5/Redir.
    pub fn set_client_support(&mut self, support: PaddingSupport) {
        self.client_support = support;
    }

    pub fn direction(&self) -> Decision {
        let server_support = self.registry.get(&self.upstream);

        match self.protocol {
            ClientProtocol::Http => match (self.client_support, server_support) {
                (PaddingSupport::Unknown, _) | (_, PaddingSupport::Unknown) => Decision::Pending,
                (PaddingSupport::Capable, _) => Decision::Padded(Direction::Client),
                (PaddingSupport::Incapable, PaddingSupport::Capable) => {
                    Decision::Padded(Direction::Server)
                }
                (PaddingSupport::Incapable, PaddingSupport::Incapable) => Decision::NotPadded,
            },
            ClientProtocol::Socks5 | ClientProtocol::Redir => match server_support {
                PaddingSupport::Unknown => Decision::Pending,
                PaddingSupport::Capable => Decision::Padded(Direction::Server),
                PaddingSupport::Incapable => Decision::NotPadded,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream() -> UpstreamEndpoint {
        UpstreamEndpoint::new("https", "proxy.example", 443)
    }

    #[test]
    fn socks5_pads_server_direction_when_upstream_capable() {
        let registry = Arc::new(PaddingRegistry::new());
        registry.record(upstream(), true);
        let detector = PaddingDetector::new(ClientProtocol::Socks5, upstream(), registry);
        assert_eq!(detector.direction(), Decision::Padded(Direction::Server));
    }

    #[test]
    fn socks5_waits_while_upstream_unknown() {
        let registry = Arc::new(PaddingRegistry::new());
        let detector = PaddingDetector::new(ClientProtocol::Redir, upstream(), registry);
        assert_eq!(detector.direction(), Decision::Pending);
    }

    #[test]
    fn http_client_capable_always_pads_client_direction() {
        let registry = Arc::new(PaddingRegistry::new());
        registry.record(upstream(), false);
        let mut detector = PaddingDetector::new(ClientProtocol::Http, upstream(), registry);
        detector.set_client_support(PaddingSupport::Capable);
        assert_eq!(detector.direction(), Decision::Padded(Direction::Client));
    }

    #[test]
    fn http_neither_capable_is_not_padded() {
        let registry = Arc::new(PaddingRegistry::new());
        registry.record(upstream(), false);
        let mut detector = PaddingDetector::new(ClientProtocol::Http, upstream(), registry);
        detector.set_client_support(PaddingSupport::Incapable);
        assert_eq!(detector.direction(), Decision::NotPadded);
    }

    #[test]
    fn http_only_server_capable_pads_server_direction() {
        let registry = Arc::new(PaddingRegistry::new());
        registry.record(upstream(), true);
        let mut detector = PaddingDetector::new(ClientProtocol::Http, upstream(), registry);
        detector.set_client_support(PaddingSupport::Incapable);
        assert_eq!(detector.direction(), Decision::Padded(Direction::Server));
    }
}

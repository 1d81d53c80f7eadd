use dashmap::DashMap;
use naive_protocol::{PaddingSupport, UpstreamEndpoint};

/// Process-wide, per-upstream padding-capability table (the original
/// implementation's `NaiveProxyDelegate::padding_state_by_server_`).
///
/// Scoped to a single listener/process instance, not a global singleton:
/// each `Listener` (component H) owns one `Arc<PaddingRegistry>` and hands
/// it to every connection it accepts, so capability learned from one
/// connection benefits the next without leaking across independently
/// configured listeners.
#[derive(Debug, Default)]
pub struct PaddingRegistry {
    entries: DashMap<UpstreamEndpoint, PaddingSupport>,
}

impl PaddingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, endpoint: &UpstreamEndpoint) -> PaddingSupport {
        self.entries
            .get(endpoint)
            .map(|v| *v)
            .unwrap_or(PaddingSupport::Unknown)
    }

    /// Records what an upstream's `Padding-Type-Reply` header told us.
    /// `Some(_)` (any padding type, including `None`) means the upstream
    /// understood the negotiation and is `Capable`; the absence of the
    /// header means it is `Incapable`. Transitions are monotonic: once an
    /// endpoint has moved off `Unknown` this is a no-op.
    pub fn record(&self, endpoint: UpstreamEndpoint, reply_seen: bool) {
        let support = if reply_seen {
            PaddingSupport::Capable
        } else {
            PaddingSupport::Incapable
        };

        self.entries
            .entry(endpoint)
            .and_modify(|existing| {
                if *existing == PaddingSupport::Unknown {
                    *existing = support;
                }
            })
            .or_insert(support);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> UpstreamEndpoint {
        UpstreamEndpoint::new("https", "proxy.example", 443)
    }

    #[test]
    fn unknown_by_default() {
        let registry = PaddingRegistry::new();
        assert_eq!(registry.get(&endpoint()), PaddingSupport::Unknown);
    }

    #[test]
    fn first_observation_sets_support() {
        let registry = PaddingRegistry::new();
        registry.record(endpoint(), true);
        assert_eq!(registry.get(&endpoint()), PaddingSupport::Capable);
    }

    #[test]
    fn transitions_are_monotonic() {
        let registry = PaddingRegistry::new();
        registry.record(endpoint(), false);
        assert_eq!(registry.get(&endpoint()), PaddingSupport::Incapable);

        // A later, contradictory observation does not flip it back.
        registry.record(endpoint(), true);
        assert_eq!(registry.get(&endpoint()), PaddingSupport::Incapable);
    }
}

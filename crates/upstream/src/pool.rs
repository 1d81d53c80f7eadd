//! Round-robin pool of upstream HTTP sessions.
//!
//! Per-listener concurrency is expressed as `K` logically distinct sessions
//! to the upstream proxy (spec.md §4.F's "network anonymization keys").
//! Connections are striped across them by `id mod K` so that pooled
//! sessions are spread and reused the same way across restarts of the
//! striping sequence, rather than accumulating on a single session.

use bytes::Bytes;
use http_body_util::Empty;
use hyper::client::conn::{http1, http2};
use tokio::sync::Mutex;

/// One established connection to the upstream proxy, of whichever HTTP
/// version TLS ALPN negotiated.
pub enum Session {
    Http1(http1::SendRequest<Empty<Bytes>>),
    Http2(http2::SendRequest<Empty<Bytes>>),
}

/// Fixed-size pool of upstream sessions, lazily established and replaced on
/// failure. Slot selection is `id % pool_size`, matching the original
/// implementation's `network_anonymization_keys_[last_id_ % concurrency_]`.
pub struct SessionPool {
    slots: Vec<Mutex<Option<Session>>>,
}

impl SessionPool {
    pub fn new(concurrency: usize) -> Self {
        let mut slots = Vec::with_capacity(concurrency.max(1));
        for _ in 0..concurrency.max(1) {
            slots.push(Mutex::new(None));
        }
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn slot_for(&self, id: u64) -> usize {
        (id as usize) % self.slots.len()
    }

    pub async fn slot(&self, id: u64) -> tokio::sync::MutexGuard<'_, Option<Session>> {
        self.slots[self.slot_for(id)].lock().await
    }
}

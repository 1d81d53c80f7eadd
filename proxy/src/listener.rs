//! Component H: the listener/acceptor. Binds one configured `listen` entry,
//! accepts connections in a loop, and drives each through the orchestrator
//! (component G) on its own task, tracked by id in `connections` until it
//! finishes (spec.md §4.H).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use naive_padding::PaddingRegistry;
use naive_protocol::{ClientProtocol, UpstreamEndpoint};
use naive_upstream::TunnelOpener;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ListenEntry;
use crate::orchestrator::Orchestrator;
use crate::redir::FakeIpTable;

/// One bound listen entry, plus everything it shares with every other
/// listener in the process: the upstream tunnel opener, the padding
/// registry, and the redir fake-IP table (spec.md §4.H: "Multiple listen
/// entries may coexist... sharing the same upstream HTTP session and
/// padding-support registry").
pub struct Listener<O: TunnelOpener + Send + Sync + 'static> {
    protocol: ClientProtocol,
    bind_addr: SocketAddr,
    user: Option<String>,
    pass: Option<String>,
    upstream_endpoint: UpstreamEndpoint,
    extra_headers: String,
    tunnel_opener: Arc<O>,
    registry: Arc<PaddingRegistry>,
    fake_ip: Arc<FakeIpTable>,
    connections: DashMap<u64, JoinHandle<()>>,
    next_id: AtomicU64,
}

impl<O: TunnelOpener + Send + Sync + 'static> Listener<O> {
    pub fn new(
        entry: &ListenEntry,
        upstream_endpoint: UpstreamEndpoint,
        extra_headers: String,
        tunnel_opener: Arc<O>,
        registry: Arc<PaddingRegistry>,
        fake_ip: Arc<FakeIpTable>,
    ) -> Result<Self, crate::error::ConfigError> {
        let bind_addr: SocketAddr = format!("{}:{}", entry.addr, entry.port)
            .parse()
            .map_err(|_| crate::error::ConfigError::NoListeners)?;

        Ok(Self {
            protocol: entry.client_protocol()?,
            bind_addr,
            user: entry.user.clone(),
            pass: entry.pass.clone(),
            upstream_endpoint,
            extra_headers,
            tunnel_opener,
            registry,
            fake_ip,
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Binds and serves until `shutdown` reports `true`. Every tracked
    /// connection is aborted before returning (spec.md §5: "Graceful
    /// shutdown of the listener cancels all active connections").
    pub async fn serve(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> std::io::Result<()> {
        let tcp_listener = TcpListener::bind(self.bind_addr).await?;
        info!(
            protocol = self.protocol.as_str(),
            addr = %self.bind_addr,
            "listening"
        );

        loop {
            tokio::select! {
                accepted = tcp_listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => self.clone().spawn_connection(stream, peer),
                        Err(e) => warn!("accept error on {}: {e}", self.bind_addr),
                    }
                }
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.shutdown_all().await;
        Ok(())
    }

    fn spawn_connection(self: Arc<Self>, stream: tokio::net::TcpStream, peer: SocketAddr) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let listener = self.clone();

        let handle = tokio::spawn(async move {
            let orchestrator = Orchestrator {
                id,
                protocol: listener.protocol,
                credentials: listener.credentials(),
                upstream_endpoint: listener.upstream_endpoint.clone(),
                extra_headers: &listener.extra_headers,
                tunnel_opener: listener.tunnel_opener.as_ref(),
                registry: listener.registry.clone(),
                fake_ip: Some(listener.fake_ip.as_ref()),
            };

            match orchestrator.run(stream).await {
                Ok(()) => debug!(id, %peer, "connection closed"),
                Err(e) => warn!(id, %peer, error = %e, "connection closed"),
            }

            // Deferred removal: post to the next scheduler tick so any
            // still-running completion this task's own cleanup triggered
            // has a chance to run first (spec.md §4.H, §9).
            let listener = listener.clone();
            tokio::spawn(async move {
                listener.connections.remove(&id);
            });
        });

        self.connections.insert(id, handle);
    }

    fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.user, &self.pass) {
            (Some(u), Some(p)) => Some((u.as_str(), p.as_str())),
            _ => None,
        }
    }

    async fn shutdown_all(&self) {
        let ids: Vec<u64> = self.connections.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, handle)) = self.connections.remove(&id) {
                handle.abort();
            }
        }
    }

    pub fn active_connections(&self) -> usize {
        self.connections.len()
    }
}

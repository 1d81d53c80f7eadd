use std::sync::Arc;

use base64::Engine as _;
use bytes::Bytes;
use http::{HeaderValue, Method, Request, StatusCode, Uri};
use http_body_util::Empty;
use hyper::client::conn::{http1, http2};
use hyper_util::rt::{TokioExecutor, TokioIo};
use naive_padding::PaddingRegistry;
use naive_protocol::{TargetEndpoint, UpstreamEndpoint};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::{rustls, TlsConnector};
use tracing::{debug, warn};
use url::Url;

use crate::error::UpstreamError;
use crate::headers::{padding_type_request_value, parse_extra_headers, reply_header_seen};
use crate::pool::{Session, SessionPool};
use crate::tunnel::{TunnelOpener, TunnelStream};

/// Opens tunnels to a single, fixed upstream HTTPS/HTTP2 proxy using
/// `tokio-rustls` for TLS and `hyper`'s low-level `client::conn` API for the
/// CONNECT handshake, upgrading the resulting connection to a raw duplex
/// stream via `hyper::upgrade`.
pub struct HyperTunnelOpener {
    upstream: UpstreamEndpoint,
    connector: TlsConnector,
    proxy_authorization: Option<HeaderValue>,
    registry: Arc<PaddingRegistry>,
    pool: SessionPool,
}

impl HyperTunnelOpener {
    /// `proxy_url` is `scheme://[user:pass@]host[:port]` (spec.md §6); only
    /// `https` is accepted since the upstream protocol is TLS + CONNECT.
    pub fn new(
        proxy_url: &str,
        concurrency: usize,
        registry: Arc<PaddingRegistry>,
    ) -> Result<Self, UpstreamError> {
        let url = Url::parse(proxy_url)
            .map_err(|e| UpstreamError::InvalidUrl(format!("{proxy_url}: {e}")))?;

        if url.scheme() != "https" {
            return Err(UpstreamError::InvalidUrl(format!(
                "unsupported scheme {:?}, expected https",
                url.scheme()
            )));
        }

        let host = url
            .host_str()
            .ok_or_else(|| UpstreamError::InvalidUrl(proxy_url.to_string()))?
            .to_string();
        let port = url.port_or_known_default().unwrap_or(443);

        let proxy_authorization = if !url.username().is_empty() {
            let credentials = format!("{}:{}", url.username(), url.password().unwrap_or(""));
            let encoded = base64::engine::general_purpose::STANDARD.encode(credentials.as_bytes());
            Some(
                HeaderValue::from_str(&format!("Basic {encoded}"))
                    .expect("base64 output is a valid header token"),
            )
        } else {
            None
        };

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let mut tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        tls_config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

        Ok(Self {
            upstream: UpstreamEndpoint::new("https", host, port),
            connector: TlsConnector::from(Arc::new(tls_config)),
            proxy_authorization,
            registry,
            pool: SessionPool::new(concurrency),
        })
    }

    async fn establish(&self) -> Result<Session, UpstreamError> {
        let tcp = TcpStream::connect((self.upstream.host.as_str(), self.upstream.port))
            .await
            .map_err(UpstreamError::Connect)?;

        let server_name = ServerName::try_from(self.upstream.host.clone())
            .map_err(|_| UpstreamError::InvalidUrl(self.upstream.host.clone()))?;
        let tls_stream = self
            .connector
            .connect(server_name, tcp)
            .await
            .map_err(UpstreamError::TlsHandshake)?;

        let negotiated_h2 = tls_stream.get_ref().1.alpn_protocol() == Some(b"h2");

        if negotiated_h2 {
            let (send_request, connection) =
                http2::handshake(TokioExecutor::new(), TokioIo::new(tls_stream))
                    .await
                    .map_err(UpstreamError::HttpHandshake)?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    debug!("upstream h2 connection closed: {e}");
                }
            });
            Ok(Session::Http2(send_request))
        } else {
            let (send_request, connection) = http1::handshake(TokioIo::new(tls_stream))
                .await
                .map_err(UpstreamError::HttpHandshake)?;
            tokio::spawn(async move {
                if let Err(e) = connection.with_upgrades().await {
                    debug!("upstream h1 connection closed: {e}");
                }
            });
            Ok(Session::Http1(send_request))
        }
    }

    fn build_request(
        &self,
        target: &TargetEndpoint,
        extra_headers: &str,
    ) -> Result<Request<Empty<Bytes>>, UpstreamError> {
        let authority: Uri = format!("{}:{}", target.host, target.port)
            .parse()
            .map_err(|_| UpstreamError::InvalidExtraHeader(target.to_string()))?;

        let mut builder = Request::builder().method(Method::CONNECT).uri(authority);

        for (name, value) in parse_extra_headers(extra_headers)? {
            builder = builder.header(name, value);
        }
        builder = builder.header("padding-type-request", padding_type_request_value());
        if let Some(auth) = &self.proxy_authorization {
            builder = builder.header("proxy-authorization", auth.clone());
        }

        builder
            .body(Empty::new())
            .map_err(|e| UpstreamError::InvalidExtraHeader(e.to_string()))
    }
}

impl TunnelOpener for HyperTunnelOpener {
    async fn open_tunnel(
        &self,
        id: u64,
        target: &TargetEndpoint,
        extra_headers: &str,
    ) -> Result<TunnelStream, UpstreamError> {
        let mut guard = self.pool.slot(id).await;
        if guard.is_none() {
            *guard = Some(self.establish().await?);
        }

        let request = self.build_request(target, extra_headers)?;

        let mut response = match guard.as_mut().expect("just populated") {
            Session::Http1(send_request) => send_request.send_request(request).await,
            Session::Http2(send_request) => send_request.send_request(request).await,
        }
        .map_err(|e| {
            *guard = None;
            UpstreamError::Request(e)
        })?;

        if response.status() != StatusCode::OK {
            *guard = None;
            warn!(
                "upstream rejected CONNECT to {} with {}",
                target,
                response.status()
            );
            return Err(UpstreamError::NonSuccessStatus(response.status()));
        }

        self.registry
            .record(self.upstream.clone(), reply_header_seen(response.headers()));

        // An HTTP/1 CONNECT upgrade consumes the connection entirely: once
        // upgraded there is no HTTP framing left for a future send_request
        // to use, unlike HTTP/2 where the CONNECT stream is just one of
        // many multiplexed over the same still-usable connection.
        if matches!(guard.as_ref(), Some(Session::Http1(_))) {
            *guard = None;
        }

        let upgraded = hyper::upgrade::on(&mut response)
            .await
            .map_err(UpstreamError::NoUpgrade)?;

        Ok(Box::pin(TokioIo::new(upgraded)))
    }
}

//! Component G: the connection orchestrator. Owns one accepted connection
//! end to end — CONNECT_CLIENT, CONNECT_SERVER, then two pumps run to
//! end-of-stream (spec.md §4.G) — and is the only place that installs the
//! padding codec (component A) on whichever leg the detector (component C)
//! picked.

use std::sync::Arc;
use std::time::{Duration, Instant};

use naive_padding::{
    Decision, PaddingCodec, PaddingDetector, PaddingReadState, PaddingRegistry, PaddingWriteState,
};
use naive_protocol::{ClientProtocol, Direction, TargetEndpoint, UpstreamEndpoint};
use naive_upstream::TunnelOpener;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::error::ConnectionError;
use crate::http_proxy;
use crate::redir::FakeIpTable;
use crate::socks5::{self, Credentials};

const READ_CHUNK: usize = 64 * 1024;
/// After this many bytes pass in one direction without a yield, give the
/// other direction a chance to run (spec.md §4.G's "cooperative yield").
const BYTES_BEFORE_YIELD: usize = 1024 * 1024;
const YIELD_AFTER: Duration = Duration::from_millis(20);

/// Drives one accepted connection: client-side handshake, upstream tunnel
/// open, padding installation, then the two pumps.
///
/// Generic over the tunnel opener rather than `&dyn TunnelOpener`: component
/// F's `open_tunnel` is an `async fn` in a trait, which isn't dyn-dispatch
/// safe, so callers plug in the concrete opener (`HyperTunnelOpener` in
/// production, a fake in tests) as a type parameter instead.
pub struct Orchestrator<'a, O: TunnelOpener> {
    pub id: u64,
    pub protocol: ClientProtocol,
    pub credentials: Credentials<'a>,
    pub upstream_endpoint: UpstreamEndpoint,
    pub extra_headers: &'a str,
    pub tunnel_opener: &'a O,
    pub registry: Arc<PaddingRegistry>,
    pub fake_ip: Option<&'a FakeIpTable>,
}

impl<'a, O: TunnelOpener> Orchestrator<'a, O> {
    pub async fn run(&self, mut client: tokio::net::TcpStream) -> Result<(), ConnectionError> {
        let (target, client_padding, leading_bytes) = self.connect_client(&mut client).await?;
        debug!(id = self.id, %target, "client handshake complete");

        let mut detector =
            PaddingDetector::new(self.protocol, self.upstream_endpoint.clone(), self.registry.clone());
        detector.set_client_support(client_padding);

        let upstream = self
            .tunnel_opener
            .open_tunnel(self.id, &target, self.extra_headers)
            .await?;
        debug!(id = self.id, %target, "upstream tunnel open");

        let decision = detector.direction();
        if let Decision::Padded(direction) = decision {
            info!(id = self.id, ?direction, "padding enabled for connection");
        }

        pump_both(client, upstream, decision, leading_bytes).await
    }

    async fn connect_client(
        &self,
        client: &mut tokio::net::TcpStream,
    ) -> Result<(TargetEndpoint, naive_protocol::PaddingSupport, Vec<u8>), ConnectionError> {
        use naive_protocol::PaddingSupport;

        match self.protocol {
            ClientProtocol::Socks5 => {
                let target = socks5::handshake(client, self.credentials).await?;
                Ok((target, PaddingSupport::Incapable, Vec::new()))
            }
            ClientProtocol::Http => {
                let outcome = http_proxy::handshake(client).await?;
                Ok((outcome.target, outcome.client_padding, outcome.leading_bytes))
            }
            ClientProtocol::Redir => {
                let fake_ip = self.fake_ip.ok_or_else(|| {
                    ConnectionError::UnsupportedFeature(
                        "redir mode requires a fake-IP table".to_string(),
                    )
                })?;
                #[cfg(target_os = "linux")]
                {
                    let target = crate::redir::target_endpoint(client, fake_ip)?;
                    Ok((target, PaddingSupport::Incapable, Vec::new()))
                }
                #[cfg(not(target_os = "linux"))]
                {
                    let _ = fake_ip;
                    Err(ConnectionError::UnsupportedFeature(
                        "redir mode is only supported on linux".to_string(),
                    ))
                }
            }
        }
    }
}

/// Which leg, if any, carries the padding codec, shared by both pump
/// directions (spec.md §3: "exactly one of the two directions is padded").
enum Padding {
    None,
    Client(PaddingCodec),
    Server(PaddingCodec),
}

impl Padding {
    fn from_decision(decision: Decision) -> Self {
        match decision {
            Decision::Padded(Direction::Client) => Padding::Client(PaddingCodec::new()),
            Decision::Padded(Direction::Server) => Padding::Server(PaddingCodec::new()),
            Decision::NotPadded | Decision::Pending => Padding::None,
        }
    }

    /// Splits into the four independently-borrowable codec halves the two
    /// pump directions need: (accepted-read, accepted-write, upstream-read,
    /// upstream-write). Exactly one pair is `Some`; the rest are `None`
    /// (pass-through).
    fn split(
        &mut self,
    ) -> (
        Option<&mut PaddingReadState>,
        Option<&mut PaddingWriteState>,
        Option<&mut PaddingReadState>,
        Option<&mut PaddingWriteState>,
    ) {
        match self {
            Padding::None => (None, None, None, None),
            Padding::Client(codec) => {
                let (write, read) = codec.split_mut();
                (Some(read), Some(write), None, None)
            }
            Padding::Server(codec) => {
                let (write, read) = codec.split_mut();
                (None, None, Some(read), Some(write))
            }
        }
    }
}

/// Runs both pump directions to completion. Testable directly with
/// `tokio::io::duplex` pairs, independent of D/E/F.
pub async fn pump_both<C, U>(
    client: C,
    upstream: U,
    decision: Decision,
    leading_bytes: Vec<u8>,
) -> Result<(), ConnectionError>
where
    C: AsyncRead + AsyncWrite + Unpin + Send,
    U: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (client_read, client_write) = tokio::io::split(client);
    let (upstream_read, upstream_write) = tokio::io::split(upstream);

    let mut padding = Padding::from_decision(decision);
    let (accepted_read_codec, accepted_write_codec, upstream_read_codec, upstream_write_codec) =
        padding.split();

    let c2u = pump_direction(
        client_read,
        upstream_write,
        accepted_read_codec,
        upstream_write_codec,
        leading_bytes,
    );
    let u2c = pump_direction(
        upstream_read,
        client_write,
        upstream_read_codec,
        accepted_write_codec,
        Vec::new(),
    );

    let (c2u_result, u2c_result) = tokio::join!(c2u, u2c);
    c2u_result?;
    u2c_result?;
    Ok(())
}

/// One direction's pump: read from `source`, strip padding if `read_codec`
/// is active, add padding if `write_codec` is active, write to `sink`.
/// `leading_bytes` (from component E's already-parsed payload) is processed
/// as though it were the first chunk read from `source`.
async fn pump_direction<R, W>(
    mut source: R,
    mut sink: W,
    mut read_codec: Option<&mut PaddingReadState>,
    mut write_codec: Option<&mut PaddingWriteState>,
    leading_bytes: Vec<u8>,
) -> Result<(), ConnectionError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    let mut bytes_since_yield = 0usize;
    let mut yield_deadline = Instant::now() + YIELD_AFTER;
    let mut pending = leading_bytes;

    loop {
        let chunk: Vec<u8> = if !pending.is_empty() {
            std::mem::take(&mut pending)
        } else {
            let n = source.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            buf[..n].to_vec()
        };

        let payload = match read_codec.as_deref_mut() {
            Some(codec) => codec.feed(&chunk)?,
            None => chunk,
        };
        if payload.is_empty() {
            continue;
        }

        write_payload(&mut sink, &payload, write_codec.as_deref_mut()).await?;

        bytes_since_yield += payload.len();
        if bytes_since_yield >= BYTES_BEFORE_YIELD || Instant::now() >= yield_deadline {
            tokio::task::yield_now().await;
            bytes_since_yield = 0;
            yield_deadline = Instant::now() + YIELD_AFTER;
        }
    }

    if let Err(e) = sink.shutdown().await {
        warn!("half-close failed: {e}");
    }
    Ok(())
}

/// Writes `payload` to `sink`, wrapping it through `write_codec` in
/// `[1, 65535]`-byte frames when active (spec.md §4.A: the orchestrator, not
/// the codec, is responsible for splitting oversized writes).
async fn write_payload<W: AsyncWrite + Unpin>(
    sink: &mut W,
    payload: &[u8],
    write_codec: Option<&mut PaddingWriteState>,
) -> Result<(), ConnectionError> {
    match write_codec {
        None => {
            sink.write_all(payload).await?;
        }
        Some(codec) => {
            for chunk in payload.chunks(u16::MAX as usize) {
                let framed = codec.wrap(chunk)?;
                sink.write_all(&framed).await?;
            }
        }
    }
    sink.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn not_padded_forwards_bytes_verbatim_both_ways() {
        let (client_near, mut client_far) = duplex(1024);
        let (upstream_near, mut upstream_far) = duplex(1024);

        let pump = tokio::spawn(pump_both(
            client_near,
            upstream_near,
            Decision::NotPadded,
            Vec::new(),
        ));

        client_far.write_all(b"hello upstream").await.unwrap();
        let mut buf = [0u8; 32];
        let n = upstream_far.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello upstream");

        upstream_far.write_all(b"hello client").await.unwrap();
        let n = client_far.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello client");

        drop(client_far);
        drop(upstream_far);
        pump.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn server_padded_direction_frames_writes_to_upstream() {
        let (client_near, mut client_far) = duplex(4096);
        let (upstream_near, mut upstream_far) = duplex(4096);

        let pump = tokio::spawn(pump_both(
            client_near,
            upstream_near,
            Decision::Padded(Direction::Server),
            Vec::new(),
        ));

        client_far.write_all(b"payload").await.unwrap();

        let mut len_buf = [0u8; 2];
        upstream_far.read_exact(&mut len_buf).await.unwrap();
        let payload_len = u16::from_be_bytes(len_buf) as usize;
        assert_eq!(payload_len, 7);

        let mut pad_len_buf = [0u8; 1];
        upstream_far.read_exact(&mut pad_len_buf).await.unwrap();

        let mut payload = vec![0u8; payload_len];
        upstream_far.read_exact(&mut payload).await.unwrap();
        assert_eq!(payload, b"payload");

        let mut pad = vec![0u8; pad_len_buf[0] as usize];
        upstream_far.read_exact(&mut pad).await.unwrap();

        drop(client_far);
        drop(upstream_far);
        pump.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn leading_bytes_are_forwarded_before_further_reads() {
        let (client_near, mut client_far) = duplex(4096);
        let (upstream_near, mut upstream_far) = duplex(4096);

        let pump = tokio::spawn(pump_both(
            client_near,
            upstream_near,
            Decision::NotPadded,
            b"leading".to_vec(),
        ));

        let mut buf = [0u8; 32];
        let n = upstream_far.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"leading");

        drop(client_far);
        drop(upstream_far);
        pump.await.unwrap().unwrap();
    }
}

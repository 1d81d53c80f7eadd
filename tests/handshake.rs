//! End-to-end client handshake tests: a real TCP client talks SOCKS5 or
//! HTTP to `Orchestrator::run`, which tunnels through a fake upstream that
//! just echoes whatever it receives.

use std::sync::Arc;

use naive_padding::PaddingRegistry;
use naive_protocol::{ClientProtocol, TargetEndpoint, UpstreamEndpoint};
use naive_proxy::orchestrator::Orchestrator;
use naive_upstream::{TunnelOpener, TunnelStream, UpstreamError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Opens an in-process duplex instead of a real upstream connection and
/// echoes everything written to it straight back.
struct EchoOpener;

impl TunnelOpener for EchoOpener {
    async fn open_tunnel(
        &self,
        _id: u64,
        _target: &TargetEndpoint,
        _extra_headers: &str,
    ) -> Result<TunnelStream, UpstreamError> {
        let (near, mut far) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            loop {
                match far.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if far.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        Ok(Box::pin(near))
    }
}

async fn accept_once(listener: &TcpListener) -> TcpStream {
    let (stream, _peer) = listener.accept().await.unwrap();
    stream
}

fn test_upstream() -> UpstreamEndpoint {
    UpstreamEndpoint::new("https", "proxy.example", 443)
}

#[tokio::test]
async fn socks5_connect_round_trips_payload() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let stream = accept_once(&listener).await;
        let orchestrator = Orchestrator {
            id: 1,
            protocol: ClientProtocol::Socks5,
            credentials: None,
            upstream_endpoint: test_upstream(),
            extra_headers: "",
            tunnel_opener: &EchoOpener,
            registry: Arc::new(PaddingRegistry::new()),
            fake_ip: None,
        };
        orchestrator.run(stream).await
    });

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut greet_reply = [0u8; 2];
    client.read_exact(&mut greet_reply).await.unwrap();
    assert_eq!(greet_reply, [0x05, 0x00]);

    client
        .write_all(&[
            0x05, 0x01, 0x00, 0x01, 0x7F, 0x00, 0x00, 0x01, 0x00, 0x50,
        ])
        .await
        .unwrap();
    let mut connect_reply = [0u8; 10];
    client.read_exact(&mut connect_reply).await.unwrap();
    assert_eq!(connect_reply[1], 0x00);

    client.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 16];
    let n = client.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"ping");

    drop(client);
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn http_connect_round_trips_payload() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let stream = accept_once(&listener).await;
        let orchestrator = Orchestrator {
            id: 2,
            protocol: ClientProtocol::Http,
            credentials: None,
            upstream_endpoint: test_upstream(),
            extra_headers: "",
            tunnel_opener: &EchoOpener,
            registry: Arc::new(PaddingRegistry::new()),
            fake_ip: None,
        };
        orchestrator.run(stream).await
    });

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\n")
        .await
        .unwrap();

    let mut response = vec![0u8; 256];
    let n = client.read(&mut response).await.unwrap();
    let response = String::from_utf8_lossy(&response[..n]);
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));

    client.write_all(b"hello upstream").await.unwrap();
    let mut buf = [0u8; 32];
    let n = client.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"hello upstream");

    drop(client);
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn http_absolute_uri_round_trips_rewritten_request() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let stream = accept_once(&listener).await;
        let orchestrator = Orchestrator {
            id: 3,
            protocol: ClientProtocol::Http,
            credentials: None,
            upstream_endpoint: test_upstream(),
            extra_headers: "",
            tunnel_opener: &EchoOpener,
            registry: Arc::new(PaddingRegistry::new()),
            fake_ip: None,
        };
        orchestrator.run(stream).await
    });

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(b"GET http://example.com/path HTTP/1.1\r\nHost: example.com\r\n\r\n")
        .await
        .unwrap();

    // Absolute-URI mode has no CONNECT response; the rewritten request is
    // the first thing relayed upstream, and the echo opener bounces it
    // straight back.
    let mut buf = vec![0u8; 256];
    let n = client.read(&mut buf).await.unwrap();
    assert_eq!(
        String::from_utf8_lossy(&buf[..n]),
        "GET /path HTTP/1.1\r\nHost: example.com\r\n\r\n"
    );

    drop(client);
    server.await.unwrap().unwrap();
}

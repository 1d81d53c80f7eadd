//! Component E: the HTTP proxy server socket. Handles two client-facing
//! modes, chosen by the first request line: `CONNECT host:port` (with
//! padding-type negotiation) and absolute-URI HTTP/1.x plain proxying
//! (always unpadded, request rewritten to relative form before being handed
//! to the tunnel as the first payload bytes).

use naive_protocol::{PaddingSupport, PaddingType, TargetEndpoint};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ConnectionError;

const MAX_HEADER_SIZE: usize = 64 * 1024;
const READ_CHUNK: usize = 4096;

/// What component E learned from the client's opening request, ready for
/// the orchestrator (component G) to act on.
pub struct HandshakeOutcome {
    pub target: TargetEndpoint,
    pub client_padding: PaddingSupport,
    /// Bytes already read past the point E needed to stop reading — either
    /// the residual bytes after the CONNECT response's blank line, or the
    /// full rewritten request for absolute-URI mode. Must be prepended to
    /// the first write toward the upstream tunnel.
    pub leading_bytes: Vec<u8>,
}

/// Runs component E against a freshly accepted client socket.
pub async fn handshake<S>(stream: &mut S) -> Result<HandshakeOutcome, ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (buf, header_end) = read_until_blank_line(stream).await?;

    let mut raw_headers = [httparse::EMPTY_HEADER; 64];
    let mut request = httparse::Request::new(&mut raw_headers);
    match request
        .parse(&buf)
        .map_err(|e| ConnectionError::Framing(e.to_string()))?
    {
        httparse::Status::Complete(_) => {}
        httparse::Status::Partial => {
            return Err(ConnectionError::Framing(
                "incomplete request after blank line".to_string(),
            ));
        }
    }

    let method = request
        .method
        .ok_or_else(|| ConnectionError::Framing("missing request method".to_string()))?;
    let path = request
        .path
        .ok_or_else(|| ConnectionError::Framing("missing request target".to_string()))?;

    if method.eq_ignore_ascii_case("CONNECT") {
        handle_connect(stream, path, request.headers, &buf[header_end..]).await
    } else if path.contains("://") {
        handle_absolute_uri(method, path, request.headers, &buf, header_end)
    } else {
        Err(ConnectionError::Framing(format!(
            "unsupported request target {path:?} for method {method}"
        )))
    }
}

async fn read_until_blank_line<S: AsyncRead + Unpin>(
    stream: &mut S,
) -> Result<(Vec<u8>, usize), ConnectionError> {
    let mut buf = Vec::new();
    let mut scan_from = 0usize;
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        if let Some(pos) = find_blank_line(&buf, scan_from) {
            return Ok((buf, pos));
        }
        scan_from = buf.len().saturating_sub(3);

        if buf.len() > MAX_HEADER_SIZE {
            return Err(ConnectionError::Framing(
                "header section exceeds 64 KiB".to_string(),
            ));
        }

        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(ConnectionError::Framing(
                "connection closed before headers completed".to_string(),
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn find_blank_line(buf: &[u8], from: usize) -> Option<usize> {
    buf.windows(4)
        .skip(from)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| from + i + 4)
}

async fn handle_connect<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    path: &str,
    headers: &[httparse::Header<'_>],
    leftover: &[u8],
) -> Result<HandshakeOutcome, ConnectionError> {
    let target = parse_host_port(path)?;

    let mut bare_padding_seen = false;
    let mut request_csv: Option<&str> = None;
    for header in headers {
        if header.name.eq_ignore_ascii_case("padding") {
            bare_padding_seen = true;
        } else if header.name.eq_ignore_ascii_case("padding-type-request") {
            request_csv = Some(
                std::str::from_utf8(header.value)
                    .map_err(|e| ConnectionError::Framing(e.to_string()))?,
            );
        }
    }

    let chosen = match request_csv {
        Some(csv) => select_padding_type(csv)?,
        None if bare_padding_seen => PaddingType::Variant1,
        None => PaddingType::None,
    };

    write_connect_response(stream, chosen).await?;

    let client_padding = match chosen {
        PaddingType::None => PaddingSupport::Incapable,
        PaddingType::Variant1 => PaddingSupport::Capable,
    };

    Ok(HandshakeOutcome {
        target,
        client_padding,
        leading_bytes: leftover.to_vec(),
    })
}

fn select_padding_type(csv: &str) -> Result<PaddingType, ConnectionError> {
    for requested in csv.split(',') {
        if let Some(parsed) = PaddingType::parse(requested) {
            if PaddingType::supported().contains(&parsed) {
                return Ok(parsed);
            }
        }
    }
    Err(ConnectionError::UnsupportedFeature(
        "no common padding type".to_string(),
    ))
}

async fn write_connect_response<S: AsyncWrite + Unpin>(
    stream: &mut S,
    chosen: PaddingType,
) -> Result<(), ConnectionError> {
    let mut response = Vec::with_capacity(128);
    response.extend_from_slice(b"HTTP/1.1 200 OK\r\nPadding: ");
    response.extend_from_slice(&random_header_padding(fastrand::usize(30..=62)));
    response.extend_from_slice(b"\r\n");

    if chosen != PaddingType::None {
        response.extend_from_slice(b"Padding-Type-Reply: ");
        response.extend_from_slice(chosen.as_str().as_bytes());
        response.extend_from_slice(b"\r\n");
    }
    response.extend_from_slice(b"\r\n");

    let written = response.len();
    stream.write_all(&response).await?;
    stream.flush().await?;
    if written != response.len() {
        return Err(ConnectionError::Framing(
            "short write on CONNECT response".to_string(),
        ));
    }
    Ok(())
}

/// Bytes that are legal inside an HTTP header token (printable ASCII minus
/// characters with header-syntax meaning), so the opaque padding value can
/// never accidentally fold a line or terminate the header early.
fn random_header_padding(len: usize) -> Vec<u8> {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    (0..len)
        .map(|_| CHARSET[fastrand::usize(..CHARSET.len())])
        .collect()
}

fn handle_absolute_uri(
    method: &str,
    uri: &str,
    headers: &[httparse::Header<'_>],
    buf: &[u8],
    header_end: usize,
) -> Result<HandshakeOutcome, ConnectionError> {
    let without_scheme = uri
        .split_once("://")
        .map(|(_, rest)| rest)
        .ok_or_else(|| ConnectionError::Framing(format!("malformed absolute-URI {uri:?}")))?;
    let (authority, path_and_query) = match without_scheme.find('/') {
        Some(idx) => (&without_scheme[..idx], &without_scheme[idx..]),
        None => (without_scheme, "/"),
    };

    let (host, port) = match authority.rsplit_once(':') {
        Some((h, p)) => (
            h.to_string(),
            p.parse()
                .map_err(|_| ConnectionError::Framing(format!("invalid port in {uri:?}")))?,
        ),
        None => (authority.to_string(), 80),
    };

    if host.is_empty() {
        return Err(ConnectionError::Framing(
            "missing host in absolute-URI request".to_string(),
        ));
    }

    let raw_header_block =
        std::str::from_utf8(&buf[..header_end]).map_err(|e| ConnectionError::Framing(e.to_string()))?;
    let mut lines = raw_header_block.split("\r\n");
    let _original_request_line = lines.next();

    let mut rewritten = format!("{method} {path_and_query} HTTP/1.1\r\n");
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let is_stripped = line
            .split_once(':')
            .map(|(name, _)| {
                name.eq_ignore_ascii_case("proxy-connection")
                    || name.eq_ignore_ascii_case("proxy-authorization")
            })
            .unwrap_or(false);
        if !is_stripped {
            rewritten.push_str(line);
            rewritten.push_str("\r\n");
        }
    }
    rewritten.push_str("\r\n");

    // The caller's header array already told us Host was present or absent;
    // absolute-URI requests with no Host header but a host in the URI are
    // valid, so we don't require it separately here.
    let _ = headers;

    let mut leading_bytes = rewritten.into_bytes();
    leading_bytes.extend_from_slice(&buf[header_end..]);

    Ok(HandshakeOutcome {
        target: TargetEndpoint::new(host, port),
        client_padding: PaddingSupport::Incapable,
        leading_bytes,
    })
}

fn parse_host_port(authority: &str) -> Result<TargetEndpoint, ConnectionError> {
    let (host, port) = authority
        .rsplit_once(':')
        .ok_or_else(|| ConnectionError::Framing(format!("malformed CONNECT target {authority:?}")))?;
    let port = port
        .parse()
        .map_err(|_| ConnectionError::Framing(format!("invalid port in {authority:?}")))?;
    Ok(TargetEndpoint::new(host.to_string(), port))
}

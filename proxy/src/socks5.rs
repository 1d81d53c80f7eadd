//! Component D: the SOCKS5 server socket (RFC 1928 greet + CONNECT, plus
//! optional RFC 1929 username/password authentication).
//!
//! The handshake is expressed as a sequential async function rather than an
//! explicit state enum driven by a dispatcher: every suspension point here
//! is a single read or write, so the function body already reads as the
//! state machine spec.md describes (`GREET_READ` -> `GREET_WRITE` ->
//! `(AUTH)?` -> `HANDSHAKE_READ` -> `HANDSHAKE_WRITE` -> `DONE`).

use naive_protocol::TargetEndpoint;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ConnectionError;

const VERSION: u8 = 0x05;

const AUTH_NO_AUTH: u8 = 0x00;
const AUTH_USERPASS: u8 = 0x02;
const AUTH_NO_ACCEPTABLE: u8 = 0xFF;

const USERPASS_VERSION: u8 = 0x01;

const CMD_CONNECT: u8 = 0x01;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

const REP_SUCCESS: u8 = 0x00;
const REP_COMMAND_NOT_SUPPORTED: u8 = 0x07;

/// Configured username/password, if this listen entry requires RFC 1929
/// authentication.
pub type Credentials<'a> = Option<(&'a str, &'a str)>;

/// Runs the full SOCKS5 greet+auth+CONNECT handshake and returns the
/// requested target. On any protocol violation the connection is closed
/// without forwarding a byte of payload (invariant 1).
pub async fn handshake<S>(
    stream: &mut S,
    credentials: Credentials<'_>,
) -> Result<TargetEndpoint, ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    greet(stream, credentials.is_some()).await?;

    if let Some((user, pass)) = credentials {
        authenticate(stream, user, pass).await?;
    }

    let target = read_request(stream).await?;
    send_reply(stream, REP_SUCCESS).await?;
    Ok(target)
}

async fn greet<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    auth_required: bool,
) -> Result<(), ConnectionError> {
    let version = stream.read_u8().await?;
    if version != VERSION {
        return Err(ConnectionError::Framing(format!(
            "unexpected SOCKS version {version:#x}"
        )));
    }

    let nmethods = stream.read_u8().await?;
    let mut methods = vec![0u8; nmethods as usize];
    stream.read_exact(&mut methods).await?;

    let wanted = if auth_required {
        AUTH_USERPASS
    } else {
        AUTH_NO_AUTH
    };

    if !methods.contains(&wanted) {
        stream.write_all(&[VERSION, AUTH_NO_ACCEPTABLE]).await?;
        return Err(ConnectionError::Authentication);
    }

    stream.write_all(&[VERSION, wanted]).await?;
    Ok(())
}

async fn authenticate<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    user: &str,
    pass: &str,
) -> Result<(), ConnectionError> {
    let version = stream.read_u8().await?;
    if version != USERPASS_VERSION {
        return Err(ConnectionError::Framing(format!(
            "unexpected auth sub-negotiation version {version:#x}"
        )));
    }

    let ulen = stream.read_u8().await? as usize;
    let mut ubuf = vec![0u8; ulen];
    stream.read_exact(&mut ubuf).await?;

    let plen = stream.read_u8().await? as usize;
    let mut pbuf = vec![0u8; plen];
    stream.read_exact(&mut pbuf).await?;

    if ubuf == user.as_bytes() && pbuf == pass.as_bytes() {
        stream.write_all(&[USERPASS_VERSION, 0x00]).await?;
        Ok(())
    } else {
        stream.write_all(&[USERPASS_VERSION, 0x01]).await?;
        Err(ConnectionError::Authentication)
    }
}

async fn read_request<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
) -> Result<TargetEndpoint, ConnectionError> {
    let version = stream.read_u8().await?;
    let cmd = stream.read_u8().await?;
    let _rsv = stream.read_u8().await?;
    let atyp = stream.read_u8().await?;

    if version != VERSION {
        return Err(ConnectionError::Framing(format!(
            "unexpected SOCKS version {version:#x} in request"
        )));
    }

    if cmd != CMD_CONNECT {
        send_reply(stream, REP_COMMAND_NOT_SUPPORTED).await?;
        return Err(ConnectionError::UnsupportedFeature(format!(
            "SOCKS5 command {cmd:#x}"
        )));
    }

    match atyp {
        ATYP_IPV4 => {
            let mut addr = [0u8; 4];
            stream.read_exact(&mut addr).await?;
            let port = stream.read_u16().await?;
            Ok(TargetEndpoint::new(
                std::net::Ipv4Addr::from(addr).to_string(),
                port,
            ))
        }
        ATYP_IPV6 => {
            let mut addr = [0u8; 16];
            stream.read_exact(&mut addr).await?;
            let port = stream.read_u16().await?;
            Ok(TargetEndpoint::new(
                std::net::Ipv6Addr::from(addr).to_string(),
                port,
            ))
        }
        ATYP_DOMAIN => {
            let len = stream.read_u8().await? as usize;
            if len == 0 {
                return Err(ConnectionError::Framing(
                    "zero-length SOCKS5 domain name".to_string(),
                ));
            }
            let mut domain = vec![0u8; len];
            stream.read_exact(&mut domain).await?;
            let port = stream.read_u16().await?;
            let domain = String::from_utf8(domain)
                .map_err(|e| ConnectionError::Framing(e.to_string()))?;
            Ok(TargetEndpoint::new(domain, port))
        }
        other => Err(ConnectionError::Framing(format!(
            "unknown SOCKS5 address type {other:#x}"
        ))),
    }
}

async fn send_reply<S: AsyncWrite + Unpin>(stream: &mut S, rep: u8) -> Result<(), ConnectionError> {
    let reply = [VERSION, rep, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0];
    stream.write_all(&reply).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn happy_path_no_auth() {
        let (mut client, mut server) = duplex(256);

        let server_task = tokio::spawn(async move { handshake(&mut server, None).await });

        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        client
            .write_all(&[
                0x05, 0x01, 0x00, 0x01, 0x7F, 0x00, 0x00, 0x01, 0x00, 0x50,
            ])
            .await
            .unwrap();

        let mut greet_reply = [0u8; 2];
        client.read_exact(&mut greet_reply).await.unwrap();
        assert_eq!(greet_reply, [0x05, 0x00]);

        let mut connect_reply = [0u8; 10];
        client.read_exact(&mut connect_reply).await.unwrap();
        assert_eq!(
            connect_reply,
            [0x05, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]
        );

        let target = server_task.await.unwrap().unwrap();
        assert_eq!(target, TargetEndpoint::new("127.0.0.1", 0x50));
    }

    #[tokio::test]
    async fn userpass_auth_happy_path() {
        let (mut client, mut server) = duplex(256);

        let server_task =
            tokio::spawn(async move { handshake(&mut server, Some(("u", "p"))).await });

        client.write_all(&[0x05, 0x01, 0x02]).await.unwrap();
        let mut greet_reply = [0u8; 2];
        client.read_exact(&mut greet_reply).await.unwrap();
        assert_eq!(greet_reply, [0x05, 0x02]);

        client
            .write_all(&[0x01, 0x01, b'u', 0x01, b'p'])
            .await
            .unwrap();
        let mut auth_reply = [0u8; 2];
        client.read_exact(&mut auth_reply).await.unwrap();
        assert_eq!(auth_reply, [0x01, 0x00]);

        let domain = b"localhost";
        let mut req = vec![0x05, 0x01, 0x00, 0x03, domain.len() as u8];
        req.extend_from_slice(domain);
        req.extend_from_slice(&0x50u16.to_be_bytes());
        client.write_all(&req).await.unwrap();

        let mut connect_reply = [0u8; 10];
        client.read_exact(&mut connect_reply).await.unwrap();
        assert_eq!(connect_reply[1], 0x00);

        let target = server_task.await.unwrap().unwrap();
        assert_eq!(target, TargetEndpoint::new("localhost", 0x50));
    }

    #[tokio::test]
    async fn rejects_zero_length_domain() {
        let (mut client, mut server) = duplex(256);

        let server_task = tokio::spawn(async move { handshake(&mut server, None).await });

        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        client
            .write_all(&[0x05, 0x01, 0x00, 0x03, 0x00])
            .await
            .unwrap();

        let mut greet_reply = [0u8; 2];
        client.read_exact(&mut greet_reply).await.unwrap();

        assert!(server_task.await.unwrap().is_err());
    }
}

//! Component G's Redir-mode helpers: recovering the original destination of
//! a transparently-redirected connection and mapping a fake-IP back to the
//! hostname it was assigned to.
//!
//! Linux-only: the rest of the core treats redir as just another way to
//! obtain a `TargetEndpoint` before CONNECT_SERVER, so non-Linux builds
//! simply don't offer it (`naive_config` rejects `ClientProtocol::Redir` at
//! load time on other platforms).

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::RwLock;

use naive_protocol::TargetEndpoint;

use crate::error::ConnectionError;

/// Reverse lookup from a fake IP assigned by the (external, out of scope)
/// DNS layer back to the hostname it stood in for. Populated once at
/// startup from `host-resolver-rules`; nothing here talks to a resolver.
#[derive(Debug, Default)]
pub struct FakeIpTable {
    entries: RwLock<HashMap<IpAddr, String>>,
}

impl FakeIpTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses Chromium host-resolver-rules syntax, keeping only the subset
    /// relevant to reversing a fake IP: comma-separated `MAP <hostname>
    /// <ip>` clauses. Anything else (`EXCLUDE`, wildcards, `~NOTFOUND`) is
    /// silently skipped; it has no bearing on the reverse table.
    pub fn from_resolver_rules(rules: &str) -> Self {
        let mut entries = HashMap::new();
        for clause in rules.split(',') {
            let mut parts = clause.split_whitespace();
            let Some(directive) = parts.next() else {
                continue;
            };
            if !directive.eq_ignore_ascii_case("MAP") {
                continue;
            }
            let (Some(hostname), Some(target)) = (parts.next(), parts.next()) else {
                continue;
            };
            if let Ok(ip) = target.parse::<IpAddr>() {
                entries.insert(ip, hostname.to_string());
            }
        }
        Self {
            entries: RwLock::new(entries),
        }
    }

    pub fn insert(&self, ip: IpAddr, hostname: String) {
        self.entries.write().unwrap().insert(ip, hostname);
    }

    /// Resolves `ip` to the hostname it was assigned to, if any. Callers
    /// fall back to the bare IP address when this returns `None` (spec.md
    /// §3's "if absent, the IP is used verbatim").
    pub fn resolve(&self, ip: IpAddr) -> Option<String> {
        self.entries.read().unwrap().get(&ip).cloned()
    }
}

/// Resolves the accepted socket's original destination, then maps it
/// through `fake_ip` per spec.md §4.G's redir branch.
#[cfg(target_os = "linux")]
pub fn target_endpoint(
    stream: &tokio::net::TcpStream,
    fake_ip: &FakeIpTable,
) -> Result<TargetEndpoint, ConnectionError> {
    let original = original_destination(stream)?;
    let host = fake_ip
        .resolve(original.ip())
        .unwrap_or_else(|| original.ip().to_string());
    Ok(TargetEndpoint::new(host, original.port()))
}

/// `getsockopt(fd, SOL_IP, SO_ORIGINAL_DST, ...)`: the standard Linux way to
/// recover the pre-NAT destination of a connection accepted off a
/// `REDIRECT`/`TPROXY` iptables rule.
#[cfg(target_os = "linux")]
fn original_destination(
    stream: &tokio::net::TcpStream,
) -> Result<std::net::SocketAddr, ConnectionError> {
    use std::os::fd::AsRawFd;

    let fd = stream.as_raw_fd();
    let local = stream.local_addr()?;

    if local.is_ipv4() {
        let mut addr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
        let rc = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_IP,
                libc::SO_ORIGINAL_DST,
                &mut addr as *mut _ as *mut libc::c_void,
                &mut len,
            )
        };
        if rc != 0 {
            return Err(ConnectionError::Io(std::io::Error::last_os_error()));
        }
        let ip = std::net::Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));
        let port = u16::from_be(addr.sin_port);
        Ok(std::net::SocketAddr::new(ip.into(), port))
    } else {
        // SOL_IPV6/IP6T_SO_ORIGINAL_DST shares the same numeric value on
        // Linux's netfilter implementation but takes a sockaddr_in6.
        let mut addr: libc::sockaddr_in6 = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t;
        let rc = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_IPV6,
                libc::SO_ORIGINAL_DST,
                &mut addr as *mut _ as *mut libc::c_void,
                &mut len,
            )
        };
        if rc != 0 {
            return Err(ConnectionError::Io(std::io::Error::last_os_error()));
        }
        let ip = std::net::Ipv6Addr::from(addr.sin6_addr.s6_addr);
        let port = u16::from_be(addr.sin6_port);
        Ok(std::net::SocketAddr::new(ip.into(), port))
    }
}

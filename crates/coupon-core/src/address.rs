//! Client address resolution and canonicalization.
//!
//! A client may reach the service as plain IPv4, as an IPv4-mapped IPv6
//! address (`::ffff:a.b.c.d`) on a dual-stack socket, or over IPv6 loopback.
//! All of these collapse to one canonical [`ClientAddress`] so that the
//! address cooldown cannot be sidestepped by switching representations.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::types::ClientAddress;

/// Collapse equivalent representations of the same client IP.
///
/// - IPv4-mapped IPv6 becomes the embedded IPv4 address.
/// - IPv6 loopback (`::1`) becomes `127.0.0.1`.
pub fn canonical_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V4(_) => ip,
        IpAddr::V6(v6) => {
            if v6.is_loopback() {
                IpAddr::V4(Ipv4Addr::LOCALHOST)
            } else if let Some(v4) = v6.to_ipv4_mapped() {
                IpAddr::V4(v4)
            } else {
                ip
            }
        }
    }
}

/// Parse an IP out of a header value fragment.
///
/// Accepts bare addresses, bracketed IPv6 (`[::1]`), and `ip:port` /
/// `[ip]:port` forms that some proxies emit.
pub fn parse_ip(raw: &str) -> Option<IpAddr> {
    let raw = raw.trim();
    if let Ok(ip) = raw.parse::<IpAddr>() {
        return Some(ip);
    }
    if let Ok(sock) = raw.parse::<SocketAddr>() {
        return Some(sock.ip());
    }
    raw.strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .and_then(|s| s.parse().ok())
}

/// Resolve the claimant address for a request.
///
/// When `trust_proxy_headers` is set, the first entry of `X-Forwarded-For`
/// wins, then `X-Real-IP`. Unparsable header values fall through to the next
/// source. The socket peer is used last; with no usable source at all the
/// unspecified address `0.0.0.0` is returned, which still acts as one shared
/// cooldown bucket.
pub fn resolve_client_address(
    forwarded_for: Option<&str>,
    real_ip: Option<&str>,
    peer: Option<IpAddr>,
    trust_proxy_headers: bool,
) -> ClientAddress {
    let from_headers = if trust_proxy_headers {
        forwarded_for
            .and_then(|v| v.split(',').next())
            .and_then(parse_ip)
            .or_else(|| real_ip.and_then(parse_ip))
    } else {
        None
    };

    let ip = from_headers
        .or(peer)
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    ClientAddress::from_ip(ip)
}

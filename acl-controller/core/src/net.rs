use ipnet::IpNet;
use std::net::IpAddr;

#[derive(Debug, thiserror::Error)]
#[error("invalid IP address or CIDR {literal:?}")]
pub struct InvalidAddress {
    pub literal: String,
}

/// Parses an IP literal or a CIDR. Bare addresses become single-host networks.
pub fn parse_network(literal: &str) -> Result<IpNet, InvalidAddress> {
    let literal = literal.trim();
    let parsed = if literal.contains('/') {
        literal.parse::<IpNet>().ok()
    } else {
        literal.parse::<IpAddr>().ok().map(IpNet::from)
    };
    parsed.ok_or_else(|| InvalidAddress {
        literal: literal.to_string(),
    })
}

/// Returns the address of a network with no host bits, e.g. `10.0.0.5/32`.
pub fn single_host(net: &IpNet) -> Option<IpAddr> {
    if net.prefix_len() == net.max_prefix_len() {
        Some(net.addr())
    } else {
        None
    }
}

/// Extracts the host part of a router address, which may be a bare hostname,
/// a `host:port` pair, or a full URL.
pub fn url_to_host(addr: &str) -> Option<String> {
    let addr = addr.trim();
    if addr.is_empty() {
        return None;
    }

    let uri = if addr.contains("://") {
        addr.parse::<http::Uri>()
    } else {
        format!("http://{addr}").parse::<http::Uri>()
    };
    let uri = uri.ok()?;
    let host = uri.host()?.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return None;
    }
    Some(host.to_string())
}

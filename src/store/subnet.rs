//! `subnet_match()` SQL function for client address matching.

use ipnet::IpNet;
use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;
use std::net::IpAddr;

/// Parse a configured client address, either a plain IP or CIDR notation.
///
/// A plain address is treated as a host network (`/32` or `/128`).
pub(crate) fn parse_network(value: &str) -> Option<IpNet> {
    let value = value.trim();
    if value.contains('/') {
        return value.parse::<IpNet>().ok().map(|net| net.trunc());
    }
    value.parse::<IpAddr>().ok().map(IpNet::from)
}

/// Match a client address against a configured network.
///
/// Returns the prefix length of `network` when it contains `addr`, so
/// callers can rank overlapping subnets, or `None` when it does not.
pub(crate) fn subnet_match(network: &str, addr: &str) -> Option<u8> {
    let net = parse_network(network)?;
    let addr: IpAddr = addr.trim().parse().ok()?;

    let addr = match (net, addr) {
        // IPv4 clients reaching us over a dual-stack socket
        (IpNet::V4(_), IpAddr::V6(v6)) => IpAddr::V4(v6.to_ipv4_mapped()?),
        (_, addr) => addr,
    };

    net.contains(&addr).then(|| net.prefix_len())
}

/// Register `subnet_match(ip, addr)` on a connection.
///
/// The function yields the matching prefix length or `NULL`.
pub(crate) fn register(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "subnet_match",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let network: Option<String> = ctx.get(0)?;
            let addr: Option<String> = ctx.get(1)?;
            Ok(match (network, addr) {
                (Some(network), Some(addr)) => subnet_match(&network, &addr).map(i64::from),
                _ => None,
            })
        },
    )
}

//! Classification of IP addresses that must never be connected to.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::IpNet;
use once_cell::sync::Lazy;

/// Reserved ranges the standard library predicates don't cover.
/// See <https://ipinfo.io/bogon>.
const BOGON_CIDRS: &[&str] = &[
    "0.0.0.0/8",
    "100.64.0.0/10", // shared address space (CGNAT, overlay networks)
    "64:ff9b::/96",  // NAT64
    "64:ff9b:1::/48",
    "2001:10::/28", // deprecated ORCHID
    "2001:db8::/32", // documentation
    "::/96",
];

static BOGONS: Lazy<Vec<IpNet>> = Lazy::new(|| {
    BOGON_CIDRS
        .iter()
        .map(|cidr| cidr.parse().expect("bogon table entries are valid CIDRs"))
        .collect()
});

/// Check whether an address is forbidden as a connection target.
pub fn is_forbidden(ip: IpAddr) -> bool {
    forbidden_reason(ip).is_some()
}

/// Check a textual address. Anything that doesn't parse is forbidden.
pub fn is_forbidden_str(address: &str) -> bool {
    // Mapped forms render differently across components; refuse them by text too.
    if address.starts_with("::ffff:") {
        return true;
    }

    match address.parse::<IpAddr>() {
        Ok(ip) => is_forbidden(ip),
        Err(_) => true,
    }
}

/// Explain why an address is forbidden, or `None` if it is public.
pub fn forbidden_reason(ip: IpAddr) -> Option<&'static str> {
    let reason = match ip {
        IpAddr::V4(ipv4) => ipv4_reason(ipv4),
        IpAddr::V6(ipv6) => ipv6_reason(ipv6),
    };

    reason.or_else(|| {
        BOGONS
            .iter()
            .any(|net| net.contains(&ip))
            .then_some("reserved (bogon) range")
    })
}

fn ipv4_reason(ip: Ipv4Addr) -> Option<&'static str> {
    if ip.is_unspecified() {
        return Some("unspecified address (0.0.0.0)");
    }

    if ip.is_loopback() {
        return Some("loopback address (127.0.0.0/8)");
    }

    if ip.is_private() {
        return Some("private address (RFC 1918)");
    }

    if ip.is_link_local() {
        return Some("link-local address (169.254.0.0/16)");
    }

    if ip.is_multicast() {
        return Some("multicast address (224.0.0.0/4)");
    }

    if ip.is_broadcast() {
        return Some("broadcast address, not global unicast");
    }

    None
}

fn ipv6_reason(ip: Ipv6Addr) -> Option<&'static str> {
    if ip.is_unspecified() {
        return Some("unspecified address (::)");
    }

    if ip.is_loopback() {
        return Some("loopback address (::1)");
    }

    // Rejected even when the embedded IPv4 address is public.
    if is_ipv4_mapped(ip) {
        return Some("IPv4-mapped IPv6 address (::ffff:0:0/96)");
    }

    if is_ipv4_translated(ip) {
        return Some("IPv4-translated IPv6 address (::ffff:0:0:0/96)");
    }

    if is_unique_local(ip) {
        return Some("private address (fc00::/7)");
    }

    // is_unicast_link_local needs a newer toolchain, so check manually
    if is_link_local(ip) {
        return Some("link-local address (fe80::/10)");
    }

    if ip.is_multicast() {
        return Some("multicast address (ff00::/8)");
    }

    None
}

fn is_ipv4_mapped(ip: Ipv6Addr) -> bool {
    ip.to_ipv4_mapped().is_some()
}

fn is_ipv4_translated(ip: Ipv6Addr) -> bool {
    let segments = ip.segments();
    segments[0..4] == [0, 0, 0, 0] && segments[4] == 0xffff && segments[5] == 0
}

/// fc00::/7
fn is_unique_local(ip: Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xfe00) == 0xfc00
}

/// fe80::/10
fn is_link_local(ip: Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xffc0) == 0xfe80
}

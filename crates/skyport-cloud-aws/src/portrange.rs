//! PortRangeCodec
//!
//! Vendor permissions carry `(fromPort, toPort)` with protocol-specific
//! "all ports" sentinels: `0..65535` for tcp/udp, `-1..-1` for everything
//! else (icmp type/code, protocol `-1`).

use skyport_cloud::{PortSpec, Protocol};

/// Vendor protocol sentinel meaning "all protocols"
pub const ANY_PROTOCOL: &str = "-1";

const MIN_PORT: i32 = 0;
const MAX_PORT: i32 = 65535;
const UNSET_PORT: i32 = -1;

fn uses_port_numbers(protocol: &str) -> bool {
    matches!(protocol, "tcp" | "udp" | "6" | "17")
}

/// The `(fromPort, toPort)` pair meaning "all ports" for `protocol`
pub fn all_ports(protocol: &str) -> (i32, i32) {
    if uses_port_numbers(protocol) {
        (MIN_PORT, MAX_PORT)
    } else {
        (UNSET_PORT, UNSET_PORT)
    }
}

/// Names the vendor does not accept, mapped to their IANA numbers
const PROTOCOL_NUMBERS: &[(&str, u8)] = &[
    ("ipip", 4),
    ("ipv6", 41),
    ("gre", 47),
    ("esp", 50),
    ("ah", 51),
    ("eigrp", 88),
    ("ospf", 89),
    ("pim", 103),
    ("vrrp", 112),
    ("l2tp", 115),
    ("sctp", 132),
];

/// Generic protocol to vendor protocol string. `None` for a name that is
/// neither known nor a protocol number.
pub fn vendor_protocol(protocol: &Protocol) -> Option<String> {
    match protocol {
        Protocol::Any => Some(ANY_PROTOCOL.to_string()),
        Protocol::Tcp | Protocol::Udp | Protocol::Icmp => Some(protocol.as_str().to_string()),
        Protocol::Other(name) => match name.as_str() {
            "icmpv6" | "ipv6-icmp" | "58" => Some("icmpv6".to_string()),
            other if other.parse::<u8>().is_ok() => Some(other.to_string()),
            other => PROTOCOL_NUMBERS
                .iter()
                .find(|(known, _)| *known == other)
                .map(|(_, number)| number.to_string()),
        },
    }
}

/// Encode generic endpoints. Unset or non-positive endpoints take the
/// protocol's "all" sentinel independently of each other.
pub fn encode_range(protocol: &str, start: i32, end: i32) -> (i32, i32) {
    let (all_from, all_to) = all_ports(protocol);
    let from = if start <= 0 { all_from } else { start };
    let to = if end <= 0 { all_to } else { end };
    (from, to)
}

/// Whether a vendor range covers every port of `protocol`
pub fn is_all_ports(protocol: &str, from: i32, to: i32) -> bool {
    (from, to) == all_ports(protocol)
}

/// Decode a vendor range into the generic representation
pub fn decode_range(protocol: &str, from: i32, to: i32) -> PortSpec {
    if is_all_ports(protocol, from, to) {
        PortSpec::All
    } else {
        PortSpec::range(from, to)
    }
}

//! Allow-flattening
//!
//! Reduces a prioritized allow/deny rule list into an allow-only list with
//! the same effective coverage under default-deny semantics. Each rule is a
//! box in (protocol, port range, address range) space; the effective
//! permission of an allow rule is its box minus every deny box evaluated
//! before it.
//!
//! Evaluation order is ascending priority. Within equal priority a deny is
//! evaluated before an allow. The port axis of protocols without port
//! numbers (icmp type, other protocols) is carried the same way as tcp/udp
//! ports, so a rule for one icmp type stays one icmp type.
//!
//! An allow-only list cannot say "every protocol except tcp". When a
//! protocol-specific deny cuts into an `any`-protocol allow, the addresses
//! outside the deny stay `any`, while the overlap is expressed over tcp, udp
//! and icmp only and a warning is logged. The result never grants traffic the
//! original list denies; other protocols lose access on the overlap.

use crate::secrule::{Direction, GenericSecurityRule, PortSpec, Protocol, RuleAction};
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use std::cmp::Ordering;
use std::net::{Ipv4Addr, Ipv6Addr};

const PORT_MIN: u16 = 0;
const PORT_MAX: u16 = 65535;

/// Protocols an `any` allow is split into when a specific deny overlaps it
const EXPANDED_PROTOCOLS: [Protocol; 3] = [Protocol::Tcp, Protocol::Udp, Protocol::Icmp];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct AddrRange {
    v6: bool,
    lo: u128,
    hi: u128,
}

impl AddrRange {
    fn from_net(net: &IpNet) -> Self {
        match net {
            IpNet::V4(n) => Self {
                v6: false,
                lo: u128::from(u32::from(n.network())),
                hi: u128::from(u32::from(n.broadcast())),
            },
            IpNet::V6(n) => Self {
                v6: true,
                lo: u128::from(n.network()),
                hi: u128::from(n.broadcast()),
            },
        }
    }

    fn intersect(&self, other: &Self) -> Option<Self> {
        if self.v6 != other.v6 {
            return None;
        }
        let lo = self.lo.max(other.lo);
        let hi = self.hi.min(other.hi);
        (lo <= hi).then_some(Self { v6: self.v6, lo, hi })
    }

    /// Split into the minimal list of CIDR blocks covering exactly this range
    fn to_cidrs(self) -> Vec<IpNet> {
        let bits: u32 = if self.v6 { 128 } else { 32 };
        let mut nets = Vec::new();
        let mut lo = self.lo;
        loop {
            let span = self.hi - lo;
            let fit = if span == u128::MAX {
                128
            } else {
                127 - (span + 1).leading_zeros()
            };
            let align = if lo == 0 { bits } else { lo.trailing_zeros() };
            let k = fit.min(align).min(bits);
            let block_end = if k == 128 {
                u128::MAX
            } else {
                lo + ((1u128 << k) - 1)
            };
            let prefix = (bits - k) as u8;
            let net = if self.v6 {
                Ipv6Net::new(Ipv6Addr::from(lo), prefix).ok().map(IpNet::V6)
            } else {
                u32::try_from(lo)
                    .ok()
                    .and_then(|a| Ipv4Net::new(Ipv4Addr::from(a), prefix).ok())
                    .map(IpNet::V4)
            };
            if let Some(net) = net {
                nets.push(net);
            }
            if block_end >= self.hi {
                break;
            }
            lo = block_end + 1;
        }
        nets
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RuleBox {
    protocol: Protocol,
    ports: (u16, u16),
    addrs: AddrRange,
}

fn resolve_port_range(start: i32, end: i32) -> (u16, u16) {
    let clamp = |p: i32| u16::try_from(p).unwrap_or(PORT_MAX);
    let lo = if start <= 0 { PORT_MIN } else { clamp(start) };
    let hi = if end <= 0 { PORT_MAX } else { clamp(end) };
    if lo <= hi { (lo, hi) } else { (hi, lo) }
}

fn boxes_of(rule: &GenericSecurityRule) -> Vec<RuleBox> {
    let addrs = AddrRange::from_net(&rule.cidr);
    let port_ranges: Vec<(u16, u16)> = if rule.protocol == Protocol::Any {
        vec![(PORT_MIN, PORT_MAX)]
    } else {
        match &rule.ports {
            PortSpec::All => vec![(PORT_MIN, PORT_MAX)],
            PortSpec::Range { start, end } => vec![resolve_port_range(*start, *end)],
            PortSpec::Discrete(ports) if ports.is_empty() => vec![(PORT_MIN, PORT_MAX)],
            PortSpec::Discrete(ports) => ports.iter().map(|p| (*p, *p)).collect(),
        }
    };
    port_ranges
        .into_iter()
        .map(|ports| RuleBox {
            protocol: rule.protocol.clone(),
            ports,
            addrs,
        })
        .collect()
}

/// `a - b`, as a list of disjoint boxes
fn subtract(a: &RuleBox, b: &RuleBox) -> Vec<RuleBox> {
    if a.protocol == Protocol::Any && b.protocol != Protocol::Any {
        let Some(overlap) = a.addrs.intersect(&b.addrs) else {
            return vec![a.clone()];
        };
        tracing::warn!(
            "Deny for {} inside an any-protocol allow: {} narrowed to tcp/udp/icmp",
            b.protocol,
            overlap
                .to_cidrs()
                .iter()
                .map(|n| n.to_string())
                .collect::<Vec<_>>()
                .join(",")
        );
        let mut pieces = outside(a, &overlap);
        pieces.extend(EXPANDED_PROTOCOLS.iter().flat_map(|protocol| {
            let piece = RuleBox {
                protocol: protocol.clone(),
                addrs: overlap,
                ..a.clone()
            };
            subtract(&piece, b)
        }));
        return pieces;
    }
    if b.protocol != Protocol::Any && a.protocol != b.protocol {
        return vec![a.clone()];
    }

    let Some(addrs) = a.addrs.intersect(&b.addrs) else {
        return vec![a.clone()];
    };
    let lo = a.ports.0.max(b.ports.0);
    let hi = a.ports.1.min(b.ports.1);
    if lo > hi {
        return vec![a.clone()];
    }

    let mut pieces = Vec::new();
    if a.ports.0 < lo {
        pieces.push(RuleBox {
            ports: (a.ports.0, lo - 1),
            ..a.clone()
        });
    }
    if hi < a.ports.1 {
        pieces.push(RuleBox {
            ports: (hi + 1, a.ports.1),
            ..a.clone()
        });
    }
    if a.addrs.lo < addrs.lo {
        pieces.push(RuleBox {
            ports: (lo, hi),
            addrs: AddrRange {
                hi: addrs.lo - 1,
                ..a.addrs
            },
            ..a.clone()
        });
    }
    if addrs.hi < a.addrs.hi {
        pieces.push(RuleBox {
            ports: (lo, hi),
            addrs: AddrRange {
                lo: addrs.hi + 1,
                ..a.addrs
            },
            ..a.clone()
        });
    }
    pieces
}

/// Parts of `a` whose addresses fall outside `overlap`
fn outside(a: &RuleBox, overlap: &AddrRange) -> Vec<RuleBox> {
    let mut pieces = Vec::new();
    if a.addrs.lo < overlap.lo {
        pieces.push(RuleBox {
            addrs: AddrRange {
                hi: overlap.lo - 1,
                ..a.addrs
            },
            ..a.clone()
        });
    }
    if overlap.hi < a.addrs.hi {
        pieces.push(RuleBox {
            addrs: AddrRange {
                lo: overlap.hi + 1,
                ..a.addrs
            },
            ..a.clone()
        });
    }
    pieces
}

fn evaluation_order(a: &GenericSecurityRule, b: &GenericSecurityRule) -> Ordering {
    let deny_first = |r: &GenericSecurityRule| match r.action {
        RuleAction::Deny => 0,
        RuleAction::Allow => 1,
    };
    a.priority
        .cmp(&b.priority)
        .then_with(|| deny_first(a).cmp(&deny_first(b)))
        .then_with(|| a.description.cmp(&b.description))
        .then_with(|| a.to_string().cmp(&b.to_string()))
}

/// Merge boxes that differ in exactly one dimension and touch in it
fn merge(mut boxes: Vec<(RuleBox, usize)>) -> Vec<(RuleBox, usize)> {
    loop {
        let mut merged = false;
        'outer: for i in 0..boxes.len() {
            for j in (i + 1)..boxes.len() {
                let (a, b) = (&boxes[i].0, &boxes[j].0);
                if a.protocol != b.protocol {
                    continue;
                }
                let joined = if a.addrs == b.addrs {
                    touching(a.ports.0 as u128, a.ports.1 as u128, b.ports.0 as u128, b.ports.1 as u128)
                        .map(|(lo, hi)| RuleBox {
                            ports: (lo as u16, hi as u16),
                            ..a.clone()
                        })
                } else if a.ports == b.ports && a.addrs.v6 == b.addrs.v6 {
                    touching(a.addrs.lo, a.addrs.hi, b.addrs.lo, b.addrs.hi).map(|(lo, hi)| RuleBox {
                        addrs: AddrRange { lo, hi, ..a.addrs },
                        ..a.clone()
                    })
                } else {
                    None
                };
                if let Some(joined) = joined {
                    let origin = boxes[i].1.min(boxes[j].1);
                    boxes.swap_remove(j);
                    boxes[i] = (joined, origin);
                    merged = true;
                    break 'outer;
                }
            }
        }
        if !merged {
            return boxes;
        }
    }
}

fn touching(a_lo: u128, a_hi: u128, b_lo: u128, b_hi: u128) -> Option<(u128, u128)> {
    let (first_lo, first_hi, second_lo, second_hi) = if a_lo <= b_lo {
        (a_lo, a_hi, b_lo, b_hi)
    } else {
        (b_lo, b_hi, a_lo, a_hi)
    };
    if first_hi == u128::MAX || second_lo <= first_hi + 1 {
        Some((first_lo, first_hi.max(second_hi)))
    } else {
        None
    }
}

fn port_spec(b: &RuleBox) -> PortSpec {
    if b.protocol == Protocol::Any || b.ports == (PORT_MIN, PORT_MAX) {
        return PortSpec::All;
    }
    // icmp and friends spell an open upper end as -1
    let end = if !b.protocol.has_ports() && b.ports.1 == PORT_MAX {
        -1
    } else {
        i32::from(b.ports.1)
    };
    PortSpec::Range {
        start: i32::from(b.ports.0),
        end,
    }
}

fn to_rules(
    boxes: Vec<(RuleBox, usize)>,
    direction: Direction,
    sources: &[&GenericSecurityRule],
) -> Vec<GenericSecurityRule> {
    let mut rules = Vec::new();
    for (b, origin) in boxes {
        let source = sources[origin];
        let ports = port_spec(&b);
        for cidr in b.addrs.to_cidrs() {
            rules.push(GenericSecurityRule {
                priority: source.priority,
                direction,
                action: RuleAction::Allow,
                protocol: b.protocol.clone(),
                ports: ports.clone(),
                cidr,
                description: source.description.clone(),
            });
        }
    }
    rules
}

fn flatten_direction(direction: Direction, rules: &[&GenericSecurityRule]) -> Vec<GenericSecurityRule> {
    let mut ordered: Vec<&GenericSecurityRule> = rules.to_vec();
    ordered.sort_by(|a, b| evaluation_order(a, b));

    let mut denies: Vec<RuleBox> = Vec::new();
    let mut allowed: Vec<(RuleBox, usize)> = Vec::new();
    for (index, rule) in ordered.iter().enumerate() {
        let boxes = boxes_of(rule);
        if rule.action == RuleAction::Deny {
            denies.extend(boxes);
            continue;
        }
        let mut pieces = boxes;
        for deny in &denies {
            pieces = pieces.iter().flat_map(|p| subtract(p, deny)).collect();
            if pieces.is_empty() {
                break;
            }
        }
        allowed.extend(pieces.into_iter().map(|p| (p, index)));
    }

    let mut rules = to_rules(merge(allowed), direction, &ordered);
    rules.sort_by(|a, b| {
        a.protocol
            .cmp(&b.protocol)
            .then_with(|| a.cidr.cmp(&b.cidr))
            .then_with(|| a.ports.to_string().cmp(&b.ports.to_string()))
            .then_with(|| a.priority.cmp(&b.priority))
            .then_with(|| a.description.cmp(&b.description))
    });
    rules.dedup_by(|a, b| a.protocol == b.protocol && a.cidr == b.cidr && a.ports == b.ports);
    rules
}

/// Reduce a prioritized allow/deny rule set to an equivalent allow-only set.
///
/// The output does not depend on the order of `rules` beyond their priority
/// values, and is sorted per direction (ingress first).
pub fn flatten_to_allow(rules: &[GenericSecurityRule]) -> Vec<GenericSecurityRule> {
    let mut result = Vec::new();
    for direction in [Direction::Ingress, Direction::Egress] {
        let partition: Vec<&GenericSecurityRule> =
            rules.iter().filter(|r| r.direction == direction).collect();
        if partition.is_empty() {
            continue;
        }
        let flattened = flatten_direction(direction, &partition);
        tracing::debug!(
            "Flattened {} {} rules into {} allow rules",
            partition.len(),
            direction,
            flattened.len()
        );
        result.extend(flattened);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(text: &str, priority: i32) -> GenericSecurityRule {
        text.parse::<GenericSecurityRule>()
            .unwrap()
            .with_priority(priority)
    }

    fn texts(rules: &[GenericSecurityRule]) -> Vec<String> {
        rules.iter().map(|r| r.to_string()).collect()
    }

    #[test]
    fn test_allow_only_input_is_preserved() {
        let rules = vec![rule("in:allow tcp 22", 1), rule("in:allow udp 53", 2)];
        let flat = flatten_to_allow(&rules);
        assert_eq!(texts(&flat), vec!["in:allow tcp 22", "in:allow udp 53"]);
    }

    #[test]
    fn test_higher_priority_deny_carves_port_range() {
        let rules = vec![
            rule("in:deny tcp 22", 1),
            rule("in:allow tcp 20-25", 2),
        ];
        let flat = flatten_to_allow(&rules);
        assert_eq!(texts(&flat), vec!["in:allow tcp 20-21", "in:allow tcp 23-25"]);
    }

    #[test]
    fn test_lower_priority_deny_has_no_effect() {
        let rules = vec![
            rule("in:allow tcp 22", 1),
            rule("in:deny tcp 22", 2),
        ];
        let flat = flatten_to_allow(&rules);
        assert_eq!(texts(&flat), vec!["in:allow tcp 22"]);
    }

    #[test]
    fn test_deny_wins_on_priority_tie() {
        let rules = vec![rule("in:allow tcp 22", 5), rule("in:deny tcp 22", 5)];
        assert!(flatten_to_allow(&rules).is_empty());
    }

    #[test]
    fn test_deny_carves_address_space() {
        let rules = vec![
            rule("in:deny 10.0.0.0/25 tcp 443", 1),
            rule("in:allow 10.0.0.0/24 tcp 443", 2),
        ];
        let flat = flatten_to_allow(&rules);
        assert_eq!(texts(&flat), vec!["in:allow 10.0.0.128/25 tcp 443"]);
    }

    #[test]
    fn test_specific_deny_splits_any_protocol() {
        let rules = vec![rule("in:deny tcp", 1), rule("in:allow any", 2)];
        let flat = flatten_to_allow(&rules);
        assert_eq!(texts(&flat), vec!["in:allow udp", "in:allow icmp"]);
    }

    #[test]
    fn test_any_protocol_survives_outside_deny_addresses() {
        let rules = vec![
            rule("in:deny 10.0.0.0/9 tcp 22", 1),
            rule("in:allow 10.0.0.0/8 any", 2),
        ];
        let flat = flatten_to_allow(&rules);
        assert_eq!(
            texts(&flat),
            vec![
                "in:allow 10.128.0.0/9 any",
                "in:allow 10.0.0.0/9 tcp 0-21",
                "in:allow 10.0.0.0/9 tcp 23-65535",
                "in:allow 10.0.0.0/9 udp",
                "in:allow 10.0.0.0/9 icmp",
            ]
        );
    }

    #[test]
    fn test_icmp_type_is_kept() {
        let flat = flatten_to_allow(&[rule("in:allow icmp 8", 1)]);
        assert_eq!(texts(&flat), vec!["in:allow icmp 8"]);
        assert_eq!(flat[0].ports, PortSpec::Range { start: 8, end: 8 });

        let open_code = GenericSecurityRule::new(
            Direction::Ingress,
            RuleAction::Allow,
            Protocol::Icmp,
            "0.0.0.0/0".parse().unwrap(),
        )
        .with_ports(PortSpec::range(3, -1));
        let flat = flatten_to_allow(&[open_code]);
        assert_eq!(flat[0].ports, PortSpec::Range { start: 3, end: -1 });
    }

    #[test]
    fn test_deny_carves_icmp_types() {
        let rules = vec![rule("in:deny icmp 8", 1), rule("in:allow icmp", 2)];
        let flat = flatten_to_allow(&rules);
        assert_eq!(flat.len(), 2);
        assert_eq!(flat[0].ports, PortSpec::Range { start: 0, end: 7 });
        assert_eq!(flat[1].ports, PortSpec::Range { start: 9, end: -1 });
    }

    #[test]
    fn test_equal_boxes_pick_description_independent_of_order() {
        let a = rule("in:allow tcp 22", 5).with_description("ops");
        let b = rule("in:allow tcp 22", 5).with_description("admin");
        let forward = flatten_to_allow(&[a.clone(), b.clone()]);
        let backward = flatten_to_allow(&[b, a]);
        assert_eq!(forward, backward);
        assert_eq!(forward.len(), 1);
        assert_eq!(forward[0].description, "admin");
    }

    #[test]
    fn test_directions_are_independent() {
        let rules = vec![rule("out:deny any", 1), rule("in:allow tcp 80", 2)];
        let flat = flatten_to_allow(&rules);
        assert_eq!(texts(&flat), vec!["in:allow tcp 80"]);
    }

    #[test]
    fn test_order_independence() {
        let a = vec![
            rule("in:allow 10.0.0.0/8 tcp 1-1024", 3),
            rule("in:deny 10.1.0.0/16 tcp", 1),
            rule("in:allow udp 53", 2),
        ];
        let mut b = a.clone();
        b.reverse();
        assert_eq!(flatten_to_allow(&a), flatten_to_allow(&b));
    }

    #[test]
    fn test_adjacent_ranges_merge() {
        let rules = vec![rule("in:allow tcp 80-89", 1), rule("in:allow tcp 90-99", 1)];
        let flat = flatten_to_allow(&rules);
        assert_eq!(texts(&flat), vec!["in:allow tcp 80-99"]);
    }

    #[test]
    fn test_range_to_cidrs() {
        let range = AddrRange {
            v6: false,
            lo: u128::from(u32::from(Ipv4Addr::new(10, 0, 0, 1))),
            hi: u128::from(u32::from(Ipv4Addr::new(10, 0, 0, 6))),
        };
        let nets: Vec<String> = range.to_cidrs().iter().map(|n| n.to_string()).collect();
        assert_eq!(
            nets,
            vec!["10.0.0.1/32", "10.0.0.2/31", "10.0.0.4/31", "10.0.0.6/32"]
        );
    }

    #[test]
    fn test_full_ipv6_range() {
        let net: IpNet = "::/0".parse().unwrap();
        let nets = AddrRange::from_net(&net).to_cidrs();
        assert_eq!(nets, vec![net]);
    }
}

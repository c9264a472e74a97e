//! Path diversity predicates.
//!
//! Two relays must not share a path if either declares the other as family,
//! or if both sit in the same IPv4 /16 network.
//!
//! Family declarations are honored from either side. Real families should be
//! mutual, but a one-sided declaration is still treated as a link.
//!
//! Addresses that are missing, IPv6, or unparseable never link two relays.

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;

use crate::node::Node;
use crate::node_selection::NodeRestriction;

/// Prefix length used for the coarse location check.
pub const SUBNET_PREFIX: u8 = 16;

/// Returns true if either node lists the other in its family.
pub fn same_family(a: &Node, b: &Node) -> bool {
    a.family.contains(&b.fingerprint) || b.family.contains(&a.fingerprint)
}

/// Returns true if both nodes have IPv4 addresses in the same /16.
pub fn same_coarse_location(a: &Node, b: &Node) -> bool {
    match (coarse_network(&a.address), coarse_network(&b.address)) {
        (Some(net_a), Some(net_b)) => net_a == net_b,
        _ => false,
    }
}

fn coarse_network(address: &str) -> Option<Ipv4Addr> {
    let addr: Ipv4Addr = address.trim().parse().ok()?;
    Ipv4Network::new(addr, SUBNET_PREFIX)
        .ok()
        .map(|net| net.network())
}

/// Returns true if `candidate` may join a path already holding `chosen`.
pub fn is_eligible(candidate: &Node, chosen: &[&Node]) -> bool {
    chosen.iter().all(|c| {
        c.fingerprint != candidate.fingerprint
            && !same_family(candidate, c)
            && !same_coarse_location(candidate, c)
    })
}

/// [`NodeRestriction`] accepting only nodes eligible against a partial path.
pub struct DiversityRestriction<'p> {
    chosen: &'p [&'p Node],
}

impl<'p> DiversityRestriction<'p> {
    /// Creates a restriction against the given partial path.
    pub fn new(chosen: &'p [&'p Node]) -> Self {
        Self { chosen }
    }
}

impl NodeRestriction for DiversityRestriction<'_> {
    fn r_is_ok(&self, node: &Node) -> bool {
        is_eligible(node, self.chosen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::test_support::{fp, node};

    #[test]
    fn test_family_either_direction() {
        let mut a = node(1, &[], 1.0);
        let b = node(2, &[], 1.0);
        assert!(!same_family(&a, &b));

        a.family.insert(fp(2));
        assert!(same_family(&a, &b));
        assert!(same_family(&b, &a));
    }

    #[test]
    fn test_same_slash16() {
        let mut a = node(1, &[], 1.0);
        let mut b = node(2, &[], 1.0);
        a.address = "192.168.4.1".to_string();
        b.address = "192.168.200.9".to_string();
        assert!(same_coarse_location(&a, &b));

        b.address = "192.169.4.1".to_string();
        assert!(!same_coarse_location(&a, &b));
    }

    #[test]
    fn test_unparseable_addresses_never_match() {
        let mut a = node(1, &[], 1.0);
        let mut b = node(2, &[], 1.0);
        for (x, y) in [
            ("", ""),
            ("2001:db8::1", "2001:db8::1"),
            ("not-an-ip", "not-an-ip"),
            ("10.1", "10.1"),
            ("10.1.2.3", "garbage"),
        ] {
            a.address = x.to_string();
            b.address = y.to_string();
            assert!(!same_coarse_location(&a, &b), "{} vs {}", x, y);
        }
    }

    #[test]
    fn test_is_eligible() {
        let entry = node(1, &[], 1.0);
        let mut middle = node(2, &[], 1.0);
        middle.family.insert(fp(7));
        let chosen = [&entry, &middle];

        assert!(!is_eligible(&entry, &chosen));
        assert!(is_eligible(&node(3, &[], 1.0), &chosen));

        let family_member = node(7, &[], 1.0);
        assert!(!is_eligible(&family_member, &chosen));

        let mut neighbour = node(4, &[], 1.0);
        neighbour.address = entry.address.replace(".0.1", ".77.2");
        assert!(!is_eligible(&neighbour, &chosen));

        assert!(is_eligible(&entry, &[]));
    }

    #[test]
    fn test_diversity_restriction_filters() {
        let entry = node(1, &[], 1.0);
        let chosen = [&entry];
        let restriction = DiversityRestriction::new(&chosen);
        let other = node(2, &[], 1.0);

        let kept = restriction.filter(&[&entry, &other]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].fingerprint, fp(2));
    }
}

//! Relay records and the immutable catalog built from one network snapshot.
//!
//! # Overview
//!
//! - [`Fingerprint`]: normalized 40-character relay identity, the only key used
//!   for membership and identity checks anywhere in the crate
//! - [`Node`]: a candidate relay (flags, bandwidth, address, family)
//! - [`Catalog`]: the deduplicated nodes of one snapshot with a fingerprint index
//!
//! Nodes are plain value records. Once a [`Catalog`] is built nothing mutates
//! it; classification and path building only borrow from it.
//!
//! # Example
//!
//! ```rust
//! use relaypath::{Catalog, Fingerprint, Node};
//!
//! let fp = Fingerprint::parse("aabbccdd00112233445566778899aabbccddeeff")?;
//! let mut node = Node::new(fp.clone());
//! node.flags = vec!["Guard".to_string(), "Fast".to_string()];
//! node.bandwidth = 5000.0;
//!
//! let catalog = Catalog::new(vec![node]);
//! assert!(catalog.get(&fp).is_some());
//! assert_eq!(fp.as_str(), "AABBCCDD00112233445566778899AABBCCDDEEFF");
//! # Ok::<(), relaypath::Error>(())
//! ```

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stem_rs::descriptor::router_status::RouterStatusEntry;
use tracing::debug;

use crate::error::{Error, Result};
use crate::node_selection::is_valid_fingerprint;

/// Flag marking a relay as suitable for the entry position.
pub const FLAG_GUARD: &str = "Guard";
/// Flag marking a relay as suitable for the exit position.
pub const FLAG_EXIT: &str = "Exit";
/// Flag marking a relay as fast.
pub const FLAG_FAST: &str = "Fast";
/// Flag marking a relay as stable.
pub const FLAG_STABLE: &str = "Stable";

/// A relay identity fingerprint.
///
/// Always 40 upper-case hexadecimal characters. Construction through
/// [`Fingerprint::parse`] (or serde) validates and normalizes the input, so two
/// fingerprints compare equal exactly when they name the same relay.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Parses a fingerprint, accepting an optional leading `$` as used in
    /// Tor family declarations.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the input is not 40 hex characters.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let s = s.strip_prefix('$').unwrap_or(s);
        if !is_valid_fingerprint(s) {
            return Err(Error::Validation(format!("invalid fingerprint: {}", s)));
        }
        Ok(Self(s.to_ascii_uppercase()))
    }

    /// Returns the normalized hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Fingerprint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<Fingerprint> for String {
    fn from(fp: Fingerprint) -> Self {
        fp.0
    }
}

/// A candidate relay.
///
/// Every field except the fingerprint has a default, so snapshots that omit
/// addresses, bandwidth or flags still load. Raw data is kept as-is: the
/// address may be empty or malformed and the bandwidth may be negative. The
/// selection code is responsible for tolerating both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Relay identity.
    pub fingerprint: Fingerprint,
    /// Operator-chosen nickname. Not unique.
    #[serde(default)]
    pub nickname: String,
    /// Address as published; not guaranteed to parse.
    #[serde(default)]
    pub address: String,
    /// OR port.
    #[serde(default)]
    pub or_port: u16,
    /// Selection weight.
    #[serde(default)]
    pub bandwidth: f64,
    /// Flags assigned by the directory authorities.
    #[serde(default)]
    pub flags: Vec<String>,
    /// Result of the relay's exit policy check, when known.
    #[serde(default)]
    pub exit_policy_allows: Option<bool>,
    /// Relays this one declares as family.
    #[serde(default)]
    pub family: BTreeSet<Fingerprint>,
    /// When the relay's descriptor was published.
    #[serde(default)]
    pub published: Option<DateTime<Utc>>,
}

impl Node {
    /// Creates a node with the given fingerprint and all other fields defaulted.
    pub fn new(fingerprint: Fingerprint) -> Self {
        Self {
            fingerprint,
            nickname: String::new(),
            address: String::new(),
            or_port: 0,
            bandwidth: 0.0,
            flags: Vec::new(),
            exit_policy_allows: None,
            family: BTreeSet::new(),
            published: None,
        }
    }

    /// Returns true if the node carries `flag`.
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }

    /// Returns true if the node may be used as an entry.
    pub fn is_entry_capable(&self) -> bool {
        self.has_flag(FLAG_GUARD)
    }

    /// Returns true if the node may be used as an exit.
    ///
    /// The `Exit` flag decides when present; otherwise the exit policy result
    /// is consulted.
    pub fn is_exit_capable(&self) -> bool {
        self.has_flag(FLAG_EXIT) || self.exit_policy_allows == Some(true)
    }

    /// Returns the bandwidth if it is usable as a selection weight.
    pub fn valid_weight(&self) -> Option<f64> {
        (self.bandwidth.is_finite() && self.bandwidth >= 0.0).then_some(self.bandwidth)
    }

    /// Returns a one-line description used in hop listings.
    pub fn describe(&self) -> String {
        format!(
            "{} ({}) - {}:{}",
            self.nickname, self.fingerprint, self.address, self.or_port
        )
    }
}

impl TryFrom<&RouterStatusEntry> for Node {
    type Error = Error;

    /// Converts a consensus router status entry.
    ///
    /// The measured bandwidth is preferred over the self-advertised one.
    /// Router status entries carry neither family nor exit policy, so those
    /// fields stay empty.
    fn try_from(router: &RouterStatusEntry) -> Result<Self> {
        let mut node = Node::new(Fingerprint::parse(&router.fingerprint)?);
        node.nickname = router.nickname.clone();
        node.address = router.address.to_string();
        node.or_port = router.or_port;
        node.bandwidth = router.measured.or(router.bandwidth).unwrap_or(0) as f64;
        node.flags = router.flags.clone();
        Ok(node)
    }
}

/// The nodes of one snapshot, indexed by fingerprint.
///
/// Duplicate fingerprints are collapsed: the first occurrence wins.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    nodes: Vec<Node>,
    index: HashMap<Fingerprint, usize>,
}

impl Catalog {
    /// Builds a catalog from snapshot nodes, preserving snapshot order.
    pub fn new(snapshot: Vec<Node>) -> Self {
        let mut nodes = Vec::with_capacity(snapshot.len());
        let mut index = HashMap::with_capacity(snapshot.len());

        for node in snapshot {
            if index.contains_key(&node.fingerprint) {
                debug!("Dropping duplicate snapshot entry for {}", node.fingerprint);
                continue;
            }
            index.insert(node.fingerprint.clone(), nodes.len());
            nodes.push(node);
        }

        Self { nodes, index }
    }

    /// Looks up a node by fingerprint.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<&Node> {
        self.index.get(fingerprint).map(|&i| &self.nodes[i])
    }

    /// Returns true if the catalog contains `fingerprint`.
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.index.contains_key(fingerprint)
    }

    /// Returns all nodes in snapshot order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Number of distinct nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the snapshot had no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Resolves a list of fingerprints to nodes, skipping unknown ones.
    pub fn resolve<'a>(&'a self, fingerprints: &[Fingerprint]) -> Vec<&'a Node> {
        fingerprints.iter().filter_map(|fp| self.get(fp)).collect()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Fingerprint derived from a small integer.
    pub fn fp(i: u32) -> Fingerprint {
        Fingerprint::parse(&format!("{:040X}", i)).unwrap()
    }

    /// Node with a unique fingerprint, distinct /16 and the given flags and bandwidth.
    pub fn node(i: u32, flags: &[&str], bandwidth: f64) -> Node {
        let mut n = Node::new(fp(i));
        n.nickname = format!("relay{}", i);
        n.address = format!("{}.{}.0.1", 10 + i / 256, i % 256);
        n.or_port = 9001;
        n.bandwidth = bandwidth;
        n.flags = flags.iter().map(|f| f.to_string()).collect();
        n
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_fingerprint_normalization() {
        let lower = Fingerprint::parse("aabbccdd00112233445566778899aabbccddeeff").unwrap();
        let dollar = Fingerprint::parse("$AABBCCDD00112233445566778899AABBCCDDEEFF").unwrap();
        assert_eq!(lower, dollar);
        assert_eq!(lower.to_string(), "AABBCCDD00112233445566778899AABBCCDDEEFF");
    }

    #[test]
    fn test_fingerprint_rejects_invalid() {
        assert!(Fingerprint::parse("").is_err());
        assert!(Fingerprint::parse("AABB").is_err());
        assert!(Fingerprint::parse(&"G".repeat(40)).is_err());
        assert!(matches!(
            Fingerprint::parse("nickname"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_exit_capability_uses_policy_when_unflagged() {
        let mut n = node(1, &[], 100.0);
        assert!(!n.is_exit_capable());
        n.exit_policy_allows = Some(true);
        assert!(n.is_exit_capable());
        n.exit_policy_allows = Some(false);
        n.flags.push(FLAG_EXIT.to_string());
        assert!(n.is_exit_capable());
    }

    #[test]
    fn test_valid_weight() {
        let mut n = node(1, &[], 10.0);
        assert_eq!(n.valid_weight(), Some(10.0));
        n.bandwidth = -1.0;
        assert_eq!(n.valid_weight(), None);
        n.bandwidth = f64::NAN;
        assert_eq!(n.valid_weight(), None);
        n.bandwidth = 0.0;
        assert_eq!(n.valid_weight(), Some(0.0));
    }

    #[test]
    fn test_catalog_deduplicates_by_fingerprint() {
        let first = node(1, &["Guard"], 10.0);
        let mut second = node(1, &["Exit"], 99.0);
        second.nickname = "imposter".to_string();

        let catalog = Catalog::new(vec![first.clone(), second, node(2, &[], 1.0)]);
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get(&fp(1)), Some(&first));
        assert!(catalog.contains(&fp(2)));
        assert!(!catalog.contains(&fp(3)));
    }

    #[test]
    fn test_resolve_preserves_order() {
        let catalog = Catalog::new(vec![node(1, &[], 1.0), node(2, &[], 1.0)]);
        let resolved = catalog.resolve(&[fp(2), fp(9), fp(1)]);
        let fps: Vec<_> = resolved.iter().map(|n| n.fingerprint.clone()).collect();
        assert_eq!(fps, vec![fp(2), fp(1)]);
    }

    #[test]
    fn test_partial_toml_node_deserializes() {
        let node: Node =
            toml::from_str(r#"fingerprint = "aabbccdd00112233445566778899aabbccddeeff""#).unwrap();
        assert_eq!(node.bandwidth, 0.0);
        assert!(node.address.is_empty());
        assert!(node.family.is_empty());
        assert!(node.published.is_none());
    }

    #[test]
    fn test_from_router_status_entry() {
        use stem_rs::descriptor::router_status::RouterStatusEntryType;

        let mut router = RouterStatusEntry::new(
            RouterStatusEntryType::V3,
            "moria".to_string(),
            "B".repeat(40),
            Utc::now(),
            "192.0.2.7".parse().unwrap(),
            9001,
        );
        router.flags = vec!["Guard".to_string(), "Fast".to_string()];
        router.bandwidth = Some(100);
        router.measured = Some(250);

        let node = Node::try_from(&router).unwrap();
        assert_eq!(node.nickname, "moria");
        assert_eq!(node.address, "192.0.2.7");
        assert_eq!(node.or_port, 9001);
        assert_eq!(node.bandwidth, 250.0);
        assert!(node.is_entry_capable());
    }
}

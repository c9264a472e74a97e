//! Role classification of a snapshot into entry, middle and exit pools.
//!
//! # Classification Rules
//!
//! | Entry-capable | Exit-capable | Pools |
//! |---------------|--------------|-------|
//! | yes | yes | entry, exit |
//! | yes | no | entry |
//! | no | yes | exit |
//! | no | no | middle |
//!
//! Entry capability is the `Guard` flag. Exit capability is the `Exit` flag,
//! or a permissive exit policy when the flag is absent.
//!
//! # Fallback Promotion
//!
//! ```text
//!   entry pool empty and middle pool non-empty
//!        │
//!        ▼
//!   sort middle by bandwidth (descending, stable)
//!        │
//!        ▼
//!   entry = top max(⌊|middle| / 10⌋, 5)     (all of them if fewer than 5)
//! ```
//!
//! The exit pool is filled the same way, independently. Promoted relays stay
//! in the middle pool as well. An empty pool is never an error here; path
//! construction reports it if nothing could be promoted.

use std::collections::HashSet;

use serde::Serialize;
use tracing::{info, warn};

use crate::node::{Catalog, Fingerprint, Node};

/// Minimum number of middle relays promoted into an empty role pool.
pub const MIN_FALLBACK_PROMOTION: usize = 5;

/// Fraction (as a divisor) of the middle pool promoted into an empty role pool.
pub const FALLBACK_PROMOTION_DIVISOR: usize = 10;

/// Role pools derived from one snapshot.
///
/// Pools hold fingerprints in snapshot order. A fingerprint can appear in
/// several pools but never twice in the same pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RolePools {
    /// Entry-capable relays.
    pub entry: Vec<Fingerprint>,
    /// Relays with neither entry nor exit capability.
    pub middle: Vec<Fingerprint>,
    /// Exit-capable relays.
    pub exit: Vec<Fingerprint>,
    /// True if `entry` was filled by fallback promotion.
    pub entry_promoted: bool,
    /// True if `exit` was filled by fallback promotion.
    pub exit_promoted: bool,
}

/// Partitions `nodes` into role pools.
///
/// Duplicate fingerprints after the first are ignored. The result depends only
/// on the input, so classifying the same snapshot twice gives identical pools.
pub fn classify(nodes: &[Node]) -> RolePools {
    let mut pools = RolePools::default();
    let mut seen = HashSet::with_capacity(nodes.len());
    let mut middle_nodes: Vec<&Node> = Vec::new();

    for node in nodes {
        if !seen.insert(&node.fingerprint) {
            continue;
        }

        let is_entry = node.is_entry_capable();
        let is_exit = node.is_exit_capable();

        if is_entry {
            pools.entry.push(node.fingerprint.clone());
        }
        if is_exit {
            pools.exit.push(node.fingerprint.clone());
        }
        if !is_entry && !is_exit {
            pools.middle.push(node.fingerprint.clone());
            middle_nodes.push(node);
        }
    }

    info!(
        "Classified relays - Entry: {}, Middle: {}, Exit: {}",
        pools.entry.len(),
        pools.middle.len(),
        pools.exit.len()
    );

    if pools.entry.is_empty() && !middle_nodes.is_empty() {
        pools.entry = promote_fastest(&middle_nodes);
        pools.entry_promoted = true;
        warn!(
            "No entry relays found, promoted {} fastest middle relays",
            pools.entry.len()
        );
    }

    if pools.exit.is_empty() && !middle_nodes.is_empty() {
        pools.exit = promote_fastest(&middle_nodes);
        pools.exit_promoted = true;
        warn!(
            "No exit relays found, promoted {} fastest middle relays",
            pools.exit.len()
        );
    }

    pools
}

/// Returns the fingerprints of the highest-bandwidth middles, as many as the
/// fallback rule allows.
fn promote_fastest(middle: &[&Node]) -> Vec<Fingerprint> {
    let mut sorted = middle.to_vec();
    sorted.sort_by(|a, b| rank_weight(b).total_cmp(&rank_weight(a)));

    let count = (sorted.len() / FALLBACK_PROMOTION_DIVISOR).max(MIN_FALLBACK_PROMOTION);
    sorted
        .into_iter()
        .take(count)
        .map(|n| n.fingerprint.clone())
        .collect()
}

fn rank_weight(node: &Node) -> f64 {
    node.valid_weight().unwrap_or(0.0)
}

impl Catalog {
    /// Classifies the catalog's nodes into role pools.
    pub fn classify(&self) -> RolePools {
        classify(self.nodes())
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::node::test_support::node;
    use proptest::prelude::*;

    fn arb_flags() -> impl Strategy<Value = Vec<&'static str>> {
        prop::sample::subsequence(vec!["Guard", "Exit", "Fast", "Stable"], 0..=4)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn pools_only_contain_input_nodes(
            specs in prop::collection::vec((arb_flags(), 0.0f64..10000.0), 0..60),
        ) {
            let nodes: Vec<Node> = specs
                .iter()
                .enumerate()
                .map(|(i, (flags, bw))| node(i as u32, flags, *bw))
                .collect();
            let input: HashSet<_> = nodes.iter().map(|n| n.fingerprint.clone()).collect();
            let pools = classify(&nodes);

            for pool in [&pools.entry, &pools.middle, &pools.exit] {
                let unique: HashSet<_> = pool.iter().collect();
                prop_assert_eq!(unique.len(), pool.len());
                for fp in pool {
                    prop_assert!(input.contains(fp));
                }
            }

            for n in &nodes {
                if n.is_entry_capable() && n.is_exit_capable() {
                    prop_assert!(pools.entry.contains(&n.fingerprint));
                    prop_assert!(pools.exit.contains(&n.fingerprint));
                    prop_assert!(!pools.middle.contains(&n.fingerprint));
                }
            }

            prop_assert_eq!(classify(&nodes), pools);
        }
    }
}

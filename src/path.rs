//! Path construction: entry, middles, exit.
//!
//! # Build Steps
//!
//! ```text
//!   classify(catalog)
//!        │
//!        ▼
//!   ┌──────────┐   entry pool ∩ {Fast, Stable}  ──empty──▶ entry pool
//!   │  Entry   │                                            │ empty
//!   └────┬─────┘                                            ▼
//!        │                                          NoEntryAvailable
//!        ▼
//!   ┌──────────┐   (middle ∪ entry) − path, diverse vs path
//!   │ Middle × │        │ empty
//!   │ hops − 2 │        ▼
//!   └────┬─────┘   (middle ∪ entry) − path  ──empty──▶ NoMiddleAvailable(pos)
//!        │
//!        ▼
//!   ┌──────────┐   exit − path, diverse vs path
//!   │   Exit   │        │ empty
//!   └────┬─────┘        ▼
//!        │         exit − path  ──empty──▶ NoExitAvailable
//!        ▼
//!      Path
//! ```
//!
//! Every step draws with [`select_weighted`]. A failed step discards the partial
//! path; nothing is resumed.

use std::collections::HashSet;
use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, warn};

use crate::classify::RolePools;
use crate::config::PathConfig;
use crate::diversity::DiversityRestriction;
use crate::error::{Error, Result};
use crate::node::{Catalog, Fingerprint, Node};
use crate::node_selection::{select_weighted, FlagsRestriction, NodeRestriction};

/// Default number of hops in a path.
pub const DEFAULT_HOP_COUNT: usize = 4;

/// Smallest accepted hop count: an entry and an exit.
pub const MIN_HOP_COUNT: usize = 2;

/// An ordered list of distinct relays, entry first and exit last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Path {
    hops: Vec<Fingerprint>,
}

impl Path {
    /// Returns the hop fingerprints in order.
    pub fn fingerprints(&self) -> &[Fingerprint] {
        &self.hops
    }

    /// Number of hops.
    pub fn len(&self) -> usize {
        self.hops.len()
    }

    /// Always false for a built path.
    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    /// The first hop.
    pub fn entry(&self) -> Option<&Fingerprint> {
        self.hops.first()
    }

    /// The last hop.
    pub fn exit(&self) -> Option<&Fingerprint> {
        self.hops.last()
    }

    /// Returns true if `fingerprint` is one of the hops.
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.hops.contains(fingerprint)
    }
}

impl fmt::Display for Path {
    /// Comma-separated `$FINGERPRINT` list, as accepted by Tor's `EXTENDCIRCUIT`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .hops
            .iter()
            .map(|fp| format!("${}", fp))
            .collect::<Vec<_>>()
            .join(",");
        f.write_str(&joined)
    }
}

/// Builds paths from a catalog.
///
/// The builder owns the random generator used for every draw, so one builder
/// corresponds to one stream of randomness.
///
/// # Example
///
/// ```rust
/// use rand::SeedableRng;
/// use rand::rngs::StdRng;
/// use relaypath::{Catalog, Fingerprint, Node, PathBuilder, PathConfig};
///
/// let nodes: Vec<Node> = (0..12u32)
///     .map(|i| {
///         let mut n = Node::new(Fingerprint::parse(&format!("{:040X}", i)).unwrap());
///         n.address = format!("10.{}.0.1", i);
///         n.bandwidth = 100.0;
///         n.flags = match i % 3 {
///             0 => vec!["Guard".into(), "Fast".into(), "Stable".into()],
///             1 => vec!["Exit".into()],
///             _ => vec![],
///         };
///         n
///     })
///     .collect();
///
/// let catalog = Catalog::new(nodes);
/// let mut builder = PathBuilder::with_rng(PathConfig::default(), StdRng::seed_from_u64(1));
/// let path = builder.build_path(&catalog, 4)?;
/// assert_eq!(path.len(), 4);
/// # Ok::<(), relaypath::Error>(())
/// ```
pub struct PathBuilder<R = StdRng> {
    rng: R,
    entry_restriction: FlagsRestriction,
    last_build_relaxed: bool,
    build_count: u64,
}

impl PathBuilder<StdRng> {
    /// Creates a builder seeded from the operating system.
    pub fn new(config: PathConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }
}

impl<R: Rng> PathBuilder<R> {
    /// Creates a builder with a caller-supplied generator.
    pub fn with_rng(config: PathConfig, rng: R) -> Self {
        Self {
            rng,
            entry_restriction: FlagsRestriction::new(config.entry_flags, Vec::new()),
            last_build_relaxed: false,
            build_count: 0,
        }
    }

    /// True if the most recent successful build had to drop the diversity
    /// filter for at least one hop.
    pub fn last_build_relaxed(&self) -> bool {
        self.last_build_relaxed
    }

    /// Number of `build_path` calls made so far, successful or not.
    pub fn build_count(&self) -> u64 {
        self.build_count
    }

    /// Builds a path of `hop_count` relays from `catalog`.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] if `hop_count` is below [`MIN_HOP_COUNT`]
    /// - [`Error::NoEntryAvailable`], [`Error::NoMiddleAvailable`],
    ///   [`Error::NoExitAvailable`] when the catalog cannot fill a position
    pub fn build_path(&mut self, catalog: &Catalog, hop_count: usize) -> Result<Path> {
        self.build_count += 1;
        if hop_count < MIN_HOP_COUNT {
            return Err(Error::Validation(format!(
                "hop count must be at least {}, got {}",
                MIN_HOP_COUNT, hop_count
            )));
        }

        self.last_build_relaxed = false;
        let pools = catalog.classify();
        let mut chosen: Vec<&Node> = Vec::with_capacity(hop_count);

        let entry = self.select_entry(catalog, &pools)?;
        debug!("Selected entry {}", entry.fingerprint);
        chosen.push(entry);

        let middle_candidates = middle_candidates(catalog, &pools);
        for position in 2..hop_count {
            let middle = self
                .select_diverse(&middle_candidates, &chosen)
                .ok_or(Error::NoMiddleAvailable { position })??;
            debug!("Selected middle {} for hop {}", middle.fingerprint, position);
            chosen.push(middle);
        }

        let exit_candidates = catalog.resolve(&pools.exit);
        let exit = self
            .select_diverse(&exit_candidates, &chosen)
            .ok_or(Error::NoExitAvailable)??;
        debug!("Selected exit {}", exit.fingerprint);
        chosen.push(exit);

        Ok(Path {
            hops: chosen.iter().map(|n| n.fingerprint.clone()).collect(),
        })
    }

    fn select_entry<'c>(&mut self, catalog: &'c Catalog, pools: &RolePools) -> Result<&'c Node> {
        let entry_pool = catalog.resolve(&pools.entry);
        let preferred = self.entry_restriction.filter(&entry_pool);

        let candidates = if preferred.is_empty() {
            if !entry_pool.is_empty() {
                debug!("No entry relay carries the preferred flags, using any entry relay");
            }
            entry_pool
        } else {
            preferred
        };

        if candidates.is_empty() {
            warn!("No suitable entry relays found");
            return Err(Error::NoEntryAvailable);
        }
        select_weighted(&mut self.rng, &candidates)
    }

    /// Draws from `candidates` that are not yet in the path, preferring
    /// those diverse against the whole path. `None` means nothing is left
    /// even without the diversity filter.
    fn select_diverse<'c>(
        &mut self,
        candidates: &[&'c Node],
        chosen: &[&'c Node],
    ) -> Option<Result<&'c Node>> {
        let in_path: HashSet<&Fingerprint> = chosen.iter().map(|n| &n.fingerprint).collect();
        let available: Vec<&Node> = candidates
            .iter()
            .copied()
            .filter(|n| !in_path.contains(&n.fingerprint))
            .collect();

        let diverse = DiversityRestriction::new(chosen).filter(&available);
        if !diverse.is_empty() {
            return Some(select_weighted(&mut self.rng, &diverse));
        }

        if available.is_empty() {
            warn!(
                "No relays left for hop {} even without diversity filtering",
                chosen.len() + 1
            );
            return None;
        }

        warn!(
            "No diverse relays for hop {}, falling back to any relay not in the path",
            chosen.len() + 1
        );
        self.last_build_relaxed = true;
        Some(select_weighted(&mut self.rng, &available))
    }
}

/// Middle and entry pool members, each once, middle pool first.
fn middle_candidates<'c>(catalog: &'c Catalog, pools: &RolePools) -> Vec<&'c Node> {
    let mut seen = HashSet::new();
    pools
        .middle
        .iter()
        .chain(pools.entry.iter())
        .filter(|fp| seen.insert(*fp))
        .filter_map(|fp| catalog.get(fp))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diversity::{same_coarse_location, same_family};
    use crate::node::test_support::{fp, node};

    fn builder(seed: u64) -> PathBuilder<StdRng> {
        PathBuilder::with_rng(PathConfig::default(), StdRng::seed_from_u64(seed))
    }

    fn mixed_catalog(n: u32) -> Catalog {
        let nodes = (1..=n)
            .map(|i| match i % 4 {
                0 => node(i, &["Guard", "Fast", "Stable"], 100.0 + i as f64),
                1 => node(i, &["Exit", "Fast"], 50.0 + i as f64),
                2 => node(i, &["Guard", "Exit"], 80.0),
                _ => node(i, &["Fast"], 10.0 * i as f64),
            })
            .collect();
        Catalog::new(nodes)
    }

    fn assert_distinct_and_diverse(catalog: &Catalog, path: &Path) {
        let hops = catalog.resolve(path.fingerprints());
        assert_eq!(hops.len(), path.len());
        for (i, a) in hops.iter().enumerate() {
            for b in &hops[i + 1..] {
                assert_ne!(a.fingerprint, b.fingerprint);
                assert!(!same_family(a, b));
                assert!(!same_coarse_location(a, b));
            }
        }
    }

    #[test]
    fn test_empty_catalog_fails_with_no_entry() {
        let err = builder(1).build_path(&Catalog::default(), 4).unwrap_err();
        assert!(matches!(err, Error::NoEntryAvailable));
    }

    #[test]
    fn test_hop_count_below_minimum_rejected() {
        let err = builder(1).build_path(&mixed_catalog(8), 1).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_build_count_includes_failures() {
        let mut b = builder(1);
        assert_eq!(b.build_count(), 0);
        b.build_path(&mixed_catalog(40), 3).unwrap();
        b.build_path(&Catalog::default(), 3).unwrap_err();
        b.build_path(&mixed_catalog(40), 1).unwrap_err();
        assert_eq!(b.build_count(), 3);
    }

    #[test]
    fn test_four_hop_path_is_distinct_and_diverse() {
        let catalog = mixed_catalog(40);
        let mut b = builder(7);
        for _ in 0..50 {
            let path = b.build_path(&catalog, 4).unwrap();
            assert_eq!(path.len(), 4);
            assert_distinct_and_diverse(&catalog, &path);
            assert!(!b.last_build_relaxed());

            let entry = catalog.get(path.entry().unwrap()).unwrap();
            assert!(entry.has_flag("Guard"));
            assert!(entry.has_flag("Fast") && entry.has_flag("Stable"));
            let exit = catalog.get(path.exit().unwrap()).unwrap();
            assert!(exit.is_exit_capable());
        }
    }

    #[test]
    fn test_two_hop_path_skips_middles() {
        let catalog = Catalog::new(vec![
            node(1, &["Guard", "Fast", "Stable"], 10.0),
            node(2, &["Exit"], 10.0),
            node(3, &[], 10.0),
        ]);
        let path = builder(3).build_path(&catalog, 2).unwrap();
        assert_eq!(path.fingerprints(), &[fp(1), fp(2)]);
    }

    #[test]
    fn test_entry_falls_back_to_unrestricted_pool() {
        let catalog = Catalog::new(vec![
            node(1, &["Guard"], 10.0),
            node(2, &[], 10.0),
            node(3, &["Exit"], 10.0),
        ]);
        let path = builder(5).build_path(&catalog, 3).unwrap();
        assert_eq!(path.fingerprints(), &[fp(1), fp(2), fp(3)]);
    }

    #[test]
    fn test_no_middle_reports_position() {
        // Entry and exit exist but nothing else remains for hop 3.
        let catalog = Catalog::new(vec![
            node(1, &["Guard", "Fast", "Stable"], 10.0),
            node(2, &[], 10.0),
            node(3, &["Exit"], 10.0),
        ]);
        let err = builder(1).build_path(&catalog, 4).unwrap_err();
        assert!(matches!(err, Error::NoMiddleAvailable { position: 3 }));
    }

    #[test]
    fn test_no_exit_when_only_exit_already_used() {
        // The sole exit is also the sole entry.
        let catalog = Catalog::new(vec![
            node(1, &["Guard", "Exit", "Fast", "Stable"], 10.0),
            node(2, &[], 10.0),
        ]);
        let err = builder(1).build_path(&catalog, 3).unwrap_err();
        assert!(matches!(err, Error::NoExitAvailable));
    }

    #[test]
    fn test_unsatisfiable_diversity_relaxes_instead_of_failing() {
        // Every relay shares 10.0/16 and the same family, so no pair is diverse.
        let mut nodes = vec![
            node(1, &["Guard", "Fast", "Stable"], 10.0),
            node(2, &[], 10.0),
            node(3, &[], 10.0),
            node(4, &["Exit"], 10.0),
        ];
        for (i, n) in nodes.iter_mut().enumerate() {
            n.address = format!("10.0.{}.1", i);
            n.family = (1..=4).map(fp).collect();
        }
        let catalog = Catalog::new(nodes);

        let mut b = builder(11);
        let path = b.build_path(&catalog, 4).unwrap();
        assert!(b.last_build_relaxed());
        assert_eq!(path.entry(), Some(&fp(1)));
        assert_eq!(path.exit(), Some(&fp(4)));
        let unique: HashSet<_> = path.fingerprints().iter().collect();
        assert_eq!(unique.len(), 4);
    }

    #[test]
    fn test_family_member_of_entry_avoided_when_possible() {
        let mut entry = node(1, &["Guard", "Fast", "Stable"], 10.0);
        entry.family.insert(fp(2));
        let catalog = Catalog::new(vec![
            entry,
            node(2, &[], 1_000_000.0),
            node(3, &[], 1.0),
            node(4, &["Exit"], 10.0),
        ]);
        let mut b = builder(2);
        for _ in 0..20 {
            let path = b.build_path(&catalog, 3).unwrap();
            assert_eq!(path.fingerprints(), &[fp(1), fp(3), fp(4)]);
        }
    }

    #[test]
    fn test_path_display() {
        let catalog = Catalog::new(vec![
            node(1, &["Guard", "Fast", "Stable"], 10.0),
            node(2, &["Exit"], 10.0),
        ]);
        let path = builder(1).build_path(&catalog, 2).unwrap();
        assert_eq!(path.to_string(), format!("${},${}", fp(1), fp(2)));
    }
}

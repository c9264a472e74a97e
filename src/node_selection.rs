//! Bandwidth-weighted node selection, node restrictions and input validation.
//!
//! # Overview
//!
//! - **Input Validation**: [`is_valid_fingerprint`]
//! - **Node Restrictions**: the [`NodeRestriction`] trait and [`FlagsRestriction`]
//! - **Bandwidth-Weighted Selection**: [`select_weighted`]
//!
//! # Selection Algorithm
//!
//! ```text
//!   candidates ──▶ all weights valid and total > 0 ?
//!                        │yes                     │no
//!                        ▼                        ▼
//!          r = uniform [0, total)           uniform choice
//!          walk candidates, cumulative += w
//!          return first with cumulative ≥ r (w > 0)
//! ```
//!
//! A weight is invalid when it is negative or not finite. The uniform branch
//! is explicit so an all-zero candidate set is never silently resolved to its
//! first element.
//!
//! # Example
//!
//! ```rust
//! use rand::SeedableRng;
//! use rand::rngs::StdRng;
//! use relaypath::node_selection::select_weighted;
//! use relaypath::{Fingerprint, Node};
//!
//! let mut heavy = Node::new(Fingerprint::parse(&"A".repeat(40))?);
//! heavy.bandwidth = 1000.0;
//! let light = Node::new(Fingerprint::parse(&"B".repeat(40))?);
//!
//! let mut rng = StdRng::seed_from_u64(7);
//! let picked = select_weighted(&mut rng, &[&heavy, &light])?;
//! assert_eq!(picked.fingerprint, heavy.fingerprint);
//! # Ok::<(), relaypath::Error>(())
//! ```

use rand::Rng;
use tracing::debug;

use crate::error::{Error, Result};
use crate::node::Node;

/// Validates that a string is a valid relay fingerprint.
///
/// A valid fingerprint is exactly 40 hexadecimal characters (case-insensitive).
///
/// ```rust
/// use relaypath::node_selection::is_valid_fingerprint;
///
/// assert!(is_valid_fingerprint("AABBCCDD00112233445566778899AABBCCDDEEFF"));
/// assert!(!is_valid_fingerprint("AABBCCDD"));
/// ```
pub fn is_valid_fingerprint(s: &str) -> bool {
    s.len() == 40 && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Interface for node restriction policies.
///
/// ```rust
/// use relaypath::node_selection::NodeRestriction;
/// use relaypath::Node;
///
/// struct MinBandwidth(f64);
///
/// impl NodeRestriction for MinBandwidth {
///     fn r_is_ok(&self, node: &Node) -> bool {
///         node.bandwidth >= self.0
///     }
/// }
/// ```
pub trait NodeRestriction {
    /// Returns true if the node passes this restriction.
    fn r_is_ok(&self, node: &Node) -> bool;

    /// Keeps only the candidates that pass this restriction, preserving order.
    fn filter<'a>(&self, candidates: &[&'a Node]) -> Vec<&'a Node> {
        candidates
            .iter()
            .copied()
            .filter(|n| self.r_is_ok(n))
            .collect()
    }
}

/// Restriction for mandatory and forbidden relay flags.
///
/// | Use Case | Mandatory | Forbidden |
/// |----------|-----------|-----------|
/// | Preferred entry | Fast, Stable | |
/// | Strict exit | Exit | BadExit |
#[derive(Debug, Clone)]
pub struct FlagsRestriction {
    /// Flags that must be present on the node.
    pub mandatory: Vec<String>,
    /// Flags that must not be present on the node.
    pub forbidden: Vec<String>,
}

impl FlagsRestriction {
    /// Creates a new flags restriction.
    pub fn new(mandatory: Vec<String>, forbidden: Vec<String>) -> Self {
        Self {
            mandatory,
            forbidden,
        }
    }
}

impl NodeRestriction for FlagsRestriction {
    fn r_is_ok(&self, node: &Node) -> bool {
        self.mandatory.iter().all(|m| node.has_flag(m))
            && !self.forbidden.iter().any(|f| node.has_flag(f))
    }
}

/// Selects one candidate with probability proportional to its bandwidth.
///
/// Candidates are walked in slice order. Falls back to [`select_uniform`] when
/// any weight is negative or non-finite, or when the total weight is zero.
///
/// # Errors
///
/// Returns [`Error::EmptyCandidateSet`] if `candidates` is empty.
pub fn select_weighted<'a, R: Rng + ?Sized>(
    rng: &mut R,
    candidates: &[&'a Node],
) -> Result<&'a Node> {
    if candidates.is_empty() {
        return Err(Error::EmptyCandidateSet);
    }

    let weights: Option<Vec<f64>> = candidates.iter().map(|n| n.valid_weight()).collect();
    let Some(weights) = weights else {
        debug!("Invalid bandwidth weight among candidates, selecting uniformly");
        return select_uniform(rng, candidates);
    };

    let weight_total: f64 = weights.iter().sum();
    if !weight_total.is_finite() || weight_total <= 0.0 {
        debug!("Total bandwidth weight is zero, selecting uniformly");
        return select_uniform(rng, candidates);
    }

    let choice_val = rng.gen_range(0.0..weight_total);
    let mut cumulative = 0.0;
    let mut last_positive = 0;

    for (i, weight) in weights.iter().enumerate() {
        if *weight <= 0.0 {
            continue;
        }
        cumulative += weight;
        last_positive = i;
        if cumulative >= choice_val {
            return Ok(candidates[i]);
        }
    }

    Ok(candidates[last_positive])
}

/// Selects one candidate uniformly at random.
///
/// # Errors
///
/// Returns [`Error::EmptyCandidateSet`] if `candidates` is empty.
pub fn select_uniform<'a, R: Rng + ?Sized>(
    rng: &mut R,
    candidates: &[&'a Node],
) -> Result<&'a Node> {
    if candidates.is_empty() {
        return Err(Error::EmptyCandidateSet);
    }
    Ok(candidates[rng.gen_range(0..candidates.len())])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::test_support::{fp, node};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;

    fn tally(candidates: &[&Node], trials: usize, seed: u64) -> HashMap<u32, usize> {
        let mut rng = StdRng::seed_from_u64(seed);
        let ids: HashMap<_, u32> = candidates
            .iter()
            .enumerate()
            .map(|(i, n)| (n.fingerprint.clone(), i as u32))
            .collect();
        let mut counts = HashMap::new();
        for _ in 0..trials {
            let picked = select_weighted(&mut rng, candidates).unwrap();
            *counts.entry(ids[&picked.fingerprint]).or_insert(0) += 1;
        }
        counts
    }

    #[test]
    fn test_valid_fingerprints() {
        assert!(is_valid_fingerprint(
            "0123456789abcdefABCDEF0123456789abcdefAB"
        ));
        assert!(!is_valid_fingerprint(""));
        assert!(!is_valid_fingerprint(
            "AABBCCDD00112233445566778899AABBCCDDEEF"
        ));
        assert!(!is_valid_fingerprint(
            "GGHHIIJJ00112233445566778899AABBCCDDEEFF"
        ));
    }

    #[test]
    fn test_empty_candidate_set() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(matches!(
            select_weighted(&mut rng, &[]),
            Err(Error::EmptyCandidateSet)
        ));
        assert!(matches!(
            select_uniform(&mut rng, &[]),
            Err(Error::EmptyCandidateSet)
        ));
    }

    #[test]
    fn test_single_candidate_always_selected() {
        let only = node(1, &[], 0.0);
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..20 {
            assert_eq!(select_weighted(&mut rng, &[&only]).unwrap().fingerprint, fp(1));
        }
    }

    #[test]
    fn test_zero_weight_candidate_never_drawn_by_weighted_branch() {
        let zero = node(1, &[], 0.0);
        let full = node(2, &[], 50.0);
        let counts = tally(&[&zero, &full], 2000, 3);
        assert_eq!(counts.get(&0), None);
        assert_eq!(counts[&1], 2000);
    }

    #[test]
    fn test_proportional_selection() {
        let a = node(1, &[], 100.0);
        let b = node(2, &[], 300.0);
        let trials = 20_000;
        let counts = tally(&[&a, &b], trials, 42);
        let share_b = counts[&1] as f64 / trials as f64;
        assert!((share_b - 0.75).abs() < 0.02, "share_b = {}", share_b);
    }

    #[test]
    fn test_all_zero_weights_select_uniformly() {
        let nodes: Vec<Node> = (1..=4).map(|i| node(i, &[], 0.0)).collect();
        let refs: Vec<&Node> = nodes.iter().collect();
        let trials = 8000;
        let counts = tally(&refs, trials, 9);
        for i in 0..4 {
            let share = counts[&i] as f64 / trials as f64;
            assert!((share - 0.25).abs() < 0.03, "candidate {} share {}", i, share);
        }
    }

    #[test]
    fn test_negative_weight_selects_uniformly() {
        let bad = node(1, &[], -10.0);
        let big = node(2, &[], 1_000_000.0);
        let counts = tally(&[&bad, &big], 4000, 11);
        let share_bad = counts.get(&0).copied().unwrap_or(0) as f64 / 4000.0;
        assert!((share_bad - 0.5).abs() < 0.05, "share_bad = {}", share_bad);
    }

    #[test]
    fn test_nan_weight_selects_uniformly() {
        let bad = node(1, &[], f64::NAN);
        let good = node(2, &[], 10.0);
        let counts = tally(&[&bad, &good], 4000, 5);
        assert!(counts.get(&0).copied().unwrap_or(0) > 1500);
    }

    #[test]
    fn test_flags_restriction() {
        let mut n = node(1, &["Fast", "Stable", "Valid"], 1.0);
        let restriction = FlagsRestriction::new(
            vec!["Fast".to_string(), "Stable".to_string()],
            vec!["BadExit".to_string()],
        );
        assert!(restriction.r_is_ok(&n));

        n.flags.push("BadExit".to_string());
        assert!(!restriction.r_is_ok(&n));

        n.flags = vec!["Fast".to_string()];
        assert!(!restriction.r_is_ok(&n));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use crate::node::test_support::node;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn selection_is_member_of_candidates(
            weights in prop::collection::vec(-10.0f64..1000.0, 1..20),
            seed in any::<u64>(),
        ) {
            let nodes: Vec<Node> = weights
                .iter()
                .enumerate()
                .map(|(i, w)| node(i as u32, &[], *w))
                .collect();
            let refs: Vec<&Node> = nodes.iter().collect();
            let mut rng = StdRng::seed_from_u64(seed);

            let picked = select_weighted(&mut rng, &refs).unwrap();
            prop_assert!(nodes.iter().any(|n| n.fingerprint == picked.fingerprint));

            let all_valid = weights.iter().all(|w| *w >= 0.0);
            if all_valid && weights.iter().sum::<f64>() > 0.0 {
                prop_assert!(picked.bandwidth > 0.0);
            }
        }
    }
}

//! Reconciliation primitives.
//!
//! This library provides the pure parts of the two reconciliation loops the
//! cluster service runs:
//!
//! - **Inventory**: align a persisted set of records with a freshly observed,
//!   authoritative snapshot ([`diff_by_key`]).
//! - **Convergence**: classify one observation round of a set of workers that
//!   are moving toward a goal ([`ConvergenceStatus`]).
//!
//! # Invariants
//!
//! - Diffing is deterministic given the same inputs
//! - Diffing an already-aligned pair yields no additions and no removals

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Default interval between two observation rounds of a converging resource.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Result of diffing persisted records against an observed snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diff<P, L> {
    /// Observed items with no persisted counterpart.
    pub added: Vec<L>,

    /// Persisted items missing from the observation.
    pub removed: Vec<P>,

    /// Persisted items that are still observed.
    pub retained: Vec<P>,
}

impl<P, L> Diff<P, L> {
    /// Returns true when nothing needs to be added or removed.
    pub fn is_converged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Compute keyed set differences in both directions.
///
/// `live` is treated as ground truth: every persisted item whose key is absent
/// from `live` is reported as removed, every live item whose key is absent
/// from `persisted` is reported as added. Duplicate keys in `live` collapse to
/// the first occurrence. Output order follows input order.
pub fn diff_by_key<P, L, K, FP, FL>(
    persisted: impl IntoIterator<Item = P>,
    live: impl IntoIterator<Item = L>,
    persisted_key: FP,
    live_key: FL,
) -> Diff<P, L>
where
    K: Ord,
    FP: Fn(&P) -> K,
    FL: Fn(&L) -> K,
{
    let mut live_by_key: BTreeMap<K, usize> = BTreeMap::new();
    let mut live_items: Vec<Option<L>> = Vec::new();
    for item in live {
        let key = live_key(&item);
        if live_by_key.contains_key(&key) {
            continue;
        }
        live_by_key.insert(key, live_items.len());
        live_items.push(Some(item));
    }

    let mut removed = Vec::new();
    let mut retained = Vec::new();
    let mut seen: BTreeSet<K> = BTreeSet::new();

    for item in persisted {
        let key = persisted_key(&item);
        if live_by_key.contains_key(&key) {
            seen.insert(key);
            retained.push(item);
        } else {
            removed.push(item);
        }
    }

    let added = live_by_key
        .into_iter()
        .filter(|(key, _)| !seen.contains(key))
        .map(|(_, idx)| idx)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .filter_map(|idx| live_items[idx].take())
        .collect();

    Diff {
        added,
        removed,
        retained,
    }
}

/// Convergence status for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceStatus {
    /// Every member reached the goal.
    Converged,

    /// No member failed, at least one is still on its way.
    Converging,

    /// At least one member failed; the resource will not converge.
    Diverged,
}

impl ConvergenceStatus {
    /// Classify a round of member observations.
    ///
    /// Each observation is `Ok(done)` or `Err(_)`. A single error diverges
    /// the whole round regardless of the others. An empty round is converged.
    pub fn classify<'a, E: 'a>(round: impl IntoIterator<Item = &'a Result<bool, E>>) -> Self {
        let mut status = Self::Converged;
        for observation in round {
            match observation {
                Err(_) => return Self::Diverged,
                Ok(false) => status = Self::Converging,
                Ok(true) => {}
            }
        }
        status
    }

    /// Returns true if the resource has converged.
    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged)
    }

    /// Returns true if the resource is still converging.
    pub fn is_converging(&self) -> bool {
        matches!(self, Self::Converging)
    }

    /// Returns true if this status ends observation.
    pub fn is_terminal(&self) -> bool {
        !self.is_converging()
    }
}

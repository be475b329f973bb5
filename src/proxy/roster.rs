//! Roster reconciliation: merge, dedup, ordering
//!
//! The roster is an ordered sequence of proven-live entries, unique by
//! normalized endpoint identity; insertion order is priority order.

use crate::proxy::models::{ProbeOutcome, RosterEntry};
use std::collections::HashSet;

/// How a run's live outcomes are merged with the prior roster. The source
/// deployments genuinely differ here, so the policy is explicit
/// configuration, never hard-coded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// New live entries go ahead of the prior roster; prior entries not
    /// re-tested this run are retained.
    #[default]
    Additive,
    /// The roster becomes exactly this run's live entries; anything not
    /// re-proven live is dropped.
    Replacing,
}

/// Deduplicated, priority-ordered set of currently-trusted live endpoints
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    entries: Vec<RosterEntry>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a roster, keeping the first occurrence of each identity along
    /// with its full enrichment.
    pub fn from_entries(entries: impl IntoIterator<Item = RosterEntry>) -> Self {
        let mut seen = HashSet::new();
        let entries = entries
            .into_iter()
            .filter(|entry| seen.insert(entry.proxy.clone()))
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[RosterEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<RosterEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Merges newly-proven-live outcomes with a prior roster
pub struct RosterReconciler;

impl RosterReconciler {
    /// Filter outcomes to live ones and merge with the prior roster per the
    /// configured policy. Idempotent for identical inputs.
    pub fn reconcile(
        outcomes: Vec<ProbeOutcome>,
        prior: Roster,
        policy: MergePolicy,
    ) -> Roster {
        let newly_live = outcomes.into_iter().filter_map(ProbeOutcome::into_entry);

        match policy {
            MergePolicy::Additive => {
                Roster::from_entries(newly_live.chain(prior.into_entries()))
            }
            MergePolicy::Replacing => Roster::from_entries(newly_live),
        }
    }
}

//! Contributor bookkeeping for one collective operation.
//!
//! A [`ContributorSet`] partitions the pillars of a collection into three
//! disjoint sets: *active* (still expected to deliver), *finished* (delivered
//! their last page) and *failed*. Collection steps loop until no pillar is
//! active. [`ContributorSet::reload`] moves finished pillars back to active so
//! the next collection step asks them again; failed pillars stay out until
//! [`ContributorSet::reset`].

use std::collections::BTreeSet;

use tally_types::PillarId;
use tracing::debug;

/// Active / finished / failed partition of a pillar universe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContributorSet {
    universe: BTreeSet<PillarId>,
    active: BTreeSet<PillarId>,
    finished: BTreeSet<PillarId>,
    failed: BTreeSet<PillarId>,
}

impl ContributorSet {
    /// Create a set with every pillar active.
    pub fn new(pillars: impl IntoIterator<Item = PillarId>) -> Self {
        let universe: BTreeSet<PillarId> = pillars.into_iter().collect();
        Self {
            active: universe.clone(),
            universe,
            finished: BTreeSet::new(),
            failed: BTreeSet::new(),
        }
    }

    /// Pillars still expected to deliver.
    pub fn active_contributors(&self) -> &BTreeSet<PillarId> {
        &self.active
    }

    /// Pillars that delivered their final page.
    pub fn finished_contributors(&self) -> &BTreeSet<PillarId> {
        &self.finished
    }

    /// Pillars that failed.
    pub fn failed_contributors(&self) -> &BTreeSet<PillarId> {
        &self.failed
    }

    /// Every pillar the set was created with.
    pub fn universe(&self) -> &BTreeSet<PillarId> {
        &self.universe
    }

    /// Whether `pillar` is active.
    pub fn is_active(&self, pillar: &PillarId) -> bool {
        self.active.contains(pillar)
    }

    /// Whether `pillar` has failed.
    pub fn is_failed(&self, pillar: &PillarId) -> bool {
        self.failed.contains(pillar)
    }

    /// Whether no pillar is active.
    pub fn is_done(&self) -> bool {
        self.active.is_empty()
    }

    /// Mark an active pillar as finished. Returns `false` if it was not active.
    pub fn finish_contributor(&mut self, pillar: &PillarId) -> bool {
        if !self.active.remove(pillar) {
            return false;
        }
        self.finished.insert(pillar.clone());
        debug!(%pillar, "contributor finished");
        true
    }

    /// Mark a pillar as failed. Returns `false` if it had already failed or is
    /// not part of the universe.
    pub fn fail_contributor(&mut self, pillar: &PillarId) -> bool {
        if !self.universe.contains(pillar) || self.failed.contains(pillar) {
            return false;
        }
        self.active.remove(pillar);
        self.finished.remove(pillar);
        self.failed.insert(pillar.clone());
        debug!(%pillar, "contributor failed");
        true
    }

    /// Move every finished pillar back to active.
    pub fn reload(&mut self) {
        self.active.append(&mut self.finished);
    }

    /// Start over: every pillar active again, failures forgotten.
    pub fn reset(&mut self) {
        self.active = self.universe.clone();
        self.finished.clear();
        self.failed.clear();
    }
}

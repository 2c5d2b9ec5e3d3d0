//! Time buckets and per-bucket survivor selection
//!
//! A policy is laid out backwards from the reference time `T`: every rule
//! covers `nr_of_days` and is cut into `nr_of_snapshots` windows of equal
//! width, the first rule ending at `T`, the next one where the previous one
//! stopped. A terminal bucket catches everything older than the policy.
//!
//! Each window `(end, start]` keeps a single survivor. Buckets of a
//! consistency-first rule keep their newest consistent snapshot (the newest
//! snapshot when none is consistent), other buckets keep their oldest
//! snapshot. The terminal bucket keeps nothing. Sticky snapshots are never
//! reported obsolete.

use vdisk_common::{RetentionPolicy, SECONDS_PER_DAY};
use vdisk_model::Snapshot;

/// One retention window `(end, start]`
#[derive(Clone, Debug)]
pub struct Bucket {
    /// Newest timestamp inside the window (inclusive)
    pub start: i64,
    /// Timestamp just outside the window (exclusive); 0 for the terminal bucket
    pub end: i64,
    /// Survivor is the newest consistent snapshot instead of the oldest one
    pub consistency_first: bool,
    /// Catches everything older than the policy; keeps nothing
    pub terminal: bool,
    snapshots: Vec<Snapshot>,
}

impl Bucket {
    const fn new_window(start: i64, end: i64, consistency_first: bool) -> Self {
        Self {
            start,
            end,
            consistency_first,
            terminal: false,
            snapshots: Vec::new(),
        }
    }

    const fn new_terminal(start: i64) -> Self {
        Self {
            start,
            end: 0,
            consistency_first: false,
            terminal: true,
            snapshots: Vec::new(),
        }
    }

    #[must_use]
    pub const fn contains(&self, timestamp: i64) -> bool {
        timestamp <= self.start && (self.terminal || timestamp > self.end)
    }

    /// Snapshots in this bucket, oldest first
    #[must_use]
    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    /// The snapshot this bucket keeps, if any
    #[must_use]
    pub fn survivor(&self) -> Option<&Snapshot> {
        if self.terminal {
            None
        } else if self.consistency_first {
            self.snapshots
                .iter()
                .max_by_key(|s| (s.is_consistent, s.timestamp))
        } else {
            self.snapshots.first()
        }
    }

    /// Snapshots this bucket gives up, sticky ones excluded
    pub fn obsolete(&self) -> impl Iterator<Item = &Snapshot> {
        let survivor = self.survivor().map(|s| &s.id);
        self.snapshots
            .iter()
            .filter(move |s| Some(&s.id) != survivor && !s.is_sticky)
    }

    /// Sticky snapshots kept although they are not the survivor
    pub fn retained_sticky(&self) -> impl Iterator<Item = &Snapshot> {
        let survivor = self.survivor().map(|s| &s.id);
        self.snapshots
            .iter()
            .filter(move |s| Some(&s.id) != survivor && s.is_sticky)
    }

    fn insert(&mut self, snapshot: Snapshot) {
        let at = self
            .snapshots
            .partition_point(|s| (s.timestamp, &s.id) < (snapshot.timestamp, &snapshot.id));
        self.snapshots.insert(at, snapshot);
    }
}

/// Buckets of one policy at one reference time, newest first
#[derive(Clone, Debug)]
pub struct BucketChain {
    now: i64,
    buckets: Vec<Bucket>,
}

impl BucketChain {
    /// Lay out the windows of `policy` backwards from `now`
    #[must_use]
    pub fn build(policy: &RetentionPolicy, now: i64) -> Self {
        let mut buckets = Vec::new();
        let mut offset = 0_i64;
        for rule in policy.rules() {
            let span = i64::from(rule.nr_of_days) * SECONDS_PER_DAY;
            let count = i64::from(rule.nr_of_snapshots);
            for index in 0..rule.nr_of_snapshots {
                let i = i64::from(index);
                // Boundaries are rounded individually so the windows tile the rule exactly
                let start = now - offset - span * i / count;
                let end = now - offset - span * (i + 1) / count;
                buckets.push(Bucket::new_window(
                    start,
                    end,
                    rule.prefers_consistency(index),
                ));
            }
            offset += span;
        }
        buckets.push(Bucket::new_terminal(now - offset));
        Self { now, buckets }
    }

    /// Reference time the chain was built for
    #[must_use]
    pub const fn now(&self) -> i64 {
        self.now
    }

    #[must_use]
    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    /// Put every snapshot into the first bucket containing it. Snapshots
    /// newer than the reference time fit no bucket and are handed back.
    pub fn distribute(&mut self, snapshots: impl IntoIterator<Item = Snapshot>) -> Vec<Snapshot> {
        let mut unplaced = Vec::new();
        for snapshot in snapshots {
            match self
                .buckets
                .iter_mut()
                .find(|b| b.contains(snapshot.timestamp))
            {
                Some(bucket) => bucket.insert(snapshot),
                None => unplaced.push(snapshot),
            }
        }
        unplaced
    }

    /// Obsolete snapshots over all buckets, newest bucket first
    pub fn obsolete(&self) -> impl Iterator<Item = &Snapshot> {
        self.buckets.iter().flat_map(Bucket::obsolete)
    }

    /// Survivors over all buckets, newest bucket first
    pub fn survivors(&self) -> impl Iterator<Item = &Snapshot> {
        self.buckets.iter().filter_map(Bucket::survivor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;
    use vdisk_common::RetentionRule;

    const HOUR: i64 = 3600;
    const NOW: i64 = 1_700_006_400;

    fn snap(id: &str, timestamp: i64) -> Snapshot {
        Snapshot::new(id, timestamp)
    }

    #[test]
    fn test_default_policy_layout() {
        let chain = BucketChain::build(&RetentionPolicy::default(), NOW);
        let buckets = chain.buckets();
        assert_eq!(buckets.len(), 24 + 6 + 3 + 1);

        assert_eq!(buckets[0].start, NOW);
        assert_eq!(buckets[0].end, NOW - HOUR);
        assert_eq!(buckets[23].end, NOW - SECONDS_PER_DAY);
        assert_eq!(buckets[24].start, NOW - SECONDS_PER_DAY);
        assert_eq!(buckets[29].end, NOW - 7 * SECONDS_PER_DAY);
        assert_eq!(buckets[32].end, NOW - 28 * SECONDS_PER_DAY);

        let terminal = &buckets[33];
        assert!(terminal.terminal);
        assert_eq!(terminal.start, NOW - 28 * SECONDS_PER_DAY);
        assert_eq!(terminal.end, 0);

        for pair in buckets[..33].windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
    }

    #[test]
    fn test_uneven_rule_tiles_exactly() {
        let policy = RetentionPolicy::new(vec![RetentionRule::new(7, 1)]);
        let chain = BucketChain::build(&policy, NOW);
        assert_eq!(chain.buckets()[6].end, NOW - SECONDS_PER_DAY);
        for pair in chain.buckets()[..7].windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
    }

    #[test]
    fn test_window_bounds() {
        let policy = RetentionPolicy::new(vec![RetentionRule::new(1, 1)]);
        let mut chain = BucketChain::build(&policy, NOW);
        let unplaced = chain.distribute(vec![
            snap("at-now", NOW),
            snap("at-end", NOW - SECONDS_PER_DAY),
            snap("future", NOW + 1),
        ]);

        assert_eq!(unplaced.len(), 1);
        assert_eq!(unplaced[0].id.as_str(), "future");
        assert_eq!(chain.buckets()[0].snapshots()[0].id.as_str(), "at-now");
        // The end boundary belongs to the older bucket
        assert_eq!(chain.buckets()[1].snapshots()[0].id.as_str(), "at-end");
    }

    #[test]
    fn test_oldest_survives() {
        let policy = RetentionPolicy::new(vec![RetentionRule::new(1, 1)]);
        let mut chain = BucketChain::build(&policy, NOW);
        chain.distribute(vec![
            snap("b", NOW - 2 * HOUR),
            snap("a", NOW - 3 * HOUR),
            snap("c", NOW - HOUR).consistent(),
        ]);

        assert_eq!(chain.buckets()[0].survivor().unwrap().id.as_str(), "a");
        let obsolete: Vec<_> = chain.obsolete().map(|s| s.id.as_str()).collect();
        assert_eq!(obsolete, vec!["b", "c"]);
    }

    #[test]
    fn test_consistency_first_survivor() {
        let policy = RetentionPolicy::new(vec![RetentionRule::new(1, 1).consistency_first()]);
        let mut chain = BucketChain::build(&policy, NOW);
        chain.distribute(vec![
            snap("old-consistent", NOW - 5 * HOUR).consistent(),
            snap("new-consistent", NOW - 3 * HOUR).consistent(),
            snap("newest", NOW - HOUR),
        ]);
        assert_eq!(
            chain.buckets()[0].survivor().unwrap().id.as_str(),
            "new-consistent"
        );

        // Without consistent snapshots the newest one survives
        let mut chain = BucketChain::build(&policy, NOW);
        chain.distribute(vec![snap("x", NOW - 5 * HOUR), snap("y", NOW - HOUR)]);
        assert_eq!(chain.buckets()[0].survivor().unwrap().id.as_str(), "y");
    }

    #[test]
    fn test_consistency_first_on_selected_buckets() {
        let policy =
            RetentionPolicy::new(vec![RetentionRule::new(2, 2).consistency_first_on(vec![2])]);
        let chain = BucketChain::build(&policy, NOW);
        assert!(!chain.buckets()[0].consistency_first);
        assert!(chain.buckets()[1].consistency_first);
        assert!(!chain.buckets()[2].consistency_first);
    }

    #[test]
    fn test_terminal_and_sticky() {
        let policy = RetentionPolicy::new(vec![RetentionRule::new(1, 1)]);
        let mut chain = BucketChain::build(&policy, NOW);
        chain.distribute(vec![
            snap("ancient", 10),
            snap("old", NOW - 3 * SECONDS_PER_DAY),
            snap("pinned", NOW - 2 * SECONDS_PER_DAY).sticky(),
        ]);

        assert!(chain.buckets()[1].survivor().is_none());
        let obsolete: Vec<_> = chain.obsolete().map(|s| s.id.as_str()).collect();
        assert_eq!(obsolete, vec!["ancient", "old"]);
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let policy = RetentionPolicy::default();
        let mut snapshots: Vec<_> = (0..200)
            .map(|i| {
                let s = snap(&format!("s{i:03}"), NOW - i * 2 * HOUR);
                if i % 5 == 0 { s.consistent() } else { s }
            })
            .collect();

        let mut reference = BucketChain::build(&policy, NOW);
        reference.distribute(snapshots.clone());
        let expected: Vec<_> = reference.survivors().map(|s| s.id.clone()).collect();

        for _ in 0..5 {
            snapshots.shuffle(&mut rand::thread_rng());
            let mut chain = BucketChain::build(&policy, NOW);
            chain.distribute(snapshots.clone());
            let survivors: Vec<_> = chain.survivors().map(|s| s.id.clone()).collect();
            assert_eq!(survivors, expected);
        }
    }
}

//! Outcome of a retention pass

use crate::policy::PolicySource;
use serde::Serialize;
use vdisk_common::{Error, Result, SnapshotId, StorageDriverId, VDiskGuid};
use vdisk_model::ObjectType;

/// Why a vDisk was left alone (entirely or partly) in this pass
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Flagged before the pass reached it
    BeingScrubbed,
    /// A delete collided with a scrub; the rest of the vDisk waits for the next pass
    ScrubConflict,
    /// Clones and templates are not subject to automatic retention
    NotBase(ObjectType),
}

/// Why an obsolete snapshot was kept
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Protection {
    Sticky,
    CloneParent,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProtectedSnapshot {
    pub snapshot: SnapshotId,
    pub reason: Protection,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SnapshotFailure {
    pub snapshot: SnapshotId,
    pub reason: String,
}

/// What happened to one vDisk
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VDiskRetention {
    pub vdisk: VDiskGuid,
    pub policy: PolicySource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipReason>,
    pub deleted: Vec<SnapshotId>,
    /// Would be deleted; only filled in dry-run passes
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub planned: Vec<SnapshotId>,
    pub protected: Vec<ProtectedSnapshot>,
    pub failed: Vec<SnapshotFailure>,
    /// The vDisk could not be examined at all
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VDiskRetention {
    #[must_use]
    pub const fn new(vdisk: VDiskGuid, policy: PolicySource) -> Self {
        Self {
            vdisk,
            policy,
            skipped: None,
            deleted: Vec::new(),
            planned: Vec::new(),
            protected: Vec::new(),
            failed: Vec::new(),
            error: None,
        }
    }

    /// Failures that make the pass unsuccessful
    pub fn failures(&self) -> impl Iterator<Item = String> + '_ {
        let vdisk_error = self
            .error
            .iter()
            .map(move |e| format!("vdisk {}: {e}", self.vdisk));
        let snapshot_errors = self
            .failed
            .iter()
            .map(move |f| format!("vdisk {} snapshot {}: {}", self.vdisk, f.snapshot, f.reason));
        vdisk_error.chain(snapshot_errors)
    }
}

/// Outcome of one pass over a StorageDriver
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RetentionReport {
    pub storagedriver: StorageDriverId,
    pub now: i64,
    pub dry_run: bool,
    pub vdisks: Vec<VDiskRetention>,
}

impl RetentionReport {
    #[must_use]
    pub const fn new(storagedriver: StorageDriverId, now: i64, dry_run: bool) -> Self {
        Self {
            storagedriver,
            now,
            dry_run,
            vdisks: Vec::new(),
        }
    }

    #[must_use]
    pub fn vdisk(&self, guid: &VDiskGuid) -> Option<&VDiskRetention> {
        self.vdisks.iter().find(|v| &v.vdisk == guid)
    }

    #[must_use]
    pub fn deleted_count(&self) -> usize {
        self.vdisks.iter().map(|v| v.deleted.len()).sum()
    }

    /// vDisks left alone, with the reason
    pub fn skipped(&self) -> impl Iterator<Item = (&VDiskGuid, SkipReason)> {
        self.vdisks
            .iter()
            .filter_map(|v| v.skipped.map(|reason| (&v.vdisk, reason)))
    }

    #[must_use]
    pub fn failures(&self) -> Vec<String> {
        self.vdisks.iter().flat_map(VDiskRetention::failures).collect()
    }

    /// Turn recorded failures into one aggregated error
    pub fn into_result(self) -> Result<Self> {
        let failures = self.failures();
        if failures.is_empty() {
            Ok(self)
        } else {
            Err(Error::SnapshotDeletionFailed {
                scope: format!("storagedriver {}", self.storagedriver),
                failures,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skips_are_not_failures() {
        let mut report = RetentionReport::new("sd-1".into(), 0, false);
        let mut skipped = VDiskRetention::new("vd-1".into(), PolicySource::Default);
        skipped.skipped = Some(SkipReason::BeingScrubbed);
        report.vdisks.push(skipped);

        assert_eq!(report.skipped().count(), 1);
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn test_failures_are_aggregated() {
        let mut report = RetentionReport::new("sd-1".into(), 0, false);
        let mut vdisk = VDiskRetention::new("vd-1".into(), PolicySource::Default);
        vdisk.failed.push(SnapshotFailure {
            snapshot: "s1".into(),
            reason: "rejected".into(),
        });
        vdisk.error = Some("listing failed".into());
        report.vdisks.push(vdisk);

        match report.into_result() {
            Err(Error::SnapshotDeletionFailed { scope, failures }) => {
                assert_eq!(scope, "storagedriver sd-1");
                assert_eq!(failures.len(), 2);
                assert!(failures[1].contains("snapshot s1"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}

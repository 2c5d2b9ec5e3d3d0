//! Error types for the retention and MDS engines
//!
//! Per-vDisk failures are typed so the sweeps can tell transient backend
//! trouble and scrub collisions apart from real failures.

use crate::types::{MdsServiceId, SnapshotId, StorageDriverId, VDiskGuid, VPoolGuid};
use thiserror::Error;

/// Common result type
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type
#[derive(Debug, Error)]
pub enum Error {
    // Volume driver errors
    #[error("transient volume driver error: {0}")]
    TransientBackend(String),

    #[error("vdisk {vdisk} is being scrubbed")]
    ScrubConflict { vdisk: VDiskGuid },

    #[error("volume driver error: {0}")]
    Backend(String),

    // Retention errors
    #[error("snapshot {snapshot} of vdisk {vdisk} is the parent of a clone")]
    CloneProtection {
        vdisk: VDiskGuid,
        snapshot: SnapshotId,
    },

    #[error("failed to delete {} snapshot(s) on {scope}", failures.len())]
    SnapshotDeletionFailed { scope: String, failures: Vec<String> },

    #[error("invalid retention policy: {0}")]
    InvalidPolicy(String),

    // MDS errors
    #[error("no mds service in vpool {vpool} satisfies max load {max_load}%")]
    LoadExceeded { vpool: VPoolGuid, max_load: u64 },

    #[error("mds {candidate} is {lag} tlogs behind for vdisk {vdisk} (threshold {threshold})")]
    TlogLag {
        vdisk: VDiskGuid,
        candidate: MdsServiceId,
        lag: u64,
        threshold: u64,
    },

    #[error("failed to write mds configuration for vdisk {vdisk}: {reason}")]
    ConfigurationWrite { vdisk: VDiskGuid, reason: String },

    #[error("mds checkup failed for {} vdisk(s)", failures.len())]
    CheckupFailed { failures: Vec<String> },

    // Lookup errors
    #[error("vdisk not found: {0}")]
    VDiskNotFound(VDiskGuid),

    #[error("vpool not found: {0}")]
    VPoolNotFound(VPoolGuid),

    #[error("storagedriver not found: {0}")]
    StorageDriverNotFound(StorageDriverId),

    #[error("storagerouter not found: {0}")]
    StorageRouterNotFound(String),

    #[error("mds service not found: {0}")]
    MdsServiceNotFound(MdsServiceId),

    // Internal errors
    #[error("store error: {0}")]
    Store(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Create a transient backend error
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::TransientBackend(msg.into())
    }

    /// Create a permanent backend error
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Check if this error may go away when the same call is repeated
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientBackend(_))
    }

    /// Check if this is a collision with an in-progress scrub
    #[must_use]
    pub const fn is_scrub_conflict(&self) -> bool {
        matches!(self, Self::ScrubConflict { .. })
    }

    /// Errors that a subsequent tick resolves and that never fail a sweep
    #[must_use]
    pub const fn is_non_fatal(&self) -> bool {
        matches!(self, Self::ScrubConflict { .. } | Self::TlogLag { .. })
    }

    /// Check if this is a lookup failure
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::VDiskNotFound(_)
                | Self::VPoolNotFound(_)
                | Self::StorageDriverNotFound(_)
                | Self::StorageRouterNotFound(_)
                | Self::MdsServiceNotFound(_)
        )
    }
}

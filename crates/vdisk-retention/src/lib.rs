//! vdisk-ops Snapshot Retention
//!
//! Keeps the snapshot history of every vDisk thin according to a
//! retention policy:
//!
//! - **Policy**: vDisk override, then vPool override, then the configured
//!   default
//! - **Buckets**: time windows laid out backwards from the reference time,
//!   each keeping one survivor
//! - **Engine**: per-StorageDriver sweep that deletes obsolete snapshots
//!   through the volume driver while honouring sticky snapshots, clone
//!   parents and running scrubs

pub mod bucket;
pub mod engine;
pub mod policy;
pub mod report;

pub use bucket::{Bucket, BucketChain};
pub use engine::{RetentionEngine, RetentionStats};
pub use policy::{PolicySource, resolve_policy};
pub use report::{
    ProtectedSnapshot, Protection, RetentionReport, SkipReason, SnapshotFailure, VDiskRetention,
};

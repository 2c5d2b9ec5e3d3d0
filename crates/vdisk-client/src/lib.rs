//! vdisk-ops Volume Driver Client
//!
//! The engines talk to the volume driver only through
//! [`VolumeDriverClient`]. Every call goes through a [`CallPolicy`], which
//! bounds it with a timeout and retries transient failures a few times.
//!
//! [`EngineContext`] bundles the collaborators both engines share.
//!
//! [`MemoryVolumeDriver`] keeps volumes, snapshots and MDS configurations
//! in memory and supports failure injection; tests and the checkup tool
//! run the engines against it.

pub mod call;
pub mod client;
pub mod context;
pub mod memory;

pub use call::CallPolicy;
pub use client::{
    ClientError, ClientPool, ClientResult, MdsNodeConfig, SnapshotMetadata, VolumeDriverClient,
    VolumeInfo,
};
pub use context::EngineContext;
pub use memory::{MemoryDriverState, MemoryVolumeDriver, SimulatedVolume};

//! Entities of the distributed data model
//!
//! These are the persisted shapes the store hands out. Derived collections
//! (a vDisk's snapshots, an MDS service's vDisks) are filled in by the store
//! or the cache when an entity is read and are never written back.

use serde::{Deserialize, Serialize};
use vdisk_common::{
    DomainGuid, MdsDefaults, MdsServiceId, RetentionPolicy, SnapshotId, StorageDriverId,
    StorageRouterGuid, VDiskGuid, VPoolGuid, VolumeId,
};

/// Volume object type as reported by the volume driver
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ObjectType {
    /// Regular volume, subject to automatic snapshot retention
    #[default]
    Base,
    /// Volume cloned from a snapshot of another volume
    Clone,
    /// Read-only template
    Template,
}

/// Snapshot record owned by a vDisk
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Snapshot identifier as known by the volume driver
    pub id: SnapshotId,
    /// Creation time in seconds since the epoch
    pub timestamp: i64,
    /// Taken while the guest was quiesced
    pub is_consistent: bool,
    /// Taken by the scheduler rather than a user
    pub is_automatic: bool,
    /// Only removable by explicit user request
    pub is_sticky: bool,
    /// Fully uploaded to the backend
    pub in_backend: bool,
    /// Bytes stored, informational only
    pub stored: u64,
}

impl Snapshot {
    /// Automatic, inconsistent, non-sticky snapshot taken at `timestamp`
    #[must_use]
    pub fn new(id: impl Into<SnapshotId>, timestamp: i64) -> Self {
        Self {
            id: id.into(),
            timestamp,
            is_consistent: false,
            is_automatic: true,
            is_sticky: false,
            in_backend: true,
            stored: 0,
        }
    }

    #[must_use]
    pub const fn consistent(mut self) -> Self {
        self.is_consistent = true;
        self
    }

    #[must_use]
    pub const fn sticky(mut self) -> Self {
        self.is_sticky = true;
        self
    }
}

/// Virtual block device
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VDisk {
    pub guid: VDiskGuid,
    /// Human-readable name
    #[serde(default)]
    pub name: String,
    /// Identifier used by the volume driver
    pub volume_id: VolumeId,
    /// Owning vPool
    pub vpool: VPoolGuid,
    /// StorageDriver currently serving the volume
    pub storagedriver_id: StorageDriverId,
    /// Snapshot of another vDisk this one was cloned from
    #[serde(default)]
    pub parent_snapshot_id: Option<SnapshotId>,
    /// DTL target configured by hand
    #[serde(default)]
    pub has_manual_dtl: bool,
    /// Retention override for this vDisk only
    #[serde(default)]
    pub snapshot_retention_policy: Option<RetentionPolicy>,
}

impl VDisk {
    #[must_use]
    pub fn new(
        guid: impl Into<VDiskGuid>,
        vpool: impl Into<VPoolGuid>,
        storagedriver_id: impl Into<StorageDriverId>,
    ) -> Self {
        let guid = guid.into();
        Self {
            name: guid.to_string(),
            volume_id: VolumeId::new(format!("vol-{guid}")),
            guid,
            vpool: vpool.into(),
            storagedriver_id: storagedriver_id.into(),
            parent_snapshot_id: None,
            has_manual_dtl: false,
            snapshot_retention_policy: None,
        }
    }

    #[must_use]
    pub fn cloned_from(mut self, snapshot: impl Into<SnapshotId>) -> Self {
        self.parent_snapshot_id = Some(snapshot.into());
        self
    }
}

/// Ports exposed by a StorageDriver
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageDriverPorts {
    pub dtl: u16,
    pub edge: u16,
    pub xmlrpc: u16,
    pub management: u16,
}

/// Volume driver instance serving one vPool on one StorageRouter
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageDriver {
    pub id: StorageDriverId,
    pub vpool: VPoolGuid,
    pub storagerouter: StorageRouterGuid,
    pub storage_ip: String,
    #[serde(default)]
    pub ports: StorageDriverPorts,
}

/// Domain membership of a StorageRouter
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainJunction {
    pub domain: DomainGuid,
    /// Secondary (recovery) domain rather than a primary one
    #[serde(default)]
    pub backup: bool,
}

/// Node participating in the cluster
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageRouter {
    pub guid: StorageRouterGuid,
    #[serde(default)]
    pub name: String,
    pub ip: String,
    #[serde(default)]
    pub machine_id: String,
    #[serde(default)]
    pub domains: Vec<DomainJunction>,
}

impl StorageRouter {
    /// Primary domains of this StorageRouter
    pub fn primary_domains(&self) -> impl Iterator<Item = &DomainGuid> {
        self.domains.iter().filter(|d| !d.backup).map(|d| &d.domain)
    }

    /// Secondary (recovery) domains of this StorageRouter
    pub fn secondary_domains(&self) -> impl Iterator<Item = &DomainGuid> {
        self.domains.iter().filter(|d| d.backup).map(|d| &d.domain)
    }
}

/// Opaque placement grouping
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    pub guid: DomainGuid,
    #[serde(default)]
    pub name: String,
}

/// How many vDisks an MDS service may host
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CapacityLimit {
    /// Capacity -1: always eligible, never preferred over a finite service
    Unbounded,
    /// Capacity 0: the service cannot take any vDisk
    Disabled,
    /// At most this many vDisks
    Limited(u64),
}

/// A vDisk hosted by an MDS service, as seen from the service
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MdsVDiskJunction {
    pub vdisk: VDiskGuid,
    pub is_master: bool,
}

/// Metadata server instance
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MdsService {
    pub id: MdsServiceId,
    /// Port the service listens on, on the StorageDriver's storage ip
    pub port: u16,
    /// -1 unbounded, 0 disabled, N at most N vDisks
    pub capacity: i64,
    /// Derived: vDisks currently configured on this service
    #[serde(skip)]
    pub vdisks: Vec<MdsVDiskJunction>,
}

impl MdsService {
    #[must_use]
    pub fn new(storagedriver: impl Into<StorageDriverId>, number: u32, port: u16, capacity: i64) -> Self {
        Self {
            id: MdsServiceId::new(storagedriver, number),
            port,
            capacity,
            vdisks: Vec::new(),
        }
    }

    #[must_use]
    pub const fn capacity_limit(&self) -> CapacityLimit {
        match self.capacity {
            0 => CapacityLimit::Disabled,
            c if c < 0 => CapacityLimit::Unbounded,
            #[allow(clippy::cast_sign_loss)]
            c => CapacityLimit::Limited(c as u64),
        }
    }
}

/// A (service, vDisk) junction as persisted
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MdsJunction {
    pub service: MdsServiceId,
    pub vdisk: VDiskGuid,
    pub is_master: bool,
}

/// vPool-level configuration
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VPoolConfiguration {
    #[serde(default)]
    pub dtl_enabled: bool,
    #[serde(default)]
    pub mds_safety: Option<u32>,
    #[serde(default)]
    pub mds_tlogs: Option<u64>,
    #[serde(default)]
    pub mds_maxload: Option<u64>,
}

impl VPoolConfiguration {
    /// Effective safety, never below 1
    #[must_use]
    pub fn safety(&self, defaults: &MdsDefaults) -> u32 {
        self.mds_safety.unwrap_or(defaults.safety).max(1)
    }

    #[must_use]
    pub fn max_load(&self, defaults: &MdsDefaults) -> u64 {
        self.mds_maxload.unwrap_or(defaults.max_load)
    }

    #[must_use]
    pub fn tlogs_behind(&self, defaults: &MdsDefaults) -> u64 {
        self.mds_tlogs.unwrap_or(defaults.tlogs_behind)
    }
}

/// Collection of StorageDrivers sharing a backend
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VPool {
    pub guid: VPoolGuid,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub configuration: VPoolConfiguration,
    /// Retention override for every vDisk of this vPool
    #[serde(default)]
    pub snapshot_retention_policy: Option<RetentionPolicy>,
}

impl VPool {
    #[must_use]
    pub fn new(guid: impl Into<VPoolGuid>) -> Self {
        let guid = guid.into();
        Self {
            name: guid.to_string(),
            guid,
            configuration: VPoolConfiguration::default(),
            snapshot_retention_policy: None,
        }
    }
}

//! Volume driver client contract

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use vdisk_common::{Error, SnapshotId, StorageDriverId, VDiskGuid, VPoolGuid, VolumeId};
use vdisk_model::{ObjectType, Snapshot};

/// Errors reported by the volume driver
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("call timed out")]
    Timeout,

    #[error("volume driver unavailable: {0}")]
    Unavailable(String),

    #[error("volume is being scrubbed")]
    BeingScrubbed,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("request rejected: {0}")]
    Rejected(String),
}

impl ClientError {
    /// Check if repeating the call may succeed
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Unavailable(_))
    }

    /// Convert into the engine error for a call made on behalf of `vdisk`
    #[must_use]
    pub fn into_error(self, vdisk: &VDiskGuid) -> Error {
        match self {
            Self::Timeout => Error::transient(format!("timeout on vdisk {vdisk}")),
            Self::Unavailable(msg) => Error::transient(msg),
            Self::BeingScrubbed => Error::ScrubConflict {
                vdisk: vdisk.clone(),
            },
            Self::NotFound(msg) | Self::Rejected(msg) => Error::backend(msg),
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Address of one MDS as the volume driver knows it
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MdsNodeConfig {
    pub address: String,
    pub port: u16,
}

impl MdsNodeConfig {
    #[must_use]
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }
}

impl fmt::Display for MdsNodeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Volume information reported by the volume driver
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub object_type: ObjectType,
    /// Ordered MDS configuration, master first
    pub metadata_backend_config: Vec<MdsNodeConfig>,
    /// StorageDriver currently serving the volume
    pub vrouter_id: StorageDriverId,
}

/// Metadata attached to a snapshot on creation
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub label: String,
    pub timestamp: i64,
    pub is_consistent: bool,
    pub is_automatic: bool,
    pub is_sticky: bool,
}

/// Per-volume operations of the volume driver
#[async_trait]
pub trait VolumeDriverClient: Send + Sync {
    async fn list_snapshots(&self, volume_id: &VolumeId) -> ClientResult<Vec<SnapshotId>>;

    async fn info_snapshot(
        &self,
        volume_id: &VolumeId,
        snapshot_id: &SnapshotId,
    ) -> ClientResult<Snapshot>;

    async fn create_snapshot(
        &self,
        volume_id: &VolumeId,
        snapshot_id: &SnapshotId,
        metadata: SnapshotMetadata,
    ) -> ClientResult<()>;

    async fn delete_snapshot(
        &self,
        volume_id: &VolumeId,
        snapshot_id: &SnapshotId,
    ) -> ClientResult<()>;

    /// How many tlogs `mds` lags behind for this volume
    async fn tlog_lag(&self, volume_id: &VolumeId, mds: &MdsNodeConfig) -> ClientResult<u64>;

    /// Replace the MDS configuration of a volume in one call, master first
    async fn set_manual_mds_config(
        &self,
        volume_id: &VolumeId,
        config: &[MdsNodeConfig],
    ) -> ClientResult<()>;

    async fn info_volume(&self, volume_id: &VolumeId) -> ClientResult<VolumeInfo>;
}

/// Volume driver clients per vPool
#[derive(Default, Clone)]
pub struct ClientPool {
    clients: HashMap<VPoolGuid, Arc<dyn VolumeDriverClient>>,
    fallback: Option<Arc<dyn VolumeDriverClient>>,
}

impl ClientPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pool answering every vPool with the same client
    #[must_use]
    pub fn shared(client: Arc<dyn VolumeDriverClient>) -> Self {
        Self {
            clients: HashMap::new(),
            fallback: Some(client),
        }
    }

    pub fn insert(&mut self, vpool: VPoolGuid, client: Arc<dyn VolumeDriverClient>) {
        self.clients.insert(vpool, client);
    }

    pub fn for_vpool(&self, vpool: &VPoolGuid) -> vdisk_common::Result<Arc<dyn VolumeDriverClient>> {
        self.clients
            .get(vpool)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| Error::Configuration(format!("no volume driver client for vpool {vpool}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_mapping() {
        let vdisk = VDiskGuid::new("vd-1");
        assert!(ClientError::Timeout.into_error(&vdisk).is_retryable());
        assert!(
            ClientError::BeingScrubbed
                .into_error(&vdisk)
                .is_scrub_conflict()
        );
        assert!(
            !ClientError::Rejected("no".into())
                .into_error(&vdisk)
                .is_retryable()
        );
        assert!(ClientError::Unavailable("down".into()).is_transient());
        assert!(!ClientError::NotFound("x".into()).is_transient());
    }

    #[test]
    fn test_mds_node_display() {
        assert_eq!(MdsNodeConfig::new("10.0.0.1", 26300).to_string(), "10.0.0.1:26300");
    }

    #[test]
    fn test_client_pool_without_client() {
        let pool = ClientPool::new();
        assert!(matches!(
            pool.for_vpool(&"vp".into()),
            Err(Error::Configuration(_))
        ));
    }
}

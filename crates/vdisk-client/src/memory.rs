//! In-memory volume driver
//!
//! Keeps per-volume snapshots, MDS configuration and tlog lags, and lets a
//! caller inject the failures the engines must cope with: scrub collisions,
//! transient outages, rejected deletes and rejected config writes.

use crate::client::{
    ClientError, ClientResult, MdsNodeConfig, SnapshotMetadata, VolumeDriverClient, VolumeInfo,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;
use vdisk_common::{SnapshotId, StorageDriverId, VolumeId};
use vdisk_model::{ObjectType, Snapshot};

/// One volume as the simulated driver sees it
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedVolume {
    pub object_type: ObjectType,
    pub vrouter_id: StorageDriverId,
    pub snapshots: BTreeMap<SnapshotId, Snapshot>,
    pub mds_config: Vec<MdsNodeConfig>,
    /// Tlog lag per MDS, keyed by `address:port`; absent means caught up
    pub tlog_lags: BTreeMap<String, u64>,
    /// Deletes collide with a running scrub while set
    pub being_scrubbed: bool,
}

impl SimulatedVolume {
    #[must_use]
    pub fn new(vrouter_id: impl Into<StorageDriverId>) -> Self {
        Self {
            vrouter_id: vrouter_id.into(),
            ..Self::default()
        }
    }
}

/// Serializable contents of the simulated driver
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryDriverState {
    pub volumes: BTreeMap<VolumeId, SimulatedVolume>,
    /// Snapshots whose delete is rejected
    pub failing_deletes: BTreeSet<SnapshotId>,
    /// Number of upcoming calls that fail as unavailable
    pub transient_failures: u32,
    /// Reject every MDS config write while set
    pub reject_config_writes: bool,
}

/// Volume driver keeping everything in memory
#[derive(Default)]
pub struct MemoryVolumeDriver {
    state: Mutex<MemoryDriverState>,
    delete_calls: AtomicU64,
    config_writes: AtomicU64,
}

impl MemoryVolumeDriver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_state(state: MemoryDriverState) -> Self {
        Self {
            state: Mutex::new(state),
            ..Self::default()
        }
    }

    /// Copy of the current contents
    #[must_use]
    pub fn state(&self) -> MemoryDriverState {
        self.state.lock().clone()
    }

    pub fn add_volume(&self, volume_id: VolumeId, volume: SimulatedVolume) {
        self.state.lock().volumes.insert(volume_id, volume);
    }

    pub fn add_snapshot(&self, volume_id: &VolumeId, snapshot: Snapshot) {
        if let Some(volume) = self.state.lock().volumes.get_mut(volume_id) {
            volume.snapshots.insert(snapshot.id.clone(), snapshot);
        }
    }

    /// Snapshots of a volume ordered by timestamp
    #[must_use]
    pub fn snapshots(&self, volume_id: &VolumeId) -> Vec<Snapshot> {
        let mut snapshots: Vec<Snapshot> = self
            .state
            .lock()
            .volumes
            .get(volume_id)
            .map(|v| v.snapshots.values().cloned().collect())
            .unwrap_or_default();
        snapshots.sort_by_key(|s| s.timestamp);
        snapshots
    }

    #[must_use]
    pub fn mds_config(&self, volume_id: &VolumeId) -> Vec<MdsNodeConfig> {
        self.state
            .lock()
            .volumes
            .get(volume_id)
            .map(|v| v.mds_config.clone())
            .unwrap_or_default()
    }

    pub fn set_mds_config(&self, volume_id: &VolumeId, config: Vec<MdsNodeConfig>) {
        if let Some(volume) = self.state.lock().volumes.get_mut(volume_id) {
            volume.mds_config = config;
        }
    }

    pub fn set_tlog_lag(&self, volume_id: &VolumeId, mds: &MdsNodeConfig, lag: u64) {
        if let Some(volume) = self.state.lock().volumes.get_mut(volume_id) {
            volume.tlog_lags.insert(mds.to_string(), lag);
        }
    }

    pub fn set_vrouter(&self, volume_id: &VolumeId, vrouter_id: StorageDriverId) {
        if let Some(volume) = self.state.lock().volumes.get_mut(volume_id) {
            volume.vrouter_id = vrouter_id;
        }
    }

    pub fn set_being_scrubbed(&self, volume_id: &VolumeId, being_scrubbed: bool) {
        if let Some(volume) = self.state.lock().volumes.get_mut(volume_id) {
            volume.being_scrubbed = being_scrubbed;
        }
    }

    pub fn fail_delete_of(&self, snapshot_id: SnapshotId) {
        self.state.lock().failing_deletes.insert(snapshot_id);
    }

    pub fn fail_next_calls(&self, count: u32) {
        self.state.lock().transient_failures = count;
    }

    pub fn reject_config_writes(&self, reject: bool) {
        self.state.lock().reject_config_writes = reject;
    }

    #[must_use]
    pub fn delete_calls(&self) -> u64 {
        self.delete_calls.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn config_writes(&self) -> u64 {
        self.config_writes.load(Ordering::Relaxed)
    }

    fn check_transient(state: &mut MemoryDriverState) -> ClientResult<()> {
        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            return Err(ClientError::Unavailable("injected outage".into()));
        }
        Ok(())
    }
}

fn missing(volume_id: &VolumeId) -> ClientError {
    ClientError::NotFound(format!("volume {volume_id}"))
}

#[async_trait]
impl VolumeDriverClient for MemoryVolumeDriver {
    async fn list_snapshots(&self, volume_id: &VolumeId) -> ClientResult<Vec<SnapshotId>> {
        let mut state = self.state.lock();
        Self::check_transient(&mut state)?;
        let volume = state.volumes.get(volume_id).ok_or_else(|| missing(volume_id))?;
        Ok(volume.snapshots.keys().cloned().collect())
    }

    async fn info_snapshot(
        &self,
        volume_id: &VolumeId,
        snapshot_id: &SnapshotId,
    ) -> ClientResult<Snapshot> {
        let mut state = self.state.lock();
        Self::check_transient(&mut state)?;
        let volume = state.volumes.get(volume_id).ok_or_else(|| missing(volume_id))?;
        volume
            .snapshots
            .get(snapshot_id)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("snapshot {snapshot_id}")))
    }

    async fn create_snapshot(
        &self,
        volume_id: &VolumeId,
        snapshot_id: &SnapshotId,
        metadata: SnapshotMetadata,
    ) -> ClientResult<()> {
        let mut state = self.state.lock();
        Self::check_transient(&mut state)?;
        let volume = state
            .volumes
            .get_mut(volume_id)
            .ok_or_else(|| missing(volume_id))?;
        if volume.snapshots.contains_key(snapshot_id) {
            return Err(ClientError::Rejected(format!(
                "snapshot {snapshot_id} already exists"
            )));
        }
        volume.snapshots.insert(
            snapshot_id.clone(),
            Snapshot {
                id: snapshot_id.clone(),
                timestamp: metadata.timestamp,
                is_consistent: metadata.is_consistent,
                is_automatic: metadata.is_automatic,
                is_sticky: metadata.is_sticky,
                in_backend: false,
                stored: 0,
            },
        );
        Ok(())
    }

    async fn delete_snapshot(
        &self,
        volume_id: &VolumeId,
        snapshot_id: &SnapshotId,
    ) -> ClientResult<()> {
        self.delete_calls.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();
        Self::check_transient(&mut state)?;
        if state.failing_deletes.contains(snapshot_id) {
            return Err(ClientError::Rejected(format!(
                "delete of snapshot {snapshot_id} refused"
            )));
        }
        let volume = state
            .volumes
            .get_mut(volume_id)
            .ok_or_else(|| missing(volume_id))?;
        if volume.being_scrubbed {
            return Err(ClientError::BeingScrubbed);
        }
        // Deleting an absent snapshot is a no-op
        if volume.snapshots.remove(snapshot_id).is_some() {
            debug!("Deleted snapshot {} of volume {}", snapshot_id, volume_id);
        }
        Ok(())
    }

    async fn tlog_lag(&self, volume_id: &VolumeId, mds: &MdsNodeConfig) -> ClientResult<u64> {
        let mut state = self.state.lock();
        Self::check_transient(&mut state)?;
        let volume = state.volumes.get(volume_id).ok_or_else(|| missing(volume_id))?;
        Ok(volume.tlog_lags.get(&mds.to_string()).copied().unwrap_or(0))
    }

    async fn set_manual_mds_config(
        &self,
        volume_id: &VolumeId,
        config: &[MdsNodeConfig],
    ) -> ClientResult<()> {
        let mut state = self.state.lock();
        Self::check_transient(&mut state)?;
        if state.reject_config_writes {
            return Err(ClientError::Rejected("mds config write refused".into()));
        }
        let volume = state
            .volumes
            .get_mut(volume_id)
            .ok_or_else(|| missing(volume_id))?;
        volume.mds_config = config.to_vec();
        self.config_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn info_volume(&self, volume_id: &VolumeId) -> ClientResult<VolumeInfo> {
        let mut state = self.state.lock();
        Self::check_transient(&mut state)?;
        let volume = state.volumes.get(volume_id).ok_or_else(|| missing(volume_id))?;
        Ok(VolumeInfo {
            object_type: volume.object_type,
            metadata_backend_config: volume.mds_config.clone(),
            vrouter_id: volume.vrouter_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver_with_volume() -> (MemoryVolumeDriver, VolumeId) {
        let driver = MemoryVolumeDriver::new();
        let volume_id = VolumeId::new("vol-1");
        driver.add_volume(volume_id.clone(), SimulatedVolume::new("sd-1"));
        driver.add_snapshot(&volume_id, Snapshot::new("s1", 100));
        driver.add_snapshot(&volume_id, Snapshot::new("s2", 50).consistent());
        (driver, volume_id)
    }

    #[test]
    fn test_simulated_volume_defaults() {
        let volume = SimulatedVolume::default();
        assert_eq!(volume.vrouter_id.as_str(), "");
        assert_eq!(volume.object_type, ObjectType::Base);
        assert!(volume.mds_config.is_empty());
        assert_eq!(SimulatedVolume::new("sd-1").vrouter_id.as_str(), "sd-1");
    }

    #[tokio::test]
    async fn test_snapshot_listing_and_delete() {
        let (driver, volume_id) = driver_with_volume();
        let ids = driver.list_snapshots(&volume_id).await.unwrap();
        assert_eq!(ids.len(), 2);

        let info = driver
            .info_snapshot(&volume_id, &"s2".into())
            .await
            .unwrap();
        assert!(info.is_consistent);

        driver.delete_snapshot(&volume_id, &"s1".into()).await.unwrap();
        // Idempotent
        driver.delete_snapshot(&volume_id, &"s1".into()).await.unwrap();
        assert_eq!(driver.snapshots(&volume_id).len(), 1);
        assert_eq!(driver.delete_calls(), 2);
    }

    #[tokio::test]
    async fn test_scrub_collision() {
        let (driver, volume_id) = driver_with_volume();
        driver.set_being_scrubbed(&volume_id, true);
        assert_eq!(
            driver.delete_snapshot(&volume_id, &"s1".into()).await,
            Err(ClientError::BeingScrubbed)
        );
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let (driver, volume_id) = driver_with_volume();
        driver.fail_next_calls(1);
        assert!(driver.list_snapshots(&volume_id).await.unwrap_err().is_transient());
        assert!(driver.list_snapshots(&volume_id).await.is_ok());

        driver.reject_config_writes(true);
        let config = vec![MdsNodeConfig::new("10.0.0.1", 26300)];
        assert!(driver.set_manual_mds_config(&volume_id, &config).await.is_err());
        driver.reject_config_writes(false);
        driver.set_manual_mds_config(&volume_id, &config).await.unwrap();
        let info = driver.info_volume(&volume_id).await.unwrap();
        assert_eq!(info.metadata_backend_config, config);
        assert_eq!(driver.config_writes(), 1);
    }

    #[tokio::test]
    async fn test_tlog_lag_defaults_to_caught_up() {
        let (driver, volume_id) = driver_with_volume();
        let mds = MdsNodeConfig::new("10.0.0.2", 26300);
        assert_eq!(driver.tlog_lag(&volume_id, &mds).await.unwrap(), 0);
        driver.set_tlog_lag(&volume_id, &mds, 250);
        assert_eq!(driver.tlog_lag(&volume_id, &mds).await.unwrap(), 250);
    }
}

//! Cluster state file: persisted entities plus the simulated volume driver

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use vdisk_client::MemoryDriverState;
use vdisk_model::ClusterModel;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterState {
    pub model: ClusterModel,
    pub volumes: MemoryDriverState,
}

impl ClusterState {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading state file {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing state file {}", path.display()))
    }

    /// Replace the file through a sibling so a crash never leaves half a state behind
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, text).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vdisk_client::SimulatedVolume;
    use vdisk_model::{Snapshot, VDisk, VPool};

    #[test]
    fn test_minimal_state() {
        let state: ClusterState = serde_json::from_str("{}").unwrap();
        assert!(state.model.vdisks.is_empty());
        assert!(state.volumes.volumes.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.json");

        let mut state = ClusterState::default();
        state.model.vpools.push(VPool::new("vpool-1"));
        let vdisk = VDisk::new("vd-1", "vpool-1", "sd-1");
        let mut volume = SimulatedVolume::new("sd-1");
        let snapshot = Snapshot::new("snap-1", 1_700_000_000).consistent();
        volume.snapshots.insert(snapshot.id.clone(), snapshot);
        state.volumes.volumes.insert(vdisk.volume_id.clone(), volume);
        state.model.vdisks.push(vdisk);

        state.save(&path).unwrap();
        assert_eq!(ClusterState::load(&path).unwrap(), state);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ClusterState::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(err.to_string().contains("absent.json"));
    }
}

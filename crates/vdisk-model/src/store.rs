//! Persistent store contract and an in-memory implementation.
//!
//! The engines only need a handful of reads (vDisks by StorageDriver, MDS
//! services by vPool, StorageRouter domains, vPool configuration) and one
//! write (the MDS junctions of a vDisk). [`MemoryStore`] keeps a
//! [`ClusterModel`] behind a lock; every method is one short transaction.

use crate::entities::{
    Domain, MdsJunction, MdsService, MdsVDiskJunction, StorageDriver, StorageRouter, VDisk, VPool,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;
use vdisk_common::{
    Error, MdsServiceId, Result, StorageDriverId, StorageRouterGuid, VDiskGuid, VPoolGuid,
};

/// Read/write access to the persisted entities
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_vdisk(&self, guid: &VDiskGuid) -> Result<VDisk>;

    async fn list_vdisks(&self) -> Result<Vec<VDisk>>;

    async fn list_vdisks_by_storagedriver(&self, id: &StorageDriverId) -> Result<Vec<VDisk>>;

    async fn list_vdisks_by_vpool(&self, vpool: &VPoolGuid) -> Result<Vec<VDisk>>;

    async fn get_vpool(&self, guid: &VPoolGuid) -> Result<VPool>;

    async fn list_vpools(&self) -> Result<Vec<VPool>>;

    async fn get_storagedriver(&self, id: &StorageDriverId) -> Result<StorageDriver>;

    async fn list_storagedrivers(&self) -> Result<Vec<StorageDriver>>;

    async fn get_storagerouter(&self, guid: &StorageRouterGuid) -> Result<StorageRouter>;

    /// MDS services of a vPool with their hosted vDisks filled in
    async fn list_mds_services(&self, vpool: &VPoolGuid) -> Result<Vec<MdsService>>;

    async fn mds_junctions_for_vdisk(&self, vdisk: &VDiskGuid) -> Result<Vec<MdsJunction>>;

    /// Replace every junction of `vdisk` with `junctions`
    async fn set_mds_junctions(&self, vdisk: &VDiskGuid, junctions: Vec<MdsJunction>)
    -> Result<()>;
}

/// Serializable snapshot of every persisted entity
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterModel {
    pub vpools: Vec<VPool>,
    pub storagerouters: Vec<StorageRouter>,
    pub storagedrivers: Vec<StorageDriver>,
    pub domains: Vec<Domain>,
    pub mds_services: Vec<MdsService>,
    pub vdisks: Vec<VDisk>,
    pub mds_junctions: Vec<MdsJunction>,
}

/// In-memory store
pub struct MemoryStore {
    model: RwLock<ClusterModel>,
    read_only: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::from_model(ClusterModel::default())
    }

    /// Create a store holding `model`
    #[must_use]
    pub fn from_model(model: ClusterModel) -> Self {
        Self {
            model: RwLock::new(model),
            read_only: AtomicBool::new(false),
        }
    }

    /// Copy of the current contents
    #[must_use]
    pub fn model(&self) -> ClusterModel {
        self.model.read().clone()
    }

    /// Reject every write with a store error while set
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    pub fn upsert_vpool(&self, vpool: VPool) {
        let mut model = self.model.write();
        model.vpools.retain(|v| v.guid != vpool.guid);
        model.vpools.push(vpool);
    }

    pub fn upsert_storagerouter(&self, storagerouter: StorageRouter) {
        let mut model = self.model.write();
        model.storagerouters.retain(|s| s.guid != storagerouter.guid);
        model.storagerouters.push(storagerouter);
    }

    pub fn upsert_storagedriver(&self, storagedriver: StorageDriver) {
        let mut model = self.model.write();
        model.storagedrivers.retain(|s| s.id != storagedriver.id);
        model.storagedrivers.push(storagedriver);
    }

    pub fn upsert_domain(&self, domain: Domain) {
        let mut model = self.model.write();
        model.domains.retain(|d| d.guid != domain.guid);
        model.domains.push(domain);
    }

    pub fn upsert_mds_service(&self, mut service: MdsService) {
        service.vdisks.clear();
        let mut model = self.model.write();
        model.mds_services.retain(|m| m.id != service.id);
        model.mds_services.push(service);
    }

    /// Remove an MDS service together with its junctions
    pub fn remove_mds_service(&self, id: &MdsServiceId) -> Option<MdsService> {
        let mut model = self.model.write();
        let pos = model.mds_services.iter().position(|m| &m.id == id)?;
        model.mds_junctions.retain(|j| &j.service != id);
        Some(model.mds_services.remove(pos))
    }

    pub fn set_mds_capacity(&self, id: &MdsServiceId, capacity: i64) -> Result<()> {
        let mut model = self.model.write();
        let service = model
            .mds_services
            .iter_mut()
            .find(|m| &m.id == id)
            .ok_or_else(|| Error::MdsServiceNotFound(id.clone()))?;
        service.capacity = capacity;
        Ok(())
    }

    pub fn upsert_vdisk(&self, vdisk: VDisk) {
        let mut model = self.model.write();
        model.vdisks.retain(|v| v.guid != vdisk.guid);
        model.vdisks.push(vdisk);
    }

    /// Record that a vDisk is now served by another StorageDriver
    pub fn move_vdisk(&self, guid: &VDiskGuid, storagedriver: &StorageDriverId) -> Result<()> {
        let mut model = self.model.write();
        let vdisk = model
            .vdisks
            .iter_mut()
            .find(|v| &v.guid == guid)
            .ok_or_else(|| Error::VDiskNotFound(guid.clone()))?;
        vdisk.storagedriver_id = storagedriver.clone();
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_vdisk(&self, guid: &VDiskGuid) -> Result<VDisk> {
        self.model
            .read()
            .vdisks
            .iter()
            .find(|v| &v.guid == guid)
            .cloned()
            .ok_or_else(|| Error::VDiskNotFound(guid.clone()))
    }

    async fn list_vdisks(&self) -> Result<Vec<VDisk>> {
        Ok(self.model.read().vdisks.clone())
    }

    async fn list_vdisks_by_storagedriver(&self, id: &StorageDriverId) -> Result<Vec<VDisk>> {
        let model = self.model.read();
        if !model.storagedrivers.iter().any(|s| &s.id == id) {
            return Err(Error::StorageDriverNotFound(id.clone()));
        }
        Ok(model
            .vdisks
            .iter()
            .filter(|v| &v.storagedriver_id == id)
            .cloned()
            .collect())
    }

    async fn list_vdisks_by_vpool(&self, vpool: &VPoolGuid) -> Result<Vec<VDisk>> {
        Ok(self
            .model
            .read()
            .vdisks
            .iter()
            .filter(|v| &v.vpool == vpool)
            .cloned()
            .collect())
    }

    async fn get_vpool(&self, guid: &VPoolGuid) -> Result<VPool> {
        self.model
            .read()
            .vpools
            .iter()
            .find(|v| &v.guid == guid)
            .cloned()
            .ok_or_else(|| Error::VPoolNotFound(guid.clone()))
    }

    async fn list_vpools(&self) -> Result<Vec<VPool>> {
        Ok(self.model.read().vpools.clone())
    }

    async fn get_storagedriver(&self, id: &StorageDriverId) -> Result<StorageDriver> {
        self.model
            .read()
            .storagedrivers
            .iter()
            .find(|s| &s.id == id)
            .cloned()
            .ok_or_else(|| Error::StorageDriverNotFound(id.clone()))
    }

    async fn list_storagedrivers(&self) -> Result<Vec<StorageDriver>> {
        Ok(self.model.read().storagedrivers.clone())
    }

    async fn get_storagerouter(&self, guid: &StorageRouterGuid) -> Result<StorageRouter> {
        self.model
            .read()
            .storagerouters
            .iter()
            .find(|s| &s.guid == guid)
            .cloned()
            .ok_or_else(|| Error::StorageRouterNotFound(guid.to_string()))
    }

    async fn list_mds_services(&self, vpool: &VPoolGuid) -> Result<Vec<MdsService>> {
        let model = self.model.read();
        let services = model
            .mds_services
            .iter()
            .filter(|m| {
                model
                    .storagedrivers
                    .iter()
                    .any(|sd| sd.id == m.id.storagedriver && &sd.vpool == vpool)
            })
            .map(|m| {
                let mut service = m.clone();
                service.vdisks = model
                    .mds_junctions
                    .iter()
                    .filter(|j| j.service == m.id)
                    .map(|j| MdsVDiskJunction {
                        vdisk: j.vdisk.clone(),
                        is_master: j.is_master,
                    })
                    .collect();
                service
            })
            .collect();
        Ok(services)
    }

    async fn mds_junctions_for_vdisk(&self, vdisk: &VDiskGuid) -> Result<Vec<MdsJunction>> {
        Ok(self
            .model
            .read()
            .mds_junctions
            .iter()
            .filter(|j| &j.vdisk == vdisk)
            .cloned()
            .collect())
    }

    async fn set_mds_junctions(
        &self,
        vdisk: &VDiskGuid,
        junctions: Vec<MdsJunction>,
    ) -> Result<()> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(Error::store("store is read-only"));
        }
        let mut model = self.model.write();
        model.mds_junctions.retain(|j| &j.vdisk != vdisk);
        debug!("Persisting {} mds junction(s) for vdisk {}", junctions.len(), vdisk);
        model.mds_junctions.extend(junctions);
        Ok(())
    }
}

//! Keeping every vDisk on enough MDS services
//!
//! A pass reads the live configuration from the volume driver and computes
//! the desired one:
//!
//! - The master belongs on the StorageRouter serving the vDisk. A local
//!   service within the load limit replaces a master elsewhere, but only
//!   once its tlog lag is within the vPool threshold. Until then the old
//!   master stays and the vDisk is flagged "checkup required". With a safety
//!   above one the candidate is added as a slave so it can catch up.
//! - Slaves come from the candidate order, never from the master's
//!   StorageRouter. Services already in the configuration keep their slot.
//!
//! A changed configuration is written in one call. The store mirrors the
//! volume driver afterwards; a failed mirror is repaired by the next pass.

use crate::candidates::CandidateSelector;
use crate::load::LoadPair;
use crate::outcome::{CheckupReport, Deferral, SafetyOutcome, VDiskFailure};
use crate::topology::{MdsNode, MdsTopology};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vdisk_client::{CallPolicy, EngineContext, MdsNodeConfig, VolumeDriverClient};
use vdisk_common::{
    EngineConfig, Error, MdsDefaults, MdsServiceId, Result, StorageRouterGuid, VDiskGuid,
    VPoolGuid,
};
use vdisk_model::{CacheExt, MdsJunction, MdsService, VDisk, VDiskGuard, cache_keys};

/// dtl status of a vDisk whose master could not be moved
pub const CHECKUP_REQUIRED: &str = "checkup_required";

const DTL_STATUS_TTL_SECS: u64 = 86_400;

/// Counters over the lifetime of an engine
#[derive(Debug, Default)]
pub struct SafetyStats {
    pub checked: AtomicU64,
    pub reconfigured: AtomicU64,
    pub deferred: AtomicU64,
    pub failed: AtomicU64,
}

impl SafetyStats {
    fn record(&self, outcome: &SafetyOutcome) {
        if outcome.changed {
            self.reconfigured.fetch_add(1, Ordering::Relaxed);
        }
        if outcome.checkup_required {
            self.deferred.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Places vDisks on MDS services
pub struct SafetyEngine {
    ctx: EngineContext,
    defaults: MdsDefaults,
    calls: CallPolicy,
    cancel: CancellationToken,
    stats: SafetyStats,
}

impl SafetyEngine {
    #[must_use]
    pub fn new(ctx: EngineContext, config: &EngineConfig) -> Self {
        Self {
            ctx,
            defaults: config.mds.clone(),
            calls: CallPolicy::from_config(&config.volumedriver),
            cancel: CancellationToken::new(),
            stats: SafetyStats::default(),
        }
    }

    /// Stop before the next vDisk or configuration write once `token` is cancelled
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    #[must_use]
    pub const fn stats(&self) -> &SafetyStats {
        &self.stats
    }

    /// Bring one vDisk to its MDS safety, holding its gate for the whole pass
    pub async fn ensure_safety_for_vdisk(&self, vdisk: &VDiskGuid) -> Result<SafetyOutcome> {
        let guard = self.ctx.gate.lock(vdisk).await;
        let result = self.ensure_safety(&guard).await;
        drop(guard);
        result
    }

    /// Same as [`Self::ensure_safety_for_vdisk`] for a caller already holding the gate
    pub async fn ensure_safety(&self, guard: &VDiskGuard) -> Result<SafetyOutcome> {
        let vdisk = guard.vdisk();
        self.stats.checked.fetch_add(1, Ordering::Relaxed);
        let mut restarted = false;
        loop {
            match self.reconfigure(vdisk).await {
                Ok(mut outcome) => {
                    outcome.restarted = restarted;
                    self.stats.record(&outcome);
                    return Ok(outcome);
                }
                Err(Error::MdsServiceNotFound(id))
                    if self.defaults.restart_on_vanished && !restarted =>
                {
                    warn!(
                        "MDS service {} vanished while configuring vdisk {}, recomputing",
                        id, vdisk
                    );
                    restarted = true;
                }
                Err(e) => {
                    if !matches!(e, Error::Cancelled) {
                        self.stats.failed.fetch_add(1, Ordering::Relaxed);
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Least loaded usable MDS service of `vpool` on `storagerouter`
    pub async fn get_preferred_mds(
        &self,
        storagerouter: &StorageRouterGuid,
        vpool: &VPoolGuid,
    ) -> Result<Option<(MdsService, LoadPair)>> {
        let topology = MdsTopology::load(self.ctx.store.as_ref(), vpool).await?;
        Ok(topology
            .least_loaded_on(storagerouter)
            .map(|node| (node.service.clone(), node.load)))
    }

    /// Rewrite the stored junctions of a vDisk from its live configuration
    pub async fn sync_vdisk_to_reality(&self, guid: &VDiskGuid) -> Result<Vec<MdsJunction>> {
        let _guard = self.ctx.gate.lock(guid).await;
        let store = self.ctx.store.as_ref();
        let vdisk = store.get_vdisk(guid).await?;
        let client = self.ctx.clients.for_vpool(&vdisk.vpool)?;
        let client = client.as_ref();
        let topology = MdsTopology::load(store, &vdisk.vpool).await?;

        let volume_id = &vdisk.volume_id;
        let info = self
            .calls
            .call("info_volume", move || client.info_volume(volume_id))
            .await
            .map_err(|e| e.into_error(guid))?;

        let mut junctions = Vec::with_capacity(info.metadata_backend_config.len());
        for (index, config) in info.metadata_backend_config.iter().enumerate() {
            match topology.node_for_config(config) {
                Some(node) => junctions.push(MdsJunction {
                    service: node.id().clone(),
                    vdisk: guid.clone(),
                    is_master: index == 0,
                }),
                None => warn!("vdisk {} is configured on unknown mds {}", guid, config),
            }
        }
        store.set_mds_junctions(guid, junctions.clone()).await?;
        info!(
            "Synced {} mds junction(s) of vdisk {} from the volume driver",
            junctions.len(),
            guid
        );
        Ok(junctions)
    }

    /// Run a safety pass on every vDisk of `vpool`. Fails with one aggregated
    /// error if any vDisk failed; deferred vDisks do not count as failures.
    pub async fn mds_checkup(&self, vpool: &VPoolGuid) -> Result<CheckupReport> {
        let mut report = CheckupReport::new();
        self.checkup(vpool, &mut report).await?;
        report.into_result()
    }

    /// [`Self::mds_checkup`] over every vPool
    pub async fn mds_checkup_all(&self) -> Result<CheckupReport> {
        let mut vpools = self.ctx.store.list_vpools().await?;
        vpools.sort_by(|a, b| a.guid.cmp(&b.guid));
        let mut report = CheckupReport::new();
        for vpool in vpools {
            self.checkup(&vpool.guid, &mut report).await?;
        }
        self.ctx.gate.prune();
        report.into_result()
    }

    /// Cached dtl status of a vDisk, set while a checkup is required
    #[must_use]
    pub fn dtl_status(&self, vdisk: &VDiskGuid) -> Option<String> {
        self.ctx.cache.get_as(&cache_keys::dtl_status(vdisk))
    }

    async fn checkup(&self, vpool: &VPoolGuid, report: &mut CheckupReport) -> Result<()> {
        let mut vdisks = self.ctx.store.list_vdisks_by_vpool(vpool).await?;
        vdisks.sort_by(|a, b| a.guid.cmp(&b.guid));
        info!("MDS checkup of vpool {}: {} vdisk(s)", vpool, vdisks.len());
        report.vpools.push(vpool.clone());

        for vdisk in vdisks {
            if self.cancel.is_cancelled() {
                warn!("MDS checkup of vpool {} cancelled", vpool);
                return Err(Error::Cancelled);
            }
            match self.ensure_safety_for_vdisk(&vdisk.guid).await {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) if e.is_non_fatal() => {
                    info!("MDS checkup of vdisk {} deferred: {}", vdisk.guid, e);
                    report.deferred.push(VDiskFailure::new(vdisk.guid, &e));
                }
                Err(e) => {
                    warn!("MDS checkup of vdisk {} failed: {}", vdisk.guid, e);
                    report.failures.push(VDiskFailure::new(vdisk.guid, &e));
                }
            }
        }

        info!(
            "MDS checkup of vpool {} done: {} reconfigured, {} checkup(s) required, {} failed",
            vpool,
            report.changed_count(),
            report.checkup_required().count(),
            report.failures.len()
        );
        Ok(())
    }

    async fn reconfigure(&self, guid: &VDiskGuid) -> Result<SafetyOutcome> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let store = self.ctx.store.as_ref();
        let vdisk = store.get_vdisk(guid).await?;
        let vpool = store.get_vpool(&vdisk.vpool).await?;
        let client = self.ctx.clients.for_vpool(&vpool.guid)?;
        let client = client.as_ref();
        let safety = usize::try_from(vpool.configuration.safety(&self.defaults)).unwrap_or(1);
        let max_load = vpool.configuration.max_load(&self.defaults);
        let threshold = vpool.configuration.tlogs_behind(&self.defaults);
        let topology = MdsTopology::load(store, &vpool.guid).await?;

        let volume_id = &vdisk.volume_id;
        let info = self
            .calls
            .call("info_volume", move || client.info_volume(volume_id))
            .await
            .map_err(|e| e.into_error(guid))?;

        let mut previous = Vec::with_capacity(info.metadata_backend_config.len());
        for config in &info.metadata_backend_config {
            match topology.node_for_config(config) {
                Some(node) => previous.push(node.id().clone()),
                None => warn!("vdisk {} is configured on unknown mds {}", guid, config),
            }
        }
        let current_master = info
            .metadata_backend_config
            .first()
            .and_then(|config| topology.node_for_config(config));

        // The volume driver knows where the vDisk runs; the model may lag behind a move
        let serving_sd = if topology.storagerouter_of(&info.vrouter_id).is_some() {
            &info.vrouter_id
        } else {
            &vdisk.storagedriver_id
        };
        let serving = topology
            .storagerouter_of(serving_sd)
            .ok_or_else(|| Error::StorageDriverNotFound(serving_sd.clone()))?;
        let selector =
            CandidateSelector::new(&topology, serving, guid, max_load).with_previous(&previous);

        let preferred = selector
            .local()
            .find(|c| current_master.is_some_and(|m| m.id() == c.node.id()))
            .or_else(|| selector.local().next())
            .map(|c| c.node);

        let mut deferral = None;
        let master: &MdsNode = match (preferred, current_master) {
            (Some(candidate), Some(master)) if candidate.id() != master.id() => {
                match self.catch_up_lag(client, &vdisk, candidate).await {
                    Some(lag) if lag <= threshold => {
                        info!(
                            "Moving master of vdisk {} from {} to {} ({} tlogs behind)",
                            guid,
                            master.id(),
                            candidate.id(),
                            lag
                        );
                        candidate
                    }
                    lag => {
                        let reason = Error::TlogLag {
                            vdisk: guid.clone(),
                            candidate: candidate.id().clone(),
                            lag: lag.unwrap_or(u64::MAX),
                            threshold,
                        };
                        warn!("Checkup required: {}", reason);
                        deferral = Some(Deferral {
                            candidate: candidate.id().clone(),
                            lag,
                            threshold,
                        });
                        master
                    }
                }
            }
            (_, Some(master)) => master,
            (Some(candidate), None) => candidate,
            (None, None) => {
                // A first master stays local even beyond the load limit
                let forced = topology
                    .least_loaded_on(&serving.guid)
                    .or_else(|| selector.ordered().next().map(|c| c.node));
                let Some(node) = forced else {
                    warn!("No mds service can host vdisk {}", guid);
                    return Err(Error::LoadExceeded {
                        vpool: vpool.guid.clone(),
                        max_load,
                    });
                };
                debug!("First master of vdisk {} is {}", guid, node.id());
                node
            }
        };

        let mut chosen: Vec<&MdsNode> = vec![master];
        // The candidate catches up as a slave, even on the master's StorageRouter
        if let Some(node) = deferral
            .as_ref()
            .filter(|_| safety > 1)
            .and_then(|d| topology.node(&d.candidate))
        {
            chosen.push(node);
        }
        let (reused, fresh): (Vec<_>, Vec<_>) = selector
            .ordered()
            .filter(|c| c.node.storagerouter != master.storagerouter)
            .partition(|c| c.previous.is_some());
        for candidate in reused.into_iter().chain(fresh) {
            if chosen.len() >= safety {
                break;
            }
            if chosen.iter().all(|n| n.id() != candidate.node.id()) {
                chosen.push(candidate.node);
            }
        }
        if chosen.len() < safety {
            warn!(
                "vdisk {} runs on {} of {} mds services",
                guid,
                chosen.len(),
                safety
            );
        }

        let services: Vec<MdsServiceId> = chosen.iter().map(|n| n.id().clone()).collect();
        let config: Vec<MdsNodeConfig> = chosen.iter().map(|n| n.config()).collect();
        let changed = config != info.metadata_backend_config;
        if changed {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            self.ensure_services_exist(&vpool.guid, &services).await?;
            let new_config = config.as_slice();
            self.calls
                .call("set_manual_mds_config", move || {
                    client.set_manual_mds_config(volume_id, new_config)
                })
                .await
                .map_err(|e| Error::ConfigurationWrite {
                    vdisk: guid.clone(),
                    reason: e.to_string(),
                })?;
            info!(
                "Configured vdisk {} on {}",
                guid,
                services
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            self.ctx.cache.delete(&cache_keys::volume_info(guid));
        }

        let persisted = self.persist(guid, &services).await;
        let checkup_required = deferral.is_some() || master.storagerouter != serving.guid;
        self.record_dtl_status(guid, checkup_required);

        Ok(SafetyOutcome {
            vdisk: guid.clone(),
            master: master.id().clone(),
            services,
            config,
            changed,
            persisted,
            checkup_required,
            deferral,
            restarted: false,
        })
    }

    async fn catch_up_lag(
        &self,
        client: &dyn VolumeDriverClient,
        vdisk: &VDisk,
        candidate: &MdsNode,
    ) -> Option<u64> {
        let volume_id = &vdisk.volume_id;
        let config = candidate.config();
        let config = &config;
        match self
            .calls
            .call("tlog_lag", move || client.tlog_lag(volume_id, config))
            .await
        {
            Ok(lag) => Some(lag),
            Err(e) => {
                warn!(
                    "Could not read tlog lag of {} for vdisk {}: {}",
                    candidate.id(),
                    vdisk.guid,
                    e
                );
                None
            }
        }
    }

    /// Services can be removed while a pass runs
    async fn ensure_services_exist(
        &self,
        vpool: &VPoolGuid,
        services: &[MdsServiceId],
    ) -> Result<()> {
        let live: HashSet<MdsServiceId> = self
            .ctx
            .store
            .list_mds_services(vpool)
            .await?
            .into_iter()
            .map(|s| s.id)
            .collect();
        match services.iter().find(|id| !live.contains(*id)) {
            Some(missing) => Err(Error::MdsServiceNotFound(missing.clone())),
            None => Ok(()),
        }
    }

    /// Mirror `services` into the store; false when the store refused
    async fn persist(&self, vdisk: &VDiskGuid, services: &[MdsServiceId]) -> bool {
        let junctions: Vec<MdsJunction> = services
            .iter()
            .enumerate()
            .map(|(index, service)| MdsJunction {
                service: service.clone(),
                vdisk: vdisk.clone(),
                is_master: index == 0,
            })
            .collect();
        match self.ctx.store.mds_junctions_for_vdisk(vdisk).await {
            Ok(stored) if stored == junctions => return true,
            Ok(_) => {}
            Err(e) => debug!("Could not read mds junctions of vdisk {}: {}", vdisk, e),
        }
        match self.ctx.store.set_mds_junctions(vdisk, junctions).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "Could not persist mds junctions of vdisk {}, the next checkup reconciles them: {}",
                    vdisk, e
                );
                false
            }
        }
    }

    fn record_dtl_status(&self, vdisk: &VDiskGuid, checkup_required: bool) {
        let key = cache_keys::dtl_status(vdisk);
        if checkup_required {
            self.ctx
                .cache
                .set_as(&key, &CHECKUP_REQUIRED, DTL_STATUS_TTL_SECS);
        } else {
            self.ctx.cache.delete(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use vdisk_client::{ClientPool, MemoryVolumeDriver, SimulatedVolume};
    use vdisk_common::ManualClock;
    use vdisk_model::{MemoryStore, StorageDriver, StorageRouter, Store, VPool};

    struct Fixture {
        store: Arc<MemoryStore>,
        driver: Arc<MemoryVolumeDriver>,
        engine: SafetyEngine,
    }

    /// Three StorageRouters with one MDS service (capacity 10) each
    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let driver = Arc::new(MemoryVolumeDriver::new());
        store.upsert_vpool(VPool::new("vp"));
        for n in 1..=3 {
            store.upsert_storagerouter(StorageRouter {
                guid: format!("sr-{n}").into(),
                name: format!("node-{n}"),
                ip: format!("10.0.0.{n}"),
                machine_id: String::new(),
                domains: Vec::new(),
            });
            store.upsert_storagedriver(StorageDriver {
                id: format!("sd-{n}").into(),
                vpool: "vp".into(),
                storagerouter: format!("sr-{n}").into(),
                storage_ip: format!("172.16.0.{n}"),
                ports: Default::default(),
            });
            store.upsert_mds_service(MdsService::new(format!("sd-{n}"), 0, 26300, 10));
        }
        let ctx = EngineContext::new(
            store.clone(),
            ClientPool::shared(driver.clone()),
            Arc::new(ManualClock::new(0)),
        );
        let mut config = EngineConfig::default();
        config.volumedriver.retry_backoff_ms = 1;
        Fixture {
            engine: SafetyEngine::new(ctx, &config),
            store,
            driver,
        }
    }

    fn add_vdisk(f: &Fixture, guid: &str, storagedriver: &str) -> VDisk {
        let vdisk = VDisk::new(guid, "vp", storagedriver);
        f.store.upsert_vdisk(vdisk.clone());
        f.driver
            .add_volume(vdisk.volume_id.clone(), SimulatedVolume::new(storagedriver));
        vdisk
    }

    fn mds(storagedriver: &str) -> MdsServiceId {
        MdsServiceId::new(storagedriver, 0)
    }

    #[tokio::test]
    async fn test_fresh_vdisk_gets_local_master_and_slaves() {
        let f = fixture();
        let vdisk = add_vdisk(&f, "vd-1", "sd-2");

        let outcome = f.engine.ensure_safety_for_vdisk(&vdisk.guid).await.unwrap();
        assert_eq!(outcome.master, mds("sd-2"));
        assert_eq!(outcome.slaves(), &[mds("sd-1"), mds("sd-3")]);
        assert!(outcome.changed);
        assert!(outcome.persisted);
        assert!(!outcome.checkup_required);

        assert_eq!(
            f.driver.mds_config(&vdisk.volume_id),
            vec![
                MdsNodeConfig::new("172.16.0.2", 26300),
                MdsNodeConfig::new("172.16.0.1", 26300),
                MdsNodeConfig::new("172.16.0.3", 26300),
            ]
        );
        let junctions = f.store.mds_junctions_for_vdisk(&vdisk.guid).await.unwrap();
        assert_eq!(junctions.len(), 3);
        assert!(junctions[0].is_master && junctions[0].service == mds("sd-2"));
    }

    #[tokio::test]
    async fn test_second_pass_changes_nothing() {
        let f = fixture();
        let vdisk = add_vdisk(&f, "vd-1", "sd-1");
        f.engine.ensure_safety_for_vdisk(&vdisk.guid).await.unwrap();
        let writes = f.driver.config_writes();

        let outcome = f.engine.ensure_safety_for_vdisk(&vdisk.guid).await.unwrap();
        assert!(!outcome.changed);
        assert_eq!(f.driver.config_writes(), writes);
        assert_eq!(f.engine.stats().checked.load(Ordering::Relaxed), 2);
        assert_eq!(f.engine.stats().reconfigured.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_safety_is_capped_by_the_cluster() {
        let f = fixture();
        let mut vpool = VPool::new("vp");
        vpool.configuration.mds_safety = Some(5);
        f.store.upsert_vpool(vpool);
        let vdisk = add_vdisk(&f, "vd-1", "sd-1");

        let outcome = f.engine.ensure_safety_for_vdisk(&vdisk.guid).await.unwrap();
        assert_eq!(outcome.services.len(), 3);
    }

    #[tokio::test]
    async fn test_deferral_at_safety_one_keeps_a_single_service() {
        let f = fixture();
        let mut vpool = VPool::new("vp");
        vpool.configuration.mds_safety = Some(1);
        f.store.upsert_vpool(vpool);
        let vdisk = add_vdisk(&f, "vd-1", "sd-1");
        f.engine.ensure_safety_for_vdisk(&vdisk.guid).await.unwrap();

        f.driver.set_vrouter(&vdisk.volume_id, "sd-2".into());
        f.driver.set_tlog_lag(
            &vdisk.volume_id,
            &MdsNodeConfig::new("172.16.0.2", 26300),
            500,
        );
        let outcome = f.engine.ensure_safety_for_vdisk(&vdisk.guid).await.unwrap();
        assert_eq!(outcome.services, vec![mds("sd-1")]);
        assert!(!outcome.changed);
        assert!(outcome.checkup_required);
        assert_eq!(outcome.deferral.unwrap().candidate, mds("sd-2"));
        assert_eq!(f.driver.mds_config(&vdisk.volume_id).len(), 1);
        assert_eq!(
            f.engine.dtl_status(&vdisk.guid).as_deref(),
            Some(CHECKUP_REQUIRED)
        );
    }

    #[tokio::test]
    async fn test_no_usable_service() {
        let f = fixture();
        for n in 1..=3 {
            f.store
                .set_mds_capacity(&mds(&format!("sd-{n}")), 0)
                .unwrap();
        }
        let vdisk = add_vdisk(&f, "vd-1", "sd-1");

        let result = f.engine.ensure_safety_for_vdisk(&vdisk.guid).await;
        assert!(matches!(result, Err(Error::LoadExceeded { .. })));
        assert!(f.driver.mds_config(&vdisk.volume_id).is_empty());
        assert_eq!(f.engine.stats().failed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_preferred_mds() {
        let f = fixture();
        f.store
            .upsert_mds_service(MdsService::new("sd-1", 1, 26301, 10));
        let vdisk = add_vdisk(&f, "vd-1", "sd-1");
        f.engine.ensure_safety_for_vdisk(&vdisk.guid).await.unwrap();

        // sd-1#0 now hosts the master, sd-1#1 is idle
        let (service, load) = f
            .engine
            .get_preferred_mds(&"sr-1".into(), &"vp".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(service.id, MdsServiceId::new("sd-1", 1));
        assert_eq!(load.now, crate::load::Load::Percent(0));

        let none = f
            .engine
            .get_preferred_mds(&"sr-9".into(), &"vp".into())
            .await
            .unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn test_sync_vdisk_to_reality() {
        let f = fixture();
        let vdisk = add_vdisk(&f, "vd-1", "sd-1");
        f.driver.set_mds_config(
            &vdisk.volume_id,
            vec![
                MdsNodeConfig::new("172.16.0.3", 26300),
                MdsNodeConfig::new("192.168.1.1", 26300),
                MdsNodeConfig::new("172.16.0.1", 26300),
            ],
        );

        let junctions = f.engine.sync_vdisk_to_reality(&vdisk.guid).await.unwrap();
        let services: Vec<_> = junctions.iter().map(|j| j.service.clone()).collect();
        assert_eq!(services, vec![mds("sd-3"), mds("sd-1")]);
        assert!(junctions[0].is_master);
        assert!(!junctions[1].is_master);
        assert_eq!(
            f.store.mds_junctions_for_vdisk(&vdisk.guid).await.unwrap(),
            junctions
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_write() {
        let f = fixture();
        let vdisk = add_vdisk(&f, "vd-1", "sd-1");
        let token = CancellationToken::new();
        let engine = f.engine.with_cancellation(token.clone());
        token.cancel();

        let result = engine.ensure_safety_for_vdisk(&vdisk.guid).await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(f.driver.config_writes(), 0);
        // The gate was released
        assert!(engine.ctx.gate.try_lock(&vdisk.guid).is_some());
    }
}

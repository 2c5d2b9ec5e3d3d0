//! Retention sweep over the vDisks of a StorageDriver

use crate::bucket::{Bucket, BucketChain};
use crate::policy::resolve_policy;
use crate::report::{
    Protection, ProtectedSnapshot, RetentionReport, SkipReason, SnapshotFailure, VDiskRetention,
};
use futures::StreamExt;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vdisk_client::{CallPolicy, ClientError, EngineContext, VolumeDriverClient, VolumeInfo};
use vdisk_common::{
    EngineConfig, Error, Result, RetentionConfig, RetentionPolicy, SnapshotId, StorageDriverId,
};
use vdisk_model::{CacheExt, ObjectType, Snapshot, VDisk, cache_keys};

/// StorageDrivers swept at the same time by [`RetentionEngine::delete_snapshots`]
const SWEEP_CONCURRENCY: usize = 4;

/// Counters over the lifetime of an engine
#[derive(Debug, Default)]
pub struct RetentionStats {
    pub vdisks: AtomicU64,
    pub deleted: AtomicU64,
    pub protected: AtomicU64,
    pub skipped: AtomicU64,
    pub failed: AtomicU64,
}

impl RetentionStats {
    fn record(&self, entry: &VDiskRetention) {
        self.vdisks.fetch_add(1, Ordering::Relaxed);
        self.deleted
            .fetch_add(entry.deleted.len() as u64, Ordering::Relaxed);
        self.protected
            .fetch_add(entry.protected.len() as u64, Ordering::Relaxed);
        if entry.skipped.is_some() {
            self.skipped.fetch_add(1, Ordering::Relaxed);
        }
        self.failed
            .fetch_add(entry.failures().count() as u64, Ordering::Relaxed);
    }
}

/// Inputs shared by every vDisk of one pass
struct Pass<'a> {
    client: &'a dyn VolumeDriverClient,
    parents: &'a HashSet<SnapshotId>,
    now: i64,
    dry_run: bool,
}

/// Deletes snapshots that fall out of the retention policy
pub struct RetentionEngine {
    ctx: EngineContext,
    config: RetentionConfig,
    calls: CallPolicy,
    cancel: CancellationToken,
    stats: RetentionStats,
}

impl RetentionEngine {
    #[must_use]
    pub fn new(ctx: EngineContext, config: &EngineConfig) -> Self {
        Self {
            ctx,
            config: config.retention.clone(),
            calls: CallPolicy::from_config(&config.volumedriver),
            cancel: CancellationToken::new(),
            stats: RetentionStats::default(),
        }
    }

    /// Stop between volume driver calls once `token` is cancelled
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    #[must_use]
    pub const fn stats(&self) -> &RetentionStats {
        &self.stats
    }

    /// Apply retention at `now` to every vDisk hosted by `storagedriver`.
    /// Fails with one aggregated error if any snapshot could not be removed;
    /// skipped vDisks do not count as failures.
    pub async fn delete_snapshots_for_storagedriver(
        &self,
        storagedriver: &StorageDriverId,
        now: i64,
    ) -> Result<RetentionReport> {
        self.run(storagedriver, now, false).await?.into_result()
    }

    /// Compute what a pass at `now` would delete without deleting anything
    pub async fn plan_for_storagedriver(
        &self,
        storagedriver: &StorageDriverId,
        now: i64,
    ) -> Result<RetentionReport> {
        self.run(storagedriver, now, true).await
    }

    /// Apply retention on every StorageDriver
    pub async fn delete_snapshots(&self, now: i64) -> Result<Vec<RetentionReport>> {
        let (reports, failures) = self.sweep(now, false).await?;
        self.ctx.gate.prune();
        if failures.is_empty() {
            Ok(reports)
        } else {
            Err(Error::SnapshotDeletionFailed {
                scope: "all storagedrivers".into(),
                failures,
            })
        }
    }

    /// Dry-run counterpart of [`Self::delete_snapshots`]
    pub async fn plan_snapshots(&self, now: i64) -> Result<Vec<RetentionReport>> {
        let (reports, _) = self.sweep(now, true).await?;
        Ok(reports)
    }

    /// Reference time of a scheduled pass
    #[must_use]
    pub fn now(&self) -> i64 {
        self.ctx.clock.now()
    }

    async fn sweep(&self, now: i64, dry_run: bool) -> Result<(Vec<RetentionReport>, Vec<String>)> {
        let storagedrivers = self.ctx.store.list_storagedrivers().await?;
        info!(
            "Retention sweep over {} storagedriver(s) at {}",
            storagedrivers.len(),
            now
        );

        let results: Vec<_> = futures::stream::iter(storagedrivers)
            .map(move |sd| async move {
                let result = self.run(&sd.id, now, dry_run).await;
                (sd.id, result)
            })
            .buffer_unordered(SWEEP_CONCURRENCY)
            .collect()
            .await;

        let mut reports = Vec::new();
        let mut failures = Vec::new();
        for (storagedriver, result) in results {
            match result {
                Ok(report) => {
                    failures.extend(report.failures());
                    reports.push(report);
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    warn!("Retention on storagedriver {} failed: {}", storagedriver, e);
                    failures.push(format!("storagedriver {storagedriver}: {e}"));
                }
            }
        }
        reports.sort_by(|a, b| a.storagedriver.cmp(&b.storagedriver));
        Ok((reports, failures))
    }

    async fn run(
        &self,
        storagedriver_id: &StorageDriverId,
        now: i64,
        dry_run: bool,
    ) -> Result<RetentionReport> {
        let storagedriver = self.ctx.store.get_storagedriver(storagedriver_id).await?;
        let vpool = self.ctx.store.get_vpool(&storagedriver.vpool).await?;
        let client = self.ctx.clients.for_vpool(&vpool.guid)?;

        // Clone parents may live on any StorageDriver
        let parents: HashSet<SnapshotId> = self
            .ctx
            .store
            .list_vdisks()
            .await?
            .into_iter()
            .filter_map(|v| v.parent_snapshot_id)
            .collect();
        let vdisks = self
            .ctx
            .store
            .list_vdisks_by_storagedriver(storagedriver_id)
            .await?;
        info!(
            "Retention pass on storagedriver {}: {} vdisk(s), dry run {}",
            storagedriver_id,
            vdisks.len(),
            dry_run
        );

        let pass = Pass {
            client: client.as_ref(),
            parents: &parents,
            now,
            dry_run,
        };
        let mut report = RetentionReport::new(storagedriver_id.clone(), now, dry_run);
        for vdisk in vdisks {
            if self.cancel.is_cancelled() {
                warn!("Retention pass on storagedriver {} cancelled", storagedriver_id);
                return Err(Error::Cancelled);
            }
            let (policy, source) = resolve_policy(&vdisk, &vpool, &self.config.default_policy);
            let mut entry = VDiskRetention::new(vdisk.guid.clone(), source);
            match self.retain(&pass, &vdisk, policy, &mut entry).await {
                Ok(()) => {}
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    warn!("Retention of vdisk {} failed: {}", vdisk.guid, e);
                    entry.error = Some(e.to_string());
                }
            }
            self.stats.record(&entry);
            report.vdisks.push(entry);
        }

        info!(
            "Retention pass on storagedriver {} done: {} deleted, {} skipped, {} failed",
            storagedriver_id,
            report.deleted_count(),
            report.skipped().count(),
            report.failures().len()
        );
        Ok(report)
    }

    async fn retain(
        &self,
        pass: &Pass<'_>,
        vdisk: &VDisk,
        policy: &RetentionPolicy,
        entry: &mut VDiskRetention,
    ) -> Result<()> {
        let guard = self.ctx.gate.lock(&vdisk.guid).await;
        if guard.being_scrubbed() {
            warn!("Skipping vdisk {}: being scrubbed", vdisk.guid);
            entry.skipped = Some(SkipReason::BeingScrubbed);
            return Ok(());
        }

        let info = self.volume_info(pass.client, vdisk).await?;
        if info.object_type != ObjectType::Base {
            debug!("Skipping vdisk {}: {:?} volume", vdisk.guid, info.object_type);
            entry.skipped = Some(SkipReason::NotBase(info.object_type));
            return Ok(());
        }

        let mut chain = BucketChain::build(policy, pass.now);
        let newer = chain.distribute(self.snapshots(pass.client, vdisk).await?);
        if !newer.is_empty() {
            debug!(
                "vdisk {} has {} snapshot(s) newer than {}",
                vdisk.guid,
                newer.len(),
                pass.now
            );
        }

        entry.protected.extend(
            chain
                .buckets()
                .iter()
                .flat_map(Bucket::retained_sticky)
                .map(|s| ProtectedSnapshot {
                    snapshot: s.id.clone(),
                    reason: Protection::Sticky,
                }),
        );

        let mut result = Ok(());
        for snapshot in chain.obsolete() {
            if let Err(e) = ensure_not_clone_parent(vdisk, snapshot, pass.parents) {
                debug!("Keeping snapshot: {}", e);
                entry.protected.push(ProtectedSnapshot {
                    snapshot: snapshot.id.clone(),
                    reason: Protection::CloneParent,
                });
                continue;
            }
            if pass.dry_run {
                entry.planned.push(snapshot.id.clone());
                continue;
            }
            if self.cancel.is_cancelled() {
                result = Err(Error::Cancelled);
                break;
            }

            let client = pass.client;
            let volume_id = &vdisk.volume_id;
            let snapshot_id = &snapshot.id;
            match self
                .calls
                .call("delete_snapshot", move || {
                    client.delete_snapshot(volume_id, snapshot_id)
                })
                .await
            {
                Ok(()) => {
                    info!("Deleted snapshot {} of vdisk {}", snapshot.id, vdisk.guid);
                    entry.deleted.push(snapshot.id.clone());
                }
                Err(ClientError::BeingScrubbed) => {
                    warn!(
                        "vdisk {} is being scrubbed, abandoning its remaining snapshots",
                        vdisk.guid
                    );
                    entry.skipped = Some(SkipReason::ScrubConflict);
                    break;
                }
                Err(e) => {
                    let e = e.into_error(&vdisk.guid);
                    warn!(
                        "Failed to delete snapshot {} of vdisk {}: {}",
                        snapshot.id, vdisk.guid, e
                    );
                    entry.failed.push(SnapshotFailure {
                        snapshot: snapshot.id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if !entry.deleted.is_empty() {
            self.ctx.cache.delete(&cache_keys::snapshots(&vdisk.guid));
        }
        drop(guard);
        result
    }

    async fn volume_info(
        &self,
        client: &dyn VolumeDriverClient,
        vdisk: &VDisk,
    ) -> Result<VolumeInfo> {
        let key = cache_keys::volume_info(&vdisk.guid);
        if let Some(info) = self.ctx.cache.get_as::<VolumeInfo>(&key) {
            return Ok(info);
        }
        let volume_id = &vdisk.volume_id;
        let info = self
            .calls
            .call("info_volume", move || client.info_volume(volume_id))
            .await
            .map_err(|e| e.into_error(&vdisk.guid))?;
        self.ctx
            .cache
            .set_as(&key, &info, self.config.snapshot_cache_ttl_secs);
        Ok(info)
    }

    /// Snapshots of a vDisk, from the cache or the volume driver
    async fn snapshots(&self, client: &dyn VolumeDriverClient, vdisk: &VDisk) -> Result<Vec<Snapshot>> {
        let key = cache_keys::snapshots(&vdisk.guid);
        if let Some(snapshots) = self.ctx.cache.get_as::<Vec<Snapshot>>(&key) {
            return Ok(snapshots);
        }

        let volume_id = &vdisk.volume_id;
        let ids = self
            .calls
            .call("list_snapshots", move || client.list_snapshots(volume_id))
            .await
            .map_err(|e| e.into_error(&vdisk.guid))?;
        let infos = join_all(ids.iter().map(move |snapshot_id| {
            self.calls.call("info_snapshot", move || {
                client.info_snapshot(volume_id, snapshot_id)
            })
        }))
        .await;

        let mut snapshots = Vec::with_capacity(ids.len());
        for (snapshot_id, info) in ids.iter().zip(infos) {
            match info {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(ClientError::NotFound(_)) => {
                    debug!("Snapshot {} of vdisk {} vanished", snapshot_id, vdisk.guid);
                }
                Err(e) => return Err(e.into_error(&vdisk.guid)),
            }
        }
        self.ctx
            .cache
            .set_as(&key, &snapshots, self.config.snapshot_cache_ttl_secs);
        Ok(snapshots)
    }
}

/// Refuse snapshots that another vDisk was cloned from
fn ensure_not_clone_parent(
    vdisk: &VDisk,
    snapshot: &Snapshot,
    parents: &HashSet<SnapshotId>,
) -> Result<()> {
    if parents.contains(&snapshot.id) {
        return Err(Error::CloneProtection {
            vdisk: vdisk.guid.clone(),
            snapshot: snapshot.id.clone(),
        });
    }
    Ok(())
}

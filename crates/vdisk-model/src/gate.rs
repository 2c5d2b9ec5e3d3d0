//! Per-vDisk concurrency gate
//!
//! Snapshot deletion, MDS reconfiguration and scrubbing of one vDisk are
//! serialized through a fair async mutex keyed by vDisk guid. The mutex
//! also guards the advisory `being_scrubbed` flag: the scrubber raises it
//! while it works on a vDisk and the retention engine skips flagged vDisks.
//!
//! The mutex is not reentrant. A task takes the [`VDiskGuard`] once at its
//! entry point and hands the guard down instead of locking again.
//!
//! Entries are created on first use. [`VDiskGate::forget`] and
//! [`VDiskGate::prune`] drop entries nobody holds, waits on or flagged.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use vdisk_common::VDiskGuid;

#[derive(Debug, Default)]
struct VDiskLockState {
    being_scrubbed: bool,
}

/// Exclusive access to one vDisk
pub struct VDiskGuard {
    vdisk: VDiskGuid,
    state: OwnedMutexGuard<VDiskLockState>,
}

impl VDiskGuard {
    #[must_use]
    pub const fn vdisk(&self) -> &VDiskGuid {
        &self.vdisk
    }

    #[must_use]
    pub fn being_scrubbed(&self) -> bool {
        self.state.being_scrubbed
    }

    pub fn set_being_scrubbed(&mut self, being_scrubbed: bool) {
        self.state.being_scrubbed = being_scrubbed;
    }
}

impl Drop for VDiskGuard {
    fn drop(&mut self) {
        debug!("Released gate of vdisk {}", self.vdisk);
    }
}

/// Registry of per-vDisk mutexes
#[derive(Default)]
pub struct VDiskGate {
    locks: DashMap<VDiskGuid, Arc<Mutex<VDiskLockState>>>,
}

impl VDiskGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, vdisk: &VDiskGuid) -> Arc<Mutex<VDiskLockState>> {
        self.locks
            .entry(vdisk.clone())
            .or_insert_with(|| Arc::new(Mutex::new(VDiskLockState::default())))
            .clone()
    }

    /// Wait for exclusive access to `vdisk`; waiters are served in FIFO order
    pub async fn lock(&self, vdisk: &VDiskGuid) -> VDiskGuard {
        let state = self.slot(vdisk).lock_owned().await;
        debug!("Acquired gate of vdisk {}", vdisk);
        VDiskGuard {
            vdisk: vdisk.clone(),
            state,
        }
    }

    /// Take exclusive access only if nobody holds it right now
    pub fn try_lock(&self, vdisk: &VDiskGuid) -> Option<VDiskGuard> {
        let state = self.slot(vdisk).try_lock_owned().ok()?;
        Some(VDiskGuard {
            vdisk: vdisk.clone(),
            state,
        })
    }

    /// Raise the scrub flag; called by the scrub subsystem
    pub async fn begin_scrub(&self, vdisk: &VDiskGuid) {
        self.lock(vdisk).await.set_being_scrubbed(true);
    }

    /// Clear the scrub flag; called by the scrub subsystem
    pub async fn end_scrub(&self, vdisk: &VDiskGuid) {
        self.lock(vdisk).await.set_being_scrubbed(false);
    }

    /// Current value of the scrub flag
    pub async fn is_being_scrubbed(&self, vdisk: &VDiskGuid) -> bool {
        self.lock(vdisk).await.being_scrubbed()
    }

    /// Drop the entry of a destroyed vDisk; false while it is still in use
    pub fn forget(&self, vdisk: &VDiskGuid) -> bool {
        self.locks.remove_if(vdisk, |_, slot| idle(slot)).is_some()
    }

    /// Drop every idle entry, returning how many went
    pub fn prune(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, slot| !idle(slot));
        let pruned = before.saturating_sub(self.locks.len());
        if pruned > 0 {
            debug!("Pruned {} idle vdisk gate(s)", pruned);
        }
        pruned
    }

    /// Number of vDisks with an entry
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Not held, not waited on and not flagged
fn idle(slot: &Arc<Mutex<VDiskLockState>>) -> bool {
    Arc::strong_count(slot) == 1 && slot.try_lock().is_ok_and(|state| !state.being_scrubbed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_scrub_flag() {
        let gate = VDiskGate::new();
        let vdisk = VDiskGuid::new("vd-1");
        assert!(!gate.is_being_scrubbed(&vdisk).await);
        gate.begin_scrub(&vdisk).await;
        assert!(gate.is_being_scrubbed(&vdisk).await);
        assert!(!gate.is_being_scrubbed(&"vd-2".into()).await);
        gate.end_scrub(&vdisk).await;
        assert!(!gate.is_being_scrubbed(&vdisk).await);
    }

    #[tokio::test]
    async fn test_try_lock_while_held() {
        let gate = VDiskGate::new();
        let vdisk = VDiskGuid::new("vd-1");
        let guard = gate.lock(&vdisk).await;
        assert!(gate.try_lock(&vdisk).is_none());
        assert!(gate.try_lock(&"vd-2".into()).is_some());
        drop(guard);
        assert!(gate.try_lock(&vdisk).is_some());
    }

    #[tokio::test]
    async fn test_idle_entries_are_dropped() {
        let gate = VDiskGate::new();
        for n in 1..=3 {
            drop(gate.lock(&VDiskGuid::new(format!("vd-{n}"))).await);
        }
        let held = gate.lock(&"vd-1".into()).await;
        gate.begin_scrub(&"vd-2".into()).await;
        assert_eq!(gate.len(), 3);

        assert!(!gate.forget(&"vd-1".into()));
        assert!(!gate.forget(&"vd-2".into()));
        assert!(gate.forget(&"vd-3".into()));
        assert!(!gate.forget(&"vd-9".into()));
        assert_eq!(gate.len(), 2);

        drop(held);
        assert_eq!(gate.prune(), 1);
        // The scrub flag survives pruning
        assert!(gate.is_being_scrubbed(&"vd-2".into()).await);
        gate.end_scrub(&"vd-2".into()).await;
        assert_eq!(gate.prune(), 1);
        assert!(gate.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_one_task_per_vdisk() {
        let gate = Arc::new(VDiskGate::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let gate = gate.clone();
            let inside = inside.clone();
            handles.push(tokio::spawn(async move {
                let _guard = gate.lock(&"vd-1".into()).await;
                assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }
}

//! Collaborators shared by the engines

use crate::client::ClientPool;
use std::sync::Arc;
use vdisk_common::Clock;
use vdisk_model::{Cache, MemoryCache, Store, VDiskGate};

/// Store, volume driver clients, cache, gate and clock an engine works with
#[derive(Clone)]
pub struct EngineContext {
    pub store: Arc<dyn Store>,
    pub clients: ClientPool,
    pub cache: Arc<dyn Cache>,
    pub gate: Arc<VDiskGate>,
    pub clock: Arc<dyn Clock>,
}

impl EngineContext {
    /// Context with a private in-memory cache and gate
    #[must_use]
    pub fn new(store: Arc<dyn Store>, clients: ClientPool, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clients,
            cache: Arc::new(MemoryCache::new(clock.clone())),
            gate: Arc::new(VDiskGate::new()),
            clock,
        }
    }

    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = cache;
        self
    }

    /// Share a gate with other engines and the scrubber
    #[must_use]
    pub fn with_gate(mut self, gate: Arc<VDiskGate>) -> Self {
        self.gate = gate;
        self
    }
}

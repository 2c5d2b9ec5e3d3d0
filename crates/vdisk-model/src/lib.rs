//! vdisk-ops Model
//!
//! In-memory projection of the distributed data model the engines reason
//! about, plus the narrow contracts they consume:
//!
//! - **Store**: persistent entities (vDisks, vPools, StorageDrivers,
//!   StorageRouters, Domains, MDS services) and vDisk/MDS junctions
//! - **Cache**: short-lived computed dynamics (snapshot lists, volume info,
//!   dtl status)
//! - **Gate**: per-vDisk mutex and the advisory "being scrubbed" flag
//!
//! Object graphs are kept flat: entities reference each other by
//! identifier and the engines join the bounded neighbourhoods they need.

pub mod cache;
pub mod entities;
pub mod gate;
pub mod store;

pub use cache::{Cache, CacheExt, CacheStats, MemoryCache, cache_keys};
pub use entities::{
    CapacityLimit, Domain, DomainJunction, MdsJunction, MdsService, MdsVDiskJunction, ObjectType,
    Snapshot, StorageDriver, StorageDriverPorts, StorageRouter, VDisk, VPool, VPoolConfiguration,
};
pub use gate::{VDiskGate, VDiskGuard};
pub use store::{ClusterModel, MemoryStore, Store};

//! Core identifier types
//!
//! Every entity of the distributed model is addressed by an opaque string
//! handed out by the persistent store or by the volume driver. The newtypes
//! below keep those strings from being mixed up across entity kinds.

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, From,
        )]
        #[serde(transparent)]
        #[display("{_0}")]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing identifier
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Generate a fresh random identifier
            #[must_use]
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Get the identifier as a string slice
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:?})", stringify!($name), self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

string_id!(
    /// Identity of a vDisk in the persistent store
    VDiskGuid
);
string_id!(
    /// Identity of a vPool
    VPoolGuid
);
string_id!(
    /// Identity of a StorageDriver, also used by the volume driver as `vrouter_id`
    StorageDriverId
);
string_id!(
    /// Identity of a StorageRouter
    StorageRouterGuid
);
string_id!(
    /// Identity of a placement Domain
    DomainGuid
);
string_id!(
    /// Snapshot identifier as known by the volume driver
    SnapshotId
);
string_id!(
    /// Volume identifier as known by the volume driver
    VolumeId
);

/// Identity of an MDS service: the StorageDriver it belongs to plus its number
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MdsServiceId {
    /// StorageDriver hosting the service
    pub storagedriver: StorageDriverId,
    /// Service number on that StorageDriver
    pub number: u32,
}

impl MdsServiceId {
    #[must_use]
    pub fn new(storagedriver: impl Into<StorageDriverId>, number: u32) -> Self {
        Self {
            storagedriver: storagedriver.into(),
            number,
        }
    }
}

impl fmt::Debug for MdsServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MdsServiceId({}#{})", self.storagedriver, self.number)
    }
}

impl fmt::Display for MdsServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.storagedriver, self.number)
    }
}

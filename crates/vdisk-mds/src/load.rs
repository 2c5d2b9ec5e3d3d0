//! Load of an MDS service
//!
//! Loads are whole percentages so comparisons never depend on floating
//! point rounding. A service with capacity `c` hosting `n` vDisks has a load
//! of `ceil(100 * n / c)` percent.

use serde::Serialize;
use std::fmt;
use vdisk_common::VDiskGuid;
use vdisk_model::{CapacityLimit, MdsService};

/// Load reported for services without a capacity limit
pub const UNBOUNDED_LOAD: u64 = 50;

/// Load of an MDS service in percent
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Load {
    Percent(u64),
    /// Capacity 0: the service can take nothing
    Infinite,
}

impl Load {
    /// Whether this load is acceptable under `max_load` percent
    #[must_use]
    pub const fn within(self, max_load: u64) -> bool {
        match self {
            Self::Percent(p) => p <= max_load,
            Self::Infinite => false,
        }
    }
}

impl fmt::Display for Load {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Percent(p) => write!(f, "{p}%"),
            Self::Infinite => f.write_str("inf"),
        }
    }
}

/// Load as it is and as it would be with one more vDisk
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct LoadPair {
    pub now: Load,
    pub plus: Load,
}

impl LoadPair {
    /// Load that counts when placing `vdisk` on the service: the current
    /// load if the service already hosts it, the load with one more otherwise
    #[must_use]
    pub fn for_vdisk(self, service: &MdsService, vdisk: &VDiskGuid) -> Load {
        if service.vdisks.iter().any(|j| &j.vdisk == vdisk) {
            self.now
        } else {
            self.plus
        }
    }
}

/// Load of `service` given the vDisks it hosts right now
#[must_use]
pub fn load(service: &MdsService) -> LoadPair {
    load_for(service.capacity_limit(), service.vdisks.len() as u64)
}

/// Load of a service with `limit` hosting `hosted` vDisks
#[must_use]
pub const fn load_for(limit: CapacityLimit, hosted: u64) -> LoadPair {
    match limit {
        CapacityLimit::Unbounded => LoadPair {
            now: Load::Percent(UNBOUNDED_LOAD),
            plus: Load::Percent(UNBOUNDED_LOAD),
        },
        CapacityLimit::Disabled => LoadPair {
            now: Load::Infinite,
            plus: Load::Infinite,
        },
        CapacityLimit::Limited(capacity) => LoadPair {
            now: Load::Percent((100 * hosted).div_ceil(capacity)),
            plus: Load::Percent((100 * (hosted + 1)).div_ceil(capacity)),
        },
    }
}

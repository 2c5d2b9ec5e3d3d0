//! Results of MDS safety passes

use serde::Serialize;
use vdisk_client::MdsNodeConfig;
use vdisk_common::{Error, MdsServiceId, Result, VDiskGuid, VPoolGuid};

/// A master move postponed until the candidate has caught up
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Deferral {
    /// Service that should become master
    pub candidate: MdsServiceId,
    /// Tlogs the candidate is behind; `None` when the lag could not be read
    pub lag: Option<u64>,
    pub threshold: u64,
}

/// What one safety pass did to a vDisk
#[derive(Clone, Debug, Serialize)]
pub struct SafetyOutcome {
    pub vdisk: VDiskGuid,
    pub master: MdsServiceId,
    /// Configured services, master first
    pub services: Vec<MdsServiceId>,
    pub config: Vec<MdsNodeConfig>,
    /// The volume driver received a new configuration
    pub changed: bool,
    /// The junctions in the store mirror `services`
    pub persisted: bool,
    /// The master is not where it should be yet
    pub checkup_required: bool,
    pub deferral: Option<Deferral>,
    /// The pass was recomputed after a service vanished
    pub restarted: bool,
}

impl SafetyOutcome {
    #[must_use]
    pub fn slaves(&self) -> &[MdsServiceId] {
        self.services.get(1..).unwrap_or_default()
    }
}

/// A vDisk a checkup could not bring to safety
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VDiskFailure {
    pub vdisk: VDiskGuid,
    pub reason: String,
}

impl VDiskFailure {
    #[must_use]
    pub fn new(vdisk: VDiskGuid, error: &Error) -> Self {
        Self {
            vdisk,
            reason: error.to_string(),
        }
    }
}

/// Result of checking every vDisk of one or more vPools
#[derive(Clone, Debug, Default, Serialize)]
pub struct CheckupReport {
    pub vpools: Vec<VPoolGuid>,
    pub outcomes: Vec<SafetyOutcome>,
    /// Errors a later checkup resolves on its own
    pub deferred: Vec<VDiskFailure>,
    pub failures: Vec<VDiskFailure>,
}

impl CheckupReport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn outcome(&self, vdisk: &VDiskGuid) -> Option<&SafetyOutcome> {
        self.outcomes.iter().find(|o| &o.vdisk == vdisk)
    }

    #[must_use]
    pub fn changed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.changed).count()
    }

    /// vDisks whose master could not be placed yet
    pub fn checkup_required(&self) -> impl Iterator<Item = &VDiskGuid> {
        self.outcomes
            .iter()
            .filter(|o| o.checkup_required)
            .map(|o| &o.vdisk)
    }

    /// Fail with one aggregated error if any vDisk failed
    pub fn into_result(self) -> Result<Self> {
        if self.failures.is_empty() {
            return Ok(self);
        }
        Err(Error::CheckupFailed {
            failures: self
                .failures
                .iter()
                .map(|f| format!("vdisk {}: {}", f.vdisk, f.reason))
                .collect(),
        })
    }
}

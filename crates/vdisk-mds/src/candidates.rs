//! Ordering of MDS services for one vDisk
//!
//! Services are grouped by how close they are to the StorageRouter serving
//! the vDisk (same node, shared primary domain, shared recovery domain,
//! anywhere). Within a group, services with a finite capacity come before
//! unbounded ones, then lower load wins, then whether the vDisk already used
//! them, then StorageRouter ip and service number. Services whose load
//! exceeds the vPool maximum never show up.

use crate::load::Load;
use crate::topology::{MdsNode, MdsTopology, Position, Tier};
use vdisk_common::{MdsServiceId, VDiskGuid};
use vdisk_model::StorageRouter;

/// A usable service with the facts it was ranked on
#[derive(Clone, Copy, Debug)]
pub struct Candidate<'a> {
    pub node: &'a MdsNode,
    pub tier: Tier,
    /// Load counted for this vDisk: current load when the service already
    /// hosts it, load with one more vDisk otherwise
    pub load: Load,
    /// Position in the vDisk's current configuration
    pub previous: Option<usize>,
}

impl Candidate<'_> {
    fn rank(&self) -> (Tier, bool, Load, usize, Position<'_>) {
        (
            self.tier,
            self.node.is_unbounded(),
            self.load,
            self.previous.unwrap_or(usize::MAX),
            self.node.position(),
        )
    }
}

/// Ranks the services of a vPool for one vDisk
pub struct CandidateSelector<'a> {
    topology: &'a MdsTopology,
    serving: &'a StorageRouter,
    vdisk: &'a VDiskGuid,
    previous: &'a [MdsServiceId],
    max_load: u64,
}

impl<'a> CandidateSelector<'a> {
    #[must_use]
    pub const fn new(
        topology: &'a MdsTopology,
        serving: &'a StorageRouter,
        vdisk: &'a VDiskGuid,
        max_load: u64,
    ) -> Self {
        Self {
            topology,
            serving,
            vdisk,
            previous: &[],
            max_load,
        }
    }

    /// Services of the vDisk's current configuration, master first
    #[must_use]
    pub const fn with_previous(mut self, previous: &'a [MdsServiceId]) -> Self {
        self.previous = previous;
        self
    }

    /// Rank one service, whether or not it is usable
    #[must_use]
    pub fn candidate(&self, node: &'a MdsNode) -> Candidate<'a> {
        Candidate {
            node,
            tier: self.topology.tier(node, self.serving),
            load: node.load.for_vdisk(&node.service, self.vdisk),
            previous: self.previous.iter().position(|id| id == node.id()),
        }
    }

    /// Usable services, best first
    pub fn ordered(&self) -> impl Iterator<Item = Candidate<'a>> + use<'a> {
        let mut candidates: Vec<_> = self
            .topology
            .nodes()
            .iter()
            .map(|node| self.candidate(node))
            .filter(|c| c.load.within(self.max_load))
            .collect();
        candidates.sort_by(|a, b| a.rank().cmp(&b.rank()));
        candidates.into_iter()
    }

    /// Usable services on the serving StorageRouter, best first
    pub fn local(&self) -> impl Iterator<Item = Candidate<'a>> + use<'a> {
        self.ordered().filter(|c| c.tier == Tier::Local)
    }
}

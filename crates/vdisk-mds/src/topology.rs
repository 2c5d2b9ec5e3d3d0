//! MDS services of a vPool joined with their location

use crate::load::{Load, LoadPair, load};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use vdisk_client::MdsNodeConfig;
use vdisk_common::{
    DomainGuid, Error, MdsServiceId, Result, StorageDriverId, StorageRouterGuid, VPoolGuid,
};
use vdisk_model::{CapacityLimit, MdsService, StorageRouter, Store};

/// Location of a service relative to the StorageRouter serving a vDisk
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
    /// Same StorageRouter
    Local,
    /// Shares a primary domain that is not also a recovery domain
    Primary,
    /// Shares a recovery domain
    Secondary,
    /// Anywhere else in the vPool
    Remainder,
}

/// Tie-break key of a service, see [`MdsNode::position`]
pub type Position<'a> = (bool, Option<IpAddr>, &'a str, u32);

/// An MDS service with everything needed to place and address it
#[derive(Clone, Debug)]
pub struct MdsNode {
    pub service: MdsService,
    pub storagerouter: StorageRouterGuid,
    /// Ip of the StorageRouter, used to order otherwise equal candidates
    pub ip: String,
    /// `ip` parsed; `None` when the StorageRouter reports something else
    pub ip_addr: Option<IpAddr>,
    /// Address the volume driver reaches the service on
    pub address: String,
    pub load: LoadPair,
}

impl MdsNode {
    #[must_use]
    pub const fn id(&self) -> &MdsServiceId {
        &self.service.id
    }

    #[must_use]
    pub fn config(&self) -> MdsNodeConfig {
        MdsNodeConfig::new(self.address.clone(), self.service.port)
    }

    #[must_use]
    pub fn matches(&self, config: &MdsNodeConfig) -> bool {
        self.address == config.address && self.service.port == config.port
    }

    /// Capacity -1: reported at a fixed load, ranked after finite services
    #[must_use]
    pub const fn is_unbounded(&self) -> bool {
        matches!(self.service.capacity_limit(), CapacityLimit::Unbounded)
    }

    /// Tie-break between otherwise equal services: numeric ip, then number.
    /// Addresses that do not parse come last, compared as text.
    #[must_use]
    pub fn position(&self) -> Position<'_> {
        (
            self.ip_addr.is_none(),
            self.ip_addr,
            self.ip.as_str(),
            self.id().number,
        )
    }
}

/// Snapshot of the MDS services of one vPool
#[derive(Clone, Debug)]
pub struct MdsTopology {
    vpool: VPoolGuid,
    nodes: Vec<MdsNode>,
    storagerouters: HashMap<StorageRouterGuid, StorageRouter>,
    storagedrivers: HashMap<StorageDriverId, StorageRouterGuid>,
}

impl MdsTopology {
    /// Read the services of `vpool` with their StorageDrivers and StorageRouters
    pub async fn load(store: &dyn Store, vpool: &VPoolGuid) -> Result<Self> {
        let mut storagerouters = HashMap::new();
        let mut storagedrivers = HashMap::new();
        let mut addresses = HashMap::new();
        for sd in store.list_storagedrivers().await? {
            if &sd.vpool != vpool {
                continue;
            }
            if !storagerouters.contains_key(&sd.storagerouter) {
                let sr = store.get_storagerouter(&sd.storagerouter).await?;
                storagerouters.insert(sd.storagerouter.clone(), sr);
            }
            addresses.insert(sd.id.clone(), sd.storage_ip.clone());
            storagedrivers.insert(sd.id, sd.storagerouter);
        }

        let mut nodes = Vec::new();
        for service in store.list_mds_services(vpool).await? {
            let sd = &service.id.storagedriver;
            let (Some(sr_guid), Some(address)) = (storagedrivers.get(sd), addresses.get(sd))
            else {
                return Err(Error::StorageDriverNotFound(sd.clone()));
            };
            let sr = storagerouters
                .get(sr_guid)
                .ok_or_else(|| Error::StorageRouterNotFound(sr_guid.to_string()))?;
            nodes.push(MdsNode {
                load: load(&service),
                storagerouter: sr_guid.clone(),
                ip: sr.ip.clone(),
                ip_addr: sr.ip.parse().ok(),
                address: address.clone(),
                service,
            });
        }
        nodes.sort_by(|a, b| a.position().cmp(&b.position()));

        Ok(Self {
            vpool: vpool.clone(),
            nodes,
            storagerouters,
            storagedrivers,
        })
    }

    #[must_use]
    pub const fn vpool(&self) -> &VPoolGuid {
        &self.vpool
    }

    /// All services, ordered by StorageRouter ip and service number
    #[must_use]
    pub fn nodes(&self) -> &[MdsNode] {
        &self.nodes
    }

    #[must_use]
    pub fn node(&self, id: &MdsServiceId) -> Option<&MdsNode> {
        self.nodes.iter().find(|n| n.id() == id)
    }

    /// Service behind an entry of a volume's MDS configuration
    #[must_use]
    pub fn node_for_config(&self, config: &MdsNodeConfig) -> Option<&MdsNode> {
        self.nodes.iter().find(|n| n.matches(config))
    }

    pub fn on_storagerouter<'a>(
        &'a self,
        storagerouter: &StorageRouterGuid,
    ) -> impl Iterator<Item = &'a MdsNode> + use<'a> {
        let storagerouter = storagerouter.clone();
        self.nodes
            .iter()
            .filter(move |n| n.storagerouter == storagerouter)
    }

    /// Least loaded service on `storagerouter` that can take vDisks at all.
    /// Unbounded services only win when no finite one is usable.
    #[must_use]
    pub fn least_loaded_on(&self, storagerouter: &StorageRouterGuid) -> Option<&MdsNode> {
        self.on_storagerouter(storagerouter)
            .filter(|n| n.load.now != Load::Infinite)
            .min_by(|a, b| {
                (a.is_unbounded(), a.load.now, a.position())
                    .cmp(&(b.is_unbounded(), b.load.now, b.position()))
            })
    }

    #[must_use]
    pub fn storagerouter(&self, guid: &StorageRouterGuid) -> Option<&StorageRouter> {
        self.storagerouters.get(guid)
    }

    /// StorageRouter hosting a StorageDriver of this vPool
    #[must_use]
    pub fn storagerouter_of(&self, storagedriver: &StorageDriverId) -> Option<&StorageRouter> {
        self.storagedrivers
            .get(storagedriver)
            .and_then(|guid| self.storagerouters.get(guid))
    }

    /// Where `node` sits as seen from `serving`
    #[must_use]
    pub fn tier(&self, node: &MdsNode, serving: &StorageRouter) -> Tier {
        if node.storagerouter == serving.guid {
            return Tier::Local;
        }
        let secondary: HashSet<&DomainGuid> = serving.secondary_domains().collect();
        let primary: HashSet<&DomainGuid> = serving
            .primary_domains()
            .filter(|d| !secondary.contains(d))
            .collect();
        let Some(sr) = self.storagerouter(&node.storagerouter) else {
            return Tier::Remainder;
        };
        if sr.primary_domains().any(|d| primary.contains(d)) {
            Tier::Primary
        } else if sr.primary_domains().any(|d| secondary.contains(d)) {
            Tier::Secondary
        } else {
            Tier::Remainder
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vdisk_model::{DomainJunction, MemoryStore, StorageDriver, VPool};

    fn storagerouter(n: u8, domains: &[(&str, bool)]) -> StorageRouter {
        StorageRouter {
            guid: format!("sr-{n}").into(),
            name: format!("node-{n}"),
            ip: format!("10.0.0.{n}"),
            machine_id: String::new(),
            domains: domains
                .iter()
                .map(|(d, backup)| DomainJunction {
                    domain: (*d).into(),
                    backup: *backup,
                })
                .collect(),
        }
    }

    async fn topology(routers: Vec<StorageRouter>) -> MdsTopology {
        let store = MemoryStore::new();
        store.upsert_vpool(VPool::new("vp"));
        for sr in routers {
            let n = sr.guid.as_str().trim_start_matches("sr-").to_string();
            store.upsert_storagedriver(StorageDriver {
                id: format!("sd-{n}").into(),
                vpool: "vp".into(),
                storagerouter: sr.guid.clone(),
                storage_ip: format!("172.16.0.{n}"),
                ports: Default::default(),
            });
            store.upsert_mds_service(MdsService::new(format!("sd-{n}"), 0, 26300, 10));
            store.upsert_storagerouter(sr);
        }
        MdsTopology::load(&store, &"vp".into()).await.unwrap()
    }

    #[tokio::test]
    async fn test_nodes_are_addressed_by_storage_ip() {
        let topology = topology(vec![storagerouter(2, &[]), storagerouter(1, &[])]).await;
        let ids: Vec<_> = topology.nodes().iter().map(|n| n.id().to_string()).collect();
        assert_eq!(ids, vec!["sd-1#0", "sd-2#0"]);

        let node = &topology.nodes()[0];
        assert_eq!(node.config(), MdsNodeConfig::new("172.16.0.1", 26300));
        assert!(topology.node_for_config(&node.config()).is_some());
        assert_eq!(
            topology.storagerouter_of(&"sd-2".into()).unwrap().ip,
            "10.0.0.2"
        );
    }

    #[tokio::test]
    async fn test_domain_tiers() {
        let topology = topology(vec![
            storagerouter(1, &[("dc-a", false), ("dc-b", true)]),
            storagerouter(2, &[("dc-a", false)]),
            storagerouter(3, &[("dc-b", false)]),
            storagerouter(4, &[("dc-c", false)]),
            storagerouter(5, &[("dc-b", true)]),
        ])
        .await;
        let serving = topology.storagerouter(&"sr-1".into()).unwrap().clone();
        let tiers: Vec<_> = topology
            .nodes()
            .iter()
            .map(|n| topology.tier(n, &serving))
            .collect();
        assert_eq!(
            tiers,
            vec![
                Tier::Local,
                Tier::Primary,
                Tier::Secondary,
                Tier::Remainder,
                // Recovery membership alone does not count
                Tier::Remainder,
            ]
        );
    }

    #[tokio::test]
    async fn test_least_loaded_on() {
        let store = MemoryStore::new();
        store.upsert_vpool(VPool::new("vp"));
        store.upsert_storagerouter(storagerouter(1, &[]));
        store.upsert_storagedriver(StorageDriver {
            id: "sd-1".into(),
            vpool: "vp".into(),
            storagerouter: "sr-1".into(),
            storage_ip: "172.16.0.1".into(),
            ports: Default::default(),
        });
        store.upsert_mds_service(MdsService::new("sd-1", 0, 26300, 0));
        store.upsert_mds_service(MdsService::new("sd-1", 1, 26301, 10));
        store.upsert_mds_service(MdsService::new("sd-1", 2, 26302, -1));
        let topology = MdsTopology::load(&store, &"vp".into()).await.unwrap();

        let best = topology.least_loaded_on(&"sr-1".into()).unwrap();
        assert_eq!(best.id(), &MdsServiceId::new("sd-1", 1));
        assert!(topology.least_loaded_on(&"sr-9".into()).is_none());

        // Busier than the fixed load of the unbounded service, still preferred
        store.set_mds_capacity(&MdsServiceId::new("sd-1", 1), 1).unwrap();
        store
            .set_mds_junctions(
                &"vd-1".into(),
                vec![vdisk_model::MdsJunction {
                    service: MdsServiceId::new("sd-1", 1),
                    vdisk: "vd-1".into(),
                    is_master: true,
                }],
            )
            .await
            .unwrap();
        let topology = MdsTopology::load(&store, &"vp".into()).await.unwrap();
        let best = topology.least_loaded_on(&"sr-1".into()).unwrap();
        assert_eq!(best.id(), &MdsServiceId::new("sd-1", 1));
        assert_eq!(best.load.now, Load::Percent(100));

        // Unbounded is the fallback once nothing finite is left
        store.set_mds_capacity(&MdsServiceId::new("sd-1", 1), 0).unwrap();
        let topology = MdsTopology::load(&store, &"vp".into()).await.unwrap();
        let best = topology.least_loaded_on(&"sr-1".into()).unwrap();
        assert_eq!(best.id(), &MdsServiceId::new("sd-1", 2));
    }

    #[tokio::test]
    async fn test_nodes_sort_by_numeric_ip() {
        let topology = topology(vec![
            storagerouter(10, &[]),
            storagerouter(9, &[]),
            storagerouter(100, &[]),
        ])
        .await;
        let ids: Vec<_> = topology.nodes().iter().map(|n| n.id().to_string()).collect();
        assert_eq!(ids, vec!["sd-9#0", "sd-10#0", "sd-100#0"]);
        assert!(topology.nodes().iter().all(|n| n.ip_addr.is_some()));
    }

    #[tokio::test]
    async fn test_no_domains_collapse_to_local_and_remainder() {
        let topology = topology(vec![storagerouter(1, &[]), storagerouter(2, &[])]).await;
        let serving = topology.storagerouter(&"sr-1".into()).unwrap().clone();
        assert_eq!(topology.tier(&topology.nodes()[0], &serving), Tier::Local);
        assert_eq!(topology.tier(&topology.nodes()[1], &serving), Tier::Remainder);
    }
}

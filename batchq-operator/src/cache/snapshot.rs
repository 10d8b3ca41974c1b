use super::record::{ClusterQueueRecord, FlavorRecord};
use crate::quantity::Quantity;
use batchq_types::QueueingStrategy;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use std::collections::BTreeMap;

/// Immutable, point-in-time copy of one ClusterQueue's quota state, as
/// seen by a single scheduling cycle.
#[derive(Clone, Debug)]
pub struct ClusterQueueSnapshot {
    pub name: String,
    pub cohort: Option<String>,
    pub queueing_strategy: QueueingStrategy,
    pub namespace_selector: Option<LabelSelector>,
    pub resources: Vec<super::record::ResourceRecord>,
    pub usage: BTreeMap<String, BTreeMap<String, Quantity>>,
    pub active: bool,
}

impl ClusterQueueSnapshot {
    pub fn used(&self, resource: &str, flavor: &str) -> Quantity {
        self.usage
            .get(resource)
            .and_then(|m| m.get(flavor))
            .copied()
            .unwrap_or(Quantity::ZERO)
    }

    pub fn min(&self, resource: &str, flavor: &str) -> Quantity {
        self.resources
            .iter()
            .find(|r| r.name == resource)
            .and_then(|r| r.flavors.iter().find(|f| f.name == flavor))
            .map(|f| f.min)
            .unwrap_or(Quantity::ZERO)
    }

    /// `None` means unbounded (absent max ⇒ ∞).
    pub fn max(&self, resource: &str, flavor: &str) -> Option<Quantity> {
        self.resources
            .iter()
            .find(|r| r.name == resource)
            .and_then(|r| r.flavors.iter().find(|f| f.name == flavor))
            .and_then(|f| f.max)
    }

    pub fn below_own_min(&self, resource: &str, flavor: &str) -> bool {
        self.used(resource, flavor) < self.min(resource, flavor)
    }

    pub fn flavor_names(&self, resource: &str) -> Vec<&str> {
        self.resources
            .iter()
            .find(|r| r.name == resource)
            .map(|r| r.flavors.iter().map(|f| f.name.as_str()).collect())
            .unwrap_or_default()
    }
}

/// Immutable snapshot of the whole quota world, cloned out from behind
/// the Cache's lock (spec.md §4.1/§5: "no iteration over the live map
/// after lock release").
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    cluster_queues: BTreeMap<String, ClusterQueueSnapshot>,
    flavors: BTreeMap<String, FlavorRecord>,
    namespaces: BTreeMap<String, BTreeMap<String, String>>,
}

impl Snapshot {
    pub(super) fn build(
        cluster_queues: &BTreeMap<String, ClusterQueueRecord>,
        flavors: &BTreeMap<String, FlavorRecord>,
        namespaces: &BTreeMap<String, BTreeMap<String, String>>,
    ) -> Self {
        let cluster_queues = cluster_queues
            .iter()
            .map(|(name, cq)| {
                (
                    name.clone(),
                    ClusterQueueSnapshot {
                        name: name.clone(),
                        cohort: cq.cohort.clone(),
                        queueing_strategy: cq.queueing_strategy,
                        namespace_selector: cq.namespace_selector.clone(),
                        resources: cq.resources.clone(),
                        usage: cq.usage.clone(),
                        active: cq.active,
                    },
                )
            })
            .collect();
        Snapshot {
            cluster_queues,
            flavors: flavors.clone(),
            namespaces: namespaces.clone(),
        }
    }

    pub fn cluster_queue(&self, name: &str) -> Option<&ClusterQueueSnapshot> {
        self.cluster_queues.get(name)
    }

    /// Rebuilds a snapshot with a different (e.g. provisionally-updated)
    /// set of ClusterQueue views, keeping the same flavor catalog and
    /// namespace labels. Used by the scheduler to layer in-cycle usage
    /// without touching the Cache until a cycle's decisions are
    /// actually committed.
    pub(crate) fn with_cluster_queues(&self, cluster_queues: BTreeMap<String, ClusterQueueSnapshot>) -> Snapshot {
        Snapshot {
            cluster_queues,
            flavors: self.flavors.clone(),
            namespaces: self.namespaces.clone(),
        }
    }

    /// spec.md §3: `null` namespaceSelector matches nothing, `{}`
    /// matches everything; a namespace this cache hasn't observed yet
    /// is treated as having no labels (matches only `{}` or a selector
    /// with no requirements).
    pub fn namespace_matches(&self, cq: &ClusterQueueSnapshot, namespace: &str) -> bool {
        match &cq.namespace_selector {
            None => false,
            Some(selector) => {
                let empty = BTreeMap::new();
                let labels = self.namespaces.get(namespace).unwrap_or(&empty);
                super::label_selector_matches(selector, labels)
            }
        }
    }

    pub fn cluster_queues(&self) -> impl Iterator<Item = &ClusterQueueSnapshot> {
        self.cluster_queues.values()
    }

    pub fn flavor(&self, name: &str) -> Option<&FlavorRecord> {
        self.flavors.get(name)
    }

    /// All ClusterQueues sharing a named cohort (spec.md §3: "implicit
    /// entity, materialized in Cache as the set").
    pub fn cohort_members(&self, cohort: &str) -> Vec<&ClusterQueueSnapshot> {
        self.cluster_queues
            .values()
            .filter(|cq| cq.cohort.as_deref() == Some(cohort))
            .collect()
    }

    /// `Σ min(C', r, f) − Σ usage[C'][r][f]` over every member of the
    /// cohort (spec.md §4.3's borrowing condition).
    pub fn cohort_free_min(&self, cohort: &str, resource: &str, flavor: &str) -> Quantity {
        let members = self.cohort_members(cohort);
        let total_min = members
            .iter()
            .fold(Quantity::ZERO, |acc, cq| acc + cq.min(resource, flavor));
        let total_used = members
            .iter()
            .fold(Quantity::ZERO, |acc, cq| acc + cq.used(resource, flavor));
        total_min.saturating_sub(total_used)
    }
}

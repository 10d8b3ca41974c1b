use crate::quantity::Quantity;
use batchq_types::QueueingStrategy;
use k8s_openapi::api::core::v1::{Affinity, Taint, Toleration};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, Time};
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default)]
pub struct FlavorRecord {
    pub node_labels: BTreeMap<String, String>,
    pub taints: Vec<Taint>,
}

#[derive(Clone, Debug)]
pub struct FlavorQuotaRecord {
    pub name: String,
    pub min: Quantity,
    pub max: Option<Quantity>,
}

#[derive(Clone, Debug)]
pub struct ResourceRecord {
    pub name: String,
    pub flavors: Vec<FlavorQuotaRecord>,
}

#[derive(Clone, Debug)]
pub struct ClusterQueueRecord {
    pub cohort: Option<String>,
    pub queueing_strategy: QueueingStrategy,
    pub namespace_selector: Option<LabelSelector>,
    pub resources: Vec<ResourceRecord>,
    /// resource -> flavor -> total admitted quantity.
    pub usage: BTreeMap<String, BTreeMap<String, Quantity>>,
    pub active: bool,
    pub schema_violation: Option<String>,
    pub deleting: bool,
}

impl ClusterQueueRecord {
    pub fn resource(&self, name: &str) -> Option<&ResourceRecord> {
        self.resources.iter().find(|r| r.name == name)
    }

    pub fn used(&self, resource: &str, flavor: &str) -> Quantity {
        self.usage
            .get(resource)
            .and_then(|m| m.get(flavor))
            .copied()
            .unwrap_or(Quantity::ZERO)
    }
}

#[derive(Clone, Debug)]
pub struct LocalQueueRecord {
    pub cluster_queue: String,
}

#[derive(Clone, Debug)]
pub struct PodSetRecord {
    pub name: String,
    pub count: i32,
    pub requests: BTreeMap<String, Quantity>,
    pub tolerations: Vec<Toleration>,
    pub node_selector: BTreeMap<String, String>,
    pub affinity: Option<Affinity>,
}

#[derive(Clone, Debug)]
pub struct AdmissionRecord {
    pub cluster_queue: String,
    /// podset name -> resource -> flavor
    pub pod_set_flavors: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Clone, Debug)]
pub struct WorkloadRecord {
    pub namespace: String,
    pub name: String,
    pub uid: String,
    pub queue_name: String,
    pub pod_sets: Vec<PodSetRecord>,
    pub priority: i32,
    pub creation_timestamp: Time,
    pub admission: Option<AdmissionRecord>,
    pub finished: bool,
}

impl WorkloadRecord {
    /// Total requested quantity of `resource` across all podsets.
    pub fn total_request(&self, resource: &str) -> Quantity {
        self.pod_sets.iter().fold(Quantity::ZERO, |acc, ps| {
            let per_pod = ps.requests.get(resource).copied().unwrap_or(Quantity::ZERO);
            acc + per_pod.scale(ps.count as i64)
        })
    }
}

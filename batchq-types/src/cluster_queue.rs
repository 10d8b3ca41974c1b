use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, LabelSelector, Time};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Maximum number of distinct resources a [`ClusterQueue`] may declare.
pub const MAX_RESOURCES: usize = 16;
/// Maximum number of flavor entries per resource.
pub const MAX_FLAVORS_PER_RESOURCE: usize = 16;

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum QueueingStrategy {
    #[serde(rename = "StrictFIFO")]
    StrictFifo,
    #[serde(rename = "BestEffortFIFO")]
    BestEffortFifo,
}

impl Default for QueueingStrategy {
    fn default() -> Self {
        Self::BestEffortFifo
    }
}

/// A single `(flavorName, min, max?)` entry within a resource's flavor list.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct FlavorQuota {
    #[serde(default = "default_flavor_name")]
    pub name: String,
    pub min: String,
    #[serde(default)]
    pub max: Option<String>,
}

fn default_flavor_name() -> String {
    "default".to_string()
}

/// One entry of the ClusterQueue's ordered `resources` list: a resource
/// name plus its ordered flavor list.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct ClusterQueueResource {
    pub name: String,
    pub flavors: Vec<FlavorQuota>,
}

#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "batchq.io",
    version = "v1",
    kind = "ClusterQueue",
    plural = "clusterqueues",
    derive = "PartialEq",
    status = "ClusterQueueStatus"
)]
#[kube(derive = "Default")]
#[kube(printcolumn = "{\"jsonPath\": \".spec.cohort\", \"name\": \"COHORT\", \"type\": \"string\" }")]
#[kube(
    printcolumn = "{\"jsonPath\": \".spec.queueingStrategy\", \"name\": \"STRATEGY\", \"type\": \"string\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.conditions[?(@.type=='Active')].status\", \"name\": \"STATUS\", \"type\": \"string\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".metadata.creationTimestamp\", \"name\": \"AGE\", \"type\": \"date\" }"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterQueueSpec {
    /// Name of the Cohort this ClusterQueue shares unused quota with.
    /// Empty/absent means isolated.
    #[serde(default)]
    pub cohort: Option<String>,

    /// Immutable: `StrictFIFO` or `BestEffortFIFO`.
    #[serde(default)]
    pub queueing_strategy: QueueingStrategy,

    /// `None` matches no namespace; `Some(LabelSelector::default())` matches all.
    #[serde(default)]
    pub namespace_selector: Option<LabelSelector>,

    /// At most [`MAX_RESOURCES`] entries, each with at most
    /// [`MAX_FLAVORS_PER_RESOURCE`] flavors.
    #[serde(default)]
    pub resources: Vec<ClusterQueueResource>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct FlavorUsage {
    pub total: String,
    pub borrowing: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterQueueStatus {
    pub pending_workloads: i64,
    pub admitted_workloads: i64,
    /// resource -> flavor -> usage
    #[serde(default)]
    pub used_resources: BTreeMap<String, BTreeMap<String, FlavorUsage>>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub last_updated: Option<Time>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterQueueActiveState {
    Active,
    Pending,
}

impl fmt::Display for ClusterQueueActiveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterQueueActiveState::Active => write!(f, "Active"),
            ClusterQueueActiveState::Pending => write!(f, "Pending"),
        }
    }
}

use k8s_openapi::api::core::v1::{Affinity, Toleration};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One homogeneous group of pods within a Workload: a pod count plus the
/// template the flavor assigner reads requests/tolerations/selectors from.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct PodSet {
    pub name: String,
    pub count: i32,
    pub template: PodSetTemplate,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodSetTemplate {
    /// Resource name -> quantity string, e.g. `"cpu" -> "500m"`.
    #[serde(default)]
    pub requests: BTreeMap<String, String>,
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default)]
    pub affinity: Option<Affinity>,
}

#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "batchq.io",
    version = "v1",
    kind = "Workload",
    plural = "workloads",
    derive = "PartialEq",
    status = "WorkloadStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(printcolumn = "{\"jsonPath\": \".spec.queueName\", \"name\": \"QUEUE\", \"type\": \"string\" }")]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.admission.clusterQueue\", \"name\": \"ADMITTED\", \"type\": \"string\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".metadata.creationTimestamp\", \"name\": \"AGE\", \"type\": \"date\" }"
)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSpec {
    /// LocalQueue in the same namespace this Workload was submitted to.
    pub queue_name: String,
    pub pod_sets: Vec<PodSet>,
    #[serde(default)]
    pub priority: i32,
}

/// Per-podset flavor assignment, keyed by resource name.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodSetAssignment {
    pub name: String,
    /// resource name -> chosen flavor name
    pub flavors: BTreeMap<String, String>,
}

/// The record stamped onto a Workload naming the ClusterQueue and the
/// chosen flavor per resource, per podset.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Admission {
    pub cluster_queue: String,
    pub pod_set_flavors: Vec<PodSetAssignment>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadStatus {
    #[serde(default)]
    pub admission: Option<Admission>,
    #[serde(default)]
    pub finished: bool,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub last_updated: Option<Time>,
}

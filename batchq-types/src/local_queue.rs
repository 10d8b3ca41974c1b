use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Namespaced submission surface for Workloads; references exactly one
/// ClusterQueue.
#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "batchq.io",
    version = "v1",
    kind = "LocalQueue",
    plural = "localqueues",
    derive = "PartialEq",
    status = "LocalQueueStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(
    printcolumn = "{\"jsonPath\": \".spec.clusterQueue\", \"name\": \"CLUSTERQUEUE\", \"type\": \"string\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.pendingWorkloads\", \"name\": \"PENDING\", \"type\": \"integer\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.admittedWorkloads\", \"name\": \"ADMITTED\", \"type\": \"integer\" }"
)]
#[serde(rename_all = "camelCase")]
pub struct LocalQueueSpec {
    pub cluster_queue: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LocalQueueStatus {
    pub pending_workloads: i64,
    pub admitted_workloads: i64,
}

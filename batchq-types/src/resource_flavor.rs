use k8s_openapi::api::core::v1::Taint;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A named hardware/pricing class: a label bundle a node carries plus the
/// taints that a [`crate::Workload`] must tolerate to land on it.
#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "batchq.io",
    version = "v1",
    kind = "ResourceFlavor",
    plural = "resourceflavors",
    derive = "PartialEq"
)]
#[kube(derive = "Default")]
#[kube(printcolumn = "{\"jsonPath\": \".metadata.creationTimestamp\", \"name\": \"AGE\", \"type\": \"date\" }")]
pub struct ResourceFlavorSpec {
    /// Node labels this flavor represents. Used by the flavor assigner's
    /// affinity check.
    #[serde(default)]
    pub node_labels: BTreeMap<String, String>,

    /// Taints a Workload's pod spec must tolerate to be assigned this flavor.
    #[serde(default)]
    pub taints: Vec<Taint>,
}

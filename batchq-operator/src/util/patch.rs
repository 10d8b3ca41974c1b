use batchq_types::*;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::{
    Api, Client, Error,
    api::{Patch, PatchParams, Resource},
    core::{ClusterResourceScope, NamespaceResourceScope},
};
use serde::{Serialize, de::DeserializeOwned};
use std::fmt::Debug;

use super::MANAGER_NAME;

/// Returns a mutable reference to the status object, initializing it with
/// the default value if it does not exist.
pub trait HasStatus<S> {
    fn mut_status(&mut self) -> &mut S;
}

impl HasStatus<ClusterQueueStatus> for ClusterQueue {
    fn mut_status(&mut self) -> &mut ClusterQueueStatus {
        self.status.get_or_insert_with(Default::default)
    }
}

impl HasStatus<LocalQueueStatus> for LocalQueue {
    fn mut_status(&mut self) -> &mut LocalQueueStatus {
        self.status.get_or_insert_with(Default::default)
    }
}

impl HasStatus<WorkloadStatus> for Workload {
    fn mut_status(&mut self) -> &mut WorkloadStatus {
        self.status.get_or_insert_with(Default::default)
    }
}

pub fn now() -> Time {
    Time(chrono::Utc::now())
}

/// Patches a namespaced resource's status with the provided function,
/// via a JSON-merge diff applied server-side under [`MANAGER_NAME`].
pub async fn patch_status_namespaced<S, T>(
    client: Client,
    instance: &T,
    f: impl FnOnce(&mut S),
) -> Result<T, Error>
where
    <T as Resource>::DynamicType: Default,
    T: Clone
        + Resource<Scope = NamespaceResourceScope>
        + HasStatus<S>
        + Serialize
        + DeserializeOwned
        + Debug,
{
    let mut modified = instance.clone();
    f(modified.mut_status());
    let patch = Patch::Json::<T>(json_patch::diff(
        &serde_json::to_value(instance).unwrap(),
        &serde_json::to_value(&modified).unwrap(),
    ));
    let name = instance.meta().name.as_deref().unwrap();
    let namespace = instance.meta().namespace.as_deref().unwrap();
    let api: Api<T> = Api::namespaced(client, namespace);
    api.patch_status(name, &PatchParams::apply(MANAGER_NAME), &patch)
        .await
}

/// Same as [`patch_status_namespaced`] for cluster-scoped kinds.
pub async fn patch_status_cluster<S, T>(
    client: Client,
    instance: &T,
    f: impl FnOnce(&mut S),
) -> Result<T, Error>
where
    <T as Resource>::DynamicType: Default,
    T: Clone
        + Resource<Scope = ClusterResourceScope>
        + HasStatus<S>
        + Serialize
        + DeserializeOwned
        + Debug,
{
    let mut modified = instance.clone();
    f(modified.mut_status());
    let patch = Patch::Json::<T>(json_patch::diff(
        &serde_json::to_value(instance).unwrap(),
        &serde_json::to_value(&modified).unwrap(),
    ));
    let name = instance.meta().name.as_deref().unwrap();
    let api: Api<T> = Api::all(client);
    api.patch_status(name, &PatchParams::apply(MANAGER_NAME), &patch)
        .await
}

/// Sets (or refreshes) a single condition by `type`, replacing any
/// existing entry of the same type.
pub fn set_condition(conditions: &mut Vec<Condition>, ty: &str, status: bool, reason: &str, message: &str) {
    let now = Time(chrono::Utc::now());
    conditions.retain(|c| c.type_ != ty);
    conditions.push(Condition {
        type_: ty.to_string(),
        status: if status { "True" } else { "False" }.to_string(),
        reason: reason.to_string(),
        message: message.to_string(),
        last_transition_time: now,
        observed_generation: None,
    });
}


//! Generic finalizer bookkeeping, shared by every reconciler that owns
//! a cluster-referenced object (ResourceFlavor, ClusterQueue) and must
//! not disappear out from under a Workload that's still using it.

use kube::api::{Patch, PatchParams, Resource};
use kube::{Api, Error};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::fmt::Debug;

use super::MANAGER_NAME;

pub fn has_finalizer<T: Resource>(resource: &T, finalizer: &str) -> bool {
    resource
        .meta()
        .finalizers
        .as_ref()
        .is_some_and(|fs| fs.iter().any(|f| f == finalizer))
}

pub fn has_deletion_stamp<T: Resource>(resource: &T) -> bool {
    resource.meta().deletion_timestamp.is_some()
}

/// Adds `finalizer` if missing. Returns `true` if a patch was sent.
pub async fn add_finalizer<T>(api: &Api<T>, resource: &T, finalizer: &str) -> Result<bool, Error>
where
    T: Clone + Debug + Resource + Serialize + DeserializeOwned,
    <T as Resource>::DynamicType: Default,
{
    if has_finalizer(resource, finalizer) {
        return Ok(false);
    }
    let mut finalizers = resource.meta().finalizers.clone().unwrap_or_default();
    finalizers.push(finalizer.to_string());
    let patch = Patch::Merge(json!({ "metadata": { "finalizers": finalizers } }));
    let name = resource.meta().name.as_deref().unwrap();
    api.patch(name, &PatchParams::apply(MANAGER_NAME), &patch).await?;
    Ok(true)
}

/// Removes `finalizer` if present. No-op (not an error) if it's already gone.
pub async fn remove_finalizer<T>(api: &Api<T>, resource: &T, finalizer: &str) -> Result<(), Error>
where
    T: Clone + Debug + Resource + Serialize + DeserializeOwned,
    <T as Resource>::DynamicType: Default,
{
    let Some(finalizers) = resource.meta().finalizers.clone() else {
        return Ok(());
    };
    if !finalizers.iter().any(|f| f == finalizer) {
        return Ok(());
    }
    let remaining: Vec<String> = finalizers.into_iter().filter(|f| f != finalizer).collect();
    let patch = Patch::Merge(json!({ "metadata": { "finalizers": remaining } }));
    let name = resource.meta().name.as_deref().unwrap();
    api.patch(name, &PatchParams::apply(MANAGER_NAME), &patch).await?;
    Ok(())
}

use crate::cache::Cache;
use crate::util::{Error, finalizer};
use batchq_types::{RESOURCE_IN_USE_FINALIZER, ResourceFlavor};
use kube::{Api, Client, ResourceExt};
use tokio::sync::Notify;

/// Mirrors the ResourceFlavor into the Cache and makes sure the
/// `resource-in-use` finalizer is present before any ClusterQueue can
/// come to depend on it.
pub async fn sync(client: Client, cache: &Cache, instance: &ResourceFlavor, wake: &Notify) -> Result<(), Error> {
    let name = instance.name_any();
    cache.add_flavor(&name, instance.spec.node_labels.clone(), instance.spec.taints.clone());

    let api: Api<ResourceFlavor> = Api::all(client);
    finalizer::add_finalizer(&api, instance, RESOURCE_IN_USE_FINALIZER).await?;
    wake.notify_one();
    Ok(())
}

/// Drops the flavor from the Cache and removes the finalizer, letting
/// the API server finish deleting the object.
pub async fn finalize(client: Client, cache: &Cache, instance: &ResourceFlavor, wake: &Notify) -> Result<(), Error> {
    let name = instance.name_any();
    cache.delete_flavor(&name);
    let api: Api<ResourceFlavor> = Api::all(client);
    finalizer::remove_finalizer(&api, instance, RESOURCE_IN_USE_FINALIZER).await?;
    wake.notify_one();
    Ok(())
}

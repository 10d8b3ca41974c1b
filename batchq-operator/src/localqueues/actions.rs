use batchq_types::{LocalQueue, LocalQueueStatus, RESOURCE_IN_USE_FINALIZER};
use kube::{Api, Client, ResourceExt};
use tokio::sync::Notify;

use crate::cache::Cache;
use crate::util::{Error, finalizer, patch::patch_status_namespaced};

pub async fn sync(client: Client, cache: &Cache, instance: &LocalQueue, wake: &Notify) -> Result<(), Error> {
    let name = instance.name_any();
    let namespace = instance.namespace().ok_or_else(|| {
        Error::UserInput("Expected LocalQueue resource to be namespaced.".to_owned())
    })?;
    cache.add_local_queue(&namespace, &name, &instance.spec.cluster_queue);

    let api: Api<LocalQueue> = Api::namespaced(client.clone(), &namespace);
    finalizer::add_finalizer(&api, instance, RESOURCE_IN_USE_FINALIZER).await?;

    let (pending, admitted) = cache.workloads_for_queue(&namespace, &name);
    patch_status_namespaced::<LocalQueueStatus, LocalQueue>(client, instance, |status| {
        status.pending_workloads = pending as i64;
        status.admitted_workloads = admitted as i64;
    })
    .await?;

    wake.notify_one();
    Ok(())
}

pub async fn finalize(client: Client, cache: &Cache, instance: &LocalQueue, wake: &Notify) -> Result<(), Error> {
    let name = instance.name_any();
    let namespace = instance.namespace().ok_or_else(|| {
        Error::UserInput("Expected LocalQueue resource to be namespaced.".to_owned())
    })?;
    cache.delete_local_queue(&namespace, &name);
    let api: Api<LocalQueue> = Api::namespaced(client, &namespace);
    finalizer::remove_finalizer(&api, instance, RESOURCE_IN_USE_FINALIZER).await?;
    wake.notify_one();
    Ok(())
}

use std::collections::BTreeMap;

use batchq_types::{ClusterQueue, ClusterQueueStatus, FlavorUsage, RESOURCE_IN_USE_FINALIZER, conditions};
use kube::{Api, Client, ResourceExt};
use tokio::sync::Notify;

use crate::cache::Cache;
use crate::queue::QueueManager;
use crate::util::{
    Error,
    finalizer,
    patch::{patch_status_cluster, set_condition},
};

/// Mirrors the spec into the Cache, ensures the finalizer, and refreshes
/// the status subresource (pending/admitted counts, per-flavor usage,
/// and the Active/Pending condition).
pub async fn sync(
    client: Client,
    cache: &Cache,
    queues: &QueueManager,
    instance: &ClusterQueue,
    wake: &Notify,
) -> Result<(), Error> {
    let name = instance.name_any();
    let validation = cache.add_cluster_queue(&name, &instance.spec);

    let api: Api<ClusterQueue> = Api::all(client.clone());
    finalizer::add_finalizer(&api, instance, RESOURCE_IN_USE_FINALIZER).await?;

    let snapshot = cache.snapshot();
    let cq = snapshot.cluster_queue(&name);

    let mut used_resources: BTreeMap<String, BTreeMap<String, FlavorUsage>> = BTreeMap::new();
    if let Some(cq) = cq {
        for resource in &cq.resources {
            let mut per_flavor = BTreeMap::new();
            for flavor in &resource.flavors {
                let used = cq.used(&resource.name, &flavor.name);
                let borrowing = used.saturating_sub(cq.min(&resource.name, &flavor.name));
                per_flavor.insert(
                    flavor.name.clone(),
                    FlavorUsage {
                        total: used.to_string(),
                        borrowing: borrowing.to_string(),
                    },
                );
            }
            used_resources.insert(resource.name.clone(), per_flavor);
        }
    }
    let active = cq.map(|cq| cq.active).unwrap_or(false);
    let pending_workloads = queues.len(&name) as i64;
    let admitted_workloads = cache.admitted_count(&name) as i64;

    patch_status_cluster::<ClusterQueueStatus, ClusterQueue>(client, instance, |status| {
        status.used_resources = used_resources;
        status.pending_workloads = pending_workloads;
        status.admitted_workloads = admitted_workloads;
        status.last_updated = Some(crate::util::patch::now());
        if let Some(violation) = &validation.as_ref().err() {
            set_condition(&mut status.conditions, conditions::ACTIVE, false, "SchemaViolation", violation);
        } else if active {
            set_condition(&mut status.conditions, conditions::ACTIVE, true, "FlavorsReady", "all referenced ResourceFlavors exist");
        } else {
            set_condition(&mut status.conditions, conditions::ACTIVE, false, "FlavorsMissing", "one or more referenced ResourceFlavors do not exist yet");
        }
    })
    .await?;

    wake.notify_one();
    Ok(())
}

/// Marks the ClusterQueue as draining in the Cache (freezing admission
/// via the existing active-flag path) without yet removing it, so that
/// in-flight workloads keep accruing correctly until they finish.
pub async fn terminating(cache: &Cache, instance: &ClusterQueue) {
    let name = instance.name_any();
    cache.mark_cluster_queue_deleting(&name);
}

/// Drops the ClusterQueue from the Cache and removes the finalizer once
/// no Workload still references it.
pub async fn finalize(client: Client, cache: &Cache, instance: &ClusterQueue, wake: &Notify) -> Result<(), Error> {
    let name = instance.name_any();
    cache.delete_cluster_queue(&name);
    let api: Api<ClusterQueue> = Api::all(client);
    finalizer::remove_finalizer(&api, instance, RESOURCE_IN_USE_FINALIZER).await?;
    wake.notify_one();
    Ok(())
}

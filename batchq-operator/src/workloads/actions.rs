use batchq_types::{RESOURCE_IN_USE_FINALIZER, Workload, WorkloadStatus, conditions};
use kube::{Api, Client, ResourceExt};
use tokio::sync::Notify;

use super::record::to_record;
use crate::cache::Cache;
use crate::queue::{QueueEntry, QueueManager};
use crate::util::{Error, finalizer, patch::patch_status_namespaced};

/// Mirrors the Workload into the Cache and files it in the
/// QueueManager if it isn't admitted yet. Admission itself is the
/// scheduler's job; this just keeps both in-memory structures in sync
/// with what's on the API server.
pub async fn sync(client: Client, cache: &Cache, queues: &QueueManager, instance: &Workload, wake: &Notify) -> Result<(), Error> {
    let record = to_record(instance)?;
    let namespace = record.namespace.clone();
    let name = record.name.clone();

    let api: Api<Workload> = Api::namespaced(client.clone(), &namespace);
    finalizer::add_finalizer(&api, instance, RESOURCE_IN_USE_FINALIZER).await?;

    let already_admitted = record.admission.is_some();
    cache.add_or_update_workload(record.clone());

    if already_admitted {
        queues.delete(&namespace, &name);
        return Ok(());
    }

    let Some(cluster_queue) = cache.local_queue_cluster_queue(&namespace, &record.queue_name) else {
        patch_status_namespaced::<WorkloadStatus, Workload>(client, instance, |status| {
            crate::util::patch::set_condition(
                &mut status.conditions,
                "QueueResolved",
                false,
                "LocalQueueNotFound",
                &format!("LocalQueue {} does not exist", record.queue_name),
            );
            status.last_updated = Some(crate::util::patch::now());
        })
        .await?;
        return Ok(());
    };

    queues.push(
        &cluster_queue,
        QueueEntry {
            namespace: namespace.clone(),
            name: name.clone(),
            uid: record.uid.clone(),
            priority: record.priority,
            creation_timestamp: record.creation_timestamp.clone(),
        },
    );

    // spec.md §3/§4.5: a pending Workload is Frozen while its owning
    // ClusterQueue is Pending (missing a referenced Flavor, or being
    // deleted); the condition clears once the ClusterQueue recovers.
    // An unknown ClusterQueue (never reconciled yet) is left alone
    // rather than marked Frozen, since "Pending" is a state of a known
    // CQ, not the absence of one.
    if let Some(active) = cache.cluster_queue_active(&cluster_queue) {
        patch_status_namespaced::<WorkloadStatus, Workload>(client.clone(), instance, |status| {
            crate::util::patch::set_condition(
                &mut status.conditions,
                conditions::FROZEN,
                !active,
                if active { "ClusterQueueActive" } else { "ClusterQueuePending" },
                if active {
                    "owning ClusterQueue is Active"
                } else {
                    "owning ClusterQueue is Pending: missing a referenced ResourceFlavor or being deleted"
                },
            );
            status.last_updated = Some(crate::util::patch::now());
        })
        .await?;
    }

    wake.notify_one();
    Ok(())
}

/// Called once the Workload's own `status.finished` flips true: drops
/// it from the pending queue (a no-op if already admitted-and-removed)
/// and lets the Cache release its usage via the normal
/// `add_or_update_workload` finished-flag path.
pub async fn finish(cache: &Cache, queues: &QueueManager, instance: &Workload) -> Result<(), Error> {
    let record = to_record(instance)?;
    queues.delete(&record.namespace, &record.name);
    cache.add_or_update_workload(record);
    Ok(())
}

/// Releases Cache usage and QueueManager membership, then drops the
/// finalizer so the API server can finish deleting the object.
pub async fn finalize(client: Client, cache: &Cache, queues: &QueueManager, instance: &Workload, wake: &Notify) -> Result<(), Error> {
    let namespace = instance.namespace().ok_or_else(|| {
        Error::UserInput("Expected Workload resource to be namespaced.".to_owned())
    })?;
    let name = instance.name_any();

    cache.delete_workload(&namespace, &name);
    queues.delete(&namespace, &name);

    let api: Api<Workload> = Api::namespaced(client, &namespace);
    finalizer::remove_finalizer(&api, instance, RESOURCE_IN_USE_FINALIZER).await?;
    wake.notify_one();
    Ok(())
}

//! Wires the pure [`super::run_cycle`] algorithm to the outside world:
//! a wake signal (timer or explicit poke, coalesced by `Notify`), a
//! bounded-deadline status patch per admission, and the metrics named
//! in spec.md §6.

use super::{AdmissionDecision, run_cycle};
use crate::cache::{AdmissionRecord, Cache};
use crate::queue::QueueManager;
use crate::util::patch::{now, patch_status_namespaced, set_condition};
use batchq_types::{Admission, PodSetAssignment, Workload, WorkloadStatus};
use kube::{Api, Client};
use owo_colors::OwoColorize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug)]
pub struct SchedulerConfig {
    pub wake_interval: Duration,
    pub commit_timeout: Duration,
}

/// Runs scheduling cycles until `cancel` fires. Wakes on whichever
/// comes first: an explicit nudge via `wake` (reconcilers call
/// `wake.notify_one()` whenever something that might unblock a
/// Workload changes), or the fallback timer.
pub async fn run(
    client: Client,
    cache: Cache,
    queues: Arc<QueueManager>,
    wake: Arc<Notify>,
    cancel: CancellationToken,
    config: SchedulerConfig,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                println!("{}", "scheduler loop shutting down".yellow());
                return;
            }
            _ = wake.notified() => {}
            _ = tokio::time::sleep(config.wake_interval) => {}
        }

        let decisions = run_cycle(&cache, &queues);
        for decision in &decisions {
            commit_decision(&client, &cache, &queues, decision, config.commit_timeout).await;
        }
        publish_metrics(&cache, &queues);
    }
}

async fn commit_decision(
    client: &Client,
    cache: &Cache,
    queues: &QueueManager,
    decision: &AdmissionDecision,
    commit_timeout: Duration,
) {
    let attempt = async {
        let api: Api<Workload> = Api::namespaced(client.clone(), &decision.namespace);
        let current = api.get(&decision.name).await?;
        let admission = build_admission(&current, decision);
        patch_status_namespaced::<WorkloadStatus, Workload>(client.clone(), &current, |status| {
            status.admission = Some(admission);
            status.last_updated = Some(now());
            set_condition(&mut status.conditions, "Admitted", true, "QuotaReserved", "workload admitted");
        })
        .await
    };

    match tokio::time::timeout(commit_timeout, attempt).await {
        Ok(Ok(_updated)) => {
            if let Some(mut record) = cache.workload(&decision.namespace, &decision.name) {
                record.admission = Some(to_admission_record(decision, &record));
                cache.add_or_update_workload(record);
            }
            queues.delete(&decision.namespace, &decision.name);
            batchq_common::metrics::cluster_queue::inc_admitted_total(&decision.cluster_queue);
        }
        Ok(Err(e)) => {
            println!(
                "{} {}",
                format!("admission commit failed for {}/{}:", decision.namespace, decision.name).red(),
                e.to_string().red().dimmed()
            );
        }
        Err(_) => {
            println!(
                "{}",
                format!(
                    "admission commit for {}/{} exceeded its write deadline, will retry next cycle",
                    decision.namespace, decision.name
                )
                .yellow()
            );
        }
    }
}

fn build_admission(current: &Workload, decision: &AdmissionDecision) -> Admission {
    let pod_set_flavors = current
        .spec
        .pod_sets
        .iter()
        .map(|ps| {
            let flavors = ps
                .template
                .requests
                .keys()
                .filter_map(|r| decision.assignment.per_resource.get(r).map(|f| (r.clone(), f.clone())))
                .collect::<BTreeMap<_, _>>();
            PodSetAssignment {
                name: ps.name.clone(),
                flavors,
            }
        })
        .collect();
    Admission {
        cluster_queue: decision.cluster_queue.clone(),
        pod_set_flavors,
    }
}

fn to_admission_record(decision: &AdmissionDecision, record: &crate::cache::WorkloadRecord) -> AdmissionRecord {
    let pod_set_flavors = record
        .pod_sets
        .iter()
        .map(|ps| {
            let flavors = ps
                .requests
                .keys()
                .filter_map(|r| decision.assignment.per_resource.get(r).map(|f| (r.clone(), f.clone())))
                .collect();
            (ps.name.clone(), flavors)
        })
        .collect();
    AdmissionRecord {
        cluster_queue: decision.cluster_queue.clone(),
        pod_set_flavors,
    }
}

fn publish_metrics(cache: &Cache, queues: &QueueManager) {
    let snapshot = cache.snapshot();
    for cq in snapshot.cluster_queues() {
        batchq_common::metrics::cluster_queue::set_pending(&cq.name, queues.len(&cq.name) as u64, 0);
        batchq_common::metrics::cluster_queue::set_admitted_active(&cq.name, cache.admitted_count(&cq.name) as u64);
        let status = if !cq.active { "Pending" } else { "Active" };
        batchq_common::metrics::cluster_queue::set_status(&cq.name, status);
    }
}

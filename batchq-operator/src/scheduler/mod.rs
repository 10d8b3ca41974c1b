//! The cycle driver: snapshots the Cache, walks pending Workloads in
//! ClusterQueue/Cohort-fair order, and decides which ones to admit.
//! See spec.md §4.4.
//!
//! [`run_cycle`] is the pure decision algorithm: given a read-only
//! Cache snapshot and the QueueManager's pending order, it returns the
//! set of admissions for this cycle without mutating anything. Actually
//! committing those decisions (status patch + Cache update) is
//! [`driver`]'s job, since that's the part that talks to the API server
//! and needs a write deadline.

pub mod driver;

use crate::cache::{Cache, ClusterQueueSnapshot, Snapshot};
use crate::flavor_assigner::{self, Assignment, Reason};
use crate::queue::{QueueEntry, QueueManager};
use batchq_types::QueueingStrategy;
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdmissionDecision {
    pub namespace: String,
    pub name: String,
    pub cluster_queue: String,
    pub assignment: Assignment,
}

/// Runs one scheduling cycle and returns the admissions it found. Never
/// mutates the Cache or the QueueManager; the caller commits decisions
/// (or doesn't, on write conflict) and reflects that back separately.
pub fn run_cycle(cache: &Cache, queues: &QueueManager) -> Vec<AdmissionDecision> {
    let base = cache.snapshot();
    let mut working: BTreeMap<String, ClusterQueueSnapshot> =
        base.cluster_queues().map(|cq| (cq.name.clone(), cq.clone())).collect();

    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for cq in base.cluster_queues().filter(|c| c.active) {
        let group_key = cq.cohort.clone().unwrap_or_else(|| format!("\0standalone:{}", cq.name));
        groups.entry(group_key).or_default().push(cq.name.clone());
    }

    let mut decisions = Vec::new();
    for members in groups.into_values() {
        schedule_cohort(cache, queues, &base, &mut working, &members, &mut decisions);
    }
    decisions
}

/// One cohort (or a standalone ClusterQueue, treated as a cohort of
/// one) is scheduled in rounds: each round, members currently below
/// their own min quota get first refusal, so a queue with unused
/// reserved capacity isn't starved by a sibling that's already
/// borrowing; ties within a tier go to whichever member's head was
/// created earliest (spec.md §4.4's round-robin-by-head-age rule).
/// Rounds continue until a full pass admits nothing.
fn schedule_cohort(
    cache: &Cache,
    queues: &QueueManager,
    base: &Snapshot,
    working: &mut BTreeMap<String, ClusterQueueSnapshot>,
    members: &[String],
    decisions: &mut Vec<AdmissionDecision>,
) {
    loop {
        let mut order = members.to_vec();
        // spec.md §4.4: below-min members go first (cohort-borrowing
        // fairness); within that tier, earliest head creation time wins
        // so no member starves its siblings round after round.
        order.sort_by_key(|name| {
            let below_min = working.get(name).map(is_below_any_min).unwrap_or(false);
            let head_created = queues.front(name).map(|e| e.creation_timestamp.0);
            (!below_min, head_created)
        });

        let mut progressed = false;
        for name in &order {
            if try_admit_one(cache, queues, base, working, name, decisions) {
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }
}

fn is_below_any_min(cq: &ClusterQueueSnapshot) -> bool {
    cq.resources
        .iter()
        .any(|r| r.flavors.iter().any(|f| cq.used(&r.name, &f.name) < f.min))
}

/// Tries to admit one Workload into `cluster_queue`. StrictFIFO only
/// ever considers the head: a miss blocks the whole queue for this
/// round. BestEffortFIFO walks the order looking for the first
/// Workload that fits, skipping ones that don't.
fn try_admit_one(
    cache: &Cache,
    queues: &QueueManager,
    base: &Snapshot,
    working: &mut BTreeMap<String, ClusterQueueSnapshot>,
    cluster_queue: &str,
    decisions: &mut Vec<AdmissionDecision>,
) -> bool {
    let Some(cq_working) = working.get(cluster_queue) else {
        return false;
    };
    let strategy = cq_working.queueing_strategy;
    let pending = queues.ordered(cluster_queue);
    if pending.is_empty() {
        return false;
    }

    let candidates: Vec<&QueueEntry> = match strategy {
        QueueingStrategy::StrictFifo => pending.first().into_iter().collect(),
        QueueingStrategy::BestEffortFifo => pending.iter().collect(),
    };

    for entry in candidates {
        let Some(workload) = cache.workload(&entry.namespace, &entry.name) else {
            continue;
        };
        if workload.finished || workload.admission.is_some() {
            continue;
        }
        if !base.namespace_matches(cq_working, &entry.namespace) {
            match strategy {
                QueueingStrategy::StrictFifo => return false,
                QueueingStrategy::BestEffortFifo => continue,
            }
        }

        let trial = base.with_cluster_queues(working.clone());
        let cq_trial = trial.cluster_queue(cluster_queue).expect("just cloned from working");
        match flavor_assigner::assign(&workload, cq_trial, &trial) {
            Ok(assignment) => {
                apply_provisional(working, cluster_queue, &workload, &assignment);
                decisions.push(AdmissionDecision {
                    namespace: entry.namespace.clone(),
                    name: entry.name.clone(),
                    cluster_queue: cluster_queue.to_string(),
                    assignment,
                });
                return true;
            }
            Err(reason) => match strategy {
                QueueingStrategy::StrictFifo => {
                    // spec.md §4.4: a StrictFIFO head blocked purely on
                    // quota also blocks cohort siblings from borrowing
                    // this ClusterQueue's own unused min for the rest
                    // of the cycle - it still wants that capacity.
                    if matches!(reason, Reason::NoQuotaEvenWithBorrow | Reason::CohortExhausted) {
                        reserve_own_min(working, cluster_queue);
                    }
                    return false;
                }
                QueueingStrategy::BestEffortFifo => continue,
            },
        }
    }
    false
}

/// Marks `cluster_queue`'s own unused min, per `(resource, flavor)`, as
/// consumed in `working` so the cohort borrowing check (which reads
/// usage straight off `working`) no longer counts it as free for
/// siblings this cycle. Purely an in-cycle bookkeeping device: nothing
/// here is committed back to the Cache.
fn reserve_own_min(working: &mut BTreeMap<String, ClusterQueueSnapshot>, cluster_queue: &str) {
    let Some(cq) = working.get_mut(cluster_queue) else { return };
    for resource in cq.resources.clone() {
        for flavor in &resource.flavors {
            let used = cq.used(&resource.name, &flavor.name);
            if used < flavor.min {
                let entry = cq
                    .usage
                    .entry(resource.name.clone())
                    .or_default()
                    .entry(flavor.name.clone())
                    .or_insert(crate::quantity::Quantity::ZERO);
                *entry = flavor.min;
            }
        }
    }
}

fn apply_provisional(
    working: &mut BTreeMap<String, ClusterQueueSnapshot>,
    cluster_queue: &str,
    workload: &crate::cache::WorkloadRecord,
    assignment: &Assignment,
) {
    let Some(cq) = working.get_mut(cluster_queue) else {
        return;
    };
    for ps in &workload.pod_sets {
        for (resource, flavor) in &assignment.per_resource {
            let Some(per_pod) = ps.requests.get(resource) else {
                continue;
            };
            let amount = per_pod.scale(ps.count as i64);
            let entry = cq
                .usage
                .entry(resource.clone())
                .or_default()
                .entry(flavor.clone())
                .or_insert(crate::quantity::Quantity::ZERO);
            *entry = entry.checked_add(amount).unwrap_or(*entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{PodSetRecord, WorkloadRecord};
    use crate::quantity::Quantity;
    use batchq_types::{ClusterQueueResource, ClusterQueueSpec, FlavorQuota};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use std::collections::BTreeMap as Map;

    fn flavor_quota(name: &str, min: &str, max: Option<&str>) -> FlavorQuota {
        FlavorQuota {
            name: name.to_string(),
            min: min.to_string(),
            max: max.map(|s| s.to_string()),
        }
    }

    fn workload(name: &str, priority: i32, cpu: &str) -> WorkloadRecord {
        let mut requests = Map::new();
        requests.insert("cpu".to_string(), Quantity::parse(cpu).unwrap());
        WorkloadRecord {
            namespace: "ns".into(),
            name: name.into(),
            uid: format!("uid-{name}"),
            queue_name: "lq".into(),
            pod_sets: vec![PodSetRecord {
                name: "main".into(),
                count: 1,
                requests,
                tolerations: vec![],
                node_selector: Default::default(),
                affinity: None,
            }],
            priority,
            creation_timestamp: Time(chrono::Utc::now()),
            admission: None,
            finished: false,
        }
    }

    fn entry(w: &WorkloadRecord) -> QueueEntry {
        QueueEntry {
            namespace: w.namespace.clone(),
            name: w.name.clone(),
            uid: w.uid.clone(),
            priority: w.priority,
            creation_timestamp: w.creation_timestamp.clone(),
        }
    }

    #[test]
    fn admits_highest_priority_first_within_quota() {
        let cache = Cache::new();
        cache.add_flavor("on-demand", Default::default(), vec![]);
        let spec = ClusterQueueSpec {
            cohort: None,
            queueing_strategy: QueueingStrategy::BestEffortFifo,
            namespace_selector: Some(Default::default()),
            resources: vec![ClusterQueueResource {
                name: "cpu".into(),
                flavors: vec![flavor_quota("on-demand", "5", None)],
            }],
        };
        cache.add_cluster_queue("cq", &spec).unwrap();

        let low = workload("low", 0, "3");
        let high = workload("high", 10, "3");
        let qm = QueueManager::new();
        qm.push("cq", entry(&low));
        qm.push("cq", entry(&high));
        cache.add_or_update_workload(low);
        cache.add_or_update_workload(high);

        let decisions = run_cycle(&cache, &qm);
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].name, "high");
    }

    #[test]
    fn strict_fifo_blocks_on_unfit_head() {
        let cache = Cache::new();
        cache.add_flavor("on-demand", Default::default(), vec![]);
        let spec = ClusterQueueSpec {
            cohort: None,
            queueing_strategy: QueueingStrategy::StrictFifo,
            namespace_selector: Some(Default::default()),
            resources: vec![ClusterQueueResource {
                name: "cpu".into(),
                flavors: vec![flavor_quota("on-demand", "5", None)],
            }],
        };
        cache.add_cluster_queue("cq", &spec).unwrap();

        let big = workload("big", 10, "10");
        let small = workload("small", 0, "1");
        let qm = QueueManager::new();
        qm.push("cq", entry(&big));
        qm.push("cq", entry(&small));
        cache.add_or_update_workload(big);
        cache.add_or_update_workload(small);

        let decisions = run_cycle(&cache, &qm);
        assert!(decisions.is_empty(), "StrictFIFO must not admit past an unfit head");
    }

    #[test]
    fn best_effort_fifo_admits_smaller_workload_behind_unfit_head() {
        let cache = Cache::new();
        cache.add_flavor("on-demand", Default::default(), vec![]);
        let spec = ClusterQueueSpec {
            cohort: None,
            queueing_strategy: QueueingStrategy::BestEffortFifo,
            namespace_selector: Some(Default::default()),
            resources: vec![ClusterQueueResource {
                name: "cpu".into(),
                flavors: vec![flavor_quota("on-demand", "5", None)],
            }],
        };
        cache.add_cluster_queue("cq", &spec).unwrap();

        let big = workload("big", 10, "10");
        let small = workload("small", 0, "1");
        let qm = QueueManager::new();
        qm.push("cq", entry(&big));
        qm.push("cq", entry(&small));
        cache.add_or_update_workload(big);
        cache.add_or_update_workload(small);

        let decisions = run_cycle(&cache, &qm);
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].name, "small");
    }

    #[test]
    fn below_min_queue_gets_precedence_within_cohort() {
        let cache = Cache::new();
        cache.add_flavor("on-demand", Default::default(), vec![]);
        for (name, min, max) in [("starved", "2", "10"), ("fed", "2", "10")] {
            let spec = ClusterQueueSpec {
                cohort: Some("c".into()),
                queueing_strategy: QueueingStrategy::BestEffortFifo,
                namespace_selector: Some(Default::default()),
                resources: vec![ClusterQueueResource {
                    name: "cpu".into(),
                    flavors: vec![flavor_quota("on-demand", min, Some(max))],
                }],
            };
            cache.add_cluster_queue(name, &spec).unwrap();
        }

        // "fed" already sits at its own min; "starved" has none yet.
        let mut flavors = Map::new();
        flavors.insert("cpu".to_string(), "on-demand".to_string());
        let mut pod_set_flavors = Map::new();
        pod_set_flavors.insert("main".to_string(), flavors);
        let mut seed = workload("seed", 0, "2");
        seed.admission = Some(crate::cache::AdmissionRecord {
            cluster_queue: "fed".into(),
            pod_set_flavors,
        });
        cache.add_or_update_workload(seed);

        let fed_req = workload("fed-req", 0, "2");
        let starved_req = workload("starved-req", 0, "2");
        let qm = QueueManager::new();
        qm.push("fed", entry(&fed_req));
        qm.push("starved", entry(&starved_req));
        cache.add_or_update_workload(fed_req);
        cache.add_or_update_workload(starved_req);

        let decisions = run_cycle(&cache, &qm);
        let names: Vec<_> = decisions.iter().map(|d| d.name.as_str()).collect();
        assert!(names.contains(&"starved-req"));
    }

    fn non_matching_selector() -> k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector {
        let mut match_labels = Map::new();
        match_labels.insert("team".to_string(), "payments".to_string());
        k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector {
            match_labels: Some(match_labels),
            match_expressions: None,
        }
    }

    #[test]
    fn strict_fifo_blocks_whole_queue_on_namespace_mismatch() {
        let cache = Cache::new();
        cache.add_flavor("on-demand", Default::default(), vec![]);
        let spec = ClusterQueueSpec {
            cohort: None,
            queueing_strategy: QueueingStrategy::StrictFifo,
            namespace_selector: Some(non_matching_selector()),
            resources: vec![ClusterQueueResource {
                name: "cpu".into(),
                flavors: vec![flavor_quota("on-demand", "5", None)],
            }],
        };
        cache.add_cluster_queue("cq", &spec).unwrap();

        let wl = workload("wl", 0, "1");
        let qm = QueueManager::new();
        qm.push("cq", entry(&wl));
        cache.add_or_update_workload(wl);

        let decisions = run_cycle(&cache, &qm);
        assert!(decisions.is_empty(), "unlabeled namespace must not satisfy namespaceSelector");
    }

    #[test]
    fn best_effort_fifo_skips_entries_from_non_matching_namespace() {
        let cache = Cache::new();
        cache.add_flavor("on-demand", Default::default(), vec![]);
        let spec = ClusterQueueSpec {
            cohort: None,
            queueing_strategy: QueueingStrategy::BestEffortFifo,
            namespace_selector: Some(non_matching_selector()),
            resources: vec![ClusterQueueResource {
                name: "cpu".into(),
                flavors: vec![flavor_quota("on-demand", "5", None)],
            }],
        };
        cache.add_cluster_queue("cq", &spec).unwrap();

        let wl = workload("wl", 0, "1");
        let qm = QueueManager::new();
        qm.push("cq", entry(&wl));
        cache.add_or_update_workload(wl);

        let decisions = run_cycle(&cache, &qm);
        assert!(decisions.is_empty(), "must skip past a non-matching entry, not admit it");
    }

    #[test]
    fn strict_fifo_blocked_head_also_blocks_sibling_borrowing() {
        // "blocked" is StrictFIFO with an unused min that a BestEffortFIFO
        // sibling in the same cohort would otherwise be able to borrow;
        // its head needs more than its own min plus all of that free
        // cohort capacity, so it is quota-blocked this cycle. Per
        // spec.md §4.4, that blocks "borrower" from borrowing the
        // portion of "blocked"'s min that "blocked" itself still wants.
        let cache = Cache::new();
        cache.add_flavor("on-demand", Default::default(), vec![]);
        let blocked_spec = ClusterQueueSpec {
            cohort: Some("c".into()),
            queueing_strategy: QueueingStrategy::StrictFifo,
            namespace_selector: Some(Default::default()),
            resources: vec![ClusterQueueResource {
                name: "cpu".into(),
                flavors: vec![flavor_quota("on-demand", "10", Some("10"))],
            }],
        };
        cache.add_cluster_queue("blocked", &blocked_spec).unwrap();
        let borrower_spec = ClusterQueueSpec {
            cohort: Some("c".into()),
            queueing_strategy: QueueingStrategy::BestEffortFifo,
            namespace_selector: Some(Default::default()),
            resources: vec![ClusterQueueResource {
                name: "cpu".into(),
                flavors: vec![flavor_quota("on-demand", "0", Some("10"))],
            }],
        };
        cache.add_cluster_queue("borrower", &borrower_spec).unwrap();

        // "blocked" has no usage yet (10 unused min) but its head wants
        // 15, which even with the other 0 free-min from "borrower" (its
        // min is 0) doesn't fit: 10 (own min) + 0 (sibling's free min)
        // < 15, so it's quota-blocked rather than namespace/fit-blocked.
        let head = workload("head", 0, "15");
        let borrow_req = workload("borrow-req", 0, "5");
        let qm = QueueManager::new();
        qm.push("blocked", entry(&head));
        qm.push("borrower", entry(&borrow_req));
        cache.add_or_update_workload(head);
        cache.add_or_update_workload(borrow_req);

        let decisions = run_cycle(&cache, &qm);
        assert!(
            decisions.is_empty(),
            "borrower must not be allowed to borrow blocked's unused min once blocked's own head needs it"
        );
    }
}

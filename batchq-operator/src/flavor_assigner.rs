//! For a Workload + ClusterQueue snapshot, picks a flavor per resource
//! satisfying taints/tolerations/affinity and quota. See spec.md §4.3.

use crate::cache::{ClusterQueueSnapshot, FlavorRecord, PodSetRecord, Snapshot, WorkloadRecord};
use crate::quantity::Quantity;
use k8s_openapi::api::core::v1::{Taint, Toleration};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Assignment {
    /// resource name -> chosen flavor name.
    pub per_resource: BTreeMap<String, String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reason {
    NoFit,
    Untolerated,
    NoQuotaEvenWithBorrow,
    CohortExhausted,
    Frozen,
}

pub fn assign(
    workload: &WorkloadRecord,
    cq: &ClusterQueueSnapshot,
    snapshot: &Snapshot,
) -> Result<Assignment, Reason> {
    if !cq.active {
        return Err(Reason::Frozen);
    }

    let requested_resources: BTreeSet<String> = workload
        .pod_sets
        .iter()
        .flat_map(|ps| ps.requests.keys().cloned())
        .collect();

    let mut groups: BTreeMap<Vec<String>, Vec<String>> = BTreeMap::new();
    for r in &requested_resources {
        let Some(rec) = cq.resource(r) else {
            return Err(Reason::NoFit);
        };
        let sig: Vec<String> = rec.flavors.iter().map(|f| f.name.clone()).collect();
        groups.entry(sig).or_default().push(r.clone());
    }

    let mut assignment = BTreeMap::new();
    for (sig, resources) in &groups {
        match pick_index(workload, cq, snapshot, &sig, &resources) {
            Some(i) => {
                for r in resources {
                    assignment.insert(r.clone(), sig[i].clone());
                }
            }
            None => return Err(classify_failure(workload, cq, snapshot, &sig, &resources)),
        }
    }
    Ok(Assignment { per_resource: assignment })
}

fn pick_index(
    workload: &WorkloadRecord,
    cq: &ClusterQueueSnapshot,
    snapshot: &Snapshot,
    sig: &[String],
    resources: &[String],
) -> Option<usize> {
    'index: for i in 0..sig.len() {
        let flavor_name = &sig[i];
        let Some(flavor_rec) = snapshot.flavor(flavor_name) else {
            continue;
        };
        for r in resources {
            let podsets = podsets_requesting(workload, r);
            if !tolerations_ok(flavor_rec, &podsets) {
                continue 'index;
            }
            let declared_keys = declared_label_keys(cq, snapshot, r);
            if !affinity_ok(flavor_rec, &declared_keys, &podsets) {
                continue 'index;
            }
            let requested = workload.total_request(r);
            if !resource_flavor_fits(cq, snapshot, r, flavor_name, requested) {
                continue 'index;
            }
        }
        return Some(i);
    }
    None
}

/// Best-effort classification of why no index in `sig` worked, for
/// surfacing in Workload conditions / logs (spec.md §4.3's `Reason` set).
fn classify_failure(
    workload: &WorkloadRecord,
    cq: &ClusterQueueSnapshot,
    snapshot: &Snapshot,
    sig: &[String],
    resources: &[String],
) -> Reason {
    let mut any_tolerated_and_affine = false;
    let mut any_within_max = false;
    let mut saw_cohort_shortfall = false;

    for flavor_name in sig {
        let Some(flavor_rec) = snapshot.flavor(flavor_name) else {
            continue;
        };
        let mut tolerated_and_affine_here = true;
        for r in resources {
            let podsets = podsets_requesting(workload, r);
            if !tolerations_ok(flavor_rec, &podsets) {
                tolerated_and_affine_here = false;
                break;
            }
            let declared_keys = declared_label_keys(cq, snapshot, r);
            if !affinity_ok(flavor_rec, &declared_keys, &podsets) {
                tolerated_and_affine_here = false;
                break;
            }
        }
        if !tolerated_and_affine_here {
            continue;
        }
        any_tolerated_and_affine = true;

        let mut within_max_here = true;
        let mut cohort_shortfall_here = false;
        for r in resources {
            let requested = workload.total_request(r);
            let used = cq.used(r, flavor_name);
            let max = cq.max(r, flavor_name);
            let fits_max = match max {
                Some(m) => used.checked_add(requested).map(|t| t <= m).unwrap_or(false),
                None => true,
            };
            if !fits_max {
                within_max_here = false;
                break;
            }
            if cq.cohort.is_some() && cohort_free_min_for(cq, snapshot, r, flavor_name) < requested {
                cohort_shortfall_here = true;
            }
        }
        if within_max_here {
            any_within_max = true;
            if cohort_shortfall_here {
                saw_cohort_shortfall = true;
            }
        }
    }

    if !any_tolerated_and_affine {
        return Reason::Untolerated;
    }
    if !any_within_max {
        return Reason::NoQuotaEvenWithBorrow;
    }
    if saw_cohort_shortfall {
        return Reason::CohortExhausted;
    }
    Reason::NoFit
}

fn podsets_requesting<'a>(workload: &'a WorkloadRecord, resource: &str) -> Vec<&'a PodSetRecord> {
    workload
        .pod_sets
        .iter()
        .filter(|ps| ps.requests.contains_key(resource))
        .collect()
}

/// Union of node-label keys declared across every flavor this resource
/// may use, per spec.md §4.3's "a label key declared on any flavor of
/// this resource".
fn declared_label_keys(cq: &ClusterQueueSnapshot, snapshot: &Snapshot, resource: &str) -> BTreeSet<String> {
    let Some(rec) = cq.resource(resource) else {
        return BTreeSet::new();
    };
    rec.flavors
        .iter()
        .filter_map(|f| snapshot.flavor(&f.name))
        .flat_map(|f| f.node_labels.keys().cloned())
        .collect()
}

/// Label pins implied by a podset's node selector plus (per this crate's
/// Open Question decision) the first required node-affinity term's `In`
/// match expressions.
fn required_pins(ps: &PodSetRecord) -> BTreeMap<String, String> {
    let mut pins = ps.node_selector.clone();
    if let Some(affinity) = &ps.affinity
        && let Some(node_affinity) = &affinity.node_affinity
        && let Some(required) = &node_affinity.required_during_scheduling_ignored_during_execution
        && let Some(term) = required.node_selector_terms.first()
        && let Some(exprs) = &term.match_expressions
    {
        for expr in exprs {
            if expr.operator == "In"
                && let Some(values) = &expr.values
                && values.len() == 1
            {
                pins.insert(expr.key.clone(), values[0].clone());
            }
        }
    }
    pins
}

fn affinity_ok(flavor: &FlavorRecord, declared_keys: &BTreeSet<String>, podsets: &[&PodSetRecord]) -> bool {
    for ps in podsets {
        for (key, value) in required_pins(ps) {
            if !declared_keys.contains(&key) {
                continue;
            }
            match flavor.node_labels.get(&key) {
                Some(v) if *v == value => {}
                _ => return false,
            }
        }
    }
    true
}

fn tolerations_ok(flavor: &FlavorRecord, podsets: &[&PodSetRecord]) -> bool {
    for ps in podsets {
        for taint in &flavor.taints {
            if !ps.tolerations.iter().any(|t| toleration_tolerates_taint(t, taint)) {
                return false;
            }
        }
    }
    true
}

fn toleration_tolerates_taint(tol: &Toleration, taint: &Taint) -> bool {
    if let Some(effect) = &tol.effect
        && effect != &taint.effect
    {
        return false;
    }
    match tol.operator.as_deref() {
        Some("Exists") => tol.key.as_deref().is_none_or(|k| k == taint.key),
        _ => match &tol.key {
            None => false,
            Some(k) => *k == taint.key && tol.value == taint.value,
        },
    }
}

fn cohort_free_min_for(cq: &ClusterQueueSnapshot, snapshot: &Snapshot, resource: &str, flavor: &str) -> Quantity {
    match &cq.cohort {
        Some(c) => snapshot.cohort_free_min(c, resource, flavor),
        None => cq.min(resource, flavor).saturating_sub(cq.used(resource, flavor)),
    }
}

/// `usage + requested <= min` (no borrowing needed) OR `usage + requested
/// <= max` and the cohort has enough unused min (spec.md §4.3 quota rule).
fn resource_flavor_fits(
    cq: &ClusterQueueSnapshot,
    snapshot: &Snapshot,
    resource: &str,
    flavor: &str,
    requested: Quantity,
) -> bool {
    let used = cq.used(resource, flavor);
    let min = cq.min(resource, flavor);
    if used.checked_add(requested).map(|t| t <= min).unwrap_or(false) {
        return true;
    }
    let max = cq.max(resource, flavor);
    let within_max = match max {
        Some(m) => used.checked_add(requested).map(|t| t <= m).unwrap_or(false),
        None => true,
    };
    if !within_max {
        return false;
    }
    cohort_free_min_for(cq, snapshot, resource, flavor) >= requested
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{AdmissionRecord, Cache};
    use batchq_types::{ClusterQueueResource, ClusterQueueSpec, FlavorQuota, QueueingStrategy};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use std::collections::BTreeMap;

    fn flavor_quota(name: &str, min: &str, max: Option<&str>) -> FlavorQuota {
        FlavorQuota {
            name: name.to_string(),
            min: min.to_string(),
            max: max.map(|s| s.to_string()),
        }
    }

    fn simple_workload(requests: &[(&str, &str)]) -> WorkloadRecord {
        let mut req = BTreeMap::new();
        for (k, v) in requests {
            req.insert(k.to_string(), Quantity::parse(v).unwrap());
        }
        WorkloadRecord {
            namespace: "ns".into(),
            name: "wl".into(),
            uid: "u".into(),
            queue_name: "q".into(),
            pod_sets: vec![PodSetRecord {
                name: "main".into(),
                count: 1,
                requests: req,
                tolerations: vec![],
                node_selector: Default::default(),
                affinity: None,
            }],
            priority: 0,
            creation_timestamp: Time(chrono::Utc::now()),
            admission: None,
            finished: false,
        }
    }

    #[test]
    fn fit_scenario_prefers_on_demand_then_pending() {
        // spec.md §8 scenario 1: spot is tainted, so an untolerating
        // Workload falls through to on-demand even though spot is
        // declared first and has quota to spare.
        let cache = Cache::new();
        cache.add_flavor(
            "spot",
            Default::default(),
            vec![Taint {
                key: "spot".into(),
                value: Some("true".into()),
                effect: "NoSchedule".into(),
                time_added: None,
            }],
        );
        cache.add_flavor("on-demand", Default::default(), vec![]);
        let spec = ClusterQueueSpec {
            cohort: None,
            queueing_strategy: QueueingStrategy::BestEffortFifo,
            namespace_selector: Some(Default::default()),
            resources: vec![ClusterQueueResource {
                name: "cpu".into(),
                flavors: vec![flavor_quota("spot", "5", Some("5")), flavor_quota("on-demand", "5", None)],
            }],
        };
        cache.add_cluster_queue("prod-cq", &spec).unwrap();
        let snap = cache.snapshot();
        let cq = snap.cluster_queue("prod-cq").unwrap();

        let wl1 = simple_workload(&[("cpu", "2")]);
        let assignment = assign(&wl1, cq, &snap).unwrap();
        assert_eq!(assignment.per_resource.get("cpu").unwrap(), "on-demand");
    }

    #[test]
    fn untolerated_taint_falls_through_to_on_demand() {
        let cache = Cache::new();
        cache.add_flavor(
            "spot-tainted",
            Default::default(),
            vec![Taint {
                key: "spot".into(),
                value: Some("true".into()),
                effect: "NoSchedule".into(),
                time_added: None,
            }],
        );
        cache.add_flavor("on-demand", Default::default(), vec![]);
        let spec = ClusterQueueSpec {
            cohort: None,
            queueing_strategy: QueueingStrategy::BestEffortFifo,
            namespace_selector: Some(Default::default()),
            resources: vec![ClusterQueueResource {
                name: "cpu".into(),
                flavors: vec![
                    flavor_quota("spot-tainted", "5", Some("5")),
                    flavor_quota("on-demand", "5", None),
                ],
            }],
        };
        cache.add_cluster_queue("cq", &spec).unwrap();
        let snap = cache.snapshot();
        let cq = snap.cluster_queue("cq").unwrap();

        let wl = simple_workload(&[("cpu", "5")]);
        let assignment = assign(&wl, cq, &snap).unwrap();
        assert_eq!(assignment.per_resource.get("cpu").unwrap(), "on-demand");

        let mut tolerant = wl.clone();
        tolerant.pod_sets[0].tolerations.push(Toleration {
            key: Some("spot".into()),
            operator: Some("Equal".into()),
            value: Some("true".into()),
            effect: Some("NoSchedule".into()),
            toleration_seconds: None,
        });
        // on-demand now full from the prior admitted workload in this test's
        // cache? No admission was recorded above (assign doesn't mutate the
        // cache), so on-demand is still free; but with a toleration the
        // earlier flavor (spot-tainted) now fits too and wins by declared order.
        let assignment = assign(&tolerant, cq, &snap).unwrap();
        assert_eq!(assignment.per_resource.get("cpu").unwrap(), "spot-tainted");
    }

    #[test]
    fn borrowing_across_cohort() {
        let cache = Cache::new();
        cache.add_flavor("on-demand", Default::default(), vec![]);
        for (name, min, max) in [("prod-cq", "5", "15"), ("dev-cq", "5", "15"), ("test-cq", "15", "15")] {
            let spec = ClusterQueueSpec {
                cohort: Some("all".into()),
                queueing_strategy: QueueingStrategy::BestEffortFifo,
                namespace_selector: Some(Default::default()),
                resources: vec![ClusterQueueResource {
                    name: "cpu".into(),
                    flavors: vec![flavor_quota("on-demand", min, Some(max))],
                }],
            };
            cache.add_cluster_queue(name, &spec).unwrap();
        }
        let snap = cache.snapshot();
        let prod = snap.cluster_queue("prod-cq").unwrap();
        let wl = simple_workload(&[("cpu", "11")]);
        let assignment = assign(&wl, prod, &snap).unwrap();
        assert_eq!(assignment.per_resource.get("cpu").unwrap(), "on-demand");
    }

    #[test]
    fn missing_flavor_reason_untolerated_vs_no_quota() {
        let cache = Cache::new();
        cache.add_flavor(
            "tainted",
            Default::default(),
            vec![Taint {
                key: "k".into(),
                value: None,
                effect: "NoSchedule".into(),
                time_added: None,
            }],
        );
        let spec = ClusterQueueSpec {
            cohort: None,
            queueing_strategy: QueueingStrategy::BestEffortFifo,
            namespace_selector: Some(Default::default()),
            resources: vec![ClusterQueueResource {
                name: "cpu".into(),
                flavors: vec![flavor_quota("tainted", "5", None)],
            }],
        };
        cache.add_cluster_queue("cq", &spec).unwrap();
        let snap = cache.snapshot();
        let cq = snap.cluster_queue("cq").unwrap();
        let wl = simple_workload(&[("cpu", "1")]);
        let err = assign(&wl, cq, &snap).unwrap_err();
        assert_eq!(err, Reason::Untolerated);
    }

    #[test]
    fn apply_usage_then_pending() {
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

        let mut flavors = BTreeMap::new();
        flavors.insert("cpu".to_string(), "on-demand".to_string());
        let mut pod_set_flavors = BTreeMap::new();
        pod_set_flavors.insert("main".to_string(), flavors);
        let mut wl1 = simple_workload(&[("cpu", "5")]);
        wl1.name = "wl1".into();
        wl1.admission = Some(AdmissionRecord {
            cluster_queue: "cq".into(),
            pod_set_flavors,
        });
        cache.add_or_update_workload(wl1);

        let snap = cache.snapshot();
        let cq = snap.cluster_queue("cq").unwrap();
        let wl2 = simple_workload(&[("cpu", "1")]);
        let err = assign(&wl2, cq, &snap).unwrap_err();
        assert_eq!(err, Reason::NoQuotaEvenWithBorrow);
    }
}

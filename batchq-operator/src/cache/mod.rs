//! Single-writer authoritative snapshot of the quota world: ClusterQueues,
//! Cohorts (implicit), ResourceFlavors, LocalQueues and admitted
//! Workloads. See spec.md §4.1.

mod record;
pub mod snapshot;

pub use record::*;
pub use snapshot::*;

use crate::quantity::Quantity;
use batchq_types::{ClusterQueueResource, ClusterQueueSpec, MAX_FLAVORS_PER_RESOURCE, MAX_RESOURCES};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Inner {
    flavors: BTreeMap<String, FlavorRecord>,
    cluster_queues: BTreeMap<String, ClusterQueueRecord>,
    local_queues: BTreeMap<(String, String), LocalQueueRecord>,
    workloads: BTreeMap<(String, String), WorkloadRecord>,
    namespaces: BTreeMap<String, BTreeMap<String, String>>,
}

/// Evaluates a `LabelSelector` against a label set, per spec.md §3's
/// `namespaceSelector` semantics: `null` is handled by the caller (it
/// matches nothing before this function is ever reached); `{}` matches
/// everything, since an empty `match_labels`/`match_expressions` pair
/// vacuously holds for any label set. Supports the four standard
/// operators on `match_expressions`: `In`, `NotIn`, `Exists`,
/// `DoesNotExist`.
pub fn label_selector_matches(selector: &LabelSelector, labels: &BTreeMap<String, String>) -> bool {
    if let Some(match_labels) = &selector.match_labels {
        for (k, v) in match_labels {
            if labels.get(k) != Some(v) {
                return false;
            }
        }
    }
    if let Some(exprs) = &selector.match_expressions {
        for expr in exprs {
            let present = labels.get(&expr.key);
            let matches = match expr.operator.as_str() {
                "In" => present.is_some_and(|v| expr.values.as_deref().unwrap_or(&[]).contains(v)),
                "NotIn" => !present.is_some_and(|v| expr.values.as_deref().unwrap_or(&[]).contains(v)),
                "Exists" => present.is_some(),
                "DoesNotExist" => present.is_none(),
                _ => false,
            };
            if !matches {
                return false;
            }
        }
    }
    true
}

/// Thread-safe handle to the cache. Cloning shares the same underlying
/// state (it is an `Arc`), matching spec.md's "process-wide singleton".
#[derive(Clone, Default)]
pub struct Cache {
    inner: Arc<Mutex<Inner>>,
}

/// Parses and validates a ClusterQueue's resource list, per spec.md §3:
/// each resource's flavor list must be non-empty, at most
/// [`MAX_RESOURCES`] resources with at most [`MAX_FLAVORS_PER_RESOURCE`]
/// flavors each, min <= max when max is set, and any two resources must
/// either share the exact same ordered flavor-name list (codependent) or
/// have disjoint flavor-name sets.
pub fn validate_resources(resources: &[ClusterQueueResource]) -> Result<Vec<ResourceRecord>, String> {
    if resources.len() > MAX_RESOURCES {
        return Err(format!(
            "at most {MAX_RESOURCES} resources are allowed, got {}",
            resources.len()
        ));
    }
    let mut out = Vec::with_capacity(resources.len());
    for res in resources {
        if res.flavors.is_empty() {
            return Err(format!("resource {} has an empty flavor list", res.name));
        }
        if res.flavors.len() > MAX_FLAVORS_PER_RESOURCE {
            return Err(format!(
                "resource {} declares more than {MAX_FLAVORS_PER_RESOURCE} flavors",
                res.name
            ));
        }
        let mut flavors = Vec::with_capacity(res.flavors.len());
        for fq in &res.flavors {
            let min = Quantity::parse(&fq.min).map_err(|e| format!("resource {}: flavor {}: {e}", res.name, fq.name))?;
            let max = fq
                .max
                .as_ref()
                .map(|m| Quantity::parse(m).map_err(|e| format!("resource {}: flavor {}: {e}", res.name, fq.name)))
                .transpose()?;
            if let Some(max) = max
                && min > max
            {
                return Err(format!(
                    "resource {}: flavor {}: min ({}) exceeds max ({})",
                    res.name, fq.name, min, max
                ));
            }
            flavors.push(FlavorQuotaRecord {
                name: fq.name.clone(),
                min,
                max,
            });
        }
        out.push(ResourceRecord {
            name: res.name.clone(),
            flavors,
        });
    }
    for i in 0..out.len() {
        for j in (i + 1)..out.len() {
            let names_i: Vec<&str> = out[i].flavors.iter().map(|f| f.name.as_str()).collect();
            let names_j: Vec<&str> = out[j].flavors.iter().map(|f| f.name.as_str()).collect();
            if names_i == names_j {
                continue;
            }
            if names_i.iter().any(|n| names_j.contains(n)) {
                return Err(format!(
                    "resources {} and {} share some but not all flavor names; codependent resources must share the exact same ordered flavor list",
                    out[i].name, out[j].name
                ));
            }
        }
    }
    Ok(out)
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_flavor(&self, name: &str, node_labels: BTreeMap<String, String>, taints: Vec<k8s_openapi::api::core::v1::Taint>) {
        let mut inner = self.inner.lock().unwrap();
        inner.flavors.insert(name.to_string(), FlavorRecord { node_labels, taints });
        recompute_all_active(&mut inner);
    }

    pub fn delete_flavor(&self, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.flavors.remove(name);
        recompute_all_active(&mut inner);
    }

    /// Returns true if no ClusterQueue references this flavor any more,
    /// i.e. it is safe to drop the `resource-in-use` finalizer.
    pub fn flavor_unreferenced(&self, name: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        !inner.cluster_queues.values().any(|cq| {
            cq.resources
                .iter()
                .any(|r| r.flavors.iter().any(|f| f.name == name))
        })
    }

    pub fn add_cluster_queue(&self, name: &str, spec: &ClusterQueueSpec) -> Result<(), String> {
        let parsed = validate_resources(&spec.resources);
        let mut inner = self.inner.lock().unwrap();
        let (resources, schema_violation) = match parsed {
            Ok(r) => (r, None),
            Err(e) => (Vec::new(), Some(e)),
        };
        let usage = inner
            .cluster_queues
            .get(name)
            .map(|old| old.usage.clone())
            .unwrap_or_default();
        let deleting = inner.cluster_queues.get(name).map(|old| old.deleting).unwrap_or(false);
        let violation_msg = schema_violation.clone();
        inner.cluster_queues.insert(
            name.to_string(),
            ClusterQueueRecord {
                cohort: spec.cohort.clone(),
                queueing_strategy: spec.queueing_strategy,
                namespace_selector: spec.namespace_selector.clone(),
                resources,
                usage,
                active: false,
                schema_violation: schema_violation.clone(),
                deleting,
            },
        );
        recompute_active(&mut inner, name);
        match violation_msg {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn update_cluster_queue(&self, name: &str, spec: &ClusterQueueSpec) -> Result<(), String> {
        self.add_cluster_queue(name, spec)
    }

    pub fn mark_cluster_queue_deleting(&self, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(cq) = inner.cluster_queues.get_mut(name) {
            cq.deleting = true;
        }
        recompute_active(&mut inner, name);
    }

    pub fn delete_cluster_queue(&self, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.cluster_queues.remove(name);
    }

    /// True if no admitted, unfinished Workload still references `name`.
    pub fn cluster_queue_unreferenced(&self, name: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        !inner.workloads.values().any(|w| {
            !w.finished
                && w.admission
                    .as_ref()
                    .is_some_and(|a| a.cluster_queue == name)
        })
    }

    pub fn add_local_queue(&self, namespace: &str, name: &str, cluster_queue: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.local_queues.insert(
            (namespace.to_string(), name.to_string()),
            LocalQueueRecord {
                cluster_queue: cluster_queue.to_string(),
            },
        );
    }

    pub fn delete_local_queue(&self, namespace: &str, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.local_queues.remove(&(namespace.to_string(), name.to_string()));
    }

    pub fn local_queue_cluster_queue(&self, namespace: &str, name: &str) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .local_queues
            .get(&(namespace.to_string(), name.to_string()))
            .map(|lq| lq.cluster_queue.clone())
    }

    pub fn add_or_update_workload(&self, record: WorkloadRecord) {
        let mut inner = self.inner.lock().unwrap();
        let key = (record.namespace.clone(), record.name.clone());
        if let Some(old) = inner.workloads.get(&key) {
            release_usage(&mut inner.cluster_queues, old);
        }
        if record.admission.is_some() && !record.finished {
            apply_usage(&mut inner.cluster_queues, &record);
        }
        inner.workloads.insert(key, record);
    }

    pub fn delete_workload(&self, namespace: &str, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(old) = inner.workloads.remove(&(namespace.to_string(), name.to_string())) {
            release_usage(&mut inner.cluster_queues, &old);
        }
    }

    /// Count of non-finished, admitted Workloads currently charged
    /// against `cluster_queue`, for metrics (spec.md §6's
    /// `admitted_active_workloads`).
    pub fn admitted_count(&self, cluster_queue: &str) -> usize {
        let inner = self.inner.lock().unwrap();
        inner
            .workloads
            .values()
            .filter(|w| {
                !w.finished
                    && w.admission
                        .as_ref()
                        .is_some_and(|a| a.cluster_queue == cluster_queue)
            })
            .count()
    }

    /// `(pending, admitted)` counts of non-finished Workloads in
    /// `namespace` naming this LocalQueue, for `LocalQueueStatus`.
    pub fn workloads_for_queue(&self, namespace: &str, queue_name: &str) -> (usize, usize) {
        let inner = self.inner.lock().unwrap();
        let mut pending = 0;
        let mut admitted = 0;
        for w in inner.workloads.values() {
            if w.namespace == namespace && w.queue_name == queue_name && !w.finished {
                if w.admission.is_some() {
                    admitted += 1;
                } else {
                    pending += 1;
                }
            }
        }
        (pending, admitted)
    }

    /// True if no non-finished Workload in `namespace` still names this
    /// LocalQueue, i.e. it's safe to drop the `resource-in-use` finalizer.
    pub fn local_queue_unreferenced(&self, namespace: &str, name: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        !inner
            .workloads
            .values()
            .any(|w| w.namespace == namespace && w.queue_name == name && !w.finished)
    }

    pub fn workload(&self, namespace: &str, name: &str) -> Option<WorkloadRecord> {
        let inner = self.inner.lock().unwrap();
        inner.workloads.get(&(namespace.to_string(), name.to_string())).cloned()
    }

    /// `None` if the ClusterQueue isn't known to the cache yet (not the
    /// same as `Pending`: an unknown CQ has no resources to be frozen
    /// against).
    pub fn cluster_queue_active(&self, name: &str) -> Option<bool> {
        let inner = self.inner.lock().unwrap();
        inner.cluster_queues.get(name).map(|cq| cq.active)
    }

    pub fn add_namespace(&self, name: &str, labels: BTreeMap<String, String>) {
        let mut inner = self.inner.lock().unwrap();
        inner.namespaces.insert(name.to_string(), labels);
    }

    pub fn delete_namespace(&self, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.namespaces.remove(name);
    }

    /// Coarse-lock, clone, release: an immutable point-in-time view for a
    /// scheduling cycle. No cache mutation observes a half-built snapshot,
    /// and nothing returned here aliases the live maps.
    pub fn snapshot(&self) -> Snapshot {
        let inner = self.inner.lock().unwrap();
        Snapshot::build(&inner.cluster_queues, &inner.flavors, &inner.namespaces)
    }
}

fn release_usage(cluster_queues: &mut BTreeMap<String, ClusterQueueRecord>, w: &WorkloadRecord) {
    let Some(admission) = &w.admission else { return };
    let Some(cq) = cluster_queues.get_mut(&admission.cluster_queue) else {
        return;
    };
    for ps in &w.pod_sets {
        let Some(flavors) = admission.pod_set_flavors.get(&ps.name) else {
            continue;
        };
        for (resource, flavor) in flavors {
            let requested = ps.requests.get(resource).copied().unwrap_or(Quantity::ZERO).scale(ps.count as i64);
            let entry = cq.usage.entry(resource.clone()).or_default().entry(flavor.clone()).or_insert(Quantity::ZERO);
            *entry = entry.saturating_sub(requested);
        }
    }
}

fn apply_usage(cluster_queues: &mut BTreeMap<String, ClusterQueueRecord>, w: &WorkloadRecord) {
    let Some(admission) = &w.admission else { return };
    let Some(cq) = cluster_queues.get_mut(&admission.cluster_queue) else {
        return;
    };
    for ps in &w.pod_sets {
        let Some(flavors) = admission.pod_set_flavors.get(&ps.name) else {
            continue;
        };
        for (resource, flavor) in flavors {
            let requested = ps.requests.get(resource).copied().unwrap_or(Quantity::ZERO).scale(ps.count as i64);
            let entry = cq.usage.entry(resource.clone()).or_default().entry(flavor.clone()).or_insert(Quantity::ZERO);
            *entry = entry.checked_add(requested).unwrap_or(*entry);
        }
    }
}

fn recompute_active(inner: &mut Inner, name: &str) {
    let flavors_known = {
        let flavors = &inner.flavors;
        inner.cluster_queues.get(name).map(|cq| {
            cq.schema_violation.is_none()
                && !cq.deleting
                && cq
                    .resources
                    .iter()
                    .all(|r| r.flavors.iter().all(|f| flavors.contains_key(&f.name)))
        })
    };
    if let (Some(active), Some(cq)) = (flavors_known, inner.cluster_queues.get_mut(name)) {
        cq.active = active;
    }
}

fn recompute_all_active(inner: &mut Inner) {
    let names: Vec<String> = inner.cluster_queues.keys().cloned().collect();
    for name in names {
        recompute_active(inner, &name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchq_types::{ClusterQueueResource, FlavorQuota, QueueingStrategy};

    fn cq_spec(resources: Vec<ClusterQueueResource>) -> ClusterQueueSpec {
        ClusterQueueSpec {
            cohort: None,
            queueing_strategy: QueueingStrategy::BestEffortFifo,
            namespace_selector: Some(Default::default()),
            resources,
        }
    }

    fn flavor_quota(name: &str, min: &str, max: Option<&str>) -> FlavorQuota {
        FlavorQuota {
            name: name.to_string(),
            min: min.to_string(),
            max: max.map(|s| s.to_string()),
        }
    }

    #[test]
    fn pending_until_flavor_known() {
        let cache = Cache::new();
        let spec = cq_spec(vec![ClusterQueueResource {
            name: "cpu".to_string(),
            flavors: vec![flavor_quota("on-demand", "5", None)],
        }]);
        let result = cache.add_cluster_queue("cq1", &spec);
        assert!(result.is_ok());
        let snap = cache.snapshot();
        assert!(!snap.cluster_queue("cq1").unwrap().active);

        cache.add_flavor("on-demand", Default::default(), vec![]);
        let snap = cache.snapshot();
        assert!(snap.cluster_queue("cq1").unwrap().active);
    }

    #[test]
    fn schema_violation_min_exceeds_max() {
        let spec = cq_spec(vec![ClusterQueueResource {
            name: "cpu".to_string(),
            flavors: vec![flavor_quota("f", "10", Some("5"))],
        }]);
        assert!(validate_resources(&spec.resources).is_err());
    }

    #[test]
    fn codependent_resources_must_match_exactly() {
        let resources = vec![
            ClusterQueueResource {
                name: "cpu".to_string(),
                flavors: vec![flavor_quota("a", "1", None), flavor_quota("b", "1", None)],
            },
            ClusterQueueResource {
                name: "memory".to_string(),
                flavors: vec![flavor_quota("b", "1", None)],
            },
        ];
        assert!(validate_resources(&resources).is_err());
    }

    #[test]
    fn usage_accounting_add_finish_release() {
        let cache = Cache::new();
        cache.add_flavor("on-demand", Default::default(), vec![]);
        let spec = cq_spec(vec![ClusterQueueResource {
            name: "cpu".to_string(),
            flavors: vec![flavor_quota("on-demand", "5", None)],
        }]);
        cache.add_cluster_queue("cq1", &spec).unwrap();

        let mut requests = BTreeMap::new();
        requests.insert("cpu".to_string(), Quantity::parse("2").unwrap());
        let mut flavors = BTreeMap::new();
        flavors.insert("cpu".to_string(), "on-demand".to_string());
        let mut pod_set_flavors = BTreeMap::new();
        pod_set_flavors.insert("main".to_string(), flavors);

        let w = WorkloadRecord {
            namespace: "ns".into(),
            name: "wl1".into(),
            uid: "u1".into(),
            queue_name: "q".into(),
            pod_sets: vec![PodSetRecord {
                name: "main".into(),
                count: 1,
                requests,
                tolerations: vec![],
                node_selector: Default::default(),
                affinity: None,
            }],
            priority: 0,
            creation_timestamp: k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(chrono::Utc::now()),
            admission: Some(AdmissionRecord {
                cluster_queue: "cq1".into(),
                pod_set_flavors,
            }),
            finished: false,
        };
        cache.add_or_update_workload(w.clone());
        let snap = cache.snapshot();
        assert_eq!(
            snap.cluster_queue("cq1").unwrap().used("cpu", "on-demand"),
            Quantity::parse("2").unwrap()
        );

        cache.delete_workload("ns", "wl1");
        let snap = cache.snapshot();
        assert_eq!(snap.cluster_queue("cq1").unwrap().used("cpu", "on-demand"), Quantity::ZERO);
    }

    #[test]
    fn null_namespace_selector_matches_nothing() {
        let cache = Cache::new();
        cache.add_flavor("on-demand", Default::default(), vec![]);
        let spec = ClusterQueueSpec {
            cohort: None,
            queueing_strategy: QueueingStrategy::BestEffortFifo,
            namespace_selector: None,
            resources: vec![ClusterQueueResource {
                name: "cpu".to_string(),
                flavors: vec![flavor_quota("on-demand", "5", None)],
            }],
        };
        cache.add_cluster_queue("cq", &spec).unwrap();
        let snap = cache.snapshot();
        let cq = snap.cluster_queue("cq").unwrap();
        assert!(!snap.namespace_matches(cq, "team-a"));
    }

    #[test]
    fn label_match_expressions_select_namespace() {
        let cache = Cache::new();
        cache.add_flavor("on-demand", Default::default(), vec![]);
        let mut labels = BTreeMap::new();
        labels.insert("team".to_string(), "payments".to_string());
        cache.add_namespace("team-a", labels);
        cache.add_namespace("team-b", BTreeMap::new());

        let selector = k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector {
            match_labels: Some({
                let mut m = BTreeMap::new();
                m.insert("team".to_string(), "payments".to_string());
                m
            }),
            match_expressions: None,
        };
        let spec = ClusterQueueSpec {
            cohort: None,
            queueing_strategy: QueueingStrategy::BestEffortFifo,
            namespace_selector: Some(selector),
            resources: vec![ClusterQueueResource {
                name: "cpu".to_string(),
                flavors: vec![flavor_quota("on-demand", "5", None)],
            }],
        };
        cache.add_cluster_queue("cq", &spec).unwrap();
        let snap = cache.snapshot();
        let cq = snap.cluster_queue("cq").unwrap();
        assert!(snap.namespace_matches(cq, "team-a"));
        assert!(!snap.namespace_matches(cq, "team-b"));
    }
}

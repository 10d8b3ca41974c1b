//! Per-ClusterQueue ordering of pending Workloads. See spec.md §4.2.
//!
//! The manager itself is strategy-agnostic: it only maintains ordering
//! and membership. `QueueingStrategy` (StrictFIFO vs BestEffortFIFO)
//! is read off the Cache snapshot by the scheduler, which decides
//! whether it may skip past a head that doesn't currently fit.

mod ordering;

pub use ordering::QueueEntry;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

type WorkloadKey = (String, String);

#[derive(Default)]
struct Inner {
    queues: BTreeMap<String, BTreeSet<QueueEntry>>,
    /// workload key -> the ClusterQueue it is currently filed under, so
    /// `update`/`delete` don't need to search every queue.
    index: BTreeMap<WorkloadKey, String>,
}

/// Thread-safe handle, mirroring the Cache's single-writer-process-wide
/// singleton shape.
#[derive(Default)]
pub struct QueueManager {
    inner: Mutex<Inner>,
}

impl QueueManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Files (or re-files) a Workload under `cluster_queue`. Removes any
    /// prior membership first, so moving a Workload between
    /// ClusterQueues (LocalQueue's `clusterQueue` target changed) or
    /// re-keying it after a priority edit are both just another `push`.
    pub fn push(&self, cluster_queue: &str, entry: QueueEntry) {
        let mut inner = self.inner.lock().unwrap();
        let key = entry.key();
        Self::remove_locked(&mut inner, &key);
        inner.queues.entry(cluster_queue.to_string()).or_default().insert(entry);
        inner.index.insert(key, cluster_queue.to_string());
    }

    /// Priority or metadata changed: same as `push`, named separately so
    /// call sites document intent.
    pub fn update(&self, cluster_queue: &str, entry: QueueEntry) {
        self.push(cluster_queue, entry);
    }

    pub fn delete(&self, namespace: &str, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        Self::remove_locked(&mut inner, &(namespace.to_string(), name.to_string()));
    }

    fn remove_locked(inner: &mut Inner, key: &WorkloadKey) {
        if let Some(cluster_queue) = inner.index.remove(key) {
            if let Some(set) = inner.queues.get_mut(&cluster_queue) {
                set.retain(|e| &e.key() != key);
                if set.is_empty() {
                    inner.queues.remove(&cluster_queue);
                }
            }
        }
    }

    /// Drops every entry filed under `cluster_queue`, e.g. once it is
    /// confirmed gone and its Workloads have been redirected elsewhere
    /// or rejected.
    pub fn clear_cluster_queue(&self, cluster_queue: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(set) = inner.queues.remove(cluster_queue) {
            for e in &set {
                inner.index.remove(&e.key());
            }
        }
    }

    /// Full pending order for one ClusterQueue, head first. Used by
    /// BestEffortFIFO, which may walk past an unschedulable head; and by
    /// StrictFIFO, which only ever looks at the first element.
    pub fn ordered(&self, cluster_queue: &str) -> Vec<QueueEntry> {
        let inner = self.inner.lock().unwrap();
        inner
            .queues
            .get(cluster_queue)
            .map(|set| set.iter().rev().cloned().collect())
            .unwrap_or_default()
    }

    pub fn front(&self, cluster_queue: &str) -> Option<QueueEntry> {
        let inner = self.inner.lock().unwrap();
        inner.queues.get(cluster_queue).and_then(|set| set.iter().next_back().cloned())
    }

    pub fn len(&self, cluster_queue: &str) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.queues.get(cluster_queue).map(BTreeSet::len).unwrap_or(0)
    }

    pub fn is_empty(&self, cluster_queue: &str) -> bool {
        self.len(cluster_queue) == 0
    }

    pub fn cluster_queue_of(&self, namespace: &str, name: &str) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner.index.get(&(namespace.to_string(), name.to_string())).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    fn entry(name: &str, priority: i32, uid: &str) -> QueueEntry {
        QueueEntry {
            namespace: "ns".into(),
            name: name.into(),
            uid: uid.into(),
            priority,
            creation_timestamp: Time(Utc::now()),
        }
    }

    #[test]
    fn push_orders_by_priority() {
        let qm = QueueManager::new();
        qm.push("cq", entry("low", 0, "a"));
        qm.push("cq", entry("high", 10, "b"));
        let names: Vec<_> = qm.ordered("cq").into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["high", "low"]);
    }

    #[test]
    fn push_again_reorders_without_duplicating() {
        let qm = QueueManager::new();
        qm.push("cq", entry("wl", 0, "a"));
        qm.push("cq", entry("wl", 50, "a"));
        assert_eq!(qm.len("cq"), 1);
        assert_eq!(qm.front("cq").unwrap().priority, 50);
    }

    #[test]
    fn moving_between_cluster_queues_removes_old_membership() {
        let qm = QueueManager::new();
        qm.push("cq1", entry("wl", 0, "a"));
        qm.push("cq2", entry("wl", 0, "a"));
        assert!(qm.is_empty("cq1"));
        assert_eq!(qm.len("cq2"), 1);
    }

    #[test]
    fn delete_removes_from_index_and_queue() {
        let qm = QueueManager::new();
        qm.push("cq", entry("wl", 0, "a"));
        qm.delete("ns", "wl");
        assert!(qm.is_empty("cq"));
        assert!(qm.cluster_queue_of("ns", "wl").is_none());
    }

    #[test]
    fn clear_cluster_queue_drops_all_entries() {
        let qm = QueueManager::new();
        qm.push("cq", entry("a", 0, "a"));
        qm.push("cq", entry("b", 0, "b"));
        qm.clear_cluster_queue("cq");
        assert!(qm.ordered("cq").is_empty());
        assert!(qm.cluster_queue_of("ns", "a").is_none());
    }
}

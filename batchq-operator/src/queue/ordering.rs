use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use std::cmp::Ordering;

/// A pending Workload's position in its ClusterQueue's queue, per
/// spec.md §4.2: ordered by priority (desc), then creation timestamp
/// (asc), then uid (asc) as a final, total tie-break.
#[derive(Clone, Debug)]
pub struct QueueEntry {
    pub namespace: String,
    pub name: String,
    pub uid: String,
    pub priority: i32,
    pub creation_timestamp: Time,
}

impl QueueEntry {
    pub fn key(&self) -> (String, String) {
        (self.namespace.clone(), self.name.clone())
    }
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Greater = closer to the front of the queue (popped/served first), so
/// a `BTreeSet<QueueEntry>` iterated in reverse yields queue order
/// directly.
impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.creation_timestamp.0.cmp(&self.creation_timestamp.0))
            .then_with(|| other.uid.cmp(&self.uid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn entry(priority: i32, secs: i64, uid: &str) -> QueueEntry {
        QueueEntry {
            namespace: "ns".into(),
            name: format!("wl-{uid}"),
            uid: uid.into(),
            priority,
            creation_timestamp: Time(Utc.timestamp_opt(secs, 0).unwrap()),
        }
    }

    #[test]
    fn higher_priority_sorts_first() {
        let low = entry(0, 10, "a");
        let high = entry(10, 20, "b");
        assert!(high > low);
    }

    #[test]
    fn equal_priority_earlier_creation_first() {
        let earlier = entry(0, 10, "a");
        let later = entry(0, 20, "b");
        assert!(earlier > later);
    }

    #[test]
    fn equal_priority_and_time_breaks_on_uid() {
        let a = entry(0, 10, "aaa");
        let b = entry(0, 10, "zzz");
        assert!(a > b);
    }
}

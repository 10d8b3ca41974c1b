use crate::cache::{AdmissionRecord, PodSetRecord, WorkloadRecord};
use crate::quantity::Quantity;
use crate::util::Error;
use batchq_types::Workload;
use kube::ResourceExt;
use std::collections::BTreeMap;

/// Builds the Cache's internal view of a Workload from its live spec and
/// status. Parse failures here are the operator's own bug (the CRD
/// schema already constrains `requests` to quantity strings) rather
/// than user input, so they surface as `Error::Quantity` and the
/// reconciler simply requeues.
pub fn to_record(instance: &Workload) -> Result<WorkloadRecord, Error> {
    let namespace = instance.namespace().ok_or_else(|| {
        Error::UserInput("Expected Workload resource to be namespaced.".to_owned())
    })?;
    let name = instance.name_any();
    let uid = instance.uid().unwrap_or_default();

    let mut pod_sets = Vec::with_capacity(instance.spec.pod_sets.len());
    for ps in &instance.spec.pod_sets {
        let mut requests = BTreeMap::new();
        for (resource, qty) in &ps.template.requests {
            let parsed = Quantity::parse(qty).map_err(|e| Error::Quantity(e.to_string()))?;
            requests.insert(resource.clone(), parsed);
        }
        pod_sets.push(PodSetRecord {
            name: ps.name.clone(),
            count: ps.count,
            requests,
            tolerations: ps.template.tolerations.clone(),
            node_selector: ps.template.node_selector.clone(),
            affinity: ps.template.affinity.clone(),
        });
    }

    let admission = instance.status.as_ref().and_then(|s| s.admission.as_ref()).map(|a| {
        let pod_set_flavors = a
            .pod_set_flavors
            .iter()
            .map(|psa| (psa.name.clone(), psa.flavors.clone()))
            .collect();
        AdmissionRecord {
            cluster_queue: a.cluster_queue.clone(),
            pod_set_flavors,
        }
    });
    let finished = instance.status.as_ref().is_some_and(|s| s.finished);

    Ok(WorkloadRecord {
        namespace,
        name,
        uid,
        queue_name: instance.spec.queue_name.clone(),
        pod_sets,
        priority: instance.spec.priority,
        creation_timestamp: instance
            .meta()
            .creation_timestamp
            .clone()
            .unwrap_or_else(crate::util::patch::now),
        admission,
        finished,
    })
}

use batchq_types::*;
use kube::CustomResourceExt;
use std::fs;

fn main() {
    let _ = fs::create_dir("../crds");
    fs::write(
        "../crds/batchq.io_clusterqueue_crd.yaml",
        serde_yaml::to_string(&ClusterQueue::crd()).unwrap(),
    )
    .unwrap();
    fs::write(
        "../crds/batchq.io_resourceflavor_crd.yaml",
        serde_yaml::to_string(&ResourceFlavor::crd()).unwrap(),
    )
    .unwrap();
    fs::write(
        "../crds/batchq.io_localqueue_crd.yaml",
        serde_yaml::to_string(&LocalQueue::crd()).unwrap(),
    )
    .unwrap();
    fs::write(
        "../crds/batchq.io_workload_crd.yaml",
        serde_yaml::to_string(&Workload::crd()).unwrap(),
    )
    .unwrap();
}

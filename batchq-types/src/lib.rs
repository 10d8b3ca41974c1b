mod cluster_queue;
mod local_queue;
mod resource_flavor;
mod workload;

pub use cluster_queue::*;
pub use local_queue::*;
pub use resource_flavor::*;
pub use workload::*;

/// Finalizer name retained on [`ClusterQueue`] and [`ResourceFlavor`] while referenced.
pub const RESOURCE_IN_USE_FINALIZER: &str = "resource-in-use";

pub mod conditions {
    pub const ACTIVE: &str = "Active";
    pub const FROZEN: &str = "Frozen";
}

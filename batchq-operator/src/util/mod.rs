pub mod finalizer;
pub mod patch;

mod error;

pub use error::*;

pub use batchq_common::colors;

use std::time::Duration;

/// Default interval for requeuing a managed resource absent any other
/// trigger.
pub const PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// Name of the kubernetes resource manager used for server-side apply.
pub const MANAGER_NAME: &str = "batchq-operator";

use clap::Parser;
use std::time::Duration;

/// Process-level configuration. There is no persistent config surface
/// beyond the four kinds the operator watches (spec.md §6).
#[derive(Parser, Debug, Clone)]
#[command(name = "batchq-operator", version, about)]
pub struct Args {
    /// Number of concurrent reconcile workers per kind.
    #[arg(long, env = "BATCHQ_QUEUE_WORKERS", default_value_t = 4)]
    pub queue_workers: usize,

    /// Minimum interval between scheduler cycles, used to coalesce bursts
    /// of wake signals (spec.md §9, "wake coalescing interval").
    #[arg(long, env = "BATCHQ_WAKE_INTERVAL_MS", default_value_t = 1000)]
    pub wake_interval_ms: u64,

    /// Bounded deadline for a single admission commit before it is
    /// abandoned and the Workload remains pending (spec.md §5).
    #[arg(long, env = "BATCHQ_COMMIT_TIMEOUT_MS", default_value_t = 5000)]
    pub commit_timeout_ms: u64,

    /// Port the `/metrics`, `/healthz`, `/readyz` server listens on.
    #[arg(long, env = "BATCHQ_METRICS_PORT", default_value_t = 8080)]
    pub metrics_port: u16,

    /// Namespace leader-election leases are created in.
    #[arg(long, env = "NAMESPACE", default_value = "default")]
    pub lease_namespace: String,
}

impl Args {
    pub fn wake_interval(&self) -> Duration {
        Duration::from_millis(self.wake_interval_ms)
    }

    pub fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.commit_timeout_ms)
    }
}

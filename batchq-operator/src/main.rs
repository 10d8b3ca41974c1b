mod cache;
mod clusterqueues;
mod flavor_assigner;
mod localqueues;
mod namespaces;
mod queue;
mod quantity;
mod resourceflavors;
mod scheduler;
mod util;
mod workloads;

use clap::Parser;
use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams, LeaseLockResult};
use owo_colors::OwoColorize;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use batchq_common::cli::Args;
use cache::Cache;
use queue::QueueManager;
use scheduler::driver::SchedulerConfig;

/// One leader-elected run of every reconciler plus the scheduler driver,
/// bundled as a single abortable task so leadership loss stops all of it
/// at once.
struct Reconcilers {
    client: Client,
    cache: Cache,
    queues: Arc<QueueManager>,
    wake: Arc<Notify>,
    config: SchedulerConfig,
    queue_workers: usize,
}

impl Reconcilers {
    fn spawn(&self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let client = self.client.clone();
        let cache = self.cache.clone();
        let queues = self.queues.clone();
        let wake = self.wake.clone();
        let config = self.config.clone();
        let queue_workers = self.queue_workers;
        tokio::spawn(async move {
            tokio::join!(
                clusterqueues::run(client.clone(), cache.clone(), queues.clone(), wake.clone(), cancel.clone(), queue_workers),
                localqueues::run(client.clone(), cache.clone(), wake.clone(), cancel.clone(), queue_workers),
                resourceflavors::run(client.clone(), cache.clone(), wake.clone(), cancel.clone(), queue_workers),
                workloads::run(client.clone(), cache.clone(), queues.clone(), wake.clone(), cancel.clone(), queue_workers),
                namespaces::run(client.clone(), cache.clone(), wake.clone(), cancel.clone(), queue_workers),
                scheduler::driver::run(client, cache, queues, wake, cancel, config),
            );
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    batchq_common::init_logging();

    let args = Args::parse();
    let client = Client::try_default().await?;

    let cache = Cache::new();
    let queues = Arc::new(QueueManager::new());
    let wake = Arc::new(Notify::new());
    let reconcilers = Reconcilers {
        client: client.clone(),
        cache,
        queues,
        wake,
        config: SchedulerConfig {
            wake_interval: args.wake_interval(),
            commit_timeout: args.commit_timeout(),
        },
        queue_workers: args.queue_workers,
    };

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        batchq_common::shutdown::shutdown_signal().await;
        shutdown_signal.cancel();
    });

    tokio::spawn(batchq_common::metrics::run_metrics_server(args.metrics_port));

    // Unique identity per replica (Downward API POD_NAME is ideal);
    // falls back to hostname, then a random id, if neither is set.
    let holder_id = std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("batchq-operator-{}", uuid::Uuid::new_v4()));
    let lease_ttl = Duration::from_secs(15);
    let renew_every = Duration::from_secs(5);
    let leadership = LeaseLock::new(
        client.clone(),
        &args.lease_namespace,
        LeaseLockParams {
            holder_id,
            lease_name: "batchq-operator-lock".to_string(),
            lease_ttl,
        },
    );

    batchq_common::signal_ready();
    println!("{}", "🌱 batchq-operator starting".green());

    // We run indefinitely; only the leader runs the reconcilers and the
    // scheduler. On leadership loss the whole bundle is aborted and we
    // go back to standby rather than leave a half-running cycle behind.
    let mut running: Option<(tokio::task::JoinHandle<()>, CancellationToken)> = None;
    let mut tick = tokio::time::interval(renew_every);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                if let Some((task, cancel)) = running.take() {
                    cancel.cancel();
                    task.await.ok();
                }
                break;
            }
            _ = tick.tick() => {}
        }

        let lease = match leadership.try_acquire_or_renew().await {
            Ok(l) => l,
            Err(e) => {
                eprintln!("leader election renew/acquire failed: {e}");
                if let Some((task, cancel)) = running.take() {
                    cancel.cancel();
                    task.abort();
                }
                continue;
            }
        };

        if matches!(lease, LeaseLockResult::Acquired(_)) {
            if running.is_none() {
                println!("{}", "👑 acquired leadership; starting reconcilers".green());
                let cancel = CancellationToken::new();
                let task = reconcilers.spawn(cancel.clone());
                running = Some((task, cancel));
            }
        } else if let Some((task, cancel)) = running.take() {
            eprintln!("{}", "lost leadership; stopping reconcilers".yellow());
            cancel.cancel();
            task.abort();
        }
    }

    Ok(())
}

use batchq_types::ClusterQueue;
use futures::stream::StreamExt;
use kube::{
    Api, ResourceExt,
    client::Client,
    runtime::{Controller, controller::Action},
};
use owo_colors::OwoColorize;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use super::actions;
use crate::cache::Cache;
use crate::queue::QueueManager;
use crate::util::{
    Error, PROBE_INTERVAL,
    colors::FG1,
    finalizer,
};

/// Entrypoint for the `ClusterQueue` controller.
pub async fn run(
    client: Client,
    cache: Cache,
    queues: Arc<QueueManager>,
    wake: Arc<Notify>,
    cancel: CancellationToken,
    queue_workers: usize,
) {
    println!("{}", "⚙️ Starting ClusterQueue controller...".green());

    let context = Arc::new(ContextData { client: client.clone(), cache, queues, wake });
    let api: Api<ClusterQueue> = Api::all(client);

    let controller = Controller::new(api, Default::default())
        .run(reconcile, on_error, context)
        .for_each_concurrent(queue_workers, |_res| async move {});

    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = controller => {}
    }
}

struct ContextData {
    client: Client,
    cache: Cache,
    queues: Arc<QueueManager>,
    wake: Arc<Notify>,
}

#[derive(Debug, PartialEq, Clone)]
enum ClusterQueueAction {
    /// Deleting, but a Workload is still admitted against it; keep
    /// freezing admission and wait for those to drain.
    Terminating,
    /// Deleting and no Workload references it anymore.
    Finalize,
    Sync,
}

async fn reconcile(instance: Arc<ClusterQueue>, context: Arc<ContextData>) -> Result<Action, Error> {
    let name = instance.name_any();
    let action = determine_action(&context.cache, &name, &instance);

    let result = match action {
        ClusterQueueAction::Terminating => {
            actions::terminating(&context.cache, &instance).await;
            context.wake.notify_one();
            Action::requeue(Duration::from_secs(2))
        }
        ClusterQueueAction::Finalize => {
            actions::finalize(context.client.clone(), &context.cache, &instance, &context.wake).await?;
            Action::await_change()
        }
        ClusterQueueAction::Sync => {
            actions::sync(context.client.clone(), &context.cache, &context.queues, &instance, &context.wake).await?;
            Action::requeue(PROBE_INTERVAL)
        }
    };

    Ok(result)
}

fn determine_action(cache: &Cache, name: &str, instance: &ClusterQueue) -> ClusterQueueAction {
    if finalizer::has_deletion_stamp(instance) {
        if cache.cluster_queue_unreferenced(name) {
            ClusterQueueAction::Finalize
        } else {
            ClusterQueueAction::Terminating
        }
    } else {
        ClusterQueueAction::Sync
    }
}

fn on_error(instance: Arc<ClusterQueue>, error: &Error, _context: Arc<ContextData>) -> Action {
    eprintln!(
        "{}",
        format!("ClusterQueue {} reconciliation error: {:?}", instance.name_any().color(FG1), error).red()
    );
    Action::requeue(Duration::from_secs(5))
}

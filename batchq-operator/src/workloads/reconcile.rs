use batchq_types::Workload;
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
    colors::{FG1, FG2},
    finalizer,
};

/// Entrypoint for the `Workload` controller.
pub async fn run(
    client: Client,
    cache: Cache,
    queues: Arc<QueueManager>,
    wake: Arc<Notify>,
    cancel: CancellationToken,
    queue_workers: usize,
) {
    println!("{}", "⚙️ Starting Workload controller...".green());

    let context = Arc::new(ContextData { client: client.clone(), cache, queues, wake });
    let api: Api<Workload> = Api::all(client);

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
enum WorkloadAction {
    Finalize,
    Finished,
    Sync,
}

async fn reconcile(instance: Arc<Workload>, context: Arc<ContextData>) -> Result<Action, Error> {
    let action = determine_action(&instance);

    let result = match action {
        WorkloadAction::Finalize => {
            actions::finalize(context.client.clone(), &context.cache, &context.queues, &instance, &context.wake).await?;
            Action::await_change()
        }
        WorkloadAction::Finished => {
            actions::finish(&context.cache, &context.queues, &instance).await?;
            context.wake.notify_one();
            Action::requeue(PROBE_INTERVAL)
        }
        WorkloadAction::Sync => {
            actions::sync(context.client.clone(), &context.cache, &context.queues, &instance, &context.wake).await?;
            Action::requeue(PROBE_INTERVAL)
        }
    };

    Ok(result)
}

fn determine_action(instance: &Workload) -> WorkloadAction {
    if finalizer::has_deletion_stamp(instance) {
        WorkloadAction::Finalize
    } else if instance.status.as_ref().is_some_and(|s| s.finished) {
        WorkloadAction::Finished
    } else {
        WorkloadAction::Sync
    }
}

fn on_error(instance: Arc<Workload>, error: &Error, _context: Arc<ContextData>) -> Action {
    eprintln!(
        "{}",
        format!(
            "Workload {}{}{} reconciliation error: {:?}",
            instance.namespace().unwrap_or_default().color(FG2),
            "/".color(FG1),
            instance.name_any().color(FG2),
            error
        )
        .red()
    );
    Action::requeue(Duration::from_secs(5))
}

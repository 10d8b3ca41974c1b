use batchq_types::LocalQueue;
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
use crate::util::{
    Error, PROBE_INTERVAL,
    colors::{FG1, FG2},
    finalizer,
};

/// Entrypoint for the `LocalQueue` controller.
pub async fn run(client: Client, cache: Cache, wake: Arc<Notify>, cancel: CancellationToken, queue_workers: usize) {
    println!("{}", "⚙️ Starting LocalQueue controller...".green());

    let context = Arc::new(ContextData { client: client.clone(), cache, wake });
    let api: Api<LocalQueue> = Api::all(client);

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
    wake: Arc<Notify>,
}

#[derive(Debug, PartialEq, Clone)]
enum LocalQueueAction {
    Terminating,
    Finalize,
    Sync,
}

async fn reconcile(instance: Arc<LocalQueue>, context: Arc<ContextData>) -> Result<Action, Error> {
    let namespace = instance.namespace().ok_or_else(|| {
        Error::UserInput("Expected LocalQueue resource to be namespaced.".to_owned())
    })?;
    let name = instance.name_any();
    let action = determine_action(&context.cache, &namespace, &name, &instance);

    let result = match action {
        LocalQueueAction::Terminating => Action::requeue(Duration::from_secs(2)),
        LocalQueueAction::Finalize => {
            actions::finalize(context.client.clone(), &context.cache, &instance, &context.wake).await?;
            Action::await_change()
        }
        LocalQueueAction::Sync => {
            actions::sync(context.client.clone(), &context.cache, &instance, &context.wake).await?;
            Action::requeue(PROBE_INTERVAL)
        }
    };

    Ok(result)
}

fn determine_action(cache: &Cache, namespace: &str, name: &str, instance: &LocalQueue) -> LocalQueueAction {
    if finalizer::has_deletion_stamp(instance) {
        if cache.local_queue_unreferenced(namespace, name) {
            LocalQueueAction::Finalize
        } else {
            LocalQueueAction::Terminating
        }
    } else {
        LocalQueueAction::Sync
    }
}

fn on_error(instance: Arc<LocalQueue>, error: &Error, _context: Arc<ContextData>) -> Action {
    eprintln!(
        "{}",
        format!(
            "LocalQueue {}{}{} reconciliation error: {:?}",
            instance.namespace().unwrap_or_default().color(FG2),
            "/".color(FG1),
            instance.name_any().color(FG2),
            error
        )
        .red()
    );
    Action::requeue(Duration::from_secs(5))
}

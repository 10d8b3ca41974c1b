use batchq_types::ResourceFlavor;
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
    colors::FG1,
    finalizer,
};

/// Entrypoint for the `ResourceFlavor` controller. Cluster-scoped, so
/// unlike the namespaced reconcilers there is no leader-election dance
/// over a lease namespace here - callers run exactly one of these per
/// operator replica, guarded by the same leadership loop as the others.
pub async fn run(client: Client, cache: Cache, wake: Arc<Notify>, cancel: CancellationToken, queue_workers: usize) {
    println!("{}", "⚙️ Starting ResourceFlavor controller...".green());

    let context = Arc::new(ContextData { client: client.clone(), cache, wake });
    let api: Api<ResourceFlavor> = Api::all(client);

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
enum FlavorAction {
    /// Deletion requested but still named by a live ClusterQueue; wait.
    Terminating,
    /// Deletion requested and no ClusterQueue names it anymore.
    Finalize,
    /// Steady state: mirror the spec into the Cache and hold the finalizer.
    Sync,
}

async fn reconcile(instance: Arc<ResourceFlavor>, context: Arc<ContextData>) -> Result<Action, Error> {
    let name = instance.name_any();
    let action = determine_action(&context.cache, &name, &instance);

    let result = match action {
        FlavorAction::Terminating => Action::requeue(Duration::from_secs(2)),
        FlavorAction::Finalize => {
            actions::finalize(context.client.clone(), &context.cache, &instance, &context.wake).await?;
            Action::await_change()
        }
        FlavorAction::Sync => {
            actions::sync(context.client.clone(), &context.cache, &instance, &context.wake).await?;
            Action::requeue(PROBE_INTERVAL)
        }
    };

    Ok(result)
}

fn determine_action(cache: &Cache, name: &str, instance: &ResourceFlavor) -> FlavorAction {
    if finalizer::has_deletion_stamp(instance) {
        if cache.flavor_unreferenced(name) {
            FlavorAction::Finalize
        } else {
            FlavorAction::Terminating
        }
    } else {
        FlavorAction::Sync
    }
}

fn on_error(instance: Arc<ResourceFlavor>, error: &Error, _context: Arc<ContextData>) -> Action {
    eprintln!(
        "{}",
        format!("ResourceFlavor {} reconciliation error: {:?}", instance.name_any().color(FG1), error).red()
    );
    Action::requeue(Duration::from_secs(5))
}

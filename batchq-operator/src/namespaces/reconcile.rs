//! Mirrors plain Kubernetes `Namespace` labels into the Cache so the
//! scheduler can evaluate each ClusterQueue's `namespaceSelector`
//! against live state (spec.md §4.2 re-enqueue trigger (v): "Namespace
//! labels changing to newly match a selector").
//!
//! Unlike the four batchq.io kinds this isn't CRD-owned, so there is no
//! `resource-in-use` finalizer here: a Namespace can disappear out from
//! under us and the Cache simply drops it.

use futures::stream::StreamExt;
use k8s_openapi::api::core::v1::Namespace;
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

use crate::cache::Cache;
use crate::util::{Error, PROBE_INTERVAL, finalizer};

/// Entrypoint for the `Namespace` mirror.
pub async fn run(client: Client, cache: Cache, wake: Arc<Notify>, cancel: CancellationToken, queue_workers: usize) {
    println!("{}", "⚙️ Starting Namespace mirror...".green());

    let context = Arc::new(ContextData { cache, wake });
    let api: Api<Namespace> = Api::all(client);

    let controller = Controller::new(api, Default::default())
        .run(reconcile, on_error, context)
        .for_each_concurrent(queue_workers, |_res| async move {});

    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = controller => {}
    }
}

struct ContextData {
    cache: Cache,
    wake: Arc<Notify>,
}

async fn reconcile(instance: Arc<Namespace>, context: Arc<ContextData>) -> Result<Action, Error> {
    let name = instance.name_any();
    if finalizer::has_deletion_stamp(&instance) {
        context.cache.delete_namespace(&name);
    } else {
        let labels = instance.labels().clone();
        context.cache.add_namespace(&name, labels);
    }
    context.wake.notify_one();
    Ok(Action::requeue(PROBE_INTERVAL))
}

fn on_error(instance: Arc<Namespace>, error: &Error, _context: Arc<ContextData>) -> Action {
    eprintln!(
        "{}",
        format!("Namespace {} mirror error: {:?}", instance.name_any(), error).red()
    );
    Action::requeue(Duration::from_secs(5))
}

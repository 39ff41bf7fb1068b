use crate::{log_result, metrics::ControllerMetrics, run_until_shutdown, Error, ERROR_REQUEUE};
use acl_controller_k8s_address::{Resolver, Source};
use acl_controller_k8s_api::{AddressRecord, Api, Client, KubeStore, ResourceExt};
use futures::prelude::*;
use kube::runtime::{controller::Action, watcher, Controller};
use std::{sync::Arc, time::Duration};
use tokio::{sync::oneshot, time};

pub(crate) struct Context<T> {
    pub(crate) kind: &'static str,
    pub(crate) resolver: Resolver<KubeStore, T>,
    pub(crate) period: Duration,
    pub(crate) metrics: ControllerMetrics,
}

/// Runs a controller keeping one kind of address record resolved, re-resolving
/// each record every `period`.
pub(crate) async fn run<T: Source>(client: Client, ctx: Arc<Context<T>>, drain: drain::Watch) {
    let kind = ctx.kind;
    let (close_tx, close_rx) = oneshot::channel();
    let controller = Controller::new(
        Api::<T::Record>::all(client),
        watcher::Config::default(),
    )
    .graceful_shutdown_on(close_rx.map(|_| ()))
    .run(reconcile::<T>, error_policy::<T>, ctx)
    .for_each(log_result);

    tracing::info!(%kind, "Watching address records");
    run_until_shutdown(controller, close_tx, drain).await;
}

async fn reconcile<T: Source>(
    record: Arc<T::Record>,
    ctx: Arc<Context<T>>,
) -> Result<Action, Error> {
    let name = record.name_any();
    let start = time::Instant::now();

    let task = tokio::spawn({
        let ctx = ctx.clone();
        async move { ctx.resolver.reconcile(&name).await }
    });
    let resolved = match task.await {
        Ok(res) => res.map_err(Error::from),
        Err(error) => Err(Error::from(error)),
    };

    let result = match &resolved {
        Ok(Some(record)) if record.ready_ips().is_some() => "ready",
        Ok(Some(_)) => "unready",
        Ok(None) => "not_found",
        Err(_) => "error",
    };
    ctx.metrics.observe(ctx.kind, result, start);

    match resolved? {
        Some(_) => Ok(Action::requeue(ctx.period)),
        None => Ok(Action::await_change()),
    }
}

fn error_policy<T: Source>(record: Arc<T::Record>, error: &Error, ctx: Arc<Context<T>>) -> Action {
    tracing::warn!(
        kind = %ctx.kind,
        name = %record.name_any(),
        %error,
        "Failed to resolve address record"
    );
    Action::requeue(ERROR_REQUEUE)
}

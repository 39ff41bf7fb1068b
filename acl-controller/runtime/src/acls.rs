use crate::{log_result, metrics::ControllerMetrics, run_until_shutdown, Error, ERROR_REQUEUE};
use acl_controller_k8s_api::{
    Acl, AclDnsEntry, Api, Client, KubeStore, Resource, ResourceExt, ResourceId,
    RpaasInstanceAddress, TsuruAppAddress,
};
use acl_controller_k8s_policy::{referenced_addresses, AddressRef, Outcome, Reconciler};
use futures::prelude::*;
use kube::runtime::{
    controller::{Action, Config},
    reflector::{self, ObjectRef},
    watcher, Controller,
};
use std::{sync::Arc, time::Duration};
use tokio::{sync::oneshot, time};

const KIND: &str = "ACL";

pub(crate) struct Context {
    pub(crate) reconciler: Reconciler<KubeStore>,
    pub(crate) requeue_after: Duration,
    pub(crate) metrics: ControllerMetrics,
}

/// Runs the ACL controller. ACLs are also reconciled whenever an address
/// record they reference changes.
pub(crate) async fn run(client: Client, ctx: Arc<Context>, concurrency: u16, drain: drain::Watch) {
    let controller = Controller::new(Api::<Acl>::all(client.clone()), watcher::Config::default())
        .with_config(Config::default().concurrency(concurrency));
    let acls = controller.store();

    let (close_tx, close_rx) = oneshot::channel();
    let controller = controller
        .watches(
            Api::<TsuruAppAddress>::all(client.clone()),
            watcher::Config::default(),
            dependents(acls.clone(), AddressRef::TsuruApp),
        )
        .watches(
            Api::<RpaasInstanceAddress>::all(client.clone()),
            watcher::Config::default(),
            dependents(acls.clone(), AddressRef::RpaasInstance),
        )
        .watches(
            Api::<AclDnsEntry>::all(client),
            watcher::Config::default(),
            dependents(acls, AddressRef::DnsEntry),
        )
        .graceful_shutdown_on(close_rx.map(|_| ()))
        .run(reconcile, error_policy, ctx)
        .for_each(log_result);

    tracing::info!("Watching ACLs");
    run_until_shutdown(controller, close_tx, drain).await;
}

async fn reconcile(acl: Arc<Acl>, ctx: Arc<Context>) -> Result<Action, Error> {
    let id = ResourceId::of(acl.as_ref());
    let start = time::Instant::now();

    // Each pass runs on its own task so that a panic fails only that pass.
    let task = tokio::spawn({
        let ctx = ctx.clone();
        async move { ctx.reconciler.reconcile(&id).await }
    });
    let outcome = match task.await {
        Ok(res) => res.map_err(Error::from),
        Err(error) => Err(Error::from(error)),
    };

    let result = match &outcome {
        Ok(Outcome::Ready { .. }) => "ready",
        Ok(Outcome::Unready { .. }) => "unready",
        Ok(Outcome::NotFound) => "not_found",
        Err(_) => "error",
    };
    ctx.metrics.observe(KIND, result, start);

    match outcome? {
        Outcome::NotFound => Ok(Action::await_change()),
        Outcome::Ready { .. } | Outcome::Unready { .. } => Ok(Action::requeue(ctx.requeue_after)),
    }
}

fn error_policy(acl: Arc<Acl>, error: &Error, _: Arc<Context>) -> Action {
    tracing::warn!(
        namespace = ?acl.namespace(),
        name = %acl.name_any(),
        %error,
        "Failed to reconcile ACL"
    );
    Action::requeue(ERROR_REQUEUE)
}

/// Maps an address record to the cached ACLs referencing it.
fn dependents<R: Resource>(
    acls: reflector::Store<Acl>,
    address: fn(String) -> AddressRef,
) -> impl Fn(R) -> Vec<ObjectRef<Acl>> + Send + Sync + 'static {
    move |record| {
        let address = address(record.name_any());
        acls.state()
            .iter()
            .filter(|acl| referenced_addresses(acl).contains(&address))
            .map(|acl| ObjectRef::from_obj(acl.as_ref()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acl_controller_k8s_api::{AclDestination, AclSource, AclSpec, ExternalIp, ObjectMeta};

    fn mk_acl(ns: &str, name: &str, destinations: Vec<AclDestination>) -> Acl {
        Acl {
            metadata: ObjectMeta {
                namespace: Some(ns.to_string()),
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: AclSpec {
                source: AclSource {
                    tsuru_app: Some(name.to_string()),
                    ..Default::default()
                },
                destinations,
            },
            status: None,
        }
    }

    fn record(name: &str) -> TsuruAppAddress {
        TsuruAppAddress::new(
            name,
            acl_controller_k8s_api::address::TsuruAppAddressSpec {
                name: name.to_string(),
            },
        )
    }

    #[test]
    fn address_changes_trigger_referencing_acls() {
        let (acls, mut writer) = reflector::store::<Acl>();
        let to_db = AclDestination {
            tsuru_app: Some("db".to_string()),
            ..Default::default()
        };
        let to_ip = AclDestination {
            external_ip: Some(ExternalIp {
                ip: "10.0.0.5".to_string(),
                ports: vec![],
            }),
            ..Default::default()
        };
        for acl in [
            mk_acl("team-a", "web", vec![to_db.clone()]),
            mk_acl("team-b", "api", vec![to_ip, to_db]),
            mk_acl("team-b", "worker", vec![]),
        ] {
            writer.apply_watcher_event(&watcher::Event::Apply(acl));
        }

        let map = dependents::<TsuruAppAddress>(acls, AddressRef::TsuruApp);
        let mut refs = map(record("db"));
        refs.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(
            refs,
            vec![
                ObjectRef::new("api").within("team-b"),
                ObjectRef::new("web").within("team-a"),
            ]
        );
        assert!(map(record("other")).is_empty());
    }
}

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use acl_controller_core as core;
pub use acl_controller_k8s_address as address;
pub use acl_controller_k8s_api as k8s;
pub use acl_controller_k8s_index as index;
pub use acl_controller_k8s_policy as policy;

mod acls;
mod args;
mod metrics;
mod records;

pub use self::{args::Args, metrics::ControllerMetrics};

use futures::prelude::*;
use kube::runtime::{controller::Action, reflector::ObjectRef};
use std::time::Duration;
use tokio::sync::oneshot;

/// How long a failed reconciliation waits before it is retried.
const ERROR_REQUEUE: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
enum Error {
    #[error(transparent)]
    Policy(#[from] policy::Error),

    #[error(transparent)]
    Address(#[from] address::Error),

    #[error("reconciliation task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Drives a controller until it completes or the runtime begins shutting
/// down, in which case the controller is asked to stop and the shutdown is
/// held until it has.
async fn run_until_shutdown<F>(controller: F, close: oneshot::Sender<()>, drain: drain::Watch)
where
    F: Future<Output = ()>,
{
    tokio::pin!(controller);
    tokio::select! {
        () = &mut controller => {}
        handle = drain.signaled() => {
            let _ = close.send(());
            handle.release_after(controller).await;
        }
    }
}

async fn log_result<K, E>(res: Result<(ObjectRef<K>, Action), E>)
where
    K: kube::Resource<DynamicType = ()>,
    E: std::fmt::Display,
{
    match res {
        Ok((obj, action)) => {
            tracing::trace!(namespace = ?obj.namespace, name = %obj.name, ?action, "Reconciled")
        }
        Err(error) => tracing::debug!(%error, "Controller error"),
    }
}

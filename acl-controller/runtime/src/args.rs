use crate::{
    acls,
    address::{Resolver, Resolvers, Source},
    core::{
        dns::{Resolve, SystemResolver},
        tsuru::TsuruApi,
    },
    index::ServiceCache,
    k8s::{Client, KubeStore},
    metrics::ControllerMetrics,
    policy::Reconciler,
    records,
};
use acl_controller_tsuru::Url;
use anyhow::{bail, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{info_span, Instrument};

const TSURU_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[clap(name = "acl-controller", about = "Materializes ACLs into egress NetworkPolicies")]
pub struct Args {
    #[clap(long, default_value = "acl=info,warn", env = "ACL_CONTROLLER_LOG")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Base URL of the tsuru API.
    #[clap(long, env = "TSURU_HOST")]
    tsuru_host: Url,

    #[clap(long, env = "TSURU_TOKEN", hide_env_values = true)]
    tsuru_token: String,

    #[clap(long, default_value = "4")]
    max_concurrent_reconciles: u16,

    /// How often ready and unready ACLs are reconciled again.
    #[clap(long, default_value = "600")]
    requeue_after_secs: u64,

    /// How often address records are resolved again.
    #[clap(long, default_value = "300")]
    resolve_period_secs: u64,

    #[clap(long, default_value = "60")]
    service_cache_ttl_secs: u64,

    #[clap(long, default_value = "5000")]
    patch_timeout_ms: u64,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            admin,
            tsuru_host,
            tsuru_token,
            max_concurrent_reconciles,
            requeue_after_secs,
            resolve_period_secs,
            service_cache_ttl_secs,
            patch_timeout_ms,
        } = self;

        let mut prom = <Registry>::default();
        let metrics = ControllerMetrics::register(prom.sub_registry_with_prefix("acl_controller"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let client = runtime.client();
        let store = KubeStore::new(client.clone(), Duration::from_millis(patch_timeout_ms));
        let resolver: Arc<dyn Resolve> = Arc::new(SystemResolver::from_system_conf()?);
        let tsuru: Arc<dyn TsuruApi> = Arc::new(acl_controller_tsuru::Client::new(
            tsuru_host,
            tsuru_token,
            TSURU_TIMEOUT,
        )?);
        let resolvers = Resolvers::new(store.clone(), tsuru, resolver);
        let services =
            ServiceCache::new(store.clone(), Duration::from_secs(service_cache_ttl_secs));
        let reconciler = Reconciler::new(store, resolvers.clone(), services);

        // Spawn the address record controllers.
        let resolve_period = Duration::from_secs(resolve_period_secs);
        let drain = runtime.shutdown_handle();
        let Resolvers { apps, rpaas, dns } = resolvers;
        spawn_records(&client, "TsuruAppAddress", apps, resolve_period, &metrics, &drain);
        spawn_records(&client, "RpaasInstanceAddress", rpaas, resolve_period, &metrics, &drain);
        spawn_records(&client, "ACLDNSEntry", dns, resolve_period, &metrics, &drain);

        // Spawn the ACL controller.
        let ctx = Arc::new(acls::Context {
            reconciler,
            requeue_after: Duration::from_secs(requeue_after_secs),
            metrics,
        });
        tokio::spawn(
            acls::run(client, ctx, max_concurrent_reconciles, drain).instrument(info_span!("acls")),
        );

        // Block the main thread on the shutdown signal. Once it fires, wait for the background
        // tasks to complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

fn spawn_records<T: Source>(
    client: &Client,
    kind: &'static str,
    resolver: Resolver<KubeStore, T>,
    period: Duration,
    metrics: &ControllerMetrics,
    drain: &drain::Watch,
) {
    let ctx = Arc::new(records::Context {
        kind,
        resolver,
        period,
        metrics: metrics.clone(),
    });
    tokio::spawn(
        records::run(client.clone(), ctx, drain.clone()).instrument(info_span!("records", %kind)),
    );
}

use crate::egress::{self, DestinationError};
use acl_controller_core::tsuru;
use acl_controller_k8s_address::{self as address, Resolvers};
use acl_controller_k8s_api::{
    labels, store, Acl, AclDestination, AclStatus, AddressRecord, Destination, NetworkPolicy,
    NetworkPolicyEgressRule as Rule, NetworkPolicySpec, ObjectMeta, OwnerReference, Resource,
    ResourceExt, ResourceId, Store,
};
use acl_controller_k8s_index::ServiceCache;

const EGRESS: &str = "Egress";

const NO_POD_SELECTOR: &str = "No podSelector generated by spec.source";
const NO_EGRESS: &str = "No egress generated by spec.destinations";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] store::Error),

    #[error(transparent)]
    Tsuru(#[from] tsuru::Error),

    #[error("ACL {0} has no uid")]
    MissingUid(ResourceId),
}

/// The result of a successful reconciliation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The NetworkPolicy matches the ACL. `written` is set when it had to be
    /// created or updated.
    Ready {
        network_policy: String,
        written: bool,
    },

    /// The ACL could not be materialized. The reason is recorded in its status.
    Unready { reason: String },

    /// The ACL no longer exists.
    NotFound,
}

/// Materializes ACLs into NetworkPolicies.
pub struct Reconciler<S> {
    store: S,
    resolvers: Resolvers<S>,
    services: ServiceCache<S>,
}

enum Failure {
    Unready(String),
    Error(Error),
}

// === impl Reconciler ===

impl<S: Store> Reconciler<S> {
    pub fn new(store: S, resolvers: Resolvers<S>, services: ServiceCache<S>) -> Self {
        Self {
            store,
            resolvers,
            services,
        }
    }

    pub fn resolvers(&self) -> &Resolvers<S> {
        &self.resolvers
    }

    #[tracing::instrument(skip(self, id), fields(namespace = ?id.namespace, name = %id.name))]
    pub async fn reconcile(&self, id: &ResourceId) -> Result<Outcome, Error> {
        let Some(acl) = self.store.get::<Acl>(id).await? else {
            tracing::debug!("ACL not found");
            return Ok(Outcome::NotFound);
        };

        match self.egress(&acl).await {
            Ok((selector, rules)) => self.apply(&acl, selector, rules).await,
            Err(Failure::Error(error)) => Err(error),
            Err(Failure::Unready(reason)) => {
                tracing::info!(%reason, "ACL is not ready");
                let status = AclStatus {
                    ready: false,
                    reason: reason.clone(),
                    network_policy: acl
                        .status
                        .as_ref()
                        .map(|s| s.network_policy.clone())
                        .unwrap_or_default(),
                };
                self.update_status(&acl, status).await?;
                Ok(Outcome::Unready { reason })
            }
        }
    }

    /// Computes the pod selector and the egress rules an ACL grants.
    async fn egress(&self, acl: &Acl) -> Result<(labels::Map, Vec<Rule>), Failure> {
        let selector =
            source_selector(acl).ok_or_else(|| Failure::Unready(NO_POD_SELECTOR.into()))?;

        let mut rules = Vec::new();
        for dst in &acl.spec.destinations {
            match self.destination_rules(dst).await {
                Ok(dst_rules) => rules.extend(dst_rules),
                Err(DestinationError::Address(address::Error::Store(error))) => {
                    return Err(Failure::Error(error.into()));
                }
                // Only a missing app or instance is the ACL's fault.
                Err(DestinationError::Address(address::Error::Tsuru(error)))
                    if !matches!(error, tsuru::Error::NotFound { .. }) =>
                {
                    return Err(Failure::Error(error.into()));
                }
                Err(error) => {
                    let json = serde_json::to_string(dst).unwrap_or_default();
                    tracing::warn!(
                        %error,
                        destination = %json,
                        "Could not generate egress rule for destination"
                    );
                    return Err(Failure::Unready(format!(
                        "could not generate egress rule for destination {json}, err: {error}"
                    )));
                }
            }
        }

        if let Err(error) = self.enrich(&mut rules).await {
            tracing::warn!(%error, "Could not generate egress rule based on kubernetes selector");
            return Err(Failure::Unready(format!(
                "could not generate egress rule based on kubernetes selector, err: {error}"
            )));
        }

        if rules.is_empty() {
            return Err(Failure::Unready(NO_EGRESS.into()));
        }
        Ok((selector, rules))
    }

    async fn destination_rules(&self, dst: &AclDestination) -> Result<Vec<Rule>, DestinationError> {
        let Some(target) = dst.target() else {
            return Ok(vec![]);
        };

        match target {
            Destination::TsuruApp(app) => {
                let record = self.resolvers.apps.ensure(app).await?;
                with_resolved(egress::to_pods(labels::tsuru_app(app)), &record)
            }

            Destination::TsuruAppPool(pool) => {
                Ok(vec![egress::to_pods(labels::tsuru_app_pool(pool))])
            }

            Destination::ExternalDns(dns) => {
                if dns.is_wildcard() {
                    tracing::debug!(host = %dns.name, "Skipping wildcard host");
                    return Ok(vec![]);
                }
                let entry = self.resolvers.dns.ensure(&dns.name).await?;
                let Some(ips) = entry.ready_ips() else {
                    tracing::info!(host = %dns.name, "Host has not been resolved yet");
                    return Ok(vec![]);
                };
                Ok(egress::to_hosts(ips, &dns.ports).into_iter().collect())
            }

            Destination::ExternalIp(ip) => Ok(vec![egress::to_network(&ip.ip, &ip.ports)?]),

            Destination::RpaasInstance(instance) => {
                let record = self.resolvers.rpaas.ensure(instance).await?;
                let pods = labels::rpaas_instance(&instance.service_name, &instance.instance);
                with_resolved(egress::to_pods(pods), &record)
            }
        }
    }

    /// Adds a selector peer for every single-host IP block owned by a service.
    async fn enrich(&self, rules: &mut [Rule]) -> Result<(), acl_controller_k8s_index::Error> {
        for rule in rules.iter_mut() {
            let Some(peers) = rule.to.as_mut() else {
                continue;
            };
            let mut owned = Vec::new();
            for peer in peers.iter() {
                let Some(ip) = egress::peer_host(peer) else {
                    continue;
                };
                if let Some(owner) = self.services.by_ip(ip).await? {
                    tracing::debug!(
                        %ip,
                        service = %owner.name,
                        namespace = %owner.namespace,
                        "Address is owned by a service"
                    );
                    owned.push(egress::to_service_pods(owner.selector, &owner.namespace));
                }
            }
            peers.extend(owned);
        }
        Ok(())
    }

    async fn apply(
        &self,
        acl: &Acl,
        selector: labels::Map,
        rules: Vec<Rule>,
    ) -> Result<Outcome, Error> {
        let acl_id = ResourceId::of(acl);
        let owner = acl
            .controller_owner_ref(&())
            .ok_or_else(|| Error::MissingUid(acl_id.clone()))?;
        let name = policy_name(acl);
        let id = acl_id.sibling(name.as_str());

        let written = match self.store.get::<NetworkPolicy>(&id).await? {
            None => {
                let policy = NetworkPolicy {
                    metadata: ObjectMeta {
                        namespace: id.namespace.clone(),
                        name: Some(name.clone()),
                        owner_references: Some(vec![owner]),
                        ..Default::default()
                    },
                    spec: Some(NetworkPolicySpec {
                        pod_selector: labels::selector(selector),
                        policy_types: Some(vec![EGRESS.to_string()]),
                        egress: Some(rules),
                        ingress: None,
                    }),
                };
                self.store.create(&policy).await?;
                tracing::info!(networkpolicy = %name, "Created NetworkPolicy");
                true
            }

            Some(mut policy) => {
                if update(&mut policy, owner, selector, rules) {
                    self.store.replace(&policy).await?;
                    tracing::info!(networkpolicy = %name, "Updated NetworkPolicy");
                    true
                } else {
                    tracing::debug!(networkpolicy = %name, "NetworkPolicy is up to date");
                    false
                }
            }
        };

        let status = AclStatus {
            ready: true,
            reason: String::new(),
            network_policy: name.clone(),
        };
        self.update_status(acl, status).await?;
        Ok(Outcome::Ready {
            network_policy: name,
            written,
        })
    }

    async fn update_status(&self, acl: &Acl, status: AclStatus) -> Result<(), Error> {
        if acl.status.as_ref() == Some(&status) {
            return Ok(());
        }
        tracing::debug!(ready = status.ready, "Updating ACL status");
        self.store.patch_status(acl, &status).await?;
        Ok(())
    }
}

/// Brings an existing policy in line with the desired fields, returning
/// whether anything changed. Egress rules compare in order.
fn update(
    policy: &mut NetworkPolicy,
    owner: OwnerReference,
    selector: labels::Map,
    rules: Vec<Rule>,
) -> bool {
    let mut changed = false;

    let refs = policy
        .metadata
        .owner_references
        .get_or_insert_with(Vec::new);
    if !refs.iter().any(|r| r.uid == owner.uid) {
        let mut owner = owner;
        if refs.iter().any(|r| r.controller == Some(true)) {
            owner.controller = None;
        }
        refs.push(owner);
        changed = true;
    }

    let spec = policy.spec.get_or_insert_with(Default::default);
    let policy_types = Some(vec![EGRESS.to_string()]);
    if spec.policy_types != policy_types {
        spec.policy_types = policy_types;
        changed = true;
    }

    if labels::match_labels(Some(&spec.pod_selector)) != selector {
        spec.pod_selector = labels::selector(selector);
        changed = true;
    }

    let egress = Some(rules);
    if spec.egress != egress {
        spec.egress = egress;
        changed = true;
    }

    changed
}

fn source_selector(acl: &Acl) -> Option<labels::Map> {
    let source = &acl.spec.source;
    if let Some(app) = source.tsuru_app() {
        return Some(labels::tsuru_app(app));
    }
    source
        .rpaas_instance
        .as_ref()
        .map(|i| labels::rpaas_instance(&i.service_name, &i.instance))
}

/// The NetworkPolicy recorded in the ACL's status, or the default name.
pub fn policy_name(acl: &Acl) -> String {
    acl.status
        .as_ref()
        .map(|s| s.network_policy.as_str())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("acl-{}", acl.name_any()))
}

fn with_resolved<R: AddressRecord>(pods: Rule, record: &R) -> Result<Vec<Rule>, DestinationError> {
    let (resolved, errors) = egress::to_resolved(record.ready_ips().unwrap_or_default());
    if !errors.is_empty() {
        return Err(DestinationError::Multiple(errors));
    }
    Ok(std::iter::once(pods).chain(resolved).collect())
}

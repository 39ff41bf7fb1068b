//! Typed access to the API server, abstracted so reconcilers can be exercised
//! against an in-memory store.

use crate::ResourceId;
use acl_controller_core::ACL_CONTROLLER_NAME;
use kube::{
    api::{Api, ListParams, Patch, PatchParams, PostParams},
    Client, Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use std::{fmt::Debug, future::Future, time::Duration};
use tokio::time;

#[cfg(any(test, feature = "test-util"))]
mod memory;

#[cfg(any(test, feature = "test-util"))]
pub use self::memory::MemoryStore;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{kind} {id} not found")]
    NotFound { kind: String, id: ResourceId },

    #[error("{kind} {id} already exists")]
    AlreadyExists { kind: String, id: ResourceId },

    #[error("{kind} {id} was modified concurrently")]
    Conflict { kind: String, id: ResourceId },

    #[error("{kind} {id} request timed out after {timeout:?}")]
    Timeout {
        kind: String,
        id: ResourceId,
        timeout: Duration,
    },

    #[error("failed to encode {kind} {id}: {source}")]
    Encode {
        kind: String,
        id: ResourceId,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Kube(#[from] kube::Error),
}

/// A resource type the controller reads or writes.
pub trait Object:
    Resource<DynamicType = ()>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Builds an API handle scoped to `namespace`, or to the whole cluster.
    fn api(client: Client, namespace: Option<&str>) -> Api<Self>;
}

#[async_trait::async_trait]
pub trait Store: Clone + Send + Sync + 'static {
    async fn get<K: Object>(&self, id: &ResourceId) -> Result<Option<K>>;

    async fn list<K: Object>(&self) -> Result<Vec<K>>;

    async fn create<K: Object>(&self, obj: &K) -> Result<K>;

    /// Replaces `obj`, failing with [`Error::Conflict`] if its
    /// `resourceVersion` is stale.
    async fn replace<K: Object>(&self, obj: &K) -> Result<K>;

    /// Merge-patches the status of `obj`, conditioned on its
    /// `resourceVersion`.
    async fn patch_status<K, S>(&self, obj: &K, status: &S) -> Result<K>
    where
        K: Object,
        S: Serialize + Send + Sync;
}

#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    timeout: Duration,
}

macro_rules! namespaced {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl Object for $ty {
                fn api(client: Client, namespace: Option<&str>) -> Api<Self> {
                    match namespace {
                        Some(ns) => Api::namespaced(client, ns),
                        None => Api::all(client),
                    }
                }
            }
        )+
    };
}

macro_rules! cluster {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl Object for $ty {
                fn api(client: Client, _: Option<&str>) -> Api<Self> {
                    Api::all(client)
                }
            }
        )+
    };
}

namespaced!(crate::Acl, crate::NetworkPolicy, crate::Service);
cluster!(
    crate::AclDnsEntry,
    crate::TsuruAppAddress,
    crate::RpaasInstanceAddress,
);

// === impl Error ===

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    fn from_kube<K: Object>(error: kube::Error, id: &ResourceId) -> Self {
        let kind = K::kind(&()).to_string();
        let id = id.clone();
        match error {
            kube::Error::Api(ref rsp) if rsp.code == 404 => Self::NotFound { kind, id },
            kube::Error::Api(ref rsp) if rsp.code == 409 && rsp.reason == "AlreadyExists" => {
                Self::AlreadyExists { kind, id }
            }
            kube::Error::Api(ref rsp) if rsp.code == 409 => Self::Conflict { kind, id },
            error => Self::Kube(error),
        }
    }
}

// === impl KubeStore ===

impl KubeStore {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    fn api<K: Object>(&self, id: &ResourceId) -> Api<K> {
        K::api(self.client.clone(), id.namespace.as_deref())
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(ACL_CONTROLLER_NAME.to_string()),
            ..Default::default()
        }
    }

    /// Bounds a write by the configured timeout, classifying its failure.
    async fn write<K, F>(&self, id: &ResourceId, write: F) -> Result<K>
    where
        K: Object,
        F: Future<Output = kube::Result<K>> + Send,
    {
        match time::timeout(self.timeout, write).await {
            Ok(Ok(obj)) => Ok(obj),
            Ok(Err(error)) => Err(Error::from_kube::<K>(error, id)),
            Err(_) => Err(Error::Timeout {
                kind: K::kind(&()).to_string(),
                id: id.clone(),
                timeout: self.timeout,
            }),
        }
    }
}

#[async_trait::async_trait]
impl Store for KubeStore {
    async fn get<K: Object>(&self, id: &ResourceId) -> Result<Option<K>> {
        let obj = self.api::<K>(id).get_opt(&id.name).await?;
        Ok(obj)
    }

    async fn list<K: Object>(&self) -> Result<Vec<K>> {
        let list = K::api(self.client.clone(), None)
            .list(&ListParams::default())
            .await?;
        Ok(list.items)
    }

    async fn create<K: Object>(&self, obj: &K) -> Result<K> {
        let id = ResourceId::of(obj);
        let api = self.api::<K>(&id);
        let params = Self::post_params();
        tracing::debug!(kind = %K::kind(&()), %id, "Creating");
        self.write(&id, api.create(&params, obj)).await
    }

    async fn replace<K: Object>(&self, obj: &K) -> Result<K> {
        let id = ResourceId::of(obj);
        let api = self.api::<K>(&id);
        let params = Self::post_params();
        tracing::debug!(kind = %K::kind(&()), %id, "Replacing");
        self.write(&id, api.replace(&id.name, &params, obj)).await
    }

    async fn patch_status<K, S>(&self, obj: &K, status: &S) -> Result<K>
    where
        K: Object,
        S: Serialize + Send + Sync,
    {
        let id = ResourceId::of(obj);
        let patch = status_patch(obj, status)?;
        let api = self.api::<K>(&id);
        let params = PatchParams {
            field_manager: Some(ACL_CONTROLLER_NAME.to_string()),
            ..Default::default()
        };
        tracing::debug!(kind = %K::kind(&()), %id, "Patching status");
        self.write(&id, api.patch_status(&id.name, &params, &Patch::Merge(&patch)))
            .await
    }
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// A merge patch replacing `status`, rejected by the server if `obj` has been
/// modified since it was read.
fn status_patch<K: Object, S: Serialize>(obj: &K, status: &S) -> Result<serde_json::Value> {
    let status = serde_json::to_value(status).map_err(|source| Error::Encode {
        kind: K::kind(&()).to_string(),
        id: ResourceId::of(obj),
        source,
    })?;
    Ok(serde_json::json!({
        "metadata": { "resourceVersion": obj.resource_version() },
        "status": status,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AclDnsEntry, ResourceAddressStatus};

    #[test]
    fn status_patches_carry_the_resource_version() {
        let mut entry = AclDnsEntry::new(
            "example.com",
            crate::address::AclDnsEntrySpec {
                host: "example.com".to_string(),
            },
        );
        entry.metadata.resource_version = Some("42".to_string());
        let status = ResourceAddressStatus {
            ready: true,
            ips: vec!["192.0.2.1".to_string()],
            updated_at: Some("2024-01-01T00:00:00Z".to_string()),
        };
        assert_eq!(
            status_patch(&entry, &status).unwrap(),
            serde_json::json!({
                "metadata": {"resourceVersion": "42"},
                "status": {
                    "ready": true,
                    "ips": ["192.0.2.1"],
                    "updatedAt": "2024-01-01T00:00:00Z",
                },
            })
        );
    }
}

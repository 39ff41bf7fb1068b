use crate::Error;
use acl_controller_k8s_api::{
    store, AddressRecord, Resource, ResourceAddressStatus, ResourceId, Store,
};
use chrono::{SecondsFormat, Utc};
use std::{borrow::Cow, collections::BTreeSet};

/// Resolves one class of destination.
#[async_trait::async_trait]
pub trait Source: Clone + Send + Sync + 'static {
    type Record: AddressRecord;
    type Key: ?Sized + Send + Sync;

    /// The string a record's name is derived from.
    fn key(key: &Self::Key) -> String;

    fn record(name: &str, key: &Self::Key) -> Self::Record;

    /// Resolves the record's destination into a set of textual IPs. `None`
    /// leaves the record's status untouched.
    async fn resolve(&self, record: &Self::Record) -> Result<Option<BTreeSet<String>>, Error>;
}

/// Maintains the address records of a single [`Source`].
#[derive(Clone)]
pub struct Resolver<S, T> {
    store: S,
    source: T,
}

// === impl Resolver ===

impl<S: Store, T: Source> Resolver<S, T> {
    pub fn new(store: S, source: T) -> Self {
        Self { store, source }
    }

    /// The name of the record holding `key`'s addresses.
    pub fn name(key: &T::Key) -> String {
        acl_controller_core::name(&T::key(key))
    }

    /// Re-resolves the named record, returning `None` if it no longer exists.
    #[tracing::instrument(skip(self), fields(kind = %record_kind::<T::Record>()))]
    pub async fn reconcile(&self, name: &str) -> Result<Option<T::Record>, Error> {
        let id = ResourceId::cluster(name);
        let Some(record) = self.store.get::<T::Record>(&id).await? else {
            tracing::debug!("Record not found");
            return Ok(None);
        };
        self.resolve(record).await.map(Some)
    }

    /// Returns the record for `key`, creating and resolving it first if it
    /// does not exist yet.
    pub async fn ensure(&self, key: &T::Key) -> Result<T::Record, Error> {
        let name = Self::name(key);
        let id = ResourceId::cluster(name.as_str());
        if let Some(record) = self.store.get::<T::Record>(&id).await? {
            return Ok(record);
        }

        let created = match self.store.create(&T::record(&name, key)).await {
            Ok(created) => created,
            Err(store::Error::AlreadyExists { kind, id }) => {
                tracing::debug!(%kind, %id, "Record created concurrently");
                return self
                    .store
                    .get::<T::Record>(&id)
                    .await?
                    .ok_or_else(|| store::Error::NotFound { kind, id }.into());
            }
            Err(error) => return Err(error.into()),
        };
        tracing::info!(kind = %record_kind::<T::Record>(), %name, "Created address record");
        self.resolve(created).await
    }

    async fn resolve(&self, record: T::Record) -> Result<T::Record, Error> {
        let Some(ips) = self.source.resolve(&record).await? else {
            return Ok(record);
        };
        let ips = ips.into_iter().collect::<Vec<_>>();
        if let Some(status) = record.address_status() {
            if status.ready && status.ips == ips {
                tracing::debug!(?ips, "Addresses unchanged");
                return Ok(record);
            }
        }

        tracing::info!(?ips, "Addresses changed");
        let status = ResourceAddressStatus {
            ready: true,
            ips,
            updated_at: Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
        };
        let record = self.store.patch_status(&record, &status).await?;
        Ok(record)
    }
}

fn record_kind<K: Resource<DynamicType = ()>>() -> Cow<'static, str> {
    K::kind(&())
}

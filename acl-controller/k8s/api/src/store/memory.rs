use super::{Error, Object, Result, Store};
use crate::ResourceId;
use kube::{Resource, ResourceExt};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

/// Holds objects in memory, mimicking the API server's versioning and status
/// subresource semantics closely enough to test reconcilers.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(Arc<Mutex<State>>);

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<Key, Value>,
    version: u64,
    unavailable: bool,
    unavailable_kinds: BTreeSet<String>,
    writes: BTreeMap<String, usize>,
    status_writes: BTreeMap<String, usize>,
}

type Key = (String, Option<String>, String);

// === impl MemoryStore ===

impl MemoryStore {
    /// Stores `obj` as-is, status included, without counting a write.
    pub fn seed<K: Object>(&self, obj: &K) -> K {
        let mut state = self.0.lock();
        let version = state.next_version();
        let mut value = serde_json::to_value(obj).expect("objects must encode");
        set_meta(&mut value, "uid", &format!("uid-{version}"));
        set_meta(&mut value, "resourceVersion", &version.to_string());
        state.objects.insert(key::<K>(&ResourceId::of(obj)), value.clone());
        serde_json::from_value(value).expect("objects must decode")
    }

    /// Makes every request time out.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.0.lock().unavailable = unavailable;
    }

    /// Makes requests for `K` time out.
    pub fn set_unavailable_for<K: Object>(&self, unavailable: bool) {
        let kind = K::kind(&()).to_string();
        let mut state = self.0.lock();
        if unavailable {
            state.unavailable_kinds.insert(kind);
        } else {
            state.unavailable_kinds.remove(&kind);
        }
    }

    /// Counts creates and replaces of `K`.
    pub fn writes<K: Object>(&self) -> usize {
        let kind = K::kind(&()).to_string();
        self.0.lock().writes.get(&kind).copied().unwrap_or(0)
    }

    /// Counts status patches of `K`.
    pub fn status_writes<K: Object>(&self) -> usize {
        let kind = K::kind(&()).to_string();
        self.0.lock().status_writes.get(&kind).copied().unwrap_or(0)
    }

    /// Reads `K` synchronously.
    pub fn read<K: Object>(&self, id: &ResourceId) -> Option<K> {
        let state = self.0.lock();
        let value = state.objects.get(&key::<K>(id))?;
        Some(serde_json::from_value(value.clone()).expect("objects must decode"))
    }

    pub fn remove<K: Object>(&self, id: &ResourceId) -> Option<K> {
        let value = self.0.lock().objects.remove(&key::<K>(id))?;
        Some(serde_json::from_value(value).expect("objects must decode"))
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn get<K: Object>(&self, id: &ResourceId) -> Result<Option<K>> {
        self.0.lock().check_available::<K>(id)?;
        Ok(self.read(id))
    }

    async fn list<K: Object>(&self) -> Result<Vec<K>> {
        let kind = K::kind(&()).to_string();
        let state = self.0.lock();
        state.check_available::<K>(&ResourceId::cluster(""))?;
        let objs = state
            .objects
            .iter()
            .filter(|((k, _, _), _)| *k == kind)
            .map(|(_, value)| serde_json::from_value(value.clone()).expect("objects must decode"))
            .collect();
        Ok(objs)
    }

    async fn create<K: Object>(&self, obj: &K) -> Result<K> {
        let id = ResourceId::of(obj);
        let key = key::<K>(&id);
        let mut state = self.0.lock();
        state.check_available::<K>(&id)?;
        if state.objects.contains_key(&key) {
            return Err(Error::AlreadyExists {
                kind: K::kind(&()).to_string(),
                id,
            });
        }

        let mut value = encode(obj, &id)?;
        if let Some(obj) = value.as_object_mut() {
            obj.remove("status");
        }
        let version = state.next_version();
        set_meta(&mut value, "uid", &format!("uid-{version}"));
        set_meta(&mut value, "resourceVersion", &version.to_string());
        state.count_write(&key.0);
        state.objects.insert(key, value.clone());
        Ok(serde_json::from_value(value).expect("objects must decode"))
    }

    async fn replace<K: Object>(&self, obj: &K) -> Result<K> {
        let id = ResourceId::of(obj);
        let key = key::<K>(&id);
        let mut state = self.0.lock();
        state.check_available::<K>(&id)?;
        let Some(current) = state.objects.get(&key).cloned() else {
            return Err(Error::NotFound {
                kind: K::kind(&()).to_string(),
                id,
            });
        };
        if let Some(rv) = obj.resource_version() {
            if Some(rv.as_str()) != current["metadata"]["resourceVersion"].as_str() {
                return Err(Error::Conflict {
                    kind: K::kind(&()).to_string(),
                    id,
                });
            }
        }

        let mut value = encode(obj, &id)?;
        if let Some(fields) = value.as_object_mut() {
            match current.get("status") {
                Some(status) => fields.insert("status".to_string(), status.clone()),
                None => fields.remove("status"),
            };
        }
        if let Some(uid) = current["metadata"]["uid"].as_str() {
            set_meta(&mut value, "uid", uid);
        }
        let version = state.next_version();
        set_meta(&mut value, "resourceVersion", &version.to_string());
        state.count_write(&key.0);
        state.objects.insert(key, value.clone());
        Ok(serde_json::from_value(value).expect("objects must decode"))
    }

    async fn patch_status<K, S>(&self, obj: &K, status: &S) -> Result<K>
    where
        K: Object,
        S: Serialize + Send + Sync,
    {
        let id = ResourceId::of(obj);
        let key = key::<K>(&id);
        let patch = super::status_patch(obj, status)?;
        let mut state = self.0.lock();
        state.check_available::<K>(&id)?;
        let Some(mut value) = state.objects.get(&key).cloned() else {
            return Err(Error::NotFound {
                kind: K::kind(&()).to_string(),
                id,
            });
        };
        if let Some(rv) = patch["metadata"]["resourceVersion"].as_str() {
            if Some(rv) != value["metadata"]["resourceVersion"].as_str() {
                return Err(Error::Conflict {
                    kind: K::kind(&()).to_string(),
                    id,
                });
            }
        }

        if let Some(fields) = value.as_object_mut() {
            let status = fields.entry("status").or_insert(Value::Null);
            merge(status, &patch["status"]);
        }
        let version = state.next_version();
        set_meta(&mut value, "resourceVersion", &version.to_string());
        *state.status_writes.entry(key.0.clone()).or_default() += 1;
        state.objects.insert(key, value.clone());
        Ok(serde_json::from_value(value).expect("objects must decode"))
    }
}

// === impl State ===

impl State {
    fn next_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    fn check_available<K: Object>(&self, id: &ResourceId) -> Result<()> {
        let kind = K::kind(&());
        if self.unavailable || self.unavailable_kinds.contains(kind.as_ref()) {
            return Err(Error::Timeout {
                kind: kind.to_string(),
                id: id.clone(),
                timeout: std::time::Duration::ZERO,
            });
        }
        Ok(())
    }

    fn count_write(&mut self, kind: &str) {
        *self.writes.entry(kind.to_string()).or_default() += 1;
    }
}

fn key<K: Resource<DynamicType = ()>>(id: &ResourceId) -> Key {
    (
        K::kind(&()).to_string(),
        id.namespace.clone(),
        id.name.clone(),
    )
}

fn encode<K: Object>(obj: &K, id: &ResourceId) -> Result<Value> {
    serde_json::to_value(obj).map_err(|source| Error::Encode {
        kind: K::kind(&()).to_string(),
        id: id.clone(),
        source,
    })
}

fn set_meta(value: &mut Value, field: &str, v: &str) {
    if let Some(fields) = value.as_object_mut() {
        let meta = fields
            .entry("metadata")
            .or_insert_with(|| Value::Object(Default::default()));
        if let Some(meta) = meta.as_object_mut() {
            meta.insert(field.to_string(), Value::String(v.to_string()));
        }
    }
}

/// Applies a JSON merge patch (RFC 7386).
fn merge(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Default::default());
    }
    if let Value::Object(target) = target {
        for (k, v) in patch {
            if v.is_null() {
                target.remove(k);
            } else {
                merge(target.entry(k.as_str()).or_insert(Value::Null), v);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        address::AclDnsEntrySpec, AclDnsEntry, NetworkPolicy, ObjectMeta, ResourceAddressStatus,
    };

    fn entry(host: &str) -> AclDnsEntry {
        AclDnsEntry::new(
            host,
            AclDnsEntrySpec {
                host: host.to_string(),
            },
        )
    }

    fn ready(ips: &[&str]) -> ResourceAddressStatus {
        ResourceAddressStatus {
            ready: true,
            ips: ips.iter().map(|ip| ip.to_string()).collect(),
            updated_at: Some("2024-01-01T00:00:00Z".to_string()),
        }
    }

    #[tokio::test]
    async fn creates_assign_identity_and_drop_status() {
        let store = MemoryStore::default();
        let mut obj = entry("example.com");
        obj.status = Some(ready(&["192.0.2.1"]));

        let created = store.create(&obj).await.unwrap();
        assert!(created.metadata.uid.is_some());
        assert!(created.resource_version().is_some());
        assert_eq!(created.status, None);
        assert_eq!(store.writes::<AclDnsEntry>(), 1);

        let error = store.create(&obj).await.unwrap_err();
        assert!(matches!(error, Error::AlreadyExists { .. }), "{error}");
    }

    #[tokio::test]
    async fn stale_writes_conflict() {
        let store = MemoryStore::default();
        let created = store.create(&entry("example.com")).await.unwrap();
        let patched = store
            .patch_status(&created, &ready(&["192.0.2.1"]))
            .await
            .unwrap();
        assert_eq!(patched.status, Some(ready(&["192.0.2.1"])));

        let error = store
            .patch_status(&created, &ready(&["192.0.2.2"]))
            .await
            .unwrap_err();
        assert!(error.is_conflict(), "{error}");

        let error = store.replace(&created).await.unwrap_err();
        assert!(error.is_conflict(), "{error}");
        assert_eq!(store.status_writes::<AclDnsEntry>(), 1);
    }

    #[tokio::test]
    async fn replaces_preserve_status() {
        let store = MemoryStore::default();
        let created = store.create(&entry("example.com")).await.unwrap();
        let patched = store
            .patch_status(&created, &ready(&["192.0.2.1"]))
            .await
            .unwrap();

        let mut updated = patched.clone();
        updated.spec.host = "example.org".to_string();
        updated.status = None;
        let replaced = store.replace(&updated).await.unwrap();
        assert_eq!(replaced.spec.host, "example.org");
        assert_eq!(replaced.status, Some(ready(&["192.0.2.1"])));
        assert_eq!(replaced.metadata.uid, created.metadata.uid);
    }

    #[tokio::test]
    async fn lists_by_kind() {
        let store = MemoryStore::default();
        store.seed(&entry("a.example.com"));
        store.seed(&entry("b.example.com"));
        store.seed(&NetworkPolicy {
            metadata: ObjectMeta {
                namespace: Some("ns".to_string()),
                name: Some("acl-a".to_string()),
                ..Default::default()
            },
            ..Default::default()
        });

        let entries = store.list::<AclDnsEntry>().await.unwrap();
        assert_eq!(entries.len(), 2);
        let missing = store
            .get::<NetworkPolicy>(&ResourceId::namespaced("other", "acl-a"))
            .await
            .unwrap();
        assert!(missing.is_none());
        assert_eq!(store.writes::<AclDnsEntry>(), 0);
    }

    #[tokio::test]
    async fn outages_can_target_one_kind() {
        let store = MemoryStore::default();
        store.seed(&entry("example.com"));
        store.set_unavailable_for::<NetworkPolicy>(true);

        let error = store.list::<NetworkPolicy>().await.unwrap_err();
        assert!(matches!(error, Error::Timeout { .. }), "{error}");
        assert_eq!(store.list::<AclDnsEntry>().await.unwrap().len(), 1);

        store.set_unavailable_for::<NetworkPolicy>(false);
        assert!(store.list::<NetworkPolicy>().await.unwrap().is_empty());
    }

    #[test]
    fn merge_patch() {
        let mut target = serde_json::json!({"a": 1, "b": {"c": 2, "d": 3}});
        merge(
            &mut target,
            &serde_json::json!({"a": null, "b": {"c": 4}, "e": [1]}),
        );
        assert_eq!(target, serde_json::json!({"b": {"c": 4, "d": 3}, "e": [1]}));
    }
}

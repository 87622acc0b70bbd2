//! In-memory [`ObjectStore`] that mimics the API server's optimistic concurrency.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use stackable_operator::kube::{runtime::reflector::ObjectRef, Resource, ResourceExt};

use super::{object_ref, Error, Object, ObjectStore, Result, Verb};

type Key = (String, Option<String>, String);

#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<Key, serde_json::Value>>,
    resource_version: AtomicU64,
    writes: AtomicUsize,
    failures: Mutex<Vec<(Verb, String)>>,
}

fn key<K: Object>(name: &str, namespace: Option<&str>) -> Key {
    (
        format!("{}/{}", K::api_version(&()), K::kind(&())),
        namespace.map(str::to_string),
        name.to_string(),
    )
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an object without counting it as a write.
    pub fn insert<K: Object>(&self, mut obj: K) -> K {
        let meta = obj.meta_mut();
        let version = self.next_resource_version();
        meta.resource_version = Some(version.clone());
        meta.uid.get_or_insert_with(|| format!("uid-{version}"));
        let key = key::<K>(&obj.name_any(), obj.namespace().as_deref());
        self.objects
            .lock()
            .unwrap()
            .insert(key, serde_json::to_value(&obj).unwrap());
        obj
    }

    /// Reads an object without going through the [`ObjectStore`] interface.
    pub fn peek<K: Object>(&self, name: &str, namespace: Option<&str>) -> Option<K> {
        self.objects
            .lock()
            .unwrap()
            .get(&key::<K>(name, namespace))
            .map(|value| serde_json::from_value(value.clone()).unwrap())
    }

    pub fn count<K: Object>(&self) -> usize {
        let kind = key::<K>("", None).0;
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(k, _, _)| *k == kind)
            .count()
    }

    /// Number of successful create/update/delete calls so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Makes every subsequent `verb` on objects of type `K` fail.
    pub fn fail_on<K: Object>(&self, verb: Verb) {
        self.failures
            .lock()
            .unwrap()
            .push((verb, K::kind(&()).into_owned()));
    }

    /// Clears every failure set up by [`Self::fail_on`].
    pub fn recover(&self) {
        self.failures.lock().unwrap().clear();
    }

    fn check_failure<K: Object>(
        &self,
        verb: Verb,
        object: impl FnOnce() -> ObjectRef<stackable_operator::kube::api::DynamicObject>,
    ) -> Result<()> {
        let kind = K::kind(&());
        if self
            .failures
            .lock()
            .unwrap()
            .iter()
            .any(|(v, k)| *v == verb && *k == kind)
        {
            return Err(Error::Rejected {
                object: object(),
                reason: format!("injected {verb} failure"),
            });
        }
        Ok(())
    }

    fn next_resource_version(&self) -> String {
        (self.resource_version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get_opt<K: Object>(&self, name: &str, namespace: Option<&str>) -> Result<Option<K>> {
        self.check_failure::<K>(Verb::Get, || object_ref::<K>(name, namespace))?;
        Ok(self.peek(name, namespace))
    }

    async fn list<K: Object>(
        &self,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<K>> {
        self.check_failure::<K>(Verb::List, || object_ref::<K>("", namespace))?;
        let kind = key::<K>("", None).0;
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .iter()
            .filter(|((k, ns, _), _)| {
                *k == kind && namespace.map_or(true, |namespace| ns.as_deref() == Some(namespace))
            })
            .map(|(_, value)| serde_json::from_value::<K>(value.clone()).unwrap())
            .filter(|obj| {
                let obj_labels = obj.labels();
                labels
                    .iter()
                    .all(|(k, v)| obj_labels.get(k) == Some(v))
            })
            .collect())
    }

    async fn create<K: Object>(&self, obj: &K) -> Result<K> {
        let obj_ref = || ObjectRef::from_obj(obj).erase();
        self.check_failure::<K>(Verb::Create, obj_ref)?;
        if obj.meta().resource_version.is_some() {
            return Err(Error::Rejected {
                object: obj_ref(),
                reason: "resourceVersion should not be set on objects to be created".to_string(),
            });
        }
        if self
            .peek::<K>(&obj.name_any(), obj.namespace().as_deref())
            .is_some()
        {
            return Err(Error::AlreadyExists { object: obj_ref() });
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(self.insert(obj.clone()))
    }

    async fn update<K: Object>(&self, obj: &K) -> Result<K> {
        let obj_ref = || ObjectRef::from_obj(obj).erase();
        self.check_failure::<K>(Verb::Update, obj_ref)?;
        let Some(stored) = self.peek::<K>(&obj.name_any(), obj.namespace().as_deref()) else {
            return Err(Error::NotFound { object: obj_ref() });
        };
        if obj.meta().resource_version.is_some()
            && obj.meta().resource_version != stored.meta().resource_version
        {
            return Err(Error::Conflict { object: obj_ref() });
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(self.insert(obj.clone()))
    }

    async fn delete<K: Object>(&self, name: &str, namespace: Option<&str>) -> Result<()> {
        self.check_failure::<K>(Verb::Delete, || object_ref::<K>(name, namespace))?;
        match self
            .objects
            .lock()
            .unwrap()
            .remove(&key::<K>(name, namespace))
        {
            Some(_) => {
                self.writes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => Err(Error::NotFound {
                object: object_ref::<K>(name, namespace),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use stackable_operator::{k8s_openapi::api::core::v1::Secret, kube::api::ObjectMeta};

    use super::*;

    fn secret(name: &str) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                labels: Some([("app".to_string(), name.to_string())].into()),
                ..ObjectMeta::default()
            },
            ..Secret::default()
        }
    }

    #[tokio::test]
    async fn stale_updates_conflict() {
        let store = MemoryStore::new();
        let created = store.create(&secret("foo")).await.unwrap();
        let updated = store.update(&created).await.unwrap();
        assert_ne!(created.resource_version(), updated.resource_version());
        assert!(matches!(
            store.update(&created).await,
            Err(Error::Conflict { .. })
        ));
        assert_eq!(store.writes(), 2);
    }

    #[tokio::test]
    async fn create_requires_fresh_object() {
        let store = MemoryStore::new();
        let created = store.create(&secret("foo")).await.unwrap();
        assert!(matches!(
            store.create(&created).await,
            Err(Error::Rejected { .. })
        ));
        assert!(matches!(
            store.create(&secret("foo")).await,
            Err(Error::AlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn list_filters_by_label_and_namespace() {
        let store = MemoryStore::new();
        store.insert(secret("foo"));
        store.insert(secret("bar"));
        let selector = [("app".to_string(), "foo".to_string())].into();
        let found = store
            .list::<Secret>(Some("default"), &selector)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!(store
            .list::<Secret>(Some("other"), &selector)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            store.list::<Secret>(None, &BTreeMap::new()).await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn delete_reports_absence() {
        let store = MemoryStore::new();
        store.insert(secret("foo"));
        store.delete::<Secret>("foo", Some("default")).await.unwrap();
        assert!(store
            .delete::<Secret>("foo", Some("default"))
            .await
            .unwrap_err()
            .is_not_found());
    }
}

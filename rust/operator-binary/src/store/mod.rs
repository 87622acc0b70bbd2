//! Access to the objects that the reconcilers read and write.
//!
//! The reconcilers only need get/list/create/update/delete, and must be able to tell
//! "the object does not exist" apart from every other failure. [`ObjectStore`] captures exactly
//! that, so that the reconciliation logic can be exercised against [`memory::MemoryStore`] in
//! tests.

use std::{collections::BTreeMap, fmt::Debug};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use snafu::Snafu;
use stackable_operator::{
    k8s_openapi::{
        api::core::v1::{ConfigMap, Secret, Service},
        apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition,
    },
    kube::{
        self,
        api::{Api, DeleteParams, DynamicObject, ListParams, PostParams},
        runtime::reflector::ObjectRef,
        Resource, ResourceExt,
    },
};
use strum::Display;

use crate::{
    external_crd::cert_manager::{Certificate, ClusterIssuer, Issuer},
    utils::Unloggable,
};

#[cfg(test)]
pub mod memory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Verb {
    Get,
    List,
    Create,
    Update,
    Delete,
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{object} was not found"))]
    NotFound { object: ObjectRef<DynamicObject> },

    #[snafu(display("{object} already exists"))]
    AlreadyExists { object: ObjectRef<DynamicObject> },

    #[snafu(display("{object} has been modified since it was read"))]
    Conflict { object: ObjectRef<DynamicObject> },

    #[snafu(display("{object} was rejected: {reason}"))]
    Rejected {
        object: ObjectRef<DynamicObject>,
        reason: String,
    },

    #[snafu(display("failed to {verb} {object}"))]
    Kube {
        source: kube::Error,
        verb: Verb,
        object: ObjectRef<DynamicObject>,
    },
}
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::AlreadyExists { .. })
    }

    fn from_kube(source: kube::Error, verb: Verb, object: ObjectRef<DynamicObject>) -> Self {
        let code = match &source {
            kube::Error::Api(response) => Some(response.code),
            _ => None,
        };
        match (code, verb) {
            (Some(404), _) => Error::NotFound { object },
            (Some(409), Verb::Create) => Error::AlreadyExists { object },
            (Some(409), _) => Error::Conflict { object },
            _ => Error::Kube {
                source,
                verb,
                object,
            },
        }
    }
}

/// A Kubernetes object type that can be kept in an [`ObjectStore`].
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
    /// The API handle for `namespace`, or for all namespaces (and cluster-scoped objects) if
    /// [`None`].
    fn api(client: kube::Client, namespace: Option<&str>) -> Api<Self>;
}

macro_rules! namespaced_objects {
    ($($kind:ty),* $(,)?) => {$(
        impl Object for $kind {
            fn api(client: kube::Client, namespace: Option<&str>) -> Api<Self> {
                match namespace {
                    Some(namespace) => Api::namespaced(client, namespace),
                    None => Api::all(client),
                }
            }
        }
    )*};
}

macro_rules! cluster_objects {
    ($($kind:ty),* $(,)?) => {$(
        impl Object for $kind {
            fn api(client: kube::Client, _namespace: Option<&str>) -> Api<Self> {
                Api::all(client)
            }
        }
    )*};
}

namespaced_objects!(Service, Secret, ConfigMap, Certificate, Issuer);
cluster_objects!(ClusterIssuer, CustomResourceDefinition);

/// Builds an [`ObjectRef`] for logging and error reporting, without requiring the object itself.
pub fn object_ref<K: Object>(name: &str, namespace: Option<&str>) -> ObjectRef<DynamicObject> {
    let obj_ref = ObjectRef::<K>::new(name);
    match namespace {
        Some(namespace) => obj_ref.within(namespace),
        None => obj_ref,
    }
    .erase()
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetches an object, returning [`None`] if it does not exist.
    async fn get_opt<K: Object>(&self, name: &str, namespace: Option<&str>) -> Result<Option<K>>;

    /// Lists all objects matching every label in `labels`.
    async fn list<K: Object>(
        &self,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<K>>;

    async fn create<K: Object>(&self, obj: &K) -> Result<K>;

    /// Replaces an existing object.
    ///
    /// Fails with [`Error::Conflict`] if `obj` carries a stale `resourceVersion`.
    async fn update<K: Object>(&self, obj: &K) -> Result<K>;

    /// Fails with [`Error::NotFound`] if there is nothing to delete.
    async fn delete<K: Object>(&self, name: &str, namespace: Option<&str>) -> Result<()>;
}

/// [`ObjectStore`] backed by the Kubernetes API server.
#[derive(Debug, Clone)]
pub struct KubeStore {
    // kube::Client isn't Debug
    client: Unloggable<kube::Client>,
}

impl KubeStore {
    pub fn new(client: kube::Client) -> Self {
        Self {
            client: Unloggable(client),
        }
    }

    fn api<K: Object>(&self, namespace: Option<&str>) -> Api<K> {
        K::api(self.client.0.clone(), namespace)
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get_opt<K: Object>(&self, name: &str, namespace: Option<&str>) -> Result<Option<K>> {
        self.api::<K>(namespace)
            .get_opt(name)
            .await
            .map_err(|err| Error::from_kube(err, Verb::Get, object_ref::<K>(name, namespace)))
    }

    async fn list<K: Object>(
        &self,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<K>> {
        let label_selector = labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        self.api::<K>(namespace)
            .list(&ListParams::default().labels(&label_selector))
            .await
            .map(|list| list.items)
            .map_err(|err| Error::from_kube(err, Verb::List, object_ref::<K>("", namespace)))
    }

    async fn create<K: Object>(&self, obj: &K) -> Result<K> {
        let namespace = obj.namespace();
        self.api::<K>(namespace.as_deref())
            .create(&PostParams::default(), obj)
            .await
            .map_err(|err| Error::from_kube(err, Verb::Create, ObjectRef::from_obj(obj).erase()))
    }

    async fn update<K: Object>(&self, obj: &K) -> Result<K> {
        let namespace = obj.namespace();
        self.api::<K>(namespace.as_deref())
            .replace(&obj.name_any(), &PostParams::default(), obj)
            .await
            .map_err(|err| Error::from_kube(err, Verb::Update, ObjectRef::from_obj(obj).erase()))
    }

    async fn delete<K: Object>(&self, name: &str, namespace: Option<&str>) -> Result<()> {
        self.api::<K>(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|err| Error::from_kube(err, Verb::Delete, object_ref::<K>(name, namespace)))
    }
}

/// Deletes an object, treating "already gone" as success.
///
/// Returns whether anything was actually deleted.
pub async fn delete_if_exists<K: Object>(
    store: &impl ObjectStore,
    name: &str,
    namespace: Option<&str>,
) -> Result<bool> {
    match store.delete::<K>(name, namespace).await {
        Ok(()) => Ok(true),
        Err(err) if err.is_not_found() => Ok(false),
        Err(err) => Err(err),
    }
}

/// Creates an object, treating "someone else created it first" as success.
///
/// Returns whether the object was actually created by this call.
pub async fn create_if_missing<K: Object>(store: &impl ObjectStore, obj: &K) -> Result<bool> {
    match store.create(obj).await {
        Ok(_) => Ok(true),
        Err(err) if err.is_already_exists() => Ok(false),
        Err(err) => Err(err),
    }
}

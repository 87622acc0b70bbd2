//! Injects the root CA certificate into ConfigMaps that ask for it.
//!
//! A ConfigMap opts in by setting the inject label to a true value. Setting it to false later (or
//! removing it) stops further updates, but the previously injected certificate is left in place.

use std::{collections::BTreeMap, time::Duration};

use snafu::{ResultExt as _, Snafu};
use stackable_operator::{
    k8s_openapi::api::core::v1::ConfigMap,
    kube::{api::DynamicObject, runtime::reflector::ObjectRef, ResourceExt},
};

use crate::{
    config::TrustDomain,
    store::{self, ObjectStore},
    trust_anchor::{self, fetch_root_ca, RootCa},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to fetch the root CA certificate"))]
    FetchRootCa { source: trust_anchor::Error },

    #[snafu(display("failed to update {config_map}"))]
    UpdateConfigMap {
        source: store::Error,
        config_map: ObjectRef<DynamicObject>,
    },
}
type Result<T, E = Error> = std::result::Result<T, E>;

/// What the inject label of a ConfigMap asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectionDecision {
    Inject,
    /// The label is missing or false.
    Skip,
    /// The label is set, but to something that is not a boolean.
    /// Treated like [`InjectionDecision::Skip`].
    Malformed(String),
}

impl InjectionDecision {
    pub fn from_labels(domain: &TrustDomain, labels: &BTreeMap<String, String>) -> Self {
        match labels.get(&domain.labels.inject_ca_bundle).map(String::as_str) {
            None => Self::Skip,
            Some("1" | "t" | "T" | "true" | "TRUE" | "True") => Self::Inject,
            Some("0" | "f" | "F" | "false" | "FALSE" | "False") => Self::Skip,
            Some(other) => Self::Malformed(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectionOutcome {
    Injected,
    Unchanged,
    Skipped,
    /// The root CA has not been issued yet, check again after `retry_after`.
    CaPending { retry_after: Duration },
}

/// Writes the root CA certificate into `config_map`, if its labels ask for it.
///
/// The ConfigMap is only updated if the stored certificate differs from the current one.
pub async fn inject_if_requested(
    store: &impl ObjectStore,
    domain: &TrustDomain,
    config_map: &ConfigMap,
) -> Result<InjectionOutcome> {
    let cm_ref = ObjectRef::from_obj(config_map);
    match InjectionDecision::from_labels(domain, config_map.labels()) {
        InjectionDecision::Inject => {}
        InjectionDecision::Skip => return Ok(InjectionOutcome::Skipped),
        InjectionDecision::Malformed(value) => {
            tracing::warn!(
                config_map = %cm_ref,
                label = %domain.labels.inject_ca_bundle,
                %value,
                "ignoring ConfigMap with invalid inject label, expected a boolean"
            );
            return Ok(InjectionOutcome::Skipped);
        }
    }

    let ca = match fetch_root_ca(store, domain).await.context(FetchRootCaSnafu)? {
        RootCa::Ready(ca) => ca,
        RootCa::Pending => {
            return Ok(InjectionOutcome::CaPending {
                retry_after: domain.retry_interval,
            })
        }
    };
    if config_map
        .data
        .as_ref()
        .and_then(|data| data.get(&domain.ca_bundle_key))
        == Some(&ca)
    {
        tracing::debug!(config_map = %cm_ref, "CA bundle is up to date");
        return Ok(InjectionOutcome::Unchanged);
    }

    tracing::info!(config_map = %cm_ref, "injecting CA bundle");
    let mut desired = config_map.clone();
    desired
        .data
        .get_or_insert_with(Default::default)
        .insert(domain.ca_bundle_key.clone(), ca);
    store
        .update(&desired)
        .await
        .context(UpdateConfigMapSnafu {
            config_map: cm_ref.erase(),
        })?;
    Ok(InjectionOutcome::Injected)
}

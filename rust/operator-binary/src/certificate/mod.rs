//! Lifecycle of the cert-manager [`Certificate`](crate::external_crd::cert_manager::Certificate)
//! issued for each labelled [`Service`].
//!
//! All Certificates live in the trust domain namespace, regardless of where the Service is.
//! Kubernetes does not allow owner references across namespaces, so Certificates are linked back
//! to their Service by labels instead, and are cleaned up by [`teardown`] rather than by garbage
//! collection.

use std::collections::BTreeMap;

use stackable_operator::{k8s_openapi::api::core::v1::Service, kube::ResourceExt};

use crate::config::TrustDomain;

pub mod fetch;
pub mod sync;
pub mod teardown;

/// The DNS names that a Service is reachable under from inside the cluster.
pub fn service_dns_names(name: &str, namespace: &str) -> Vec<String> {
    let fqn = format!("{name}.{namespace}");
    vec![
        name.to_string(),
        fqn.clone(),
        format!("{fqn}.svc"),
        format!("{fqn}.svc.cluster.local"),
    ]
}

/// The Service's cluster IPs, skipping the `None` placeholder used by headless Services.
pub fn service_ip_addresses(svc: &Service) -> Vec<String> {
    svc.spec
        .iter()
        .flat_map(|spec| spec.cluster_ips.iter().flatten())
        .filter(|ip| ip.parse::<std::net::IpAddr>().is_ok())
        .cloned()
        .collect()
}

/// Labels that link a Certificate back to the Service it was issued for.
pub fn service_back_reference(domain: &TrustDomain, svc: &Service) -> BTreeMap<String, String> {
    [
        (domain.labels.service_name.clone(), svc.name_any()),
        (
            domain.labels.service_namespace.clone(),
            svc.namespace().unwrap_or_default(),
        ),
    ]
    .into()
}

/// Selects the issued Secret (and its copies) of the Certificate `cert_name`.
pub fn certificate_selector(domain: &TrustDomain, cert_name: &str) -> BTreeMap<String, String> {
    [(domain.labels.certificate.clone(), cert_name.to_string())].into()
}

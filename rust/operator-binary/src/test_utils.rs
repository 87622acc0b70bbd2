//! Fixtures shared by the unit tests.

use stackable_operator::{
    k8s_openapi::{
        api::core::v1::{ConfigMap, Secret, Service},
        ByteString,
    },
    kube::api::ObjectMeta,
};

use crate::{
    config::TrustDomain,
    external_crd::cert_manager::{Certificate, CertificateCondition, CertificateStatus},
    store::memory::MemoryStore,
    trust_anchor::{root_certificate, CA_CERTIFICATE_KEY},
};

pub fn service(
    name: &str,
    namespace: &str,
    secret_name: Option<&str>,
    cluster_ips: &[&str],
) -> Service {
    let mut svc: Service = serde_yaml::from_str(&format!(
        r#"
apiVersion: v1
kind: Service
metadata:
  name: {name}
  namespace: {namespace}
  uid: {namespace}-{name}-uid
spec:
  ports:
    - port: 443
      targetPort: 8443
"#
    ))
    .unwrap();
    svc.metadata.labels = secret_name.map(|secret_name| {
        [(
            "service-ca.stackable.tech/serving-cert-secret-name".to_string(),
            secret_name.to_string(),
        )]
        .into()
    });
    if let Some(spec) = svc.spec.as_mut() {
        spec.cluster_ips = Some(cluster_ips.iter().map(|ip| ip.to_string()).collect());
    }
    svc
}

pub fn config_map(name: &str, namespace: &str, inject: Option<&str>) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: inject.map(|inject| {
                [(
                    "service-ca.stackable.tech/inject-ca-bundle".to_string(),
                    inject.to_string(),
                )]
                .into()
            }),
            ..ObjectMeta::default()
        },
        ..ConfigMap::default()
    }
}

pub fn ready_condition() -> CertificateStatus {
    CertificateStatus {
        conditions: vec![CertificateCondition {
            type_: "Ready".to_string(),
            status: "True".to_string(),
            reason: Some("Ready".to_string()),
            message: None,
        }],
    }
}

/// Pretends to be cert-manager: marks the Certificate as ready and writes its Secret.
pub fn issue(
    store: &MemoryStore,
    domain: &TrustDomain,
    cert_name: &str,
    data: &[(&str, &str)],
) -> Secret {
    let namespace = Some(domain.namespace.as_str());
    let mut cert = store
        .peek::<Certificate>(cert_name, namespace)
        .expect("certificate should exist before it is issued");
    cert.status = Some(ready_condition());
    let labels = cert
        .spec
        .secret_template
        .as_ref()
        .map(|template| template.labels.clone());
    let secret_name = cert.spec.secret_name.clone();
    store.insert(cert);
    store.insert(Secret {
        metadata: ObjectMeta {
            name: Some(secret_name),
            namespace: Some(domain.namespace.clone()),
            labels,
            annotations: Some(
                [(
                    "cert-manager.io/certificate-name".to_string(),
                    cert_name.to_string(),
                )]
                .into(),
            ),
            ..ObjectMeta::default()
        },
        type_: Some("kubernetes.io/tls".to_string()),
        data: Some(
            data.iter()
                .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                .collect(),
        ),
        ..Secret::default()
    })
}

pub fn ready_root_ca(store: &MemoryStore, domain: &TrustDomain, pem: &[u8]) {
    let mut cert = root_certificate(domain);
    cert.status = Some(ready_condition());
    store.insert(cert);
    store.insert(Secret {
        metadata: ObjectMeta {
            name: Some(domain.root_secret_name.clone()),
            namespace: Some(domain.namespace.clone()),
            ..ObjectMeta::default()
        },
        data: Some([(CA_CERTIFICATE_KEY.to_string(), ByteString(pem.to_vec()))].into()),
        ..Secret::default()
    });
}

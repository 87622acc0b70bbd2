//! Keeps the Certificate of a Service in line with the Service.

use snafu::{OptionExt as _, ResultExt as _, Snafu};
use stackable_operator::{
    k8s_openapi::api::core::v1::Service,
    kube::{api::DynamicObject, runtime::reflector::ObjectRef, ResourceExt},
};

use crate::{
    certificate::{service_back_reference, service_dns_names, service_ip_addresses},
    config::{go_duration, TrustDomain},
    external_crd::cert_manager::{Certificate, CertificateSpec, ObjectReference},
    store::{self, object_ref, ObjectStore},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{service} has no namespace"))]
    NoServiceNamespace { service: ObjectRef<Service> },

    #[snafu(display("failed to get {certificate}"))]
    GetCertificate {
        source: store::Error,
        certificate: ObjectRef<DynamicObject>,
    },

    #[snafu(display("failed to create {certificate}"))]
    CreateCertificate {
        source: store::Error,
        certificate: ObjectRef<DynamicObject>,
    },

    #[snafu(display("failed to update {certificate}"))]
    UpdateCertificate {
        source: store::Error,
        certificate: ObjectRef<DynamicObject>,
    },
}
type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Creates the Certificate for `svc` if it is missing, or updates it if it has drifted from the
/// Service.
///
/// Errors from the store are returned as-is (with context), retrying is up to the caller.
pub async fn sync_service_certificate(
    store: &impl ObjectStore,
    domain: &TrustDomain,
    svc: &Service,
) -> Result<SyncOutcome> {
    let svc_namespace = svc.namespace().context(NoServiceNamespaceSnafu {
        service: ObjectRef::from_obj(svc),
    })?;
    let cert_name = domain.certificate_name(&svc.name_any(), &svc_namespace);
    let cert_namespace = Some(domain.namespace.as_str());
    let cert_ref = object_ref::<Certificate>(&cert_name, cert_namespace);

    match store
        .get_opt::<Certificate>(&cert_name, cert_namespace)
        .await
        .context(GetCertificateSnafu {
            certificate: cert_ref.clone(),
        })? {
        None => {
            tracing::info!(certificate = %cert_ref, "certificate does not exist, creating");
            let mut cert = Certificate::new(
                &cert_name,
                CertificateSpec {
                    // Every Certificate shares the trust domain namespace, so the Secret is named
                    // after the (unique) Certificate rather than whatever the Service asked for
                    secret_name: cert_name.clone(),
                    is_ca: false,
                    issuer_ref: ObjectReference::cluster_issuer(&domain.cluster_issuer_name),
                    ..CertificateSpec::default()
                },
            );
            cert.metadata.namespace = Some(domain.namespace.clone());
            apply_service(&mut cert, domain, svc, &svc_namespace);
            store
                .create(&cert)
                .await
                .context(CreateCertificateSnafu {
                    certificate: cert_ref,
                })?;
            Ok(SyncOutcome::Created)
        }
        Some(current) => {
            let mut desired = current.clone();
            apply_service(&mut desired, domain, svc, &svc_namespace);
            if desired.spec == current.spec && desired.metadata.labels == current.metadata.labels {
                tracing::debug!(certificate = %cert_ref, "certificate is up to date");
                return Ok(SyncOutcome::Unchanged);
            }
            tracing::info!(
                certificate = %cert_ref,
                "certificate has drifted from service, updating"
            );
            store
                .update(&desired)
                .await
                .context(UpdateCertificateSnafu {
                    certificate: cert_ref,
                })?;
            Ok(SyncOutcome::Updated)
        }
    }
}

/// Overwrites the fields of `cert` that are derived from `svc`, leaving everything else intact.
fn apply_service(
    cert: &mut Certificate,
    domain: &TrustDomain,
    svc: &Service,
    svc_namespace: &str,
) {
    let cert_name = cert.name_any();
    let spec = &mut cert.spec;
    spec.dns_names = service_dns_names(&svc.name_any(), svc_namespace);
    spec.ip_addresses = service_ip_addresses(svc);
    spec.duration = Some(go_duration(*domain.certificate_lifetime));
    spec.renew_before = Some(go_duration(*domain.certificate_renew_before));
    spec.secret_template
        .get_or_insert_with(Default::default)
        .labels
        .insert(domain.labels.certificate.clone(), cert_name);
    cert.metadata
        .labels
        .get_or_insert_with(Default::default)
        .extend(service_back_reference(domain, svc));
}

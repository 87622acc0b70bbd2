use std::time::Duration;

use snafu::{OptionExt as _, ResultExt as _, Snafu};
use stackable_operator::{
    k8s_openapi::api::core::v1::{Secret, Service},
    kube::{api::DynamicObject, runtime::reflector::ObjectRef, ResourceExt},
};

use crate::{
    config::TrustDomain,
    external_crd::cert_manager::Certificate,
    store::{self, object_ref, ObjectStore},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{service} has no namespace"))]
    NoServiceNamespace { service: ObjectRef<Service> },

    #[snafu(display("failed to get {object}"))]
    Get {
        source: store::Error,
        object: ObjectRef<DynamicObject>,
    },

    #[snafu(display("{certificate} is ready but its {secret} does not exist"))]
    MissingSecret {
        certificate: ObjectRef<DynamicObject>,
        secret: ObjectRef<DynamicObject>,
    },
}
type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, PartialEq)]
pub enum KeyMaterial {
    /// The Secret issued by cert-manager, as stored in the trust domain namespace.
    Ready(Secret),
    /// Issuance has not finished yet, check again after `retry_after`.
    Pending { retry_after: Duration },
}

/// Retrieves the issued Secret of `svc`'s Certificate, if cert-manager has finished issuing it.
pub async fn fetch_ready_key_material(
    store: &impl ObjectStore,
    domain: &TrustDomain,
    svc: &Service,
) -> Result<KeyMaterial> {
    let svc_namespace = svc.namespace().context(NoServiceNamespaceSnafu {
        service: ObjectRef::from_obj(svc),
    })?;
    let cert_name = domain.certificate_name(&svc.name_any(), &svc_namespace);
    let namespace = Some(domain.namespace.as_str());
    let cert_ref = object_ref::<Certificate>(&cert_name, namespace);
    let pending = KeyMaterial::Pending {
        retry_after: domain.retry_interval,
    };

    let Some(cert) = store
        .get_opt::<Certificate>(&cert_name, namespace)
        .await
        .context(GetSnafu {
            object: cert_ref.clone(),
        })?
    else {
        tracing::debug!(certificate = %cert_ref, "certificate does not exist yet");
        return Ok(pending);
    };
    if !cert.is_ready() {
        tracing::debug!(certificate = %cert_ref, "certificate is not ready yet");
        return Ok(pending);
    }

    let secret_ref = object_ref::<Secret>(&cert.spec.secret_name, namespace);
    store
        .get_opt::<Secret>(&cert.spec.secret_name, namespace)
        .await
        .context(GetSnafu {
            object: secret_ref.clone(),
        })?
        .map(KeyMaterial::Ready)
        .context(MissingSecretSnafu {
            certificate: cert_ref,
            secret: secret_ref,
        })
}

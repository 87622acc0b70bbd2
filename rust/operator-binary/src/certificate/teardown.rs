use snafu::{OptionExt as _, ResultExt as _, Snafu};
use stackable_operator::{
    k8s_openapi::api::core::v1::{Secret, Service},
    kube::{api::DynamicObject, runtime::reflector::ObjectRef, ResourceExt},
};

use crate::{
    certificate::certificate_selector,
    config::TrustDomain,
    external_crd::cert_manager::Certificate,
    store::{self, delete_if_exists, object_ref, ObjectStore},
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

    #[snafu(display("failed to list copies of {certificate}"))]
    ListCopies {
        source: store::Error,
        certificate: ObjectRef<DynamicObject>,
    },

    #[snafu(display("failed to delete {object}"))]
    Delete {
        source: store::Error,
        object: ObjectRef<DynamicObject>,
    },
}
type Result<T, E = Error> = std::result::Result<T, E>;

/// Deletes everything that was created on behalf of a Service that no longer exists.
///
/// That is the Certificate and its issued Secret in the trust domain namespace, and every copy of
/// the Secret in the Service's namespace. Anything that is already gone is skipped, so this can be
/// repeated safely. Returns the number of objects that were deleted.
pub async fn teardown_for_service(
    store: &impl ObjectStore,
    domain: &TrustDomain,
    service: &ObjectRef<Service>,
) -> Result<usize> {
    let svc_namespace = service
        .namespace
        .as_deref()
        .context(NoServiceNamespaceSnafu {
            service: service.clone(),
        })?;
    let cert_name = domain.certificate_name(&service.name, svc_namespace);
    let namespace = Some(domain.namespace.as_str());
    let cert_ref = object_ref::<Certificate>(&cert_name, namespace);
    let mut deleted = 0;

    let secret_name = match store
        .get_opt::<Certificate>(&cert_name, namespace)
        .await
        .context(GetCertificateSnafu {
            certificate: cert_ref.clone(),
        })? {
        Some(cert) => cert.spec.secret_name,
        // The Secret can outlive its Certificate if an earlier teardown was interrupted
        None => cert_name.clone(),
    };
    // cert-manager reissues the Secret of a Certificate that still exists
    if delete_if_exists::<Certificate>(store, &cert_name, namespace)
        .await
        .context(DeleteSnafu {
            object: cert_ref.clone(),
        })?
    {
        tracing::info!(
            certificate = %cert_ref,
            %service,
            "deleted certificate of removed service"
        );
        deleted += 1;
    }
    if delete_if_exists::<Secret>(store, &secret_name, namespace)
        .await
        .context(DeleteSnafu {
            object: object_ref::<Secret>(&secret_name, namespace),
        })?
    {
        tracing::info!(
            secret = %secret_name,
            %service,
            "deleted issued secret of removed service"
        );
        deleted += 1;
    }

    let copies = store
        .list::<Secret>(Some(svc_namespace), &certificate_selector(domain, &cert_name))
        .await
        .context(ListCopiesSnafu {
            certificate: cert_ref,
        })?;
    for copy in copies {
        let copy_name = copy.name_any();
        if delete_if_exists::<Secret>(store, &copy_name, Some(svc_namespace))
            .await
            .context(DeleteSnafu {
                object: ObjectRef::from_obj(&copy).erase(),
            })?
        {
            tracing::info!(
                secret = %copy_name,
                %service,
                "deleted secret copy of removed service"
            );
            deleted += 1;
        }
    }

    if deleted == 0 {
        tracing::debug!(%service, "nothing to clean up");
    }
    Ok(deleted)
}

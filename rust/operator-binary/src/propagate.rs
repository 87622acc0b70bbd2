//! Copies issued key material from the trust domain namespace into the namespace of the Service
//! that requested it.

use snafu::{OptionExt as _, ResultExt as _, Snafu};
use stackable_operator::{
    k8s_openapi::{
        api::core::v1::{Secret, Service},
        apimachinery::pkg::apis::meta::v1::OwnerReference,
    },
    kube::{
        api::{DynamicObject, ObjectMeta},
        runtime::reflector::ObjectRef,
        Resource, ResourceExt,
    },
};

use crate::{
    config::TrustDomain,
    store::{self, object_ref, ObjectStore},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{service} has no namespace"))]
    NoServiceNamespace { service: ObjectRef<Service> },

    #[snafu(display("failed to build owner reference to {service}"))]
    BuildOwnerReference { service: ObjectRef<Service> },

    #[snafu(display("failed to get {secret}"))]
    GetSecret {
        source: store::Error,
        secret: ObjectRef<DynamicObject>,
    },

    #[snafu(display("failed to create {secret}"))]
    CreateSecret {
        source: store::Error,
        secret: ObjectRef<DynamicObject>,
    },

    #[snafu(display("failed to update {secret}"))]
    UpdateSecret {
        source: store::Error,
        secret: ObjectRef<DynamicObject>,
    },
}
type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagateOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Writes the data of `key_material` into the Secret `desired_secret_name` in `svc`'s namespace.
///
/// Keys of an existing Secret that are not part of `key_material` are kept. The copy is owned by
/// `svc` and labelled with the Certificate it came from, so that it is removed together with the
/// Service.
pub async fn propagate_secret(
    store: &impl ObjectStore,
    domain: &TrustDomain,
    key_material: &Secret,
    svc: &Service,
    desired_secret_name: &str,
) -> Result<PropagateOutcome> {
    let svc_ref = ObjectRef::from_obj(svc);
    let svc_namespace = svc.namespace().context(NoServiceNamespaceSnafu {
        service: svc_ref.clone(),
    })?;
    let owner_ref = svc
        .controller_owner_ref(&())
        .context(BuildOwnerReferenceSnafu {
            service: svc_ref.clone(),
        })?;
    let cert_name = domain.certificate_name(&svc.name_any(), &svc_namespace);
    let secret_ref = object_ref::<Secret>(desired_secret_name, Some(&svc_namespace));

    let existing = store
        .get_opt::<Secret>(desired_secret_name, Some(&svc_namespace))
        .await
        .context(GetSecretSnafu {
            secret: secret_ref.clone(),
        })?;
    match existing {
        None => {
            tracing::info!(secret = %secret_ref, service = %svc_ref, "creating secret copy");
            let mut labels = key_material.labels().clone();
            labels.insert(domain.labels.certificate.clone(), cert_name);
            let copy = Secret {
                metadata: ObjectMeta {
                    name: Some(desired_secret_name.to_string()),
                    namespace: Some(svc_namespace),
                    labels: Some(labels),
                    annotations: key_material.metadata.annotations.clone(),
                    owner_references: Some(vec![owner_ref]),
                    ..ObjectMeta::default()
                },
                type_: key_material.type_.clone(),
                data: key_material.data.clone(),
                ..Secret::default()
            };
            store
                .create(&copy)
                .await
                .context(CreateSecretSnafu { secret: secret_ref })?;
            Ok(PropagateOutcome::Created)
        }
        Some(current) => {
            let mut desired = current.clone();
            desired
                .data
                .get_or_insert_with(Default::default)
                .extend(
                    key_material
                        .data
                        .iter()
                        .flatten()
                        .map(|(k, v)| (k.clone(), v.clone())),
                );
            set_controller(&mut desired.metadata, owner_ref);
            desired
                .labels_mut()
                .insert(domain.labels.certificate.clone(), cert_name);
            if desired == current {
                tracing::debug!(secret = %secret_ref, "secret copy is up to date");
                return Ok(PropagateOutcome::Unchanged);
            }
            tracing::info!(secret = %secret_ref, service = %svc_ref, "updating secret copy");
            store
                .update(&desired)
                .await
                .context(UpdateSecretSnafu { secret: secret_ref })?;
            Ok(PropagateOutcome::Updated)
        }
    }
}

/// Makes `owner_ref` the (only) controller of `meta`, keeping any other non-controller owners.
fn set_controller(meta: &mut ObjectMeta, owner_ref: OwnerReference) {
    let owners = meta.owner_references.get_or_insert_with(Vec::new);
    if owners.iter().any(|owner| *owner == owner_ref) {
        return;
    }
    owners.retain(|owner| owner.controller != Some(true) && owner.uid != owner_ref.uid);
    owners.push(owner_ref);
}

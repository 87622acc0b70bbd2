//! Issues certificates for Services that ask for one, and cleans up after Services that are gone.

use std::{sync::Arc, time::Duration};

use const_format::concatcp;
use futures::{channel::mpsc, StreamExt};
use snafu::{ResultExt as _, Snafu};
use stackable_operator::{
    k8s_openapi::api::core::v1::{Secret, Service},
    kube::{
        self,
        api::{Api, DynamicObject},
        runtime::{
            controller::{self, Action},
            events::{Recorder, Reporter},
            reflector::ObjectRef,
            watcher, Controller,
        },
        ResourceExt,
    },
    logging::controller::{report_controller_reconciled, ReconcilerError},
};
use strum::{EnumDiscriminants, IntoStaticStr};

use crate::{
    certificate::{
        fetch::{self, fetch_ready_key_material, KeyMaterial},
        sync::{self, sync_service_certificate, SyncOutcome},
        teardown::{self, teardown_for_service},
    },
    config::TrustDomain,
    external_crd::cert_manager::Certificate,
    propagate::{self, propagate_secret, PropagateOutcome},
    store::{self, KubeStore, ObjectStore},
    OPERATOR_NAME,
};

const CONTROLLER_NAME: &str = "service";
const FULL_CONTROLLER_NAME: &str = concatcp!(CONTROLLER_NAME, ".", OPERATOR_NAME);

#[derive(Debug, Snafu, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("failed to get {service}"))]
    GetService {
        source: store::Error,
        service: ObjectRef<Service>,
    },

    #[snafu(display("failed to clean up after deleted service"))]
    Teardown { source: teardown::Error },

    #[snafu(display("failed to synchronize certificate"))]
    SyncCertificate { source: sync::Error },

    #[snafu(display("failed to fetch issued key material"))]
    FetchKeyMaterial { source: fetch::Error },

    #[snafu(display("failed to propagate key material into the service's namespace"))]
    PropagateSecret { source: propagate::Error },
}
type Result<T, E = Error> = std::result::Result<T, E>;

impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }

    fn secondary_object(&self) -> Option<ObjectRef<DynamicObject>> {
        match self {
            Error::GetService { service, .. } => Some(service.clone().erase()),
            Error::Teardown { .. } => None,
            Error::SyncCertificate { .. } => None,
            Error::FetchKeyMaterial { .. } => None,
            Error::PropagateSecret { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceOutcome {
    /// The Service does not ask for a certificate.
    Skipped,
    /// The Service is gone, `deleted` objects were removed on its behalf.
    TornDown { deleted: usize },
    /// The Certificate is in place, but has not been issued yet.
    Pending {
        certificate: SyncOutcome,
        retry_after: Duration,
    },
    Ready {
        certificate: SyncOutcome,
        secret: PropagateOutcome,
    },
}

impl ServiceOutcome {
    pub fn action(&self) -> Action {
        match self {
            ServiceOutcome::Pending { retry_after, .. } => Action::requeue(*retry_after),
            _ => Action::await_change(),
        }
    }
}

/// Brings everything that was created on behalf of `service` up to date with its current state.
///
/// The Service is always read from `store` rather than trusted from a cache, since a stale
/// "not found" would cause its certificate to be torn down.
pub async fn reconcile_service(
    store: &impl ObjectStore,
    domain: &TrustDomain,
    service: &ObjectRef<Service>,
) -> Result<ServiceOutcome> {
    let Some(svc) = store
        .get_opt::<Service>(&service.name, service.namespace.as_deref())
        .await
        .context(GetServiceSnafu {
            service: service.clone(),
        })?
    else {
        tracing::debug!(%service, "service does not exist, cleaning up");
        let deleted = teardown_for_service(store, domain, service)
            .await
            .context(TeardownSnafu)?;
        return Ok(ServiceOutcome::TornDown { deleted });
    };
    let Some(secret_name) = svc
        .labels()
        .get(&domain.labels.serving_cert_secret_name)
        .filter(|name| !name.is_empty())
    else {
        return Ok(ServiceOutcome::Skipped);
    };

    let certificate = sync_service_certificate(store, domain, &svc)
        .await
        .context(SyncCertificateSnafu)?;
    match fetch_ready_key_material(store, domain, &svc)
        .await
        .context(FetchKeyMaterialSnafu)?
    {
        KeyMaterial::Pending { retry_after } => Ok(ServiceOutcome::Pending {
            certificate,
            retry_after,
        }),
        KeyMaterial::Ready(key_material) => {
            let secret = propagate_secret(store, domain, &key_material, &svc, secret_name)
                .await
                .context(PropagateSecretSnafu)?;
            Ok(ServiceOutcome::Ready {
                certificate,
                secret,
            })
        }
    }
}

/// The Service that a Certificate was issued for, according to its back-reference labels.
fn certificate_owner(domain: &TrustDomain, cert: &Certificate) -> Option<ObjectRef<Service>> {
    let labels = cert.labels();
    Some(
        ObjectRef::new(labels.get(&domain.labels.service_name)?)
            .within(labels.get(&domain.labels.service_namespace)?),
    )
}

/// Converts a reference to a Service that is no longer cached back into a typed reference.
fn gone_service(object: &ObjectRef<DynamicObject>) -> ObjectRef<Service> {
    let service = ObjectRef::new(&object.name);
    match &object.namespace {
        Some(namespace) => service.within(namespace),
        None => service,
    }
}

struct Ctx {
    store: KubeStore,
    domain: TrustDomain,
}

type ReconcileResult =
    std::result::Result<(ObjectRef<Service>, Action), controller::Error<Error, watcher::Error>>;

/// Reconciles a Service that has dropped out of the controller's cache.
///
/// `error_policy` never sees these, so a failure is pushed onto `retries` instead.
async fn reconcile_gone_service(
    store: &impl ObjectStore,
    domain: &TrustDomain,
    service: ObjectRef<Service>,
    retries: &mpsc::UnboundedSender<ObjectRef<Service>>,
) -> ReconcileResult {
    match reconcile_service(store, domain, &service).await {
        Ok(outcome) => {
            tracing::debug!(%service, ?outcome, "reconciled gone service");
            Ok((service, outcome.action()))
        }
        Err(err) => {
            if retries.unbounded_send(service.clone()).is_err() {
                tracing::warn!(%service, "retry queue is closed, giving up on service");
            }
            Err(controller::Error::ReconcilerFailed(err, service.erase()))
        }
    }
}

pub async fn start(client: kube::Client, domain: TrustDomain) {
    let ctx = Arc::new(Ctx {
        store: KubeStore::new(client.clone()),
        domain,
    });
    let event_recorder = Arc::new(Recorder::new(
        client.clone(),
        Reporter {
            controller: FULL_CONTROLLER_NAME.to_string(),
            instance: None,
        },
    ));
    let (retry_tx, retry_rx) = mpsc::unbounded::<ObjectRef<Service>>();
    let domain = &ctx.domain;
    let reconciles = Controller::new(
        Api::<Service>::all(client.clone()),
        watcher::Config::default().labels(&domain.labels.serving_cert_secret_name),
    )
    .owns(
        Api::<Secret>::all(client.clone()),
        watcher::Config::default().labels(&domain.labels.certificate),
    )
    .watches(
        Api::<Certificate>::namespaced(client, &domain.namespace),
        watcher::Config::default().labels(&domain.labels.service_name),
        {
            let domain = domain.clone();
            move |cert| certificate_owner(&domain, &cert)
        },
    )
    .shutdown_on_signal()
    .run(reconcile, error_policy, ctx.clone())
    .for_each_concurrent(16, {
        let ctx = ctx.clone();
        let event_recorder = event_recorder.clone();
        let retry_tx = retry_tx.clone();
        move |res| {
            let ctx = ctx.clone();
            let event_recorder = event_recorder.clone();
            let retry_tx = retry_tx.clone();
            async move {
                // Deleted Services drop out of the controller's cache before they can be
                // reconciled, so they arrive here instead
                let res = match res {
                    Err(controller::Error::ObjectNotFound(object)) => {
                        reconcile_gone_service(
                            &ctx.store,
                            &ctx.domain,
                            gone_service(&object),
                            &retry_tx,
                        )
                        .await
                    }
                    res => res,
                };
                report_controller_reconciled(&event_recorder, FULL_CONTROLLER_NAME, &res).await
            }
        }
    });
    let retries = retry_rx.for_each_concurrent(16, move |service| {
        let ctx = ctx.clone();
        let event_recorder = event_recorder.clone();
        let retry_tx = retry_tx.clone();
        async move {
            tokio::time::sleep(ctx.domain.retry_interval).await;
            let res = reconcile_gone_service(&ctx.store, &ctx.domain, service, &retry_tx).await;
            report_controller_reconciled(&event_recorder, FULL_CONTROLLER_NAME, &res).await
        }
    });
    // The retry queue never runs dry on its own, so it stops together with the controller
    futures::future::select(Box::pin(reconciles), Box::pin(retries)).await;
}

async fn reconcile(svc: Arc<Service>, ctx: Arc<Ctx>) -> Result<Action> {
    let outcome = reconcile_service(&ctx.store, &ctx.domain, &ObjectRef::from_obj(&*svc)).await?;
    tracing::debug!(service = %ObjectRef::from_obj(&*svc), ?outcome, "reconciled service");
    Ok(outcome.action())
}

fn error_policy(_obj: Arc<Service>, _error: &Error, ctx: Arc<Ctx>) -> Action {
    Action::requeue(ctx.domain.retry_interval)
}

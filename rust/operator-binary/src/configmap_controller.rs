//! Keeps the CA bundle of opted-in ConfigMaps up to date with the root CA.

use std::sync::Arc;

use const_format::concatcp;
use futures::StreamExt;
use snafu::{ResultExt as _, Snafu};
use stackable_operator::{
    k8s_openapi::api::core::v1::{ConfigMap, Secret},
    kube::{
        self,
        api::{Api, DynamicObject},
        runtime::{
            controller::Action,
            events::{Recorder, Reporter},
            reflector::ObjectRef,
            watcher, Controller,
        },
    },
    logging::controller::{report_controller_reconciled, ReconcilerError},
};
use strum::{EnumDiscriminants, IntoStaticStr};

use crate::{
    ca_bundle::{self, inject_if_requested, InjectionOutcome},
    config::TrustDomain,
    store::{self, KubeStore, ObjectStore},
    OPERATOR_NAME,
};

const CONTROLLER_NAME: &str = "configmap";
const FULL_CONTROLLER_NAME: &str = concatcp!(CONTROLLER_NAME, ".", OPERATOR_NAME);

#[derive(Debug, Snafu, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("failed to get {config_map}"))]
    GetConfigMap {
        source: store::Error,
        config_map: ObjectRef<ConfigMap>,
    },

    #[snafu(display("failed to inject CA bundle"))]
    InjectCaBundle { source: ca_bundle::Error },
}
type Result<T, E = Error> = std::result::Result<T, E>;

impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }

    fn secondary_object(&self) -> Option<ObjectRef<DynamicObject>> {
        match self {
            Error::GetConfigMap { config_map, .. } => Some(config_map.clone().erase()),
            Error::InjectCaBundle { .. } => None,
        }
    }
}

fn outcome_action(outcome: &InjectionOutcome) -> Action {
    match outcome {
        InjectionOutcome::CaPending { retry_after } => Action::requeue(*retry_after),
        _ => Action::await_change(),
    }
}

/// Injects the CA bundle into the current version of `config_map`, if it still asks for it.
pub async fn reconcile_config_map(
    store: &impl ObjectStore,
    domain: &TrustDomain,
    config_map: &ObjectRef<ConfigMap>,
) -> Result<InjectionOutcome> {
    let Some(cm) = store
        .get_opt::<ConfigMap>(&config_map.name, config_map.namespace.as_deref())
        .await
        .context(GetConfigMapSnafu {
            config_map: config_map.clone(),
        })?
    else {
        tracing::debug!(%config_map, "config map does not exist, nothing to do");
        return Ok(InjectionOutcome::Skipped);
    };
    inject_if_requested(store, domain, &cm)
        .await
        .context(InjectCaBundleSnafu)
}

struct Ctx {
    store: KubeStore,
    domain: TrustDomain,
}

pub async fn start(client: kube::Client, domain: TrustDomain) {
    let controller = Controller::new(
        Api::<ConfigMap>::all(client.clone()),
        watcher::Config::default().labels(&domain.labels.inject_ca_bundle),
    );
    let config_maps = controller.store();
    let event_recorder = Arc::new(Recorder::new(
        client.clone(),
        Reporter {
            controller: FULL_CONTROLLER_NAME.to_string(),
            instance: None,
        },
    ));
    controller
        // Renewing the root CA rewrites its Secret, which must be propagated to every bundle
        .watches(
            Api::<Secret>::namespaced(client.clone(), &domain.namespace),
            watcher::Config::default()
                .fields(&format!("metadata.name={}", domain.root_secret_name)),
            move |_root_ca: Secret| {
                config_maps
                    .state()
                    .into_iter()
                    .map(|cm| ObjectRef::from_obj(&*cm))
                    .collect::<Vec<_>>()
            },
        )
        .shutdown_on_signal()
        .run(
            reconcile,
            error_policy,
            Arc::new(Ctx {
                store: KubeStore::new(client),
                domain,
            }),
        )
        .for_each_concurrent(16, move |res| {
            let event_recorder = event_recorder.clone();
            async move {
                report_controller_reconciled(&event_recorder, FULL_CONTROLLER_NAME, &res).await
            }
        })
        .await;
}

async fn reconcile(cm: Arc<ConfigMap>, ctx: Arc<Ctx>) -> Result<Action> {
    let config_map = ObjectRef::from_obj(&*cm);
    let outcome = reconcile_config_map(&ctx.store, &ctx.domain, &config_map).await?;
    tracing::debug!(%config_map, ?outcome, "reconciled config map");
    Ok(outcome_action(&outcome))
}

fn error_policy(_obj: Arc<ConfigMap>, _error: &Error, ctx: Arc<Ctx>) -> Action {
    Action::requeue(ctx.domain.retry_interval)
}

use clap::{crate_description, crate_version, Parser};
use stackable_operator::logging::TracingTarget;
use stackable_service_ca_operator::{
    config::{TrustDomain, TrustDomainOpts},
    configmap_controller, service_controller,
    store::KubeStore,
    trust_anchor, OPERATOR_NAME,
};

pub const APP_NAME: &str = "service-ca";

#[derive(clap::Parser)]
#[clap(author, version)]
struct Opts {
    #[clap(subcommand)]
    cmd: stackable_operator::cli::Command<ServiceCaOperatorRun>,
}

#[derive(clap::Parser)]
struct ServiceCaOperatorRun {
    #[command(flatten)]
    trust_domain: TrustDomainOpts,
    /// Tracing log collector system
    #[arg(long, env, default_value_t, value_enum)]
    pub tracing_target: TracingTarget,
}

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
    pub const TARGET: Option<&str> = option_env!("TARGET");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    match opts.cmd {
        // This operator does not define any CRDs of its own
        stackable_operator::cli::Command::Crd => {}
        stackable_operator::cli::Command::Run(ServiceCaOperatorRun {
            trust_domain,
            tracing_target,
        }) => {
            stackable_operator::logging::initialize_logging(
                "SERVICE_CA_OPERATOR_LOG",
                APP_NAME,
                tracing_target,
            );
            stackable_operator::utils::print_startup_string(
                crate_description!(),
                crate_version!(),
                built_info::GIT_VERSION,
                built_info::TARGET.unwrap_or("unknown target"),
                built_info::BUILT_TIME_UTC,
                built_info::RUSTC_VERSION,
            );
            let domain = TrustDomain::from(trust_domain);
            let client =
                stackable_operator::client::create_client(Some(OPERATOR_NAME.to_string())).await?;
            let kube_client = client.as_kube_client();
            let store = KubeStore::new(kube_client.clone());

            trust_anchor::ensure_cert_manager_installed(&store).await?;
            trust_anchor::ensure_trust_anchor(&store, &domain).await?;
            tracing::info!(namespace = %domain.namespace, "trust anchor is in place");

            futures::future::select(
                Box::pin(service_controller::start(kube_client.clone(), domain.clone())),
                Box::pin(configmap_controller::start(kube_client, domain)),
            )
            .await;
        }
    }
    Ok(())
}

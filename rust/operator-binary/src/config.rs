//! Names, labels and policies shared by all reconcilers.
//!
//! Everything lives in a [`TrustDomain`] value that is handed to each component, rather than in
//! global constants, so that multiple trust domains can coexist (for example in tests).

use stackable_operator::time::Duration;

use crate::utils::FmtByteSlice;

/// Kubernetes label values (and therefore derived certificate names) may not exceed this.
const MAX_LABEL_VALUE_LENGTH: usize = 63;
/// Hex digits of the name hash appended to shortened names.
const NAME_HASH_LENGTH: usize = 16;

pub const DEFAULT_CA_NAMESPACE: &str = "cert-manager";
pub const DEFAULT_CERTIFICATE_LIFETIME: Duration = Duration::from_hours_unchecked(2160);
pub const DEFAULT_CERTIFICATE_RENEW_BEFORE: Duration = Duration::from_hours_unchecked(360);

#[derive(clap::Args, Debug)]
pub struct TrustDomainOpts {
    /// The namespace that holds the CA and all Service certificates.
    ///
    /// For most setups this should be the namespace that cert-manager is deployed into.
    #[arg(long, env, default_value = DEFAULT_CA_NAMESPACE)]
    pub ca_namespace: String,

    /// Lifetime of the certificates issued for Services.
    #[arg(long, env, default_value = "90d")]
    pub certificate_lifetime: Duration,

    /// How long before expiry cert-manager should renew Service certificates.
    #[arg(long, env, default_value = "15d")]
    pub certificate_renew_before: Duration,

    /// How the name of a Service's Certificate is derived.
    #[arg(long, env, default_value_t, value_enum)]
    pub certificate_naming: CertificateNaming,
}

impl From<TrustDomainOpts> for TrustDomain {
    fn from(opts: TrustDomainOpts) -> Self {
        TrustDomain {
            certificate_lifetime: opts.certificate_lifetime,
            certificate_renew_before: opts.certificate_renew_before,
            naming: opts.certificate_naming,
            ..TrustDomain::new(opts.ca_namespace)
        }
    }
}

/// How the name of a Service's Certificate is derived from the Service.
#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CertificateNaming {
    /// `<namespace>-<service>-tls`.
    ///
    /// All Certificates live in the same namespace, so this is the only scheme that cannot
    /// collide for equally named Services in different namespaces.
    #[default]
    NamespacedName,

    /// `<service>-tls`.
    ///
    /// Only safe if Service names are unique across all namespaces.
    ServiceName,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelKeys {
    /// Set on a Service to request a certificate, the value is the name of the Secret to create.
    pub serving_cert_secret_name: String,
    /// Set on a ConfigMap to request injection of the CA certificate.
    pub inject_ca_bundle: String,
    /// Links issued Secrets (and their copies) to the Certificate they belong to.
    pub certificate: String,
    pub service_name: String,
    pub service_namespace: String,
}

impl Default for LabelKeys {
    fn default() -> Self {
        Self {
            serving_cert_secret_name: "service-ca.stackable.tech/serving-cert-secret-name"
                .to_string(),
            inject_ca_bundle: "service-ca.stackable.tech/inject-ca-bundle".to_string(),
            certificate: "service-ca.stackable.tech/certificate".to_string(),
            service_name: "service-ca.stackable.tech/service-name".to_string(),
            service_namespace: "service-ca.stackable.tech/service-namespace".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrivateKeyPolicy {
    pub algorithm: String,
    pub size: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TrustDomain {
    pub namespace: String,
    pub self_signed_issuer_name: String,
    pub root_certificate_name: String,
    pub root_common_name: String,
    /// Must never change once the CA has been issued, since every issued certificate chains up to
    /// it.
    pub root_secret_name: String,
    pub root_private_key: PrivateKeyPolicy,
    pub cluster_issuer_name: String,
    pub labels: LabelKeys,
    /// ConfigMap key that the CA certificate is injected into.
    pub ca_bundle_key: String,
    pub certificate_lifetime: Duration,
    pub certificate_renew_before: Duration,
    pub naming: CertificateNaming,
    /// How long to wait before checking again on a certificate that is still being issued.
    pub retry_interval: std::time::Duration,
}

impl TrustDomain {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            self_signed_issuer_name: "service-ca-self-signed".to_string(),
            root_certificate_name: "service-ca-certificate".to_string(),
            root_common_name: "service-ca".to_string(),
            root_secret_name: "service-ca-root".to_string(),
            root_private_key: PrivateKeyPolicy {
                algorithm: "ECDSA".to_string(),
                size: 521,
            },
            cluster_issuer_name: "service-ca-issuer".to_string(),
            labels: LabelKeys::default(),
            ca_bundle_key: "ca.crt".to_string(),
            certificate_lifetime: DEFAULT_CERTIFICATE_LIFETIME,
            certificate_renew_before: DEFAULT_CERTIFICATE_RENEW_BEFORE,
            naming: CertificateNaming::default(),
            retry_interval: std::time::Duration::from_secs(5),
        }
    }

    /// The name of the Certificate (and its backing Secret) issued for a Service.
    ///
    /// Names that would not fit into a label value are shortened to a prefix followed by a hash of
    /// the full name, so the result is still deterministic and unique.
    pub fn certificate_name(&self, service_name: &str, service_namespace: &str) -> String {
        let name = match self.naming {
            CertificateNaming::NamespacedName => {
                format!("{service_namespace}-{service_name}-tls")
            }
            CertificateNaming::ServiceName => format!("{service_name}-tls"),
        };
        if name.len() <= MAX_LABEL_VALUE_LENGTH {
            return name;
        }
        let hash = openssl::sha::sha256(name.as_bytes());
        let hash = format!("{:x}", FmtByteSlice(&hash[..NAME_HASH_LENGTH / 2]));
        let prefix =
            name[..MAX_LABEL_VALUE_LENGTH - NAME_HASH_LENGTH - 1].trim_end_matches(['-', '.']);
        format!("{prefix}-{hash}")
    }
}

/// Formats a duration the way Go's `time.Duration` does (`2160h0m0s`), which is the form
/// cert-manager uses, so that stored and computed values compare equal.
pub fn go_duration(duration: std::time::Duration) -> String {
    let secs = duration.as_secs();
    format!("{}h{}m{}s", secs / 3600, secs % 3600 / 60, secs % 60)
}

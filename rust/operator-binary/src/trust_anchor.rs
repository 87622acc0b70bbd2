//! Bootstraps the root of trust that every Service certificate is issued against.
//!
//! The trust anchor consists of three cert-manager objects, created in order:
//!
//! 1. a self-signed [`Issuer`] in the trust domain namespace,
//! 2. the root CA [`Certificate`], issued by (1),
//! 3. a [`ClusterIssuer`] that signs with the root CA's Secret.
//!
//! Each object is only created if it is missing. Existing objects are never modified, since
//! rotating the root CA would invalidate every certificate issued so far.

use snafu::{OptionExt as _, ResultExt as _, Snafu};
use stackable_operator::{
    k8s_openapi::{
        api::core::v1::Secret,
        apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition,
        ByteString,
    },
    kube::{api::DynamicObject, runtime::reflector::ObjectRef},
};

use crate::{
    config::TrustDomain,
    external_crd::cert_manager::{
        CaIssuer, Certificate, CertificatePrivateKey, CertificateSpec, ClusterIssuer,
        ClusterIssuerSpec, Issuer, IssuerConfig, IssuerSpec, ObjectReference, SelfSignedIssuer,
        CERTIFICATE_CRD_NAME,
    },
    store::{self, create_if_missing, object_ref, ObjectStore},
};

/// Secret key holding the CA's PEM-encoded certificate.
pub const CA_CERTIFICATE_KEY: &str = "tls.crt";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to check whether cert-manager is installed"))]
    GetCertManagerCrd { source: store::Error },

    #[snafu(display(
        "cert-manager does not seem to be installed (CustomResourceDefinition {crd:?} is missing)"
    ))]
    CertManagerNotInstalled { crd: &'static str },

    #[snafu(display("failed to get {object}"))]
    Get {
        source: store::Error,
        object: ObjectRef<DynamicObject>,
    },

    #[snafu(display("failed to create {object}"))]
    Create {
        source: store::Error,
        object: ObjectRef<DynamicObject>,
    },

    #[snafu(display("CA {secret} has no {key:?} key"))]
    MissingCaCertificate {
        secret: ObjectRef<DynamicObject>,
        key: &'static str,
    },

    #[snafu(display("CA certificate in {secret} is not valid UTF-8"))]
    CaCertificateNotUtf8 {
        source: std::string::FromUtf8Error,
        secret: ObjectRef<DynamicObject>,
    },
}
type Result<T, E = Error> = std::result::Result<T, E>;

/// Fails if cert-manager's Certificate CRD is not installed.
///
/// Nothing else can make progress without cert-manager, so this is meant to be checked once at
/// startup, and treated as fatal.
pub async fn ensure_cert_manager_installed(store: &impl ObjectStore) -> Result<()> {
    store
        .get_opt::<CustomResourceDefinition>(CERTIFICATE_CRD_NAME, None)
        .await
        .context(GetCertManagerCrdSnafu)?
        .context(CertManagerNotInstalledSnafu {
            crd: CERTIFICATE_CRD_NAME,
        })?;
    Ok(())
}

/// Makes sure that the self-signed issuer, root CA certificate, and CA cluster issuer all exist.
///
/// Safe to call any number of times.
pub async fn ensure_trust_anchor(store: &impl ObjectStore, domain: &TrustDomain) -> Result<()> {
    ensure_self_signed_issuer(store, domain).await?;
    ensure_root_certificate(store, domain).await?;
    ensure_cluster_issuer(store, domain).await
}

async fn ensure_self_signed_issuer(store: &impl ObjectStore, domain: &TrustDomain) -> Result<()> {
    let name = &domain.self_signed_issuer_name;
    let namespace = Some(domain.namespace.as_str());
    let object = object_ref::<Issuer>(name, namespace);
    if store
        .get_opt::<Issuer>(name, namespace)
        .await
        .context(GetSnafu {
            object: object.clone(),
        })?
        .is_some()
    {
        return Ok(());
    }
    tracing::info!(issuer = %object, "self-signed issuer does not exist, creating");
    let mut issuer = Issuer::new(
        name,
        IssuerSpec {
            config: IssuerConfig {
                self_signed: Some(SelfSignedIssuer {}),
                ca: None,
            },
        },
    );
    issuer.metadata.namespace = Some(domain.namespace.clone());
    if !create_if_missing(store, &issuer)
        .await
        .context(CreateSnafu {
            object: object.clone(),
        })?
    {
        tracing::debug!(issuer = %object, "issuer was created concurrently");
    }
    Ok(())
}

async fn ensure_root_certificate(store: &impl ObjectStore, domain: &TrustDomain) -> Result<()> {
    let name = &domain.root_certificate_name;
    let namespace = Some(domain.namespace.as_str());
    let object = object_ref::<Certificate>(name, namespace);
    if store
        .get_opt::<Certificate>(name, namespace)
        .await
        .context(GetSnafu {
            object: object.clone(),
        })?
        .is_some()
    {
        return Ok(());
    }
    tracing::info!(certificate = %object, "root CA certificate does not exist, creating");
    if !create_if_missing(store, &root_certificate(domain))
        .await
        .context(CreateSnafu {
            object: object.clone(),
        })?
    {
        tracing::debug!(certificate = %object, "root CA certificate was created concurrently");
    }
    Ok(())
}

async fn ensure_cluster_issuer(store: &impl ObjectStore, domain: &TrustDomain) -> Result<()> {
    let name = &domain.cluster_issuer_name;
    let object = object_ref::<ClusterIssuer>(name, None);
    if store
        .get_opt::<ClusterIssuer>(name, None)
        .await
        .context(GetSnafu {
            object: object.clone(),
        })?
        .is_some()
    {
        return Ok(());
    }
    tracing::info!(issuer = %object, "CA cluster issuer does not exist, creating");
    let issuer = ClusterIssuer::new(
        name,
        ClusterIssuerSpec {
            config: IssuerConfig {
                self_signed: None,
                ca: Some(CaIssuer {
                    secret_name: domain.root_secret_name.clone(),
                }),
            },
        },
    );
    if !create_if_missing(store, &issuer)
        .await
        .context(CreateSnafu {
            object: object.clone(),
        })?
    {
        tracing::debug!(issuer = %object, "issuer was created concurrently");
    }
    Ok(())
}

pub(crate) fn root_certificate(domain: &TrustDomain) -> Certificate {
    let mut cert = Certificate::new(
        &domain.root_certificate_name,
        CertificateSpec {
            secret_name: domain.root_secret_name.clone(),
            common_name: Some(domain.root_common_name.clone()),
            is_ca: true,
            private_key: Some(CertificatePrivateKey {
                algorithm: domain.root_private_key.algorithm.clone(),
                size: domain.root_private_key.size,
            }),
            issuer_ref: ObjectReference::issuer(&domain.self_signed_issuer_name),
            ..CertificateSpec::default()
        },
    );
    cert.metadata.namespace = Some(domain.namespace.clone());
    cert
}

#[derive(Debug, PartialEq, Eq)]
pub enum RootCa {
    /// The PEM-encoded CA certificate.
    Ready(String),
    /// cert-manager has not finished issuing the CA yet, try again later.
    Pending,
}

/// Retrieves the public certificate of the root CA.
///
/// Does not wait for the CA to be issued, [`RootCa::Pending`] is returned instead.
pub async fn fetch_root_ca(store: &impl ObjectStore, domain: &TrustDomain) -> Result<RootCa> {
    let namespace = Some(domain.namespace.as_str());
    let cert_ref = object_ref::<Certificate>(&domain.root_certificate_name, namespace);
    let Some(cert) = store
        .get_opt::<Certificate>(&domain.root_certificate_name, namespace)
        .await
        .context(GetSnafu { object: cert_ref })?
    else {
        tracing::debug!("root CA certificate does not exist yet");
        return Ok(RootCa::Pending);
    };
    if !cert.is_ready() {
        tracing::debug!("root CA certificate is not ready yet");
        return Ok(RootCa::Pending);
    }

    let secret_ref = object_ref::<Secret>(&cert.spec.secret_name, namespace);
    let Some(secret) = store
        .get_opt::<Secret>(&cert.spec.secret_name, namespace)
        .await
        .context(GetSnafu {
            object: secret_ref.clone(),
        })?
    else {
        // cert-manager marks the Certificate ready only after writing the Secret,
        // but our view may lag
        tracing::debug!(secret = %secret_ref, "root CA secret does not exist yet");
        return Ok(RootCa::Pending);
    };
    let ByteString(ca) = secret
        .data
        .unwrap_or_default()
        .remove(CA_CERTIFICATE_KEY)
        .context(MissingCaCertificateSnafu {
            secret: secret_ref.clone(),
            key: CA_CERTIFICATE_KEY,
        })?;
    String::from_utf8(ca)
        .map(RootCa::Ready)
        .context(CaCertificateNotUtf8Snafu { secret: secret_ref })
}

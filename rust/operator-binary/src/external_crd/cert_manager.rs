//! CRDs owned by [cert-manager](https://cert-manager.io/), see
//! [their API docs](https://cert-manager.io/docs/reference/api-docs/).
//!
//! Only the fields that this operator reads or writes are modelled.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use stackable_operator::{
    kube::CustomResource,
    schemars::{self, JsonSchema},
};

pub const GROUP: &str = "cert-manager.io";

/// Name of the CustomResourceDefinition that marks cert-manager as installed.
pub const CERTIFICATE_CRD_NAME: &str = "certificates.cert-manager.io";

pub const CONDITION_READY: &str = "Ready";
pub const CONDITION_STATUS_TRUE: &str = "True";

/// See <https://cert-manager.io/docs/reference/api-docs/#cert-manager.io/v1.Certificate>.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "cert-manager.io",
    version = "v1",
    kind = "Certificate",
    namespaced,
    status = "CertificateStatus",
    crates(
        kube_core = "stackable_operator::kube::core",
        k8s_openapi = "stackable_operator::k8s_openapi",
        schemars = "stackable_operator::schemars"
    )
)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSpec {
    pub secret_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_template: Option<CertificateSecretTemplate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_name: Option<String>,
    #[serde(default, rename = "isCA")]
    pub is_ca: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renew_before: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ip_addresses: Vec<String>,
    pub issuer_ref: ObjectReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<CertificatePrivateKey>,
}

/// See <https://cert-manager.io/docs/reference/api-docs/#cert-manager.io/v1.CertificateSecretTemplate>.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSecretTemplate {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// See <https://cert-manager.io/docs/reference/api-docs/#cert-manager.io/v1.CertificatePrivateKey>.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CertificatePrivateKey {
    pub algorithm: String,
    pub size: u32,
}

/// See <https://cert-manager.io/docs/reference/api-docs/#meta.cert-manager.io/v1.ObjectReference>.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl ObjectReference {
    pub fn issuer(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: Some("Issuer".to_string()),
            group: Some(GROUP.to_string()),
        }
    }

    pub fn cluster_issuer(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: Some("ClusterIssuer".to_string()),
            group: Some(GROUP.to_string()),
        }
    }
}

/// See <https://cert-manager.io/docs/reference/api-docs/#cert-manager.io/v1.CertificateStatus>.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CertificateStatus {
    #[serde(default)]
    pub conditions: Vec<CertificateCondition>,
}

/// See <https://cert-manager.io/docs/reference/api-docs/#cert-manager.io/v1.CertificateCondition>.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CertificateCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Certificate {
    /// Whether cert-manager has finished issuing the certificate.
    ///
    /// A missing `Ready` condition means "not ready yet", never an error.
    pub fn is_ready(&self) -> bool {
        self.status
            .iter()
            .flat_map(|status| &status.conditions)
            .find(|cond| cond.type_ == CONDITION_READY)
            .is_some_and(|cond| cond.status == CONDITION_STATUS_TRUE)
    }
}

/// See <https://cert-manager.io/docs/reference/api-docs/#cert-manager.io/v1.IssuerConfig>.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IssuerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_signed: Option<SelfSignedIssuer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<CaIssuer>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct SelfSignedIssuer {}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CaIssuer {
    pub secret_name: String,
}

/// See <https://cert-manager.io/docs/reference/api-docs/#cert-manager.io/v1.Issuer>.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "cert-manager.io",
    version = "v1",
    kind = "Issuer",
    namespaced,
    crates(
        kube_core = "stackable_operator::kube::core",
        k8s_openapi = "stackable_operator::k8s_openapi",
        schemars = "stackable_operator::schemars"
    )
)]
pub struct IssuerSpec {
    #[serde(flatten)]
    pub config: IssuerConfig,
}

/// See <https://cert-manager.io/docs/reference/api-docs/#cert-manager.io/v1.ClusterIssuer>.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "cert-manager.io",
    version = "v1",
    kind = "ClusterIssuer",
    crates(
        kube_core = "stackable_operator::kube::core",
        k8s_openapi = "stackable_operator::k8s_openapi",
        schemars = "stackable_operator::schemars"
    )
)]
pub struct ClusterIssuerSpec {
    #[serde(flatten)]
    pub config: IssuerConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn certificate(status: &str) -> Certificate {
        serde_yaml::from_str(&format!(
            r#"
apiVersion: cert-manager.io/v1
kind: Certificate
metadata:
  name: my-svc-tls
  namespace: cert-manager
spec:
  secretName: my-svc-tls
  isCA: false
  issuerRef:
    name: service-ca-issuer
    kind: ClusterIssuer
    group: cert-manager.io
status:
  conditions:
    - type: Issuing
      status: "True"
    - type: Ready
      status: "{status}"
"#
        ))
        .unwrap()
    }

    #[test]
    fn ready_condition_is_respected() {
        assert!(certificate("True").is_ready());
        assert!(!certificate("False").is_ready());
        assert!(!certificate("Unknown").is_ready());
    }

    #[test]
    fn missing_status_is_not_ready() {
        let mut cert = certificate("True");
        cert.status = None;
        assert!(!cert.is_ready());
        cert.status = Some(CertificateStatus::default());
        assert!(!cert.is_ready());
    }

    #[test]
    fn is_ca_uses_cert_manager_field_name() {
        let cert = Certificate::new(
            "root",
            CertificateSpec {
                secret_name: "root".to_string(),
                is_ca: true,
                issuer_ref: ObjectReference::issuer("self-signed"),
                ..CertificateSpec::default()
            },
        );
        let json = serde_json::to_value(&cert).unwrap();
        assert_eq!(json["spec"]["isCA"], serde_json::Value::Bool(true));
        assert_eq!(json["spec"]["issuerRef"]["kind"], "Issuer");
    }

    #[test]
    fn self_signed_issuer_serializes_as_empty_object() {
        let issuer = Issuer::new(
            "self-signed",
            IssuerSpec {
                config: IssuerConfig {
                    self_signed: Some(SelfSignedIssuer {}),
                    ca: None,
                },
            },
        );
        let json = serde_json::to_value(&issuer).unwrap();
        assert_eq!(json["spec"], serde_json::json!({ "selfSigned": {} }));
    }
}

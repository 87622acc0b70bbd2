pub mod ca_bundle;
pub mod certificate;
pub mod config;
pub mod configmap_controller;
pub mod external_crd;
pub mod propagate;
pub mod service_controller;
pub mod store;
pub mod trust_anchor;
pub mod utils;

#[cfg(test)]
mod test_utils;

pub const OPERATOR_NAME: &str = "service-ca.stackable.tech";
